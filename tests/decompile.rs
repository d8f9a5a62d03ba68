mod common;

use classfile_decompiler::decompile::{LoopKind, MethodDeclaration};
use classfile_decompiler::{
    attach_nested, decompile, DecompileError, DecompileOptions, Decompiler, Node, NodeKind, Renderer,
    TypeDeclaration,
};
use common::*;

fn method<'a>(decl: &'a TypeDeclaration, name: &str) -> &'a MethodDeclaration {
    decl.methods()
        .find(|m| m.name == name)
        .unwrap_or_else(|| panic!("no method {name}"))
}

fn render_method(decl: &TypeDeclaration, name: &str) -> String {
    Renderer::default().render(&Node::Method(method(decl, name).clone()))
}

fn single_method(access: u16, name: &str, descriptor: &str, code: Code) -> TypeDeclaration {
    let mut class = ClassBuilder::new("Test");
    class.method(access, name, descriptor, Some(code));
    decompile(&class.build()).unwrap()
}

#[test]
fn header_and_members() {
    let decl = decompile(&sample_class().build()).unwrap();
    assert_eq!(decl.name, "demo/Sample");
    assert_eq!(decl.simple_name(), "Sample");
    assert_eq!(decl.package.as_deref(), Some("demo"));
    assert_eq!(decl.super_class.as_deref(), Some("java/lang/Object"));
    assert_eq!(decl.member_count(), 3);
    assert_eq!(decl.diagnostics().count(), 0);

    let kinds: Vec<NodeKind> = decl.members.iter().map(Node::kind).collect();
    assert_eq!(kinds, vec![NodeKind::Field, NodeKind::Method, NodeKind::Method]);
    assert_eq!(decl.fields().next().unwrap().to_string(), "private int count;");
}

#[test]
fn constructor_drops_implicit_super_call() {
    let decl = decompile(&sample_class().build()).unwrap();
    let ctor = method(&decl, "<init>");
    assert_eq!(ctor.to_string(), "public Sample()");
    assert_eq!(ctor.body.as_deref(), Some(&[][..]));

    let getter = method(&decl, "get");
    let body = getter.body.as_ref().unwrap();
    assert_eq!(body.len(), 1);
    assert_eq!(body[0].to_string(), "return this.count;");
}

#[test]
fn constant_field_initializer() {
    let mut class = ClassBuilder::new("Limits");
    let seven = class.integer(7);
    let one = class.integer(1);
    class.field(ACC_PUBLIC | ACC_STATIC | ACC_FINAL, "LIMIT", "I", Some(seven));
    class.field(ACC_STATIC, "on", "Z", Some(one));
    let decl = decompile(&class.build()).unwrap();
    let fields: Vec<String> = decl.fields().map(|f| f.to_string()).collect();
    assert_eq!(fields, vec!["public static final int LIMIT = 7;", "static boolean on = true;"]);
}

#[test]
fn if_else_with_join() {
    // if (param0 != 0) var1 = 1; else var1 = 2;
    let decl = single_method(
        ACC_STATIC,
        "pick",
        "(I)V",
        Code::new(1, 2, &[0x1a, 0x99, 0x00, 0x08, 0x04, 0x3c, 0xa7, 0x00, 0x05, 0x05, 0x3c, 0xb1]),
    );
    let text = render_method(&decl, "pick");
    assert_eq!(
        text,
        "static void pick(int param0)\n{\n    if (param0 != 0)\n    {\n        int var1 = 1;\n    }\n    else\n    {\n        var1 = 2;\n    }\n}"
    );
}

#[test]
fn counting_loop() {
    // var0 = 0; while (var0 < 10) var0++;
    let decl = single_method(
        ACC_STATIC,
        "count",
        "()V",
        Code::new(
            2,
            1,
            &[0x03, 0x3b, 0x1a, 0x10, 10, 0xa2, 0x00, 0x09, 0x84, 0x00, 0x01, 0xa7, 0xff, 0xf7, 0xb1],
        ),
    );
    let body = method(&decl, "count").body.as_ref().unwrap();
    assert!(matches!(&body[1], Node::Loop(l) if matches!(&l.kind, LoopKind::PreTest(_))));
    assert_eq!(
        render_method(&decl, "count"),
        "static void count()\n{\n    int var0 = 0;\n    while (var0 < 10)\n    {\n        var0++;\n    }\n}"
    );
}

#[test]
fn finally_cleanup_appears_once() {
    // try { var1 = 1; } finally { var2 = 0; }
    let code = Code::new(1, 4, &[0x04, 0x3c, 0x03, 0x3d, 0xb1, 0x4e, 0x03, 0x3d, 0x2d, 0xbf]).handler(0, 2, 5, 0);
    let decl = single_method(ACC_STATIC, "run", "()V", code);
    let body = method(&decl, "run").body.as_ref().unwrap();
    assert_eq!(body.len(), 1);
    assert_eq!(body[0].kind(), NodeKind::ResourceScope);

    let text = render_method(&decl, "run");
    assert_eq!(text.matches("var2 = 0").count(), 1);
    assert!(text.contains("\n    finally\n    {\n"));
    assert_eq!(decl.diagnostics().count(), 0);
}

#[test]
fn try_catch_finally_keeps_one_cleanup() {
    // try { a(); } catch (Exception var0) { b(); } finally { c(); }
    let mut class = ClassBuilder::new("Test");
    let [a0, a1] = class.method_ref("Test", "a", "()V").to_be_bytes();
    let [b0, b1] = class.method_ref("Test", "b", "()V").to_be_bytes();
    let [c0, c1] = class.method_ref("Test", "c", "()V").to_be_bytes();
    let exception = class.class("java/lang/Exception");
    #[rustfmt::skip]
    let bytes = [
        0xb8, a0, a1, 0xb8, c0, c1, 0xa7, 0x00, 0x13, // 0: a(); c(); goto 25
        0x4b, 0xb8, b0, b1, 0xb8, c0, c1, 0xa7, 0x00, 0x09, // 9: astore_0; b(); c(); goto 25
        0x4c, 0xb8, c0, c1, 0x2b, 0xbf, // 19: astore_1; c(); aload_1; athrow
        0xb1, // 25: return
    ];
    let code = Code::new(1, 2, &bytes)
        .handler(0, 3, 9, exception)
        .handler(0, 3, 19, 0)
        .handler(9, 13, 19, 0);
    class.method(ACC_STATIC, "run", "()V", Some(code));
    let decl = decompile(&class.build()).unwrap();

    let body = method(&decl, "run").body.as_ref().unwrap();
    assert_eq!(body.len(), 1);
    assert_eq!(body[0].kind(), NodeKind::Try);
    assert_eq!(decl.diagnostics().count(), 0);

    let text = render_method(&decl, "run");
    assert_eq!(text.matches("Test.c();").count(), 1);
    assert!(text.contains("\n    catch (Exception var0)\n    {\n        Test.b();\n    }\n"));
    assert!(text.contains("\n    finally\n    {\n        Test.c();\n    }\n"));
}

#[test]
fn synchronized_block_releases_once() {
    // synchronized (param0) { work(); }
    let mut class = ClassBuilder::new("Test");
    let [w0, w1] = class.method_ref("Test", "work", "()V").to_be_bytes();
    #[rustfmt::skip]
    let bytes = [
        0x2a, 0x59, 0x4c, 0xc2, // 0: aload_0; dup; astore_1; monitorenter
        0xb8, w0, w1, 0x2b, 0xc3, 0xa7, 0x00, 0x08, // 4: work(); aload_1; monitorexit; goto 17
        0x4d, 0x2b, 0xc3, 0x2c, 0xbf, // 12: astore_2; aload_1; monitorexit; aload_2; athrow
        0xb1, // 17: return
    ];
    let code = Code::new(2, 3, &bytes).handler(4, 9, 12, 0).handler(12, 15, 12, 0);
    class.method(ACC_STATIC, "lock", "(Ljava/lang/Object;)V", Some(code));
    let decl = decompile(&class.build()).unwrap();

    let body = method(&decl, "lock").body.as_ref().unwrap();
    let kinds: Vec<NodeKind> = body.iter().map(Node::kind).collect();
    assert_eq!(kinds, vec![NodeKind::Statement, NodeKind::Statement, NodeKind::ResourceScope]);
    assert_eq!(decl.diagnostics().count(), 0);

    let text = render_method(&decl, "lock");
    assert!(text.contains("    monitorenter(var1);\n    try\n    {\n        Test.work();\n    }\n"));
    assert_eq!(text.matches("monitorexit(var1);").count(), 1);
}

#[test]
fn loop_exit_through_goto_becomes_break() {
    // while (param0 > 0) { if (param0 == 5) break; param0--; }
    #[rustfmt::skip]
    let bytes = [
        0x1a, 0x9e, 0x00, 0x11, // 0: iload_0; ifle 18
        0x1a, 0x08, 0xa0, 0x00, 0x06, // 4: iload_0; iconst_5; if_icmpne 12
        0xa7, 0x00, 0x09, // 9: goto 18
        0x84, 0x00, 0xff, 0xa7, 0xff, 0xf1, // 12: iinc 0 -1; goto 0
        0xb1, // 18: return
    ];
    let decl = single_method(ACC_STATIC, "scan", "(I)V", Code::new(2, 1, &bytes));
    assert_eq!(decl.diagnostics().count(), 0);
    assert_eq!(
        render_method(&decl, "scan"),
        "static void scan(int param0)\n{\n    while (param0 > 0)\n    {\n        if (param0 == 5)\n        {\n            break;\n        }\n        param0--;\n    }\n}"
    );
}

#[test]
fn generic_signatures_are_rendered() {
    let mut class = ClassBuilder::new("Box");
    let class_signature = class.utf8("<T:Ljava/lang/Object;>Ljava/lang/Object;");
    class.attribute("Signature", &class_signature.to_be_bytes());
    class.generic_field(ACC_PRIVATE, "items", "Ljava/util/List;", "Ljava/util/List<TT;>;");
    class.method_with_signature(
        ACC_PUBLIC | 0x0400,
        "first",
        "(Ljava/util/List;)Ljava/lang/Object;",
        None,
        Some("<E:Ljava/lang/Object;>(Ljava/util/List<TE;>;)TE;"),
    );

    let src = class.utf8("src");
    let copy = class.utf8("copy");
    let list = class.utf8("Ljava/util/List;");
    let strings = class.utf8("Ljava/util/List<Ljava/lang/String;>;");
    // copy = src; return;
    let code = Code::new(1, 2, &[0x2a, 0x4c, 0xb1])
        .attribute("LocalVariableTable", local_table(&[(0, 3, src, list, 0), (2, 1, copy, list, 1)]))
        .attribute("LocalVariableTypeTable", local_table(&[(0, 3, src, strings, 0), (2, 1, copy, strings, 1)]));
    class.method_with_signature(
        ACC_PUBLIC | ACC_STATIC,
        "copy",
        "(Ljava/util/List;)V",
        Some(code),
        Some("(Ljava/util/List<Ljava/lang/String;>;)V"),
    );
    let decl = decompile(&class.build()).unwrap();

    assert_eq!(decl.to_string(), "public class Box<T>");
    assert_eq!(decl.fields().next().unwrap().to_string(), "private List<T> items;");
    assert_eq!(method(&decl, "first").to_string(), "public abstract <E> E first(List<E> param0);");
    assert_eq!(
        render_method(&decl, "copy"),
        "public static void copy(List<String> src)\n{\n    List<String> copy = src;\n}"
    );
    assert!(decl.members.iter().all(|m| m.kind() != NodeKind::Magic));
    assert_eq!(decl.diagnostics().count(), 0);
}

#[test]
fn typed_catch_clause() {
    let mut class = ClassBuilder::new("Worker");
    let work = class.method_ref("Worker", "work", "()V");
    let exception = class.class("java/lang/Exception");
    let [w0, w1] = work.to_be_bytes();
    // try { work(); } catch (Exception var0) { return; }
    let code = Code::new(1, 1, &[0xb8, w0, w1, 0xb1, 0x4b, 0xb1]).handler(0, 3, 4, exception);
    class.method(ACC_STATIC, "run", "()V", Some(code));
    let decl = decompile(&class.build()).unwrap();

    let body = method(&decl, "run").body.as_ref().unwrap();
    let Some(Node::Try(node)) = body.first() else {
        panic!("expected a try, got {body:?}");
    };
    assert_eq!(node.catches.len(), 1);
    assert_eq!(node.catches[0].catch_type, "java/lang/Exception");
    assert_eq!(node.catches[0].label, "catch (Exception var0)");
    assert!(node.finally.is_none());
    assert_eq!(node.body[0].to_string(), "Worker.work();");
}

#[test]
fn truncated_code_becomes_unknown() {
    // iconst_1, istore_1, then a sipush missing its second operand byte
    let decl = single_method(ACC_STATIC, "broken", "()V", Code::new(1, 2, &[0x04, 0x3c, 0x11, 0x00]));
    let m = method(&decl, "broken");
    let body = m.body.as_ref().unwrap();
    assert_eq!(body.len(), 1);
    let Node::Unknown(unknown) = &body[0] else {
        panic!("expected unknown, got {body:?}");
    };
    assert_eq!(unknown.instructions.len(), 2);
    assert_eq!(unknown.undecoded, vec![0x11, 0x00]);
    assert!(matches!(
        m.diagnostics.as_slice(),
        [DecompileError::MalformedBytecode { offset: 2, .. }]
    ));
    // the body is lost, but the declaration survives
    assert!(!m.diagnostics[0].is_recoverable());
    assert!(render_method(&decl, "broken").contains("// undecoded: 11 00"));
}

#[test]
fn truncated_member_keeps_its_siblings() {
    let mut class = sample_class();
    class.method(ACC_STATIC, "broken", "()V", Some(Code::new(1, 2, &[0x04, 0x3c, 0x11, 0x00])));
    let decl = decompile(&class.build()).unwrap();
    assert_eq!(decl.member_count(), 4);
    assert_eq!(decl.diagnostics().count(), 1);

    let getter = method(&decl, "get");
    assert!(getter.diagnostics.is_empty());
    assert_eq!(render_method(&decl, "get"), "public int get()\n{\n    return this.count;\n}");
    assert!(matches!(
        method(&decl, "broken").body.as_deref(),
        Some([Node::Unknown(_)])
    ));
}

#[test]
fn bad_descriptor_degrades_only_that_method() {
    let mut class = ClassBuilder::new("Test");
    class
        .method(ACC_STATIC, "fine", "()V", Some(Code::new(0, 0, &[0xb1])))
        .method(ACC_STATIC, "bad", "(I", Some(Code::new(0, 1, &[0xb1])))
        .field(ACC_PRIVATE, "weird", "Q", None);
    let decl = decompile(&class.build()).unwrap();
    assert_eq!(decl.member_count(), 3);

    let fine = method(&decl, "fine");
    assert!(fine.diagnostics.is_empty());
    assert_eq!(fine.body.as_deref(), Some(&[][..]));

    let bad = method(&decl, "bad");
    assert!(matches!(bad.diagnostics.as_slice(), [DecompileError::ClassFormat { .. }]));
    assert!(matches!(bad.body.as_deref(), Some([Node::Unknown(_)])));
    assert!(bad.params.is_empty());

    let weird = decl.fields().next().unwrap();
    assert_eq!(weird.to_string(), "private Object weird;");
    assert_eq!(weird.diagnostics.len(), 1);
    assert_eq!(decl.diagnostics().count(), 2);
}

#[test]
fn unresolved_slot_is_reported() {
    // iload_1 with one local slot
    let decl = single_method(ACC_STATIC, "bad", "()I", Code::new(1, 1, &[0x1b, 0xac]));
    let diagnostics: Vec<&DecompileError> = decl.diagnostics().collect();
    assert_eq!(diagnostics, vec![&DecompileError::UnresolvedSlot { offset: 0, slot: 1 }]);
    assert_eq!(decl.member_count(), 1);
}

#[test]
fn malformed_container_is_an_error() {
    let err = decompile(&[0xca, 0xfe, 0xba, 0xbe, 0, 0]).unwrap_err();
    assert!(matches!(err, DecompileError::ClassFormat { .. }));
    assert!(!err.is_recoverable());
    assert!(decompile(b"not a class").is_err());
}

fn many_methods() -> Vec<u8> {
    let mut class = ClassBuilder::new("Many");
    for i in 0..40 {
        class.method(ACC_STATIC, &format!("m{i}"), "()V", Some(Code::new(0, 0, &[0xb1])));
    }
    class.build()
}

#[test]
fn declaration_order_is_kept() {
    let bytes = many_methods();
    let expected: Vec<String> = (0..40).map(|i| format!("m{i}")).collect();
    for parallel in [false, true] {
        let decompiler = Decompiler::new(DecompileOptions {
            parallel,
            ..Default::default()
        });
        let decl = decompiler.decompile(&bytes).unwrap();
        let names: Vec<String> = decl.methods().map(|m| m.name.clone()).collect();
        assert_eq!(names, expected, "parallel = {parallel}");
    }
}

#[test]
fn class_attributes_are_kept_but_not_counted() {
    let mut class = sample_class();
    class.attribute("Custom", &[1, 2, 3]);
    let bytes = class.build();

    let decl = decompile(&bytes).unwrap();
    assert_eq!(decl.member_count(), 3);
    let Some(Node::Magic(magic)) = decl.members.last() else {
        panic!("expected a trailing attribute node");
    };
    assert_eq!(magic.name, "Custom");
    assert_eq!(magic.data, vec![1, 2, 3]);
    assert_eq!(Node::Magic(magic.clone()).to_string(), "/* attribute Custom: 3 bytes */");

    let quiet = Decompiler::new(DecompileOptions {
        emit_attributes: false,
        ..Default::default()
    });
    let decl = quiet.decompile(&bytes).unwrap();
    assert!(decl.members.iter().all(|m| m.kind() != NodeKind::Magic));
}

#[test]
fn synthetic_bodies_can_be_skipped() {
    let mut class = ClassBuilder::new("Bridge");
    class.method(ACC_STATIC | ACC_SYNTHETIC, "access$0", "()V", Some(Code::new(0, 0, &[0xb1])));
    let bytes = class.build();

    let decl = decompile(&bytes).unwrap();
    assert_eq!(method(&decl, "access$0").body.as_deref(), Some(&[][..]));

    let skipping = Decompiler::new(DecompileOptions {
        include_synthetic: false,
        ..Default::default()
    });
    let decl = skipping.decompile(&bytes).unwrap();
    assert_eq!(decl.member_count(), 1);
    assert!(method(&decl, "access$0").body.is_none());
}

#[test]
fn nested_type_is_inserted_before_attributes() {
    let mut outer_class = sample_class();
    outer_class.attribute("Custom", &[0]);
    let mut outer = decompile(&outer_class.build()).unwrap();
    let inner = decompile(&ClassBuilder::new("demo/Sample$Inner").build()).unwrap();
    attach_nested(&mut outer, inner);

    let nested: Vec<&TypeDeclaration> = outer.nested().collect();
    assert_eq!(nested.len(), 1);
    assert_eq!(nested[0].simple_name(), "Inner");
    assert!(nested[0].package.is_none());
    assert_eq!(outer.members.last().map(Node::kind), Some(NodeKind::Magic));
    assert_eq!(outer.member_count(), 3);
}
