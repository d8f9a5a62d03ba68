mod common;

use classfile_decompiler::code_attribute::{decode, FieldOp, InsnKind, InvokeKind};
use classfile_decompiler::constant_info::ConstantInfo;
use classfile_decompiler::metadata::Constant;
use classfile_decompiler::method_info::MethodAccessFlags;
use classfile_decompiler::{ClassAccessFlags, ClassFile, DecompileError, MetadataTable};
use common::*;

#[test]
fn test_valid_class() {
    let bytes = sample_class().build();
    let class = ClassFile::parse(&bytes).unwrap();
    assert_eq!(class.major_version, 52);
    assert_eq!(class.const_pool.len() as u16 + 1, class.const_pool_size);
    assert!(class.access_flags.contains(ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER));
    assert_eq!(class.fields_count, 1);
    assert_eq!(class.methods_count, 2);
    assert!(class.methods[0].access_flags.contains(MethodAccessFlags::PUBLIC));
    assert!(matches!(&class.const_pool[0], ConstantInfo::Utf8(u) if u.utf8_string == "demo/Sample"));
}

#[test]
fn test_metadata_lookups() {
    let mut builder = sample_class();
    let greeting = builder.string("hi");
    builder.interface("java/lang/Runnable");
    let meta = MetadataTable::parse(&builder.build()).unwrap();

    assert_eq!(meta.this_class().unwrap(), "demo/Sample");
    assert_eq!(meta.super_class().unwrap(), Some("java/lang/Object"));
    assert_eq!(meta.interfaces().unwrap(), vec!["java/lang/Runnable"]);
    assert_eq!(meta.member_count(), 3);
    assert_eq!(meta.constant(greeting).unwrap(), Constant::String("hi".into()));
}

#[test]
fn test_bad_pool_index() {
    let meta = MetadataTable::parse(&sample_class().build()).unwrap();
    assert_eq!(meta.entry(0), Err(DecompileError::ConstantPool { index: 0 }));
    assert!(matches!(meta.utf8(999), Err(DecompileError::ConstantPool { index: 999 })));
    // index 2 is a Class entry, not a member reference
    assert!(meta.member_ref(2).is_err());
}

#[test]
fn test_code_attribute() {
    let meta = MetadataTable::parse(&sample_class().build()).unwrap();
    let getter = &meta.methods()[1];
    let code = meta.code_attribute(getter).unwrap().unwrap();
    assert_eq!(code.max_locals, 1);
    assert_eq!(code.code.len(), 5);
    assert!(code.exception_table.is_empty());

    let instructions = decode(&code.code, &meta).unwrap();
    let offsets: Vec<u32> = instructions.iter().map(|i| i.offset).collect();
    assert_eq!(offsets, vec![0, 1, 4]);
    match &instructions[1].kind {
        InsnKind::Field { op, field } => {
            assert_eq!(*op, FieldOp::GetField);
            assert_eq!(field.owner, "demo/Sample");
            assert_eq!(field.name, "count");
            assert_eq!(field.descriptor, "I");
        }
        other => panic!("expected getfield, got {other:?}"),
    }

    let ctor = meta.code_attribute(&meta.methods()[0]).unwrap().unwrap();
    let instructions = decode(&ctor.code, &meta).unwrap();
    assert!(matches!(
        &instructions[1].kind,
        InsnKind::Invoke { kind: InvokeKind::Special, method } if method.name == "<init>"
    ));
}

#[test]
fn test_abstract_method_has_no_code() {
    let mut builder = ClassBuilder::new("Shape");
    builder.method(ACC_PUBLIC | 0x0400, "area", "()D", None);
    let meta = MetadataTable::parse(&builder.build()).unwrap();
    assert!(meta.code_attribute(&meta.methods()[0]).is_none());

    let decl = classfile_decompiler::decompile(&builder.build()).unwrap();
    let method = decl.methods().next().unwrap();
    assert!(method.body.is_none());
    assert_eq!(method.to_string(), "public abstract double area();");
}

#[test]
fn test_decode_partitions_code() {
    let code = [
        0x03, 0x3b, 0x1a, 0x10, 10, 0xa2, 0x00, 0x09, 0x84, 0x00, 0x01, 0xa7, 0xff, 0xf7, 0xb1,
    ];
    let mut builder = ClassBuilder::new("Loop");
    builder.method(ACC_STATIC, "count", "()V", Some(Code::new(2, 1, &code)));
    let meta = MetadataTable::parse(&builder.build()).unwrap();

    let instructions = decode(&code, &meta).unwrap();
    let mut next = 0;
    for insn in &instructions {
        assert_eq!(insn.offset, next);
        assert_eq!(insn.bytes[..], code[insn.offset as usize..(insn.offset + insn.len()) as usize]);
        next = insn.next_offset();
    }
    assert_eq!(next as usize, code.len());

    let truncated = classfile_decompiler::decode_lenient(&code[..4], &meta);
    assert_eq!(truncated.instructions.len(), 3);
    assert_eq!(truncated.undecoded, vec![0x10]);
    assert!(matches!(
        truncated.error,
        Some(DecompileError::MalformedBytecode { offset: 3, .. })
    ));
}
