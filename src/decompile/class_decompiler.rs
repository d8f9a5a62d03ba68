use log::{debug, log_enabled, trace, warn, Level};
#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::attribute_info::{
    CodeAttribute, ConstantValueAttribute, ExceptionsAttribute, SourceFileAttribute,
};
use crate::code_attribute::decode_lenient;
use crate::error::{DecompileError, Result};
use crate::field_info::{FieldAccessFlags, FieldInfo};
use crate::metadata::MetadataTable;
use crate::method_info::{MethodAccessFlags, MethodInfo};
use crate::types::ClassAccessFlags;

use super::ast::*;
use super::cfg::build_cfg;
use super::descriptor::*;
use super::expr::{Expr, Stmt};
use super::signature::{parse_class_signature, parse_field_signature, parse_method_signature};
use super::stack_sim::{constant_expr, local_variable_table, parameter_vars, simulate, MethodFrame};
use super::structuring::structure;

/// Options controlling the decompilation process.
#[derive(Clone, Debug)]
pub struct DecompileOptions {
    /// Decompile members on the rayon pool. Needs the `parallel` feature.
    pub parallel: bool,
    /// Decompile the bodies of synthetic methods. When off they are listed without a body.
    pub include_synthetic: bool,
    /// Keep uninterpreted class attributes as Magic nodes.
    pub emit_attributes: bool,
}

impl Default for DecompileOptions {
    fn default() -> Self {
        Self {
            parallel: cfg!(feature = "parallel"),
            include_synthetic: true,
            emit_attributes: true,
        }
    }
}

/// The main decompiler entry point.
#[derive(Clone, Debug, Default)]
pub struct Decompiler {
    options: DecompileOptions,
}

impl Decompiler {
    pub fn new(options: DecompileOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &DecompileOptions {
        &self.options
    }

    /// Decompile one class file. Only a malformed class container is an error;
    /// problems inside a member are recorded on that member.
    pub fn decompile(&self, bytes: &[u8]) -> Result<TypeDeclaration> {
        let meta = MetadataTable::parse(bytes)?;
        self.decompile_table(&meta)
    }

    pub fn decompile_table(&self, meta: &MetadataTable) -> Result<TypeDeclaration> {
        let mut decl = type_header(meta)?;
        let class_name = decl.simple_name().to_string();

        let fields = self.map_members(meta.fields(), |f| field_declaration(meta, f));
        let methods = self.map_members(meta.methods(), |m| self.method_declaration(meta, m, &decl.name, &class_name));
        decl.members.extend(fields.into_iter().map(Node::Field));
        decl.members.extend(methods.into_iter().map(Node::Method));

        if self.options.emit_attributes {
            for attr in meta.attributes() {
                let name = match meta.attribute_name(attr) {
                    Ok("SourceFile" | "Signature") => continue,
                    Ok(name) => name.to_string(),
                    Err(_) => format!("#{}", attr.attribute_name_index),
                };
                decl.members.push(Node::Magic(MagicNode {
                    name,
                    data: attr.info.clone(),
                }));
            }
        }
        debug!(
            "decompiled {}: {} members, {} diagnostics",
            decl.name,
            decl.member_count(),
            decl.diagnostics().count()
        );
        Ok(decl)
    }

    #[cfg(feature = "parallel")]
    fn map_members<T, R, F>(&self, items: &[T], f: F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Sync + Send,
    {
        if self.options.parallel {
            items.par_iter().map(f).collect()
        } else {
            items.iter().map(f).collect()
        }
    }

    #[cfg(not(feature = "parallel"))]
    fn map_members<T, R, F>(&self, items: &[T], f: F) -> Vec<R>
    where
        F: Fn(&T) -> R,
    {
        items.iter().map(f).collect()
    }

    fn method_declaration(
        &self,
        meta: &MetadataTable,
        method: &MethodInfo,
        this_class: &str,
        class_name: &str,
    ) -> MethodDeclaration {
        let mut diagnostics = Vec::new();
        let name = member_name(meta, method.name_index, "method", &mut diagnostics);
        let flags = method.access_flags;
        let is_static = flags.contains(MethodAccessFlags::STATIC);
        let kind = match name.as_str() {
            "<init>" => MethodKind::Constructor,
            "<clinit>" => MethodKind::StaticInitializer,
            _ => MethodKind::Method,
        };
        let mut decl = MethodDeclaration {
            kind,
            modifiers: method_modifiers(flags),
            name,
            class_name: class_name.to_string(),
            type_params: Vec::new(),
            params: Vec::new(),
            ret: JvmType::Unknown,
            throws: Vec::new(),
            varargs: flags.contains(MethodAccessFlags::VARARGS),
            body: None,
            diagnostics,
        };
        let name = decl.name.as_str();

        let descriptor = meta.utf8(method.descriptor_index).and_then(|raw| {
            parse_method_descriptor(raw).ok_or_else(|| DecompileError::ClassFormat {
                message: format!("bad method descriptor {raw} for {name}"),
            })
        });
        let descriptor = match descriptor {
            Ok(descriptor) => descriptor,
            Err(err) => {
                warn!("{name}: declaration degraded: {err}");
                decl.diagnostics.push(err);
                // without a frame the body cannot be simulated
                if meta.code_attribute(method).is_some() {
                    decl.body = Some(vec![unknown("unreadable method descriptor")]);
                }
                return decl;
            }
        };

        let mut code_unreadable = false;
        let code = match meta.code_attribute(method) {
            Some(Ok(code)) => Some(code),
            Some(Err(err)) => {
                warn!("{name}: unreadable Code attribute: {err}");
                decl.diagnostics.push(err);
                code_unreadable = true;
                None
            }
            None => None,
        };
        let locals = code
            .as_ref()
            .map(|c| local_variable_table(meta, c))
            .unwrap_or_default();
        let mut params = parameter_vars(meta, method, &descriptor, is_static, &locals);
        let mut ret = descriptor.ret.clone();

        // signatures omit synthetic parameters, so they only apply when the counts agree
        if let Some(raw) = meta.signature(&method.attributes) {
            match parse_method_signature(raw) {
                Some(sig) if sig.params.len() == params.len() => {
                    for (param, ty) in params.iter_mut().zip(sig.params) {
                        param.ty = ty;
                    }
                    ret = sig.ret;
                    decl.type_params = sig.type_params;
                }
                Some(_) => debug!("{name}: signature parameters do not match the descriptor"),
                None => debug!("{name}: unparsable signature {raw}"),
            }
        }

        decl.throws = match meta.interpret_attribute::<ExceptionsAttribute>(&method.attributes, "Exceptions") {
            Some(Ok(attr)) => attr
                .exception_table
                .iter()
                .filter_map(|&index| meta.class_name(index).ok().map(str::to_string))
                .collect(),
            Some(Err(err)) => {
                debug!("{name}: skipping Exceptions attribute: {err}");
                Vec::new()
            }
            None => Vec::new(),
        };

        let skip_body = !self.options.include_synthetic && flags.contains(MethodAccessFlags::SYNTHETIC);
        decl.body = match code {
            Some(_) if skip_body => {
                debug!("{name}: synthetic body skipped");
                None
            }
            Some(code) => {
                let frame = MethodFrame {
                    this_class: this_class.to_string(),
                    is_static,
                    ret: ret.clone(),
                    max_locals: code.max_locals,
                    params: params.clone(),
                    locals,
                };
                let (body, errors) = method_body(meta, &code, &frame, kind);
                decl.diagnostics.extend(errors);
                Some(body)
            }
            None if flags.intersects(MethodAccessFlags::ABSTRACT | MethodAccessFlags::NATIVE) => None,
            None if code_unreadable => Some(vec![unknown("unreadable Code attribute")]),
            None => None,
        };
        debug!(
            "{name}: {} top-level nodes, {} diagnostics",
            decl.body.as_ref().map_or(0, Vec::len),
            decl.diagnostics.len()
        );

        decl.params = params;
        decl.ret = ret;
        decl
    }
}

/// Decompile with default options.
pub fn decompile(bytes: &[u8]) -> Result<TypeDeclaration> {
    Decompiler::default().decompile(bytes)
}

/// Appends `inner` to `outer` as a nested type, ahead of any attribute placeholders.
pub fn attach_nested(outer: &mut TypeDeclaration, mut inner: TypeDeclaration) {
    inner.package = None;
    let at = outer
        .members
        .iter()
        .position(|m| matches!(m, Node::Magic(_)))
        .unwrap_or(outer.members.len());
    outer.members.insert(at, Node::Type(inner));
}

fn type_header(meta: &MetadataTable) -> Result<TypeDeclaration> {
    let name = meta.this_class()?.to_string();
    let flags = meta.class_file().access_flags;
    let kind = if flags.contains(ClassAccessFlags::ANNOTATION) {
        TypeKind::Annotation
    } else if flags.contains(ClassAccessFlags::INTERFACE) {
        TypeKind::Interface
    } else if flags.contains(ClassAccessFlags::ENUM) {
        TypeKind::Enum
    } else {
        TypeKind::Class
    };

    let mut modifiers = Vec::new();
    if flags.contains(ClassAccessFlags::PUBLIC) {
        modifiers.push("public");
    }
    if flags.contains(ClassAccessFlags::ABSTRACT) && kind == TypeKind::Class {
        modifiers.push("abstract");
    }
    if flags.contains(ClassAccessFlags::FINAL) && kind == TypeKind::Class {
        modifiers.push("final");
    }

    let source_file = match meta.interpret_attribute::<SourceFileAttribute>(meta.attributes(), "SourceFile") {
        Some(Ok(attr)) => meta.utf8(attr.sourcefile_index).ok().map(str::to_string),
        _ => None,
    };

    let signature = meta.signature(meta.attributes()).and_then(|raw| {
        let parsed = parse_class_signature(raw);
        if parsed.is_none() {
            debug!("{name}: unparsable class signature {raw}");
        }
        parsed
    });

    Ok(TypeDeclaration {
        kind,
        modifiers,
        package: package_name(&name).map(internal_to_source_name),
        super_class: meta.super_class()?.map(str::to_string),
        interfaces: meta.interfaces()?.into_iter().map(str::to_string).collect(),
        source_file,
        signature,
        name,
        members: Vec::new(),
    })
}

/// Name of a field or method. An unreadable name is replaced by `{what}#{index}`.
fn member_name(meta: &MetadataTable, index: u16, what: &str, diagnostics: &mut Vec<DecompileError>) -> String {
    match meta.utf8(index) {
        Ok(name) => name.to_string(),
        Err(err) => {
            warn!("unreadable {what} name: {err}");
            diagnostics.push(err);
            format!("{what}#{index}")
        }
    }
}

fn unknown(reason: &str) -> Node {
    Node::Unknown(UnknownNode {
        reason: reason.into(),
        instructions: Vec::new(),
        undecoded: Vec::new(),
    })
}

fn field_declaration(meta: &MetadataTable, field: &FieldInfo) -> FieldDeclaration {
    let mut diagnostics = Vec::new();
    let name = member_name(meta, field.name_index, "field", &mut diagnostics);
    let descriptor = meta.utf8(field.descriptor_index).and_then(|raw| {
        parse_type_descriptor(raw).ok_or_else(|| DecompileError::ClassFormat {
            message: format!("bad field descriptor {raw} for {name}"),
        })
    });
    let mut ty = descriptor.unwrap_or_else(|err| {
        warn!("field {name}: {err}");
        diagnostics.push(err);
        JvmType::Unknown
    });
    if let Some(raw) = meta.signature(&field.attributes) {
        match parse_field_signature(raw) {
            Some(generic) => ty = generic,
            None => debug!("field {name}: unparsable signature {raw}"),
        }
    }
    let initializer = match meta.interpret_attribute::<ConstantValueAttribute>(&field.attributes, "ConstantValue") {
        Some(Ok(attr)) => match meta.constant(attr.constant_value_index) {
            Ok(constant) => Some(constant_expr(&constant).coerce(&ty)),
            Err(err) => {
                debug!("field {name}: skipping ConstantValue: {err}");
                None
            }
        },
        Some(Err(err)) => {
            debug!("field {name}: skipping ConstantValue: {err}");
            None
        }
        None => None,
    };

    let flags = field.access_flags;
    let mut modifiers = access_modifiers(
        flags.contains(FieldAccessFlags::PUBLIC),
        flags.contains(FieldAccessFlags::PRIVATE),
        flags.contains(FieldAccessFlags::PROTECTED),
    );
    for (flag, word) in [
        (FieldAccessFlags::STATIC, "static"),
        (FieldAccessFlags::FINAL, "final"),
        (FieldAccessFlags::TRANSIENT, "transient"),
        (FieldAccessFlags::VOLATILE, "volatile"),
    ] {
        if flags.contains(flag) {
            modifiers.push(word);
        }
    }

    FieldDeclaration {
        modifiers,
        name,
        ty,
        initializer,
        diagnostics,
    }
}

fn method_modifiers(flags: MethodAccessFlags) -> Vec<&'static str> {
    let mut modifiers = access_modifiers(
        flags.contains(MethodAccessFlags::PUBLIC),
        flags.contains(MethodAccessFlags::PRIVATE),
        flags.contains(MethodAccessFlags::PROTECTED),
    );
    for (flag, word) in [
        (MethodAccessFlags::ABSTRACT, "abstract"),
        (MethodAccessFlags::STATIC, "static"),
        (MethodAccessFlags::FINAL, "final"),
        (MethodAccessFlags::SYNCHRONIZED, "synchronized"),
        (MethodAccessFlags::NATIVE, "native"),
        (MethodAccessFlags::STRICT, "strictfp"),
    ] {
        if flags.contains(flag) {
            modifiers.push(word);
        }
    }
    modifiers
}

fn access_modifiers(public: bool, private: bool, protected: bool) -> Vec<&'static str> {
    match (public, private, protected) {
        (true, _, _) => vec!["public"],
        (_, true, _) => vec!["private"],
        (_, _, true) => vec!["protected"],
        _ => Vec::new(),
    }
}

/// Decode, simulate and structure one Code attribute. A body that cannot be decoded
/// becomes a single Unknown node holding what was readable.
fn method_body(
    meta: &MetadataTable,
    code: &CodeAttribute,
    frame: &MethodFrame,
    kind: MethodKind,
) -> (Vec<Node>, Vec<DecompileError>) {
    let decoded = decode_lenient(&code.code, meta);
    if let Some(err) = decoded.error {
        warn!("{}: body degraded to unknown: {err}", frame.this_class);
        let node = Node::Unknown(UnknownNode {
            reason: err.to_string(),
            instructions: decoded.instructions,
            undecoded: decoded.undecoded,
        });
        return (vec![node], vec![err]);
    }

    let cfg = build_cfg(decoded.instructions, &code.exception_table, meta);
    if log_enabled!(Level::Trace) {
        trace!("{}: cfg\n{}", frame.this_class, cfg.to_dot());
    }
    let simulation = simulate(&cfg, frame);
    let structured = structure(&cfg, &simulation.blocks);

    let mut diagnostics = simulation.diagnostics;
    diagnostics.extend(structured.diagnostics);
    let mut body = structured.body;

    if frame.ret == JvmType::Void && matches!(body.last(), Some(Node::Statement(Stmt::Return(None)))) {
        body.pop();
    }
    if kind == MethodKind::Constructor {
        if let Some(Node::Statement(Stmt::Expr(Expr::ConstructorCall { is_super: true, args }))) = body.first() {
            if args.is_empty() {
                body.remove(0);
            }
        }
    }
    (body, diagnostics)
}
