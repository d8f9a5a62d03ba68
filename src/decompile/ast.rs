//! The decompiled syntax tree.
//!
//! A [`Node`] prints its own header line through `Display`. Nodes that own bodies expose
//! them through [`Node::sections`] so the renderer can expand them.

use std::fmt;

use crate::code_attribute::Instruction;
use crate::error::DecompileError;

use super::descriptor::*;
use super::expr::{Expr, LocalVar, Stmt};
use super::signature::{type_parameter_list, ClassSignature, TypeParameter};

/// Kind of a node, the key processors are registered under.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeKind {
    Type,
    Field,
    Method,
    Statement,
    If,
    Loop,
    Try,
    ResourceScope,
    Switch,
    Case,
    Unknown,
    Magic,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Node {
    Type(TypeDeclaration),
    Field(FieldDeclaration),
    Method(MethodDeclaration),
    Statement(Stmt),
    If(IfNode),
    Loop(LoopNode),
    Try(TryNode),
    ResourceScope(ResourceScopeNode),
    Switch(SwitchNode),
    Case(CaseNode),
    Unknown(UnknownNode),
    Magic(MagicNode),
}

/// One child body of a node, with the text written before its braces.
#[derive(Clone, Copy, Debug)]
pub struct Section<'a> {
    pub label: Option<&'a str>,
    pub children: &'a [Node],
}

impl<'a> Section<'a> {
    fn new(label: Option<&'a str>, children: &'a [Node]) -> Self {
        Section { label, children }
    }
}

impl Node {
    pub fn kind(&self) -> NodeKind {
        match self {
            Node::Type(_) => NodeKind::Type,
            Node::Field(_) => NodeKind::Field,
            Node::Method(_) => NodeKind::Method,
            Node::Statement(_) => NodeKind::Statement,
            Node::If(_) => NodeKind::If,
            Node::Loop(_) => NodeKind::Loop,
            Node::Try(_) => NodeKind::Try,
            Node::ResourceScope(_) => NodeKind::ResourceScope,
            Node::Switch(_) => NodeKind::Switch,
            Node::Case(_) => NodeKind::Case,
            Node::Unknown(_) => NodeKind::Unknown,
            Node::Magic(_) => NodeKind::Magic,
        }
    }

    /// Child bodies in rendering order. Empty for leaves and for methods without code.
    pub fn sections(&self) -> Vec<Section<'_>> {
        match self {
            Node::Type(ty) => vec![Section::new(None, &ty.members)],
            Node::Method(method) => match &method.body {
                Some(body) => vec![Section::new(None, body)],
                None => Vec::new(),
            },
            Node::If(node) => {
                let mut sections = vec![Section::new(None, &node.then_body)];
                if let Some(else_body) = &node.else_body {
                    sections.push(Section::new(Some("else"), else_body));
                }
                sections
            }
            Node::Loop(node) => vec![Section::new(None, &node.body)],
            Node::Try(node) => {
                let mut sections = vec![Section::new(None, &node.body)];
                sections.extend(
                    node.catches
                        .iter()
                        .map(|c| Section::new(Some(&c.label), &c.body)),
                );
                if let Some(finally) = &node.finally {
                    sections.push(Section::new(Some("finally"), finally));
                }
                sections
            }
            Node::ResourceScope(node) => vec![
                Section::new(None, &node.body),
                Section::new(Some("finally"), &node.cleanup),
            ],
            Node::Switch(node) => vec![Section::new(None, &node.cases)],
            Node::Case(node) => vec![Section::new(None, &node.body)],
            Node::Field(_) | Node::Statement(_) | Node::Unknown(_) | Node::Magic(_) => Vec::new(),
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Type(ty) => ty.fmt(f),
            Node::Field(field) => field.fmt(f),
            Node::Method(method) => method.fmt(f),
            Node::Statement(stmt) => stmt.fmt(f),
            Node::If(node) => write!(f, "if ({})", node.condition),
            Node::Loop(node) => match &node.kind {
                LoopKind::PreTest(condition) => write!(f, "while ({condition})"),
                LoopKind::PostTest(_) => f.write_str("do"),
                LoopKind::Infinite => f.write_str("while (true)"),
            },
            Node::Try(_) | Node::ResourceScope(_) => f.write_str("try"),
            Node::Switch(node) => write!(f, "switch ({})", node.selector),
            Node::Case(node) => {
                for (i, label) in node.labels.iter().enumerate() {
                    if i > 0 {
                        f.write_str("\n")?;
                    }
                    match label {
                        Some(value) => write!(f, "case {value}:")?,
                        None => f.write_str("default:")?,
                    }
                }
                Ok(())
            }
            Node::Unknown(node) => node.fmt(f),
            Node::Magic(node) => write!(f, "/* attribute {}: {} bytes */", node.name, node.data.len()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypeKind {
    Class,
    Interface,
    Enum,
    Annotation,
}

/// The root node: one decompiled class.
#[derive(Clone, Debug, PartialEq)]
pub struct TypeDeclaration {
    pub kind: TypeKind,
    pub modifiers: Vec<&'static str>,
    /// Internal name, e.g. `com/example/Foo$Bar`.
    pub name: String,
    /// Dotted package, absent for the default package and for nested types.
    pub package: Option<String>,
    pub super_class: Option<String>,
    pub interfaces: Vec<String>,
    pub source_file: Option<String>,
    /// Type parameters and generic supertypes, when the class has a Signature attribute.
    pub signature: Option<ClassSignature>,
    /// Fields, then methods, then nested types and attribute placeholders.
    pub members: Vec<Node>,
}

impl TypeDeclaration {
    pub fn simple_name(&self) -> &str {
        let simple = simple_class_name(&self.name);
        match simple.rfind('$') {
            Some(pos) => &simple[pos + 1..],
            None => simple,
        }
    }

    /// Number of field and method members.
    pub fn member_count(&self) -> usize {
        self.members
            .iter()
            .filter(|m| matches!(m, Node::Field(_) | Node::Method(_)))
            .count()
    }

    pub fn methods(&self) -> impl Iterator<Item = &MethodDeclaration> {
        self.members.iter().filter_map(|m| match m {
            Node::Method(method) => Some(method),
            _ => None,
        })
    }

    pub fn fields(&self) -> impl Iterator<Item = &FieldDeclaration> {
        self.members.iter().filter_map(|m| match m {
            Node::Field(field) => Some(field),
            _ => None,
        })
    }

    pub fn nested(&self) -> impl Iterator<Item = &TypeDeclaration> {
        self.members.iter().filter_map(|m| match m {
            Node::Type(ty) => Some(ty),
            _ => None,
        })
    }

    /// Errors met while decompiling the members, nested types included.
    pub fn diagnostics(&self) -> impl Iterator<Item = &DecompileError> {
        let mut all: Vec<&DecompileError> = self.fields().flat_map(|f| f.diagnostics.iter()).collect();
        all.extend(self.methods().flat_map(|m| m.diagnostics.iter()));
        for nested in self.nested() {
            all.extend(nested.diagnostics());
        }
        all.into_iter()
    }
}

impl fmt::Display for TypeDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(package) = &self.package {
            writeln!(f, "package {package};")?;
            writeln!(f)?;
        }
        for modifier in &self.modifiers {
            write!(f, "{modifier} ")?;
        }
        let keyword = match self.kind {
            TypeKind::Class => "class",
            TypeKind::Interface => "interface",
            TypeKind::Enum => "enum",
            TypeKind::Annotation => "@interface",
        };
        let type_params = self.signature.as_ref().map_or(&[][..], |s| &s.type_params[..]);
        write!(f, "{keyword} {}{}", self.simple_name(), type_parameter_list(type_params))?;

        // generic supertypes are paired with their erased names
        let (super_class, interfaces): (Option<(String, String)>, Vec<(String, String)>) = match &self.signature {
            Some(sig) => (
                Some((erased_name(&sig.super_class), sig.super_class.to_string())),
                sig.interfaces.iter().map(|i| (erased_name(i), i.to_string())).collect(),
            ),
            None => (
                self.super_class.as_ref().map(|s| (s.clone(), source_class_name(s))),
                self.interfaces.iter().map(|i| (i.clone(), source_class_name(i))).collect(),
            ),
        };
        if self.kind == TypeKind::Class {
            if let Some((_, super_class)) = super_class.filter(|(name, _)| name != "java/lang/Object") {
                write!(f, " extends {super_class}")?;
            }
        }
        let interfaces: Vec<String> = interfaces
            .into_iter()
            .filter(|(name, _)| !(self.kind == TypeKind::Annotation && name == "java/lang/annotation/Annotation"))
            .map(|(_, shown)| shown)
            .collect();
        if !interfaces.is_empty() {
            let keyword = match self.kind {
                TypeKind::Interface | TypeKind::Annotation => "extends",
                _ => "implements",
            };
            write!(f, " {keyword} {}", interfaces.join(", "))?;
        }
        Ok(())
    }
}

/// Internal name of a class type with its type arguments dropped.
fn erased_name(ty: &JvmType) -> String {
    match ty {
        JvmType::Reference(name) | JvmType::Parameterized { name, .. } => name.clone(),
        other => other.to_descriptor(),
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FieldDeclaration {
    pub modifiers: Vec<&'static str>,
    pub name: String,
    pub ty: JvmType,
    /// From the ConstantValue attribute.
    pub initializer: Option<Expr>,
    pub diagnostics: Vec<DecompileError>,
}

impl fmt::Display for FieldDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for modifier in &self.modifiers {
            write!(f, "{modifier} ")?;
        }
        write!(f, "{} {}", self.ty, self.name)?;
        if let Some(value) = &self.initializer {
            write!(f, " = {value}")?;
        }
        f.write_str(";")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MethodKind {
    Method,
    Constructor,
    StaticInitializer,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MethodDeclaration {
    pub kind: MethodKind,
    pub modifiers: Vec<&'static str>,
    pub name: String,
    /// Simple name of the declaring class, used for constructors.
    pub class_name: String,
    pub type_params: Vec<TypeParameter>,
    pub params: Vec<LocalVar>,
    pub ret: JvmType,
    pub throws: Vec<String>,
    pub varargs: bool,
    /// `None` for abstract and native methods.
    pub body: Option<Vec<Node>>,
    pub diagnostics: Vec<DecompileError>,
}

impl fmt::Display for MethodDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.kind == MethodKind::StaticInitializer {
            return f.write_str("static");
        }
        for modifier in &self.modifiers {
            write!(f, "{modifier} ")?;
        }
        if !self.type_params.is_empty() {
            write!(f, "{} ", type_parameter_list(&self.type_params))?;
        }
        match self.kind {
            MethodKind::Constructor => f.write_str(&self.class_name)?,
            _ => write!(f, "{} {}", self.ret, self.name)?,
        }
        f.write_str("(")?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            match (&param.ty, self.varargs && i + 1 == self.params.len()) {
                (JvmType::Array(element), true) => write!(f, "{element}... {}", param.name)?,
                (ty, _) => write!(f, "{ty} {}", param.name)?,
            }
        }
        f.write_str(")")?;
        if !self.throws.is_empty() {
            let names: Vec<String> = self.throws.iter().map(|t| source_class_name(t)).collect();
            write!(f, " throws {}", names.join(", "))?;
        }
        if self.body.is_none() {
            f.write_str(";")?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct IfNode {
    pub condition: Expr,
    pub then_body: Vec<Node>,
    pub else_body: Option<Vec<Node>>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum LoopKind {
    /// `while (cond) { .. }`
    PreTest(Expr),
    /// `do { .. } while (cond);`
    PostTest(Expr),
    Infinite,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LoopNode {
    pub kind: LoopKind,
    pub body: Vec<Node>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CatchClause {
    /// Internal name of the caught class.
    pub catch_type: String,
    pub var: String,
    /// Pre-rendered `catch (Type name)` line.
    pub label: String,
    pub body: Vec<Node>,
}

impl CatchClause {
    pub fn new(catch_type: String, var: String, body: Vec<Node>) -> Self {
        let label = format!("catch ({} {var})", source_class_name(&catch_type));
        CatchClause {
            catch_type,
            var,
            label,
            body,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TryNode {
    pub body: Vec<Node>,
    pub catches: Vec<CatchClause>,
    pub finally: Option<Vec<Node>>,
}

/// A try range whose catch-all handler repeats the code at the normal exit. The repeated
/// code is kept once, as `cleanup`.
#[derive(Clone, Debug, PartialEq)]
pub struct ResourceScopeNode {
    pub body: Vec<Node>,
    pub cleanup: Vec<Node>,
    pub deduplicated: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SwitchNode {
    pub selector: Expr,
    /// [`Node::Case`] children.
    pub cases: Vec<Node>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CaseNode {
    /// `None` is the default label.
    pub labels: Vec<Option<i32>>,
    pub body: Vec<Node>,
}

/// Instructions that could not be placed in a structured construct.
#[derive(Clone, Debug, PartialEq)]
pub struct UnknownNode {
    pub reason: String,
    pub instructions: Vec<Instruction>,
    /// Bytes after the last decodable instruction.
    pub undecoded: Vec<u8>,
}

impl fmt::Display for UnknownNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/* unknown: {} */", self.reason)?;
        for insn in &self.instructions {
            write!(f, "\n// {insn}")?;
        }
        if !self.undecoded.is_empty() {
            let hex: Vec<String> = self.undecoded.iter().map(|b| format!("{b:02x}")).collect();
            write!(f, "\n// undecoded: {}", hex.join(" "))?;
        }
        Ok(())
    }
}

/// An attribute the decompiler does not interpret.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MagicNode {
    pub name: String,
    pub data: Vec<u8>,
}
