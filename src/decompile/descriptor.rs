//! Field and method descriptor parsing.
//!
//! Descriptors carry erased types only. Generic types come from `Signature` attributes,
//! see [`super::signature`].

use std::fmt;

/// A JVM type as written in a descriptor.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum JvmType {
    Int,
    Long,
    Float,
    Double,
    Byte,
    Char,
    Short,
    Boolean,
    Void,
    /// Internal (slash separated) class name.
    Reference(String),
    /// A class type with type arguments, e.g. `List<String>`.
    Parameterized { name: String, args: Vec<TypeArg> },
    /// A type variable such as `T`.
    TypeVariable(String),
    Array(Box<JvmType>),
    Unknown,
}

/// One argument of a [`JvmType::Parameterized`] type.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeArg {
    /// `?`
    Any,
    Exact(JvmType),
    /// `? extends T`
    Extends(JvmType),
    /// `? super T`
    Super(JvmType),
}

impl fmt::Display for TypeArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeArg::Any => f.write_str("?"),
            TypeArg::Exact(ty) => ty.fmt(f),
            TypeArg::Extends(ty) => write!(f, "? extends {ty}"),
            TypeArg::Super(ty) => write!(f, "? super {ty}"),
        }
    }
}

impl JvmType {
    /// Long and double take two local slots and two stack words.
    pub fn is_wide(&self) -> bool {
        matches!(self, JvmType::Long | JvmType::Double)
    }

    pub fn slot_size(&self) -> u16 {
        if self.is_wide() {
            2
        } else {
            1
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            JvmType::Reference(_) | JvmType::Parameterized { .. } | JvmType::TypeVariable(_) | JvmType::Array(_)
        )
    }

    pub fn to_descriptor(&self) -> String {
        match self {
            JvmType::Int => "I".into(),
            JvmType::Long => "J".into(),
            JvmType::Float => "F".into(),
            JvmType::Double => "D".into(),
            JvmType::Byte => "B".into(),
            JvmType::Char => "C".into(),
            JvmType::Short => "S".into(),
            JvmType::Boolean => "Z".into(),
            JvmType::Void => "V".into(),
            JvmType::Reference(name) | JvmType::Parameterized { name, .. } => format!("L{name};"),
            JvmType::Array(inner) => format!("[{}", inner.to_descriptor()),
            // type variables erase to their bound, which the descriptor does not know
            JvmType::TypeVariable(_) | JvmType::Unknown => "Ljava/lang/Object;".into(),
        }
    }
}

/// Renders the way the type is spelled in Java source, using simple class names.
impl fmt::Display for JvmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JvmType::Int => f.write_str("int"),
            JvmType::Long => f.write_str("long"),
            JvmType::Float => f.write_str("float"),
            JvmType::Double => f.write_str("double"),
            JvmType::Byte => f.write_str("byte"),
            JvmType::Char => f.write_str("char"),
            JvmType::Short => f.write_str("short"),
            JvmType::Boolean => f.write_str("boolean"),
            JvmType::Void => f.write_str("void"),
            JvmType::Reference(name) => f.write_str(&source_class_name(name)),
            JvmType::Parameterized { name, args } => {
                write!(f, "{}<", source_class_name(name))?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    arg.fmt(f)?;
                }
                f.write_str(">")
            }
            JvmType::TypeVariable(name) => f.write_str(name),
            JvmType::Array(inner) => write!(f, "{inner}[]"),
            JvmType::Unknown => f.write_str("Object"),
        }
    }
}

/// Parses a single type starting at byte `pos`. Returns the type and the position after it.
pub fn parse_type_at(desc: &str, pos: usize) -> Option<(JvmType, usize)> {
    let bytes = desc.as_bytes();
    let ty = match *bytes.get(pos)? {
        b'B' => JvmType::Byte,
        b'C' => JvmType::Char,
        b'D' => JvmType::Double,
        b'F' => JvmType::Float,
        b'I' => JvmType::Int,
        b'J' => JvmType::Long,
        b'S' => JvmType::Short,
        b'Z' => JvmType::Boolean,
        b'V' => JvmType::Void,
        b'L' => {
            let semi = desc[pos + 1..].find(';')?;
            let class_name = &desc[pos + 1..pos + 1 + semi];
            return Some((JvmType::Reference(class_name.to_string()), pos + semi + 2));
        }
        b'[' => {
            let (inner, next) = parse_type_at(desc, pos + 1)?;
            return Some((JvmType::Array(Box::new(inner)), next));
        }
        _ => return None,
    };
    Some((ty, pos + 1))
}

/// Parses a complete field descriptor. Trailing characters make it invalid.
pub fn parse_type_descriptor(desc: &str) -> Option<JvmType> {
    match parse_type_at(desc, 0)? {
        (ty, end) if end == desc.len() => Some(ty),
        _ => None,
    }
}

/// A parsed method descriptor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub params: Vec<JvmType>,
    pub ret: JvmType,
}

impl MethodDescriptor {
    /// Number of local slots the parameters occupy, not counting `this`.
    pub fn param_slots(&self) -> u16 {
        self.params.iter().map(JvmType::slot_size).sum()
    }
}

/// Parses e.g. `"(ILjava/lang/String;)V"`.
pub fn parse_method_descriptor(desc: &str) -> Option<MethodDescriptor> {
    if !desc.starts_with('(') {
        return None;
    }
    let close = desc.find(')')?;
    let mut params = Vec::new();
    let mut pos = 1;
    while pos < close {
        let (ty, next) = parse_type_at(desc, pos)?;
        params.push(ty);
        pos = next;
    }
    let (ret, end) = parse_type_at(desc, close + 1)?;
    if end != desc.len() {
        return None;
    }
    Some(MethodDescriptor { params, ret })
}

/// Type named by a `CONSTANT_Class` operand. Array classes use descriptor syntax there.
pub fn class_operand_type(name: &str) -> JvmType {
    if name.starts_with('[') {
        parse_type_descriptor(name).unwrap_or(JvmType::Unknown)
    } else {
        JvmType::Reference(name.to_string())
    }
}

/// `java/util/Map$Entry` -> `Map.Entry`
pub fn source_class_name(internal: &str) -> String {
    simple_class_name(internal).replace('$', ".")
}

/// `java/lang/String` -> `java.lang.String`
pub fn internal_to_source_name(name: &str) -> String {
    name.replace('/', ".")
}

pub fn simple_class_name(name: &str) -> &str {
    match name.rfind('/') {
        Some(pos) => &name[pos + 1..],
        None => name,
    }
}

pub fn package_name(name: &str) -> Option<&str> {
    name.rfind('/').map(|pos| &name[..pos])
}

/// Element type of a `newarray` instruction.
pub fn newarray_type(atype: u8) -> JvmType {
    match atype {
        4 => JvmType::Boolean,
        5 => JvmType::Char,
        6 => JvmType::Float,
        7 => JvmType::Double,
        8 => JvmType::Byte,
        9 => JvmType::Short,
        10 => JvmType::Int,
        11 => JvmType::Long,
        _ => JvmType::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_primitives() {
        assert_eq!(parse_type_descriptor("I"), Some(JvmType::Int));
        assert_eq!(parse_type_descriptor("J"), Some(JvmType::Long));
        assert_eq!(parse_type_descriptor("Z"), Some(JvmType::Boolean));
        assert_eq!(parse_type_descriptor("II"), None);
        assert_eq!(parse_type_descriptor("Q"), None);
    }

    #[test]
    fn test_parse_reference_and_array() {
        assert_eq!(
            parse_type_descriptor("Ljava/lang/String;"),
            Some(JvmType::Reference("java/lang/String".into()))
        );
        let nested = parse_type_descriptor("[[Ljava/lang/Object;").unwrap();
        assert_eq!(nested.to_string(), "Object[][]");
        assert_eq!(nested.to_descriptor(), "[[Ljava/lang/Object;");
    }

    #[test]
    fn test_parse_method_descriptor() {
        let desc = parse_method_descriptor("(IJLjava/lang/String;)[B").unwrap();
        assert_eq!(desc.params.len(), 3);
        assert_eq!(desc.param_slots(), 4);
        assert_eq!(desc.ret, JvmType::Array(Box::new(JvmType::Byte)));

        let desc = parse_method_descriptor("()V").unwrap();
        assert!(desc.params.is_empty());
        assert_eq!(desc.ret, JvmType::Void);

        assert_eq!(parse_method_descriptor("(I"), None);
        assert_eq!(parse_method_descriptor("()VV"), None);
    }

    #[test]
    fn test_names() {
        assert_eq!(internal_to_source_name("java/lang/String"), "java.lang.String");
        assert_eq!(source_class_name("java/util/Map$Entry"), "Map.Entry");
        assert_eq!(package_name("java/lang/String"), Some("java/lang"));
        assert_eq!(package_name("NoPackage"), None);
        assert_eq!(class_operand_type("[I"), JvmType::Array(Box::new(JvmType::Int)));
    }
}
