//! Generic signatures, as stored in `Signature` and `LocalVariableTypeTable` attributes.
//!
//! A signature refines the erased descriptor of the same member with type arguments and
//! type variables. Parsing never fails loudly: a signature that does not parse is
//! ignored and the descriptor types stay in place.

use std::fmt;

use super::descriptor::{parse_type_at, JvmType, TypeArg};

/// A declared type parameter, e.g. `T extends Comparable<T>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeParameter {
    pub name: String,
    pub bounds: Vec<JvmType>,
}

impl fmt::Display for TypeParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        let bounds: Vec<String> = self
            .bounds
            .iter()
            .filter(|b| !matches!(b, JvmType::Reference(name) if name == "java/lang/Object"))
            .map(JvmType::to_string)
            .collect();
        if !bounds.is_empty() {
            write!(f, " extends {}", bounds.join(" & "))?;
        }
        Ok(())
    }
}

/// `<T, U extends Number>`, or nothing when there are no parameters.
pub fn type_parameter_list(params: &[TypeParameter]) -> String {
    if params.is_empty() {
        return String::new();
    }
    let params: Vec<String> = params.iter().map(TypeParameter::to_string).collect();
    format!("<{}>", params.join(", "))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassSignature {
    pub type_params: Vec<TypeParameter>,
    pub super_class: JvmType,
    pub interfaces: Vec<JvmType>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodSignature {
    pub type_params: Vec<TypeParameter>,
    pub params: Vec<JvmType>,
    pub ret: JvmType,
    pub throws: Vec<JvmType>,
}

/// Parses a field or local variable signature such as `Ljava/util/List<TT;>;`.
pub fn parse_field_signature(sig: &str) -> Option<JvmType> {
    let mut reader = SignatureReader::new(sig);
    let ty = reader.reference_type()?;
    reader.at_end().then_some(ty)
}

/// Parses e.g. `<T:Ljava/lang/Object;>(TT;)Ljava/util/List<TT;>;`.
pub fn parse_method_signature(sig: &str) -> Option<MethodSignature> {
    let mut reader = SignatureReader::new(sig);
    let type_params = reader.type_parameters()?;
    reader.expect(b'(')?;
    let mut params = Vec::new();
    while !reader.eat(b')') {
        params.push(reader.java_type()?);
    }
    let ret = reader.java_type()?;
    let mut throws = Vec::new();
    while reader.eat(b'^') {
        throws.push(reader.reference_type()?);
    }
    reader.at_end().then_some(MethodSignature {
        type_params,
        params,
        ret,
        throws,
    })
}

/// Parses e.g. `<E:Ljava/lang/Object;>Ljava/util/AbstractList<TE;>;Ljava/util/List<TE;>;`.
pub fn parse_class_signature(sig: &str) -> Option<ClassSignature> {
    let mut reader = SignatureReader::new(sig);
    let type_params = reader.type_parameters()?;
    let super_class = reader.class_type()?;
    let mut interfaces = Vec::new();
    while !reader.at_end() {
        interfaces.push(reader.class_type()?);
    }
    Some(ClassSignature {
        type_params,
        super_class,
        interfaces,
    })
}

struct SignatureReader<'a> {
    sig: &'a str,
    pos: usize,
}

impl<'a> SignatureReader<'a> {
    fn new(sig: &'a str) -> Self {
        SignatureReader { sig, pos: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.sig.as_bytes().get(self.pos).copied()
    }

    fn at_end(&self) -> bool {
        self.pos == self.sig.len()
    }

    fn eat(&mut self, byte: u8) -> bool {
        let found = self.peek() == Some(byte);
        if found {
            self.pos += 1;
        }
        found
    }

    fn expect(&mut self, byte: u8) -> Option<()> {
        self.eat(byte).then_some(())
    }

    /// Reads up to the next byte in `stops`. Empty identifiers are rejected.
    fn identifier(&mut self, stops: &[u8]) -> Option<&'a str> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if stops.contains(&b) {
                break;
            }
            self.pos += 1;
        }
        (self.pos > start).then(|| &self.sig[start..self.pos])
    }

    fn type_parameters(&mut self) -> Option<Vec<TypeParameter>> {
        let mut params = Vec::new();
        if !self.eat(b'<') {
            return Some(params);
        }
        while !self.eat(b'>') {
            let name = self.identifier(b":>")?.to_string();
            self.expect(b':')?;
            let mut bounds = Vec::new();
            // the class bound may be empty when only interface bounds follow
            if matches!(self.peek(), Some(b'L' | b'T' | b'[')) {
                bounds.push(self.reference_type()?);
            }
            while self.eat(b':') {
                bounds.push(self.reference_type()?);
            }
            params.push(TypeParameter { name, bounds });
        }
        Some(params)
    }

    /// Any type, primitives and `V` included.
    fn java_type(&mut self) -> Option<JvmType> {
        match self.peek()? {
            b'L' | b'T' | b'[' => self.reference_type(),
            _ => {
                let (ty, next) = parse_type_at(self.sig, self.pos)?;
                self.pos = next;
                Some(ty)
            }
        }
    }

    fn reference_type(&mut self) -> Option<JvmType> {
        match self.peek()? {
            b'L' => self.class_type(),
            b'T' => {
                self.pos += 1;
                let name = self.identifier(b";")?.to_string();
                self.expect(b';')?;
                Some(JvmType::TypeVariable(name))
            }
            b'[' => {
                self.pos += 1;
                Some(JvmType::Array(Box::new(self.java_type()?)))
            }
            _ => None,
        }
    }

    /// `Lpkg/Outer<..>.Inner<..>;`. Arguments of outer classes are dropped.
    fn class_type(&mut self) -> Option<JvmType> {
        self.expect(b'L')?;
        let mut name = self.identifier(b"<.;")?.to_string();
        let mut args = self.type_arguments()?;
        while self.eat(b'.') {
            name.push('$');
            name.push_str(self.identifier(b"<.;")?);
            args = self.type_arguments()?;
        }
        self.expect(b';')?;
        Some(if args.is_empty() {
            JvmType::Reference(name)
        } else {
            JvmType::Parameterized { name, args }
        })
    }

    fn type_arguments(&mut self) -> Option<Vec<TypeArg>> {
        let mut args = Vec::new();
        if !self.eat(b'<') {
            return Some(args);
        }
        while !self.eat(b'>') {
            let arg = match self.peek()? {
                b'*' => {
                    self.pos += 1;
                    TypeArg::Any
                }
                b'+' => {
                    self.pos += 1;
                    TypeArg::Extends(self.reference_type()?)
                }
                b'-' => {
                    self.pos += 1;
                    TypeArg::Super(self.reference_type()?)
                }
                _ => TypeArg::Exact(self.reference_type()?),
            };
            args.push(arg);
        }
        Some(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_signature() {
        let ty = parse_field_signature("Ljava/util/Map<Ljava/lang/String;Ljava/util/List<+Ljava/lang/Number;>;>;")
            .unwrap();
        assert_eq!(ty.to_string(), "Map<String, List<? extends Number>>");
        assert_eq!(ty.to_descriptor(), "Ljava/util/Map;");
        assert!(ty.is_reference());

        assert_eq!(parse_field_signature("TT;"), Some(JvmType::TypeVariable("T".into())));
        assert_eq!(parse_field_signature("[TE;").unwrap().to_string(), "E[]");
        assert_eq!(
            parse_field_signature("Ljava/util/List<*>;").unwrap().to_string(),
            "List<?>"
        );
        assert_eq!(
            parse_field_signature("Ljava/util/Comparator<-TT;>;").unwrap().to_string(),
            "Comparator<? super T>"
        );
    }

    #[test]
    fn test_inner_class_signature() {
        let ty = parse_field_signature("Ljava/util/Map<TK;TV;>.Entry<TK;TV;>;").unwrap();
        assert_eq!(ty.to_string(), "Map.Entry<K, V>");
    }

    #[test]
    fn test_method_signature() {
        let sig = parse_method_signature(
            "<T::Ljava/lang/Comparable<-TT;>;>(Ljava/util/List<TT;>;I)TT;^Ljava/io/IOException;",
        )
        .unwrap();
        assert_eq!(type_parameter_list(&sig.type_params), "<T extends Comparable<? super T>>");
        assert_eq!(sig.params.len(), 2);
        assert_eq!(sig.params[0].to_string(), "List<T>");
        assert_eq!(sig.params[1], JvmType::Int);
        assert_eq!(sig.ret, JvmType::TypeVariable("T".into()));
        assert_eq!(sig.throws, vec![JvmType::Reference("java/io/IOException".into())]);

        let plain = parse_method_signature("()V").unwrap();
        assert!(plain.type_params.is_empty());
        assert_eq!(plain.ret, JvmType::Void);
    }

    #[test]
    fn test_class_signature() {
        let sig = parse_class_signature(
            "<K:Ljava/lang/Object;V:Ljava/lang/Object;>Ljava/util/AbstractMap<TK;TV;>;Ljava/lang/Cloneable;",
        )
        .unwrap();
        assert_eq!(type_parameter_list(&sig.type_params), "<K, V>");
        assert_eq!(sig.super_class.to_string(), "AbstractMap<K, V>");
        assert_eq!(sig.interfaces, vec![JvmType::Reference("java/lang/Cloneable".into())]);
    }

    #[test]
    fn test_malformed_signatures() {
        assert_eq!(parse_field_signature("Ljava/util/List<TT;"), None);
        assert_eq!(parse_field_signature("TT;extra"), None);
        assert_eq!(parse_field_signature("I"), None);
        assert_eq!(parse_method_signature("(TT;"), None);
        assert_eq!(parse_method_signature("<T>()V"), None);
        assert_eq!(parse_class_signature(""), None);
    }
}
