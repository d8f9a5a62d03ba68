//! Read-only, index-based view over a parsed class file.

use crate::attribute_info::{AttributeInfo, CodeAttribute, SignatureAttribute};
use crate::constant_info::ConstantInfo;
use crate::error::{DecompileError, Result};
use crate::field_info::FieldInfo;
use crate::method_info::MethodInfo;
use crate::types::ClassFile;

use binrw::BinRead;

/// A field or method reference resolved out of the constant pool.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MemberRef {
    pub owner: String,
    pub name: String,
    pub descriptor: String,
}

/// A loadable constant (`ldc`, `ConstantValue`).
#[derive(Clone, Debug, PartialEq)]
pub enum Constant {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Class(String),
    MethodType(String),
    MethodHandle { kind: u8, member: MemberRef },
    Dynamic { name: String, descriptor: String },
}

pub struct MetadataTable {
    class: ClassFile,
}

impl MetadataTable {
    pub fn new(class: ClassFile) -> Self {
        MetadataTable { class }
    }

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        Ok(Self::new(ClassFile::parse(bytes)?))
    }

    pub fn class_file(&self) -> &ClassFile {
        &self.class
    }

    /// Constant pool lookup. Indices are 1-based, as in the class file.
    pub fn entry(&self, index: u16) -> Result<&ConstantInfo> {
        if index == 0 {
            return Err(DecompileError::ConstantPool { index });
        }
        self.class
            .const_pool
            .get(index as usize - 1)
            .ok_or(DecompileError::ConstantPool { index })
    }

    pub fn utf8(&self, index: u16) -> Result<&str> {
        match self.entry(index)? {
            ConstantInfo::Utf8(utf8) => Ok(&utf8.utf8_string),
            other => Err(mismatch(index, "Utf8", other)),
        }
    }

    /// Internal (slash separated) name of a `CONSTANT_Class` entry.
    pub fn class_name(&self, index: u16) -> Result<&str> {
        match self.entry(index)? {
            ConstantInfo::Class(class) => self.utf8(class.name_index),
            other => Err(mismatch(index, "Class", other)),
        }
    }

    pub fn name_and_type(&self, index: u16) -> Result<(&str, &str)> {
        match self.entry(index)? {
            ConstantInfo::NameAndType(nat) => {
                Ok((self.utf8(nat.name_index)?, self.utf8(nat.descriptor_index)?))
            }
            _ => Err(DecompileError::ConstantPool { index }),
        }
    }

    pub fn member_ref(&self, index: u16) -> Result<MemberRef> {
        let (class_index, nat_index) = match self.entry(index)? {
            ConstantInfo::FieldRef(r) => (r.class_index, r.name_and_type_index),
            ConstantInfo::MethodRef(r) => (r.class_index, r.name_and_type_index),
            ConstantInfo::InterfaceMethodRef(r) => (r.class_index, r.name_and_type_index),
            other => return Err(mismatch(index, "member reference", other)),
        };
        let (name, descriptor) = self.name_and_type(nat_index)?;
        Ok(MemberRef {
            owner: self.class_name(class_index)?.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
        })
    }

    pub fn constant(&self, index: u16) -> Result<Constant> {
        Ok(match self.entry(index)? {
            ConstantInfo::Integer(c) => Constant::Int(c.value),
            ConstantInfo::Long(c) => Constant::Long(c.value),
            ConstantInfo::Float(c) => Constant::Float(c.value),
            ConstantInfo::Double(c) => Constant::Double(c.value),
            ConstantInfo::String(c) => Constant::String(self.utf8(c.string_index)?.to_string()),
            ConstantInfo::Class(c) => Constant::Class(self.utf8(c.name_index)?.to_string()),
            ConstantInfo::MethodType(c) => {
                Constant::MethodType(self.utf8(c.descriptor_index)?.to_string())
            }
            ConstantInfo::MethodHandle(c) => Constant::MethodHandle {
                kind: c.reference_kind,
                member: self.member_ref(c.reference_index)?,
            },
            ConstantInfo::Dynamic(c) => {
                let (name, descriptor) = self.name_and_type(c.name_and_type_index)?;
                Constant::Dynamic {
                    name: name.to_string(),
                    descriptor: descriptor.to_string(),
                }
            }
            _ => return Err(DecompileError::ConstantPool { index }),
        })
    }

    /// Name and descriptor of an `invokedynamic` call site.
    pub fn invoke_dynamic(&self, index: u16) -> Result<(String, String)> {
        match self.entry(index)? {
            ConstantInfo::InvokeDynamic(c) => {
                let (name, descriptor) = self.name_and_type(c.name_and_type_index)?;
                Ok((name.to_string(), descriptor.to_string()))
            }
            _ => Err(DecompileError::ConstantPool { index }),
        }
    }

    pub fn this_class(&self) -> Result<&str> {
        self.class_name(self.class.this_class)
    }

    /// `None` only for `java/lang/Object` and module-info.
    pub fn super_class(&self) -> Result<Option<&str>> {
        match self.class.super_class {
            0 => Ok(None),
            index => self.class_name(index).map(Some),
        }
    }

    pub fn interfaces(&self) -> Result<Vec<&str>> {
        self.class
            .interfaces
            .iter()
            .map(|&index| self.class_name(index))
            .collect()
    }

    pub fn fields(&self) -> &[FieldInfo] {
        &self.class.fields
    }

    pub fn methods(&self) -> &[MethodInfo] {
        &self.class.methods
    }

    /// Declared fields plus declared methods.
    pub fn member_count(&self) -> usize {
        self.class.fields.len() + self.class.methods.len()
    }

    pub fn attributes(&self) -> &[AttributeInfo] {
        &self.class.attributes
    }

    pub fn attribute_name(&self, attribute: &AttributeInfo) -> Result<&str> {
        self.utf8(attribute.attribute_name_index)
    }

    pub fn find_attribute<'a>(
        &self,
        attributes: &'a [AttributeInfo],
        name: &str,
    ) -> Option<&'a AttributeInfo> {
        attributes
            .iter()
            .find(|attr| self.attribute_name(attr).map(|n| n == name).unwrap_or(false))
    }

    /// Reads an attribute's payload as `T`, if the attribute is present.
    pub fn interpret_attribute<T>(&self, attributes: &[AttributeInfo], name: &str) -> Option<Result<T>>
    where
        T: for<'a> BinRead<Args<'a> = ()>,
    {
        self.find_attribute(attributes, name)
            .map(|attr| attr.interpret::<T>().map_err(DecompileError::from))
    }

    pub fn code_attribute(&self, method: &MethodInfo) -> Option<Result<CodeAttribute>> {
        self.interpret_attribute(&method.attributes, "Code")
    }

    /// The generic signature string from a `Signature` attribute in `attributes`.
    pub fn signature(&self, attributes: &[AttributeInfo]) -> Option<&str> {
        let resolved = self
            .interpret_attribute::<SignatureAttribute>(attributes, "Signature")?
            .and_then(|attr| self.utf8(attr.signature_index));
        match resolved {
            Ok(signature) => Some(signature),
            Err(err) => {
                log::debug!("skipping Signature attribute: {err}");
                None
            }
        }
    }
}

fn mismatch(index: u16, expected: &str, found: &ConstantInfo) -> DecompileError {
    log::debug!("constant #{index}: expected {expected}, found {}", found.tag_name());
    DecompileError::ConstantPool { index }
}
