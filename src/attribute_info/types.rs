use binrw::io::Cursor;
use binrw::{binread, BinRead, BinResult};

/// A raw attribute as it appears in the class file. The payload is kept as bytes and
/// only interpreted on demand via [`AttributeInfo::interpret`].
#[derive(Clone, Debug, PartialEq, Eq)]
#[binread]
#[br(big)]
pub struct AttributeInfo {
    pub attribute_name_index: u16,
    pub attribute_length: u32,
    #[br(count = attribute_length)]
    pub info: Vec<u8>,
}

impl AttributeInfo {
    pub fn interpret<T>(&self) -> BinResult<T>
    where
        T: for<'a> BinRead<Args<'a> = ()>,
    {
        let mut cursor = Cursor::new(&self.info);
        T::read_be(&mut cursor)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[binread]
#[br(big)]
pub struct ExceptionEntry {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    pub catch_type: u16,
}

impl ExceptionEntry {
    pub fn is_catch_all(&self) -> bool {
        self.catch_type == 0
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[binread]
#[br(big)]
pub struct CodeAttribute {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code_length: u32,
    #[br(count = code_length)]
    pub code: Vec<u8>,
    pub exception_table_length: u16,
    #[br(count = exception_table_length)]
    pub exception_table: Vec<ExceptionEntry>,
    pub attributes_count: u16,
    #[br(count = attributes_count)]
    pub attributes: Vec<AttributeInfo>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[binread]
#[br(big)]
pub struct LocalVariableTableAttribute {
    pub local_variable_table_length: u16,
    #[br(count = local_variable_table_length)]
    pub items: Vec<LocalVariableTableItem>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[binread]
#[br(big)]
pub struct LocalVariableTableItem {
    pub start_pc: u16,
    pub length: u16,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub index: u16,
}

/// Generic types of the locals whose types use type variables or arguments.
#[derive(Clone, Debug, PartialEq, Eq)]
#[binread]
#[br(big)]
pub struct LocalVariableTypeTableAttribute {
    pub local_variable_type_table_length: u16,
    #[br(count = local_variable_type_table_length)]
    pub items: Vec<LocalVariableTypeTableItem>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[binread]
#[br(big)]
pub struct LocalVariableTypeTableItem {
    pub start_pc: u16,
    pub length: u16,
    pub name_index: u16,
    pub signature_index: u16,
    pub index: u16,
}

/// Generic signature of a class, field or method.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[binread]
#[br(big)]
pub struct SignatureAttribute {
    pub signature_index: u16,
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[binread]
#[br(big)]
pub struct MethodParametersAttribute {
    pub parameters_count: u8,
    #[br(count = parameters_count)]
    pub parameters: Vec<ParameterAttribute>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[binread]
#[br(big)]
pub struct ParameterAttribute {
    pub name_index: u16,
    pub access_flags: u16,
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[binread]
#[br(big)]
pub struct ExceptionsAttribute {
    pub exception_table_length: u16,
    #[br(count = exception_table_length)]
    pub exception_table: Vec<u16>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[binread]
#[br(big)]
pub struct ConstantValueAttribute {
    pub constant_value_index: u16,
}

/// The SourceFile attribute is an optional fixed-length attribute in the attributes table of a ClassFile structure.
///
/// There may be at most one SourceFile attribute in the attributes table of a ClassFile structure.
/// [see more](https://docs.oracle.com/javase/specs/jvms/se8/html/jvms-4.html#jvms-4.7.10)
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[binread]
#[br(big)]
pub struct SourceFileAttribute {
    /// Must be a valid index of a CONSTANT_Utf8_info entry.
    pub sourcefile_index: u16,
}
