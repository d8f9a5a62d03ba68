use binrw::io::{Read, Seek};
use binrw::{binread, BinRead, BinResult, Endian};

#[derive(Clone, Debug, PartialEq)]
pub enum ConstantInfo {
    Utf8(Utf8Constant),
    Integer(IntegerConstant),
    Float(FloatConstant),
    Long(LongConstant),
    Double(DoubleConstant),
    Class(ClassConstant),
    String(StringConstant),
    FieldRef(FieldRefConstant),
    MethodRef(MethodRefConstant),
    InterfaceMethodRef(InterfaceMethodRefConstant),
    NameAndType(NameAndTypeConstant),
    MethodHandle(MethodHandleConstant),
    MethodType(MethodTypeConstant),
    Dynamic(DynamicConstant),
    InvokeDynamic(InvokeDynamicConstant),
    Module(ModuleConstant),
    Package(PackageConstant),
    /// Second slot of a long or double entry.
    Unusable,
}

impl ConstantInfo {
    pub fn tag_name(&self) -> &'static str {
        match self {
            ConstantInfo::Utf8(_) => "Utf8",
            ConstantInfo::Integer(_) => "Integer",
            ConstantInfo::Float(_) => "Float",
            ConstantInfo::Long(_) => "Long",
            ConstantInfo::Double(_) => "Double",
            ConstantInfo::Class(_) => "Class",
            ConstantInfo::String(_) => "String",
            ConstantInfo::FieldRef(_) => "Fieldref",
            ConstantInfo::MethodRef(_) => "Methodref",
            ConstantInfo::InterfaceMethodRef(_) => "InterfaceMethodref",
            ConstantInfo::NameAndType(_) => "NameAndType",
            ConstantInfo::MethodHandle(_) => "MethodHandle",
            ConstantInfo::MethodType(_) => "MethodType",
            ConstantInfo::Dynamic(_) => "Dynamic",
            ConstantInfo::InvokeDynamic(_) => "InvokeDynamic",
            ConstantInfo::Module(_) => "Module",
            ConstantInfo::Package(_) => "Package",
            ConstantInfo::Unusable => "Unusable",
        }
    }

    /// Long and double entries take up two constant pool slots.
    pub fn is_wide(&self) -> bool {
        matches!(self, ConstantInfo::Long(_) | ConstantInfo::Double(_))
    }
}

impl BinRead for ConstantInfo {
    type Args<'a> = ();

    fn read_options<R: Read + Seek>(
        reader: &mut R,
        endian: Endian,
        _args: Self::Args<'_>,
    ) -> BinResult<Self> {
        let pos = reader.stream_position()?;
        let tag = u8::read_options(reader, endian, ())?;
        let constant = match tag {
            1 => ConstantInfo::Utf8(Utf8Constant::read_options(reader, endian, ())?),
            3 => ConstantInfo::Integer(IntegerConstant::read_options(reader, endian, ())?),
            4 => ConstantInfo::Float(FloatConstant::read_options(reader, endian, ())?),
            5 => ConstantInfo::Long(LongConstant::read_options(reader, endian, ())?),
            6 => ConstantInfo::Double(DoubleConstant::read_options(reader, endian, ())?),
            7 => ConstantInfo::Class(ClassConstant::read_options(reader, endian, ())?),
            8 => ConstantInfo::String(StringConstant::read_options(reader, endian, ())?),
            9 => ConstantInfo::FieldRef(FieldRefConstant::read_options(reader, endian, ())?),
            10 => ConstantInfo::MethodRef(MethodRefConstant::read_options(reader, endian, ())?),
            11 => ConstantInfo::InterfaceMethodRef(InterfaceMethodRefConstant::read_options(
                reader,
                endian,
                (),
            )?),
            12 => ConstantInfo::NameAndType(NameAndTypeConstant::read_options(reader, endian, ())?),
            15 => ConstantInfo::MethodHandle(MethodHandleConstant::read_options(reader, endian, ())?),
            16 => ConstantInfo::MethodType(MethodTypeConstant::read_options(reader, endian, ())?),
            17 => ConstantInfo::Dynamic(DynamicConstant::read_options(reader, endian, ())?),
            18 => ConstantInfo::InvokeDynamic(InvokeDynamicConstant::read_options(reader, endian, ())?),
            19 => ConstantInfo::Module(ModuleConstant::read_options(reader, endian, ())?),
            20 => ConstantInfo::Package(PackageConstant::read_options(reader, endian, ())?),
            other => {
                return Err(binrw::Error::AssertFail {
                    pos,
                    message: format!("unknown constant pool tag {other}"),
                })
            }
        };
        Ok(constant)
    }
}

/// Reads `count - 1` logical entries, padding after every long/double so that
/// `pool[index - 1]` always lines up with a constant pool index.
#[binrw::parser(reader, endian)]
pub fn constant_pool_parser(count: u16) -> BinResult<Vec<ConstantInfo>> {
    let mut pool = Vec::with_capacity(count as usize);
    let mut index = 1u16;
    while index < count {
        let entry = ConstantInfo::read_options(reader, endian, ())?;
        let wide = entry.is_wide();
        pool.push(entry);
        index += 1;
        if wide {
            pool.push(ConstantInfo::Unusable);
            index += 1;
        }
    }
    Ok(pool)
}

#[binread]
#[derive(Clone, Debug, PartialEq, Eq)]
#[br(big)]
pub struct Utf8Constant {
    #[br(temp)]
    length: u16,
    #[br(count = length, map = |bytes: Vec<u8>| decode_modified_utf8(&bytes))]
    pub utf8_string: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[binread]
#[br(big)]
pub struct IntegerConstant {
    pub value: i32,
}

#[derive(Clone, Debug, PartialEq)]
#[binread]
#[br(big)]
pub struct FloatConstant {
    pub value: f32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[binread]
#[br(big)]
pub struct LongConstant {
    pub value: i64,
}

#[derive(Clone, Debug, PartialEq)]
#[binread]
#[br(big)]
pub struct DoubleConstant {
    pub value: f64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[binread]
#[br(big)]
pub struct ClassConstant {
    pub name_index: u16,
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[binread]
#[br(big)]
pub struct StringConstant {
    pub string_index: u16,
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[binread]
#[br(big)]
pub struct FieldRefConstant {
    pub class_index: u16,
    pub name_and_type_index: u16,
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[binread]
#[br(big)]
pub struct MethodRefConstant {
    pub class_index: u16,
    pub name_and_type_index: u16,
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[binread]
#[br(big)]
pub struct InterfaceMethodRefConstant {
    pub class_index: u16,
    pub name_and_type_index: u16,
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[binread]
#[br(big)]
pub struct NameAndTypeConstant {
    pub name_index: u16,
    pub descriptor_index: u16,
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[binread]
#[br(big)]
pub struct MethodHandleConstant {
    pub reference_kind: u8,
    pub reference_index: u16,
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[binread]
#[br(big)]
pub struct MethodTypeConstant {
    pub descriptor_index: u16,
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[binread]
#[br(big)]
pub struct DynamicConstant {
    pub bootstrap_method_attr_index: u16,
    pub name_and_type_index: u16,
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[binread]
#[br(big)]
pub struct InvokeDynamicConstant {
    pub bootstrap_method_attr_index: u16,
    pub name_and_type_index: u16,
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[binread]
#[br(big)]
pub struct ModuleConstant {
    pub name_index: u16,
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[binread]
#[br(big)]
pub struct PackageConstant {
    pub name_index: u16,
}

/// Decodes the JVM's modified UTF-8: `0xC0 0x80` for NUL and surrogate pairs
/// encoded as two three-byte sequences. Invalid sequences become U+FFFD.
pub fn decode_modified_utf8(bytes: &[u8]) -> String {
    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b0 = bytes[i] as u16;
        if b0 & 0x80 == 0 {
            units.push(b0);
            i += 1;
        } else if b0 & 0xE0 == 0xC0 && i + 1 < bytes.len() {
            let b1 = bytes[i + 1] as u16;
            units.push(((b0 & 0x1F) << 6) | (b1 & 0x3F));
            i += 2;
        } else if b0 & 0xF0 == 0xE0 && i + 2 < bytes.len() {
            let b1 = bytes[i + 1] as u16;
            let b2 = bytes[i + 2] as u16;
            units.push(((b0 & 0x0F) << 12) | ((b1 & 0x3F) << 6) | (b2 & 0x3F));
            i += 3;
        } else {
            units.push(0xFFFD);
            i += 1;
        }
    }
    char::decode_utf16(units)
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modified_utf8_nul_and_surrogates() {
        assert_eq!(decode_modified_utf8(b"abc"), "abc");
        assert_eq!(decode_modified_utf8(&[0x61, 0xC0, 0x80, 0x62]), "a\0b");
        // U+1F600 as a CESU-8 surrogate pair
        let smile = [0xED, 0xA0, 0xBD, 0xED, 0xB8, 0x80];
        assert_eq!(decode_modified_utf8(&smile), "\u{1F600}");
    }

    #[test]
    fn pool_pads_wide_entries() {
        // 4 slots: Long (takes 1 and 2), Utf8 "x" at 3
        let bytes = [
            5, 0, 0, 0, 0, 0, 0, 0, 7, //
            1, 0, 1, b'x',
        ];
        let mut cursor = binrw::io::Cursor::new(&bytes[..]);
        let pool = constant_pool_parser(&mut cursor, Endian::Big, (4,)).unwrap();
        assert_eq!(pool.len(), 3);
        assert!(matches!(pool[0], ConstantInfo::Long(LongConstant { value: 7 })));
        assert_eq!(pool[1], ConstantInfo::Unusable);
        assert!(matches!(&pool[2], ConstantInfo::Utf8(u) if u.utf8_string == "x"));
    }

    #[test]
    fn unknown_tag_is_an_error() {
        let mut cursor = binrw::io::Cursor::new(&[2u8, 0, 0][..]);
        assert!(ConstantInfo::read_be(&mut cursor).is_err());
    }
}
