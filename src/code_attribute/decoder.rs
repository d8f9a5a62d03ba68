use binrw::io::Cursor;
use binrw::{BinRead, BinReaderExt};

use super::types::*;
use crate::decompile::descriptor::{class_operand_type, newarray_type};
use crate::error::{DecompileError, Result};
use crate::metadata::{Constant, MetadataTable};

/// Outcome of a lenient decode: everything that could be decoded, plus the error that
/// stopped decoding, if any.
#[derive(Clone, Debug)]
pub struct DecodedCode {
    pub instructions: Vec<Instruction>,
    pub error: Option<DecompileError>,
    /// Bytes from the first undecodable instruction to the end of the code array.
    pub undecoded: Vec<u8>,
}

/// Decodes a whole code array. Every byte belongs to exactly one instruction.
pub fn decode(code: &[u8], meta: &MetadataTable) -> Result<Vec<Instruction>> {
    let decoded = decode_lenient(code, meta);
    match decoded.error {
        Some(err) => Err(err),
        None => Ok(decoded.instructions),
    }
}

/// Like [`decode`], but keeps the successfully decoded prefix on failure.
pub fn decode_lenient(code: &[u8], meta: &MetadataTable) -> DecodedCode {
    let mut instructions = Vec::new();
    let mut offset = 0u32;
    while (offset as usize) < code.len() {
        match decode_one(code, offset, meta) {
            Ok(instruction) => {
                offset = instruction.next_offset();
                instructions.push(instruction);
            }
            Err(err) => {
                return DecodedCode {
                    instructions,
                    error: Some(err),
                    undecoded: code[offset as usize..].to_vec(),
                }
            }
        }
    }

    let error = check_branch_targets(&instructions);
    DecodedCode {
        instructions,
        error,
        undecoded: Vec::new(),
    }
}

/// Branches must land on the first byte of an instruction.
fn check_branch_targets(instructions: &[Instruction]) -> Option<DecompileError> {
    let starts: std::collections::HashSet<u32> = instructions.iter().map(|i| i.offset).collect();
    for instruction in instructions {
        if let Some(bad) = instruction
            .branch_targets()
            .into_iter()
            .find(|target| !starts.contains(target))
        {
            return Some(malformed(
                instruction.offset,
                format!("branch target {bad} is not an instruction boundary"),
            ));
        }
    }
    None
}

fn malformed(offset: u32, reason: impl Into<String>) -> DecompileError {
    DecompileError::MalformedBytecode {
        offset,
        reason: reason.into(),
    }
}

struct OperandReader<'a> {
    cursor: Cursor<&'a [u8]>,
    offset: u32,
}

impl<'a> OperandReader<'a> {
    fn read<T>(&mut self) -> Result<T>
    where
        T: for<'b> BinRead<Args<'b> = ()>,
    {
        self.cursor
            .read_be::<T>()
            .map_err(|_| malformed(self.offset, "operand runs past the end of the code"))
    }

    fn branch(&mut self, relative: i64) -> Result<u32> {
        u32::try_from(self.offset as i64 + relative)
            .map_err(|_| malformed(self.offset, format!("branch offset {relative} out of range")))
    }

    fn branch16(&mut self) -> Result<u32> {
        let relative = self.read::<i16>()?;
        self.branch(relative as i64)
    }

    fn branch32(&mut self) -> Result<u32> {
        let relative = self.read::<i32>()?;
        self.branch(relative as i64)
    }

    fn remaining(&self) -> usize {
        let data = self.cursor.get_ref();
        data.len().saturating_sub(self.cursor.position() as usize)
    }

    fn position(&self) -> usize {
        self.cursor.position() as usize
    }
}

const LOAD_STORE_KINDS: [ValueKind; 5] = [
    ValueKind::Int,
    ValueKind::Long,
    ValueKind::Float,
    ValueKind::Double,
    ValueKind::Reference,
];

const ARRAY_KINDS: [ValueKind; 8] = [
    ValueKind::Int,
    ValueKind::Long,
    ValueKind::Float,
    ValueKind::Double,
    ValueKind::Reference,
    ValueKind::Byte,
    ValueKind::Char,
    ValueKind::Short,
];

const CONDITIONS: [CondOp; 6] = [
    CondOp::Eq,
    CondOp::Ne,
    CondOp::Lt,
    CondOp::Ge,
    CondOp::Gt,
    CondOp::Le,
];

fn decode_one(code: &[u8], offset: u32, meta: &MetadataTable) -> Result<Instruction> {
    let mut cursor = Cursor::new(code);
    cursor.set_position(offset as u64);
    let mut r = OperandReader { cursor, offset };
    let mut opcode = r.read::<u8>()?;

    let constant = |index: u16| -> Result<Constant> {
        meta.constant(index)
            .map_err(|_| malformed(offset, format!("bad constant pool reference #{index}")))
    };
    let class = |index: u16| -> Result<String> {
        meta.class_name(index)
            .map(str::to_string)
            .map_err(|_| malformed(offset, format!("bad class reference #{index}")))
    };
    let member = |index: u16| {
        meta.member_ref(index)
            .map_err(|_| malformed(offset, format!("bad member reference #{index}")))
    };

    let kind = match opcode {
        0x00 => InsnKind::Nop,
        0x01 => InsnKind::Null,
        0x02..=0x08 => InsnKind::Const(Constant::Int(opcode as i32 - 0x03)),
        0x09 | 0x0a => InsnKind::Const(Constant::Long(opcode as i64 - 0x09)),
        0x0b..=0x0d => InsnKind::Const(Constant::Float((opcode - 0x0b) as f32)),
        0x0e | 0x0f => InsnKind::Const(Constant::Double((opcode - 0x0e) as f64)),
        0x10 => InsnKind::Const(Constant::Int(r.read::<i8>()? as i32)),
        0x11 => InsnKind::Const(Constant::Int(r.read::<i16>()? as i32)),
        0x12 => InsnKind::Const(constant(r.read::<u8>()? as u16)?),
        0x13 | 0x14 => InsnKind::Const(constant(r.read::<u16>()?)?),
        0x15..=0x19 => InsnKind::Load {
            kind: LOAD_STORE_KINDS[(opcode - 0x15) as usize],
            slot: r.read::<u8>()? as u16,
        },
        0x1a..=0x2d => InsnKind::Load {
            kind: LOAD_STORE_KINDS[((opcode - 0x1a) / 4) as usize],
            slot: ((opcode - 0x1a) % 4) as u16,
        },
        0x2e..=0x35 => InsnKind::ArrayLoad(ARRAY_KINDS[(opcode - 0x2e) as usize]),
        0x36..=0x3a => InsnKind::Store {
            kind: LOAD_STORE_KINDS[(opcode - 0x36) as usize],
            slot: r.read::<u8>()? as u16,
        },
        0x3b..=0x4e => InsnKind::Store {
            kind: LOAD_STORE_KINDS[((opcode - 0x3b) / 4) as usize],
            slot: ((opcode - 0x3b) % 4) as u16,
        },
        0x4f..=0x56 => InsnKind::ArrayStore(ARRAY_KINDS[(opcode - 0x4f) as usize]),
        0x57 => InsnKind::Stack(StackOp::Pop),
        0x58 => InsnKind::Stack(StackOp::Pop2),
        0x59 => InsnKind::Stack(StackOp::Dup),
        0x5a => InsnKind::Stack(StackOp::DupX1),
        0x5b => InsnKind::Stack(StackOp::DupX2),
        0x5c => InsnKind::Stack(StackOp::Dup2),
        0x5d => InsnKind::Stack(StackOp::Dup2X1),
        0x5e => InsnKind::Stack(StackOp::Dup2X2),
        0x5f => InsnKind::Stack(StackOp::Swap),
        0x60..=0x73 => {
            const OPS: [ArithOp; 5] = [ArithOp::Add, ArithOp::Sub, ArithOp::Mul, ArithOp::Div, ArithOp::Rem];
            InsnKind::Arith {
                op: OPS[((opcode - 0x60) / 4) as usize],
                kind: LOAD_STORE_KINDS[((opcode - 0x60) % 4) as usize],
            }
        }
        0x74..=0x77 => InsnKind::Neg(LOAD_STORE_KINDS[(opcode - 0x74) as usize]),
        0x78..=0x83 => {
            const OPS: [ArithOp; 6] = [
                ArithOp::Shl,
                ArithOp::Shr,
                ArithOp::Ushr,
                ArithOp::And,
                ArithOp::Or,
                ArithOp::Xor,
            ];
            InsnKind::Arith {
                op: OPS[((opcode - 0x78) / 2) as usize],
                kind: if opcode % 2 == 0 { ValueKind::Int } else { ValueKind::Long },
            }
        }
        0x84 => InsnKind::Iinc {
            slot: r.read::<u8>()? as u16,
            delta: r.read::<i8>()? as i16,
        },
        0x85..=0x90 => {
            use ValueKind::*;
            const CONVERSIONS: [(ValueKind, ValueKind); 12] = [
                (Int, Long),
                (Int, Float),
                (Int, Double),
                (Long, Int),
                (Long, Float),
                (Long, Double),
                (Float, Int),
                (Float, Long),
                (Float, Double),
                (Double, Int),
                (Double, Long),
                (Double, Float),
            ];
            let (from, to) = CONVERSIONS[(opcode - 0x85) as usize];
            InsnKind::Convert { from, to }
        }
        0x91 => InsnKind::Convert { from: ValueKind::Int, to: ValueKind::Byte },
        0x92 => InsnKind::Convert { from: ValueKind::Int, to: ValueKind::Char },
        0x93 => InsnKind::Convert { from: ValueKind::Int, to: ValueKind::Short },
        0x94 => InsnKind::Compare(CompareKind::Long),
        0x95 => InsnKind::Compare(CompareKind::FloatL),
        0x96 => InsnKind::Compare(CompareKind::FloatG),
        0x97 => InsnKind::Compare(CompareKind::DoubleL),
        0x98 => InsnKind::Compare(CompareKind::DoubleG),
        0x99..=0x9e => InsnKind::If {
            cond: CONDITIONS[(opcode - 0x99) as usize],
            operands: BranchOperands::IntZero,
            target: r.branch16()?,
        },
        0x9f..=0xa4 => InsnKind::If {
            cond: CONDITIONS[(opcode - 0x9f) as usize],
            operands: BranchOperands::IntPair,
            target: r.branch16()?,
        },
        0xa5 | 0xa6 => InsnKind::If {
            cond: CONDITIONS[(opcode - 0xa5) as usize],
            operands: BranchOperands::RefPair,
            target: r.branch16()?,
        },
        0xa7 => InsnKind::Goto { target: r.branch16()? },
        0xa8 => InsnKind::Jsr { target: r.branch16()? },
        0xa9 => InsnKind::Ret { slot: r.read::<u8>()? as u16 },
        0xaa => {
            skip_switch_padding(&mut r)?;
            let default = r.branch32()?;
            let low = r.read::<i32>()?;
            let high = r.read::<i32>()?;
            if high < low {
                return Err(malformed(offset, format!("tableswitch low {low} > high {high}")));
            }
            let count = (high as i64 - low as i64 + 1) as usize;
            if count.saturating_mul(4) > r.remaining() {
                return Err(malformed(offset, "tableswitch jump table runs past the end of the code"));
            }
            let targets = (0..count).map(|_| r.branch32()).collect::<Result<Vec<_>>>()?;
            InsnKind::TableSwitch { default, low, targets }
        }
        0xab => {
            skip_switch_padding(&mut r)?;
            let default = r.branch32()?;
            let npairs = r.read::<i32>()?;
            if npairs < 0 || (npairs as usize).saturating_mul(8) > r.remaining() {
                return Err(malformed(offset, format!("lookupswitch with {npairs} pairs does not fit")));
            }
            let mut pairs = Vec::with_capacity(npairs as usize);
            for _ in 0..npairs {
                let key = r.read::<i32>()?;
                pairs.push((key, r.branch32()?));
            }
            InsnKind::LookupSwitch { default, pairs }
        }
        0xac..=0xb0 => InsnKind::Return(Some(LOAD_STORE_KINDS[(opcode - 0xac) as usize])),
        0xb1 => InsnKind::Return(None),
        0xb2..=0xb5 => {
            const OPS: [FieldOp; 4] = [
                FieldOp::GetStatic,
                FieldOp::PutStatic,
                FieldOp::GetField,
                FieldOp::PutField,
            ];
            InsnKind::Field {
                op: OPS[(opcode - 0xb2) as usize],
                field: member(r.read::<u16>()?)?,
            }
        }
        0xb6..=0xb8 => {
            const KINDS: [InvokeKind; 3] = [InvokeKind::Virtual, InvokeKind::Special, InvokeKind::Static];
            InsnKind::Invoke {
                kind: KINDS[(opcode - 0xb6) as usize],
                method: member(r.read::<u16>()?)?,
            }
        }
        0xb9 => {
            let method = member(r.read::<u16>()?)?;
            let _count = r.read::<u8>()?;
            let _zero = r.read::<u8>()?;
            InsnKind::Invoke {
                kind: InvokeKind::Interface,
                method,
            }
        }
        0xba => {
            let index = r.read::<u16>()?;
            let _zero = r.read::<u16>()?;
            let (name, descriptor) = meta
                .invoke_dynamic(index)
                .map_err(|_| malformed(offset, format!("bad invokedynamic reference #{index}")))?;
            InsnKind::InvokeDynamic { name, descriptor }
        }
        0xbb => InsnKind::New(class(r.read::<u16>()?)?),
        0xbc => InsnKind::NewArray(newarray_type(r.read::<u8>()?)),
        0xbd => InsnKind::NewArray(class_operand_type(&class(r.read::<u16>()?)?)),
        0xbe => InsnKind::ArrayLength,
        0xbf => InsnKind::Throw,
        0xc0 => InsnKind::CheckCast(class_operand_type(&class(r.read::<u16>()?)?)),
        0xc1 => InsnKind::InstanceOf(class_operand_type(&class(r.read::<u16>()?)?)),
        0xc2 => InsnKind::MonitorEnter,
        0xc3 => InsnKind::MonitorExit,
        0xc4 => {
            opcode = r.read::<u8>()?;
            match opcode {
                0x15..=0x19 => InsnKind::Load {
                    kind: LOAD_STORE_KINDS[(opcode - 0x15) as usize],
                    slot: r.read::<u16>()?,
                },
                0x36..=0x3a => InsnKind::Store {
                    kind: LOAD_STORE_KINDS[(opcode - 0x36) as usize],
                    slot: r.read::<u16>()?,
                },
                0xa9 => InsnKind::Ret { slot: r.read::<u16>()? },
                0x84 => InsnKind::Iinc {
                    slot: r.read::<u16>()?,
                    delta: r.read::<i16>()?,
                },
                other => return Err(malformed(offset, format!("opcode 0x{other:02x} cannot be widened"))),
            }
        }
        0xc5 => {
            let ty = class_operand_type(&class(r.read::<u16>()?)?);
            let dimensions = r.read::<u8>()?;
            if dimensions == 0 {
                return Err(malformed(offset, "multianewarray with zero dimensions"));
            }
            InsnKind::MultiNewArray { ty, dimensions }
        }
        0xc6 | 0xc7 => InsnKind::If {
            cond: if opcode == 0xc6 { CondOp::Eq } else { CondOp::Ne },
            operands: BranchOperands::RefNull,
            target: r.branch16()?,
        },
        0xc8 => InsnKind::Goto { target: r.branch32()? },
        0xc9 => InsnKind::Jsr { target: r.branch32()? },
        other => return Err(malformed(offset, format!("undefined opcode 0x{other:02x}"))),
    };

    let end = r.position();
    Ok(Instruction {
        offset,
        opcode,
        kind,
        bytes: code[offset as usize..end].to_vec(),
    })
}

fn skip_switch_padding(r: &mut OperandReader<'_>) -> Result<()> {
    let padding = (4 - (r.offset + 1) % 4) % 4;
    for _ in 0..padding {
        r.read::<u8>()?;
    }
    Ok(())
}
