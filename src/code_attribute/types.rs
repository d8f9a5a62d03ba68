use std::fmt;

use crate::decompile::descriptor::JvmType;
use crate::metadata::{Constant, MemberRef};

/// Computational kind of a value as seen by a typed opcode (`iload`, `faload`, `dreturn`...).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Int,
    Long,
    Float,
    Double,
    Reference,
    /// `baload`/`bastore` serve both byte and boolean arrays.
    Byte,
    Char,
    Short,
}

impl ValueKind {
    pub fn is_wide(self) -> bool {
        matches!(self, ValueKind::Long | ValueKind::Double)
    }

    pub fn to_type(self) -> JvmType {
        match self {
            ValueKind::Int => JvmType::Int,
            ValueKind::Long => JvmType::Long,
            ValueKind::Float => JvmType::Float,
            ValueKind::Double => JvmType::Double,
            ValueKind::Reference => JvmType::Reference("java/lang/Object".into()),
            ValueKind::Byte => JvmType::Byte,
            ValueKind::Char => JvmType::Char,
            ValueKind::Short => JvmType::Short,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    Ushr,
    And,
    Or,
    Xor,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CompareKind {
    Long,
    FloatL,
    FloatG,
    DoubleL,
    DoubleG,
}

/// Relation tested by a conditional branch.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CondOp {
    Eq,
    Ne,
    Lt,
    Ge,
    Gt,
    Le,
}

impl CondOp {
    pub fn negate(self) -> CondOp {
        match self {
            CondOp::Eq => CondOp::Ne,
            CondOp::Ne => CondOp::Eq,
            CondOp::Lt => CondOp::Ge,
            CondOp::Ge => CondOp::Lt,
            CondOp::Gt => CondOp::Le,
            CondOp::Le => CondOp::Gt,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CondOp::Eq => "==",
            CondOp::Ne => "!=",
            CondOp::Lt => "<",
            CondOp::Ge => ">=",
            CondOp::Gt => ">",
            CondOp::Le => "<=",
        }
    }
}

/// What a conditional branch compares.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BranchOperands {
    /// `ifeq`..`ifle`: one int against zero.
    IntZero,
    /// `if_icmpeq`..`if_icmple`
    IntPair,
    /// `if_acmpeq`, `if_acmpne`
    RefPair,
    /// `ifnull`, `ifnonnull`
    RefNull,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum FieldOp {
    GetStatic,
    PutStatic,
    GetField,
    PutField,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum InvokeKind {
    Virtual,
    Special,
    Static,
    Interface,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum StackOp {
    Pop,
    Pop2,
    Dup,
    DupX1,
    DupX2,
    Dup2,
    Dup2X1,
    Dup2X2,
    Swap,
}

/// Decoded operation with constant pool operands already resolved.
/// Branch targets are absolute code offsets.
#[derive(Clone, Debug, PartialEq)]
pub enum InsnKind {
    Nop,
    Null,
    Const(Constant),
    Load { kind: ValueKind, slot: u16 },
    Store { kind: ValueKind, slot: u16 },
    ArrayLoad(ValueKind),
    ArrayStore(ValueKind),
    Stack(StackOp),
    Arith { op: ArithOp, kind: ValueKind },
    Neg(ValueKind),
    Iinc { slot: u16, delta: i16 },
    Convert { from: ValueKind, to: ValueKind },
    Compare(CompareKind),
    If { cond: CondOp, operands: BranchOperands, target: u32 },
    Goto { target: u32 },
    Jsr { target: u32 },
    Ret { slot: u16 },
    TableSwitch { default: u32, low: i32, targets: Vec<u32> },
    LookupSwitch { default: u32, pairs: Vec<(i32, u32)> },
    Return(Option<ValueKind>),
    Field { op: FieldOp, field: MemberRef },
    Invoke { kind: InvokeKind, method: MemberRef },
    InvokeDynamic { name: String, descriptor: String },
    New(String),
    NewArray(JvmType),
    MultiNewArray { ty: JvmType, dimensions: u8 },
    ArrayLength,
    Throw,
    CheckCast(JvmType),
    InstanceOf(JvmType),
    MonitorEnter,
    MonitorExit,
}

/// One decoded instruction. Produced once by the decoder and never mutated.
#[derive(Clone, Debug, PartialEq)]
pub struct Instruction {
    pub offset: u32,
    pub opcode: u8,
    pub kind: InsnKind,
    /// The exact encoding, opcode and padding included.
    pub bytes: Vec<u8>,
}

impl Instruction {
    pub fn len(&self) -> u32 {
        self.bytes.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn next_offset(&self) -> u32 {
        self.offset + self.len()
    }

    pub fn mnemonic(&self) -> &'static str {
        mnemonic(self.opcode)
    }

    /// Explicit jump targets, in encoding order. Switch defaults come first.
    pub fn branch_targets(&self) -> Vec<u32> {
        match &self.kind {
            InsnKind::If { target, .. } | InsnKind::Goto { target } | InsnKind::Jsr { target } => {
                vec![*target]
            }
            InsnKind::TableSwitch {
                default, targets, ..
            } => std::iter::once(*default).chain(targets.iter().copied()).collect(),
            InsnKind::LookupSwitch { default, pairs } => std::iter::once(*default)
                .chain(pairs.iter().map(|(_, t)| *t))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// True for instructions that end a basic block.
    pub fn ends_block(&self) -> bool {
        matches!(
            self.kind,
            InsnKind::If { .. }
                | InsnKind::Goto { .. }
                | InsnKind::Jsr { .. }
                | InsnKind::Ret { .. }
                | InsnKind::TableSwitch { .. }
                | InsnKind::LookupSwitch { .. }
                | InsnKind::Return(_)
                | InsnKind::Throw
        )
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>4}: {}", self.offset, self.mnemonic())?;
        match &self.kind {
            InsnKind::Const(Constant::String(s)) => write!(f, " {s:?}"),
            InsnKind::Const(Constant::Int(v)) if self.opcode >= 0x10 => write!(f, " {v}"),
            InsnKind::Const(c) if self.opcode >= 0x12 => write!(f, " {c:?}"),
            InsnKind::Load { slot, .. } | InsnKind::Store { slot, .. } if self.bytes.len() > 1 => {
                write!(f, " {slot}")
            }
            InsnKind::Ret { slot } => write!(f, " {slot}"),
            InsnKind::Iinc { slot, delta } => write!(f, " {slot} {delta}"),
            InsnKind::If { target, .. } | InsnKind::Goto { target } | InsnKind::Jsr { target } => {
                write!(f, " {target}")
            }
            InsnKind::TableSwitch { default, low, targets } => {
                write!(f, " {{ low: {low}, default: {default}, targets: {targets:?} }}")
            }
            InsnKind::LookupSwitch { default, pairs } => {
                write!(f, " {{ default: {default}, pairs: {pairs:?} }}")
            }
            InsnKind::Field { field: m, .. } | InsnKind::Invoke { method: m, .. } => {
                write!(f, " {}.{}:{}", m.owner, m.name, m.descriptor)
            }
            InsnKind::InvokeDynamic { name, descriptor } => write!(f, " {name}:{descriptor}"),
            InsnKind::New(class) => write!(f, " {class}"),
            InsnKind::NewArray(ty) | InsnKind::CheckCast(ty) | InsnKind::InstanceOf(ty) => {
                write!(f, " {}", ty.to_descriptor())
            }
            InsnKind::MultiNewArray { ty, dimensions } => {
                write!(f, " {} {dimensions}", ty.to_descriptor())
            }
            _ => Ok(()),
        }
    }
}

/// Opcode mnemonic as used by `javap`.
pub fn mnemonic(opcode: u8) -> &'static str {
    const NAMES: [&str; 202] = [
        "nop", "aconst_null", "iconst_m1", "iconst_0", "iconst_1", "iconst_2", "iconst_3",
        "iconst_4", "iconst_5", "lconst_0", "lconst_1", "fconst_0", "fconst_1", "fconst_2",
        "dconst_0", "dconst_1", "bipush", "sipush", "ldc", "ldc_w", "ldc2_w", "iload", "lload",
        "fload", "dload", "aload", "iload_0", "iload_1", "iload_2", "iload_3", "lload_0",
        "lload_1", "lload_2", "lload_3", "fload_0", "fload_1", "fload_2", "fload_3", "dload_0",
        "dload_1", "dload_2", "dload_3", "aload_0", "aload_1", "aload_2", "aload_3", "iaload",
        "laload", "faload", "daload", "aaload", "baload", "caload", "saload", "istore", "lstore",
        "fstore", "dstore", "astore", "istore_0", "istore_1", "istore_2", "istore_3", "lstore_0",
        "lstore_1", "lstore_2", "lstore_3", "fstore_0", "fstore_1", "fstore_2", "fstore_3",
        "dstore_0", "dstore_1", "dstore_2", "dstore_3", "astore_0", "astore_1", "astore_2",
        "astore_3", "iastore", "lastore", "fastore", "dastore", "aastore", "bastore", "castore",
        "sastore", "pop", "pop2", "dup", "dup_x1", "dup_x2", "dup2", "dup2_x1", "dup2_x2", "swap",
        "iadd", "ladd", "fadd", "dadd", "isub", "lsub", "fsub", "dsub", "imul", "lmul", "fmul",
        "dmul", "idiv", "ldiv", "fdiv", "ddiv", "irem", "lrem", "frem", "drem", "ineg", "lneg",
        "fneg", "dneg", "ishl", "lshl", "ishr", "lshr", "iushr", "lushr", "iand", "land", "ior",
        "lor", "ixor", "lxor", "iinc", "i2l", "i2f", "i2d", "l2i", "l2f", "l2d", "f2i", "f2l",
        "f2d", "d2i", "d2l", "d2f", "i2b", "i2c", "i2s", "lcmp", "fcmpl", "fcmpg", "dcmpl",
        "dcmpg", "ifeq", "ifne", "iflt", "ifge", "ifgt", "ifle", "if_icmpeq", "if_icmpne",
        "if_icmplt", "if_icmpge", "if_icmpgt", "if_icmple", "if_acmpeq", "if_acmpne", "goto",
        "jsr", "ret", "tableswitch", "lookupswitch", "ireturn", "lreturn", "freturn", "dreturn",
        "areturn", "return", "getstatic", "putstatic", "getfield", "putfield", "invokevirtual",
        "invokespecial", "invokestatic", "invokeinterface", "invokedynamic", "new", "newarray",
        "anewarray", "arraylength", "athrow", "checkcast", "instanceof", "monitorenter",
        "monitorexit", "wide", "multianewarray", "ifnull", "ifnonnull", "goto_w", "jsr_w",
    ];
    NAMES.get(opcode as usize).copied().unwrap_or("<invalid>")
}
