use std::fmt::{self, Write};

use super::descriptor::{source_class_name, JvmType};
use crate::code_attribute::{CompareKind, CondOp, InvokeKind};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BinOp {
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

impl BinOp {
    pub fn as_str(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
            BinOp::Ushr => ">>>",
            BinOp::And => "&",
            BinOp::Or => "|",
            BinOp::Xor => "^",
        }
    }

    fn precedence(self) -> u8 {
        match self {
            BinOp::Or => 4,
            BinOp::Xor => 5,
            BinOp::And => 6,
            BinOp::Shl | BinOp::Shr | BinOp::Ushr => 9,
            BinOp::Add | BinOp::Sub => 10,
            BinOp::Mul | BinOp::Div | BinOp::Rem => 11,
        }
    }
}

/// Short-circuit boolean connective, recovered from chained conditional branches.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

/// A local variable slot as seen at one point of the method.
#[derive(Clone, Debug, PartialEq)]
pub struct LocalVar {
    pub slot: u16,
    pub name: String,
    pub ty: JvmType,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    IntLiteral(i32),
    LongLiteral(i64),
    FloatLiteral(f32),
    DoubleLiteral(f64),
    BoolLiteral(bool),
    CharLiteral(u16),
    StringLiteral(String),
    ClassLiteral(JvmType),
    Null,

    Local(LocalVar),
    This,
    /// The exception object a handler starts with.
    CaughtException(Option<String>),

    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Negate(Box<Expr>),
    Not(Box<Expr>),
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Compare {
        op: CondOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Three-way result of `lcmp`/`fcmpl`/`dcmpg`... not consumed by a branch.
    CmpResult {
        kind: CompareKind,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Cast {
        ty: JvmType,
        operand: Box<Expr>,
    },
    InstanceOf {
        operand: Box<Expr>,
        ty: JvmType,
    },
    Ternary {
        condition: Box<Expr>,
        then_value: Box<Expr>,
        else_value: Box<Expr>,
    },

    FieldGet {
        object: Option<Box<Expr>>,
        owner: String,
        name: String,
        ty: JvmType,
    },
    Invoke {
        kind: InvokeKind,
        object: Option<Box<Expr>>,
        owner: String,
        name: String,
        args: Vec<Expr>,
        ret: JvmType,
    },
    /// `this(...)` or `super(...)` inside a constructor.
    ConstructorCall {
        is_super: bool,
        args: Vec<Expr>,
    },
    InvokeDynamic {
        name: String,
        args: Vec<Expr>,
    },
    New {
        class: String,
        args: Vec<Expr>,
    },
    /// `new C` whose constructor has not run yet.
    UninitNew(String),
    NewArray {
        element: JvmType,
        length: Box<Expr>,
    },
    NewMultiArray {
        ty: JvmType,
        dimensions: Vec<Expr>,
    },
    ArrayLength(Box<Expr>),
    ArrayLoad {
        array: Box<Expr>,
        index: Box<Expr>,
    },

    /// Value the simulator could not reconstruct.
    Unresolved(String),
}

impl Expr {
    pub fn binary(op: BinOp, left: Expr, right: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn compare(op: CondOp, left: Expr, right: Expr) -> Expr {
        Expr::Compare {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn logical(op: LogicalOp, left: Expr, right: Expr) -> Expr {
        Expr::Logical {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Boolean negation, pushed inward where it reads better.
    pub fn negate(self) -> Expr {
        match self {
            Expr::Compare { op, left, right } => Expr::Compare {
                op: op.negate(),
                left,
                right,
            },
            Expr::Not(inner) => *inner,
            Expr::BoolLiteral(b) => Expr::BoolLiteral(!b),
            Expr::Logical { op, left, right } => Expr::Logical {
                op: match op {
                    LogicalOp::And => LogicalOp::Or,
                    LogicalOp::Or => LogicalOp::And,
                },
                left: Box::new(left.negate()),
                right: Box::new(right.negate()),
            },
            other => Expr::Not(Box::new(other)),
        }
    }

    /// Re-spells int literals for boolean and char destinations.
    pub fn coerce(self, ty: &JvmType) -> Expr {
        match (self, ty) {
            (Expr::IntLiteral(0), JvmType::Boolean) => Expr::BoolLiteral(false),
            (Expr::IntLiteral(1), JvmType::Boolean) => Expr::BoolLiteral(true),
            (Expr::IntLiteral(v), JvmType::Char) if (0..=0xffff).contains(&v) => {
                Expr::CharLiteral(v as u16)
            }
            (
                Expr::Ternary {
                    condition,
                    then_value,
                    else_value,
                },
                JvmType::Boolean,
            ) => match (*then_value, *else_value) {
                (Expr::IntLiteral(1), Expr::IntLiteral(0)) => *condition,
                (Expr::IntLiteral(0), Expr::IntLiteral(1)) => condition.negate(),
                (then_value, else_value) => Expr::Ternary {
                    condition,
                    then_value: Box::new(then_value.coerce(ty)),
                    else_value: Box::new(else_value.coerce(ty)),
                },
            },
            (other, _) => other,
        }
    }

    /// Whether evaluating the expression can have an observable effect. Pure values
    /// popped off the stack are dropped instead of becoming statements.
    pub fn has_side_effects(&self) -> bool {
        match self {
            Expr::Invoke { .. }
            | Expr::ConstructorCall { .. }
            | Expr::InvokeDynamic { .. }
            | Expr::New { .. }
            | Expr::NewArray { .. }
            | Expr::NewMultiArray { .. }
            | Expr::Unresolved(_) => true,
            Expr::Binary { left, right, .. }
            | Expr::Logical { left, right, .. }
            | Expr::Compare { left, right, .. }
            | Expr::CmpResult { left, right, .. } => {
                left.has_side_effects() || right.has_side_effects()
            }
            Expr::ArrayLoad { array, index } => array.has_side_effects() || index.has_side_effects(),
            Expr::Negate(e) | Expr::Not(e) | Expr::ArrayLength(e) => e.has_side_effects(),
            Expr::Cast { operand, .. } | Expr::InstanceOf { operand, .. } => {
                operand.has_side_effects()
            }
            Expr::FieldGet { object, .. } => object.as_ref().is_some_and(|o| o.has_side_effects()),
            Expr::Ternary {
                condition,
                then_value,
                else_value,
            } => {
                condition.has_side_effects()
                    || then_value.has_side_effects()
                    || else_value.has_side_effects()
            }
            _ => false,
        }
    }

    /// Whether the value reads local slot `slot` anywhere inside it.
    pub fn mentions_local(&self, slot: u16) -> bool {
        match self {
            Expr::Local(var) => var.slot == slot,
            Expr::Binary { left, right, .. }
            | Expr::Logical { left, right, .. }
            | Expr::Compare { left, right, .. }
            | Expr::CmpResult { left, right, .. } => {
                left.mentions_local(slot) || right.mentions_local(slot)
            }
            Expr::ArrayLoad { array, index } => {
                array.mentions_local(slot) || index.mentions_local(slot)
            }
            Expr::Negate(e) | Expr::Not(e) | Expr::ArrayLength(e) => e.mentions_local(slot),
            Expr::Cast { operand, .. } | Expr::InstanceOf { operand, .. } => {
                operand.mentions_local(slot)
            }
            Expr::Ternary {
                condition,
                then_value,
                else_value,
            } => {
                condition.mentions_local(slot)
                    || then_value.mentions_local(slot)
                    || else_value.mentions_local(slot)
            }
            Expr::FieldGet { object, .. } => object.as_ref().is_some_and(|o| o.mentions_local(slot)),
            Expr::Invoke { object, args, .. } => {
                object.as_ref().is_some_and(|o| o.mentions_local(slot))
                    || args.iter().any(|a| a.mentions_local(slot))
            }
            Expr::ConstructorCall { args, .. }
            | Expr::InvokeDynamic { args, .. }
            | Expr::New { args, .. }
            | Expr::NewMultiArray {
                dimensions: args, ..
            } => args.iter().any(|a| a.mentions_local(slot)),
            Expr::NewArray { length, .. } => length.mentions_local(slot),
            _ => false,
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            Expr::Ternary { .. } => 1,
            Expr::Logical {
                op: LogicalOp::Or, ..
            } => 2,
            Expr::Logical {
                op: LogicalOp::And, ..
            } => 3,
            Expr::Binary { op, .. } => op.precedence(),
            Expr::Compare {
                op: CondOp::Eq | CondOp::Ne,
                ..
            } => 7,
            Expr::Compare { .. } | Expr::InstanceOf { .. } => 8,
            Expr::Negate(_) | Expr::Not(_) | Expr::Cast { .. } => 12,
            _ => 13,
        }
    }

    fn write_operand(&self, f: &mut fmt::Formatter<'_>, parent: u8, right: bool) -> fmt::Result {
        let own = self.precedence();
        if own < parent || (right && own == parent && own < 12) {
            write!(f, "({self})")
        } else {
            write!(f, "{self}")
        }
    }
}

fn write_args(f: &mut fmt::Formatter<'_>, args: &[Expr]) -> fmt::Result {
    f.write_char('(')?;
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{arg}")?;
    }
    f.write_char(')')
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prec = self.precedence();
        match self {
            Expr::IntLiteral(v) => write!(f, "{v}"),
            Expr::LongLiteral(v) => write!(f, "{v}L"),
            Expr::FloatLiteral(v) if v.is_nan() => f.write_str("Float.NaN"),
            Expr::FloatLiteral(v) if v.is_infinite() => f.write_str(if *v > 0.0 {
                "Float.POSITIVE_INFINITY"
            } else {
                "Float.NEGATIVE_INFINITY"
            }),
            Expr::FloatLiteral(v) => write!(f, "{v:?}F"),
            Expr::DoubleLiteral(v) if v.is_nan() => f.write_str("Double.NaN"),
            Expr::DoubleLiteral(v) if v.is_infinite() => f.write_str(if *v > 0.0 {
                "Double.POSITIVE_INFINITY"
            } else {
                "Double.NEGATIVE_INFINITY"
            }),
            Expr::DoubleLiteral(v) => write!(f, "{v:?}"),
            Expr::BoolLiteral(b) => write!(f, "{b}"),
            Expr::CharLiteral(c) => match char::from_u32(*c as u32) {
                Some('\'') => f.write_str("'\\''"),
                Some(ch) if !ch.is_control() && *c != 0x5c => write!(f, "'{ch}'"),
                _ => write!(f, "'\\u{c:04x}'"),
            },
            Expr::StringLiteral(s) => write!(f, "\"{}\"", escape_java_string(s)),
            Expr::ClassLiteral(ty) => write!(f, "{ty}.class"),
            Expr::Null => f.write_str("null"),
            Expr::Local(var) => f.write_str(&var.name),
            Expr::This => f.write_str("this"),
            Expr::CaughtException(_) => f.write_str("/* caught exception */"),
            Expr::Binary { op, left, right } => {
                left.write_operand(f, prec, false)?;
                write!(f, " {} ", op.as_str())?;
                right.write_operand(f, prec, true)
            }
            Expr::Negate(operand) => {
                f.write_char('-')?;
                operand.write_operand(f, prec, false)
            }
            Expr::Not(operand) => {
                f.write_char('!')?;
                operand.write_operand(f, prec, false)
            }
            Expr::Logical { op, left, right } => {
                left.write_operand(f, prec, false)?;
                f.write_str(match op {
                    LogicalOp::And => " && ",
                    LogicalOp::Or => " || ",
                })?;
                right.write_operand(f, prec, true)
            }
            Expr::Compare { op, left, right } => {
                left.write_operand(f, prec, false)?;
                write!(f, " {} ", op.as_str())?;
                right.write_operand(f, prec, true)
            }
            Expr::CmpResult { kind, left, right } => {
                let class = match kind {
                    CompareKind::Long => "Long",
                    CompareKind::FloatL | CompareKind::FloatG => "Float",
                    CompareKind::DoubleL | CompareKind::DoubleG => "Double",
                };
                write!(f, "{class}.compare({left}, {right})")
            }
            Expr::Cast { ty, operand } => {
                write!(f, "({ty}) ")?;
                operand.write_operand(f, prec, false)
            }
            Expr::InstanceOf { operand, ty } => {
                operand.write_operand(f, prec, false)?;
                write!(f, " instanceof {ty}")
            }
            Expr::Ternary {
                condition,
                then_value,
                else_value,
            } => {
                condition.write_operand(f, prec + 1, false)?;
                f.write_str(" ? ")?;
                then_value.write_operand(f, prec + 1, false)?;
                f.write_str(" : ")?;
                else_value.write_operand(f, prec, false)
            }
            Expr::FieldGet {
                object, owner, name, ..
            } => {
                match object {
                    Some(object) => object.write_operand(f, prec, false)?,
                    None => f.write_str(&source_class_name(owner))?,
                }
                write!(f, ".{name}")
            }
            Expr::Invoke {
                kind,
                object,
                owner,
                name,
                args,
                ..
            } => {
                match (kind, object.as_deref()) {
                    (InvokeKind::Special, Some(Expr::This)) if name != "<init>" => {
                        f.write_str("super")?
                    }
                    (_, Some(object)) => object.write_operand(f, prec, false)?,
                    (_, None) => f.write_str(&source_class_name(owner))?,
                }
                write!(f, ".{name}")?;
                write_args(f, args)
            }
            Expr::ConstructorCall { is_super, args } => {
                f.write_str(if *is_super { "super" } else { "this" })?;
                write_args(f, args)
            }
            Expr::InvokeDynamic { name, args } => {
                write!(f, "/* invokedynamic */ {name}")?;
                write_args(f, args)
            }
            Expr::New { class, args } => {
                write!(f, "new {}", source_class_name(class))?;
                write_args(f, args)
            }
            Expr::UninitNew(class) => write!(f, "new {}", source_class_name(class)),
            Expr::NewArray { element, length } => {
                let (base, depth) = array_base(element);
                write!(f, "new {base}[{length}]")?;
                for _ in 0..depth {
                    f.write_str("[]")?;
                }
                Ok(())
            }
            Expr::NewMultiArray { ty, dimensions } => {
                let (base, depth) = array_base(ty);
                write!(f, "new {base}")?;
                for dim in dimensions {
                    write!(f, "[{dim}]")?;
                }
                for _ in dimensions.len()..depth {
                    f.write_str("[]")?;
                }
                Ok(())
            }
            Expr::ArrayLength(array) => {
                array.write_operand(f, prec, false)?;
                f.write_str(".length")
            }
            Expr::ArrayLoad { array, index } => {
                array.write_operand(f, prec, false)?;
                write!(f, "[{index}]")
            }
            Expr::Unresolved(reason) => write!(f, "/* {reason} */"),
        }
    }
}

/// Element type and number of array dimensions.
fn array_base(ty: &JvmType) -> (&JvmType, usize) {
    let mut depth = 0;
    let mut current = ty;
    while let JvmType::Array(inner) = current {
        depth += 1;
        current = inner;
    }
    (current, depth)
}

#[derive(Clone, Debug, PartialEq)]
pub enum Stmt {
    LocalStore {
        var: LocalVar,
        value: Expr,
        /// First assignment of this slot with this type.
        declare: bool,
    },
    FieldStore {
        object: Option<Expr>,
        owner: String,
        name: String,
        value: Expr,
    },
    ArrayStore {
        array: Expr,
        index: Expr,
        value: Expr,
    },
    Expr(Expr),
    Iinc {
        var: LocalVar,
        delta: i32,
    },
    Return(Option<Expr>),
    Throw(Expr),
    MonitorEnter(Expr),
    MonitorExit(Expr),
    Break,
    Continue,
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stmt::LocalStore {
                var,
                value,
                declare: true,
            } => write!(f, "{} {} = {value};", var.ty, var.name),
            Stmt::LocalStore { var, value, .. } => write!(f, "{} = {value};", var.name),
            Stmt::FieldStore {
                object,
                owner,
                name,
                value,
            } => {
                match object {
                    Some(object) => object.write_operand(f, 13, false)?,
                    None => f.write_str(&source_class_name(owner))?,
                }
                write!(f, ".{name} = {value};")
            }
            Stmt::ArrayStore {
                array,
                index,
                value,
            } => {
                array.write_operand(f, 13, false)?;
                write!(f, "[{index}] = {value};")
            }
            Stmt::Expr(expr) => write!(f, "{expr};"),
            Stmt::Iinc { var, delta: 1 } => write!(f, "{}++;", var.name),
            Stmt::Iinc { var, delta: -1 } => write!(f, "{}--;", var.name),
            Stmt::Iinc { var, delta } if *delta < 0 => write!(f, "{} -= {};", var.name, -delta),
            Stmt::Iinc { var, delta } => write!(f, "{} += {delta};", var.name),
            Stmt::Return(None) => f.write_str("return;"),
            Stmt::Return(Some(value)) => write!(f, "return {value};"),
            Stmt::Throw(value) => write!(f, "throw {value};"),
            Stmt::MonitorEnter(value) => write!(f, "monitorenter({value});"),
            Stmt::MonitorExit(value) => write!(f, "monitorexit({value});"),
            Stmt::Break => f.write_str("break;"),
            Stmt::Continue => f.write_str("continue;"),
        }
    }
}

pub fn escape_java_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local(name: &str, ty: JvmType) -> Expr {
        Expr::Local(LocalVar {
            slot: 1,
            name: name.into(),
            ty,
        })
    }

    #[test]
    fn precedence_adds_parentheses() {
        let sum = Expr::binary(BinOp::Add, local("a", JvmType::Int), local("b", JvmType::Int));
        let product = Expr::binary(BinOp::Mul, sum, Expr::IntLiteral(2));
        assert_eq!(product.to_string(), "(a + b) * 2");

        let diff = Expr::binary(
            BinOp::Sub,
            local("a", JvmType::Int),
            Expr::binary(BinOp::Sub, local("b", JvmType::Int), Expr::IntLiteral(1)),
        );
        assert_eq!(diff.to_string(), "a - (b - 1)");
    }

    #[test]
    fn negation_flips_comparisons_and_de_morgan() {
        let lt = Expr::compare(CondOp::Lt, local("i", JvmType::Int), Expr::IntLiteral(10));
        assert_eq!(lt.clone().negate().to_string(), "i >= 10");

        let both = Expr::logical(LogicalOp::And, lt, local("flag", JvmType::Boolean));
        assert_eq!(both.negate().to_string(), "i >= 10 || !flag");
    }

    #[test]
    fn boolean_coercion() {
        assert_eq!(Expr::IntLiteral(1).coerce(&JvmType::Boolean), Expr::BoolLiteral(true));
        assert_eq!(Expr::IntLiteral(65).coerce(&JvmType::Char).to_string(), "'A'");
        let cond = Expr::compare(CondOp::Gt, local("x", JvmType::Int), Expr::IntLiteral(0));
        let ternary = Expr::Ternary {
            condition: Box::new(cond.clone()),
            then_value: Box::new(Expr::IntLiteral(0)),
            else_value: Box::new(Expr::IntLiteral(1)),
        };
        assert_eq!(ternary.coerce(&JvmType::Boolean), cond.negate());
    }

    #[test]
    fn statements_render_as_java() {
        let var = LocalVar {
            slot: 2,
            name: "count".into(),
            ty: JvmType::Int,
        };
        let decl = Stmt::LocalStore {
            var: var.clone(),
            value: Expr::IntLiteral(0),
            declare: true,
        };
        assert_eq!(decl.to_string(), "int count = 0;");
        assert_eq!(Stmt::Iinc { var: var.clone(), delta: 1 }.to_string(), "count++;");
        assert_eq!(Stmt::Iinc { var, delta: -3 }.to_string(), "count -= 3;");
        assert_eq!(
            Stmt::Return(Some(Expr::StringLiteral("a\"b\n".into()))).to_string(),
            "return \"a\\\"b\\n\";"
        );
    }
}
