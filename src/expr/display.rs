use std::fmt::{Display, Formatter};

use crate::expr::{BOOL, BinaryOp, CmpOp, Expr, ExprKind};

impl Display for BinaryOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BinaryOp::Add => "Add",
            BinaryOp::Sub => "Sub",
            BinaryOp::Mul => "Mul",
            BinaryOp::UDiv => "UDiv",
            BinaryOp::SDiv => "SDiv",
            BinaryOp::URem => "URem",
            BinaryOp::SRem => "SRem",
            BinaryOp::And => "And",
            BinaryOp::Or => "Or",
            BinaryOp::Xor => "Xor",
            BinaryOp::Shl => "Shl",
            BinaryOp::LShr => "LShr",
            BinaryOp::AShr => "AShr",
        };
        write!(f, "{s}")
    }
}

impl Display for CmpOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CmpOp::Eq => "Eq",
            CmpOp::Ne => "Ne",
            CmpOp::Ult => "Ult",
            CmpOp::Ule => "Ule",
            CmpOp::Ugt => "Ugt",
            CmpOp::Uge => "Uge",
            CmpOp::Slt => "Slt",
            CmpOp::Sle => "Sle",
            CmpOp::Sgt => "Sgt",
            CmpOp::Sge => "Sge",
        };
        write!(f, "{s}")
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.kind() {
            ExprKind::Constant { value, width } if *width == BOOL => {
                write!(f, "{}", if *value == 0 { "false" } else { "true" })
            }
            ExprKind::Constant { value, width } => write!(f, "(w{width} {value})"),
            ExprKind::Read { array, index } => write!(f, "(Read w8 {index} {array})"),
            ExprKind::Concat { msb, lsb } => {
                write!(f, "(Concat w{} {msb} {lsb})", self.width())
            }
            ExprKind::Extract {
                expr,
                offset,
                width,
            } => write!(f, "(Extract w{width} {offset} {expr})"),
            ExprKind::ZExt { expr, width } => write!(f, "(ZExt w{width} {expr})"),
            ExprKind::SExt { expr, width } => write!(f, "(SExt w{width} {expr})"),
            ExprKind::Not(e) => write!(f, "(Not {e})"),
            ExprKind::Binary { op, lhs, rhs } => {
                write!(f, "({op} w{} {lhs} {rhs})", lhs.width())
            }
            ExprKind::Compare { op, lhs, rhs } => write!(f, "({op} {lhs} {rhs})"),
            ExprKind::Select {
                cond,
                on_true,
                on_false,
            } => write!(f, "(Select w{} {cond} {on_true} {on_false})", self.width()),
        }
    }
}
