use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

pub use constraints::ConstraintSet;
pub use solver::SolverToolbox;

pub mod constraints;
mod display;
pub mod parser;
pub mod solver;

pub type Width = u32;

pub const BYTE: Width = 8;
pub const BOOL: Width = 1;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    UDiv,
    SDiv,
    URem,
    SRem,
    And,
    Or,
    Xor,
    Shl,
    LShr,
    AShr,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CmpOp {
    Eq,
    Ne,
    Ult,
    Ule,
    Ugt,
    Uge,
    Slt,
    Sle,
    Sgt,
    Sge,
}

impl CmpOp {
    pub fn negate(self) -> Self {
        match self {
            CmpOp::Eq => CmpOp::Ne,
            CmpOp::Ne => CmpOp::Eq,
            CmpOp::Ult => CmpOp::Uge,
            CmpOp::Ule => CmpOp::Ugt,
            CmpOp::Ugt => CmpOp::Ule,
            CmpOp::Uge => CmpOp::Ult,
            CmpOp::Slt => CmpOp::Sge,
            CmpOp::Sle => CmpOp::Sgt,
            CmpOp::Sgt => CmpOp::Sle,
            CmpOp::Sge => CmpOp::Slt,
        }
    }
}

#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ExprKind {
    Constant { value: u64, width: Width },
    /// A single byte of a named symbolic array.
    Read { array: String, index: u32 },
    Concat { msb: Expr, lsb: Expr },
    Extract { expr: Expr, offset: u32, width: Width },
    ZExt { expr: Expr, width: Width },
    SExt { expr: Expr, width: Width },
    Not(Expr),
    Binary { op: BinaryOp, lhs: Expr, rhs: Expr },
    Compare { op: CmpOp, lhs: Expr, rhs: Expr },
    Select { cond: Expr, on_true: Expr, on_false: Expr },
}

/// Immutable handle to a symbolic expression. Cloning is cheap and equality is
/// structural.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Expr(Arc<ExprKind>);

fn mask(value: u64, width: Width) -> u64 {
    if width >= 64 {
        value
    } else {
        value & ((1u64 << width) - 1)
    }
}

fn sign_extend(value: u64, from: Width) -> i64 {
    if from == 0 || from >= 64 {
        return value as i64;
    }
    let shift = 64 - from;
    ((value << shift) as i64) >> shift
}

impl Expr {
    fn new(kind: ExprKind) -> Self {
        Self(Arc::new(kind))
    }

    pub fn kind(&self) -> &ExprKind {
        &self.0
    }

    pub fn constant(value: u64, width: Width) -> Self {
        Self::new(ExprKind::Constant {
            value: mask(value, width),
            width,
        })
    }

    pub fn bool(value: bool) -> Self {
        Self::constant(value as u64, BOOL)
    }

    pub fn read(array: &str, index: u32) -> Self {
        Self::new(ExprKind::Read {
            array: array.to_string(),
            index,
        })
    }

    /// Little-endian read of `bytes` consecutive bytes starting at `offset`.
    pub fn read_lsb(array: &str, offset: u32, bytes: u32) -> Self {
        let mut result = Self::read(array, offset);
        for i in 1..bytes {
            result = Self::read(array, offset + i).concat(&result);
        }
        result
    }

    pub fn concat(&self, lsb: &Expr) -> Self {
        Self::new(ExprKind::Concat {
            msb: self.clone(),
            lsb: lsb.clone(),
        })
    }

    pub fn extract(&self, offset: u32, width: Width) -> Self {
        if offset == 0 && width == self.width() {
            return self.clone();
        }
        Self::new(ExprKind::Extract {
            expr: self.clone(),
            offset,
            width,
        })
    }

    /// Extraction that looks through concatenations, so byte slices of a
    /// [`Expr::read_lsb`] come back as plain reads.
    pub fn slice(&self, offset: u32, width: Width) -> Self {
        if offset == 0 && width == self.width() {
            return self.clone();
        }
        match self.kind() {
            ExprKind::Concat { msb, lsb } => {
                let low = lsb.width();
                if offset + width <= low {
                    lsb.slice(offset, width)
                } else if offset >= low {
                    msb.slice(offset - low, width)
                } else {
                    msb.slice(0, offset + width - low)
                        .concat(&lsb.slice(offset, low - offset))
                }
            }
            _ => self.extract(offset, width),
        }
    }

    pub fn zext(&self, width: Width) -> Self {
        if width == self.width() {
            return self.clone();
        }
        Self::new(ExprKind::ZExt {
            expr: self.clone(),
            width,
        })
    }

    pub fn sext(&self, width: Width) -> Self {
        if width == self.width() {
            return self.clone();
        }
        Self::new(ExprKind::SExt {
            expr: self.clone(),
            width,
        })
    }

    pub fn not(&self) -> Self {
        Self::new(ExprKind::Not(self.clone()))
    }

    pub fn binary(op: BinaryOp, lhs: &Expr, rhs: &Expr) -> Self {
        Self::new(ExprKind::Binary {
            op,
            lhs: lhs.clone(),
            rhs: rhs.clone(),
        })
    }

    pub fn compare(op: CmpOp, lhs: &Expr, rhs: &Expr) -> Self {
        Self::new(ExprKind::Compare {
            op,
            lhs: lhs.clone(),
            rhs: rhs.clone(),
        })
    }

    pub fn select(cond: &Expr, on_true: &Expr, on_false: &Expr) -> Self {
        Self::new(ExprKind::Select {
            cond: cond.clone(),
            on_true: on_true.clone(),
            on_false: on_false.clone(),
        })
    }

    pub fn eq(&self, other: &Expr) -> Self {
        Self::compare(CmpOp::Eq, self, other)
    }

    pub fn ne(&self, other: &Expr) -> Self {
        Self::compare(CmpOp::Ne, self, other)
    }

    pub fn ult(&self, other: &Expr) -> Self {
        Self::compare(CmpOp::Ult, self, other)
    }

    pub fn add(&self, other: &Expr) -> Self {
        Self::binary(BinaryOp::Add, self, other)
    }

    pub fn and(&self, other: &Expr) -> Self {
        Self::binary(BinaryOp::And, self, other)
    }

    pub fn or(&self, other: &Expr) -> Self {
        Self::binary(BinaryOp::Or, self, other)
    }

    /// Conjunction of boolean expressions; `true` when empty.
    pub fn and_all<'a, T: IntoIterator<Item = &'a Expr>>(exprs: T) -> Self {
        exprs
            .into_iter()
            .cloned()
            .reduce(|acc, e| acc.and(&e))
            .unwrap_or_else(|| Expr::bool(true))
    }

    /// Logical negation of a boolean expression, pushed through comparisons.
    pub fn negated(&self) -> Self {
        match self.kind() {
            ExprKind::Compare { op, lhs, rhs } => Self::compare(op.negate(), lhs, rhs),
            ExprKind::Not(inner) if inner.width() == BOOL => inner.clone(),
            ExprKind::Constant { value, width } if *width == BOOL => Self::bool(*value == 0),
            _ => self.not(),
        }
    }

    pub fn width(&self) -> Width {
        match self.kind() {
            ExprKind::Constant { width, .. } => *width,
            ExprKind::Read { .. } => BYTE,
            ExprKind::Concat { msb, lsb } => msb.width() + lsb.width(),
            ExprKind::Extract { width, .. } => *width,
            ExprKind::ZExt { width, .. } => *width,
            ExprKind::SExt { width, .. } => *width,
            ExprKind::Not(e) => e.width(),
            ExprKind::Binary { lhs, .. } => lhs.width(),
            ExprKind::Compare { .. } => BOOL,
            ExprKind::Select { on_true, .. } => on_true.width(),
        }
    }

    pub fn children(&self) -> Vec<&Expr> {
        match self.kind() {
            ExprKind::Constant { .. } | ExprKind::Read { .. } => vec![],
            ExprKind::Concat { msb, lsb } => vec![msb, lsb],
            ExprKind::Extract { expr, .. } | ExprKind::ZExt { expr, .. } => vec![expr],
            ExprKind::SExt { expr, .. } => vec![expr],
            ExprKind::Not(e) => vec![e],
            ExprKind::Binary { lhs, rhs, .. } | ExprKind::Compare { lhs, rhs, .. } => {
                vec![lhs, rhs]
            }
            ExprKind::Select {
                cond,
                on_true,
                on_false,
            } => vec![cond, on_true, on_false],
        }
    }

    /// Rebuilds this node with each child replaced by `f(child)`.
    pub fn map_children<F: FnMut(&Expr) -> Expr>(&self, mut f: F) -> Expr {
        match self.kind() {
            ExprKind::Constant { .. } | ExprKind::Read { .. } => self.clone(),
            ExprKind::Concat { msb, lsb } => f(msb).concat(&f(lsb)),
            ExprKind::Extract {
                expr,
                offset,
                width,
            } => Self::new(ExprKind::Extract {
                expr: f(expr),
                offset: *offset,
                width: *width,
            }),
            ExprKind::ZExt { expr, width } => Self::new(ExprKind::ZExt {
                expr: f(expr),
                width: *width,
            }),
            ExprKind::SExt { expr, width } => Self::new(ExprKind::SExt {
                expr: f(expr),
                width: *width,
            }),
            ExprKind::Not(e) => f(e).not(),
            ExprKind::Binary { op, lhs, rhs } => Self::binary(*op, &f(lhs), &f(rhs)),
            ExprKind::Compare { op, lhs, rhs } => Self::compare(*op, &f(lhs), &f(rhs)),
            ExprKind::Select {
                cond,
                on_true,
                on_false,
            } => Self::select(&f(cond), &f(on_true), &f(on_false)),
        }
    }

    fn visit_reads<F: FnMut(&str, u32)>(&self, f: &mut F) {
        if let ExprKind::Read { array, index } = self.kind() {
            f(array, *index);
        }
        for c in self.children() {
            c.visit_reads(f);
        }
    }

    /// Names of every symbolic array this expression reads from.
    pub fn arrays(&self) -> BTreeSet<String> {
        let mut result = BTreeSet::new();
        self.visit_reads(&mut |a, _| {
            result.insert(a.to_string());
        });
        result
    }

    pub fn reads_array(&self, array: &str) -> bool {
        let mut found = false;
        self.visit_reads(&mut |a, _| found |= a == array);
        found
    }

    /// Byte indices read from `array`.
    pub fn read_indices(&self, array: &str) -> BTreeSet<u32> {
        let mut result = BTreeSet::new();
        self.visit_reads(&mut |a, i| {
            if a == array {
                result.insert(i);
            }
        });
        result
    }

    /// The array name when this expression reads from exactly one array.
    pub fn single_array(&self) -> Option<String> {
        let arrays = self.arrays();
        if arrays.len() == 1 {
            arrays.into_iter().next()
        } else {
            None
        }
    }

    /// Simultaneously renames array reads according to `map`.
    pub fn rename_arrays(&self, map: &BTreeMap<String, String>) -> Expr {
        if map.is_empty() {
            return self.clone();
        }
        match self.kind() {
            ExprKind::Read { array, index } => match map.get(array) {
                Some(renamed) => Expr::read(renamed, *index),
                None => self.clone(),
            },
            ExprKind::Constant { .. } => self.clone(),
            _ => self.map_children(|c| c.rename_arrays(map)),
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self.kind(), ExprKind::Constant { .. })
    }

    pub fn as_constant(&self) -> Option<u64> {
        match self.simplify().kind() {
            ExprKind::Constant { value, .. } => Some(*value),
            _ => None,
        }
    }

    pub fn is_true(&self) -> bool {
        self.width() == BOOL && self.as_constant() == Some(1)
    }

    pub fn is_false(&self) -> bool {
        self.width() == BOOL && self.as_constant() == Some(0)
    }

    /// Bottom-up constant folding over every sub-expression of at most 64 bits.
    pub fn simplify(&self) -> Expr {
        match self.kind() {
            ExprKind::Constant { .. } | ExprKind::Read { .. } => self.clone(),
            _ => {
                let folded = self.map_children(|c| c.simplify());
                folded.fold_constants().unwrap_or(folded)
            }
        }
    }

    fn const_operand(&self) -> Option<u64> {
        match self.kind() {
            ExprKind::Constant { value, width } if *width <= 64 => Some(*value),
            _ => None,
        }
    }

    fn fold_constants(&self) -> Option<Expr> {
        let width = self.width();
        if width > 64 {
            return None;
        }
        let value = match self.kind() {
            ExprKind::Concat { msb, lsb } => {
                let (m, l) = (msb.const_operand()?, lsb.const_operand()?);
                (m << lsb.width()) | l
            }
            ExprKind::Extract { expr, offset, .. } => {
                let v = expr.const_operand()?;
                if *offset >= 64 { 0 } else { v >> offset }
            }
            ExprKind::ZExt { expr, .. } => expr.const_operand()?,
            ExprKind::SExt { expr, .. } => sign_extend(expr.const_operand()?, expr.width()) as u64,
            ExprKind::Not(e) => !e.const_operand()?,
            ExprKind::Binary { op, lhs, rhs } => {
                let (a, b) = (lhs.const_operand()?, rhs.const_operand()?);
                let w = lhs.width();
                match op {
                    BinaryOp::Add => a.wrapping_add(b),
                    BinaryOp::Sub => a.wrapping_sub(b),
                    BinaryOp::Mul => a.wrapping_mul(b),
                    BinaryOp::UDiv => a.checked_div(b)?,
                    BinaryOp::SDiv => {
                        sign_extend(a, w).checked_div(sign_extend(b, w))? as u64
                    }
                    BinaryOp::URem => a.checked_rem(b)?,
                    BinaryOp::SRem => {
                        sign_extend(a, w).checked_rem(sign_extend(b, w))? as u64
                    }
                    BinaryOp::And => a & b,
                    BinaryOp::Or => a | b,
                    BinaryOp::Xor => a ^ b,
                    BinaryOp::Shl => a.checked_shl(b as u32).unwrap_or(0),
                    BinaryOp::LShr => a.checked_shr(b as u32).unwrap_or(0),
                    BinaryOp::AShr => {
                        let s = sign_extend(a, w);
                        s.checked_shr(b as u32).unwrap_or(if s < 0 { -1 } else { 0 }) as u64
                    }
                }
            }
            ExprKind::Compare { op, lhs, rhs } => {
                let (a, b) = (lhs.const_operand()?, rhs.const_operand()?);
                let w = lhs.width();
                let (sa, sb) = (sign_extend(a, w), sign_extend(b, w));
                let r = match op {
                    CmpOp::Eq => a == b,
                    CmpOp::Ne => a != b,
                    CmpOp::Ult => a < b,
                    CmpOp::Ule => a <= b,
                    CmpOp::Ugt => a > b,
                    CmpOp::Uge => a >= b,
                    CmpOp::Slt => sa < sb,
                    CmpOp::Sle => sa <= sb,
                    CmpOp::Sgt => sa > sb,
                    CmpOp::Sge => sa >= sb,
                };
                r as u64
            }
            ExprKind::Select {
                cond,
                on_true,
                on_false,
            } => {
                let c = cond.const_operand()?;
                return Some(if c != 0 {
                    on_true.clone()
                } else {
                    on_false.clone()
                });
            }
            ExprKind::Constant { .. } | ExprKind::Read { .. } => return None,
        };
        Some(Expr::constant(value, width))
    }
}

impl Debug for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self}")
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use crate::expr::{BinaryOp, Expr};

    #[test]
    fn test_slice_of_chunk_is_a_read() {
        let chunk = Expr::read_lsb("packet_chunks", 0, 6);
        assert_eq!(chunk.slice(8, 32), Expr::read_lsb("packet_chunks", 1, 4));
        assert_eq!(chunk.slice(0, 8), Expr::read("packet_chunks", 0));
        assert_eq!(chunk.slice(0, 48), chunk);
        let v = Expr::constant(0xabcd, 16);
        assert_eq!(v.slice(8, 8).simplify(), Expr::constant(0xab, 8));
    }

    #[test]
    fn test_read_lsb_layout() {
        let e = Expr::read_lsb("packet_chunks", 12, 2);
        assert_eq!(e.width(), 16);
        assert_eq!(
            e,
            Expr::read("packet_chunks", 13).concat(&Expr::read("packet_chunks", 12))
        );
        let indices: Vec<u32> = e.read_indices("packet_chunks").into_iter().collect();
        assert_eq!(indices, vec![12, 13]);
    }

    #[test]
    fn test_constant_folding() {
        let a = Expr::constant(0xff, 8);
        let b = Expr::constant(1, 8);
        assert_eq!(Expr::binary(BinaryOp::Add, &a, &b).as_constant(), Some(0));
        assert_eq!(a.concat(&b).as_constant(), Some(0xff01));
        assert!(a.eq(&a).is_true());
        assert!(a.ult(&b).is_false());
        let sym = Expr::read("x", 0);
        assert_eq!(sym.add(&b).as_constant(), None);
    }

    #[test]
    fn test_rename_arrays() {
        let e = Expr::read_lsb("map_has_this_key__1", 0, 4).eq(&Expr::constant(0, 32));
        let map = BTreeMap::from([(
            "map_has_this_key__1".to_string(),
            "map_has_this_key".to_string(),
        )]);
        let renamed = e.rename_arrays(&map);
        assert!(renamed.reads_array("map_has_this_key"));
        assert!(!renamed.reads_array("map_has_this_key__1"));
        assert_eq!(renamed.single_array().as_deref(), Some("map_has_this_key"));
    }

    #[test]
    fn test_negation() {
        let x = Expr::read("x", 0);
        let c = x.eq(&Expr::constant(3, 8));
        assert_eq!(c.negated(), x.ne(&Expr::constant(3, 8)));
        assert_eq!(c.negated().negated(), c);
    }
}
