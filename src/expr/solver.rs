use std::cell::RefCell;
use std::collections::HashMap;

use tracing::{Level, event};
use z3::ast::{BV, Bool};
use z3::{SatResult, Solver};

use crate::expr::{BOOL, BinaryOp, CmpOp, ConstraintSet, Expr, ExprKind};

/// Answers satisfiability questions about [`Expr`]s by lowering them to z3
/// bit-vectors. Every symbolic byte `Read(a, i)` becomes the 8-bit constant
/// `a[i]`, so two reads of the same array/index are the same solver variable.
///
/// Solver answers of `unknown` are never treated as proofs: every query that
/// needs one returns `false` instead.
#[derive(Debug, Default)]
pub struct SolverToolbox {
    cache: RefCell<HashMap<Vec<Expr>, Option<bool>>>,
}

fn lower(e: &Expr) -> BV {
    match e.kind() {
        ExprKind::Constant { value, width } => BV::from_u64(*value, *width),
        ExprKind::Read { array, index } => BV::new_const(format!("{array}[{index}]"), 8),
        ExprKind::Concat { msb, lsb } => lower(msb).concat(&lower(lsb)),
        ExprKind::Extract {
            expr,
            offset,
            width,
        } => lower(expr).extract(offset + width - 1, *offset),
        ExprKind::ZExt { expr, width } => lower(expr).zero_ext(width - expr.width()),
        ExprKind::SExt { expr, width } => lower(expr).sign_ext(width - expr.width()),
        ExprKind::Not(inner) => lower(inner).bvnot(),
        ExprKind::Binary { op, lhs, rhs } => {
            let (a, b) = (lower(lhs), lower(rhs));
            match op {
                BinaryOp::Add => a.bvadd(&b),
                BinaryOp::Sub => a.bvsub(&b),
                BinaryOp::Mul => a.bvmul(&b),
                BinaryOp::UDiv => a.bvudiv(&b),
                BinaryOp::SDiv => a.bvsdiv(&b),
                BinaryOp::URem => a.bvurem(&b),
                BinaryOp::SRem => a.bvsrem(&b),
                BinaryOp::And => a.bvand(&b),
                BinaryOp::Or => a.bvor(&b),
                BinaryOp::Xor => a.bvxor(&b),
                BinaryOp::Shl => a.bvshl(&b),
                BinaryOp::LShr => a.bvlshr(&b),
                BinaryOp::AShr => a.bvashr(&b),
            }
        }
        ExprKind::Compare { .. } => bool_to_bv(&lower_bool(e)),
        ExprKind::Select {
            cond,
            on_true,
            on_false,
        } => lower_bool(cond).ite(&lower(on_true), &lower(on_false)),
    }
}

fn bool_to_bv(b: &Bool) -> BV {
    b.ite(&BV::from_u64(1, BOOL), &BV::from_u64(0, BOOL))
}

fn lower_bool(e: &Expr) -> Bool {
    match e.kind() {
        ExprKind::Compare { op, lhs, rhs } => {
            let (a, b) = (lower(lhs), lower(rhs));
            match op {
                CmpOp::Eq => a.eq(&b),
                CmpOp::Ne => a.eq(&b).not(),
                CmpOp::Ult => a.bvult(&b),
                CmpOp::Ule => a.bvule(&b),
                CmpOp::Ugt => a.bvugt(&b),
                CmpOp::Uge => a.bvuge(&b),
                CmpOp::Slt => a.bvslt(&b),
                CmpOp::Sle => a.bvsle(&b),
                CmpOp::Sgt => a.bvsgt(&b),
                CmpOp::Sge => a.bvsge(&b),
            }
        }
        ExprKind::Constant { value, .. } => Bool::from_bool(*value != 0),
        _ => {
            let bv = lower(e);
            let zero = BV::from_u64(0, e.width());
            bv.eq(&zero).not()
        }
    }
}

impl SolverToolbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn check(&self, exprs: &[&Expr]) -> Option<bool> {
        let mut key: Vec<Expr> = exprs.iter().map(|e| e.simplify()).collect();
        if key.iter().any(|e| e.is_false()) {
            return Some(false);
        }
        key.retain(|e| !e.is_true());
        key.sort();
        key.dedup();
        if key.is_empty() {
            return Some(true);
        }
        if let Some(r) = self.cache.borrow().get(&key) {
            return *r;
        }
        let solver = Solver::new();
        for e in &key {
            solver.assert(&lower_bool(e));
        }
        let result = match solver.check() {
            SatResult::Sat => Some(true),
            SatResult::Unsat => Some(false),
            SatResult::Unknown => {
                event!(Level::WARN, "Solver returned unknown for {} clauses", key.len());
                None
            }
        };
        self.cache.borrow_mut().insert(key, result);
        result
    }

    fn check_with(&self, sets: &[&ConstraintSet], extra: &[&Expr]) -> Option<bool> {
        let all: Vec<&Expr> = sets
            .iter()
            .flat_map(|s| s.iter())
            .chain(extra.iter().copied())
            .collect();
        self.check(&all)
    }

    pub fn is_satisfiable(&self, constraints: &ConstraintSet) -> bool {
        self.check_with(&[constraints], &[]) == Some(true)
    }

    /// Whether `e` may hold under `constraints`.
    pub fn is_possible(&self, constraints: &ConstraintSet, e: &Expr) -> bool {
        self.check_with(&[constraints], &[e]) == Some(true)
    }

    /// Whether `e` holds in every model of `constraints`; vacuously true when
    /// the constraints are unsatisfiable.
    pub fn is_always_true(&self, constraints: &ConstraintSet, e: &Expr) -> bool {
        let neg = e.negated();
        self.check_with(&[constraints], &[&neg]) == Some(false)
    }

    pub fn is_always_false(&self, constraints: &ConstraintSet, e: &Expr) -> bool {
        self.check_with(&[constraints], &[e]) == Some(false)
    }

    /// The satisfiable members of `sets`, or `None` if a solver answer was unknown.
    fn live_sets<'a>(&self, sets: &[&'a ConstraintSet]) -> Option<Vec<&'a ConstraintSet>> {
        let mut live = vec![];
        for s in sets {
            match self.check_with(&[*s], &[]) {
                Some(true) => live.push(*s),
                Some(false) => {}
                None => return None,
            }
        }
        Some(live)
    }

    /// `a == b` in every model of the disjunction of `sets`. Returns `false`
    /// when the widths differ or no set is satisfiable.
    pub fn always_equal(&self, a: &Expr, b: &Expr, sets: &[&ConstraintSet]) -> bool {
        if a.width() != b.width() {
            return false;
        }
        let Some(live) = self.live_sets(sets) else {
            return false;
        };
        if live.is_empty() {
            return false;
        }
        if a == b {
            return true;
        }
        let ne = a.ne(b);
        live.iter()
            .all(|s| self.check_with(&[*s], &[&ne]) == Some(false))
    }

    /// `a != b` in every model of the disjunction of `sets`.
    pub fn always_not_equal(&self, a: &Expr, b: &Expr, sets: &[&ConstraintSet]) -> bool {
        if a.width() != b.width() || a == b {
            return false;
        }
        let Some(live) = self.live_sets(sets) else {
            return false;
        };
        if live.is_empty() {
            return false;
        }
        let eq = a.eq(b);
        live.iter()
            .all(|s| self.check_with(&[*s], &[&eq]) == Some(false))
    }

    /// Whether the conjunction of the two sets has a model.
    pub fn constraints_compatible(&self, a: &ConstraintSet, b: &ConstraintSet) -> bool {
        self.check_with(&[a, b], &[]) == Some(true)
    }

    /// Whether `e` is provably nonzero under `constraints`.
    pub fn is_always_nonzero(&self, constraints: &ConstraintSet, e: &Expr) -> bool {
        let zero = Expr::constant(0, e.width());
        self.always_not_equal(e, &zero, &[constraints])
    }

    /// A concrete value of `e` from some model of `constraints`.
    pub fn value_from_expr(&self, constraints: &ConstraintSet, e: &Expr) -> Option<u64> {
        if let Some(v) = e.as_constant() {
            return Some(v);
        }
        if e.width() > 64 {
            return None;
        }
        let solver = Solver::new();
        for c in constraints {
            solver.assert(&lower_bool(c));
        }
        match solver.check() {
            SatResult::Sat => {
                let model = solver.get_model()?;
                model.eval(&lower(e), true).and_then(|v| v.as_u64())
            }
            _ => None,
        }
    }

    pub fn cached_queries(&self) -> usize {
        self.cache.borrow().len()
    }
}

#[cfg(test)]
mod tests {
    use crate::expr::{ConstraintSet, Expr, SolverToolbox};

    fn x() -> Expr {
        Expr::read_lsb("x", 0, 4)
    }

    fn c32(v: u64) -> Expr {
        Expr::constant(v, 32)
    }

    #[test]
    fn test_always_equal_under_constraints() {
        let s = SolverToolbox::new();
        let cs = ConstraintSet::new([x().eq(&c32(5))]);
        assert!(s.always_equal(&x(), &c32(5), &[&cs]));
        assert!(!s.always_not_equal(&x(), &c32(5), &[&cs]));
        assert!(s.always_not_equal(&x(), &c32(6), &[&cs]));
        let free = ConstraintSet::empty();
        assert!(!s.always_equal(&x(), &c32(5), &[&free]));
        assert!(!s.always_not_equal(&x(), &c32(5), &[&free]));
    }

    #[test]
    fn test_disjunction_of_sets() {
        let s = SolverToolbox::new();
        let a = ConstraintSet::new([x().eq(&c32(1))]);
        let b = ConstraintSet::new([x().eq(&c32(2))]);
        assert!(!s.constraints_compatible(&a, &b));
        assert!(s.always_not_equal(&x(), &c32(3), &[&a, &b]));
        assert!(!s.always_equal(&x(), &c32(1), &[&a, &b]));
        assert!(!s.always_not_equal(&x(), &c32(1), &[&a, &b]));
    }

    #[test]
    fn test_vacuous_pair_is_false() {
        let s = SolverToolbox::new();
        let dead = ConstraintSet::new([x().eq(&c32(1)), x().eq(&c32(2))]);
        assert!(!s.is_satisfiable(&dead));
        assert!(!s.always_equal(&x(), &x(), &[&dead, &dead]));
        assert!(!s.always_not_equal(&x(), &c32(3), &[&dead]));
    }

    #[test]
    fn test_truth_queries() {
        let s = SolverToolbox::new();
        let cs = ConstraintSet::new([x().ult(&c32(10))]);
        assert!(s.is_always_true(&cs, &x().ult(&c32(11))));
        assert!(s.is_always_false(&cs, &x().eq(&c32(12))));
        assert!(s.is_possible(&cs, &x().eq(&c32(3))));
        assert!(s.is_always_nonzero(&ConstraintSet::new([x().ne(&c32(0))]), &x()));
        let before = s.cached_queries();
        assert!(s.is_always_true(&cs, &x().ult(&c32(11))));
        assert_eq!(before, s.cached_queries());
    }

    #[test]
    fn test_model_value() {
        let s = SolverToolbox::new();
        let cs = ConstraintSet::new([x().eq(&c32(42))]);
        assert_eq!(s.value_from_expr(&cs, &x()), Some(42));
        assert_eq!(s.value_from_expr(&cs, &c32(7)), Some(7));
    }
}
