use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

use crate::expr::Expr;

/// An immutable conjunction of boolean expressions. Duplicates are dropped on
/// construction; mutation is by rebuilding.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConstraintSet {
    exprs: Vec<Expr>,
}

impl ConstraintSet {
    pub fn new<T: IntoIterator<Item = Expr>>(exprs: T) -> Self {
        let mut seen = BTreeSet::new();
        let exprs = exprs
            .into_iter()
            .filter(|e| !e.is_true())
            .filter(|e| seen.insert(e.clone()))
            .collect();
        Self { exprs }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.exprs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exprs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Expr> {
        self.exprs.iter()
    }

    pub fn contains(&self, e: &Expr) -> bool {
        self.exprs.contains(e)
    }

    pub fn with(&self, e: Expr) -> Self {
        Self::new(self.exprs.iter().cloned().chain(std::iter::once(e)))
    }

    pub fn union(&self, other: &ConstraintSet) -> Self {
        Self::new(self.exprs.iter().chain(other.exprs.iter()).cloned())
    }

    pub fn filter<F: FnMut(&Expr) -> bool>(&self, mut f: F) -> Self {
        Self {
            exprs: self.exprs.iter().filter(|e| f(e)).cloned().collect(),
        }
    }

    pub fn rename_arrays(&self, map: &BTreeMap<String, String>) -> Self {
        Self::new(self.exprs.iter().map(|e| e.rename_arrays(map)))
    }

    /// Every array name referenced by any clause.
    pub fn arrays(&self) -> BTreeSet<String> {
        self.exprs.iter().flat_map(|e| e.arrays()).collect()
    }

    pub fn conjunction(&self) -> Expr {
        Expr::and_all(&self.exprs)
    }
}

impl FromIterator<Expr> for ConstraintSet {
    fn from_iter<T: IntoIterator<Item = Expr>>(iter: T) -> Self {
        Self::new(iter)
    }
}

impl<'a> IntoIterator for &'a ConstraintSet {
    type Item = &'a Expr;
    type IntoIter = std::slice::Iter<'a, Expr>;

    fn into_iter(self) -> Self::IntoIter {
        self.exprs.iter()
    }
}

impl Display for ConstraintSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{{")?;
        for e in &self.exprs {
            writeln!(f, "  {e}")?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use crate::expr::{ConstraintSet, Expr};

    #[test]
    fn test_dedup_and_trivial() {
        let a = Expr::read("a", 0).eq(&Expr::constant(1, 8));
        let cs = ConstraintSet::new([a.clone(), Expr::bool(true), a.clone()]);
        assert_eq!(cs.len(), 1);
        assert!(cs.contains(&a));
        assert_eq!(cs.arrays().into_iter().collect::<Vec<_>>(), vec!["a"]);
    }
}
