use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};

use crate::call_path::Call;
use crate::error::SynapseError;
use crate::expr::{ConstraintSet, SolverToolbox};
use crate::symbol::table::{ProductionContext, produced};
use crate::symbol::{Symbol, is_translatable, nth_label};

/// Hands out counter-consistent labels for the symbols calls produce. Counters
/// are kept on a stack of scopes so that both sides of a branch number their
/// symbols from the same starting point.
pub struct SymbolFactory<'s> {
    solver: Option<&'s SolverToolbox>,
    stack: Vec<BTreeMap<String, usize>>,
}

/// Pops the scope it was created for when dropped.
pub struct ScopeGuard<'f, 's> {
    factory: &'f mut SymbolFactory<'s>,
}

impl<'s> Deref for ScopeGuard<'_, 's> {
    type Target = SymbolFactory<'s>;

    fn deref(&self) -> &Self::Target {
        self.factory
    }
}

impl DerefMut for ScopeGuard<'_, '_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.factory
    }
}

impl Drop for ScopeGuard<'_, '_> {
    fn drop(&mut self) {
        self.factory.pop();
    }
}

impl<'s> SymbolFactory<'s> {
    pub fn new(solver: Option<&'s SolverToolbox>) -> Self {
        Self {
            solver,
            stack: vec![BTreeMap::new()],
        }
    }

    pub fn push(&mut self) {
        self.stack.push(BTreeMap::new());
    }

    pub fn pop(&mut self) {
        if self.stack.len() > 1 {
            self.stack.pop();
        }
    }

    /// Opens a scope that lasts as long as the returned guard.
    pub fn scope(&mut self) -> ScopeGuard<'_, 's> {
        self.push();
        ScopeGuard { factory: self }
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// How many labels of `base` are visible in the current scope.
    pub fn count(&self, base: &str) -> usize {
        self.stack.iter().filter_map(|s| s.get(base)).sum()
    }

    /// The label the next producer of `base` would receive.
    pub fn next_label(&self, base: &str) -> String {
        nth_label(base, self.count(base))
    }

    fn assign(&mut self, base: &str) -> String {
        let label = self.next_label(base);
        if let Some(top) = self.stack.last_mut() {
            *top.entry(base.to_string()).or_default() += 1;
        }
        label
    }

    /// Symbols produced by `call`. With `save`, each translatable symbol is
    /// given the next counter-consistent label (its expression rewritten to
    /// match) and the counter advances; otherwise labels are read off the
    /// expressions as they are.
    pub fn process(
        &mut self,
        call: &Call,
        save: bool,
        constraints: &[ConstraintSet],
    ) -> Result<Vec<Symbol>, SynapseError> {
        let ctx = ProductionContext {
            constraints,
            solver: self.solver,
        };
        let mut symbols = vec![];
        for p in produced(call, &ctx)? {
            let Some(current) = p.expr.single_array() else {
                continue;
            };
            if !save || !is_translatable(p.base) {
                symbols.push(Symbol {
                    label_base: p.base.to_string(),
                    label: current,
                    expr: p.expr,
                    addr: p.addr,
                });
                continue;
            }
            let label = self.assign(p.base);
            let map = BTreeMap::from([(current, label.clone())]);
            symbols.push(Symbol {
                label_base: p.base.to_string(),
                label,
                expr: p.expr.rename_arrays(&map),
                addr: p.addr,
            });
        }
        Ok(symbols)
    }

    /// Labels `call` produces as they currently appear in its expressions.
    pub fn labels(
        &mut self,
        call: &Call,
        constraints: &[ConstraintSet],
    ) -> Result<Vec<String>, SynapseError> {
        Ok(self
            .process(call, false, constraints)?
            .into_iter()
            .map(|s| s.label)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use crate::call_path::Call;
    use crate::expr::Expr;
    use crate::symbol::SymbolFactory;

    fn now(label: &str) -> Call {
        Call::new("current_time").with_ret(Expr::read_lsb(label, 0, 8))
    }

    #[test]
    fn test_scoped_labels() {
        let mut f = SymbolFactory::new(None);
        let s = f.process(&now("t_a"), true, &[]).unwrap();
        assert_eq!(s[0].label, "next_time");
        assert!(s[0].expr.reads_array("next_time"));
        {
            let mut g = f.scope();
            assert_eq!(g.process(&now("t_b"), true, &[]).unwrap()[0].label, "next_time__1");
            assert_eq!(g.depth(), 2);
        }
        assert_eq!(f.depth(), 1);
        assert_eq!(f.next_label("next_time"), "next_time__1");
        let pure = f.process(&now("t_c"), false, &[]).unwrap();
        assert_eq!(pure[0].label, "t_c");
        assert_eq!(f.count("next_time"), 1);
    }

    #[test]
    fn test_packet_chunks_keep_label() {
        let mut f = SymbolFactory::new(None);
        let borrow = Call::new("packet_borrow_next_chunk")
            .with_extra("the_chunk", None, Some(Expr::read_lsb("packet_chunks", 0, 14)));
        let s = f.process(&borrow, true, &[]).unwrap();
        assert_eq!(s[0].label, "packet_chunks");
        assert_eq!(f.count("packet_chunks"), 0);
    }
}
