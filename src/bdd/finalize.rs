use std::collections::BTreeSet;

use tracing::{Level, event, instrument};

use crate::bdd::{Bdd, NodeId};
use crate::error::SynapseError;
use crate::expr::SolverToolbox;
use crate::symbol::{AMBIENT_SYMBOLS, IGNORED_SYMBOLS, SymbolFactory, rename_symbols};

impl Bdd {
    /// Relabels symbols, trims constraints and checks the result.
    #[instrument(skip_all)]
    pub fn finalize(&mut self, solver: &SolverToolbox) -> Result<(), SynapseError> {
        rename_symbols(self, Some(solver))?;
        self.trim_constraints()?;
        self.check_invariants()
    }

    /// Drops every constraint clause that mentions a symbol no ancestor of its
    /// node produces.
    #[instrument(skip_all)]
    pub fn trim_constraints(&mut self) -> Result<(), SynapseError> {
        let ambient: BTreeSet<String> = AMBIENT_SYMBOLS
            .iter()
            .chain(IGNORED_SYMBOLS)
            .map(|s| s.to_string())
            .collect();
        let mut factory = SymbolFactory::new(None);
        let mut dropped = 0usize;
        for root in [self.init, self.process] {
            let mut stack: Vec<(NodeId, BTreeSet<String>)> = vec![(root, ambient.clone())];
            while let Some((id, available)) = stack.pop() {
                let node = self.node_mut(id)?;
                for set in node.constraints.iter_mut() {
                    let before = set.len();
                    *set = set.filter(|e| e.arrays().is_subset(&available));
                    dropped += before - set.len();
                }
                let node = self.node(id)?;
                let mut produced = available;
                if let Some(call) = node.call() {
                    produced.extend(factory.labels(call, &node.constraints)?);
                }
                for s in node.successors() {
                    stack.push((s, produced.clone()));
                }
            }
        }
        event!(Level::DEBUG, "Trimmed {dropped} constraint clauses");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::bdd::BddBuilder;
    use crate::bdd::builder::tests::scenario_path;
    use crate::expr::{Expr, SolverToolbox};
    use crate::symbol::rename_symbols;

    #[test]
    fn test_trim_and_rename_idempotent() {
        let s = SolverToolbox::new();
        let mut cp = scenario_path();
        cp.constraints = cp
            .constraints
            .with(Expr::read_lsb("next_time", 0, 8).ult(&Expr::constant(100, 64)));
        let mut bdd = BddBuilder::new("nf", &s).build(&[cp]).unwrap();
        let leaf = bdd.leaves(bdd.process)[0];
        assert_eq!(bdd.get(leaf).unwrap().constraints[0].len(), 1);
        assert_eq!(bdd.get(bdd.process).unwrap().constraints[0].len(), 0);
        let once = bdd.clone();
        bdd.trim_constraints().unwrap();
        assert!(bdd.equivalent(&once));
        rename_symbols(&mut bdd, Some(&s)).unwrap();
        assert!(bdd.equivalent(&once));
    }
}
