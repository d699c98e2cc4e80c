use std::collections::BTreeMap;

use tracing::{Level, event, instrument};

use crate::bdd::{Bdd, NodeId, NodeKind};
use crate::error::SynapseError;
use crate::expr::SolverToolbox;
use crate::symbol::{SymbolFactory, is_translatable};

/// Relabels every symbol of both trees so that labels follow the scoped
/// counter order (`base`, `base__1`, ...) along each path.
#[instrument(skip_all)]
pub fn rename_symbols(bdd: &mut Bdd, solver: Option<&SolverToolbox>) -> Result<(), SynapseError> {
    for root in [bdd.init, bdd.process] {
        relabel(bdd, root, &mut SymbolFactory::new(solver))?;
    }
    Ok(())
}

/// Relabels the symbols produced at `node` and below so they continue the
/// counter state reached by `node`'s ancestors.
pub fn translate(
    bdd: &mut Bdd,
    node: NodeId,
    solver: Option<&SolverToolbox>,
) -> Result<(), SynapseError> {
    let mut factory = SymbolFactory::new(solver);
    for a in bdd.ancestors(node) {
        let n = bdd.node(a)?;
        if let Some(call) = n.call() {
            factory.process(call, true, &n.constraints)?;
        }
    }
    relabel(bdd, node, &mut factory)
}

/// Gives every translatable symbol of both trees the temporary label
/// `base@(id + offset)` of its producer. Used to keep a diagram's symbols
/// apart from another diagram's before the two are combined.
pub fn rename_apart(bdd: &mut Bdd, offset: NodeId) -> Result<(), SynapseError> {
    for root in [bdd.init, bdd.process] {
        temporaries(bdd, root, &mut SymbolFactory::new(None), offset)?;
    }
    Ok(())
}

fn relabel(bdd: &mut Bdd, root: NodeId, factory: &mut SymbolFactory) -> Result<(), SynapseError> {
    // Unique per-producer temporaries first, so the final renames never alias.
    temporaries(bdd, root, factory, 0)?;
    assign(bdd, root, factory)
}

fn temporaries(
    bdd: &mut Bdd,
    root: NodeId,
    factory: &mut SymbolFactory,
    offset: NodeId,
) -> Result<(), SynapseError> {
    for id in bdd.descendants(root) {
        let n = bdd.node(id)?;
        let Some(call) = n.call() else { continue };
        let mut map = BTreeMap::new();
        for s in factory.process(call, false, &n.constraints)? {
            if !is_translatable(&s.label_base) {
                continue;
            }
            let temp = format!("{}@{}", s.label_base, id + offset);
            if s.label != temp {
                map.insert(s.label, temp);
            }
        }
        bdd.rename_arrays_below(id, &map);
    }
    Ok(())
}

fn assign(bdd: &mut Bdd, start: NodeId, factory: &mut SymbolFactory) -> Result<(), SynapseError> {
    let mut cur = start;
    loop {
        let n = bdd.node(cur)?;
        match &n.kind {
            NodeKind::Call { call, next } => {
                let next = *next;
                let call = call.clone();
                let constraints = n.constraints.clone();
                let old = factory.labels(&call, &constraints)?;
                let new = factory.process(&call, true, &constraints)?;
                let map: BTreeMap<String, String> = old
                    .into_iter()
                    .zip(new)
                    .filter(|(o, s)| *o != s.label)
                    .map(|(o, s)| (o, s.label))
                    .collect();
                if !map.is_empty() {
                    event!(Level::TRACE, "node {cur}: {:?}", map);
                }
                bdd.rename_arrays_below(cur, &map);
                cur = next;
            }
            NodeKind::Branch {
                on_true, on_false, ..
            } => {
                let (t, f) = (*on_true, *on_false);
                {
                    let mut scope = factory.scope();
                    assign(bdd, t, &mut scope)?;
                }
                let mut scope = factory.scope();
                return assign(bdd, f, &mut scope);
            }
            _ => return Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::bdd::tests::chain;
    use crate::bdd::{Bdd, NodeKind, ReturnOp};
    use crate::call_path::Call;
    use crate::expr::Expr;
    use crate::symbol::{rename_apart, rename_symbols, translate};

    fn now(label: &str) -> Call {
        Call::new("current_time").with_ret(Expr::read_lsb(label, 0, 8))
    }

    fn labels(bdd: &Bdd) -> Vec<String> {
        bdd.descendants(bdd.process)
            .into_iter()
            .filter_map(|id| match &bdd.get(id)?.kind {
                NodeKind::Call { call, .. } => call.ret.as_ref()?.single_array(),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_rename_is_counter_consistent_and_idempotent() {
        let mut bdd = chain(vec![now("b"), now("a"), now("next_time")], ReturnOp::Drop, 0);
        rename_symbols(&mut bdd, None).unwrap();
        assert_eq!(labels(&bdd), vec!["next_time", "next_time__1", "next_time__2"]);
        let once = bdd.clone();
        rename_symbols(&mut bdd, None).unwrap();
        assert!(bdd.equivalent(&once));
    }

    #[test]
    fn test_translate_continues_ancestor_counters() {
        let mut bdd = chain(vec![now("next_time"), now("zzz")], ReturnOp::Drop, 0);
        let second = bdd.successors(bdd.process)[0];
        translate(&mut bdd, second, None).unwrap();
        assert_eq!(labels(&bdd), vec!["next_time", "next_time__1"]);
    }

    #[test]
    fn test_rename_apart_then_back() {
        let mut bdd = chain(vec![now("next_time"), now("next_time__1")], ReturnOp::Drop, 0);
        let original = bdd.clone();
        rename_apart(&mut bdd, 100).unwrap();
        assert_eq!(labels(&bdd), vec!["next_time@101", "next_time@102"]);
        rename_symbols(&mut bdd, None).unwrap();
        assert!(bdd.equivalent(&original));
    }
}
