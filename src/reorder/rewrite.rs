use std::collections::BTreeMap;

use tracing::{Level, event};

use crate::bdd::{Bdd, Node, NodeId, NodeKind};
use crate::error::SynapseError;
use crate::expr::{ConstraintSet, SolverToolbox};
use crate::reorder::candidate::{Anchor, Candidate};
use crate::symbol::{SymbolFactory, is_translatable, rename_symbols};

/// A diagram produced by one hoist.
#[derive(Clone, Debug)]
pub struct ReorderedBdd {
    pub bdd: Bdd,
    pub anchor: Anchor,
    /// The node now right after the anchor: the hoisted node, or the guard
    /// branch in front of it.
    pub candidate: NodeId,
    pub guarded: bool,
}

/// Relabels the symbols `id` produces to `base@tag`, at `id` and below.
fn tag_symbols(bdd: &mut Bdd, id: NodeId, tag: NodeId) -> Result<(), SynapseError> {
    let node = bdd.node(id)?;
    let Some(call) = node.call() else {
        return Ok(());
    };
    let mut map = BTreeMap::new();
    for s in SymbolFactory::new(None).process(call, false, &node.constraints)? {
        if is_translatable(&s.label_base) {
            map.insert(s.label, format!("{}@{tag}", s.label_base));
        }
    }
    bdd.rename_arrays_below(id, &map);
    Ok(())
}

fn successor(bdd: &Bdd, id: NodeId, direction: bool) -> Result<NodeId, SynapseError> {
    match &bdd.node(id)?.kind {
        NodeKind::Call { next, .. } => Ok(*next),
        NodeKind::Branch {
            on_true, on_false, ..
        } => Ok(if direction { *on_true } else { *on_false }),
        _ => Err(SynapseError::invariant(format!("node {id} has no successor"))),
    }
}

/// Keeps only the path entries of the subtree that `keep` accepts.
fn retain_paths<F>(bdd: &mut Bdd, root: NodeId, mut keep: F) -> Result<(), SynapseError>
where
    F: FnMut(&ConstraintSet) -> bool,
{
    for id in bdd.descendants(root) {
        let node = bdd.node_mut(id)?;
        let (filenames, constraints): (Vec<String>, Vec<_>) = node
            .filenames
            .drain(..)
            .zip(node.constraints.drain(..))
            .filter(|(_, c)| keep(c))
            .unzip();
        node.filenames = filenames;
        node.constraints = constraints;
    }
    Ok(())
}

/// Hoists `candidate` right after `anchor` in a copy of `bdd`.
pub fn reorder(
    bdd: &Bdd,
    anchor: Anchor,
    candidate: &Candidate,
    solver: &SolverToolbox,
) -> Result<ReorderedBdd, SynapseError> {
    let mut out = bdd.clone();
    let next = anchor
        .next(&out)?
        .ok_or_else(|| SynapseError::invariant(format!("anchor {} has no successor", anchor.node)))?;
    let (filenames, constraints) = {
        let n = out.node(next)?;
        (n.filenames.clone(), n.constraints.clone())
    };
    let target = out.node(candidate.node)?.clone();
    let hoisted_id = out.fresh_id();
    let (head, guarded) = match &target.kind {
        NodeKind::Call { .. } => {
            let fallback = match &candidate.condition {
                Some(_) => Some(out.clone_subtree(next)?),
                None => None,
            };
            for id in std::iter::once(candidate.node).chain(candidate.siblings.iter().copied()) {
                tag_symbols(&mut out, id, hoisted_id)?;
            }
            let hoisted_call = out
                .node(candidate.node)?
                .call()
                .cloned()
                .ok_or_else(|| SynapseError::invariant("hoisted call vanished"))?;
            for id in std::iter::once(candidate.node).chain(candidate.siblings.iter().copied()) {
                let keep = successor(&out, id, true)?;
                out.short_circuit(id, keep)?;
            }
            let mut hoisted = Node::new(
                hoisted_id,
                NodeKind::Call {
                    call: hoisted_call,
                    next,
                },
            )
            .with_paths(filenames.clone(), constraints.clone());
            hoisted.provenance = Some(target.provenance.unwrap_or(target.id));
            out.insert(hoisted);
            match (&candidate.condition, fallback) {
                (Some(condition), Some(fallback)) => {
                    let guard = out.fresh_id();
                    out.insert(
                        Node::new(
                            guard,
                            NodeKind::Branch {
                                condition: condition.clone(),
                                on_true: hoisted_id,
                                on_false: fallback,
                            },
                        )
                        .with_paths(filenames, constraints),
                    );
                    (guard, true)
                }
                _ => (hoisted_id, false),
            }
        }
        NodeKind::Branch { condition, .. } => {
            let (t_root, t_map) = out.clone_subtree_mapped(next)?;
            let (f_root, f_map) = out.clone_subtree_mapped(next)?;
            for id in std::iter::once(candidate.node).chain(candidate.siblings.iter().copied()) {
                let (t, f) = (t_map[&id], f_map[&id]);
                let keep = successor(&out, t, true)?;
                out.short_circuit(t, keep)?;
                let keep = successor(&out, f, false)?;
                out.short_circuit(f, keep)?;
            }
            retain_paths(&mut out, t_root, |c| solver.is_possible(c, condition))?;
            let negated = condition.negated();
            retain_paths(&mut out, f_root, |c| solver.is_possible(c, &negated))?;
            out.remove_subtree(next);
            let mut branch = Node::new(
                hoisted_id,
                NodeKind::Branch {
                    condition: condition.clone(),
                    on_true: t_root,
                    on_false: f_root,
                },
            )
            .with_paths(filenames, constraints);
            branch.provenance = Some(target.provenance.unwrap_or(target.id));
            out.insert(branch);
            (hoisted_id, false)
        }
        _ => {
            return Err(SynapseError::invariant(format!(
                "terminal {} cannot be hoisted",
                candidate.node
            )));
        }
    };
    out.relink(Some(anchor.node), next, head)?;
    rename_symbols(&mut out, None)?;
    out.check_invariants()?;
    event!(
        Level::DEBUG,
        "Hoisted node {} after {}{}",
        candidate.node,
        anchor.node,
        if guarded { " under a guard" } else { "" }
    );
    Ok(ReorderedBdd {
        bdd: out,
        anchor,
        candidate: head,
        guarded,
    })
}
