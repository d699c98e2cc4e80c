use std::collections::BTreeSet;

use tracing::{Level, event};

use crate::bdd::{Bdd, Node, NodeId, NodeKind};
use crate::call_path::functions::{
    CURRENT_TIME, NF_SET_RTE_IPV4_UDPTCP_CHECKSUM, PACKET_BORROW_NEXT_CHUNK, PACKET_RETURN_CHUNK,
};
use crate::error::SynapseError;
use crate::expr::{Expr, SolverToolbox};
use crate::reorder::dependency::{Commutes, commutes};
use crate::symbol::table::has_side_effects;
use crate::symbol::{AMBIENT_SYMBOLS, PACKET_CHUNKS, SymbolFactory, dependencies};

/// Calls that stay where the symbolic executor saw them.
pub const CANNOT_REORDER: &[&str] = &[
    CURRENT_TIME,
    PACKET_RETURN_CHUNK,
    NF_SET_RTE_IPV4_UDPTCP_CHECKSUM,
];

/// The edge a candidate is hoisted onto: right after `node`, on the
/// `direction` side when `node` is a branch.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Anchor {
    pub node: NodeId,
    pub direction: bool,
}

impl Anchor {
    pub fn new(node: NodeId) -> Self {
        Self {
            node,
            direction: true,
        }
    }

    pub fn with_direction(node: NodeId, direction: bool) -> Self {
        Self { node, direction }
    }

    /// The node currently following the anchor, if any.
    pub fn next(&self, bdd: &Bdd) -> Result<Option<NodeId>, SynapseError> {
        Ok(match &bdd.node(self.node)?.kind {
            NodeKind::Call { next, .. } => Some(*next),
            NodeKind::Branch {
                on_true, on_false, ..
            } => Some(if self.direction { *on_true } else { *on_false }),
            _ => None,
        })
    }

    /// Anchors covering every edge out of `id`.
    pub fn at(bdd: &Bdd, id: NodeId) -> Vec<Anchor> {
        match bdd.get(id).map(|n| &n.kind) {
            Some(NodeKind::Call { .. }) => vec![Anchor::new(id)],
            Some(NodeKind::Branch { .. }) => {
                vec![Anchor::with_direction(id, true), Anchor::with_direction(id, false)]
            }
            _ => vec![],
        }
    }
}

/// A node that may legally be hoisted right after an anchor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Candidate {
    pub node: NodeId,
    /// Structurally equal nodes on other paths, removed along with `node`.
    pub siblings: BTreeSet<NodeId>,
    /// When present, the hoist is only valid under this expression.
    pub condition: Option<Expr>,
}

/// Symbols and packet bytes available right after the anchor.
struct Available {
    labels: BTreeSet<String>,
    chunk_bytes: BTreeSet<u32>,
}

impl Available {
    fn at(bdd: &Bdd, anchor: Anchor) -> Result<Self, SynapseError> {
        let mut labels: BTreeSet<String> = AMBIENT_SYMBOLS.iter().map(|s| s.to_string()).collect();
        let mut chunk_bytes = BTreeSet::new();
        let mut factory = SymbolFactory::new(None);
        let mut path = bdd.ancestors(anchor.node);
        path.push(anchor.node);
        for id in path {
            let node = bdd.node(id)?;
            let Some(call) = node.call() else { continue };
            labels.extend(factory.labels(call, &node.constraints)?);
            if call.is(PACKET_BORROW_NEXT_CHUNK) {
                if let Some(chunk) = call.extra_out("the_chunk") {
                    chunk_bytes.extend(chunk.read_indices(PACKET_CHUNKS));
                }
            }
        }
        Ok(Self {
            labels,
            chunk_bytes,
        })
    }

    fn covers<'a, T: IntoIterator<Item = &'a Expr> + Clone>(&self, exprs: T) -> bool {
        dependencies(exprs.clone()).into_iter().all(|dep| {
            if dep == PACKET_CHUNKS {
                exprs
                    .clone()
                    .into_iter()
                    .flat_map(|e| e.read_indices(PACKET_CHUNKS))
                    .all(|i| self.chunk_bytes.contains(&i))
            } else {
                self.labels.contains(&dep)
            }
        })
    }
}

fn consumed(node: &Node) -> Vec<&Expr> {
    match &node.kind {
        NodeKind::Call { call, .. } => call.read_exprs().collect(),
        NodeKind::Branch { condition, .. } => vec![condition],
        _ => vec![],
    }
}

/// Nodes on the way from `from` (inclusive) down to `to` (exclusive).
fn between(bdd: &Bdd, from: NodeId, to: NodeId) -> Vec<NodeId> {
    let ancestors = bdd.ancestors(to);
    match ancestors.iter().position(|a| *a == from) {
        Some(i) => ancestors[i..].to_vec(),
        None => vec![],
    }
}

/// The first node structurally equal to `target` on every path below `from`,
/// and whether every path has one.
fn twins(bdd: &Bdd, from: NodeId, target: &Node) -> (BTreeSet<NodeId>, bool) {
    let mut found = BTreeSet::new();
    let mut complete = true;
    let mut stack = vec![from];
    while let Some(id) = stack.pop() {
        let Some(node) = bdd.get(id) else { continue };
        if node.same_content(target) {
            found.insert(id);
        } else if node.is_terminal() {
            complete = false;
        } else {
            stack.extend(node.successors());
        }
    }
    (found, complete)
}

/// Folds the read/write conflicts between `target` and every call from
/// `from` down to it into `guards`. Returns false on a hard conflict.
fn rw_ok(
    bdd: &Bdd,
    from: NodeId,
    target: NodeId,
    guards: &mut Vec<Expr>,
    solver: &SolverToolbox,
) -> Result<bool, SynapseError> {
    let node = bdd.node(target)?;
    let Some(call) = node.call() else {
        return Ok(true);
    };
    for b in between(bdd, from, target) {
        let Some(earlier) = bdd.node(b)?.call() else {
            continue;
        };
        match commutes(earlier, call, &node.constraints, solver) {
            Commutes::Always => {}
            Commutes::Never => return Ok(false),
            Commutes::When(e) => guards.push(e),
        }
    }
    Ok(true)
}

/// Every node that can be hoisted onto `anchor`. Empty when the node after
/// the anchor is a branch or a terminal.
pub fn get_candidates(
    bdd: &Bdd,
    anchor: Anchor,
    solver: &SolverToolbox,
) -> Result<Vec<Candidate>, SynapseError> {
    let Some(next) = anchor.next(bdd)? else {
        return Ok(vec![]);
    };
    let Some(start) = bdd.node(next)?.next() else {
        return Ok(vec![]);
    };
    let available = Available::at(bdd, anchor)?;
    let mut out = vec![];
    for id in bdd.descendants(start) {
        if let Some(c) = viable(bdd, next, start, id, &available, solver)? {
            out.push(c);
        }
    }
    event!(
        Level::TRACE,
        "{} candidates after node {}",
        out.len(),
        anchor.node
    );
    Ok(out)
}

fn viable(
    bdd: &Bdd,
    next: NodeId,
    start: NodeId,
    id: NodeId,
    available: &Available,
    solver: &SolverToolbox,
) -> Result<Option<Candidate>, SynapseError> {
    let node = bdd.node(id)?;
    let side_effects = match &node.kind {
        NodeKind::Call { call, .. } => {
            if CANNOT_REORDER.contains(&call.function_name.as_str()) {
                return Ok(None);
            }
            has_side_effects(&call.function_name)
        }
        NodeKind::Branch { .. } => false,
        _ => return Ok(None),
    };
    if !available.covers(consumed(node)) {
        return Ok(None);
    }
    let (found, complete) = twins(bdd, start, node);
    if !found.contains(&id) || (side_effects && !complete) {
        return Ok(None);
    }
    let mut guards = vec![];
    if !rw_ok(bdd, next, id, &mut guards, solver)? {
        return Ok(None);
    }
    let mut siblings = BTreeSet::new();
    for s in found.into_iter().filter(|s| *s != id) {
        let mut local = vec![];
        let fits = available.covers(consumed(bdd.node(s)?)) && rw_ok(bdd, next, s, &mut local, solver)?;
        if fits {
            guards.extend(local);
            siblings.insert(s);
        } else if side_effects {
            return Ok(None);
        }
    }
    let condition = if guards.is_empty() {
        None
    } else {
        let guard = Expr::and_all(guards.iter());
        if !available.covers([&guard]) {
            return Ok(None);
        }
        Some(guard)
    };
    Ok(Some(Candidate {
        node: id,
        siblings,
        condition,
    }))
}
