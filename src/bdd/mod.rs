use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::SynapseError;

pub use builder::BddBuilder;
pub use node::{Node, NodeId, NodeKind, ReturnInitValue, ReturnOp};

pub mod builder;
pub mod codec;
pub mod dot;
mod finalize;
pub mod group;
pub mod hit_rate;
mod invariants;
pub mod node;

/// A Behavioral Decision Diagram: two rooted trees (`init` and `process`) of
/// calls, branches and terminals, stored in an arena keyed by [`NodeId`].
/// Forward edges live in [`NodeKind`]; `prev` is the back edge.
#[derive(Clone, Debug)]
pub struct Bdd {
    pub(crate) next_id: NodeId,
    pub total_call_paths: usize,
    pub init: NodeId,
    pub process: NodeId,
    pub name: String,
    nodes: BTreeMap<NodeId, Node>,
}

impl Bdd {
    /// An empty diagram. Roots must be set before it is usable.
    pub(crate) fn empty(name: &str) -> Self {
        Self {
            next_id: 0,
            total_call_paths: 0,
            init: 0,
            process: 0,
            name: name.to_string(),
            nodes: BTreeMap::new(),
        }
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn node(&self, id: NodeId) -> Result<&Node, SynapseError> {
        self.nodes
            .get(&id)
            .ok_or_else(|| SynapseError::invariant(format!("dangling reference to node {id}")))
    }

    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, SynapseError> {
        self.nodes
            .get_mut(&id)
            .ok_or_else(|| SynapseError::invariant(format!("dangling reference to node {id}")))
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn fresh_id(&mut self) -> NodeId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn next_id(&self) -> NodeId {
        self.next_id
    }

    /// Adds a node under its own id. Successor back edges are set to point to it.
    pub fn insert(&mut self, node: Node) -> NodeId {
        let id = node.id;
        self.next_id = self.next_id.max(id + 1);
        for s in node.successors() {
            if let Some(child) = self.nodes.get_mut(&s) {
                child.prev = Some(id);
            }
        }
        self.nodes.insert(id, node);
        id
    }

    pub(crate) fn remove(&mut self, id: NodeId) -> Option<Node> {
        self.nodes.remove(&id)
    }

    pub fn successors(&self, id: NodeId) -> Vec<NodeId> {
        self.nodes
            .get(&id)
            .map(|n| n.successors())
            .unwrap_or_default()
    }

    /// Redirects `parent`'s edge from `old` to `new` and fixes `new`'s back edge.
    /// When `parent` is `None`, `old` must be one of the roots.
    pub fn relink(
        &mut self,
        parent: Option<NodeId>,
        old: NodeId,
        new: NodeId,
    ) -> Result<(), SynapseError> {
        match parent {
            Some(p) => {
                if !self.node_mut(p)?.replace_successor(old, new) {
                    return Err(SynapseError::invariant(format!(
                        "node {p} has no edge to {old}"
                    )));
                }
            }
            None => {
                if self.process == old {
                    self.process = new;
                } else if self.init == old {
                    self.init = new;
                } else {
                    return Err(SynapseError::invariant(format!(
                        "node {old} has no parent and is not a root"
                    )));
                }
            }
        }
        self.node_mut(new)?.prev = parent;
        Ok(())
    }

    /// Pre-order ids of the subtree rooted at `root`.
    pub fn descendants(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = vec![];
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if let Some(n) = self.nodes.get(&id) {
                out.push(id);
                let mut succ = n.successors();
                succ.reverse();
                stack.extend(succ);
            }
        }
        out
    }

    /// Ids from the root down to (excluding) `id`.
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = vec![];
        let mut cur = self.nodes.get(&id).and_then(|n| n.prev);
        while let Some(p) = cur {
            if out.contains(&p) {
                break;
            }
            out.push(p);
            cur = self.nodes.get(&p).and_then(|n| n.prev);
        }
        out.reverse();
        out
    }

    pub fn leaves(&self, root: NodeId) -> Vec<NodeId> {
        self.descendants(root)
            .into_iter()
            .filter(|id| self.successors(*id).is_empty())
            .collect()
    }

    pub fn get_number_of_nodes(&self, root: NodeId) -> usize {
        self.descendants(root).len()
    }

    /// Number of nodes on the longest root-to-leaf path.
    pub fn depth(&self, root: NodeId) -> usize {
        let mut best = 0;
        let mut stack = vec![(root, 1usize)];
        while let Some((id, d)) = stack.pop() {
            let succ = self.successors(id);
            if succ.is_empty() {
                best = best.max(d);
            }
            stack.extend(succ.into_iter().map(|s| (s, d + 1)));
        }
        best
    }

    /// Copies the subtree under fresh ids. The copy's root has no parent.
    pub fn clone_subtree(&mut self, root: NodeId) -> Result<NodeId, SynapseError> {
        self.clone_subtree_mapped(root).map(|(id, _)| id)
    }

    /// Like [`Bdd::clone_subtree`], also returning the old-to-new id map.
    pub fn clone_subtree_mapped(
        &mut self,
        root: NodeId,
    ) -> Result<(NodeId, HashMap<NodeId, NodeId>), SynapseError> {
        let ids = self.descendants(root);
        let mut remap = HashMap::new();
        for id in &ids {
            let fresh = self.fresh_id();
            remap.insert(*id, fresh);
        }
        for id in &ids {
            let mut node = self.node(*id)?.clone();
            node.provenance = Some(node.provenance.unwrap_or(*id));
            remap_node(&mut node, &remap);
            if *id == root {
                node.prev = None;
            }
            self.nodes.insert(node.id, node);
        }
        let new_root = remap[&root];
        Ok((new_root, remap))
    }

    /// Copies the subtree of `other` rooted at `root` into this arena under
    /// fresh ids, returning the copy's root and the id map.
    pub fn import_subtree(
        &mut self,
        other: &Bdd,
        root: NodeId,
    ) -> Result<(NodeId, HashMap<NodeId, NodeId>), SynapseError> {
        other.node(root)?;
        let ids = other.descendants(root);
        let mut remap = HashMap::new();
        for id in &ids {
            let fresh = self.fresh_id();
            remap.insert(*id, fresh);
        }
        for id in &ids {
            let mut node = other.node(*id)?.clone();
            remap_node(&mut node, &remap);
            if *id == root {
                node.prev = None;
            }
            self.nodes.insert(node.id, node);
        }
        Ok((remap[&root], remap))
    }

    /// Reassigns every node of the subtree a fresh id from the generation
    /// counter, keeping structure and the parent link.
    pub fn recursive_update_ids(&mut self, root: NodeId) -> Result<NodeId, SynapseError> {
        let parent = self.node(root)?.prev;
        let ids = self.descendants(root);
        let mut remap = HashMap::new();
        for id in &ids {
            let fresh = self.fresh_id();
            remap.insert(*id, fresh);
        }
        let mut moved = vec![];
        for id in &ids {
            if let Some(mut node) = self.nodes.remove(id) {
                remap_node(&mut node, &remap);
                if *id == root {
                    node.prev = parent;
                }
                moved.push(node);
            }
        }
        for node in moved {
            self.nodes.insert(node.id, node);
        }
        let new_root = remap[&root];
        match parent {
            Some(p) => {
                self.node_mut(p)?.replace_successor(root, new_root);
            }
            None => {
                if self.process == root {
                    self.process = new_root;
                } else if self.init == root {
                    self.init = new_root;
                }
            }
        }
        Ok(new_root)
    }

    pub fn remove_subtree(&mut self, root: NodeId) {
        for id in self.descendants(root) {
            self.nodes.remove(&id);
        }
    }

    /// Unlinks `id`, connecting its parent straight to `keep` (one of `id`'s
    /// successors). Every other successor subtree is dropped.
    pub fn short_circuit(&mut self, id: NodeId, keep: NodeId) -> Result<(), SynapseError> {
        let node = self.node(id)?;
        let parent = node.prev;
        let others: Vec<NodeId> = node.successors().into_iter().filter(|s| *s != keep).collect();
        if others.len() == node.successors().len() {
            return Err(SynapseError::invariant(format!(
                "node {keep} is not a successor of {id}"
            )));
        }
        self.relink(parent, id, keep)?;
        self.nodes.remove(&id);
        for o in others {
            self.remove_subtree(o);
        }
        Ok(())
    }

    /// Drops nodes unreachable from either root.
    pub fn collect_garbage(&mut self) {
        let live: BTreeSet<NodeId> = self
            .descendants(self.init)
            .into_iter()
            .chain(self.descendants(self.process))
            .collect();
        self.nodes.retain(|id, _| live.contains(id));
    }

    /// Dense 0-based ids in pre-order, `init` first. Returns the old-to-new
    /// id map.
    pub fn renumber(&mut self) -> HashMap<NodeId, NodeId> {
        self.collect_garbage();
        let order: Vec<NodeId> = self
            .descendants(self.init)
            .into_iter()
            .chain(self.descendants(self.process))
            .collect();
        let remap: HashMap<NodeId, NodeId> = order
            .iter()
            .enumerate()
            .map(|(i, id)| (*id, i as NodeId))
            .collect();
        let old = std::mem::take(&mut self.nodes);
        for (_, mut node) in old {
            remap_node(&mut node, &remap);
            self.nodes.insert(node.id, node);
        }
        self.init = remap[&self.init];
        self.process = remap[&self.process];
        self.next_id = order.len() as NodeId;
        remap
    }

    /// Applies an array rename to `root` and everything below it.
    pub fn rename_arrays_below(&mut self, root: NodeId, map: &BTreeMap<String, String>) {
        if map.is_empty() {
            return;
        }
        for id in self.descendants(root) {
            if let Some(n) = self.nodes.get_mut(&id) {
                n.rename_arrays(map);
            }
        }
    }

    /// Terminal nodes reachable from `process`.
    pub fn terminals(&self) -> Vec<&Node> {
        self.leaves(self.process)
            .into_iter()
            .filter_map(|id| self.nodes.get(&id))
            .collect()
    }

    /// Structural equality of the two trees, ignoring ids.
    pub fn equivalent(&self, other: &Bdd) -> bool {
        subtree_equivalent(self, self.init, other, other.init)
            && subtree_equivalent(self, self.process, other, other.process)
    }
}

fn subtree_equivalent(a: &Bdd, ia: NodeId, b: &Bdd, ib: NodeId) -> bool {
    let (Some(na), Some(nb)) = (a.get(ia), b.get(ib)) else {
        return false;
    };
    let content = match (&na.kind, &nb.kind) {
        (NodeKind::Call { call: ca, .. }, NodeKind::Call { call: cb, .. }) => ca == cb,
        _ => na.same_content(nb),
    };
    if !content || na.constraints != nb.constraints || na.filenames != nb.filenames {
        return false;
    }
    let (sa, sb) = (na.successors(), nb.successors());
    sa.len() == sb.len()
        && sa
            .iter()
            .zip(sb.iter())
            .all(|(x, y)| subtree_equivalent(a, *x, b, *y))
}

fn remap_node(node: &mut Node, remap: &HashMap<NodeId, NodeId>) {
    let m = |id: &mut NodeId| {
        if let Some(n) = remap.get(id) {
            *id = *n;
        }
    };
    m(&mut node.id);
    if let Some(p) = node.prev.as_mut() {
        m(p);
    }
    match &mut node.kind {
        NodeKind::Call { next, .. } => m(next),
        NodeKind::Branch {
            on_true, on_false, ..
        } => {
            m(on_true);
            m(on_false);
        }
        _ => {}
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use crate::bdd::{Bdd, Node, NodeKind, ReturnInitValue, ReturnOp};
    use crate::call_path::{Arg, Call};
    use crate::expr::{ConstraintSet, Expr};

    pub(crate) fn chain(calls: Vec<Call>, op: ReturnOp, value: i64) -> Bdd {
        let mut bdd = Bdd::empty("test");
        let init = bdd.fresh_id();
        bdd.insert(Node::new(
            init,
            NodeKind::ReturnInit {
                value: ReturnInitValue::Success,
            },
        ));
        bdd.init = init;
        let ids: Vec<u64> = calls.iter().map(|_| bdd.fresh_id()).collect();
        let ret = bdd.fresh_id();
        bdd.insert(
            Node::new(ret, NodeKind::ReturnProcess { value, op })
                .with_paths(vec!["cp".into()], vec![ConstraintSet::empty()]),
        );
        for (i, call) in calls.into_iter().enumerate().rev() {
            let next = ids.get(i + 1).copied().unwrap_or(ret);
            bdd.insert(
                Node::new(ids[i], NodeKind::Call { call, next })
                    .with_paths(vec!["cp".into()], vec![ConstraintSet::empty()]),
            );
        }
        bdd.process = ids.first().copied().unwrap_or(ret);
        bdd.total_call_paths = 1;
        bdd
    }

    fn sample() -> Bdd {
        chain(
            vec![
                Call::new("current_time").with_ret(Expr::read_lsb("next_time", 0, 8)),
                Call::new("map_put").with_arg("map", Arg::value(Expr::constant(1, 64))),
            ],
            ReturnOp::Drop,
            0,
        )
    }

    #[test]
    fn test_back_edges_and_counts() {
        let bdd = sample();
        assert_eq!(bdd.get_number_of_nodes(bdd.process), 3);
        assert_eq!(bdd.depth(bdd.process), 3);
        let leaf = bdd.leaves(bdd.process)[0];
        assert_eq!(bdd.ancestors(leaf).len(), 2);
        assert_eq!(bdd.ancestors(leaf)[0], bdd.process);
        bdd.check_invariants().unwrap();
    }

    #[test]
    fn test_clone_subtree_fresh_ids() {
        let mut bdd = sample();
        let before = bdd.next_id();
        let copy = bdd.clone_subtree(bdd.process).unwrap();
        assert!(copy >= before);
        assert!(bdd.get(copy).unwrap().prev.is_none());
        assert_eq!(bdd.get(copy).unwrap().provenance, Some(bdd.process));
        assert_eq!(bdd.get_number_of_nodes(copy), 3);
        let orig = bdd.descendants(bdd.process);
        assert!(bdd.descendants(copy).iter().all(|id| !orig.contains(id)));
    }

    #[test]
    fn test_renumber_dense() {
        let mut bdd = sample();
        bdd.recursive_update_ids(bdd.process).unwrap();
        assert!(bdd.process > 3);
        let snapshot = bdd.clone();
        bdd.renumber();
        assert_eq!(bdd.init, 0);
        assert_eq!(bdd.process, 1);
        assert_eq!(bdd.next_id(), 4);
        assert!(bdd.equivalent(&snapshot));
        bdd.check_invariants().unwrap();
    }
}
