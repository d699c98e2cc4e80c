use std::collections::BTreeSet;

use crate::bdd::{Bdd, NodeId, NodeKind};
use crate::error::SynapseError;
use crate::symbol::{AMBIENT_SYMBOLS, IGNORED_SYMBOLS, SymbolFactory, is_translatable, label_base};

#[derive(Copy, Clone, PartialEq, Eq)]
enum Tree {
    Init,
    Process,
}

impl Bdd {
    /// Checks the structural invariants of a finalized diagram: unique parent
    /// links consistent with forward edges, parallel path metadata, terminals
    /// of the right kind on each tree, and every constraint symbol produced by
    /// an ancestor.
    pub fn check_invariants(&self) -> Result<(), SynapseError> {
        for (key, node) in &self.nodes {
            if *key != node.id {
                return Err(SynapseError::invariant(format!(
                    "node stored under {key} claims id {}",
                    node.id
                )));
            }
            if node.filenames.len() != node.constraints.len() {
                return Err(SynapseError::invariant(format!(
                    "node {key} has {} filenames but {} constraint sets",
                    node.filenames.len(),
                    node.constraints.len()
                )));
            }
        }
        let mut seen = BTreeSet::new();
        for (root, tree) in [(self.init, Tree::Init), (self.process, Tree::Process)] {
            if self.node(root)?.prev.is_some() {
                return Err(SynapseError::invariant(format!("root {root} has a parent")));
            }
            self.check_tree(root, tree, &mut seen)?;
        }
        Ok(())
    }

    fn check_tree(
        &self,
        root: NodeId,
        tree: Tree,
        seen: &mut BTreeSet<NodeId>,
    ) -> Result<(), SynapseError> {
        let ambient: BTreeSet<String> = AMBIENT_SYMBOLS
            .iter()
            .chain(IGNORED_SYMBOLS)
            .map(|s| s.to_string())
            .collect();
        let mut factory = SymbolFactory::new(None);
        let mut stack = vec![(root, ambient)];
        while let Some((id, available)) = stack.pop() {
            if !seen.insert(id) {
                return Err(SynapseError::invariant(format!(
                    "node {id} is reachable twice"
                )));
            }
            let node = self.node(id)?;
            for set in &node.constraints {
                if let Some(missing) = set.arrays().into_iter().find(|a| !available.contains(a)) {
                    return Err(SynapseError::invariant(format!(
                        "node {id} constrains {missing}, which no ancestor produces"
                    )));
                }
            }
            match (&node.kind, tree) {
                (NodeKind::ReturnRaw { .. }, _) => {
                    return Err(SynapseError::invariant(format!(
                        "raw return {id} survived construction"
                    )));
                }
                (NodeKind::ReturnProcess { .. }, Tree::Init) => {
                    return Err(SynapseError::invariant(format!(
                        "init tree ends in process return {id}"
                    )));
                }
                (NodeKind::ReturnInit { .. }, Tree::Process) => {
                    return Err(SynapseError::invariant(format!(
                        "process tree ends in init return {id}"
                    )));
                }
                _ => {}
            }
            let mut produced = available;
            if let Some(call) = node.call() {
                produced.extend(factory.labels(call, &node.constraints)?);
            }
            for s in node.successors() {
                let child = self.node(s)?;
                if child.prev != Some(id) {
                    return Err(SynapseError::invariant(format!(
                        "node {s} is a successor of {id} but points back to {:?}",
                        child.prev
                    )));
                }
                stack.push((s, produced.clone()));
            }
        }
        Ok(())
    }

    /// After relabelling, every translatable symbol's label must derive from
    /// its own base and no label may be produced twice along one path.
    pub fn check_symbol_labels(&self) -> Result<(), SynapseError> {
        let mut factory = SymbolFactory::new(None);
        for root in [self.init, self.process] {
            let mut stack = vec![(root, BTreeSet::<String>::new())];
            while let Some((id, mut live)) = stack.pop() {
                let node = self.node(id)?;
                if let Some(call) = node.call() {
                    for s in factory.process(call, false, &node.constraints)? {
                        if !is_translatable(&s.label_base) {
                            continue;
                        }
                        if label_base(&s.label) != s.label_base {
                            return Err(SynapseError::invariant(format!(
                                "node {id} labels a {} symbol as {}",
                                s.label_base, s.label
                            )));
                        }
                        if !live.insert(s.label.clone()) {
                            return Err(SynapseError::invariant(format!(
                                "label {} produced twice on one path (node {id})",
                                s.label
                            )));
                        }
                    }
                }
                for s in node.successors() {
                    stack.push((s, live.clone()));
                }
            }
        }
        Ok(())
    }
}
