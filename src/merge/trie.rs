//! Incremental construction of the merged process tree.

use std::collections::BTreeMap;

use tracing::{Level, event};

use crate::bdd::{Bdd, Node, NodeId, NodeKind};
use crate::error::SynapseError;
use crate::expr::{ConstraintSet, Expr, SolverToolbox};
use crate::merge::Origin;
use crate::merge::weave::{Item, Placed, Woven};

struct Slot {
    item: Item,
    origin: Origin,
    source: Option<NodeId>,
    /// One child for calls, true then false for branches, none for terminals.
    children: Vec<Option<usize>>,
    filenames: Vec<String>,
    constraints: Vec<ConstraintSet>,
    /// Set on branches added to keep apart paths that disagree before any
    /// branch of their own does.
    discriminating: bool,
}

impl Slot {
    fn new(placed: &Placed) -> Self {
        let arity = match placed.item {
            Item::Call(_) => 1,
            Item::Branch { .. } => 2,
            Item::Terminal { .. } => 0,
        };
        Self {
            item: match &placed.item {
                Item::Branch { condition, .. } => Item::Branch {
                    condition: condition.clone(),
                    direction: true,
                },
                other => other.clone(),
            },
            origin: placed.origin,
            source: placed.source,
            children: vec![None; arity],
            filenames: vec![],
            constraints: vec![],
            discriminating: false,
        }
    }

    /// A branch on `condition` whose false side is `existing`.
    fn discriminator(condition: Expr, existing: usize, below: &Slot) -> Self {
        Self {
            item: Item::Branch {
                condition,
                direction: true,
            },
            origin: Origin::Both,
            source: None,
            children: vec![None, Some(existing)],
            filenames: below.filenames.clone(),
            constraints: below.constraints.clone(),
            discriminating: true,
        }
    }

    fn matches(&self, item: &Item) -> bool {
        match (&self.item, item) {
            (Item::Branch { condition: a, .. }, Item::Branch { condition: b, .. }) => a == b,
            (a, b) => a == b,
        }
    }
}

fn edge(item: &Item) -> Option<usize> {
    match item {
        Item::Branch { direction, .. } => Some(if *direction { 0 } else { 1 }),
        Item::Call(_) => Some(0),
        Item::Terminal { .. } => None,
    }
}

/// Merged paths laid over one another. Each new path follows the nodes it
/// shares with the paths already placed and grows a fresh tail where it
/// departs from them. A path departing at a node that is not one of its own
/// branches is kept apart from the paths below that node by a branch on its
/// path condition.
#[derive(Default)]
pub(crate) struct Trie {
    slots: Vec<Slot>,
    root: Option<usize>,
}

impl Trie {
    pub fn add(&mut self, woven: &Woven, solver: &SolverToolbox) -> Result<(), SynapseError> {
        self.place(None, &woven.steps, woven, solver)
    }

    fn child(&self, at: Option<(usize, usize)>) -> Option<usize> {
        match at {
            None => self.root,
            Some((p, k)) => self.slots[p].children[k],
        }
    }

    fn link(&mut self, at: Option<(usize, usize)>, slot: Slot) -> usize {
        self.slots.push(slot);
        let idx = self.slots.len() - 1;
        match at {
            None => self.root = Some(idx),
            Some((p, k)) => self.slots[p].children[k] = Some(idx),
        }
        idx
    }

    fn record(&mut self, idx: usize, woven: &Woven) {
        let slot = &mut self.slots[idx];
        slot.filenames.push(woven.filename.clone());
        slot.constraints.push(woven.constraints.clone());
    }

    fn place(
        &mut self,
        at: Option<(usize, usize)>,
        steps: &[Placed],
        woven: &Woven,
        solver: &SolverToolbox,
    ) -> Result<(), SynapseError> {
        let Some((placed, rest)) = steps.split_first() else {
            return Ok(());
        };
        let idx = match self.child(at) {
            None => self.link(at, Slot::new(placed)),
            Some(e) if self.slots[e].matches(&placed.item) => {
                if self.slots[e].origin != placed.origin {
                    self.slots[e].origin = Origin::Both;
                }
                e
            }
            Some(e) if self.slots[e].discriminating => {
                self.record(e, woven);
                let Item::Branch { condition, .. } = &self.slots[e].item else {
                    return Err(SynapseError::invariant("discriminator is not a branch"));
                };
                let condition = condition.clone();
                if solver.is_possible(&woven.constraints, &condition) {
                    self.place(Some((e, 0)), steps, woven, solver)?;
                }
                if solver.is_possible(&woven.constraints, &condition.negated()) {
                    self.place(Some((e, 1)), steps, woven, solver)?;
                }
                return Ok(());
            }
            Some(e) => {
                let condition = self.separating_condition(e, woven, solver).ok_or_else(|| {
                    SynapseError::invariant(format!(
                        "merged path {} overlaps the paths through {:?} but takes {:?}",
                        woven.filename, self.slots[e].item, placed.item
                    ))
                })?;
                event!(
                    Level::DEBUG,
                    "Keeping {} apart from {} merged paths on {}",
                    woven.filename,
                    self.slots[e].filenames.len(),
                    condition
                );
                let branch = Slot::discriminator(condition, e, &self.slots[e]);
                let d = self.link(at, branch);
                self.record(d, woven);
                return self.place(Some((d, 0)), steps, woven, solver);
            }
        };
        self.record(idx, woven);
        match edge(&placed.item) {
            Some(k) => self.place(Some((idx, k)), rest, woven, solver),
            None => Ok(()),
        }
    }

    /// A condition implied by the new path and refuted by every path
    /// already through `existing`: one of its own clauses if one does,
    /// else its whole path condition.
    fn separating_condition(
        &self,
        existing: usize,
        woven: &Woven,
        solver: &SolverToolbox,
    ) -> Option<Expr> {
        let below = &self.slots[existing].constraints;
        if below
            .iter()
            .any(|c| solver.constraints_compatible(c, &woven.constraints))
        {
            return None;
        }
        woven
            .constraints
            .iter()
            .find(|clause| below.iter().all(|c| solver.is_always_false(c, clause)))
            .cloned()
            .or_else(|| Some(woven.constraints.conjunction()))
    }

    /// Writes the tree into `bdd`, returning its root and the origin of
    /// every node written. A branch only one of whose sides was ever taken
    /// is replaced by that side.
    pub fn materialize(
        &self,
        bdd: &mut Bdd,
        origins: &mut BTreeMap<NodeId, Origin>,
    ) -> Result<NodeId, SynapseError> {
        let root = self
            .root
            .ok_or_else(|| SynapseError::invariant("no compatible pair of paths"))?;
        self.write(root, bdd, origins)
    }

    fn write(
        &self,
        idx: usize,
        bdd: &mut Bdd,
        origins: &mut BTreeMap<NodeId, Origin>,
    ) -> Result<NodeId, SynapseError> {
        let slot = &self.slots[idx];
        let kind = match &slot.item {
            Item::Call(call) => {
                let child = slot.children[0]
                    .ok_or_else(|| SynapseError::invariant("merged call without successor"))?;
                NodeKind::Call {
                    call: call.clone(),
                    next: self.write(child, bdd, origins)?,
                }
            }
            Item::Branch { condition, .. } => match (slot.children[0], slot.children[1]) {
                (Some(t), Some(f)) => NodeKind::Branch {
                    condition: condition.clone(),
                    on_true: self.write(t, bdd, origins)?,
                    on_false: self.write(f, bdd, origins)?,
                },
                (Some(only), None) | (None, Some(only)) => return self.write(only, bdd, origins),
                (None, None) => {
                    return Err(SynapseError::invariant("merged branch without successors"));
                }
            },
            Item::Terminal { value, op } => NodeKind::ReturnProcess {
                value: *value,
                op: *op,
            },
        };
        let id = bdd.fresh_id();
        let mut node = Node::new(id, kind).with_paths(slot.filenames.clone(), slot.constraints.clone());
        node.provenance = slot.source;
        bdd.insert(node);
        origins.insert(id, slot.origin);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use crate::bdd::{Bdd, NodeKind, ReturnOp};
    use crate::call_path::Call;
    use crate::expr::{ConstraintSet, Expr, SolverToolbox};
    use crate::merge::Origin;
    use crate::merge::trie::Trie;
    use crate::merge::weave::{Item, Placed, Woven};

    fn call(name: &str, origin: Origin) -> Placed {
        Placed {
            item: Item::Call(Call::new(name)),
            origin,
            source: None,
        }
    }

    fn branch(condition: &Expr, direction: bool) -> Placed {
        Placed {
            item: Item::Branch {
                condition: condition.clone(),
                direction,
            },
            origin: Origin::Second,
            source: None,
        }
    }

    fn end(op: ReturnOp, value: i64) -> Placed {
        Placed {
            item: Item::Terminal { value, op },
            origin: Origin::Both,
            source: None,
        }
    }

    fn woven(name: &str, steps: Vec<Placed>, constraints: ConstraintSet) -> Woven {
        Woven {
            steps,
            constraints,
            filename: name.into(),
            extra: [0, 0],
            overridden: false,
        }
    }

    fn names(bdd: &Bdd, from: u64) -> Vec<String> {
        let mut out = vec![];
        let mut cur = Some(from);
        while let Some(id) = cur {
            let node = bdd.get(id).unwrap();
            out.push(match &node.kind {
                NodeKind::Call { call, .. } => call.function_name.clone(),
                NodeKind::ReturnProcess { op, .. } => op.to_string(),
                _ => "branch".into(),
            });
            cur = node.next();
        }
        out
    }

    #[test]
    fn test_calls_interleaved_differently_are_kept_apart() {
        let s = SolverToolbox::new();
        let x = Expr::read_lsb("x", 0, 4).ne(&Expr::constant(0, 32));
        let taken = woven(
            "taken",
            vec![
                call("c1", Origin::First),
                branch(&x, true),
                call("m1", Origin::Second),
                end(ReturnOp::Drop, 0),
            ],
            ConstraintSet::new([x.clone()]),
        );
        let skipped = woven(
            "skipped",
            vec![
                branch(&x, false),
                call("m2", Origin::Second),
                call("c1", Origin::First),
                end(ReturnOp::Fwd, 1),
            ],
            ConstraintSet::new([x.negated()]),
        );
        let mut trie = Trie::default();
        trie.add(&taken, &s).unwrap();
        trie.add(&skipped, &s).unwrap();

        let mut bdd = Bdd::empty("merged");
        let mut origins = BTreeMap::new();
        let root = trie.materialize(&mut bdd, &mut origins).unwrap();
        let NodeKind::Branch {
            condition,
            on_true,
            on_false,
        } = &bdd.node(root).unwrap().kind
        else {
            panic!("expected a branch at the root");
        };
        assert_eq!(*condition, x.negated());
        assert_eq!(origins[&root], Origin::Both);
        assert_eq!(names(&bdd, *on_true), vec!["m2", "c1", "FWD"]);
        assert_eq!(names(&bdd, *on_false), vec!["c1", "m1", "DROP"]);
        assert_eq!(bdd.get(root).unwrap().filenames.len(), 2);

        // a later path with the same condition lands on the true side
        let again = woven(
            "again",
            vec![
                branch(&x, false),
                call("m2", Origin::Second),
                call("c1", Origin::First),
                end(ReturnOp::Fwd, 1),
            ],
            ConstraintSet::new([x.negated()]),
        );
        trie.add(&again, &s).unwrap();
        let mut bdd = Bdd::empty("merged");
        let root = trie.materialize(&mut bdd, &mut BTreeMap::new()).unwrap();
        assert_eq!(bdd.get_number_of_nodes(root), 7);
    }

    #[test]
    fn test_overlapping_paths_that_disagree() {
        let s = SolverToolbox::new();
        let x = Expr::read_lsb("x", 0, 4).ne(&Expr::constant(0, 32));
        let mut trie = Trie::default();
        trie.add(
            &woven(
                "first",
                vec![call("c1", Origin::First), end(ReturnOp::Fwd, 1)],
                ConstraintSet::new([x.clone()]),
            ),
            &s,
        )
        .unwrap();
        let other = woven(
            "second",
            vec![call("c2", Origin::First), end(ReturnOp::Fwd, 1)],
            ConstraintSet::empty(),
        );
        assert!(trie.add(&other, &s).is_err());
    }
}
