use std::collections::{BTreeSet, VecDeque};

use tracing::{Level, event, instrument};

use crate::bdd::Bdd;
use crate::error::SynapseError;
use crate::expr::SolverToolbox;

pub use candidate::{Anchor, CANNOT_REORDER, Candidate, get_candidates};
pub use rewrite::{ReorderedBdd, reorder};

mod candidate;
pub mod dependency;
mod rewrite;

/// Every diagram one hoist onto `anchor` produces.
pub fn get_reordered_bdds(
    bdd: &Bdd,
    anchor: Anchor,
    solver: &SolverToolbox,
) -> Result<Vec<ReorderedBdd>, SynapseError> {
    get_candidates(bdd, anchor, solver)?
        .iter()
        .map(|c| reorder(bdd, anchor, c, solver))
        .collect()
}

/// Outcome of an exhaustive reordering.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReorderSummary {
    /// Distinct fully reordered diagrams, the input included.
    pub distinct: usize,
    /// Search states visited.
    pub explored: usize,
    /// Most hoists applied along one lineage.
    pub deepest: usize,
}

struct State {
    bdd: Bdd,
    anchors: VecDeque<Anchor>,
    reorders: usize,
}

/// Canonical text of a diagram, independent of its ids.
fn fingerprint(bdd: &Bdd) -> Result<String, SynapseError> {
    let mut copy = bdd.clone();
    copy.renumber();
    copy.serialize()
}

/// Breadth-first search over anchors (starting at the process root) and
/// candidates. Each lineage applies at most `max_reordering` hoists;
/// `None` leaves it unbounded.
#[instrument(skip_all, fields(max = ?max_reordering))]
pub fn reorder_all(
    bdd: &Bdd,
    max_reordering: Option<usize>,
    solver: &SolverToolbox,
) -> Result<ReorderSummary, SynapseError> {
    let mut summary = ReorderSummary::default();
    let mut seen = BTreeSet::new();
    let mut queue = VecDeque::from([State {
        bdd: bdd.clone(),
        anchors: Anchor::at(bdd, bdd.process).into(),
        reorders: 0,
    }]);
    while let Some(mut state) = queue.pop_front() {
        summary.explored += 1;
        let Some(anchor) = state.anchors.pop_front() else {
            summary.deepest = summary.deepest.max(state.reorders);
            if seen.insert(fingerprint(&state.bdd)?) {
                summary.distinct += 1;
            }
            continue;
        };
        if max_reordering.is_none_or(|m| state.reorders < m) {
            for r in get_reordered_bdds(&state.bdd, anchor, solver)? {
                let anchors = continue_after(&r.bdd, anchor, state.anchors.clone())?;
                queue.push_back(State {
                    bdd: r.bdd,
                    anchors,
                    reorders: state.reorders + 1,
                });
            }
        }
        state.anchors = continue_after(&state.bdd, anchor, state.anchors)?;
        queue.push_back(state);
    }
    event!(
        Level::INFO,
        "{} distinct reorderings ({} states explored)",
        summary.distinct,
        summary.explored
    );
    Ok(summary)
}

/// Queues the anchors following `anchor`.
fn continue_after(
    bdd: &Bdd,
    anchor: Anchor,
    mut anchors: VecDeque<Anchor>,
) -> Result<VecDeque<Anchor>, SynapseError> {
    if let Some(next) = anchor.next(bdd)? {
        anchors.extend(Anchor::at(bdd, next));
    }
    Ok(anchors)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use crate::bdd::builder::tests::{borrow, map_get, now, scenario_path, send};
    use crate::bdd::{Bdd, BddBuilder, NodeId, NodeKind, ReturnOp};
    use crate::call_path::{Arg, Call, CallPath};
    use crate::expr::{ConstraintSet, Expr, SolverToolbox};
    use crate::reorder::{Anchor, fingerprint, get_candidates, get_reordered_bdds, reorder, reorder_all};

    fn build(calls: Vec<Call>) -> Bdd {
        let s = SolverToolbox::new();
        let cp = CallPath {
            filename: "cp".into(),
            constraints: ConstraintSet::empty(),
            calls,
        };
        BddBuilder::new("nf", &s).build(&[cp]).unwrap()
    }

    fn names(bdd: &Bdd) -> Vec<String> {
        bdd.descendants(bdd.process)
            .into_iter()
            .filter_map(|id| bdd.get(id)?.call().map(|c| c.function_name.clone()))
            .collect()
    }

    fn outcomes(bdd: &Bdd) -> BTreeMap<String, usize> {
        let mut out = BTreeMap::new();
        for t in bdd.terminals() {
            *out.entry(format!("{:?}", t.kind)).or_default() += 1;
        }
        out
    }

    fn map_put(key_offset: u32) -> Call {
        Call::new("map_put")
            .with_arg("map", Arg::value(Expr::constant(0x1000, 64)))
            .with_arg(
                "key",
                Arg::pointer(
                    Expr::constant(0x2000, 64),
                    Some(Expr::read_lsb("packet_chunks", key_offset, 4)),
                    None,
                ),
            )
            .with_arg("value", Arg::value(Expr::constant(1, 32)))
    }

    #[test]
    fn test_time_is_never_hoisted() {
        let s = SolverToolbox::new();
        let bdd = BddBuilder::new("nf", &s).build(&[scenario_path()]).unwrap();
        let summary = reorder_all(&bdd, Some(10), &s).unwrap();
        assert_eq!(summary.distinct, 1);
    }

    #[test]
    fn test_hoist_lookup_over_time() {
        let s = SolverToolbox::new();
        let bdd = build(vec![borrow(14, 0), now(), map_get(6), send(1)]);
        let anchor = Anchor::new(bdd.process);
        let candidates = get_candidates(&bdd, anchor, &s).unwrap();
        assert_eq!(candidates.len(), 1);
        assert!(candidates[0].condition.is_none());
        let r = get_reordered_bdds(&bdd, anchor, &s).unwrap().remove(0);
        assert_eq!(
            names(&r.bdd),
            vec!["packet_borrow_next_chunk", "map_get", "current_time"]
        );
        assert_eq!(outcomes(&r.bdd), outcomes(&bdd));
        r.bdd.check_symbol_labels().unwrap();
        assert_eq!(reorder_all(&bdd, Some(10), &s).unwrap().distinct, 2);
        assert_eq!(reorder_all(&bdd, Some(0), &s).unwrap().distinct, 1);
    }

    #[test]
    fn test_no_candidates_before_terminal_or_branch() {
        let s = SolverToolbox::new();
        let bdd = build(vec![borrow(14, 0), map_get(6), send(1)]);
        let last = bdd.successors(bdd.process)[0];
        assert!(get_candidates(&bdd, Anchor::new(last), &s).unwrap().is_empty());
        let hit = Expr::read_lsb("map_has_this_key", 0, 4).ne(&Expr::constant(0, 32));
        let paths = [
            CallPath {
                filename: "hit".into(),
                constraints: ConstraintSet::new([hit.clone()]),
                calls: vec![borrow(14, 0), map_get(6), now(), send(1)],
            },
            CallPath {
                filename: "miss".into(),
                constraints: ConstraintSet::new([hit.negated()]),
                calls: vec![borrow(14, 0), map_get(6), Call::new("packet_free")],
            },
        ];
        let bdd = BddBuilder::new("nf", &s).build(&paths).unwrap();
        assert!(get_candidates(&bdd, Anchor::new(bdd.process), &s).unwrap().is_empty());
        let lookup = bdd.successors(bdd.process)[0];
        assert!(bdd.get(bdd.successors(lookup)[0]).unwrap().is_branch());
        assert!(get_candidates(&bdd, Anchor::new(lookup), &s).unwrap().is_empty());
    }

    #[test]
    fn test_conflicting_keys_add_guard() {
        let s = SolverToolbox::new();
        let bdd = build(vec![borrow(14, 0), map_put(0), map_get(4), send(1)]);
        let anchor = Anchor::new(bdd.process);
        let r = get_reordered_bdds(&bdd, anchor, &s).unwrap().remove(0);
        assert!(r.guarded);
        let guard = r.bdd.get(r.candidate).unwrap();
        assert!(matches!(guard.kind, NodeKind::Branch { .. }));
        // guard, both orders of the two calls, two terminals, the borrow
        assert_eq!(r.bdd.get_number_of_nodes(r.bdd.process), 8);
        assert_eq!(r.bdd.terminals().len(), 2);
        r.bdd.check_invariants().unwrap();
    }

    #[test]
    fn test_same_key_write_blocks_hoist() {
        let s = SolverToolbox::new();
        let bdd = build(vec![borrow(14, 0), map_put(6), map_get(6), send(1)]);
        assert!(
            get_candidates(&bdd, Anchor::new(bdd.process), &s)
                .unwrap()
                .is_empty()
        );
    }

    /// Label without the numbering the renamer appends.
    fn base(label: &str) -> &str {
        label
            .split('@')
            .next()
            .unwrap_or(label)
            .trim_end_matches(|c: char| c.is_ascii_digit() || c == '_')
    }

    /// Pins every byte the branches of `bdds` read. Key bytes `0..4` and
    /// `4..8` are equal when `same_keys`; the lookup hits when `hit`.
    fn pin(bdds: &[&Bdd], same_keys: bool, hit: bool) -> ConstraintSet {
        let mut out = vec![];
        for bdd in bdds {
            for node in bdd.nodes() {
                let Some(condition) = node.condition() else {
                    continue;
                };
                for array in condition.arrays() {
                    for i in condition.read_indices(&array) {
                        let value = match base(&array) {
                            "packet_chunks" if same_keys => i % 4,
                            "packet_chunks" => i,
                            "map_has_this_key" => u32::from(hit && i == 0),
                            _ => 0,
                        };
                        out.push(Expr::read(&array, i).eq(&Expr::constant(value as u64, 8)));
                    }
                }
            }
        }
        ConstraintSet::new(out)
    }

    /// Follows the process tree under `inputs`, returning the branch
    /// directions taken and the outcome.
    fn run(bdd: &Bdd, inputs: &ConstraintSet, s: &SolverToolbox) -> (Vec<(NodeId, bool)>, ReturnOp, i64) {
        let mut taken = vec![];
        let mut id = bdd.process;
        loop {
            match &bdd.get(id).unwrap().kind {
                NodeKind::Call { next, .. } => id = *next,
                NodeKind::Branch {
                    condition,
                    on_true,
                    on_false,
                } => {
                    let holds = s.value_from_expr(inputs, condition).unwrap() != 0;
                    taken.push((id, holds));
                    id = if holds { *on_true } else { *on_false };
                }
                NodeKind::ReturnProcess { value, op } => return (taken, *op, *value),
                other => panic!("unexpected {other:?} in the process tree"),
            }
        }
    }

    #[test]
    fn test_guarded_hoist_keeps_every_outcome() {
        let s = SolverToolbox::new();
        let hit = Expr::read_lsb("map_has_this_key", 0, 4).ne(&Expr::constant(0, 32));
        let paths = [
            CallPath {
                filename: "hit".into(),
                constraints: ConstraintSet::new([hit.clone()]),
                calls: vec![borrow(14, 0), map_put(0), map_get(4), send(1)],
            },
            CallPath {
                filename: "miss".into(),
                constraints: ConstraintSet::new([hit.negated()]),
                calls: vec![borrow(14, 0), map_put(0), map_get(4), Call::new("packet_free")],
            },
        ];
        let bdd = BddBuilder::new("nf", &s).build(&paths).unwrap();
        let r = get_reordered_bdds(&bdd, Anchor::new(bdd.process), &s)
            .unwrap()
            .into_iter()
            .find(|r| r.guarded)
            .unwrap();
        let mut guard_sides = vec![];
        for same_keys in [true, false] {
            for hit in [true, false] {
                let inputs = pin(&[&bdd, &r.bdd], same_keys, hit);
                assert!(s.is_satisfiable(&inputs));
                let (_, op, value) = run(&bdd, &inputs, &s);
                let (taken, r_op, r_value) = run(&r.bdd, &inputs, &s);
                assert_eq!((op, value), (r_op, r_value));
                assert_eq!(op, if hit { ReturnOp::Fwd } else { ReturnOp::Drop });
                let guard = taken.iter().find(|(id, _)| *id == r.candidate).unwrap();
                guard_sides.push(guard.1);
            }
        }
        // equal keys fall back to the original order
        assert_eq!(guard_sides, vec![false, false, true, true]);
    }

    #[test]
    fn test_disjoint_hoists_commute() {
        let s = SolverToolbox::new();
        let bdd = build(vec![
            borrow(14, 0),
            now(),
            map_get(6),
            now(),
            now(),
            map_get(10),
            send(1),
        ]);
        let ids = bdd.descendants(bdd.process);
        let (first, second) = ((ids[0], ids[2]), (ids[3], ids[5]));
        let hoist = |bdd: &Bdd, (anchor, node): (NodeId, NodeId)| {
            let anchor = Anchor::new(anchor);
            let candidate = get_candidates(bdd, anchor, &s)
                .unwrap()
                .into_iter()
                .find(|c| c.node == node)
                .unwrap();
            reorder(bdd, anchor, &candidate, &s).unwrap().bdd
        };
        let one_way = hoist(&hoist(&bdd, first), second);
        let other_way = hoist(&hoist(&bdd, second), first);
        assert_eq!(
            names(&one_way),
            vec![
                "packet_borrow_next_chunk",
                "map_get",
                "current_time",
                "current_time",
                "map_get",
                "current_time",
            ]
        );
        assert_eq!(fingerprint(&one_way).unwrap(), fingerprint(&other_way).unwrap());
        assert_ne!(fingerprint(&one_way).unwrap(), fingerprint(&bdd).unwrap());
    }
}
