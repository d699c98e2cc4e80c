use std::collections::BTreeSet;
use std::path::Path;

use tracing::{Level, event, instrument};

use crate::bdd::group::{CallPathsGroup, RawPath, align_symbols};
use crate::bdd::{Bdd, Node, NodeId, NodeKind, ReturnInitValue, ReturnOp};
use crate::call_path::functions::{
    INIT_CONTEXT_MARKER, MAP_GET, PACKET_CLONE, PACKET_FREE, PACKET_SEND, SKIP_CONDITION_SYMBOLS,
};
use crate::call_path::{Call, CallPath, read_call_path};
use crate::error::SynapseError;
use crate::expr::{ConstraintSet, SolverToolbox};
use crate::symbol::{AMBIENT_SYMBOLS, IGNORED_SYMBOLS, SymbolFactory};

/// Lifts a bag of call paths into a finalized [`Bdd`].
pub struct BddBuilder<'s> {
    solver: &'s SolverToolbox,
    raw: Bdd,
    bdd: Bdd,
}

fn paths_metadata(paths: &[RawPath]) -> (Vec<String>, Vec<ConstraintSet>) {
    (
        paths.iter().map(|p| p.filename.clone()).collect(),
        paths.iter().map(|p| p.constraints.clone()).collect(),
    )
}

impl<'s> BddBuilder<'s> {
    pub fn new(name: &str, solver: &'s SolverToolbox) -> Self {
        Self {
            solver,
            raw: Bdd::empty(name),
            bdd: Bdd::empty(name),
        }
    }

    pub fn from_files<P: AsRef<Path>>(
        name: &str,
        files: &[P],
        solver: &'s SolverToolbox,
    ) -> Result<Bdd, SynapseError> {
        let paths = files
            .iter()
            .map(read_call_path)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(name, solver).build(&paths)
    }

    #[instrument(skip_all, fields(paths = call_paths.len()))]
    pub fn build(mut self, call_paths: &[CallPath]) -> Result<Bdd, SynapseError> {
        if call_paths.is_empty() {
            return Err(SynapseError::EmptyCallPaths);
        }
        let paths: Vec<RawPath> = call_paths.iter().map(RawPath::new).collect();
        let available = AMBIENT_SYMBOLS
            .iter()
            .chain(IGNORED_SYMBOLS)
            .map(|s| s.to_string())
            .collect();
        let root = self.populate(paths, available)?;
        event!(
            Level::DEBUG,
            "Raw diagram has {} nodes",
            self.raw.get_number_of_nodes(root)
        );
        let has_marker = call_paths
            .iter()
            .any(|cp| cp.calls.iter().any(|c| c.is(INIT_CONTEXT_MARKER)));
        if has_marker {
            self.bdd.init = self.populate_init(root)?;
            self.bdd.process = self.populate_process(root)?;
        } else {
            let id = self.bdd.fresh_id();
            self.bdd.insert(Node::new(
                id,
                NodeKind::ReturnInit {
                    value: ReturnInitValue::Success,
                },
            ));
            self.bdd.init = id;
            self.bdd.process = self.process_copy(root)?;
        }
        let mut bdd = self.bdd;
        bdd.total_call_paths = call_paths.len();
        bdd.finalize(self.solver)?;
        event!(
            Level::INFO,
            "Built BDD with {} init and {} process nodes",
            bdd.get_number_of_nodes(bdd.init),
            bdd.get_number_of_nodes(bdd.process)
        );
        Ok(bdd)
    }

    /// Chooses the path whose first call provably succeeds, else the first.
    fn representative(&self, paths: &[RawPath]) -> usize {
        paths
            .iter()
            .position(|p| {
                p.first()
                    .and_then(|c| c.ret.as_ref())
                    .is_some_and(|r| self.solver.is_always_nonzero(&p.constraints, r))
            })
            .unwrap_or(0)
    }

    fn populate(
        &mut self,
        mut paths: Vec<RawPath>,
        mut available: BTreeSet<String>,
    ) -> Result<NodeId, SynapseError> {
        let id = self.raw.fresh_id();
        let (mut filenames, mut constraints) = paths_metadata(&paths);
        let group = if paths.iter().all(|p| p.calls.is_empty()) {
            let outcomes: Vec<(ReturnOp, i64)> = paths
                .iter()
                .map(|p| self.outcome(&p.original, Some(&p.constraints)))
                .collect();
            let (same, different): (Vec<usize>, Vec<usize>) =
                (0..paths.len()).partition(|i| outcomes[*i] == outcomes[0]);
            if different.is_empty() {
                let calls = paths.iter().map(|p| p.original.as_ref().clone()).collect();
                self.raw.insert(
                    Node::new(id, NodeKind::ReturnRaw { calls })
                        .with_paths(filenames, constraints),
                );
                return Ok(id);
            }
            let same: Vec<&RawPath> = same.iter().map(|i| &paths[*i]).collect();
            let different: Vec<&RawPath> = different.iter().map(|i| &paths[*i]).collect();
            CallPathsGroup::split(&same, &different, &available, self.solver)
                .ok_or(SynapseError::NoDiscriminatingConstraint)?
        } else {
            CallPathsGroup::new(&paths, &available, self.solver)?
        };
        let kind = match group.discriminating_constraint {
            None => {
                let rep = self.representative(&paths);
                let rep_constraints = paths[rep].constraints.clone();
                let mut call = paths[rep]
                    .first()
                    .cloned()
                    .ok_or(SynapseError::NoDiscriminatingConstraint)?;
                if call.is(MAP_GET) {
                    let found = call
                        .ret
                        .as_ref()
                        .is_some_and(|r| self.solver.is_always_nonzero(&rep_constraints, r));
                    if !found {
                        if let Some(v) = call.args.get_mut("value_out") {
                            v.output = None;
                        }
                    }
                }
                let mut factory = SymbolFactory::new(Some(self.solver));
                for p in paths.iter_mut() {
                    align_symbols(p, &call, &rep_constraints, &mut factory)?;
                }
                (filenames, constraints) = paths_metadata(&paths);
                available.extend(factory.labels(&call, std::slice::from_ref(&rep_constraints))?);
                let rest = paths.into_iter().map(RawPath::advance).collect();
                let next = self.populate(rest, available)?;
                NodeKind::Call { call, next }
            }
            Some(condition) => {
                let on_true = self.populate(group.on_true, available.clone())?;
                let on_false = self.populate(group.on_false, available)?;
                NodeKind::Branch {
                    condition,
                    on_true,
                    on_false,
                }
            }
        };
        self.raw
            .insert(Node::new(id, kind).with_paths(filenames, constraints));
        Ok(id)
    }

    fn copy_node(&mut self, raw: &Node, kind: NodeKind) -> NodeId {
        let id = self.bdd.fresh_id();
        let mut node = Node::new(id, kind).with_paths(raw.filenames.clone(), raw.constraints.clone());
        node.provenance = Some(raw.id);
        self.bdd.insert(node)
    }

    fn reaches_marker(&self, id: NodeId) -> bool {
        self.raw
            .descendants(id)
            .into_iter()
            .any(|d| self.raw.get(d).is_some_and(|n| n.is_call_to(INIT_CONTEXT_MARKER)))
    }

    /// Whether every path below `id` reaches the marker.
    fn always_reaches_marker(&self, id: NodeId) -> bool {
        match self.raw.get(id).map(|n| &n.kind) {
            Some(NodeKind::Call { call, .. }) if call.is(INIT_CONTEXT_MARKER) => true,
            Some(NodeKind::Call { next, .. }) => self.always_reaches_marker(*next),
            Some(NodeKind::Branch {
                on_true, on_false, ..
            }) => self.always_reaches_marker(*on_true) && self.always_reaches_marker(*on_false),
            _ => false,
        }
    }

    /// Copies calls up to the marker; paths that reach it succeed.
    fn populate_init(&mut self, id: NodeId) -> Result<NodeId, SynapseError> {
        let raw = self.raw.node(id)?.clone();
        let kind = match &raw.kind {
            NodeKind::Call { call, .. } if call.is(INIT_CONTEXT_MARKER) => NodeKind::ReturnInit {
                value: ReturnInitValue::Success,
            },
            NodeKind::Call { call, next } => {
                let next = self.populate_init(*next)?;
                NodeKind::Call {
                    call: call.clone(),
                    next,
                }
            }
            NodeKind::Branch {
                condition,
                on_true,
                on_false,
            } => {
                let on_true = self.populate_init(*on_true)?;
                let on_false = self.populate_init(*on_false)?;
                NodeKind::Branch {
                    condition: condition.clone(),
                    on_true,
                    on_false,
                }
            }
            _ => NodeKind::ReturnInit {
                value: ReturnInitValue::Failure,
            },
        };
        Ok(self.copy_node(&raw, kind))
    }

    /// Finds the marker and copies everything after it.
    fn populate_process(&mut self, id: NodeId) -> Result<NodeId, SynapseError> {
        let mut cur = id;
        loop {
            let raw = self.raw.node(cur)?;
            match &raw.kind {
                NodeKind::Call { call, next } if call.is(INIT_CONTEXT_MARKER) => {
                    let next = *next;
                    return self.process_copy(next);
                }
                NodeKind::Call { next, .. } => cur = *next,
                NodeKind::Branch {
                    on_true, on_false, ..
                } => {
                    let (t, f) = (*on_true, *on_false);
                    cur = match (self.reaches_marker(t), self.reaches_marker(f)) {
                        (false, true) => f,
                        // Both sides can finish initialization: follow the
                        // one that always does, the true side on a tie.
                        (true, true)
                            if !self.always_reaches_marker(t) && self.always_reaches_marker(f) =>
                        {
                            f
                        }
                        _ => t,
                    };
                }
                _ => {
                    return Err(SynapseError::invariant(
                        "no path reaches the end of initialization",
                    ));
                }
            }
        }
    }

    fn process_copy(&mut self, id: NodeId) -> Result<NodeId, SynapseError> {
        let raw = self.raw.node(id)?.clone();
        match &raw.kind {
            NodeKind::Call { call, next } => {
                let next = self.process_copy(*next)?;
                let kind = NodeKind::Call {
                    call: call.clone(),
                    next,
                };
                Ok(self.copy_node(&raw, kind))
            }
            NodeKind::Branch {
                condition,
                on_true,
                on_false,
            } => {
                let t = self.process_copy(*on_true)?;
                let f = self.process_copy(*on_false)?;
                let skip = condition
                    .arrays()
                    .iter()
                    .any(|a| SKIP_CONDITION_SYMBOLS.contains(&a.as_str()));
                if skip {
                    let (keep, drop) = if self.all_err(t) && !self.all_err(f) {
                        (f, t)
                    } else {
                        (t, f)
                    };
                    self.bdd.remove_subtree(drop);
                    self.bdd.node_mut(keep)?.prev = None;
                    return Ok(keep);
                }
                if let Some(kept) = self.collapse_equal_returns(t, f)? {
                    return Ok(kept);
                }
                let kind = NodeKind::Branch {
                    condition: condition.clone(),
                    on_true: t,
                    on_false: f,
                };
                Ok(self.copy_node(&raw, kind))
            }
            NodeKind::ReturnRaw { calls } => {
                let (op, value) = self.outcome(
                    calls.first().map(Vec::as_slice).unwrap_or(&[]),
                    raw.constraints.first(),
                );
                Ok(self.copy_node(&raw, NodeKind::ReturnProcess { value, op }))
            }
            NodeKind::ReturnInit { .. } | NodeKind::ReturnProcess { .. } => {
                let kind = raw.kind.clone();
                Ok(self.copy_node(&raw, kind))
            }
        }
    }

    fn all_err(&self, id: NodeId) -> bool {
        self.bdd.leaves(id).iter().all(|l| {
            matches!(
                self.bdd.get(*l).map(|n| &n.kind),
                Some(NodeKind::ReturnProcess {
                    op: ReturnOp::Err,
                    ..
                })
            )
        })
    }

    /// Two terminal sides with the same action become one terminal.
    fn collapse_equal_returns(
        &mut self,
        t: NodeId,
        f: NodeId,
    ) -> Result<Option<NodeId>, SynapseError> {
        let (nt, nf) = (self.bdd.node(t)?, self.bdd.node(f)?);
        let equal = matches!(
            (&nt.kind, &nf.kind),
            (
                NodeKind::ReturnProcess { value: a, op: oa },
                NodeKind::ReturnProcess { value: b, op: ob },
            ) if a == b && oa == ob
        );
        if !equal {
            return Ok(None);
        }
        let removed = self.bdd.remove(f);
        let kept = self.bdd.node_mut(t)?;
        if let Some(other) = removed {
            kept.filenames.extend(other.filenames);
            kept.constraints.extend(other.constraints);
        }
        Ok(Some(t))
    }

    /// The process terminal a finished path ends in, read off its packet calls.
    fn outcome(&self, calls: &[Call], constraints: Option<&ConstraintSet>) -> (ReturnOp, i64) {
        let sends: Vec<&Call> = calls.iter().filter(|c| c.is(PACKET_SEND)).collect();
        if sends.len() > 1 || calls.iter().any(|c| c.is(PACKET_CLONE)) {
            return (ReturnOp::Bcast, 0);
        }
        if let Some(send) = sends.first() {
            let device = send.arg_expr("dst_device").and_then(|d| {
                d.as_constant()
                    .or_else(|| constraints.and_then(|c| self.solver.value_from_expr(c, d)))
            });
            return (ReturnOp::Fwd, device.unwrap_or(0) as i64);
        }
        if calls.iter().any(|c| c.is(PACKET_FREE)) {
            return (ReturnOp::Drop, 0);
        }
        (ReturnOp::Err, 0)
    }
}
