use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::call_path::Call;
use crate::expr::{ConstraintSet, Expr};

pub type NodeId = u64;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReturnInitValue {
    Success,
    Failure,
}

/// What the network function does with the packet at a process terminal.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReturnOp {
    Fwd,
    Drop,
    Bcast,
    Err,
}

impl ReturnOp {
    /// Row/column of this operation in a merge conflict matrix.
    pub fn matrix_index(&self) -> Option<usize> {
        match self {
            ReturnOp::Fwd => Some(0),
            ReturnOp::Drop => Some(1),
            ReturnOp::Bcast => Some(2),
            ReturnOp::Err => None,
        }
    }
}

impl Display for ReturnInitValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ReturnInitValue::Success => write!(f, "SUCCESS"),
            ReturnInitValue::Failure => write!(f, "FAILURE"),
        }
    }
}

impl Display for ReturnOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReturnOp::Fwd => "FWD",
            ReturnOp::Drop => "DROP",
            ReturnOp::Bcast => "BCAST",
            ReturnOp::Err => "ERR",
        };
        write!(f, "{s}")
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeKind {
    Call {
        call: Call,
        next: NodeId,
    },
    Branch {
        condition: Expr,
        on_true: NodeId,
        on_false: NodeId,
    },
    ReturnInit {
        value: ReturnInitValue,
    },
    ReturnProcess {
        value: i64,
        op: ReturnOp,
    },
    /// Construction-time leaf holding, per incoming call path, that path's
    /// full call list.
    ReturnRaw {
        calls: Vec<Vec<Call>>,
    },
}

#[derive(Clone, Debug)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    pub prev: Option<NodeId>,
    pub filenames: Vec<String>,
    pub constraints: Vec<ConstraintSet>,
    /// Id of the node this one was copied or hoisted from, if any.
    pub provenance: Option<NodeId>,
}

impl Node {
    pub fn new(id: NodeId, kind: NodeKind) -> Self {
        Self {
            id,
            kind,
            prev: None,
            filenames: vec![],
            constraints: vec![],
            provenance: None,
        }
    }

    pub fn with_paths(mut self, filenames: Vec<String>, constraints: Vec<ConstraintSet>) -> Self {
        self.filenames = filenames;
        self.constraints = constraints;
        self
    }

    pub fn successors(&self) -> Vec<NodeId> {
        match &self.kind {
            NodeKind::Call { next, .. } => vec![*next],
            NodeKind::Branch {
                on_true, on_false, ..
            } => vec![*on_true, *on_false],
            _ => vec![],
        }
    }

    pub fn call(&self) -> Option<&Call> {
        match &self.kind {
            NodeKind::Call { call, .. } => Some(call),
            _ => None,
        }
    }

    pub fn condition(&self) -> Option<&Expr> {
        match &self.kind {
            NodeKind::Branch { condition, .. } => Some(condition),
            _ => None,
        }
    }

    pub fn next(&self) -> Option<NodeId> {
        match &self.kind {
            NodeKind::Call { next, .. } => Some(*next),
            _ => None,
        }
    }

    pub fn is_call(&self) -> bool {
        matches!(self.kind, NodeKind::Call { .. })
    }

    pub fn is_branch(&self) -> bool {
        matches!(self.kind, NodeKind::Branch { .. })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::ReturnInit { .. } | NodeKind::ReturnProcess { .. } | NodeKind::ReturnRaw { .. }
        )
    }

    pub fn is_call_to(&self, function_name: &str) -> bool {
        self.call().is_some_and(|c| c.is(function_name))
    }

    /// Union of every per-path constraint set; used where the node is
    /// reasoned about as a whole.
    pub fn combined_constraints(&self) -> ConstraintSet {
        self.constraints
            .iter()
            .fold(ConstraintSet::empty(), |acc, c| acc.union(c))
    }

    /// Replaces an outgoing edge `old -> new`. Returns whether an edge matched.
    pub fn replace_successor(&mut self, old: NodeId, new: NodeId) -> bool {
        match &mut self.kind {
            NodeKind::Call { next, .. } if *next == old => {
                *next = new;
                true
            }
            NodeKind::Branch {
                on_true, on_false, ..
            } => {
                if *on_true == old {
                    *on_true = new;
                    true
                } else if *on_false == old {
                    *on_false = new;
                    true
                } else {
                    false
                }
            }
            _ => false,
        }
    }

    /// Structural equality of the node's observable content, ignoring ids,
    /// edges and path metadata.
    pub fn same_content(&self, other: &Node) -> bool {
        match (&self.kind, &other.kind) {
            (NodeKind::Call { call: a, .. }, NodeKind::Call { call: b, .. }) => {
                a.function_name == b.function_name
                    && a.args.len() == b.args.len()
                    && a.args.iter().all(|(k, arg)| {
                        b.args
                            .get(k)
                            .is_some_and(|o| o.expr == arg.expr && o.input == arg.input)
                    })
            }
            (
                NodeKind::Branch { condition: a, .. },
                NodeKind::Branch { condition: b, .. },
            ) => a == b,
            (NodeKind::ReturnInit { value: a }, NodeKind::ReturnInit { value: b }) => a == b,
            (
                NodeKind::ReturnProcess { value: a, op: oa },
                NodeKind::ReturnProcess { value: b, op: ob },
            ) => a == b && oa == ob,
            _ => false,
        }
    }

    pub(crate) fn rename_arrays(&mut self, map: &BTreeMap<String, String>) {
        match &mut self.kind {
            NodeKind::Call { call, .. } => *call = call.rename_arrays(map),
            NodeKind::Branch { condition, .. } => *condition = condition.rename_arrays(map),
            NodeKind::ReturnRaw { calls } => {
                for path in calls.iter_mut() {
                    for c in path.iter_mut() {
                        *c = c.rename_arrays(map);
                    }
                }
            }
            _ => {}
        }
        for c in self.constraints.iter_mut() {
            *c = c.rename_arrays(map);
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            NodeKind::Call { .. } => "CALL",
            NodeKind::Branch { .. } => "BRANCH",
            NodeKind::ReturnInit { .. } => "RETURN_INIT",
            NodeKind::ReturnProcess { .. } => "RETURN_PROCESS",
            NodeKind::ReturnRaw { .. } => "RETURN_RAW",
        }
    }
}

impl Display for Node {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            NodeKind::Call { call, .. } => write!(f, "{}: {}", self.id, call),
            NodeKind::Branch { condition, .. } => write!(f, "{}: if {}", self.id, condition),
            NodeKind::ReturnInit { value } => write!(f, "{}: return {}", self.id, value),
            NodeKind::ReturnProcess { value, op } => {
                write!(f, "{}: return {} {}", self.id, op, value)
            }
            NodeKind::ReturnRaw { calls } => {
                write!(f, "{}: raw return ({} paths)", self.id, calls.len())
            }
        }
    }
}
