use crate::bdd::{Bdd, NodeId, NodeKind};
use crate::error::SynapseError;
use crate::expr::{ConstraintSet, Expr, SolverToolbox};

/// One node of a path and, for branches, the side taken.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Step {
    pub node: NodeId,
    pub direction: Option<bool>,
}

/// A root-to-terminal walk through a process tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Path {
    pub steps: Vec<Step>,
}

impl Path {
    pub fn terminal(&self) -> Option<NodeId> {
        self.steps.last().map(|s| s.node)
    }

    /// Branch conditions as traversed: negated on the false side.
    pub fn conditions(&self, bdd: &Bdd) -> Result<ConstraintSet, SynapseError> {
        let mut out: Vec<Expr> = vec![];
        for step in &self.steps {
            let node = bdd.node(step.node)?;
            if let (Some(direction), Some(condition)) = (step.direction, node.condition()) {
                out.push(if direction {
                    condition.clone()
                } else {
                    condition.negated()
                });
            }
        }
        Ok(ConstraintSet::new(out))
    }
}

/// Every path from `root` to a terminal, true sides first.
pub fn paths(bdd: &Bdd, root: NodeId) -> Result<Vec<Path>, SynapseError> {
    let mut out = vec![];
    let mut stack = vec![(root, vec![])];
    while let Some((id, mut steps)) = stack.pop() {
        match &bdd.node(id)?.kind {
            NodeKind::Call { next, .. } => {
                steps.push(Step {
                    node: id,
                    direction: None,
                });
                stack.push((*next, steps));
            }
            NodeKind::Branch {
                on_true, on_false, ..
            } => {
                let mut other = steps.clone();
                other.push(Step {
                    node: id,
                    direction: Some(false),
                });
                steps.push(Step {
                    node: id,
                    direction: Some(true),
                });
                stack.push((*on_false, other));
                stack.push((*on_true, steps));
            }
            _ => {
                steps.push(Step {
                    node: id,
                    direction: None,
                });
                out.push(Path { steps });
            }
        }
    }
    Ok(out)
}

/// Whether both paths can be taken by the same packet.
pub fn compatible(
    first: (&Bdd, &Path),
    second: (&Bdd, &Path),
    solver: &SolverToolbox,
) -> Result<bool, SynapseError> {
    let a = first.1.conditions(first.0)?;
    let b = second.1.conditions(second.0)?;
    Ok(solver.constraints_compatible(&a, &b))
}
