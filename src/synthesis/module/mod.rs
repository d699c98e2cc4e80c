//! Per-target pattern matchers. A module looks at the diagram node under a
//! plan's active leaf and, when it can realize it, returns the plans that
//! result.

use std::fmt::{Debug, Display, Formatter};

use tracing::{Level, event};

use crate::bdd::{Node, NodeKind, ReturnOp};
use crate::error::SynapseError;
use crate::expr::SolverToolbox;
use crate::synthesis::plan::{ExecutionPlan, ModuleInstance, Successor};
use crate::synthesis::target::TargetType;

pub mod tofino;
pub mod x86;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ModuleKind {
    /// Runs one API call as is.
    Call(String),
    If,
    Then,
    Else,
    Forward,
    Drop,
    Broadcast,
    Ignore,
    ParseHeader,
    ModifyHeader,
    TableLookup,
    SendToController,
}

impl Display for ModuleKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ModuleKind::Call(name) => write!(f, "{name}"),
            other => write!(f, "{other:?}"),
        }
    }
}

pub trait Module: Debug {
    fn target(&self) -> TargetType;

    fn kind(&self) -> ModuleKind;

    /// Plans that realize `node`, the diagram node under the active leaf of
    /// `plan`. Empty when the module does not apply.
    fn process(
        &self,
        plan: &ExecutionPlan,
        node: &Node,
        solver: &SolverToolbox,
    ) -> Result<Vec<ExecutionPlan>, SynapseError>;

    fn instance(&self) -> ModuleInstance {
        ModuleInstance::new(self.target(), self.kind())
    }
}

/// Continues with the node after `node` on the same target.
pub(crate) fn emit_linear(
    plan: &ExecutionPlan,
    node: &Node,
    module: ModuleInstance,
) -> Result<Vec<ExecutionPlan>, SynapseError> {
    let Some(next) = node.next() else {
        return Ok(vec![]);
    };
    let target = module.target;
    let mut out = plan.clone();
    out.emit(module, node.id, vec![Successor::to(next, target)])?;
    Ok(vec![out])
}

/// Closes the plan's active leaf with a terminal module.
pub(crate) fn emit_terminal(
    plan: &ExecutionPlan,
    node: &Node,
    module: ModuleInstance,
) -> Result<Vec<ExecutionPlan>, SynapseError> {
    let mut out = plan.clone();
    out.emit(module, node.id, vec![])?;
    Ok(vec![out])
}

/// Forwards, drops and broadcasts a packet; shared by every target.
#[derive(Debug)]
pub struct Terminal {
    pub target: TargetType,
    pub kind: ModuleKind,
}

impl Module for Terminal {
    fn target(&self) -> TargetType {
        self.target
    }

    fn kind(&self) -> ModuleKind {
        self.kind.clone()
    }

    fn process(
        &self,
        plan: &ExecutionPlan,
        node: &Node,
        _: &SolverToolbox,
    ) -> Result<Vec<ExecutionPlan>, SynapseError> {
        let NodeKind::ReturnProcess { op, value } = node.kind else {
            return Ok(vec![]);
        };
        let instance = match (&self.kind, op) {
            (ModuleKind::Forward, ReturnOp::Fwd) => {
                self.instance().with_detail(format!("port {value}"))
            }
            // nothing was sent: the packet is gone
            (ModuleKind::Drop, ReturnOp::Drop | ReturnOp::Err) => self.instance(),
            (ModuleKind::Broadcast, ReturnOp::Bcast) => self.instance(),
            _ => return Ok(vec![]),
        };
        emit_terminal(plan, node, instance)
    }
}

pub(crate) fn terminals(target: TargetType) -> Vec<Box<dyn Module>> {
    [ModuleKind::Forward, ModuleKind::Drop, ModuleKind::Broadcast]
        .into_iter()
        .map(|kind| Box::new(Terminal { target, kind }) as Box<dyn Module>)
        .collect()
}

/// Every module available to a search.
#[derive(Debug, Default)]
pub struct ModuleBank {
    modules: Vec<Box<dyn Module>>,
}

impl ModuleBank {
    /// The full module set of each listed target.
    pub fn new(targets: &[TargetType]) -> Self {
        let mut modules = vec![];
        for t in targets {
            match t {
                TargetType::X86 => modules.extend(x86::modules()),
                TargetType::Tofino => modules.extend(tofino::modules()),
            }
        }
        Self { modules }
    }

    pub fn with_modules(modules: Vec<Box<dyn Module>>) -> Self {
        Self { modules }
    }

    pub fn modules(&self) -> &[Box<dyn Module>] {
        &self.modules
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Every plan any module of the leaf's current target produces for the
    /// active leaf. A complete plan has no successors.
    pub fn successors(
        &self,
        plan: &ExecutionPlan,
        solver: &SolverToolbox,
    ) -> Result<Vec<ExecutionPlan>, SynapseError> {
        let Some(leaf) = plan.active_leaf() else {
            return Ok(vec![]);
        };
        let node = plan.bdd().node(leaf.next)?;
        let mut out = vec![];
        for m in self.modules.iter().filter(|m| m.target() == leaf.target) {
            let produced = m.process(plan, node, solver)?;
            if !produced.is_empty() {
                event!(
                    Level::TRACE,
                    "{} {} matched node {}",
                    m.target(),
                    m.kind(),
                    node.id
                );
            }
            out.extend(produced);
        }
        Ok(out)
    }
}
