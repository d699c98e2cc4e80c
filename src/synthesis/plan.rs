//! Target-specific realizations of a diagram, built one module at a time.

use std::collections::{BTreeMap, VecDeque};
use std::fmt::{Display, Formatter};
use std::rc::Rc;

use colored::Colorize;

use crate::bdd::{Bdd, NodeId};
use crate::error::SynapseError;
use crate::reorder::ReorderedBdd;
use crate::synthesis::module::ModuleKind;
use crate::synthesis::target::TargetType;

pub type PlanNodeId = usize;

/// What one plan node runs, and where.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModuleInstance {
    pub target: TargetType,
    pub kind: ModuleKind,
    pub detail: Option<String>,
}

impl ModuleInstance {
    pub fn new(target: TargetType, kind: ModuleKind) -> Self {
        Self {
            target,
            kind,
            detail: None,
        }
    }

    pub fn with_detail<T: Into<String>>(mut self, detail: T) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlanNode {
    pub id: PlanNodeId,
    pub module: ModuleInstance,
    /// The diagram node this module stands for.
    pub bdd_node: NodeId,
    pub prev: Option<PlanNodeId>,
    pub next: Vec<PlanNodeId>,
    pub depth: usize,
}

/// A diagram node still waiting for a module, and where its module goes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Leaf {
    pub parent: Option<PlanNodeId>,
    pub next: NodeId,
    pub target: TargetType,
}

/// One way out of a freshly emitted plan node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Successor {
    /// Placed between the emitted node and the leaf, as `Then`/`Else` are.
    pub wrapper: Option<ModuleInstance>,
    /// `None` closes this side of the plan.
    pub next: Option<NodeId>,
    pub target: TargetType,
}

impl Successor {
    pub fn to(next: NodeId, target: TargetType) -> Self {
        Self {
            wrapper: None,
            next: Some(next),
            target,
        }
    }

    pub fn wrapped(wrapper: ModuleInstance, next: NodeId) -> Self {
        Self {
            target: wrapper.target,
            wrapper: Some(wrapper),
            next: Some(next),
        }
    }
}

/// A partial or complete plan. The diagram is shared between plans until
/// one of them rewrites it.
#[derive(Clone, Debug)]
pub struct ExecutionPlan {
    bdd: Rc<Bdd>,
    nodes: Vec<PlanNode>,
    leaves: VecDeque<Leaf>,
    depth: usize,
    nodes_per_target: BTreeMap<TargetType, usize>,
    reordered_nodes: usize,
    memory: BTreeMap<NodeId, String>,
}

impl ExecutionPlan {
    /// An empty plan whose only leaf is the process root.
    pub fn new(bdd: Bdd, target: TargetType) -> Self {
        let leaf = Leaf {
            parent: None,
            next: bdd.process,
            target,
        };
        Self {
            bdd: Rc::new(bdd),
            nodes: vec![],
            leaves: VecDeque::from([leaf]),
            depth: 0,
            nodes_per_target: BTreeMap::new(),
            reordered_nodes: 0,
            memory: BTreeMap::new(),
        }
    }

    pub fn bdd(&self) -> &Bdd {
        &self.bdd
    }

    pub fn active_leaf(&self) -> Option<&Leaf> {
        self.leaves.front()
    }

    pub fn leaves(&self) -> impl Iterator<Item = &Leaf> {
        self.leaves.iter()
    }

    pub fn is_complete(&self) -> bool {
        self.leaves.is_empty()
    }

    pub fn nodes(&self) -> &[PlanNode] {
        &self.nodes
    }

    pub fn node(&self, id: PlanNodeId) -> Option<&PlanNode> {
        self.nodes.get(id)
    }

    pub fn roots(&self) -> impl Iterator<Item = &PlanNode> {
        self.nodes.iter().filter(|n| n.prev.is_none())
    }

    /// Plan nodes on the longest root-to-leaf path.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn nodes_on(&self, target: TargetType) -> usize {
        self.nodes_per_target.get(&target).copied().unwrap_or(0)
    }

    pub fn switch_nodes(&self) -> usize {
        self.nodes_per_target
            .iter()
            .filter(|(t, _)| t.is_switch())
            .map(|(_, n)| n)
            .sum()
    }

    pub fn sent_to_controller(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| n.module.kind == ModuleKind::SendToController)
            .count()
    }

    pub fn reordered_nodes(&self) -> usize {
        self.reordered_nodes
    }

    pub fn remember<T: Into<String>>(&mut self, node: NodeId, note: T) {
        self.memory.insert(node, note.into());
    }

    pub fn recall(&self, node: NodeId) -> Option<&str> {
        self.memory.get(&node).map(String::as_str)
    }

    /// Swaps in a rewritten diagram. Leaves must still name live nodes.
    pub fn replace_bdd(&mut self, bdd: Bdd) {
        self.bdd = Rc::new(bdd);
    }

    /// Places `module` at the active leaf as the realization of `consumed`
    /// and queues a leaf for every successor that continues. New leaves go
    /// first, so one side of a branch is finished before the other starts.
    pub fn emit(
        &mut self,
        module: ModuleInstance,
        consumed: NodeId,
        successors: Vec<Successor>,
    ) -> Result<PlanNodeId, SynapseError> {
        let leaf = self
            .leaves
            .pop_front()
            .ok_or_else(|| SynapseError::invariant("emitting into a complete plan"))?;
        let id = self.push(module, consumed, leaf.parent);
        let mut fresh = vec![];
        for s in successors {
            let parent = match s.wrapper {
                Some(w) => self.push(w, consumed, Some(id)),
                None => id,
            };
            if let Some(next) = s.next {
                self.bdd.node(next)?;
                fresh.push(Leaf {
                    parent: Some(parent),
                    next,
                    target: s.target,
                });
            }
        }
        for leaf in fresh.into_iter().rev() {
            self.leaves.push_front(leaf);
        }
        Ok(id)
    }

    fn push(&mut self, module: ModuleInstance, bdd_node: NodeId, prev: Option<PlanNodeId>) -> PlanNodeId {
        let id = self.nodes.len();
        let depth = prev
            .and_then(|p| self.nodes.get(p))
            .map(|p| p.depth + 1)
            .unwrap_or(1);
        if let Some(p) = prev.and_then(|p| self.nodes.get_mut(p)) {
            p.next.push(id);
        }
        *self.nodes_per_target.entry(module.target).or_default() += 1;
        self.depth = self.depth.max(depth);
        self.nodes.push(PlanNode {
            id,
            module,
            bdd_node,
            prev,
            next: vec![],
            depth,
        });
        id
    }

    /// The same plan over a diagram in which a node was hoisted to the
    /// active leaf.
    pub fn reordered(&self, reordered: ReorderedBdd) -> Result<Self, SynapseError> {
        let mut out = self.clone();
        let leaf = out
            .leaves
            .front_mut()
            .ok_or_else(|| SynapseError::invariant("reordering a complete plan"))?;
        reordered.bdd.node(reordered.candidate)?;
        leaf.next = reordered.candidate;
        out.bdd = Rc::new(reordered.bdd);
        out.reordered_nodes += 1;
        Ok(out)
    }

    fn fmt_node(&self, f: &mut Formatter<'_>, id: PlanNodeId, level: usize) -> std::fmt::Result {
        let Some(node) = self.nodes.get(id) else {
            return Ok(());
        };
        let name = node.module.target.paint(&node.module.kind.to_string());
        write!(f, "{}[{}] {} ", "  ".repeat(level), node.module.target, name)?;
        write!(f, "{}", format!("(node {})", node.bdd_node).dimmed())?;
        if let Some(d) = &node.module.detail {
            write!(f, " {d}")?;
        }
        writeln!(f)?;
        for n in &node.next {
            self.fmt_node(f, *n, level + 1)?;
        }
        Ok(())
    }
}

impl Display for ExecutionPlan {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "{} ({} nodes, depth {}, {} reordered)",
            "Execution plan".bold(),
            self.node_count(),
            self.depth,
            self.reordered_nodes
        )?;
        for root in self.roots() {
            self.fmt_node(f, root.id, 1)?;
        }
        for leaf in &self.leaves {
            writeln!(
                f,
                "  {} node {} on {}",
                "pending".yellow(),
                leaf.next,
                leaf.target
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::bdd::ReturnOp;
    use crate::bdd::builder::tests::{map_get, now};
    use crate::bdd::tests::chain;
    use crate::synthesis::module::ModuleKind;
    use crate::synthesis::plan::{ExecutionPlan, ModuleInstance, Successor};
    use crate::synthesis::target::TargetType;

    #[test]
    fn test_emit_advances_the_leaf() {
        let bdd = chain(vec![map_get(6), now()], ReturnOp::Fwd, 1);
        let root = bdd.process;
        let second = bdd.node(root).unwrap().next().unwrap();
        let mut plan = ExecutionPlan::new(bdd, TargetType::X86);
        assert_eq!(plan.active_leaf().unwrap().next, root);

        let module = ModuleInstance::new(TargetType::X86, ModuleKind::Call("map_get".into()));
        let id = plan
            .emit(module, root, vec![Successor::to(second, TargetType::X86)])
            .unwrap();
        assert_eq!(id, 0);
        assert_eq!(plan.active_leaf().unwrap().next, second);
        assert_eq!(plan.active_leaf().unwrap().parent, Some(0));
        assert_eq!(plan.depth(), 1);
        assert_eq!(plan.nodes_on(TargetType::X86), 1);
        assert!(!plan.is_complete());
        assert!(plan.to_string().contains("map_get"));
    }

    #[test]
    fn test_memory_is_per_plan() {
        let bdd = chain(vec![now()], ReturnOp::Drop, 0);
        let mut plan = ExecutionPlan::new(bdd, TargetType::Tofino);
        let copy = plan.clone();
        plan.remember(3, "table_3");
        assert_eq!(plan.recall(3), Some("table_3"));
        assert_eq!(copy.recall(3), None);
    }
}
