use crate::bdd::{Node, NodeKind};
use crate::call_path::functions::*;
use crate::error::SynapseError;
use crate::expr::SolverToolbox;
use crate::synthesis::module::{Module, ModuleKind, emit_linear, terminals};
use crate::synthesis::plan::{ExecutionPlan, ModuleInstance, Successor};
use crate::synthesis::target::TargetType;

/// API calls the CPU runtime implements one-to-one.
pub const HANDLED_CALLS: &[&str] = &[
    MAP_GET,
    MAP_PUT,
    MAP_ERASE,
    MAP_SIZE,
    VECTOR_BORROW,
    VECTOR_RETURN,
    DCHAIN_ALLOCATE_NEW_INDEX,
    DCHAIN_REJUVENATE_INDEX,
    DCHAIN_IS_INDEX_ALLOCATED,
    DCHAIN_FREE_INDEX,
    EXPIRE_ITEMS_SINGLE_MAP,
    EXPIRE_ITEMS_SINGLE_MAP_ITERATIVELY,
    CHT_FIND_PREFERRED_AVAILABLE_BACKEND,
    SKETCH_COMPUTE_HASHES,
    SKETCH_REFRESH,
    SKETCH_FETCH,
    SKETCH_TOUCH_BUCKETS,
    SKETCH_EXPIRE,
    RTE_ETHER_ADDR_HASH,
    LOAD_BALANCED_FLOW_HASH,
    HASH_OBJ,
    CURRENT_TIME,
    RTE_LCORE_COUNT,
    PACKET_BORROW_NEXT_CHUNK,
    PACKET_RETURN_CHUNK,
    PACKET_CLONE,
    NF_SET_RTE_IPV4_UDPTCP_CHECKSUM,
];

#[derive(Debug)]
pub struct ApiCall {
    pub function: &'static str,
}

impl Module for ApiCall {
    fn target(&self) -> TargetType {
        TargetType::X86
    }

    fn kind(&self) -> ModuleKind {
        ModuleKind::Call(self.function.to_string())
    }

    fn process(
        &self,
        plan: &ExecutionPlan,
        node: &Node,
        _: &SolverToolbox,
    ) -> Result<Vec<ExecutionPlan>, SynapseError> {
        if !node.is_call_to(self.function) {
            return Ok(vec![]);
        }
        emit_linear(plan, node, self.instance())
    }
}

/// A branch, with `Then` and `Else` heading its two sides.
#[derive(Debug)]
pub struct If;

impl Module for If {
    fn target(&self) -> TargetType {
        TargetType::X86
    }

    fn kind(&self) -> ModuleKind {
        ModuleKind::If
    }

    fn process(
        &self,
        plan: &ExecutionPlan,
        node: &Node,
        _: &SolverToolbox,
    ) -> Result<Vec<ExecutionPlan>, SynapseError> {
        let NodeKind::Branch {
            condition,
            on_true,
            on_false,
        } = &node.kind
        else {
            return Ok(vec![]);
        };
        let then = ModuleInstance::new(TargetType::X86, ModuleKind::Then);
        let otherwise = ModuleInstance::new(TargetType::X86, ModuleKind::Else);
        let mut out = plan.clone();
        out.emit(
            self.instance().with_detail(condition.to_string()),
            node.id,
            vec![
                Successor::wrapped(then, *on_true),
                Successor::wrapped(otherwise, *on_false),
            ],
        )?;
        Ok(vec![out])
    }
}

pub fn modules() -> Vec<Box<dyn Module>> {
    let mut out: Vec<Box<dyn Module>> = HANDLED_CALLS
        .iter()
        .map(|f| Box::new(ApiCall { function: f }) as Box<dyn Module>)
        .collect();
    out.push(Box::new(If));
    out.extend(terminals(TargetType::X86));
    out
}

#[cfg(test)]
mod tests {
    use crate::bdd::BddBuilder;
    use crate::bdd::builder::tests::{borrow, map_get, send};
    use crate::call_path::{Call, CallPath};
    use crate::expr::{ConstraintSet, Expr, SolverToolbox};
    use crate::synthesis::module::{ModuleBank, ModuleKind};
    use crate::synthesis::plan::ExecutionPlan;
    use crate::synthesis::target::TargetType;

    #[test]
    fn test_branch_opens_two_leaves() {
        let s = SolverToolbox::new();
        let hit = Expr::read_lsb("map_has_this_key", 0, 4).ne(&Expr::constant(0, 32));
        let cps = [
            CallPath {
                filename: "hit".into(),
                constraints: ConstraintSet::new([hit.clone()]),
                calls: vec![borrow(14, 0), map_get(6), send(1)],
            },
            CallPath {
                filename: "miss".into(),
                constraints: ConstraintSet::new([hit.negated()]),
                calls: vec![borrow(14, 0), map_get(6), Call::new("packet_free")],
            },
        ];
        let bdd = BddBuilder::new("nf", &s).build(&cps).unwrap();
        let bank = ModuleBank::new(&[TargetType::X86]);
        let mut plan = ExecutionPlan::new(bdd, TargetType::X86);
        // borrow, lookup
        for _ in 0..2 {
            let next = bank.successors(&plan, &s).unwrap();
            assert_eq!(next.len(), 1);
            plan = next.into_iter().next().unwrap();
        }
        let next = bank.successors(&plan, &s).unwrap();
        assert_eq!(next.len(), 1);
        plan = next.into_iter().next().unwrap();
        assert_eq!(plan.leaves().count(), 2);
        let kinds: Vec<ModuleKind> = plan.nodes().iter().map(|n| n.module.kind.clone()).collect();
        assert!(kinds.contains(&ModuleKind::Then));
        assert!(kinds.contains(&ModuleKind::Else));
        while !plan.is_complete() {
            plan = bank.successors(&plan, &s).unwrap().remove(0);
        }
        assert_eq!(plan.node_count(), 7);
        assert_eq!(plan.depth(), 5);
    }
}
