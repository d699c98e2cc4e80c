use tracing::{Level, event};

use crate::bdd::{Node, NodeKind};
use crate::call_path::functions::{
    CURRENT_TIME, DCHAIN_REJUVENATE_INDEX, MAP_GET, PACKET_BORROW_NEXT_CHUNK, PACKET_RETURN_CHUNK,
    RTE_LCORE_COUNT, VECTOR_BORROW,
};
use crate::error::SynapseError;
use crate::expr::SolverToolbox;
use crate::synthesis::module::{Module, ModuleKind, emit_linear, terminals};
use crate::synthesis::plan::{ExecutionPlan, Successor};
use crate::synthesis::target::TargetType;

/// Calls with no effect on the data plane.
pub const IGNORED_CALLS: &[&str] = &[CURRENT_TIME, DCHAIN_REJUVENATE_INDEX, RTE_LCORE_COUNT];

#[derive(Debug)]
pub struct Ignore;

impl Module for Ignore {
    fn target(&self) -> TargetType {
        TargetType::Tofino
    }

    fn kind(&self) -> ModuleKind {
        ModuleKind::Ignore
    }

    fn process(
        &self,
        plan: &ExecutionPlan,
        node: &Node,
        _: &SolverToolbox,
    ) -> Result<Vec<ExecutionPlan>, SynapseError> {
        match node.call() {
            Some(call) if IGNORED_CALLS.contains(&call.function_name.as_str()) => {
                emit_linear(plan, node, self.instance().with_detail(&call.function_name))
            }
            _ => Ok(vec![]),
        }
    }
}

#[derive(Debug)]
pub struct ParseHeader;

impl Module for ParseHeader {
    fn target(&self) -> TargetType {
        TargetType::Tofino
    }

    fn kind(&self) -> ModuleKind {
        ModuleKind::ParseHeader
    }

    fn process(
        &self,
        plan: &ExecutionPlan,
        node: &Node,
        _: &SolverToolbox,
    ) -> Result<Vec<ExecutionPlan>, SynapseError> {
        let Some(call) = node.call().filter(|c| c.is(PACKET_BORROW_NEXT_CHUNK)) else {
            return Ok(vec![]);
        };
        let mut instance = self.instance();
        if let Some(len) = call.arg_expr("length").and_then(|l| l.as_constant()) {
            instance = instance.with_detail(format!("{len} bytes"));
        }
        emit_linear(plan, node, instance)
    }
}

#[derive(Debug)]
pub struct ModifyHeader;

impl Module for ModifyHeader {
    fn target(&self) -> TargetType {
        TargetType::Tofino
    }

    fn kind(&self) -> ModuleKind {
        ModuleKind::ModifyHeader
    }

    fn process(
        &self,
        plan: &ExecutionPlan,
        node: &Node,
        _: &SolverToolbox,
    ) -> Result<Vec<ExecutionPlan>, SynapseError> {
        if !node.is_call_to(PACKET_RETURN_CHUNK) {
            return Ok(vec![]);
        }
        emit_linear(plan, node, self.instance())
    }
}

/// A branch evaluated in the pipeline. Both sides stay on the switch.
#[derive(Debug)]
pub struct If;

impl Module for If {
    fn target(&self) -> TargetType {
        TargetType::Tofino
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
        let mut out = plan.clone();
        out.emit(
            self.instance().with_detail(condition.to_string()),
            node.id,
            vec![
                Successor::to(*on_true, TargetType::Tofino),
                Successor::to(*on_false, TargetType::Tofino),
            ],
        )?;
        Ok(vec![out])
    }
}

/// A map lookup turned into a match-action table. A `vector_borrow` right
/// after it, indexed by the value found, is answered by the same table and
/// dropped from the plan's diagram.
#[derive(Debug)]
pub struct TableLookup;

impl TableLookup {
    /// The `vector_borrow` this lookup can absorb, if any.
    fn fusable(plan: &ExecutionPlan, node: &Node, solver: &SolverToolbox) -> Option<u64> {
        let found = node.call()?.arg_out("value_out")?;
        let next = plan.bdd().get(node.next()?)?;
        let index = next.call().filter(|c| c.is(VECTOR_BORROW))?.arg_expr("index")?;
        if index.width() != found.width() {
            return None;
        }
        let constraints = node.combined_constraints();
        (index == found || solver.always_equal(index, found, &[&constraints])).then_some(next.id)
    }
}

impl Module for TableLookup {
    fn target(&self) -> TargetType {
        TargetType::Tofino
    }

    fn kind(&self) -> ModuleKind {
        ModuleKind::TableLookup
    }

    fn process(
        &self,
        plan: &ExecutionPlan,
        node: &Node,
        solver: &SolverToolbox,
    ) -> Result<Vec<ExecutionPlan>, SynapseError> {
        if !node.is_call_to(MAP_GET) {
            return Ok(vec![]);
        }
        let table = format!("table_{}", node.id);
        let Some(borrow) = Self::fusable(plan, node, solver) else {
            let mut out = emit_linear(plan, node, self.instance().with_detail(&table))?;
            for p in &mut out {
                p.remember(node.id, &table);
            }
            return Ok(out);
        };
        let keep = plan
            .bdd()
            .node(borrow)?
            .next()
            .ok_or_else(|| SynapseError::invariant("vector_borrow without successor"))?;
        let mut bdd = plan.bdd().clone();
        bdd.short_circuit(borrow, keep)?;
        event!(
            Level::TRACE,
            "Fused vector_borrow {} into the lookup at {}",
            borrow,
            node.id
        );
        let mut out = plan.clone();
        out.replace_bdd(bdd);
        out.remember(node.id, &table);
        out.remember(borrow, &table);
        out.emit(
            self.instance()
                .with_detail(format!("{table} (+ vector_borrow {borrow})")),
            node.id,
            vec![Successor::to(keep, TargetType::Tofino)],
        )?;
        Ok(vec![out])
    }
}

/// Hands the packet to the CPU. The node under the leaf is left for an x86
/// module to realize.
#[derive(Debug)]
pub struct SendToController;

impl Module for SendToController {
    fn target(&self) -> TargetType {
        TargetType::Tofino
    }

    fn kind(&self) -> ModuleKind {
        ModuleKind::SendToController
    }

    fn process(
        &self,
        plan: &ExecutionPlan,
        node: &Node,
        _: &SolverToolbox,
    ) -> Result<Vec<ExecutionPlan>, SynapseError> {
        if node.is_terminal() {
            return Ok(vec![]);
        }
        let mut out = plan.clone();
        out.emit(
            self.instance(),
            node.id,
            vec![Successor::to(node.id, TargetType::X86)],
        )?;
        Ok(vec![out])
    }
}

/// Every switch module. `SendToController` only leads somewhere when the
/// bank also holds the x86 modules.
pub fn modules() -> Vec<Box<dyn Module>> {
    let mut out: Vec<Box<dyn Module>> = vec![
        Box::new(Ignore),
        Box::new(ParseHeader),
        Box::new(ModifyHeader),
        Box::new(If),
        Box::new(TableLookup),
        Box::new(SendToController),
    ];
    out.extend(terminals(TargetType::Tofino));
    out
}

#[cfg(test)]
mod tests {
    use crate::bdd::ReturnOp;
    use crate::bdd::builder::tests::{borrow, map_get, now};
    use crate::bdd::tests::chain;
    use crate::call_path::{Arg, Call};
    use crate::expr::{Expr, SolverToolbox};
    use crate::synthesis::module::tofino::{SendToController, TableLookup};
    use crate::synthesis::module::{Module, ModuleBank, ModuleKind};
    use crate::synthesis::plan::ExecutionPlan;
    use crate::synthesis::target::TargetType;

    fn vector_borrow(index: Expr) -> Call {
        Call::new("vector_borrow")
            .with_arg("vector", Arg::value(Expr::constant(0x4000, 64)))
            .with_arg("index", Arg::value(index))
            .with_arg(
                "val_out",
                Arg::pointer(Expr::constant(0x5000, 64), None, Some(Expr::constant(0x6000, 64))),
            )
            .with_extra("borrowed_cell", None, Some(Expr::read_lsb("vector_data_reset", 0, 4)))
    }

    #[test]
    fn test_lookup_absorbs_vector_borrow() {
        let s = SolverToolbox::new();
        let index = Expr::read_lsb("allocated_index", 0, 4);
        let bdd = chain(vec![map_get(6), vector_borrow(index), now()], ReturnOp::Fwd, 1);
        let root = bdd.process;
        let borrow_id = bdd.node(root).unwrap().next().unwrap();
        let plan = ExecutionPlan::new(bdd, TargetType::Tofino);
        let node = plan.bdd().node(root).unwrap().clone();
        let out = TableLookup.process(&plan, &node, &s).unwrap();
        assert_eq!(out.len(), 1);
        let fused = &out[0];
        assert!(fused.bdd().get(borrow_id).is_none());
        assert_eq!(fused.recall(borrow_id), Some(fused.recall(root).unwrap()));
        let leaf = fused.active_leaf().unwrap();
        assert!(fused.bdd().node(leaf.next).unwrap().is_call_to("current_time"));
        assert!(plan.bdd().get(borrow_id).is_some());
    }

    #[test]
    fn test_unrelated_borrow_stays() {
        let s = SolverToolbox::new();
        let bdd = chain(
            vec![map_get(6), vector_borrow(Expr::constant(3, 32))],
            ReturnOp::Drop,
            0,
        );
        let root = bdd.process;
        let plan = ExecutionPlan::new(bdd, TargetType::Tofino);
        let node = plan.bdd().node(root).unwrap().clone();
        let out = TableLookup.process(&plan, &node, &s).unwrap();
        let next = out[0].active_leaf().unwrap().next;
        assert!(out[0].bdd().node(next).unwrap().is_call_to("vector_borrow"));
        assert_eq!(out[0].recall(root), Some(format!("table_{root}").as_str()));
    }

    #[test]
    fn test_controller_hands_over_to_x86() {
        let s = SolverToolbox::new();
        let bdd = chain(vec![borrow(14, 0), map_get(6), now()], ReturnOp::Fwd, 1);
        let root = bdd.process;
        let plan = ExecutionPlan::new(bdd, TargetType::Tofino);
        let node = plan.bdd().node(root).unwrap().clone();
        let out = SendToController.process(&plan, &node, &s).unwrap();
        let leaf = out[0].active_leaf().unwrap();
        assert_eq!(leaf.next, root);
        assert_eq!(leaf.target, TargetType::X86);
        assert_eq!(out[0].sent_to_controller(), 1);

        // only x86 modules follow the hand-over
        let bank = ModuleBank::new(&[TargetType::Tofino, TargetType::X86]);
        let next = bank.successors(&out[0], &s).unwrap();
        assert_eq!(next.len(), 1);
        assert_eq!(
            next[0].nodes().last().unwrap().module.kind,
            ModuleKind::Call("packet_borrow_next_chunk".into())
        );
    }
}
