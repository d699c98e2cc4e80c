use crate::synthesis::heuristic::{Category, Heuristic, Objective};

/// Shallowest plans first, in the order they were found.
#[derive(Debug)]
pub struct Bfs;

impl Heuristic for Bfs {
    fn name(&self) -> &'static str {
        "bfs"
    }

    fn objectives(&self) -> &[(Category, Objective)] {
        &[(Category::Depth, Objective::Minimize)]
    }
}

/// Deepest and newest plans first; stops at the first complete plan.
#[derive(Debug)]
pub struct Dfs;

impl Heuristic for Dfs {
    fn name(&self) -> &'static str {
        "dfs"
    }

    fn objectives(&self) -> &[(Category, Objective)] {
        &[(Category::Depth, Objective::Maximize)]
    }

    fn terminate_on_first_solution(&self) -> bool {
        true
    }

    fn prefers_newest(&self) -> bool {
        true
    }
}

#[derive(Debug)]
pub struct MostCompact;

impl Heuristic for MostCompact {
    fn name(&self) -> &'static str {
        "most-compact"
    }

    fn objectives(&self) -> &[(Category, Objective)] {
        &[
            (Category::NumberOfNodes, Objective::Minimize),
            (Category::Depth, Objective::Minimize),
        ]
    }
}

#[derive(Debug)]
pub struct LeastReordered;

impl Heuristic for LeastReordered {
    fn name(&self) -> &'static str {
        "least-reordered"
    }

    fn objectives(&self) -> &[(Category, Objective)] {
        &[
            (Category::NumberOfReorderedNodes, Objective::Minimize),
            (Category::NumberOfNodes, Objective::Minimize),
        ]
    }
}

#[derive(Debug)]
pub struct MaximizeSwitchNodes;

impl Heuristic for MaximizeSwitchNodes {
    fn name(&self) -> &'static str {
        "max-switch-nodes"
    }

    fn objectives(&self) -> &[(Category, Objective)] {
        &[
            (Category::NumberOfSwitchNodes, Objective::Maximize),
            (Category::NumberOfNodes, Objective::Minimize),
        ]
    }
}

/// Keeps as much as it can on the switch and as little as it can on the
/// controller path.
#[derive(Debug)]
pub struct Gallium;

impl Heuristic for Gallium {
    fn name(&self) -> &'static str {
        "gallium"
    }

    fn objectives(&self) -> &[(Category, Objective)] {
        &[
            (Category::SentToController, Objective::Minimize),
            (Category::NumberOfSwitchNodes, Objective::Maximize),
            (Category::NumberOfNodes, Objective::Minimize),
        ]
    }
}

#[cfg(test)]
mod tests {
    use crate::bdd::ReturnOp;
    use crate::bdd::builder::tests::{map_get, now};
    use crate::bdd::tests::chain;
    use crate::synthesis::heuristic::strategies::{Bfs, Dfs, Gallium};
    use crate::synthesis::heuristic::{Heuristic, Score};
    use crate::synthesis::module::ModuleKind;
    use crate::synthesis::plan::{ExecutionPlan, ModuleInstance, Successor};
    use crate::synthesis::target::TargetType;

    fn one_step(target: TargetType, kind: ModuleKind) -> ExecutionPlan {
        let bdd = chain(vec![map_get(6), now()], ReturnOp::Fwd, 1);
        let root = bdd.process;
        let next = bdd.node(root).unwrap().next().unwrap();
        let mut plan = ExecutionPlan::new(bdd, target);
        plan.emit(
            ModuleInstance::new(target, kind),
            root,
            vec![Successor::to(next, TargetType::X86)],
        )
        .unwrap();
        plan
    }

    #[test]
    fn test_depth_orders_bfs_and_dfs() {
        let bdd = chain(vec![now()], ReturnOp::Fwd, 1);
        let empty = ExecutionPlan::new(bdd, TargetType::X86);
        let deeper = one_step(TargetType::X86, ModuleKind::Call("map_get".into()));
        assert!(Bfs.score(&empty) > Bfs.score(&deeper));
        assert!(Dfs.score(&deeper) > Dfs.score(&empty));
        assert_eq!(Dfs.score(&deeper), Score(vec![1]));
    }

    #[test]
    fn test_gallium_prefers_the_switch() {
        let switch = one_step(TargetType::Tofino, ModuleKind::TableLookup);
        let controller = one_step(TargetType::Tofino, ModuleKind::SendToController);
        let cpu = one_step(TargetType::X86, ModuleKind::Call("map_get".into()));
        assert!(Gallium.score(&switch) > Gallium.score(&controller));
        assert!(Gallium.score(&switch) > Gallium.score(&cpu));
        assert_eq!(Gallium.score(&switch), Score(vec![0, 1, -1]));
    }
}
