use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt::{Display, Formatter};

use colored::Colorize;
use tracing::{Level, event, instrument};

use crate::bdd::{Bdd, NodeId, NodeKind};
use crate::error::SynapseError;
use crate::expr::SolverToolbox;
use crate::reorder::{Anchor, get_reordered_bdds};
use crate::synthesis::builder::SearchParams;
use crate::synthesis::heuristic::{Heuristic, Score};
use crate::synthesis::module::ModuleBank;
use crate::synthesis::plan::ExecutionPlan;
use crate::synthesis::target::TargetType;

struct Entry {
    score: Score,
    seq: usize,
    newest_first: bool,
    plan: ExecutionPlan,
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        let age = if self.newest_first {
            self.seq.cmp(&other.seq)
        } else {
            other.seq.cmp(&self.seq)
        };
        self.score.cmp(&other.score).then(age)
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

#[derive(Clone, Debug)]
pub struct SearchReport {
    pub winner: ExecutionPlan,
    pub score: Score,
    /// Plans popped from the frontier.
    pub explored: usize,
    /// Complete plans seen, the winner included.
    pub solutions: usize,
    pub reordered_plans: usize,
}

impl Display for SearchReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.winner)?;
        writeln!(
            f,
            "{} score {}, {} plans explored, {} solutions, {} reordered plans",
            "Search:".bold(),
            self.score.to_string().green(),
            self.explored,
            self.solutions,
            self.reordered_plans
        )
    }
}

/// Best-first exploration of the plans a module bank can build for one
/// diagram.
pub struct SearchEngine<'a> {
    bdd: Bdd,
    bank: ModuleBank,
    heuristic: Box<dyn Heuristic>,
    start: TargetType,
    max_reordered: Option<usize>,
    max_expansions: Option<usize>,
    solver: &'a SolverToolbox,
    frontier: BinaryHeap<Entry>,
    seq: usize,
}

impl<'a> SearchEngine<'a> {
    pub(crate) fn new(params: &SearchParams, bdd: Bdd, bank: ModuleBank, solver: &'a SolverToolbox) -> Self {
        Self {
            bdd,
            bank,
            heuristic: params.heuristic.build(params.seed),
            start: params.targets.first().copied().unwrap_or(TargetType::X86),
            max_reordered: params.max_reordered,
            max_expansions: params.max_expansions,
            solver,
            frontier: BinaryHeap::new(),
            seq: 0,
        }
    }

    fn push(&mut self, plan: ExecutionPlan) {
        let score = self.heuristic.score(&plan);
        self.seq += 1;
        self.frontier.push(Entry {
            score,
            seq: self.seq,
            newest_first: self.heuristic.prefers_newest(),
            plan,
        });
    }

    /// The plans obtained by hoisting each legal candidate onto the edge
    /// leading into the active leaf.
    fn reorderings(&self, plan: &ExecutionPlan) -> Result<Vec<ExecutionPlan>, SynapseError> {
        if self
            .max_reordered
            .is_some_and(|max| plan.reordered_nodes() >= max)
        {
            return Ok(vec![]);
        }
        let Some(leaf) = plan.active_leaf() else {
            return Ok(vec![]);
        };
        let bdd = plan.bdd();
        let Some(prev) = bdd.node(leaf.next)?.prev else {
            return Ok(vec![]);
        };
        let anchor = match bdd.node(prev)?.kind {
            NodeKind::Branch { on_true, .. } => Anchor::with_direction(prev, on_true == leaf.next),
            _ => Anchor::new(prev),
        };
        get_reordered_bdds(bdd, anchor, self.solver)?
            .into_iter()
            .map(|r| plan.reordered(r))
            .collect()
    }

    /// Runs until the heuristic is satisfied, the frontier empties or the
    /// expansion bound is hit, and returns the best complete plan seen.
    #[instrument(skip_all, fields(heuristic = self.heuristic.name()))]
    pub fn search(&mut self) -> Result<SearchReport, SynapseError> {
        self.frontier.clear();
        self.push(ExecutionPlan::new(self.bdd.clone(), self.start));
        let mut best: Option<(Score, ExecutionPlan)> = None;
        let (mut explored, mut solutions, mut reordered_plans) = (0, 0, 0);
        let mut stuck: Option<NodeId> = None;

        'search: while let Some(entry) = self.frontier.pop() {
            if self.max_expansions.is_some_and(|max| explored >= max) {
                event!(Level::WARN, "Stopping after {} expansions", explored);
                break;
            }
            explored += 1;
            let plan = entry.plan;
            let direct = self.bank.successors(&plan, self.solver)?;
            if direct.is_empty() {
                if let Some(leaf) = plan.active_leaf() {
                    event!(Level::DEBUG, "No module for node {} on {}", leaf.next, leaf.target);
                    stuck.get_or_insert(leaf.next);
                }
                continue;
            }
            let mut successors = vec![];
            for s in direct {
                let reordered = self.reorderings(&s)?;
                reordered_plans += reordered.len();
                successors.push(s);
                successors.extend(reordered);
            }
            for s in successors {
                if !s.is_complete() {
                    self.push(s);
                    continue;
                }
                solutions += 1;
                let score = self.heuristic.score(&s);
                event!(Level::DEBUG, "Solution {} scored {}", solutions, score);
                if best.as_ref().is_none_or(|(b, _)| score > *b) {
                    best = Some((score, s));
                }
                if self.heuristic.terminate_on_first_solution() {
                    break 'search;
                }
            }
        }

        let Some((score, winner)) = best else {
            return Err(match stuck {
                Some(node) => SynapseError::NoModuleMatches { node },
                None => SynapseError::EmptySearch,
            });
        };
        event!(
            Level::INFO,
            "Explored {} plans and found {} solutions",
            explored,
            solutions
        );
        Ok(SearchReport {
            winner,
            score,
            explored,
            solutions,
            reordered_plans,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::bdd::builder::tests::{borrow, map_get, now, scenario_path};
    use crate::bdd::tests::chain;
    use crate::bdd::{BddBuilder, ReturnOp};
    use crate::error::SynapseError;
    use crate::expr::SolverToolbox;
    use crate::synthesis::builder::{SearchParams, SearchParamsBuilder};
    use crate::synthesis::heuristic::HeuristicKind;
    use crate::synthesis::module::x86::ApiCall;
    use crate::synthesis::module::{Module, ModuleBank, ModuleKind, Terminal};
    use crate::synthesis::target::TargetType;

    fn params(heuristic: HeuristicKind, targets: Vec<TargetType>) -> SearchParams {
        SearchParamsBuilder::default()
            .seed(0)
            .heuristic(heuristic)
            .targets(targets)
            .build()
            .unwrap()
    }

    #[test]
    fn test_dfs_finds_a_plan_as_deep_as_the_bdd() {
        let s = SolverToolbox::new();
        let bdd = BddBuilder::new("nf", &s).build(&[scenario_path()]).unwrap();
        let depth = bdd.depth(bdd.process);
        let modules: Vec<Box<dyn Module>> = vec![
            Box::new(ApiCall {
                function: "packet_borrow_next_chunk",
            }),
            Box::new(ApiCall { function: "map_get" }),
            Box::new(ApiCall {
                function: "current_time",
            }),
            Box::new(Terminal {
                target: TargetType::X86,
                kind: ModuleKind::Forward,
            }),
        ];
        let mut engine = params(HeuristicKind::Dfs, vec![TargetType::X86])
            .build_with(bdd, ModuleBank::with_modules(modules), &s)
            .unwrap();
        let report = engine.search().unwrap();
        assert_eq!(report.solutions, 1);
        assert!(report.winner.is_complete());
        assert_eq!(report.winner.depth(), depth);
        assert_eq!(report.winner.node_count(), 4);
    }

    #[test]
    fn test_gallium_keeps_everything_on_the_switch() {
        let s = SolverToolbox::new();
        let bdd = chain(vec![borrow(14, 0), map_get(6), now()], ReturnOp::Fwd, 1);
        let mut engine = params(HeuristicKind::Gallium, vec![TargetType::Tofino, TargetType::X86])
            .build(bdd, &s)
            .unwrap();
        let report = engine.search().unwrap();
        // the controller can take over before any of the three calls
        assert_eq!(report.solutions, 4);
        assert_eq!(report.winner.sent_to_controller(), 0);
        assert_eq!(report.winner.switch_nodes(), 4);
        let kinds: Vec<ModuleKind> = report
            .winner
            .nodes()
            .iter()
            .map(|n| n.module.kind.clone())
            .collect();
        assert_eq!(
            kinds,
            vec![
                ModuleKind::ParseHeader,
                ModuleKind::TableLookup,
                ModuleKind::Ignore,
                ModuleKind::Forward
            ]
        );
    }

    #[test]
    fn test_missing_module_is_reported() {
        let s = SolverToolbox::new();
        let bdd = chain(vec![map_get(6)], ReturnOp::Fwd, 1);
        let root = bdd.process;
        let modules: Vec<Box<dyn Module>> = vec![Box::new(ApiCall {
            function: "current_time",
        })];
        let mut engine = params(HeuristicKind::Bfs, vec![TargetType::X86])
            .build_with(bdd, ModuleBank::with_modules(modules), &s)
            .unwrap();
        assert!(matches!(
            engine.search(),
            Err(SynapseError::NoModuleMatches { node }) if node == root
        ));
    }

    #[test]
    fn test_no_targets() {
        let s = SolverToolbox::new();
        let bdd = chain(vec![now()], ReturnOp::Fwd, 1);
        assert!(matches!(
            params(HeuristicKind::Bfs, vec![]).build(bdd, &s),
            Err(SynapseError::EmptySearch)
        ));
    }

    #[test]
    fn test_expansion_bound() {
        let s = SolverToolbox::new();
        let bdd = chain(vec![map_get(6), now()], ReturnOp::Fwd, 1);
        let mut p = params(HeuristicKind::Bfs, vec![TargetType::X86]);
        p.max_expansions = Some(1);
        let mut engine = p.build(bdd, &s).unwrap();
        assert!(matches!(engine.search(), Err(SynapseError::EmptySearch)));
    }
}
