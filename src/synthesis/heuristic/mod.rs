//! Scores that order the search frontier.

use std::fmt::{Debug, Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::synthesis::heuristic::random::Random;
use crate::synthesis::heuristic::strategies::{
    Bfs, Dfs, Gallium, LeastReordered, MaximizeSwitchNodes, MostCompact,
};
use crate::synthesis::plan::ExecutionPlan;

pub mod random;
pub mod strategies;

/// A measurable property of a plan.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Category {
    SentToController,
    NumberOfReorderedNodes,
    NumberOfNodes,
    Depth,
    NumberOfSwitchNodes,
}

impl Category {
    pub fn measure(&self, plan: &ExecutionPlan) -> i64 {
        let v = match self {
            Category::SentToController => plan.sent_to_controller(),
            Category::NumberOfReorderedNodes => plan.reordered_nodes(),
            Category::NumberOfNodes => plan.node_count(),
            Category::Depth => plan.depth(),
            Category::NumberOfSwitchNodes => plan.switch_nodes(),
        };
        v as i64
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Objective {
    Minimize,
    Maximize,
}

/// Compared lexicographically; greater is better.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Score(pub Vec<i64>);

impl Display for Score {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|v| v.to_string()).collect();
        write!(f, "<{}>", parts.join(", "))
    }
}

pub trait Heuristic: Debug {
    fn name(&self) -> &'static str;

    /// Categories in decreasing order of importance.
    fn objectives(&self) -> &[(Category, Objective)];

    fn terminate_on_first_solution(&self) -> bool {
        false
    }

    /// Among equally scored plans, whether the most recently found wins.
    fn prefers_newest(&self) -> bool {
        false
    }

    fn score(&mut self, plan: &ExecutionPlan) -> Score {
        Score(
            self.objectives()
                .iter()
                .map(|(c, o)| match o {
                    Objective::Maximize => c.measure(plan),
                    Objective::Minimize => -c.measure(plan),
                })
                .collect(),
        )
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HeuristicKind {
    Bfs,
    #[default]
    Dfs,
    Random,
    MostCompact,
    LeastReordered,
    #[serde(rename = "max-switch-nodes")]
    MaximizeSwitchNodes,
    Gallium,
}

impl HeuristicKind {
    pub fn build(&self, seed: i64) -> Box<dyn Heuristic> {
        match self {
            HeuristicKind::Bfs => Box::new(Bfs),
            HeuristicKind::Dfs => Box::new(Dfs),
            HeuristicKind::Random => Box::new(Random::new(seed)),
            HeuristicKind::MostCompact => Box::new(MostCompact),
            HeuristicKind::LeastReordered => Box::new(LeastReordered),
            HeuristicKind::MaximizeSwitchNodes => Box::new(MaximizeSwitchNodes),
            HeuristicKind::Gallium => Box::new(Gallium),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::synthesis::heuristic::{HeuristicKind, Score};

    #[test]
    fn test_scores_are_lexicographic() {
        assert!(Score(vec![0, -5]) > Score(vec![-1, 100]));
        assert!(Score(vec![2, -3]) > Score(vec![2, -4]));
    }

    #[test]
    fn test_kind_names() {
        let k: HeuristicKind = serde_json::from_str("\"max-switch-nodes\"").unwrap();
        assert_eq!(k, HeuristicKind::MaximizeSwitchNodes);
        let k: HeuristicKind = serde_json::from_str("\"most-compact\"").unwrap();
        assert_eq!(k.build(0).name(), "most-compact");
    }
}
