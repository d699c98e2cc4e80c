use serde::{Deserialize, Serialize};

use crate::config::error::SynapseConfigError;
use crate::synthesis::heuristic::HeuristicKind;
use crate::synthesis::target::TargetType;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SearchConfig {
    #[serde(default)]
    pub heuristic: HeuristicKind,
    #[serde(default = "default_targets")]
    pub targets: Vec<TargetType>,
    /// `-1` leaves reordering unbounded.
    #[serde(default = "unbounded")]
    pub max_reordered: i64,
    pub max_expansions: Option<usize>,
}

fn default_targets() -> Vec<TargetType> {
    vec![TargetType::X86]
}

fn unbounded() -> i64 {
    -1
}

/// `-1` means no bound.
pub(crate) fn reorder_bound(value: i64) -> Result<Option<usize>, SynapseConfigError> {
    match value {
        -1 => Ok(None),
        v if v >= 0 => Ok(Some(v as usize)),
        v => Err(SynapseConfigError::InvalidReorderBound(v)),
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            heuristic: HeuristicKind::default(),
            targets: default_targets(),
            max_reordered: unbounded(),
            max_expansions: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ReorderConfig {
    #[serde(default = "unbounded")]
    pub max_reordering: i64,
}

impl Default for ReorderConfig {
    fn default() -> Self {
        Self {
            max_reordering: unbounded(),
        }
    }
}

impl ReorderConfig {
    pub fn bound(&self) -> Result<Option<usize>, SynapseConfigError> {
        reorder_bound(self.max_reordering)
    }
}
