use std::fmt::{Display, Formatter};

use colored::{ColoredString, Colorize};
use serde::{Deserialize, Serialize};

/// A platform an execution plan can place work on.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    X86,
    Tofino,
}

impl TargetType {
    /// Switch targets run in the data plane.
    pub fn is_switch(&self) -> bool {
        matches!(self, TargetType::Tofino)
    }

    pub(crate) fn paint(&self, s: &str) -> ColoredString {
        match self {
            TargetType::X86 => s.cyan(),
            TargetType::Tofino => s.magenta(),
        }
    }
}

impl Display for TargetType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TargetType::X86 => write!(f, "x86"),
            TargetType::Tofino => write!(f, "tofino"),
        }
    }
}
