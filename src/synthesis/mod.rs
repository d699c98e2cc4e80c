//! Search for target-specific execution plans of a diagram.

pub mod builder;
pub mod heuristic;
pub mod module;
pub mod plan;
pub mod search;
pub mod target;

pub use builder::{SearchParams, SearchParamsBuilder};
pub use heuristic::{Heuristic, HeuristicKind, Score};
pub use module::{Module, ModuleBank, ModuleKind};
pub use plan::{ExecutionPlan, ModuleInstance};
pub use search::{SearchEngine, SearchReport};
pub use target::TargetType;
