pub mod bdd;
pub mod call_path;
#[cfg(feature = "bin")]
pub mod cli;
pub mod config;
pub mod error;
pub mod expr;
pub mod merge;
pub mod reorder;
pub mod symbol;
pub mod synthesis;
