use thiserror::Error;

use crate::bdd::NodeId;
use crate::config::error::SynapseConfigError;
use crate::expr::parser::ExprParseError;
use crate::synthesis::builder::SearchParamsBuilderError;

#[derive(Debug, Error)]
pub enum SynapseError {
    #[error("Malformed input (line {line}): {reason}")]
    MalformedInput { line: usize, reason: String },
    #[error("Unknown function: {0}")]
    UnknownFunction(String),
    #[error("BDD invariant violated: {0}")]
    GraphInvariantViolation(String),
    #[error("Packet chunks not aligned")]
    ChunkMisalignment,
    #[error("No module matches BDD node {node}")]
    NoModuleMatches { node: NodeId },
    #[error("Unable to group call paths: no discriminating constraint found")]
    NoDiscriminatingConstraint,
    #[error("No call paths were provided")]
    EmptyCallPaths,
    #[error("Attempted to search an empty execution plan space")]
    EmptySearch,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Config error: {0}")]
    Config(#[from] SynapseConfigError),
    #[error("Invalid search params")]
    SearchParams(#[from] SearchParamsBuilderError),
}

impl SynapseError {
    pub fn malformed<T: Into<String>>(line: usize, reason: T) -> Self {
        SynapseError::MalformedInput {
            line,
            reason: reason.into(),
        }
    }

    pub(crate) fn from_parse(line: usize, err: ExprParseError) -> Self {
        SynapseError::malformed(line, err.to_string())
    }

    pub(crate) fn invariant<T: Into<String>>(reason: T) -> Self {
        SynapseError::GraphInvariantViolation(reason.into())
    }
}
