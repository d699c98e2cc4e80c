use thiserror::Error;

#[derive(Debug, Error)]
pub enum SynapseConfigError {
    #[error("Invalid log level: {0}")]
    InvalidLogLevel(String),
    #[error("An error reading a file referenced from the config")]
    Io(#[from] std::io::Error),
    #[error("Malformed JSON config: {0}")]
    Json(#[from] serde_json::Error),
    #[cfg(feature = "toml")]
    #[error("Malformed TOML config: {0}")]
    Toml(#[from] toml_edit::de::Error),
    #[error("Conflict matrix must be 3x3 with entries in {{0, 1}}: {0}")]
    MalformedConflictMatrix(String),
    #[error("prior_changes must be 0 or 1, got {0}")]
    InvalidPriorChanges(u8),
    #[error("max_reordered must be -1 or non-negative, got {0}")]
    InvalidReorderBound(i64),
}
