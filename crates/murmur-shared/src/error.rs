use thiserror::Error;

/// Errors raised while converting persisted values back into model types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("Unknown participant role: {0}")]
    UnknownRole(String),

    #[error("Unknown chat request status: {0}")]
    UnknownStatus(String),

    #[error("Unknown table: {0}")]
    UnknownTable(String),
}
