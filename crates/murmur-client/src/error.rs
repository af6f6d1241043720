use thiserror::Error;

use murmur_shared::UserId;
use murmur_store::StoreError;

use crate::requests::RequestBlock;

/// Why an action failed.
///
/// Desync (a remote update for an id this client does not hold) is never an
/// error: the update is logged and dropped.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Rejected locally, nothing was sent.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Group members that are neither direct contacts nor accepted requests.
    #[error("Not admissible as group members: {0:?}")]
    InadmissibleMembers(Vec<UserId>),

    #[error("Not authorized: {0}")]
    Unauthorized(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Chat request rejected: {0}")]
    RequestRejected(RequestBlock),

    #[error("Not found")]
    NotFound,

    /// Backend failure; the caller may retry.
    #[error("Backend unavailable: {0}")]
    Transient(#[source] StoreError),
}

impl From<StoreError> for ClientError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::PermissionDenied(reason) => ClientError::Unauthorized(reason),
            StoreError::UniqueViolation(reason) => ClientError::Conflict(reason),
            StoreError::NotFound => ClientError::NotFound,
            StoreError::BlobTooLarge { size, max } => {
                ClientError::Validation(format!("blob is {size} bytes, limit is {max}"))
            }
            StoreError::InvalidPath(path) => {
                ClientError::Validation(format!("invalid blob path: {path}"))
            }
            other => ClientError::Transient(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
