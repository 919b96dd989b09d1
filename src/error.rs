//! Error taxonomy for the room session engine.

use thiserror::Error;
use validator::ValidationError;

use crate::catalog::CatalogError;

/// Errors produced while handling an inbound action.
///
/// Every variant is local to the acting connection: it is reported back as an
/// `error` event and never tears down the room. The only room-fatal event in
/// the system is the host connection dropping, which is not an error at all.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Malformed or missing fields in an inbound action.
    #[error("invalid input: {0}")]
    Validation(String),
    /// Non-host attempting a host-only action, or a wrong-turn guess/skip.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Room code or player identity does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// The operation cannot be performed in the room's current phase.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Code generation kept colliding with existing rooms.
    #[error("no free room code available")]
    CodeSpaceExhausted,
    /// The track catalog collaborator failed.
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),
}

impl From<ValidationError> for ServiceError {
    fn from(err: ValidationError) -> Self {
        ServiceError::Validation(err.to_string())
    }
}
