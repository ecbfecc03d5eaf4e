//! Error taxonomy shared by the generation client and the coordinator.

use thiserror::Error;

/// Everything a generation operation can fail with.
///
/// The message of each variant is what lands in the failing entity's
/// `error` column, so it is written for an operator to read.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// The content, section or scene does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// The stage was invoked out of order.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// Caller input is out of bounds.
    #[error("validation error: {0}")]
    Validation(String),

    /// The provider rejected our credentials. Never retried.
    #[error("authentication with the generation provider failed: {0}")]
    Authentication(String),

    /// Timeout, connection failure, rate limit or overload.
    #[error("transient provider error: {0}")]
    TransientProvider(String),

    /// The provider answered, but not in the shape we asked for.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Any other provider-side failure (bad request, unknown model).
    #[error("provider error: {0}")]
    Provider(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl GenerationError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::PreconditionFailed(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedResponse(msg.into())
    }

    /// Only transient provider failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientProvider(_))
    }

    /// Short machine-readable tag, used in logs and API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::PreconditionFailed(_) => "precondition_failed",
            Self::Validation(_) => "validation_error",
            Self::Authentication(_) => "authentication_error",
            Self::TransientProvider(_) => "transient_provider_error",
            Self::MalformedResponse(_) => "malformed_response",
            Self::Provider(_) => "provider_error",
            Self::Storage(_) => "storage_error",
        }
    }
}

impl From<sqlx::Error> for GenerationError {
    fn from(err: sqlx::Error) -> Self {
        Self::Storage(anyhow::Error::new(err))
    }
}

impl From<serde_json::Error> for GenerationError {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedResponse(format!("invalid JSON: {err}"))
    }
}

pub type Result<T, E = GenerationError> = std::result::Result<T, E>;
