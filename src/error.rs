//! Error taxonomy shared by the executor, the direct API and the pipeline.

use axum::http::StatusCode;
use thiserror::Error;

use crate::model::{ActorId, Role};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GradebookError {
    /// The actor id does not resolve to a known user.
    #[error("unknown actor {0}")]
    UnknownActor(ActorId),

    /// The actor's role does not permit the requested action.
    #[error("actor {actor_id} must be a {required} to {action}")]
    RoleViolation {
        actor_id: ActorId,
        required: Role,
        action: &'static str,
    },

    /// A student tried to touch another student's data.
    #[error("actor {requester_id} may not access data of student {target_id}")]
    OwnershipViolation {
        requester_id: ActorId,
        target_id: ActorId,
    },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// Grade value outside the 0–20 scale.
    #[error("grade value {0} is outside 0-20")]
    ValueOutOfRange(f64),

    #[error("{0}")]
    Validation(String),

    /// Capability that deliberately does not exist, e.g. deletion.
    #[error("{0}")]
    FeatureNotAvailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UnknownActor,
    RoleViolation,
    OwnershipViolation,
    NotFound,
    ValueOutOfRange,
    Validation,
    FeatureNotAvailable,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::UnknownActor => "UnknownActor",
            ErrorKind::RoleViolation => "RoleViolation",
            ErrorKind::OwnershipViolation => "OwnershipViolation",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::ValueOutOfRange => "ValueOutOfRange",
            ErrorKind::Validation => "ValidationError",
            ErrorKind::FeatureNotAvailable => "FeatureNotAvailable",
            ErrorKind::Internal => "InternalError",
        }
    }

    pub fn http_status(&self) -> StatusCode {
        match self {
            ErrorKind::RoleViolation | ErrorKind::OwnershipViolation => StatusCode::FORBIDDEN,
            ErrorKind::NotFound | ErrorKind::ValueOutOfRange | ErrorKind::Validation => {
                StatusCode::BAD_REQUEST
            }
            ErrorKind::UnknownActor => StatusCode::NOT_FOUND,
            ErrorKind::FeatureNotAvailable => StatusCode::METHOD_NOT_ALLOWED,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl GradebookError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GradebookError::UnknownActor(_) => ErrorKind::UnknownActor,
            GradebookError::RoleViolation { .. } => ErrorKind::RoleViolation,
            GradebookError::OwnershipViolation { .. } => ErrorKind::OwnershipViolation,
            GradebookError::NotFound { .. } => ErrorKind::NotFound,
            GradebookError::ValueOutOfRange(_) => ErrorKind::ValueOutOfRange,
            GradebookError::Validation(_) => ErrorKind::Validation,
            GradebookError::FeatureNotAvailable(_) => ErrorKind::FeatureNotAvailable,
            GradebookError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn http_status(&self) -> StatusCode {
        self.kind().http_status()
    }

    /// Authorization failures and unavailable features end the run as
    /// blocked; everything else is reported without blocking.
    pub fn is_blocking(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::UnknownActor
                | ErrorKind::RoleViolation
                | ErrorKind::OwnershipViolation
                | ErrorKind::FeatureNotAvailable
        )
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        GradebookError::Validation(msg.into())
    }

    pub fn not_found(entity: &'static str, id: i64) -> Self {
        GradebookError::NotFound { entity, id }
    }
}
