use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::booking::BookingStatus;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid booking transition from {from:?} to {to:?}")]
    InvalidBookingTransition { from: BookingStatus, to: BookingStatus },
    #[error("empty time slot: {start} does not precede {end}")]
    EmptySlot { start: DateTime<Utc>, end: DateTime<Utc> },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

/// Failure taxonomy for the message/booking pipeline.
///
/// Every variant maps to exactly one user-facing outcome via
/// [`PipelineError::user_message`]; a paused conversation is not an error
/// and never surfaces here.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("scheduling conflict: {0}")]
    Conflict(String),
    #[error("rate limit exceeded for sender, resets at {reset_at}")]
    RateLimitExceeded { reset_at: DateTime<Utc> },
    #[error("{service} failure: {message}")]
    ExternalService { service: &'static str, message: String, retryable: bool },
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl PipelineError {
    pub fn external(service: &'static str, message: impl Into<String>, retryable: bool) -> Self {
        Self::ExternalService { service, message: message.into(), retryable }
    }

    /// Whether the orchestration layer may retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ExternalService { retryable, .. } => *retryable,
            Self::Persistence(_) => true,
            _ => false,
        }
    }

    /// Client-facing reply text. The bot speaks Spanish to salon clients;
    /// operator detail stays in the error itself and in the logs.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(message) => message.clone(),
            Self::Domain(_) => {
                "No pude procesar tu solicitud. Por favor verifica los datos e intenta de nuevo."
                    .to_string()
            }
            Self::Conflict(_) => {
                "El horario solicitado ya no está disponible. Por favor elige otro horario."
                    .to_string()
            }
            Self::RateLimitExceeded { .. } => {
                "Has enviado muchos mensajes. Por favor espera un momento antes de continuar."
                    .to_string()
            }
            Self::ExternalService { .. } | Self::Persistence(_) => {
                "Estamos teniendo problemas técnicos. Por favor intenta de nuevo más tarde."
                    .to_string()
            }
        }
    }
}
