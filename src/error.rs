//! Standardized error handling for the automation engine.
//!
//! The taxonomy mirrors how failures propagate: everything except an action
//! failure is rejected before an execution record exists and surfaces
//! synchronously to the caller; action failures land in the execution log.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Referenced rule/execution/client/template is absent.
    #[error("{0} not found")]
    NotFound(String),

    /// Rule exists but cannot run (disabled, wrong trigger type).
    #[error("rule cannot run: {0}")]
    Inactive(String),

    /// Rule exists but is misconfigured on the server side (e.g. missing
    /// webhook secret). Distinct from a client-side validation problem.
    #[error("misconfigured: {0}")]
    Misconfigured(String),

    /// Malformed condition tree, empty action list, bad trigger tag, or an
    /// invalid state transition request.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Webhook authentication failure; carries the stage that rejected.
    #[error("authentication failed: {0}")]
    Authentication(#[from] AuthFailure),

    /// An action handler returned or raised inside a step.
    #[error("action failed: {0}")]
    Action(String),

    /// Underlying store failure (shared cache, persistence adapter).
    #[error("store error: {0}")]
    Store(String),
}

/// Which stage of the webhook validation pipeline rejected the request.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthFailure {
    #[error("signature or timestamp header missing")]
    MissingHeaders,
    #[error("timestamp header could not be parsed: {0}")]
    BadTimestamp(String),
    #[error("timestamp outside tolerance window ({skew_secs}s skew, {tolerance_secs}s allowed)")]
    StaleTimestamp { skew_secs: i64, tolerance_secs: i64 },
    #[error("signature verification failed")]
    BadSignature,
    #[error("duplicate delivery rejected by replay guard")]
    Replayed,
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Validation(format!("invalid JSON payload: {err}"))
    }
}

impl From<redis::RedisError> for EngineError {
    fn from(err: redis::RedisError) -> Self {
        Self::Store(format!("redis: {err}"))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
