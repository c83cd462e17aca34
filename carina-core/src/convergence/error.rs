//! Errors produced while polling for convergence

use std::time::Duration;

use thiserror::Error;

use crate::convergence::policy::PolicyError;
use crate::provider::ProviderError;

/// A remote read that did not yield an observation
///
/// Retryable errors (throttling, server errors, dropped connections) are
/// treated like a pending observation; the rest end the wait immediately.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct FetchError {
    retryable: bool,
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl FetchError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            retryable: true,
            message: message.into(),
            source: None,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            retryable: false,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }
}

/// Why a wait ended without reaching a target state
#[derive(Debug, Error)]
pub enum Failure {
    #[error("unexpected status {state:?}")]
    UnexpectedState { state: String },

    #[error("non-retryable error: {0}")]
    Fetch(#[source] FetchError),

    #[error("resource was not found for {attempts} consecutive reads")]
    NotFound { attempts: u32 },
}

/// Terminal error of a wait, always naming the resource being waited on
#[derive(Debug, Error)]
pub enum WaitError {
    #[error(
        "waiting for {resource} failed (last status: {}): {failure}",
        .last_state.as_deref().unwrap_or("none")
    )]
    Failed {
        resource: String,
        last_state: Option<String>,
        #[source]
        failure: Failure,
    },

    #[error(
        "timed out after {elapsed:?} (budget {budget:?}) waiting for {resource} (last status: {}); the operation is still in progress remotely",
        .last_state.as_deref().unwrap_or("none")
    )]
    TimedOut {
        resource: String,
        elapsed: Duration,
        budget: Duration,
        last_state: Option<String>,
    },

    #[error(
        "waiting for {resource} was cancelled after {elapsed:?} (last status: {})",
        .last_state.as_deref().unwrap_or("none")
    )]
    Cancelled {
        resource: String,
        elapsed: Duration,
        last_state: Option<String>,
    },

    #[error("invalid convergence policy for {resource}: {source}")]
    Policy {
        resource: String,
        #[source]
        source: PolicyError,
    },
}

impl WaitError {
    pub fn policy(resource: impl Into<String>, source: PolicyError) -> Self {
        Self::Policy {
            resource: resource.into(),
            source,
        }
    }

    /// Status seen on the last successful read, if any
    pub fn last_state(&self) -> Option<&str> {
        match self {
            WaitError::Failed { last_state, .. }
            | WaitError::TimedOut { last_state, .. }
            | WaitError::Cancelled { last_state, .. } => last_state.as_deref(),
            WaitError::Policy { .. } => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, WaitError::TimedOut { .. })
    }
}

impl From<WaitError> for ProviderError {
    fn from(err: WaitError) -> Self {
        ProviderError::from_cause(err)
    }
}
