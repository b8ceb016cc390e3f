use std::time::Duration;
use thiserror::Error;

use crate::circuit::CircuitState;
use crate::risk::BreakerKind;

/// Failure of a single call against a single endpoint.
///
/// These are recorded on the endpoint and retried by the router; callers only
/// see them as the cause of a [`FailoverError::Exhausted`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AttemptError {
    #[error("endpoint {endpoint} timed out after {timeout:?}")]
    Timeout { endpoint: String, timeout: Duration },

    #[error("endpoint {endpoint} failed: {message}")]
    Failed { endpoint: String, message: String },
}

impl AttemptError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, AttemptError::Timeout { .. })
    }

    pub fn endpoint(&self) -> &str {
        match self {
            AttemptError::Timeout { endpoint, .. } | AttemptError::Failed { endpoint, .. } => {
                endpoint
            }
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FailoverError {
    #[error("no endpoints configured")]
    NoEndpoints,

    #[error("{label}: all endpoints exhausted after {rounds} rounds")]
    Exhausted {
        label: String,
        rounds: u32,
        #[source]
        last: Option<AttemptError>,
    },
}

impl FailoverError {
    /// The last per-endpoint error seen before giving up, if any endpoint was tried at all
    pub fn last_error(&self) -> Option<&AttemptError> {
        match self {
            FailoverError::Exhausted { last, .. } => last.as_ref(),
            FailoverError::NoEndpoints => None,
        }
    }
}

/// Returned by the trading gate when a risk breaker is open
#[derive(Error, Debug, Clone, PartialEq)]
#[error("trading halted by {kind} breaker: {reason}")]
pub struct TradingHalted {
    pub kind: BreakerKind,
    pub reason: String,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecoveryError {
    #[error("{kind} breaker is {state}, recovery requires it to be open")]
    NotOpen { kind: BreakerKind, state: CircuitState },

    #[error("{kind} breaker cannot be probed for another {remaining_secs}s")]
    TooEarly { kind: BreakerKind, remaining_secs: i64 },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
