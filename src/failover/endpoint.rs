use chrono::{DateTime, Utc};
use governor::{Quota, RateLimiter};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU32;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::circuit::CircuitState;
use crate::config::EndpointConfig;

/// Seconds after the last failure at which the recency part of the health score saturates
const RECENCY_HORIZON_SECS: f64 = 300.0;

type EndpointRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

#[derive(Debug, Clone)]
struct EndpointState {
    circuit: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    total_requests: u64,
    total_failures: u64,
    last_success: Option<DateTime<Utc>>,
    last_failure: Option<DateTime<Utc>>,
}

impl EndpointState {
    fn new() -> Self {
        Self {
            circuit: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            total_requests: 0,
            total_failures: 0,
            last_success: None,
            last_failure: None,
        }
    }
}

/// Point-in-time health of one endpoint, safe to serialize across an API boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointHealth {
    pub name: String,
    pub url: String,
    pub priority: u32,
    pub circuit_state: CircuitState,
    pub health_score: f64,
    pub total_requests: u64,
    pub total_failures: u64,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_success_timestamp: Option<DateTime<Utc>>,
    pub last_failure_timestamp: Option<DateTime<Utc>>,
}

/// One reachable backend plus its health counters and circuit state
///
/// Counters live behind a mutex that is only held for the duration of a
/// counter update, never across the network call itself.
pub struct Endpoint {
    name: String,
    url: String,
    priority: u32,
    timeout: Duration,
    failure_threshold: u32,
    success_threshold: u32,
    open_timeout: chrono::Duration,
    rate_limiter: Option<EndpointRateLimiter>,
    state: Mutex<EndpointState>,
}

impl Endpoint {
    pub fn new(config: &EndpointConfig) -> Self {
        let rate_limiter = config
            .rate_limit_per_sec
            .and_then(NonZeroU32::new)
            .map(|rps| RateLimiter::direct(Quota::per_second(rps)));

        Self {
            name: config.name.clone(),
            url: config.url.clone(),
            priority: config.priority,
            timeout: config.timeout(),
            failure_threshold: config.failure_threshold.max(1),
            success_threshold: config.success_threshold.max(1),
            open_timeout: chrono::Duration::from_std(config.open_timeout())
                .unwrap_or_else(|_| chrono::Duration::days(365)),
            rate_limiter,
            state: Mutex::new(EndpointState::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.state().circuit
    }

    fn state(&self) -> MutexGuard<'_, EndpointState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait until the endpoint's request quota allows another call
    pub async fn wait_for_quota(&self) {
        if let Some(limiter) = &self.rate_limiter {
            limiter.until_ready().await;
        }
    }

    /// Whether a call may be sent now
    ///
    /// An open circuit whose cool-down has elapsed moves to half-open here.
    pub fn can_attempt(&self) -> bool {
        self.can_attempt_at(Utc::now())
    }

    pub fn can_attempt_at(&self, now: DateTime<Utc>) -> bool {
        let mut state = self.state();
        match state.circuit {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let cooled_down = state
                    .last_failure
                    .map(|at| now - at >= self.open_timeout)
                    .unwrap_or(true);

                if cooled_down {
                    state.circuit = CircuitState::HalfOpen;
                    state.consecutive_successes = 0;
                    tracing::info!(endpoint = %self.name, "Circuit half-open, probing endpoint");
                }
                cooled_down
            }
        }
    }

    pub fn record_success(&self) {
        self.record_success_at(Utc::now());
    }

    pub fn record_success_at(&self, now: DateTime<Utc>) {
        let mut state = self.state();
        state.last_success = Some(now);
        state.consecutive_failures = 0;
        state.consecutive_successes += 1;
        state.total_requests += 1;

        if state.circuit == CircuitState::HalfOpen
            && state.consecutive_successes >= self.success_threshold
        {
            state.circuit = CircuitState::Closed;
            state.consecutive_failures = 0;
            tracing::info!(
                endpoint = %self.name,
                successes = state.consecutive_successes,
                "Circuit closed, endpoint recovered"
            );
        }
    }

    pub fn record_failure(&self, message: &str) {
        self.record_failure_at(message, Utc::now());
    }

    /// Record a failed call
    ///
    /// Reaching the failure threshold opens the circuit. A failure while
    /// half-open reopens it immediately.
    pub fn record_failure_at(&self, message: &str, now: DateTime<Utc>) {
        let mut state = self.state();
        state.last_failure = Some(now);
        state.consecutive_successes = 0;
        state.consecutive_failures += 1;
        state.total_failures += 1;
        state.total_requests += 1;

        let should_open = state.circuit == CircuitState::HalfOpen
            || state.consecutive_failures >= self.failure_threshold;

        if should_open && state.circuit != CircuitState::Open {
            state.circuit = CircuitState::Open;
            tracing::warn!(
                endpoint = %self.name,
                consecutive_failures = state.consecutive_failures,
                threshold = self.failure_threshold,
                error = %message,
                "Circuit opened"
            );
        }
    }

    pub fn health_score(&self) -> f64 {
        self.health_score_at(Utc::now())
    }

    /// Blend of success rate (70%) and time since the last failure (30%), in `[0, 1]`
    pub fn health_score_at(&self, now: DateTime<Utc>) -> f64 {
        let state = self.state();
        Self::score(&state, now)
    }

    fn score(state: &EndpointState, now: DateTime<Utc>) -> f64 {
        if state.total_requests == 0 {
            return 1.0;
        }

        let success_rate = 1.0 - state.total_failures as f64 / state.total_requests as f64;
        let recency = match state.last_failure {
            Some(at) => {
                let secs = (now - at).num_milliseconds().max(0) as f64 / 1000.0;
                (secs / RECENCY_HORIZON_SECS).min(1.0)
            }
            None => 1.0,
        };

        (0.7 * success_rate + 0.3 * recency).clamp(0.0, 1.0)
    }

    pub fn snapshot(&self) -> EndpointHealth {
        self.snapshot_at(Utc::now())
    }

    pub fn snapshot_at(&self, now: DateTime<Utc>) -> EndpointHealth {
        let state = self.state();
        EndpointHealth {
            name: self.name.clone(),
            url: self.url.clone(),
            priority: self.priority,
            circuit_state: state.circuit,
            health_score: Self::score(&state, now),
            total_requests: state.total_requests,
            total_failures: state.total_failures,
            consecutive_failures: state.consecutive_failures,
            consecutive_successes: state.consecutive_successes,
            last_success_timestamp: state.last_success,
            last_failure_timestamp: state.last_failure,
        }
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("name", &self.name)
            .field("url", &self.url)
            .field("priority", &self.priority)
            .field("circuit", &self.circuit_state())
            .finish()
    }
}
