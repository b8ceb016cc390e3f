use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::circuit::CircuitState;

/// The risk rules a manager watches, one breaker per kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerKind {
    WinRate,
    Drawdown,
    GasCostRatio,
    ConsecutiveFailures,
    VolatilitySpike,
    ExecutionFailureRate,
    AnomalousSlippage,
}

impl BreakerKind {
    /// Every kind, in the order the trading gate checks them
    pub const ALL: [BreakerKind; 7] = [
        BreakerKind::WinRate,
        BreakerKind::Drawdown,
        BreakerKind::GasCostRatio,
        BreakerKind::ConsecutiveFailures,
        BreakerKind::VolatilitySpike,
        BreakerKind::ExecutionFailureRate,
        BreakerKind::AnomalousSlippage,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BreakerKind::WinRate => "win_rate",
            BreakerKind::Drawdown => "drawdown",
            BreakerKind::GasCostRatio => "gas_cost_ratio",
            BreakerKind::ConsecutiveFailures => "consecutive_failures",
            BreakerKind::VolatilitySpike => "volatility_spike",
            BreakerKind::ExecutionFailureRate => "execution_failure_rate",
            BreakerKind::AnomalousSlippage => "anomalous_slippage",
        }
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for BreakerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serializable view of one breaker for dashboards and health checks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerStatus {
    pub kind: BreakerKind,
    pub state: CircuitState,
    pub triggered_at: Option<DateTime<Utc>>,
    pub trigger_reason: Option<String>,
    pub trigger_value: Option<f64>,
    pub threshold_value: Option<f64>,
    pub recovery_attempts: u32,
    pub last_reset_attempt: Option<DateTime<Utc>>,
}

/// One named risk rule and its breaker state
#[derive(Debug, Clone)]
pub struct RiskBreaker {
    kind: BreakerKind,
    state: CircuitState,
    triggered_at: Option<DateTime<Utc>>,
    trigger_reason: Option<String>,
    trigger_value: Option<f64>,
    threshold_value: Option<f64>,
    recovery_attempts: u32,
    last_reset_attempt: Option<DateTime<Utc>>,
}

impl RiskBreaker {
    pub fn new(kind: BreakerKind) -> Self {
        Self {
            kind,
            state: CircuitState::Closed,
            triggered_at: None,
            trigger_reason: None,
            trigger_value: None,
            threshold_value: None,
            recovery_attempts: 0,
            last_reset_attempt: None,
        }
    }

    pub fn kind(&self) -> BreakerKind {
        self.kind
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == CircuitState::Open
    }

    pub fn triggered_at(&self) -> Option<DateTime<Utc>> {
        self.triggered_at
    }

    pub fn trigger_reason(&self) -> Option<&str> {
        self.trigger_reason.as_deref()
    }

    /// Open the breaker
    ///
    /// Only a closed breaker can trip. An open breaker keeps its original
    /// trigger, and a half-open one is left for the recovery probe to decide.
    /// Returns true if the breaker moved to open.
    pub fn trigger(
        &mut self,
        reason: String,
        value: f64,
        threshold: f64,
        now: DateTime<Utc>,
    ) -> bool {
        if self.state != CircuitState::Closed {
            return false;
        }

        self.state = CircuitState::Open;
        self.triggered_at = Some(now);
        self.trigger_reason = Some(reason);
        self.trigger_value = Some(value);
        self.threshold_value = Some(threshold);
        true
    }

    /// Move an open breaker to half-open for a recovery probe
    pub(crate) fn begin_recovery(&mut self, now: DateTime<Utc>) {
        self.state = CircuitState::HalfOpen;
        self.recovery_attempts += 1;
        self.last_reset_attempt = Some(now);
    }

    /// Probe passed: close and forget the trigger
    pub(crate) fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.triggered_at = None;
        self.trigger_reason = None;
        self.trigger_value = None;
        self.threshold_value = None;
    }

    /// Probe failed: back to open with the original trigger kept
    pub(crate) fn reopen(&mut self) {
        self.state = CircuitState::Open;
    }

    /// Clear everything back to a fresh closed breaker
    pub fn reset(&mut self) {
        *self = Self::new(self.kind);
    }

    pub fn status(&self) -> BreakerStatus {
        BreakerStatus {
            kind: self.kind,
            state: self.state,
            triggered_at: self.triggered_at,
            trigger_reason: self.trigger_reason.clone(),
            trigger_value: self.trigger_value,
            threshold_value: self.threshold_value,
            recovery_attempts: self.recovery_attempts,
            last_reset_attempt: self.last_reset_attempt,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_kind_index_matches_all_order() {
        for (i, kind) in BreakerKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
        }
    }

    #[test]
    fn test_trigger_opens_closed_breaker() {
        let mut breaker = RiskBreaker::new(BreakerKind::WinRate);
        let now = Utc::now();

        assert!(breaker.trigger("win rate 35%".into(), 0.35, 0.40, now));

        let status = breaker.status();
        assert_eq!(status.state, CircuitState::Open);
        assert_eq!(status.triggered_at, Some(now));
        assert_eq!(status.trigger_value, Some(0.35));
        assert_eq!(status.threshold_value, Some(0.40));
    }

    #[test]
    fn test_second_trigger_keeps_original() {
        let mut breaker = RiskBreaker::new(BreakerKind::Drawdown);
        let first = Utc::now();

        breaker.trigger("drawdown 20%".into(), 0.20, 0.15, first);
        let retriggered = breaker.trigger(
            "drawdown 30%".into(),
            0.30,
            0.15,
            first + Duration::minutes(5),
        );

        assert!(!retriggered);
        assert_eq!(breaker.triggered_at(), Some(first));
        assert_eq!(breaker.trigger_reason(), Some("drawdown 20%"));
    }

    #[test]
    fn test_reopen_keeps_trigger_close_clears_it() {
        let mut breaker = RiskBreaker::new(BreakerKind::ConsecutiveFailures);
        let now = Utc::now();
        breaker.trigger("5 failures".into(), 5.0, 5.0, now);

        breaker.begin_recovery(now + Duration::hours(2));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert_eq!(breaker.triggered_at(), Some(now));

        breaker.reopen();
        assert!(breaker.is_open());
        assert_eq!(breaker.triggered_at(), Some(now));

        breaker.begin_recovery(now + Duration::hours(4));
        breaker.close();
        let status = breaker.status();
        assert_eq!(status.state, CircuitState::Closed);
        assert!(status.triggered_at.is_none());
        assert!(status.trigger_reason.is_none());
        assert_eq!(status.recovery_attempts, 2);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut breaker = RiskBreaker::new(BreakerKind::GasCostRatio);
        let now = Utc::now();
        breaker.trigger("gas".into(), 0.9, 0.5, now);
        breaker.begin_recovery(now);

        breaker.reset();

        assert_eq!(breaker.status(), RiskBreaker::new(BreakerKind::GasCostRatio).status());
    }

    #[test]
    fn test_status_serializes_kind_snake_case() {
        let breaker = RiskBreaker::new(BreakerKind::ExecutionFailureRate);
        let json = serde_json::to_value(breaker.status()).unwrap();

        assert_eq!(json["kind"], "execution_failure_rate");
        assert_eq!(json["state"], "CLOSED");
    }
}
