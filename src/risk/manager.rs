use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::breaker::{BreakerKind, BreakerStatus, RiskBreaker};
use super::history::{TradeHistory, TradeRecord};
use super::portfolio::PortfolioState;
use super::rules::{self, Breach};
use crate::circuit::CircuitState;
use crate::config::RiskConfig;
use crate::error::{RecoveryError, TradingHalted};

/// Everything a dashboard needs to explain why trading is on or off
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskReport {
    pub trading_allowed: bool,
    pub halted_by: Option<BreakerKind>,
    pub balance: f64,
    pub peak_balance: f64,
    pub drawdown: Option<f64>,
    pub consecutive_failures: u32,
    pub trades_recorded: usize,
    pub recovery_buffer_len: usize,
    pub breakers: Vec<BreakerStatus>,
}

struct ManagerState {
    breakers: Vec<RiskBreaker>, // indexed by BreakerKind::index
    history: TradeHistory,
    portfolio: PortfolioState,
    recovery_results: VecDeque<bool>,
}

impl ManagerState {
    fn breaker(&self, kind: BreakerKind) -> &RiskBreaker {
        &self.breakers[kind.index()]
    }

    fn breaker_mut(&mut self, kind: BreakerKind) -> &mut RiskBreaker {
        &mut self.breakers[kind.index()]
    }

    fn any_half_open(&self) -> bool {
        self.breakers
            .iter()
            .any(|b| b.state() == CircuitState::HalfOpen)
    }

    fn first_open(&self) -> Option<&RiskBreaker> {
        self.breakers.iter().find(|b| b.is_open())
    }
}

/// Halts trading when loss, win-rate, gas, or anomaly thresholds are breached
///
/// All state sits behind one lock so concurrent scanners feeding the same
/// manager never observe a half-applied trade.
pub struct RiskBreakerManager {
    config: RiskConfig,
    state: RwLock<ManagerState>,
}

impl RiskBreakerManager {
    pub fn new(config: RiskConfig) -> Self {
        let state = ManagerState {
            breakers: BreakerKind::ALL.iter().map(|k| RiskBreaker::new(*k)).collect(),
            history: TradeHistory::new(config.history_capacity),
            portfolio: PortfolioState::new(config.initial_balance),
            recovery_results: VecDeque::with_capacity(config.recovery_test_trades),
        };

        Self {
            config,
            state: RwLock::new(state),
        }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    fn read(&self) -> RwLockReadGuard<'_, ManagerState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ManagerState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a trade outcome now and re-evaluate the trade-driven rules
    pub fn record_trade(
        &self,
        success: bool,
        profit: f64,
        gas_cost: f64,
        slippage: f64,
        expected_slippage: f64,
        symbol: &str,
    ) {
        self.record(TradeRecord::new(
            success,
            profit,
            gas_cost,
            slippage,
            expected_slippage,
            symbol,
        ));
    }

    /// Record a trade using its own timestamp as the evaluation time
    pub fn record(&self, trade: TradeRecord) {
        let now = trade.timestamp;
        let mut state = self.write();

        state.history.push(trade.clone());
        state.portfolio.apply(&trade);

        let breaches: Vec<Breach> = [
            rules::win_rate(&state.history, &self.config),
            rules::drawdown(&state.portfolio, &self.config),
            rules::gas_cost_ratio(&state.history, &self.config),
            rules::consecutive_failures(&state.portfolio, &self.config),
            rules::anomalous_slippage(&state.history, &trade, &self.config),
        ]
        .into_iter()
        .flatten()
        .collect();

        for breach in breaches {
            Self::trip(&mut state, breach, now);
        }

        if state.any_half_open() {
            state.recovery_results.push_back(trade.success);
            if state.recovery_results.len() >= self.config.recovery_test_trades {
                self.resolve_recovery(&mut state);
            }
        }

        tracing::debug!(
            symbol = %trade.symbol,
            success = trade.success,
            balance = state.portfolio.balance,
            consecutive_failures = state.portfolio.consecutive_failures,
            "Recorded trade"
        );
    }

    /// Feed an externally computed volatility reading
    pub fn record_volatility_spike(&self, current_vol: f64, normal_vol: f64) {
        self.record_volatility_spike_at(current_vol, normal_vol, Utc::now());
    }

    pub fn record_volatility_spike_at(&self, current_vol: f64, normal_vol: f64, now: DateTime<Utc>) {
        if let Some(breach) = rules::volatility_spike(current_vol, normal_vol, &self.config) {
            Self::trip(&mut self.write(), breach, now);
        }
    }

    /// Report an execution failure and check the recent failure rate
    pub fn record_execution_failure(&self, error: &str) {
        self.record_execution_failure_at(error, Utc::now());
    }

    pub fn record_execution_failure_at(&self, error: &str, now: DateTime<Utc>) {
        tracing::warn!(error = %error, "Execution failure reported");

        let mut state = self.write();
        if let Some(breach) = rules::execution_failure_rate(&state.history, now) {
            Self::trip(&mut state, breach, now);
        }
    }

    fn trip(state: &mut ManagerState, breach: Breach, now: DateTime<Utc>) {
        let breaker = state.breaker_mut(breach.kind);

        if breaker.trigger(breach.reason.clone(), breach.value, breach.threshold, now) {
            tracing::error!(
                breaker = %breach.kind,
                reason = %breach.reason,
                value = breach.value,
                threshold = breach.threshold,
                "🚨 Risk breaker triggered, trading halted"
            );
        }
    }

    /// `Ok` when no breaker is open, otherwise the first open breaker and its reason
    pub fn is_trading_allowed(&self) -> Result<(), TradingHalted> {
        let state = self.read();
        match state.first_open() {
            Some(breaker) => Err(TradingHalted {
                kind: breaker.kind(),
                reason: breaker.trigger_reason().unwrap_or_default().to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Start a recovery probe for an open breaker
    pub fn attempt_recovery(&self, kind: BreakerKind) -> Result<(), RecoveryError> {
        self.attempt_recovery_at(kind, Utc::now())
    }

    /// Move `kind` to half-open once `auto_reset_hours` have passed since it tripped
    ///
    /// The shared probe buffer is cleared; the next `recovery_test_trades`
    /// recorded trades decide whether every half-open breaker closes or reopens.
    pub fn attempt_recovery_at(&self, kind: BreakerKind, now: DateTime<Utc>) -> Result<(), RecoveryError> {
        let mut state = self.write();
        let breaker = state.breaker(kind);

        if !breaker.is_open() {
            return Err(RecoveryError::NotOpen {
                kind,
                state: breaker.state(),
            });
        }

        if let Some(triggered_at) = breaker.triggered_at() {
            // A cool-down past the end of time means the breaker never auto-resets
            let ready_at = triggered_at.checked_add_signed(self.config.auto_reset());
            if ready_at.map_or(true, |ready_at| now < ready_at) {
                let remaining_secs = ready_at.map_or(i64::MAX, |ready_at| (ready_at - now).num_seconds());
                tracing::debug!(breaker = %kind, remaining_secs, "Recovery attempted too early");
                return Err(RecoveryError::TooEarly {
                    kind,
                    remaining_secs,
                });
            }
        }

        state.breaker_mut(kind).begin_recovery(now);
        state.recovery_results.clear();

        tracing::warn!(
            breaker = %kind,
            attempts = state.breaker(kind).status().recovery_attempts,
            test_trades = self.config.recovery_test_trades,
            "Risk breaker half-open, probing with live trades"
        );

        Ok(())
    }

    /// Start a probe for every open breaker whose cool-down has elapsed
    pub fn auto_recover(&self) -> Vec<BreakerKind> {
        self.auto_recover_at(Utc::now())
    }

    pub fn auto_recover_at(&self, now: DateTime<Utc>) -> Vec<BreakerKind> {
        BreakerKind::ALL
            .into_iter()
            .filter(|kind| self.attempt_recovery_at(*kind, now).is_ok())
            .collect()
    }

    fn resolve_recovery(&self, state: &mut ManagerState) {
        let total = state.recovery_results.len();
        let successes = state.recovery_results.iter().filter(|s| **s).count();
        let success_rate = successes as f64 / total as f64;
        let passed = success_rate >= self.config.recovery_min_success_rate;

        for breaker in state
            .breakers
            .iter_mut()
            .filter(|b| b.state() == CircuitState::HalfOpen)
        {
            if passed {
                breaker.close();
                tracing::info!(
                    breaker = %breaker.kind(),
                    success_rate,
                    "✅ Recovery probe passed, breaker closed"
                );
            } else {
                breaker.reopen();
                tracing::warn!(
                    breaker = %breaker.kind(),
                    success_rate,
                    required = self.config.recovery_min_success_rate,
                    "Recovery probe failed, breaker reopened"
                );
            }
        }

        state.recovery_results.clear();
    }

    /// Operator override: force one breaker back to a fresh closed state
    pub fn reset(&self, kind: BreakerKind) {
        let mut state = self.write();
        state.breaker_mut(kind).reset();
        if !state.any_half_open() {
            state.recovery_results.clear();
        }
        tracing::info!(breaker = %kind, "Risk breaker manually reset");
    }

    pub fn reset_all(&self) {
        let mut state = self.write();
        for breaker in &mut state.breakers {
            breaker.reset();
        }
        state.recovery_results.clear();
        tracing::info!("All risk breakers manually reset");
    }

    pub fn breaker(&self, kind: BreakerKind) -> BreakerStatus {
        self.read().breaker(kind).status()
    }

    pub fn status(&self) -> Vec<BreakerStatus> {
        self.read().breakers.iter().map(RiskBreaker::status).collect()
    }

    pub fn portfolio(&self) -> PortfolioState {
        self.read().portfolio.clone()
    }

    pub fn recovery_buffer_len(&self) -> usize {
        self.read().recovery_results.len()
    }

    pub fn report(&self) -> RiskReport {
        let state = self.read();
        let halted_by = state.first_open().map(RiskBreaker::kind);

        RiskReport {
            trading_allowed: halted_by.is_none(),
            halted_by,
            balance: state.portfolio.balance,
            peak_balance: state.portfolio.peak_balance,
            drawdown: state.portfolio.drawdown(),
            consecutive_failures: state.portfolio.consecutive_failures,
            trades_recorded: state.history.len(),
            recovery_buffer_len: state.recovery_results.len(),
            breakers: state.breakers.iter().map(RiskBreaker::status).collect(),
        }
    }
}
