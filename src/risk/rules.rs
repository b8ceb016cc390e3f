//! Risk rule evaluators
//!
//! Each rule is a pure read of the trade history or portfolio state and only
//! reports a breach once it has enough samples to judge.

use chrono::{DateTime, Duration, Utc};

use super::breaker::BreakerKind;
use super::history::{TradeHistory, TradeRecord};
use super::portfolio::PortfolioState;
use crate::config::RiskConfig;

pub const GAS_RATIO_WINDOW: usize = 10;
pub const GAS_RATIO_MIN_TRADES: usize = 5;
pub const SLIPPAGE_WINDOW: usize = 50;
pub const SLIPPAGE_MIN_TRADES: usize = 20;
pub const EXECUTION_WINDOW_MINUTES: i64 = 15;
pub const EXECUTION_MIN_TRADES: usize = 5;
pub const MAX_EXECUTION_FAILURE_RATE: f64 = 0.8;

/// A rule whose threshold was crossed
#[derive(Debug, Clone, PartialEq)]
pub struct Breach {
    pub kind: BreakerKind,
    pub value: f64,
    pub threshold: f64,
    pub reason: String,
}

pub fn win_rate(history: &TradeHistory, config: &RiskConfig) -> Option<Breach> {
    let window = config.win_rate_window;
    if history.len() < window {
        return None;
    }

    let wins = history.recent(window).filter(|t| t.success).count();
    let rate = wins as f64 / window as f64;

    (rate < config.min_win_rate).then(|| Breach {
        kind: BreakerKind::WinRate,
        value: rate,
        threshold: config.min_win_rate,
        reason: format!(
            "win rate {:.1}% over last {} trades below {:.1}%",
            rate * 100.0,
            window,
            config.min_win_rate * 100.0
        ),
    })
}

pub fn drawdown(portfolio: &PortfolioState, config: &RiskConfig) -> Option<Breach> {
    let drawdown = portfolio.drawdown()?;

    (drawdown > config.max_drawdown_pct).then(|| Breach {
        kind: BreakerKind::Drawdown,
        value: drawdown,
        threshold: config.max_drawdown_pct,
        reason: format!(
            "drawdown {:.1}% (peak {:.4}, balance {:.4}) exceeds {:.1}%",
            drawdown * 100.0,
            portfolio.peak_balance,
            portfolio.balance,
            config.max_drawdown_pct * 100.0
        ),
    })
}

/// Gas spent on the profitable trades among the last ten, relative to their profit
pub fn gas_cost_ratio(history: &TradeHistory, config: &RiskConfig) -> Option<Breach> {
    if history.len() < GAS_RATIO_MIN_TRADES {
        return None;
    }

    let (gas, profit) = history
        .recent(GAS_RATIO_WINDOW)
        .filter(|t| t.profit > 0.0)
        .fold((0.0, 0.0), |(gas, profit), t| (gas + t.gas_cost, profit + t.profit));

    if profit <= 0.0 {
        return None;
    }

    let ratio = gas / profit;
    (ratio > config.max_gas_cost_ratio).then(|| Breach {
        kind: BreakerKind::GasCostRatio,
        value: ratio,
        threshold: config.max_gas_cost_ratio,
        reason: format!(
            "gas cost is {:.1}% of profit on recent winners, limit {:.1}%",
            ratio * 100.0,
            config.max_gas_cost_ratio * 100.0
        ),
    })
}

pub fn consecutive_failures(portfolio: &PortfolioState, config: &RiskConfig) -> Option<Breach> {
    let streak = portfolio.consecutive_failures;

    (streak >= config.max_consecutive_failures).then(|| Breach {
        kind: BreakerKind::ConsecutiveFailures,
        value: streak as f64,
        threshold: config.max_consecutive_failures as f64,
        reason: format!(
            "{} consecutive failed trades (limit: {})",
            streak, config.max_consecutive_failures
        ),
    })
}

/// Z-score of the current trade's slippage error against recent quoted trades
///
/// The distribution is taken over the last fifty trades with a positive
/// expected slippage, which includes `current` once it has been recorded.
pub fn anomalous_slippage(
    history: &TradeHistory,
    current: &TradeRecord,
    config: &RiskConfig,
) -> Option<Breach> {
    if history.len() < SLIPPAGE_MIN_TRADES || current.expected_slippage <= 0.0 {
        return None;
    }

    let deviations: Vec<f64> = history
        .recent(SLIPPAGE_WINDOW)
        .filter(|t| t.expected_slippage > 0.0)
        .map(TradeRecord::slippage_deviation)
        .collect();

    if deviations.len() < 2 {
        return None;
    }

    let n = deviations.len() as f64;
    let mean = deviations.iter().sum::<f64>() / n;
    let variance = deviations.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();

    if std_dev == 0.0 {
        return None;
    }

    let z_score = (current.slippage_deviation() - mean).abs() / std_dev;
    (z_score > config.max_slippage_deviation).then(|| Breach {
        kind: BreakerKind::AnomalousSlippage,
        value: z_score,
        threshold: config.max_slippage_deviation,
        reason: format!(
            "{} slippage {:.4} vs expected {:.4} is {:.2} sigma from recent mean",
            current.symbol, current.slippage, current.expected_slippage, z_score
        ),
    })
}

pub fn volatility_spike(current_vol: f64, normal_vol: f64, config: &RiskConfig) -> Option<Breach> {
    if normal_vol <= 0.0 {
        return None;
    }

    let spike = current_vol / normal_vol;
    (spike > config.max_volatility_spike).then(|| Breach {
        kind: BreakerKind::VolatilitySpike,
        value: spike,
        threshold: config.max_volatility_spike,
        reason: format!(
            "volatility {:.4} is {:.2}x normal {:.4}, limit {:.2}x",
            current_vol, spike, normal_vol, config.max_volatility_spike
        ),
    })
}

/// Failure fraction over the trades of the last fifteen minutes
pub fn execution_failure_rate(history: &TradeHistory, now: DateTime<Utc>) -> Option<Breach> {
    let since = now - Duration::minutes(EXECUTION_WINDOW_MINUTES);

    let (total, failed) = history
        .since(since)
        .fold((0usize, 0usize), |(total, failed), t| {
            (total + 1, failed + usize::from(!t.success))
        });

    if total < EXECUTION_MIN_TRADES {
        return None;
    }

    let rate = failed as f64 / total as f64;
    (rate > MAX_EXECUTION_FAILURE_RATE).then(|| Breach {
        kind: BreakerKind::ExecutionFailureRate,
        value: rate,
        threshold: MAX_EXECUTION_FAILURE_RATE,
        reason: format!(
            "{} of {} executions failed in the last {} minutes",
            failed, total, EXECUTION_WINDOW_MINUTES
        ),
    })
}
