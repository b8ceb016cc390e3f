use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Outcome of one executed trade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub profit: f64,
    pub gas_cost: f64,
    pub slippage: f64,          // realized
    pub expected_slippage: f64, // quoted
    pub symbol: String,
}

impl TradeRecord {
    pub fn new(
        success: bool,
        profit: f64,
        gas_cost: f64,
        slippage: f64,
        expected_slippage: f64,
        symbol: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            success,
            profit,
            gas_cost,
            slippage,
            expected_slippage,
            symbol: symbol.into(),
        }
    }

    /// Same record with an explicit timestamp (replays and tests)
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Realized minus expected slippage
    pub fn slippage_deviation(&self) -> f64 {
        self.slippage - self.expected_slippage
    }

    pub fn net_profit(&self) -> f64 {
        self.profit - self.gas_cost
    }
}

/// Fixed-capacity rolling window of trades, oldest evicted first
#[derive(Debug, Clone)]
pub struct TradeHistory {
    trades: VecDeque<TradeRecord>,
    capacity: usize,
}

impl TradeHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            trades: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, trade: TradeRecord) {
        if self.trades.len() == self.capacity {
            self.trades.pop_front();
        }
        self.trades.push_back(trade);
    }

    pub(crate) fn len(&self) -> usize {
        self.trades.len()
    }

    /// The `n` most recent trades, oldest first
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &TradeRecord> {
        self.trades.iter().skip(self.trades.len().saturating_sub(n))
    }

    /// Trades at or after `since`
    pub fn since(&self, since: DateTime<Utc>) -> impl Iterator<Item = &TradeRecord> {
        self.trades.iter().filter(move |t| t.timestamp >= since)
    }
}
