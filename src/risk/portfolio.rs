use serde::{Deserialize, Serialize};

use super::history::TradeRecord;

/// Running balance derived from the trade stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioState {
    pub balance: f64,
    pub peak_balance: f64,
    pub consecutive_failures: u32,
}

impl PortfolioState {
    pub fn new(initial_balance: f64) -> Self {
        Self {
            balance: initial_balance,
            peak_balance: initial_balance,
            consecutive_failures: 0,
        }
    }

    /// Fold one trade into the balance, peak and failure streak
    pub fn apply(&mut self, trade: &TradeRecord) {
        self.balance += trade.net_profit();
        if self.balance > self.peak_balance {
            self.peak_balance = self.balance;
        }

        if trade.success {
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures += 1;
        }
    }

    /// Fractional decline from the peak; `None` until the peak is positive
    pub fn drawdown(&self) -> Option<f64> {
        if self.peak_balance <= 0.0 {
            return None;
        }
        Some((self.peak_balance - self.balance) / self.peak_balance)
    }
}
