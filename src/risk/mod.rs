// Trading risk breakers
pub mod breaker;
pub mod history;
pub mod manager;
pub mod portfolio;
pub mod rules;

pub use crate::circuit::CircuitState;
pub use breaker::{BreakerKind, BreakerStatus, RiskBreaker};
pub use history::{TradeHistory, TradeRecord};
pub use manager::{RiskBreakerManager, RiskReport};
pub use portfolio::PortfolioState;
