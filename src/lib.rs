// Core modules
pub mod circuit;
pub mod config;
pub mod error;
pub mod failover;
pub mod risk;
pub mod rpc;

// Re-export commonly used types
pub use circuit::CircuitState;
pub use config::EngineConfig;
pub use error::{AttemptError, FailoverError, RecoveryError, TradingHalted};
pub use failover::{Endpoint, EndpointHealth, FailoverRouter};
pub use risk::{BreakerKind, RiskBreakerManager, TradeRecord};

// Error handling
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
