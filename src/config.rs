use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;
use crate::risk::rules::SLIPPAGE_WINDOW;

const ENV_PREFIX: &str = "ARBGUARD";

/// Top-level engine configuration
///
/// Layered as: built-in defaults, then an optional TOML file, then
/// `ARBGUARD__SECTION__KEY` environment variables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub endpoints: Vec<EndpointConfig>,
    pub failover: FailoverConfig,
    pub risk: RiskConfig,
    pub supervisor: SupervisorConfig,
}

/// One backend the router may send calls to
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub name: String,
    pub url: String,
    pub priority: u32, // lower = preferred
    pub timeout_ms: u64,
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub open_timeout_secs: u64,
    pub rate_limit_per_sec: Option<u32>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            url: String::new(),
            priority: 0,
            timeout_ms: 10_000,
            failure_threshold: 5,
            success_threshold: 2,
            open_timeout_secs: 60,
            rate_limit_per_sec: None,
        }
    }
}

impl EndpointConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>, priority: u32) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            priority,
            ..Self::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn open_timeout(&self) -> Duration {
        Duration::from_secs(self.open_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FailoverConfig {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub retry_backoff: f64,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 1_000,
            retry_backoff: 2.0,
        }
    }
}

impl FailoverConfig {
    /// Delay slept after a failed round: `retry_delay * retry_backoff^round`
    ///
    /// Saturates at `Duration::MAX` when the product overflows.
    pub fn backoff_delay(&self, round: u32) -> Duration {
        let factor = self.retry_backoff.powi(round as i32);
        Duration::try_from_secs_f64(self.retry_delay_ms as f64 / 1000.0 * factor)
            .unwrap_or(Duration::MAX)
    }
}

/// Thresholds for the trading risk breakers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub min_win_rate: f64,
    pub max_drawdown_pct: f64,
    pub max_gas_cost_ratio: f64,
    pub max_consecutive_failures: u32,
    pub max_volatility_spike: f64,
    pub max_slippage_deviation: f64,
    pub win_rate_window: usize,
    pub drawdown_window_hours: u64,
    pub volatility_window_hours: u64,
    pub recovery_test_trades: usize,
    pub recovery_min_success_rate: f64,
    pub auto_reset_hours: f64,
    pub history_capacity: usize,
    pub initial_balance: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            min_win_rate: 0.40,           // 40% over the window
            max_drawdown_pct: 0.15,       // -15% from peak
            max_gas_cost_ratio: 0.5,      // gas eats half the profit
            max_consecutive_failures: 5,  // 5 failures in a row
            max_volatility_spike: 3.0,    // 3x normal volatility
            max_slippage_deviation: 3.0,  // 3 sigma
            win_rate_window: 20,
            drawdown_window_hours: 24,
            volatility_window_hours: 1,
            recovery_test_trades: 5,
            recovery_min_success_rate: 0.6,
            auto_reset_hours: 1.0,
            history_capacity: 1_000,
            initial_balance: 0.0,
        }
    }
}

impl RiskConfig {
    pub fn auto_reset(&self) -> chrono::Duration {
        chrono::Duration::milliseconds((self.auto_reset_hours * 3_600_000.0) as i64)
    }
}

/// Intervals for the background loops run by the binary
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub probe_interval_secs: u64,
    pub recovery_check_interval_secs: u64,
    pub probe_method: String,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            probe_interval_secs: 30,
            recovery_check_interval_secs: 60,
            probe_method: "getSlot".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from defaults, an optional file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder().add_source(Config::try_from(&EngineConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        let settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let engine: EngineConfig = settings.try_deserialize()?;
        engine.validate()?;

        tracing::debug!(
            endpoints = engine.endpoints.len(),
            max_retries = engine.failover.max_retries,
            "Loaded engine configuration"
        );

        Ok(engine)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoints.is_empty() {
            return Err(ConfigError::Invalid("at least one endpoint is required".into()));
        }

        let mut names = HashSet::new();
        for endpoint in &self.endpoints {
            if endpoint.name.is_empty() || endpoint.url.is_empty() {
                return Err(ConfigError::Invalid(
                    "endpoints need both a name and a url".into(),
                ));
            }
            if !names.insert(endpoint.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate endpoint name {}",
                    endpoint.name
                )));
            }
            if endpoint.failure_threshold == 0 || endpoint.success_threshold == 0 {
                return Err(ConfigError::Invalid(format!(
                    "endpoint {} thresholds must be positive",
                    endpoint.name
                )));
            }
            if endpoint.timeout_ms == 0 {
                return Err(ConfigError::Invalid(format!(
                    "endpoint {} timeout must be positive",
                    endpoint.name
                )));
            }
            if endpoint.rate_limit_per_sec == Some(0) {
                return Err(ConfigError::Invalid(format!(
                    "endpoint {} rate limit must be positive when set",
                    endpoint.name
                )));
            }
        }

        if self.failover.max_retries == 0 {
            return Err(ConfigError::Invalid("failover.max_retries must be positive".into()));
        }
        let backoff = self.failover.retry_backoff;
        if !backoff.is_finite() || backoff < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "failover.retry_backoff must be a finite value >= 1.0, got {}",
                backoff
            )));
        }

        self.risk.validate()
    }
}

impl RiskConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, rate) in [
            ("min_win_rate", self.min_win_rate),
            ("max_drawdown_pct", self.max_drawdown_pct),
            ("recovery_min_success_rate", self.recovery_min_success_rate),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(ConfigError::Invalid(format!(
                    "risk.{} must be within [0, 1], got {}",
                    name, rate
                )));
            }
        }

        if self.win_rate_window == 0 || self.recovery_test_trades == 0 || self.history_capacity == 0
        {
            return Err(ConfigError::Invalid(
                "risk window, recovery and history sizes must be positive".into(),
            ));
        }
        // Smaller buffers never hold enough trades for the windowed rules to fire
        let min_capacity = self.win_rate_window.max(SLIPPAGE_WINDOW);
        if self.history_capacity < min_capacity {
            return Err(ConfigError::Invalid(format!(
                "risk.history_capacity must be at least {} (win rate and slippage windows), got {}",
                min_capacity, self.history_capacity
            )));
        }
        if self.max_consecutive_failures == 0 {
            return Err(ConfigError::Invalid(
                "risk.max_consecutive_failures must be positive".into(),
            ));
        }
        if !self.auto_reset_hours.is_finite() || self.auto_reset_hours < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "risk.auto_reset_hours must be a finite non-negative value, got {}",
                self.auto_reset_hours
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn valid_config() -> EngineConfig {
        EngineConfig {
            endpoints: vec![
                EndpointConfig::new("primary", "http://localhost:8899", 0),
                EndpointConfig::new("backup", "http://localhost:8900", 1),
            ],
            ..EngineConfig::default()
        }
    }

    #[test]
    fn test_defaults_are_valid_risk_settings() {
        assert!(RiskConfig::default().validate().is_ok());
    }

    #[test]
    fn test_empty_endpoints_rejected() {
        let result = EngineConfig::default().validate();
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_duplicate_endpoint_names_rejected() {
        let mut config = valid_config();
        config.endpoints[1].name = "primary".to_string();

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_backoff_below_one_rejected() {
        let mut config = valid_config();
        config.failover.retry_backoff = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_non_finite_backoff_rejected() {
        for backoff in [f64::NAN, f64::INFINITY] {
            let mut config = valid_config();
            config.failover.retry_backoff = backoff;
            assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        }
    }

    #[test]
    fn test_backoff_delay_saturates_on_overflow() {
        let failover = FailoverConfig {
            max_retries: 3,
            retry_delay_ms: 1_000,
            retry_backoff: 1e300,
        };

        assert_eq!(failover.backoff_delay(2), Duration::MAX);

        let nan = FailoverConfig {
            retry_backoff: f64::NAN,
            ..failover
        };
        assert_eq!(nan.backoff_delay(1), Duration::MAX);
    }

    #[test]
    fn test_history_smaller_than_rule_windows_rejected() {
        let mut config = valid_config();
        config.risk.history_capacity = 10;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("history_capacity"));

        // Large win-rate window raises the floor
        config.risk.history_capacity = 100;
        config.risk.win_rate_window = 200;
        assert!(config.validate().is_err());

        config.risk.history_capacity = 200;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_non_finite_auto_reset_rejected() {
        for hours in [f64::NAN, f64::INFINITY, -1.0] {
            let mut config = valid_config();
            config.risk.auto_reset_hours = hours;
            assert!(config.validate().is_err(), "accepted auto_reset_hours {}", hours);
        }
    }

    #[test]
    fn test_rate_out_of_range_rejected() {
        let mut config = valid_config();
        config.risk.min_win_rate = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backoff_delay_grows_geometrically() {
        let failover = FailoverConfig {
            max_retries: 3,
            retry_delay_ms: 100,
            retry_backoff: 2.0,
        };

        assert_eq!(failover.backoff_delay(0), Duration::from_millis(100));
        assert_eq!(failover.backoff_delay(1), Duration::from_millis(200));
        assert_eq!(failover.backoff_delay(2), Duration::from_millis(400));
    }

    #[test]
    fn test_load_from_toml_file() {
        let path = std::env::temp_dir().join(format!("arbguard-test-{}.toml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[failover]
max_retries = 4

[risk]
min_win_rate = 0.5

[[endpoints]]
name = "helius"
url = "https://rpc.example.com"
priority = 0

[[endpoints]]
name = "public"
url = "https://api.mainnet-beta.solana.com"
priority = 1
timeout_ms = 2500
"#
        )
        .unwrap();

        let config = EngineConfig::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.failover.max_retries, 4);
        assert_eq!(config.failover.retry_backoff, 2.0); // default kept
        assert_eq!(config.risk.min_win_rate, 0.5);
        assert_eq!(config.endpoints.len(), 2);
        assert_eq!(config.endpoints[1].timeout(), Duration::from_millis(2500));
        assert_eq!(config.endpoints[0].failure_threshold, 5);
    }
}
