use arbguard::config::RiskConfig;
use arbguard::risk::{BreakerKind, CircuitState, RiskBreakerManager, TradeRecord};
use chrono::{Duration, Utc};

fn manager_with(config: RiskConfig) -> RiskBreakerManager {
    RiskBreakerManager::new(config)
}

fn trade(success: bool) -> TradeRecord {
    TradeRecord::new(success, if success { 0.5 } else { -0.05 }, 0.0, 0.0, 0.0, "SOL")
}

#[test]
fn test_win_rate_breaker_after_twenty_trades() {
    let manager = manager_with(RiskConfig {
        min_win_rate: 0.40,
        win_rate_window: 20,
        initial_balance: 1_000.0,
        ..RiskConfig::default()
    });

    // 7 wins spread out so no failure streak reaches 5
    let wins = [2, 5, 8, 11, 14, 17, 19];
    for i in 0..20 {
        manager.record(trade(wins.contains(&i)));
        if i < 19 {
            assert!(manager.is_trading_allowed().is_ok(), "halted early at trade {}", i);
        }
    }

    let status = manager.breaker(BreakerKind::WinRate);
    assert_eq!(status.state, CircuitState::Open);
    assert!((status.trigger_value.unwrap() - 0.35).abs() < 1e-9);
    assert_eq!(status.threshold_value, Some(0.40));

    let halted = manager.is_trading_allowed().unwrap_err();
    assert_eq!(halted.kind, BreakerKind::WinRate);
}

#[test]
fn test_drawdown_from_peak() {
    let manager = manager_with(RiskConfig {
        max_drawdown_pct: 0.15,
        initial_balance: 0.0,
        ..RiskConfig::default()
    });

    manager.record(TradeRecord::new(true, 10.0, 0.0, 0.0, 0.0, "SOL"));
    assert!(manager.is_trading_allowed().is_ok());

    manager.record(TradeRecord::new(false, -2.0, 0.0, 0.0, 0.0, "SOL"));

    let portfolio = manager.portfolio();
    assert_eq!(portfolio.peak_balance, 10.0);
    assert_eq!(portfolio.balance, 8.0);

    let status = manager.breaker(BreakerKind::Drawdown);
    assert_eq!(status.state, CircuitState::Open);
    assert!((status.trigger_value.unwrap() - 0.20).abs() < 1e-9);
}

#[test]
fn test_retrigger_keeps_original_trigger_time() {
    let manager = manager_with(RiskConfig {
        initial_balance: 10.0,
        ..RiskConfig::default()
    });
    let t0 = Utc::now();

    manager.record(TradeRecord::new(false, -2.0, 0.0, 0.0, 0.0, "SOL").at(t0));
    let first = manager.breaker(BreakerKind::Drawdown);

    manager.record(TradeRecord::new(false, -3.0, 0.0, 0.0, 0.0, "SOL").at(t0 + Duration::minutes(1)));
    let second = manager.breaker(BreakerKind::Drawdown);

    assert_eq!(second.triggered_at, Some(t0));
    assert_eq!(second.trigger_reason, first.trigger_reason);
}

#[test]
fn test_gate_reports_first_open_breaker() {
    let manager = manager_with(RiskConfig {
        initial_balance: 10.0,
        ..RiskConfig::default()
    });

    manager.record_volatility_spike(0.5, 0.1);
    manager.record(TradeRecord::new(false, -5.0, 0.0, 0.0, 0.0, "SOL"));

    // Drawdown comes before volatility in gate order
    let halted = manager.is_trading_allowed().unwrap_err();
    assert_eq!(halted.kind, BreakerKind::Drawdown);
    assert!(halted.to_string().contains("drawdown"));

    manager.reset(BreakerKind::Drawdown);
    let halted = manager.is_trading_allowed().unwrap_err();
    assert_eq!(halted.kind, BreakerKind::VolatilitySpike);

    manager.reset(BreakerKind::VolatilitySpike);
    assert!(manager.is_trading_allowed().is_ok());
}

#[test]
fn test_full_recovery_cycle() {
    let manager = manager_with(RiskConfig {
        recovery_test_trades: 4,
        recovery_min_success_rate: 0.75,
        auto_reset_hours: 2.0,
        initial_balance: 1_000.0,
        ..RiskConfig::default()
    });
    let t0 = Utc::now();

    for i in 0..5 {
        manager.record(trade(false).at(t0 + Duration::seconds(i)));
    }
    let tripped = manager.breaker(BreakerKind::ConsecutiveFailures);
    assert_eq!(tripped.state, CircuitState::Open);
    let triggered_at = tripped.triggered_at.unwrap();

    // Too early
    assert!(manager.auto_recover_at(triggered_at + Duration::hours(1)).is_empty());

    // First probe: 2 of 4 succeed, reopens
    let probing = manager.auto_recover_at(triggered_at + Duration::hours(2));
    assert_eq!(probing, vec![BreakerKind::ConsecutiveFailures]);
    for success in [true, false, true, false] {
        manager.record(trade(success));
    }
    let reopened = manager.breaker(BreakerKind::ConsecutiveFailures);
    assert_eq!(reopened.state, CircuitState::Open);
    assert_eq!(reopened.triggered_at, Some(triggered_at));
    assert_eq!(reopened.recovery_attempts, 1);
    assert_eq!(manager.recovery_buffer_len(), 0);

    // Second probe: 3 of 4 meets the 75% bar
    manager
        .attempt_recovery_at(BreakerKind::ConsecutiveFailures, triggered_at + Duration::hours(3))
        .unwrap();
    for success in [true, true, false, true] {
        manager.record(trade(success));
    }

    let closed = manager.breaker(BreakerKind::ConsecutiveFailures);
    assert_eq!(closed.state, CircuitState::Closed);
    assert!(closed.triggered_at.is_none());
    assert_eq!(closed.recovery_attempts, 2);
    assert_eq!(manager.recovery_buffer_len(), 0);
    assert!(manager.is_trading_allowed().is_ok());
}

#[test]
fn test_history_bounded_by_capacity() {
    let manager = manager_with(RiskConfig {
        history_capacity: 50,
        initial_balance: 1_000.0,
        ..RiskConfig::default()
    });

    for _ in 0..200 {
        manager.record(trade(true));
    }

    assert_eq!(manager.report().trades_recorded, 50);
}

#[test]
fn test_concurrent_scanners_share_one_manager() {
    use std::sync::Arc;
    use std::thread;

    let manager = Arc::new(manager_with(RiskConfig {
        history_capacity: 10_000,
        initial_balance: 1_000.0,
        ..RiskConfig::default()
    }));

    let handles: Vec<_> = ["SOL", "JUP", "BONK", "WIF"]
        .into_iter()
        .map(|symbol| {
            let manager = Arc::clone(&manager);
            thread::spawn(move || {
                for _ in 0..250 {
                    manager.record(TradeRecord::new(true, 0.01, 0.001, 0.0, 0.0, symbol));
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let report = manager.report();
    assert_eq!(report.trades_recorded, 1_000);
    assert!((report.balance - (1_000.0 + 1_000.0 * 0.009)).abs() < 1e-6);
    assert!(report.trading_allowed);
}
