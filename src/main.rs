use arbguard::config::SupervisorConfig;
use arbguard::rpc::RpcClient;
use arbguard::{EngineConfig, FailoverRouter, Result, RiskBreakerManager};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing_subscriber::EnvFilter;

/// Failover router and risk breaker engine for the arbitrage bot
#[derive(Parser, Debug)]
#[command(name = "arbguard")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a TOML config file (environment variables still override it)
    #[arg(long, short = 'c', env = "ARBGUARD_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the health probe and recovery supervisor until Ctrl+C
    Run,

    /// Send one routed probe call and print endpoint health as JSON
    Probe,

    /// Validate the configuration and print the effective settings
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let config = EngineConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run => run(config).await,
        Commands::Probe => probe(config).await,
        Commands::CheckConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

// ============================================================================
// Initialization Functions
// ============================================================================

fn setup_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("arbguard=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(config: EngineConfig) -> Result<()> {
    tracing::info!("🚀 arbguard starting");

    // Built once, shared with every loop
    let router = Arc::new(FailoverRouter::from_config(&config));
    let risk = Arc::new(RiskBreakerManager::new(config.risk.clone()));
    let rpc = RpcClient::new();

    tracing::info!("\n📊 Configuration:");
    tracing::info!("  Endpoints: {}", config.endpoints.len());
    for endpoint in &config.endpoints {
        tracing::info!(
            "    - {} (priority {}, timeout {}ms)",
            endpoint.name,
            endpoint.priority,
            endpoint.timeout_ms
        );
    }
    tracing::info!("  Max Retries: {}", config.failover.max_retries);
    tracing::info!("  Min Win Rate: {}%", config.risk.min_win_rate * 100.0);
    tracing::info!("  Max Drawdown: {}%", config.risk.max_drawdown_pct * 100.0);

    let mut probe_task = {
        let router = router.clone();
        let supervisor = config.supervisor.clone();
        tokio::spawn(async move {
            health_probe_loop(router, rpc, supervisor).await;
        })
    };

    let mut recovery_task = {
        let risk = risk.clone();
        let every = Duration::from_secs(config.supervisor.recovery_check_interval_secs.max(1));
        tokio::spawn(async move {
            recovery_loop(risk, every).await;
        })
    };

    tracing::info!("✅ Loops spawned, press Ctrl+C to stop");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("⚠️  Received Ctrl+C, shutting down...");
        }
        result = &mut probe_task => {
            tracing::error!("Health probe loop exited: {:?}", result);
        }
        result = &mut recovery_task => {
            tracing::error!("Recovery loop exited: {:?}", result);
        }
    }

    // Cancels any routed call still in flight
    probe_task.abort();
    recovery_task.abort();

    tracing::info!(
        endpoints = %serde_json::to_string(&router.health_snapshot())?,
        "Final endpoint health"
    );
    tracing::info!(report = %serde_json::to_string(&risk.report())?, "Final risk report");
    tracing::info!("👋 arbguard stopped");
    Ok(())
}

async fn probe(config: EngineConfig) -> Result<()> {
    let router = FailoverRouter::from_config(&config);
    let rpc = RpcClient::new();

    let outcome = routed_probe(&router, &rpc, &config.supervisor.probe_method).await;
    println!("{}", serde_json::to_string_pretty(&router.health_snapshot())?);

    // Node-reported health, asked of each endpoint directly
    for endpoint in router.endpoints() {
        let status = match tokio::time::timeout(endpoint.timeout(), rpc.get_health(endpoint)).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => format!("{:#}", e),
            Err(_) => format!("timed out after {:?}", endpoint.timeout()),
        };
        println!("{} getHealth -> {}", endpoint.name(), status);
    }

    let value = outcome?;
    println!("{} -> {}", config.supervisor.probe_method, value);
    Ok(())
}

// ============================================================================
// Loops
// ============================================================================

async fn routed_probe(
    router: &FailoverRouter,
    rpc: &RpcClient,
    method: &str,
) -> std::result::Result<Value, arbguard::FailoverError> {
    router
        .execute(
            |endpoint| {
                let rpc = rpc.clone();
                let method = method.to_string();
                async move {
                    rpc.call::<Value>(&endpoint, &method, Value::Array(Vec::new()))
                        .await
                }
            },
            method,
        )
        .await
}

async fn health_probe_loop(router: Arc<FailoverRouter>, rpc: RpcClient, supervisor: SupervisorConfig) {
    let mut ticker = interval(Duration::from_secs(supervisor.probe_interval_secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        match routed_probe(&router, &rpc, &supervisor.probe_method).await {
            Ok(value) => {
                tracing::info!(method = %supervisor.probe_method, result = %value, "Probe ok");
            }
            Err(e) => {
                tracing::error!(method = %supervisor.probe_method, error = %e, "Probe failed");
            }
        }

        for health in router.health_snapshot() {
            tracing::debug!(
                endpoint = %health.name,
                state = %health.circuit_state,
                score = health.health_score,
                requests = health.total_requests,
                failures = health.total_failures,
                "Endpoint health"
            );
        }
    }
}

async fn recovery_loop(risk: Arc<RiskBreakerManager>, every: Duration) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let probing = risk.auto_recover();
        if !probing.is_empty() {
            tracing::info!(breakers = ?probing, "Started recovery probes");
        }

        if let Err(halted) = risk.is_trading_allowed() {
            tracing::warn!(breaker = %halted.kind, reason = %halted.reason, "Trading still halted");
        }
    }
}
