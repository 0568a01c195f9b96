// =============================================================================
// Meridian — trading worker entry point
// =============================================================================
//
// A single long-running worker: every tick it runs the drawdown check,
// position management, due macro optimization, close detection, due micro
// adaptation, and per-asset entry evaluation. A fatal error inside a tick is
// caught at the loop boundary, logged, and followed by a back-off; Ctrl+C
// finishes the current tick and exits cleanly.
// =============================================================================

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use meridian_bot::config::{BotConfig, Credentials};
use meridian_bot::engine::TradingEngine;

const CONFIG_FILE: &str = "meridian_config.json";
const ERROR_BACKOFF_SECS: u64 = 30;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let credentials = Credentials::load()?;

    let config = BotConfig::load(CONFIG_FILE).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config, using defaults");
        BotConfig::default()
    });

    let engine = TradingEngine::new(&credentials, config).await?;

    engine.setup_leverage().await;
    engine.run_optimization().await;
    engine.startup_banner();

    let mut interval = tokio::time::interval(engine.check_interval());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = engine.tick().await {
                    error!(error = %e, "tick failed — backing off");
                    tokio::time::sleep(std::time::Duration::from_secs(ERROR_BACKOFF_SECS)).await;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("shutdown signal received — stopping");
                break;
            }
        }
    }

    engine.notify_stopped().await;
    info!("trading worker stopped");
    Ok(())
}
