// =============================================================================
// Meridian Farmer — airdrop farming orchestrator entry point
// =============================================================================
//
// Usage:
//   meridian-farmer --loop              # run 24/7
//   meridian-farmer --loop --dry-run    # simulate without sending tx
//   meridian-farmer --once              # single cycle then exit
//   meridian-farmer --status            # show current state
// =============================================================================

use clap::Parser;
use tracing_subscriber::EnvFilter;

use meridian_bot::config::Credentials;
use meridian_bot::farm::{AirdropFarmer, FarmerConfig};
use meridian_bot::notify::Notifier;

#[derive(Debug, Parser)]
#[command(name = "meridian-farmer", about = "Autonomous airdrop farming orchestrator")]
struct Cli {
    /// Run 24/7.
    #[arg(long = "loop")]
    run_loop: bool,

    /// Run one cycle then exit.
    #[arg(long)]
    once: bool,

    /// Show current state and exit.
    #[arg(long)]
    status: bool,

    /// Simulate without sending transactions.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let credentials = Credentials::load_for_farming();
    let config = FarmerConfig::default();

    if cli.status {
        let farmer = AirdropFarmer::new(
            config,
            credentials.farming_wallet_key.as_deref(),
            Notifier::disabled(),
            true,
        );
        farmer.show_status();
        return Ok(());
    }

    let notifier = Notifier::new(
        credentials.telegram_bot_token.clone(),
        credentials.telegram_chat_id.clone(),
    );
    let farmer = AirdropFarmer::new(
        config,
        credentials.farming_wallet_key.as_deref(),
        notifier,
        cli.dry_run,
    );

    if cli.run_loop {
        farmer.run_loop().await
    } else if cli.once {
        farmer.run_once().await
    } else {
        println!("Usage:");
        println!("  meridian-farmer --loop            # Run 24/7");
        println!("  meridian-farmer --loop --dry-run  # Simulate without tx");
        println!("  meridian-farmer --once            # Single cycle");
        println!("  meridian-farmer --once --dry-run  # Single dry run");
        println!("  meridian-farmer --status          # Show state");
        Ok(())
    }
}
