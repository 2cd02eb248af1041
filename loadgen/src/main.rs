use anyhow::{Context, Result};
use chain_loadgen::{logger, Orchestrator, RunConfig};
use clap::Parser;
use log::{debug, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine, the environment and flags still apply
    let dotenv_result = dotenv::dotenv();

    let config = RunConfig::parse();
    logger::init(&config.log).context("Failed to initialize logger")?;

    if let Err(e) = dotenv_result {
        if !e.not_found() {
            warn!("Could not load .env file: {}", e);
        }
    }

    config.validate().context("Invalid configuration")?;
    if log::log_enabled!(log::Level::Debug) {
        debug!("Configuration: {}", config.to_json_redacted());
    }

    info!(
        "Chain load generator v{}: {} account(s), {} rounds of {} message(s) over {}",
        env!("CARGO_PKG_VERSION"),
        config.account_amount,
        config.round,
        config.msg_size,
        humantime::format_duration(config.duration)
    );

    let orchestrator = Orchestrator::connect(config).await?;

    let cancel = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping workers at the next tick");
            cancel.cancel();
        }
    });

    let report = orchestrator.run().await?;
    println!("{}", report);

    if report.interrupted() {
        warn!("Run interrupted before every worker reached its round");
    }
    Ok(())
}
