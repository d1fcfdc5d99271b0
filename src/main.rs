use solarmax_bridge::options::Options;
use solarmax_bridge::prelude::*;

use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    let options = Options::new();

    let config = ConfigWrapper::new(options.config_file.clone()).unwrap_or_else(|err| {
        // logging isn't up yet
        eprintln!("Failed to load config {}: {:?}", options.config_file, err);
        std::process::exit(255);
    });

    solarmax_bridge::init_logging(&config.loglevel());
    info!("using config file {}", options.config_file);
    config.log_summary();

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let tx = shutdown_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        let _ = tx.send(());
    });

    if let Some(secs) = options.runtime {
        info!("will stop after {}s", secs);
        let tx = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            let _ = tx.send(());
        });
    }

    if let Err(e) = solarmax_bridge::app(shutdown_rx, config).await {
        error!("Application error: {:?}", e);
        std::process::exit(1);
    }

    Ok(())
}
