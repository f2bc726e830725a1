//! CLI command implementations

use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;
use crate::engine::AlertEngine;
use crate::server;

/// Run the HTTP server (trigger endpoint + webhook ingress)
pub async fn serve(config: Config, bind_override: Option<String>) -> Result<()> {
    let bind = bind_override.unwrap_or_else(|| config.server.bind.clone());
    let config = Arc::new(config);

    info!(
        alerts = config.alerts.len(),
        webhook = config.webhook.enabled,
        "Starting alert server"
    );

    let engine = Arc::new(AlertEngine::from_config(config).await?);
    server::serve(engine, &bind).await?;
    Ok(())
}

/// Execute one evaluation cycle and exit
pub async fn run(config: Config, dry_run: bool) -> Result<()> {
    let mut config = config;
    if dry_run {
        warn!("Dry run: deliveries disabled, pipeline still executes");
        config.delivery.send_enabled = false;
    }

    let engine = Arc::new(AlertEngine::from_config(Arc::new(config)).await?);
    let report = engine.run_cycle().await?;

    info!(
        definitions = report.definitions,
        delivered = report.delivered,
        failed = report.failed,
        "Cycle complete"
    );
    Ok(())
}

/// Show current configuration (secrets masked)
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.redacted());
    for alert in &config.alerts {
        println!(
            "  alert {}: \"{}\" window={}m min_wallets={} exclusions={}",
            alert.id,
            alert.name,
            alert.filter.window_minutes,
            alert.filter.min_distinct_wallets,
            alert.filter.excluded_tokens.len()
        );
    }
    Ok(())
}

/// Check that a valid provider session is obtainable
pub async fn health(config: Config) -> Result<()> {
    let engine = Arc::new(AlertEngine::from_config(Arc::new(config)).await?);
    // Cheapest meaningful probe: a full cycle needs exactly this to start
    match engine.session_probe().await {
        Ok(()) => {
            info!("Session credential OK");
            println!("ok");
            Ok(())
        }
        Err(e) => {
            warn!(error = %e, "Session credential unavailable");
            anyhow::bail!("session unavailable: {}", e)
        }
    }
}
