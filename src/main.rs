use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use sunmine::battery::{BatteryPortal, HttpBatteryPortal};
use sunmine::config::Config;
use sunmine::controller::AutoController;
use sunmine::dispatcher::CommandDispatcher;
use sunmine::logging::{get_logger, init_logging};
use sunmine::miner::{MinerClient, WhatsMinerClient};
use sunmine::persistence::PersistenceManager;
use sunmine::telemetry::{
    BatteryTelemetry, TelemetryHub, spawn_battery_poller, spawn_miner_poller,
};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;
    init_logging(&config.logging).context("Failed to initialize logging")?;

    let logger = get_logger("main");
    logger.info(&format!(
        "Sunmine {} starting; miner {}:{} at {} W",
        env!("APP_VERSION"),
        config.miner.host,
        config.miner.port,
        config.miner.base_watts
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let hub = TelemetryHub::new();

    let miner: Arc<dyn MinerClient> = Arc::new(WhatsMinerClient::new(&config.miner));
    let mut tasks = vec![spawn_miner_poller(
        Arc::clone(&miner),
        &hub,
        Duration::from_secs(config.miner.poll_seconds),
        shutdown_rx.clone(),
    )];

    match HttpBatteryPortal::new(&config.battery) {
        Ok(portal) => {
            let portal: Arc<dyn BatteryPortal> = Arc::new(portal);
            tasks.push(spawn_battery_poller(
                portal,
                &hub,
                Duration::from_secs(config.battery.poll_seconds),
                shutdown_rx.clone(),
            ));
        }
        Err(e) => logger.warn(&format!(
            "Battery telemetry disabled ({e}); auto-control will hold its target"
        )),
    }

    let dispatcher = Arc::new(
        CommandDispatcher::new(Arc::clone(&miner))
            .with_observed(hub.miner.clone())
            .with_verification(config.miner.verify_commands),
    );
    let telemetry = Arc::new(BatteryTelemetry::new(
        hub.battery.clone(),
        config.battery.stale_after_seconds,
    ));

    let mut persistence = PersistenceManager::new(&config.state_file);
    if let Err(e) = persistence.load() {
        logger.warn(&format!("Could not read state file: {e}"));
    }
    let restore_enabled = config.autocontrol.enabled || persistence.state().autocontrol;

    let controller = AutoController::new(&config, telemetry, Arc::clone(&dispatcher))
        .context("Failed to create controller")?
        .with_persistence(persistence);
    let (handle, controller_task) = controller.spawn(shutdown_rx.clone());
    if restore_enabled {
        logger.info("Restoring auto-control enabled state");
        handle.enable()?;
    }

    #[cfg(feature = "web")]
    {
        let state = sunmine::web::AppState {
            controller: handle.clone(),
            dispatcher: Arc::clone(&dispatcher),
            telemetry: hub.clone(),
            config: Arc::new(config.clone()),
        };
        let host = config.web.host.clone();
        let port = config.web.port;
        let web_shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = sunmine::web::serve(state, &host, port, web_shutdown).await {
                get_logger("web").error(&format!("Web server error: {e}"));
            }
        }));
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    logger.info("Shutting down");
    let _ = shutdown_tx.send(true);

    if let Err(e) = controller_task.await {
        logger.error(&format!("Controller task failed: {e}"));
    }
    for task in tasks {
        let _ = task.await;
    }
    logger.info("Shutdown complete");
    Ok(())
}
