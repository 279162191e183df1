use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use bridge_app::config::BridgeConfig;
use bridge_app::lifecycle;
use debounce::{DebounceConfig, Debouncer};
use modbus_client::{GroupEngine, GroupEngineConfig};
use rds_client::{RdsConfig, RdsSession};
use sync_loop::{SyncLoop, SyncLoopConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args().nth(1);
    let config = BridgeConfig::load_with_path(config_path).context("load config")?;

    init_tracing(config.debug_log);

    if let Err(err) = config.validate() {
        tracing::error!(error = %err, "config validation failed");
        std::process::exit(1);
    }
    let groups = config.groups().context("group configured sites")?;

    tracing::info!(groups = groups.len(), sites = config.sites.len(), "bridge starting");

    let engine = GroupEngine::new(GroupEngineConfig {
        request_timeout: config.modbus_request_timeout,
        reconnect_backoff: config.reconnect_backoff,
    });
    let debouncer = Debouncer::new(DebounceConfig {
        fill_debounce: config.fill_debounce,
    });
    let rds = RdsSession::new(RdsConfig {
        base_url: config.rds_base_url.clone(),
        username: config.rds_user.clone(),
        password: config.rds_pass.clone(),
        language: config.rds_language.clone(),
        request_timeout: config.rds_request_timeout,
    })
    .context("build rds session")?;

    let sync_loop = SyncLoop::new(
        engine,
        rds,
        debouncer,
        groups,
        SyncLoopConfig {
            poll_interval: config.poll_interval,
        },
    );

    let (shutdown_tx, shutdown_rx) = lifecycle::shutdown_channel();
    let signal_task = tokio::spawn(lifecycle::wait_for_shutdown_signal(shutdown_tx));
    sync_loop.run(shutdown_rx).await;

    let _ = signal_task.await;
    tracing::info!("bridge stopped");
    Ok(())
}

fn init_tracing(debug_log: bool) {
    let default_directive = if debug_log { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
