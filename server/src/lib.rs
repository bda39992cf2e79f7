//! H.264 relay server library.
//!
//! Wires the capture supervisor into the hub and serves viewers over WebSocket.

pub mod config;
pub mod routes;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use relay_capture::{Adb, CaptureSupervisor, SupervisorStatus};
use relay_hub::Hub;

pub use config::{Cli, ConfigError, RelayConfig, ViewerConfig};
pub use routes::{router, AppState};

/// How often shutdown checks whether capture has given up.
const SUPERVISOR_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Initialize logging.
pub fn init_logging() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "h264_relay=info,relay_hub=info,relay_capture=info,relay_bitstream=info".into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Run the relay until Ctrl-C or until capture fails for good.
pub async fn run(config: RelayConfig) -> anyhow::Result<()> {
    info!(
        listen = %config.listen_addr,
        ws_path = %config.ws_path,
        capture = %config.capture.command_line(),
        "H.264 relay starting"
    );

    if config.capture.needs_device_check() {
        let adb = Adb::new(config.capture.program.clone());
        let wait = config.capture.device_wait();
        let devices = tokio::task::spawn_blocking(move || adb.preflight(wait))
            .await
            .context("Device check panicked")?
            .context("Android device check failed")?;
        info!(?devices, "Capturing from Android device");
    }

    let hub = Arc::new(Hub::new(config.hub.clone()));
    let mut supervisor = CaptureSupervisor::spawn(config.capture.clone(), Arc::clone(&hub))
        .context("Failed to start capture supervisor")?;

    let stats_task = config
        .stats_interval()
        .map(|interval| tokio::spawn(log_stats(Arc::clone(&hub), interval)));

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
    info!(
        "Open http://{} in a browser, or connect to ws://{}{}",
        config.listen_addr, config.listen_addr, config.ws_path
    );

    let app = router(
        AppState {
            hub: Arc::clone(&hub),
            queue_capacity: config.viewer.queue_capacity,
            ws_path: config.ws_path.clone(),
        },
        config.static_dir.as_deref(),
    );

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&hub), supervisor.status()))
        .await;

    if let Some(task) = stats_task {
        task.abort();
    }

    // Stopping joins the supervisor thread, which may wait on the child
    let final_state = tokio::task::spawn_blocking(move || {
        supervisor.stop();
        supervisor.state()
    })
    .await
    .context("Capture supervisor shutdown panicked")?;
    hub.detach_all();

    info!(capture = %final_state.message(), stats = ?hub.stats(), "H.264 relay stopped");
    served.context("HTTP server failed")
}

/// Resolves on Ctrl-C or when capture stops for good, then releases every viewer.
async fn shutdown_signal(hub: Arc<Hub>, status: SupervisorStatus) {
    let capture_finished = {
        let status = status.clone();
        async move {
            while !status.get().is_terminal() {
                tokio::time::sleep(SUPERVISOR_POLL_INTERVAL).await;
            }
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => info!("Shutdown requested"),
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        },
        _ = capture_finished => {
            warn!(state = %status.get().message(), "Capture supervisor finished, shutting down");
        }
    }

    // Dropping every queue ends the viewer writers so their sockets close
    let released = hub.detach_all();
    info!(viewers = released, "Released viewers");
}

async fn log_stats(hub: Arc<Hub>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let stats = hub.stats();
        info!(
            viewers = stats.viewers,
            cached_units = stats.cached_units,
            generation = stats.cache_generation,
            bytes = stats.bytes_ingested,
            units = stats.units_produced,
            dropped = stats.sinks_dropped,
            overflows = stats.pending_overflows,
            "Relay stats"
        );
    }
}
