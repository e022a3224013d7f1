//! Composition root (C11/C12): loads configuration, wires the store, ingest
//! pipeline, and background scheduler together, and runs until asked to
//! shut down.

use std::path::PathBuf;

use controlplane::{config, ControlPlane};
use ep_ingest::{FileOffset, WatchedFile};
use ep_types::LogKind;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let loaded = config::load_from_env().expect("invalid configuration");
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(loaded.log_level.clone()))
        .init();

    tracing::info!("starting control plane");
    let control_plane = ControlPlane::start(loaded.runtime)
        .await
        .expect("failed to start control plane");

    match &loaded.log_dir {
        Some(log_dir) => {
            let files = discover_log_files(log_dir);
            tracing::info!(count = files.len(), log_dir, "starting ingest pipeline");
            control_plane.start_ingest(files, chrono_tz::UTC).await;
        }
        None => tracing::warn!("MTA_CTL_LOG_DIR not set, ingest pipeline idle"),
    }

    shutdown_signal().await;

    tracing::info!("shutting down control plane");
    control_plane.stop().await;
}

/// Exim-style log directories conventionally carry `mainlog`, `rejectlog`,
/// and `paniclog`; a file that doesn't exist yet (rotated away, or never
/// written) is skipped rather than failing startup.
fn discover_log_files(log_dir: &str) -> Vec<(WatchedFile, FileOffset)> {
    [("mainlog", LogKind::Main), ("rejectlog", LogKind::Reject), ("paniclog", LogKind::Panic)]
        .into_iter()
        .filter_map(|(name, log_kind)| {
            let path = PathBuf::from(log_dir).join(name);
            path.exists().then(|| (WatchedFile { path, log_kind }, FileOffset::default()))
        })
        .collect()
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received Ctrl+C, shutting down"),
        () = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
