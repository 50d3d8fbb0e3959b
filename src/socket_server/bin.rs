//! Workspace Daemon Binary
//!
//! A WebSocket server that gives each user a live view of their workspace.
//!
//! # Usage
//!
//! ```bash
//! workspace-hub-daemon --port 8124
//! GCS_BUCKET=my-bucket WATCH_DIR=/app/workspace workspace-hub-daemon
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use workspace_hub::cli::DaemonArgs;
use workspace_hub::socket_server::{handle_connection, WatchRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("workspace_hub=info".parse()?)
                .add_directive("workspace_hub_daemon=info".parse()?),
        )
        .init();

    let args = DaemonArgs::parse();
    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;

    std::fs::create_dir_all(&args.storage.base_dir)?;
    let provisioner = Arc::new(args.storage.provisioner()?);
    match &provisioner.config().bucket {
        Some(bucket) => tracing::info!(
            "Seeding workspaces from bucket {} ({})",
            bucket,
            provisioner.config().namespace_prefix
        ),
        None => tracing::warn!("No bucket configured, new workspaces start empty"),
    }

    // Create the watch registry
    let registry = Arc::new(WatchRegistry::new(provisioner, args.watcher_config()));
    let file_config = args.file_config();

    // Start the TCP listener
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Workspace daemon listening on ws://{}", addr);
    tracing::info!("Workspaces under {:?}", args.storage.base_dir);

    // Accept connections until ctrl-c
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        tracing::debug!("Accepted connection from {}", addr);
                        let registry = Arc::clone(&registry);
                        let file_config = file_config.clone();
                        tokio::spawn(async move {
                            handle_connection(stream, registry, file_config).await;
                        });
                    }
                    Err(e) => {
                        tracing::error!("Failed to accept connection: {}", e);
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown requested");
                break;
            }
        }
    }

    let report = registry.shutdown_all().await;
    if report.failed.is_empty() {
        tracing::info!("Stopped {} watch sessions", report.stopped);
    } else {
        tracing::warn!(
            "Stopped {} watch sessions, {} failed: {:?}",
            report.stopped,
            report.failed.len(),
            report.failed
        );
    }
    Ok(())
}
