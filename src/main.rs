//! xmirror - headless X11 window mirroring over MCP
//!
//! Starts a private headless display, mirrors the windows created on it and
//! serves them as MCP tools on stdio. Clients are pointed at the display via
//! the name printed in the log (`DISPLAY=:N`).

use std::sync::Arc;
use std::time::Duration;

use rmcp::ServiceExt;
use rmcp::transport::io::stdio;
use tokio::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use xmirror::compositor::Compositor;
use xmirror::config::CompositorConfig;
use xmirror::server::XmirrorServer;

/// Roughly 60 frames per second
const PUMP_INTERVAL: Duration = Duration::from_millis(16);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing (stderr to keep stdout clean for MCP protocol)
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".to_string().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Starting xmirror MCP Server");

    let config = match std::env::var("XMIRROR_CONFIG") {
        Ok(path) => {
            let json = std::fs::read_to_string(&path)?;
            let mut config = CompositorConfig::from_json(&json)?;
            config.apply_env();
            config
        }
        Err(_) => CompositorConfig::from_env(),
    };

    let mut compositor = Compositor::new(config);
    compositor.try_initialize()?;
    tracing::info!("Mirroring display {}", compositor.display_name());

    let compositor = Arc::new(Mutex::new(compositor));

    let pump = {
        let compositor = compositor.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(PUMP_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                compositor.lock().await.pump();
            }
        })
    };

    let server = XmirrorServer::new(compositor.clone());

    // Run with stdio transport
    let transport = stdio();

    tracing::info!("xmirror MCP Server ready, listening on stdio");

    let service = server.serve(transport).await?;

    // Wait for graceful shutdown
    service.waiting().await?;

    tracing::info!("xmirror MCP Server shutting down");
    pump.abort();
    compositor.lock().await.shutdown();
    Ok(())
}
