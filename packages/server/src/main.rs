//! DbGate server binary
//!
//! # Usage
//!
//! ```bash
//! # Reads ./dbsettings.json, creating it with defaults on first start
//! cargo run -p dbgate-server
//!
//! # Alternate settings file and port
//! DBGATE_CONFIG=/etc/dbgate.json DBGATE_PORT=8080 cargo run -p dbgate-server
//! ```
//!
//! # Environment Variables
//!
//! - `DBGATE_CONFIG`: settings file (default: `dbsettings.json`)
//! - `DBGATE_PORT`, `DBGATE_API_KEY`, `DBGATE_DB_PASSWORD`: setting overrides
//! - `RUST_LOG`: log filter, takes precedence over `log_level`

use dbgate_server::ServerSettings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = ServerSettings::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&settings.log_level)),
        )
        .init();

    tracing::info!("🚀 DbGate Server");
    tracing::info!("==================================");

    dbgate_server::run_until(settings, shutdown_signal()).await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
