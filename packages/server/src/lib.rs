//! DbGate Server
//!
//! Wires `dbgate-core` to an HTTP listener: settings loading, the shared
//! secret gate, routing, the backup schedule and process lifecycle.
//!
//! # Lifecycle
//!
//! 1. Build the dispatcher from the engine settings
//! 2. Start the backup scheduler when backups are enabled
//! 3. Serve until the shutdown future resolves, finishing in-flight requests
//! 4. Stop the scheduler, then close every embedded-KV handle

pub mod http;
pub mod settings;

pub use settings::{ServerSettings, SettingsError};

use anyhow::Context;
use dbgate_core::models::time::SystemTimeProvider;
use dbgate_core::{BackupJob, BackupScheduler, Dispatcher};
use std::future::Future;
use std::sync::Arc;

/// Serve until `shutdown` resolves
pub async fn run_until<F>(settings: ServerSettings, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let dispatcher = Dispatcher::from_config(&settings.gateway);

    let scheduler = settings.gateway.backup.enabled.then(|| {
        let backup = &settings.gateway.backup;
        tracing::info!(
            "💾 Backups of '{}' into {} enabled",
            backup.database,
            backup.output_dir.display()
        );
        let job = BackupJob::new(
            backup.clone(),
            settings.gateway.network_sql.clone(),
            Arc::new(SystemTimeProvider),
        );
        BackupScheduler::spawn(Arc::new(job), backup.interval())
    });

    let app = http::create_router(http::AppState::new(
        dispatcher.clone(),
        settings.api_key.as_str(),
    ));

    let addr = settings.listen_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!("🚀 DbGate listening on http://{}", addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server failed");

    tracing::info!("🛑 Shutting down");
    if let Some(scheduler) = scheduler {
        scheduler.shutdown().await;
    }
    dispatcher.connection_manager().shutdown().await;
    tracing::info!("✅ Shutdown complete");

    served
}
