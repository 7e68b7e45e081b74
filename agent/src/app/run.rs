//! Main application run loop

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{error, info};

use crate::app::options::AppOptions;
use crate::app::state::AppState;
use crate::errors::AgentError;
use crate::process::TokioProcessRunner;
use crate::server::serve::serve;

/// Run the wizard until `shutdown_signal` resolves
pub async fn run(
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), AgentError> {
    info!("Initializing activation wizard...");

    let runner = Arc::new(TokioProcessRunner::default());
    let app_state = AppState::init(&options.layout, &options.settings, runner)?;

    let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);
    let server_handle = serve(
        &options.server,
        Arc::new(app_state.server_state()),
        async move {
            let _ = shutdown_rx.recv().await;
        },
    )
    .await?;

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");
    let _ = shutdown_tx.send(());

    // Open event streams keep connections alive; do not wait on them forever
    match tokio::time::timeout(options.max_shutdown_delay, server_handle).await {
        Ok(joined) => joined.map_err(|e| AgentError::ServerError(e.to_string()))??,
        Err(_) => {
            error!(
                "Shutdown timed out after {:?}, dropping open connections",
                options.max_shutdown_delay
            );
        }
    }

    info!("Shutdown complete");
    Ok(())
}
