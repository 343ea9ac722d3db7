//! Server startup: pool, services, background cleanup and the HTTP listener.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api::{start_api_server, ApiState};
use crate::auth::TokenCleanupService;
use crate::config::AppConfig;
use crate::errors::Result;
use crate::storage::create_pool;

/// Run the service until Ctrl+C.
pub async fn run_server(config: AppConfig) -> Result<()> {
    let db_kind = if config.database.is_in_memory() { "sqlite (in-memory)" } else { "sqlite" };
    info!(database = db_kind, "Creating database connection pool");
    let pool = create_pool(&config.database).await?;

    let state = ApiState::from_pool(pool.clone(), &config);

    let cleanup = match config.auth.cleanup_interval() {
        Some(period) => {
            Some(TokenCleanupService::with_sqlx(pool, state.sessions.clone()).spawn(period))
        }
        None => {
            info!("Token cleanup disabled");
            None
        }
    };

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received");
                signal.cancel();
            }
            Err(e) => warn!(error = %e, "Shutdown signal listener failed"),
        }
    });

    let result = start_api_server(&config.server, state, shutdown).await;

    if let Some(handle) = cleanup {
        handle.abort();
    }
    result
}
