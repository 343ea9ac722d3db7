use std::future::IntoFuture;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api::routes::{build_router, ApiState};
use crate::config::ServerConfig;
use crate::errors::{Error, Result};

/// How long open feeds may linger after shutdown is requested.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Serve the API until `shutdown` is cancelled.
///
/// Live feeds never end on their own, so once the grace period has passed
/// the remaining connections are dropped.
pub async fn start_api_server(
    config: &ServerConfig,
    state: ApiState,
    shutdown: CancellationToken,
) -> Result<()> {
    let addr: SocketAddr = config
        .bind_address()
        .parse()
        .map_err(|e| Error::config(format!("Invalid API address: {}", e)))?;

    let listener = TcpListener::bind(addr).await.map_err(|e| Error::Io {
        source: e,
        context: format!("Failed to bind API server to {}", addr),
    })?;
    info!(address = %addr, "Starting HTTP API server");

    let router = build_router(state);
    let server = axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .into_future();

    let grace = async {
        shutdown.cancelled().await;
        tokio::time::sleep(SHUTDOWN_GRACE).await;
    };

    tokio::select! {
        result = server => result.map_err(|e| Error::Io {
            source: e,
            context: "API server error".to_string(),
        })?,
        _ = grace => warn!("Open connections did not drain in time, forcing shutdown"),
    }

    info!("API server shutdown completed");
    Ok(())
}
