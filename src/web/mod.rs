//! Web layer module
//!
//! Exposes the metrics sink over HTTP: `/metrics` in Prometheus text format,
//! `/health` for liveness probes and a small index page at `/`.

use anyhow::Result;
use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::metrics::MetricsSink;
use crate::services::FleetCoordinator;

pub mod handlers;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub sink: Arc<MetricsSink>,
    pub fleet: Arc<FleetCoordinator>,
}

/// Web server configuration and setup
pub struct WebServer {
    app: Router,
    addr: SocketAddr,
}

impl WebServer {
    pub fn new(addr: SocketAddr, state: AppState) -> Self {
        Self {
            app: Self::create_router(state),
            addr,
        }
    }

    pub fn create_router(state: AppState) -> Router {
        Router::new()
            .route("/", get(handlers::index))
            .route("/metrics", get(handlers::prometheus_metrics))
            .route("/health", get(handlers::health_check))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Serve until `cancellation_token` fires, reporting the bind result on
    /// `ready_signal` before accepting connections
    pub async fn serve_with_cancellation(
        self,
        ready_signal: oneshot::Sender<Result<()>>,
        cancellation_token: CancellationToken,
    ) -> Result<()> {
        let listener = match tokio::net::TcpListener::bind(&self.addr).await {
            Ok(listener) => listener,
            Err(bind_error) => {
                let message = format!("Failed to bind to {}: {}", self.addr, bind_error);
                let _ = ready_signal.send(Err(anyhow::anyhow!("{}", message)));
                return Err(anyhow::anyhow!("{}", message));
            }
        };

        let _ = ready_signal.send(Ok(()));
        tracing::info!("Metrics server listening on http://{}", self.addr);

        let shutdown_signal = async move {
            cancellation_token.cancelled().await;
            tracing::info!("Web server received cancellation signal, shutting down gracefully");
        };

        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal)
            .await?;
        Ok(())
    }
}
