//! REST API implementation
//!
//! This module provides the HTTP API for RateWatch.

pub mod handlers;
pub mod routes;

pub use handlers::AppState;
pub use routes::create_router;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::alerting::{RuleStore, ThresholdCheck};
use crate::config::CurrencyConfig;
use crate::error::Result;
use crate::fetcher::RangeFetcher;

/// HTTP API server
pub struct HttpServer {
    state: AppState,
}

impl HttpServer {
    /// Create a new HTTP server
    pub fn new(
        fetcher: RangeFetcher,
        rules: Arc<dyn RuleStore>,
        checks: Arc<ThresholdCheck>,
        currencies: CurrencyConfig,
    ) -> Self {
        Self {
            state: AppState {
                fetcher,
                rules,
                checks,
                currencies: Arc::new(currencies),
            },
        }
    }

    /// Build the router with middleware applied
    pub fn router(&self) -> axum::Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        create_router(self.state.clone())
            .layer(cors)
            .layer(TraceLayer::new_for_http())
    }

    /// Start the HTTP server and run until `shutdown` is cancelled
    pub async fn serve(self, addr: &str, shutdown: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| crate::error::Error::Internal(e.to_string()))?;

        info!("HTTP server listening on {}", addr);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|e| crate::error::Error::Internal(e.to_string()))?;

        Ok(())
    }
}
