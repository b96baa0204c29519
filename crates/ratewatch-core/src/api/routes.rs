//! API routes

use axum::{routing::get, Router};

use super::handlers::{self, AppState};

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/health", get(handlers::health))

        // Reference data
        .route("/api/v1/currencies", get(handlers::list_currencies))
        .route("/api/v1/data/:data_type", get(handlers::get_data))

        // Alert rules
        .route(
            "/api/v1/notifications",
            get(handlers::list_notifications).post(handlers::create_notification),
        )

        .with_state(state)
}
