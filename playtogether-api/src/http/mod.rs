// Module: http
// HTTP and WebSocket surface of the relay

pub mod auth;
pub mod error;
pub mod health;
pub mod session;
pub mod websocket;

use axum::{routing::get, Router};
use playtogether_core::Config;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::impls::SessionHandle;

pub use error::{AppError, AppResult};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub session: SessionHandle,
    pub config: Arc<Config>,
}

/// Create the HTTP router with all routes
pub fn create_router(config: Arc<Config>, session: SessionHandle) -> Router {
    let state = AppState { session, config };

    let router = Router::new()
        // Health check and metrics (for monitoring probes)
        .merge(health::create_health_router())
        // Dashboard snapshot
        .merge(session::create_session_router())
        // Relay sockets
        .route("/ws", get(websocket::watcher_handler))
        .route("/ws/broadcast", get(websocket::broadcaster_handler));

    // Apply layers before state
    let router = router.layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            ),
    );

    // Apply state to all routes (must be last)
    router.with_state(state)
}
