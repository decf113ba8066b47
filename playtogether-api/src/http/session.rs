//! Read-only dashboard endpoint

use axum::{extract::State, routing::get, Json, Router};

use super::{auth::AdminAuth, AppState};
use crate::impls::DashboardView;

pub fn create_session_router() -> Router<AppState> {
    Router::new().route("/api/session", get(get_session))
}

/// Broadcaster, peers, pending requests, votes and the last aggregate counters.
pub async fn get_session(_admin: AdminAuth, State(state): State<AppState>) -> Json<DashboardView> {
    Json(state.session.dashboard())
}
