use std::sync::Arc;

use axum::{routing::get, Router};

use scheduling_cell::router::{scheduling_routes, time_off_routes};
use shared_config::AppConfig;

pub fn create_router(state: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/", get(|| async { "Clinic scheduling API is running!" }))
        .nest("/appointments", scheduling_routes(state.clone()))
        .nest("/doctors", time_off_routes(state.clone()))
}
