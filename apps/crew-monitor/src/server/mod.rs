pub mod handlers;

use axum::{
    http::Method,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::runtime::CrewRuntime;

pub fn router(runtime: Arc<CrewRuntime>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/crew/view", get(handlers::get_view))
        .route("/crew/events", get(handlers::get_events))
        .route("/crew/stats", get(handlers::get_stats))
        .route("/crew/start", post(handlers::start_run))
        .route("/crew/clear", post(handlers::clear_run))
        .route("/ws/crew", get(handlers::ws_crew_stream))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(runtime)
}
