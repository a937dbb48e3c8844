//! HTTP API handlers and routing.

pub mod admin;
pub mod claim;
pub mod error;
mod health;

use axum::http::{header, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Create the main API router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_origin(Any);

    let api = Router::new()
        .route("/claim", post(claim::claim))
        .route("/cluster/ready", get(claim::cluster_ready))
        .route("/config", get(claim::config))
        .route("/admin/login", post(admin::login))
        .route("/admin", get(admin::data));

    Router::new()
        .merge(health::routes())
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
