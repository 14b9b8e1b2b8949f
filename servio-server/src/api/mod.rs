//! The JSON API surface. Handlers compose the store, the supervisor
//! adapter, the blueprint registry, the site synthesizer, and the
//! monitor into operator-facing operations.

pub mod auth;
pub mod error;
pub mod projects;
pub mod services;
pub mod system;

use crate::state::AppState;
use axum::routing::{get, post};
use axum::{middleware, Router};
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(
            "/api/projects",
            get(projects::list).post(projects::create),
        )
        .route(
            "/api/projects/:id",
            get(projects::get)
                .put(projects::update)
                .delete(projects::delete),
        )
        .route(
            "/api/services",
            get(services::list).post(services::create),
        )
        .route(
            "/api/services/:id",
            get(services::get)
                .put(services::update)
                .delete(services::delete),
        )
        .route("/api/services/:id/start", post(services::start))
        .route("/api/services/:id/stop", post(services::stop))
        .route("/api/services/:id/restart", post(services::restart))
        .route("/api/services/:id/install", post(services::install))
        .route("/api/services/:id/uninstall", post(services::uninstall))
        .route("/api/services/:id/provision", post(services::provision))
        .route("/api/services/:id/logs", get(services::logs))
        .route("/api/services/:id/logs/stream", get(services::stream_logs))
        .route("/api/stats", get(system::stats))
        .route("/api/blueprints", get(system::blueprints))
        .route("/api/nginx/:id/preview", get(system::nginx_preview))
        .route("/api/nginx/:id/deploy", post(system::nginx_deploy))
        .route("/api/nginx/:id/remove", post(system::nginx_remove))
        .route("/api/nginx/:id/save", post(system::nginx_save))
        .route("/api/settings/:key", post(system::set_setting))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_basic_auth,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(TimeoutLayer::new(Duration::from_secs(15)))
        .with_state(state)
}
