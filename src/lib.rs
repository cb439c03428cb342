// Library exports for CampusMate
// The binary and the integration tests both build the app through here

pub mod auth;
pub mod catalog;
pub mod config;
pub mod db;
pub mod discussion;
pub mod envelope;
pub mod error;
pub mod extractors;
pub mod projects;
pub mod routes;
pub mod state;
pub mod users;

use std::time::Duration;

use axum::http::{header, HeaderValue, Method};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::CorsConfig;
use crate::state::AppState;

/// Assemble every router with CORS and request tracing.
pub fn build_app(state: AppState) -> Router {
    let cors = cors_layer(&state.config.cors);

    Router::new()
        .merge(routes::home::router())
        .merge(routes::auth::router())
        .merge(routes::subjects::router())
        .merge(routes::courses::router())
        .merge(routes::queries::router())
        .merge(routes::projects::router())
        .merge(routes::admin::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
            Method::PATCH,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
        .allow_credentials(true)
        .max_age(Duration::from_secs(3600))
}
