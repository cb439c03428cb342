use axum::extract::State;
use axum::routing::get;
use axum::Router;
use serde::Serialize;

use crate::envelope::ApiResponse;
use crate::error::AppResult;
use crate::state::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub endpoints: Vec<&'static str>,
}

#[derive(Serialize)]
pub struct Health {
    pub status: &'static str,
    pub database: &'static str,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
}

async fn index() -> ApiResponse<ServiceInfo> {
    ApiResponse::success(
        "CampusMate API is running",
        ServiceInfo {
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            endpoints: vec![
                "/auth", "/courses", "/subjects", "/queries", "/projects", "/admin", "/health",
            ],
        },
    )
}

async fn health(State(state): State<AppState>) -> AppResult<ApiResponse<Health>> {
    let conn = state.db.get()?;
    conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
    Ok(ApiResponse::success(
        "Service is healthy",
        Health {
            status: "UP",
            database: "UP",
        },
    ))
}
