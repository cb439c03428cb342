use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::auth::service::{self, AdminBootstrap};
use crate::db::models::{User, UserInfo};
use crate::envelope::ApiResponse;
use crate::error::AppResult;
use crate::extractors::CurrentUser;
use crate::state::AppState;
use crate::users;

#[derive(Deserialize)]
pub struct ActiveBody {
    pub active: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminPresence {
    pub admin_exists: bool,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/admin/create-admin", post(create_admin))
        .route("/admin/check-admin", get(check_admin))
        .route("/admin/users", get(list_users))
        .route("/admin/users/{id}/active", put(set_active))
}

/// Bootstrap the configured administrator. Safe to call repeatedly.
async fn create_admin(
    State(state): State<AppState>,
) -> AppResult<(StatusCode, ApiResponse<UserInfo>)> {
    match service::bootstrap_admin(&state.db, &state.config)? {
        AdminBootstrap::Created(user) => Ok((
            StatusCode::CREATED,
            ApiResponse::success("Admin user created successfully", user.info()),
        )),
        AdminBootstrap::AlreadyExists => Ok((
            StatusCode::OK,
            ApiResponse::message("Admin user already exists"),
        )),
    }
}

async fn check_admin(State(state): State<AppState>) -> AppResult<ApiResponse<AdminPresence>> {
    let conn = state.db.get()?;
    let admin_exists = users::admin_exists(&conn)?;
    Ok(ApiResponse::success(
        "Admin status retrieved",
        AdminPresence { admin_exists },
    ))
}

async fn list_users(
    State(state): State<AppState>,
    user: CurrentUser,
) -> AppResult<ApiResponse<Vec<User>>> {
    user.require_admin()?;
    let conn = state.db.get()?;
    let all = users::list(&conn)?;
    Ok(ApiResponse::success("Users retrieved successfully", all))
}

async fn set_active(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    Json(body): Json<ActiveBody>,
) -> AppResult<ApiResponse<User>> {
    user.require_admin()?;
    let conn = state.db.get()?;
    let updated = users::set_active(&conn, &id, body.active)?;
    tracing::info!(user_id = %id, active = body.active, by = %user.id, "User activation changed");
    let message = if body.active {
        "User activated"
    } else {
        "User deactivated"
    };
    Ok(ApiResponse::success(message, updated))
}
