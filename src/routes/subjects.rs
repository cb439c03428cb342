use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;

use crate::catalog::subjects::{self, Subject, SubjectFilter, SubjectInput};
use crate::db::models::DifficultyLevel;
use crate::envelope::ApiResponse;
use crate::error::AppResult;
use crate::extractors::CurrentUser;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct KeywordParam {
    pub keyword: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/subjects", get(list).post(create))
        .route("/subjects/search", get(search))
        .route("/subjects/department/{department}", get(by_department))
        .route("/subjects/difficulty/{difficulty}", get(by_difficulty))
        .route("/subjects/credits/{credits}", get(by_credits))
        .route("/subjects/prerequisite/{prerequisite}", get(by_prerequisite))
        .route("/subjects/{id}", get(show).put(update).delete(remove))
}

fn listed(conn: &rusqlite::Connection, filter: SubjectFilter<'_>) -> AppResult<ApiResponse<Vec<Subject>>> {
    let subjects = subjects::list(conn, filter)?;
    Ok(ApiResponse::success("Subjects retrieved successfully", subjects))
}

async fn list(State(state): State<AppState>) -> AppResult<ApiResponse<Vec<Subject>>> {
    let conn = state.db.get()?;
    listed(&conn, SubjectFilter::All)
}

async fn search(
    State(state): State<AppState>,
    Query(params): Query<KeywordParam>,
) -> AppResult<ApiResponse<Vec<Subject>>> {
    let conn = state.db.get()?;
    listed(&conn, SubjectFilter::Keyword(&params.keyword))
}

async fn by_department(
    State(state): State<AppState>,
    Path(department): Path<String>,
) -> AppResult<ApiResponse<Vec<Subject>>> {
    let conn = state.db.get()?;
    listed(&conn, SubjectFilter::Department(&department))
}

async fn by_difficulty(
    State(state): State<AppState>,
    Path(difficulty): Path<String>,
) -> AppResult<ApiResponse<Vec<Subject>>> {
    let level = difficulty.parse::<DifficultyLevel>()?;
    let conn = state.db.get()?;
    listed(&conn, SubjectFilter::Difficulty(level))
}

async fn by_credits(
    State(state): State<AppState>,
    Path(credits): Path<i64>,
) -> AppResult<ApiResponse<Vec<Subject>>> {
    let conn = state.db.get()?;
    listed(&conn, SubjectFilter::Credits(credits))
}

async fn by_prerequisite(
    State(state): State<AppState>,
    Path(prerequisite): Path<String>,
) -> AppResult<ApiResponse<Vec<Subject>>> {
    let conn = state.db.get()?;
    listed(&conn, SubjectFilter::Prerequisite(&prerequisite))
}

async fn show(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<ApiResponse<Subject>> {
    let conn = state.db.get()?;
    let subject = subjects::get(&conn, &id)?;
    Ok(ApiResponse::success("Subject retrieved successfully", subject))
}

async fn create(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(input): Json<SubjectInput>,
) -> AppResult<(StatusCode, ApiResponse<Subject>)> {
    user.require_admin()?;
    let conn = state.db.get()?;
    let subject = subjects::create(&conn, &input)?;
    Ok((
        StatusCode::CREATED,
        ApiResponse::success("Subject created successfully", subject),
    ))
}

async fn update(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    Json(input): Json<SubjectInput>,
) -> AppResult<ApiResponse<Subject>> {
    user.require_admin()?;
    let conn = state.db.get()?;
    let subject = subjects::update(&conn, &id, &input)?;
    Ok(ApiResponse::success("Subject updated successfully", subject))
}

async fn remove(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<()>> {
    user.require_admin()?;
    let conn = state.db.get()?;
    subjects::delete(&conn, &id)?;
    Ok(ApiResponse::message("Subject deleted successfully"))
}
