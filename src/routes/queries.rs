use axum::extract::{Path, Query as QueryParams, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;

use crate::db::models::{QueryStatus, VoteType};
use crate::discussion::queries::{self, Query, QueryFilter, QueryInput};
use crate::discussion::responses::{self, Response};
use crate::discussion::votes::VotePolicy;
use crate::envelope::{ApiResponse, PageParams, Pagination};
use crate::error::AppResult;
use crate::extractors::{CurrentUser, MaybeUser};
use crate::state::AppState;

const DEFAULT_PAGE_SIZE: u32 = 100;
const DEFAULT_SEARCH_SIZE: u32 = 10;

#[derive(Deserialize)]
pub struct SearchParams {
    pub q: String,
    pub page: Option<u32>,
    pub size: Option<u32>,
}

#[derive(Deserialize)]
pub struct ResponseBody {
    pub content: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/queries", get(list).post(create))
        .route("/queries/health", get(health))
        .route("/queries/search", get(search))
        .route("/queries/category/{category}", get(by_category))
        .route("/queries/author/{author_id}", get(by_author))
        .route("/queries/course/{course_id}", get(by_course))
        .route("/queries/status/{status}", get(by_status))
        .route("/queries/{id}", get(show).put(update).delete(remove))
        .route("/queries/{id}/upvote", post(upvote))
        .route("/queries/{id}/downvote", post(downvote))
        .route("/queries/{id}/responses", get(list_responses).post(create_response))
        .route(
            "/queries/{id}/responses/{response_id}/accept",
            post(accept_response),
        )
        .route(
            "/queries/responses/{response_id}",
            put(update_response).delete(delete_response),
        )
        .route("/queries/responses/{response_id}/upvote", post(upvote_response))
        .route("/queries/responses/{response_id}/downvote", post(downvote_response))
}

fn policy(state: &AppState) -> VotePolicy {
    VotePolicy::from_flag(state.config.discussion.one_vote_per_user)
}

async fn list(
    State(state): State<AppState>,
    QueryParams(params): QueryParams<PageParams>,
) -> AppResult<ApiResponse<Vec<Query>>> {
    let (page, size) = params.resolve(DEFAULT_PAGE_SIZE);
    let conn = state.db.get()?;
    let (items, total) = queries::list_page(&conn, page, size)?;
    Ok(ApiResponse::success("Queries retrieved successfully", items)
        .with_pagination(Pagination::new(page, size, total)))
}

async fn search(
    State(state): State<AppState>,
    QueryParams(params): QueryParams<SearchParams>,
) -> AppResult<ApiResponse<Vec<Query>>> {
    let (page, size) = PageParams {
        page: params.page,
        size: params.size,
    }
    .resolve(DEFAULT_SEARCH_SIZE);
    let conn = state.db.get()?;
    let (items, total) = queries::search_page(&conn, &params.q, page, size)?;
    Ok(ApiResponse::success("Search results retrieved successfully", items)
        .with_pagination(Pagination::new(page, size, total)))
}

fn filtered(state: &AppState, filter: QueryFilter<'_>) -> AppResult<ApiResponse<Vec<Query>>> {
    let conn = state.db.get()?;
    let items = queries::list(&conn, filter)?;
    Ok(ApiResponse::success("Queries retrieved successfully", items))
}

async fn by_category(
    State(state): State<AppState>,
    Path(category): Path<String>,
) -> AppResult<ApiResponse<Vec<Query>>> {
    filtered(&state, QueryFilter::Category(&category))
}

async fn by_author(
    State(state): State<AppState>,
    Path(author_id): Path<String>,
) -> AppResult<ApiResponse<Vec<Query>>> {
    filtered(&state, QueryFilter::Author(&author_id))
}

async fn by_course(
    State(state): State<AppState>,
    Path(course_id): Path<String>,
) -> AppResult<ApiResponse<Vec<Query>>> {
    filtered(&state, QueryFilter::Course(&course_id))
}

async fn by_status(
    State(state): State<AppState>,
    Path(status): Path<String>,
) -> AppResult<ApiResponse<Vec<Query>>> {
    let status = status.parse::<QueryStatus>()?;
    filtered(&state, QueryFilter::Status(status))
}

async fn show(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<ApiResponse<Query>> {
    let conn = state.db.get()?;
    let query = queries::get(&conn, &id)?;
    Ok(ApiResponse::success("Query retrieved successfully", query))
}

async fn create(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(input): Json<QueryInput>,
) -> AppResult<(StatusCode, ApiResponse<Query>)> {
    let conn = state.db.get()?;
    let query = queries::create(&conn, &input, &user)?;
    Ok((
        StatusCode::CREATED,
        ApiResponse::success("Query created successfully", query),
    ))
}

async fn update(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    Json(input): Json<QueryInput>,
) -> AppResult<ApiResponse<Query>> {
    let conn = state.db.get()?;
    let query = queries::update(&conn, &id, &input, &user)?;
    Ok(ApiResponse::success("Query updated successfully", query))
}

async fn remove(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<()>> {
    let mut conn = state.db.get()?;
    queries::delete(&mut conn, &id, &user)?;
    Ok(ApiResponse::message("Query deleted successfully"))
}

fn vote_query(state: &AppState, id: &str, vote: VoteType, voter: Option<&CurrentUser>) -> AppResult<Query> {
    let mut conn = state.db.get()?;
    queries::vote(&mut conn, id, vote, voter, policy(state))
}

async fn upvote(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<Query>> {
    let query = vote_query(&state, &id, VoteType::Upvote, user.as_ref())?;
    Ok(ApiResponse::success("Query upvoted successfully", query))
}

async fn downvote(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<Query>> {
    let query = vote_query(&state, &id, VoteType::Downvote, user.as_ref())?;
    Ok(ApiResponse::success("Query downvoted successfully", query))
}

async fn list_responses(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<Vec<Response>>> {
    let conn = state.db.get()?;
    let items = responses::list_for_query(&conn, &id)?;
    Ok(ApiResponse::success("Responses retrieved successfully", items))
}

async fn create_response(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    Json(body): Json<ResponseBody>,
) -> AppResult<(StatusCode, ApiResponse<Response>)> {
    let mut conn = state.db.get()?;
    let response = responses::create(&mut conn, &id, &body.content, &user)?;
    Ok((
        StatusCode::CREATED,
        ApiResponse::success("Response created successfully", response),
    ))
}

async fn update_response(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(response_id): Path<String>,
    Json(body): Json<ResponseBody>,
) -> AppResult<ApiResponse<Response>> {
    let conn = state.db.get()?;
    let response = responses::update(&conn, &response_id, &body.content, &user)?;
    Ok(ApiResponse::success("Response updated successfully", response))
}

async fn delete_response(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(response_id): Path<String>,
) -> AppResult<ApiResponse<()>> {
    let mut conn = state.db.get()?;
    responses::delete(&mut conn, &response_id, &user)?;
    Ok(ApiResponse::message("Response deleted successfully"))
}

async fn accept_response(
    State(state): State<AppState>,
    user: CurrentUser,
    Path((id, response_id)): Path<(String, String)>,
) -> AppResult<ApiResponse<Query>> {
    let mut conn = state.db.get()?;
    let query = responses::accept(&mut conn, &id, &response_id, &user)?;
    Ok(ApiResponse::success("Response accepted", query))
}

fn vote_response(
    state: &AppState,
    id: &str,
    vote: VoteType,
    voter: Option<&CurrentUser>,
) -> AppResult<Response> {
    let mut conn = state.db.get()?;
    responses::vote(&mut conn, id, vote, voter, policy(state))
}

async fn upvote_response(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
    Path(response_id): Path<String>,
) -> AppResult<ApiResponse<Response>> {
    let response = vote_response(&state, &response_id, VoteType::Upvote, user.as_ref())?;
    Ok(ApiResponse::success("Response upvoted successfully", response))
}

async fn downvote_response(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
    Path(response_id): Path<String>,
) -> AppResult<ApiResponse<Response>> {
    let response = vote_response(&state, &response_id, VoteType::Downvote, user.as_ref())?;
    Ok(ApiResponse::success("Response downvoted successfully", response))
}

async fn health() -> ApiResponse<&'static str> {
    ApiResponse::success("Query controller is healthy", "OK")
}
