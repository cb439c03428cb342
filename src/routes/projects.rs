use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::db::models::ProjectStatus;
use crate::envelope::ApiResponse;
use crate::error::AppResult;
use crate::extractors::CurrentUser;
use crate::projects::{
    JoinDecision, JoinRequest, NewProject, Project, ProjectFilter, ProjectMember, ProjectUpdate,
    UserProjectStatus,
};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct KeywordParam {
    pub keyword: String,
}

#[derive(Deserialize)]
pub struct DeadlineParam {
    pub deadline: String,
}

#[derive(Debug, Deserialize)]
pub struct JoinBody {
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RespondBody {
    pub action: String,
    pub response_message: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/projects", get(list).post(create))
        .route("/projects/health", get(health))
        .route("/projects/available", get(available))
        .route("/projects/search", get(search))
        .route("/projects/deadline", get(due_before))
        .route("/projects/leader/{leader_id}", get(by_leader))
        .route("/projects/course/{course_id}", get(by_course))
        .route("/projects/status/{status}", get(by_status))
        .route("/projects/category/{category}", get(by_category))
        .route("/projects/skill/{skill}", get(by_skill))
        .route("/projects/my-join-requests", get(my_join_requests))
        .route("/projects/my-projects/join-requests", get(requests_for_my_projects))
        .route("/projects/join-requests/{request_id}", delete(cancel_join_request))
        .route("/projects/join-requests/{request_id}/respond", post(respond))
        .route("/projects/{id}", get(show).put(update).delete(remove))
        .route("/projects/{id}/join", post(join))
        .route("/projects/{id}/join-requests", get(pending_requests))
        .route("/projects/{id}/user-status", get(user_status))
        .route("/projects/{id}/members", get(members))
        .route("/projects/{id}/members/{user_id}", delete(remove_member))
}

async fn listed(state: &AppState, filter: ProjectFilter) -> AppResult<ApiResponse<Vec<Project>>> {
    let projects = state.projects.list(filter).await?;
    Ok(ApiResponse::success("Projects retrieved successfully", projects))
}

async fn list(State(state): State<AppState>) -> AppResult<ApiResponse<Vec<Project>>> {
    listed(&state, ProjectFilter::All).await
}

async fn available(State(state): State<AppState>) -> AppResult<ApiResponse<Vec<Project>>> {
    listed(&state, ProjectFilter::Available).await
}

async fn search(
    State(state): State<AppState>,
    Query(params): Query<KeywordParam>,
) -> AppResult<ApiResponse<Vec<Project>>> {
    listed(&state, ProjectFilter::Keyword(params.keyword)).await
}

async fn due_before(
    State(state): State<AppState>,
    Query(params): Query<DeadlineParam>,
) -> AppResult<ApiResponse<Vec<Project>>> {
    listed(&state, ProjectFilter::DeadlineBefore(params.deadline)).await
}

async fn by_leader(
    State(state): State<AppState>,
    Path(leader_id): Path<String>,
) -> AppResult<ApiResponse<Vec<Project>>> {
    listed(&state, ProjectFilter::Leader(leader_id)).await
}

async fn by_course(
    State(state): State<AppState>,
    Path(course_id): Path<String>,
) -> AppResult<ApiResponse<Vec<Project>>> {
    listed(&state, ProjectFilter::Course(course_id)).await
}

async fn by_status(
    State(state): State<AppState>,
    Path(status): Path<String>,
) -> AppResult<ApiResponse<Vec<Project>>> {
    let status = status.parse::<ProjectStatus>()?;
    listed(&state, ProjectFilter::Status(status)).await
}

async fn by_category(
    State(state): State<AppState>,
    Path(category): Path<String>,
) -> AppResult<ApiResponse<Vec<Project>>> {
    listed(&state, ProjectFilter::Category(category)).await
}

async fn by_skill(
    State(state): State<AppState>,
    Path(skill): Path<String>,
) -> AppResult<ApiResponse<Vec<Project>>> {
    listed(&state, ProjectFilter::Skill(skill)).await
}

async fn show(State(state): State<AppState>, Path(id): Path<String>) -> AppResult<ApiResponse<Project>> {
    let project = state.projects.get(&id).await?;
    Ok(ApiResponse::success("Project retrieved successfully", project))
}

async fn create(
    State(state): State<AppState>,
    user: CurrentUser,
    Json(input): Json<NewProject>,
) -> AppResult<(StatusCode, ApiResponse<Project>)> {
    let project = state.projects.create(&input, &user).await?;
    Ok((
        StatusCode::CREATED,
        ApiResponse::success("Project created successfully", project),
    ))
}

async fn update(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    Json(change): Json<ProjectUpdate>,
) -> AppResult<ApiResponse<Project>> {
    let project = state.projects.update(&id, &change, &user).await?;
    Ok(ApiResponse::success("Project updated successfully", project))
}

async fn remove(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<()>> {
    state.projects.delete(&id, &user).await?;
    Ok(ApiResponse::message("Project deleted successfully"))
}

async fn join(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
    body: Option<Json<JoinBody>>,
) -> AppResult<(StatusCode, ApiResponse<JoinRequest>)> {
    let message = body.and_then(|Json(body)| body.message);
    let request = state
        .projects
        .request_to_join(&id, message.as_deref(), &user)
        .await?;
    Ok((
        StatusCode::CREATED,
        ApiResponse::success("Join request sent successfully", request),
    ))
}

async fn respond(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(request_id): Path<String>,
    Json(body): Json<RespondBody>,
) -> AppResult<ApiResponse<JoinRequest>> {
    let decision = body.action.parse::<JoinDecision>()?;
    let request = state
        .projects
        .respond_to_join_request(&request_id, decision, body.response_message.as_deref(), &user)
        .await?;
    let message = match decision {
        JoinDecision::Approve => "Join request approved",
        JoinDecision::Reject => "Join request rejected",
    };
    Ok(ApiResponse::success(message, request))
}

async fn cancel_join_request(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(request_id): Path<String>,
) -> AppResult<ApiResponse<()>> {
    state.projects.cancel_join_request(&request_id, &user).await?;
    Ok(ApiResponse::message("Join request cancelled"))
}

async fn pending_requests(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<Vec<JoinRequest>>> {
    let requests = state.projects.pending_requests(&id, &user).await?;
    Ok(ApiResponse::success("Join requests retrieved successfully", requests))
}

async fn requests_for_my_projects(
    State(state): State<AppState>,
    user: CurrentUser,
) -> AppResult<ApiResponse<Vec<JoinRequest>>> {
    let requests = state.projects.requests_for_leader(&user).await?;
    Ok(ApiResponse::success("Join requests retrieved successfully", requests))
}

async fn my_join_requests(
    State(state): State<AppState>,
    user: CurrentUser,
) -> AppResult<ApiResponse<Vec<JoinRequest>>> {
    let requests = state.projects.requests_for_user(&user).await?;
    Ok(ApiResponse::success("Join requests retrieved successfully", requests))
}

async fn user_status(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<UserProjectStatus>> {
    let status = state.projects.user_status(&id, &user).await?;
    Ok(ApiResponse::success("User status retrieved successfully", status))
}

async fn members(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<ApiResponse<Vec<ProjectMember>>> {
    let members = state.projects.members(&id).await?;
    Ok(ApiResponse::success("Members retrieved successfully", members))
}

async fn remove_member(
    State(state): State<AppState>,
    user: CurrentUser,
    Path((id, user_id)): Path<(String, String)>,
) -> AppResult<ApiResponse<()>> {
    state.projects.remove_member(&id, &user_id, &user).await?;
    Ok(ApiResponse::message("Member removed successfully"))
}

async fn health() -> ApiResponse<&'static str> {
    ApiResponse::success("Project controller is healthy", "OK")
}
