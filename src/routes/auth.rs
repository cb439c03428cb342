use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::auth::service::{self, AuthResponse, LoginRequest, RegisterRequest};
use crate::auth::verification::{self, Verification};
use crate::db::models::UserInfo;
use crate::envelope::ApiResponse;
use crate::error::{AppError, AppResult};
use crate::extractors::CurrentUser;
use crate::state::AppState;
use crate::users;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Deserialize)]
pub struct TokenParam {
    pub token: String,
}

#[derive(Deserialize)]
pub struct EmailParam {
    pub email: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationStatus {
    pub email: String,
    pub is_verified: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MailHealth {
    pub configured: bool,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/register", post(register))
        .route("/auth/refresh", post(refresh))
        .route("/auth/me", get(me))
        .route("/auth/verify", get(verify_email))
        .route("/auth/resend-verification", post(resend_verification))
        .route("/auth/check-verification", get(check_verification))
        .route("/auth/health", get(health))
        .route("/auth/health/email", get(mail_health))
}

async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> AppResult<ApiResponse<AuthResponse>> {
    let response = service::login(&state, &req)?;
    Ok(ApiResponse::success("Login successful", response))
}

async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> AppResult<(StatusCode, ApiResponse<AuthResponse>)> {
    let response = service::register(&state, req).await?;
    Ok((
        StatusCode::CREATED,
        ApiResponse::success(
            "Registration successful. Please check your email to verify your account.",
            response,
        ),
    ))
}

async fn refresh(
    State(state): State<AppState>,
    Json(req): Json<RefreshRequest>,
) -> AppResult<ApiResponse<AuthResponse>> {
    let response = service::refresh(&state, &req.refresh_token)?;
    Ok(ApiResponse::success("Token refreshed", response))
}

async fn me(State(state): State<AppState>, user: CurrentUser) -> AppResult<ApiResponse<UserInfo>> {
    let conn = state.db.get()?;
    let user = users::get(&conn, &user.id)?;
    Ok(ApiResponse::success("Current user", user.info()))
}

async fn verify_email(
    State(state): State<AppState>,
    Query(params): Query<TokenParam>,
) -> AppResult<ApiResponse<()>> {
    let mut conn = state.db.get()?;
    match verification::consume_token(&mut conn, params.token.trim())? {
        Verification::Verified => Ok(ApiResponse::message(
            "Email verified successfully. You can now sign in.",
        )),
        Verification::Unknown => Err(AppError::BadRequest("Invalid verification token".into())),
        Verification::AlreadyUsed => Err(AppError::BadRequest(
            "Verification token has already been used".into(),
        )),
        Verification::Expired => Err(AppError::BadRequest(
            "Verification token has expired, please request a new one".into(),
        )),
    }
}

async fn resend_verification(
    State(state): State<AppState>,
    Query(params): Query<EmailParam>,
) -> AppResult<ApiResponse<()>> {
    let message = service::resend_verification(&state, params.email.trim()).await?;
    Ok(ApiResponse::message(message))
}

async fn check_verification(
    State(state): State<AppState>,
    Query(params): Query<EmailParam>,
) -> AppResult<ApiResponse<VerificationStatus>> {
    let conn = state.db.get()?;
    let user = users::find_by_email(&conn, params.email.trim())?
        .ok_or_else(|| AppError::not_found("User"))?;
    Ok(ApiResponse::success(
        "Verification status retrieved",
        VerificationStatus {
            email: user.email,
            is_verified: user.is_verified,
        },
    ))
}

async fn health() -> ApiResponse<&'static str> {
    ApiResponse::success("Auth service is healthy", "OK")
}

async fn mail_health(State(state): State<AppState>) -> ApiResponse<MailHealth> {
    let configured = state.mailer.is_configured();
    let message = if configured {
        "Email service is configured"
    } else {
        "Email service is not configured"
    };
    ApiResponse::success(message, MailHealth { configured })
}
