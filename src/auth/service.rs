//! Registration, login and token refresh.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::auth::mailer::{verification_body, verification_link};
use crate::auth::password::{hash_password, verify_password};
use crate::auth::tokens::{TokenKind, TokenPair};
use crate::auth::verification;
use crate::config::Config;
use crate::db::models::{User, UserInfo, UserRole};
use crate::error::{AppError, AppResult};
use crate::state::{AppState, DbPool};
use crate::users::{self, NewUser};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
    pub student_id: String,
    pub department: String,
    #[serde(default)]
    pub role: Option<UserRole>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    #[serde(flatten)]
    pub tokens: TokenPair,
    pub user_info: UserInfo,
}

const INVALID_CREDENTIALS: &str = "Invalid email or password";
const UNVERIFIED: &str = "Please verify your email address before signing in";

impl RegisterRequest {
    pub fn validate(&self) -> AppResult<()> {
        check_length("First name", &self.first_name, 2, 50)?;
        check_length("Last name", &self.last_name, 2, 50)?;
        if !is_valid_email(&self.email) {
            return Err(AppError::BadRequest("Invalid email format".into()));
        }
        if self.password.chars().count() < 6 {
            return Err(AppError::BadRequest(
                "Password must be at least 6 characters long".into(),
            ));
        }
        check_length("Student ID", &self.student_id, 3, 20)?;
        if self.department.trim().is_empty() {
            return Err(AppError::BadRequest("Department is required".into()));
        }
        if self.role == Some(UserRole::Admin) {
            return Err(AppError::BadRequest(
                "Administrator accounts cannot be self-registered".into(),
            ));
        }
        Ok(())
    }
}

fn check_length(field: &str, value: &str, min: usize, max: usize) -> AppResult<()> {
    let len = value.trim().chars().count();
    if len == 0 {
        return Err(AppError::BadRequest(format!("{} is required", field)));
    }
    if len < min || len > max {
        return Err(AppError::BadRequest(format!(
            "{} must be between {} and {} characters",
            field, min, max
        )));
    }
    Ok(())
}

/// Basic structural email check: one `@`, non-empty local part, dotted domain.
pub fn is_valid_email(email: &str) -> bool {
    let email = email.trim();
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.chars().any(char::is_whitespace)
        && email.len() <= 254
}

pub async fn register(state: &AppState, req: RegisterRequest) -> AppResult<AuthResponse> {
    req.validate()?;

    if !state.mailer.is_configured() {
        tracing::warn!("Registration refused: mail delivery is not configured");
        return Err(AppError::ServiceUnavailable(
            "Registration service temporarily unavailable".into(),
        ));
    }

    let password_hash = hash_password(&req.password, state.config.auth.bcrypt_cost)?;

    let (user, token) = {
        let conn = state.db.get()?;
        if users::email_exists(&conn, &req.email)? {
            return Err(AppError::Conflict("Email is already registered".into()));
        }
        if users::student_id_exists(&conn, &req.student_id)? {
            return Err(AppError::Conflict("Student ID is already registered".into()));
        }

        let user = users::insert(
            &conn,
            &NewUser {
                email: &req.email,
                password_hash: &password_hash,
                first_name: &req.first_name,
                last_name: &req.last_name,
                role: req.role.unwrap_or(UserRole::Student),
                student_id: Some(&req.student_id),
                department: Some(&req.department),
                is_verified: false,
            },
        )?;
        let token =
            verification::issue_token(&conn, &user.id, state.config.auth.verification_hours)?;
        (user, token)
    };

    if let Err(e) = send_verification_mail(state, &user, &token).await {
        tracing::error!(email = %user.email, "Verification email failed, rolling back registration: {}", e);
        let conn = state.db.get()?;
        users::delete(&conn, &user.id)?;
        return Err(AppError::ServiceUnavailable(
            "Could not send verification email, please try again later".into(),
        ));
    }

    tracing::info!(user_id = %user.id, email = %user.email, "User registered");
    auth_response(state, &user)
}

async fn send_verification_mail(state: &AppState, user: &User, token: &str) -> AppResult<()> {
    let link = verification_link(&state.config.mail.frontend_url, token);
    let body = verification_body(&user.first_name, &link, state.config.auth.verification_hours);
    state
        .mailer
        .send(&user.email, "Verify your CampusMate account", body)
        .await
        .map_err(|e| AppError::Mail(e.to_string()))
}

pub fn login(state: &AppState, req: &LoginRequest) -> AppResult<AuthResponse> {
    let conn = state.db.get()?;
    let user = users::find_by_email(&conn, &req.email)?
        .ok_or_else(|| AppError::Unauthorized(INVALID_CREDENTIALS.into()))?;

    if !verify_password(&req.password, &user.password_hash) {
        return Err(AppError::Unauthorized(INVALID_CREDENTIALS.into()));
    }
    if !user.is_active {
        return Err(AppError::Forbidden("Account is deactivated".into()));
    }
    if !user.is_verified {
        return Err(AppError::Forbidden(UNVERIFIED.into()));
    }

    users::touch_last_login(&conn, &user.id)?;
    tracing::info!(user_id = %user.id, "User logged in");
    auth_response(state, &user)
}

pub fn refresh(state: &AppState, refresh_token: &str) -> AppResult<AuthResponse> {
    let claims = state
        .tokens
        .verify(refresh_token, TokenKind::Refresh, Utc::now())
        .map_err(|e| {
            tracing::debug!("Rejected refresh token: {}", e);
            AppError::Unauthorized("Invalid or expired refresh token".into())
        })?;

    let conn = state.db.get()?;
    let user = users::find_by_id(&conn, &claims.sub)?
        .filter(|u| u.is_active)
        .ok_or_else(|| AppError::Unauthorized("Invalid or expired refresh token".into()))?;
    if !user.is_verified {
        return Err(AppError::Forbidden(UNVERIFIED.into()));
    }
    auth_response(state, &user)
}

/// Issue a new verification token and mail it. Silent for unknown or verified
/// addresses apart from the returned message.
pub async fn resend_verification(state: &AppState, email: &str) -> AppResult<&'static str> {
    let (user, token) = {
        let conn = state.db.get()?;
        let Some(user) = users::find_by_email(&conn, email)? else {
            return Err(AppError::not_found("User"));
        };
        if user.is_verified {
            return Ok("Email is already verified");
        }
        let token =
            verification::issue_token(&conn, &user.id, state.config.auth.verification_hours)?;
        (user, token)
    };

    send_verification_mail(state, &user, &token).await?;
    Ok("Verification email sent")
}

#[derive(Debug)]
pub enum AdminBootstrap {
    Created(User),
    AlreadyExists,
}

/// Create the configured administrator account unless it already exists.
pub fn bootstrap_admin(db: &DbPool, config: &Config) -> AppResult<AdminBootstrap> {
    let (email, password) = config.admin.credentials().ok_or_else(|| {
        AppError::ServiceUnavailable("Administrator credentials are not configured".into())
    })?;

    let conn = db.get()?;
    if let Some(existing) = users::find_by_email(&conn, email)? {
        if existing.role == UserRole::Admin {
            return Ok(AdminBootstrap::AlreadyExists);
        }
        return Err(AppError::Conflict(
            "The configured admin email belongs to a non-admin account".into(),
        ));
    }

    let password_hash = hash_password(password, config.auth.bcrypt_cost)?;
    let user = users::insert(
        &conn,
        &NewUser {
            email,
            password_hash: &password_hash,
            first_name: "System",
            last_name: "Administrator",
            role: UserRole::Admin,
            student_id: None,
            department: Some("Administration"),
            is_verified: true,
        },
    )?;
    tracing::info!(user_id = %user.id, email = %user.email, "Admin account created");
    Ok(AdminBootstrap::Created(user))
}

fn auth_response(state: &AppState, user: &User) -> AppResult<AuthResponse> {
    let tokens = state
        .tokens
        .issue_pair(user, Utc::now())
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(AuthResponse {
        tokens,
        user_info: user.info(),
    })
}
