use axum::extract::FromRequestParts;
use axum::http::header;
use axum::http::request::Parts;
use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use crate::auth::tokens::TokenKind;
use crate::db::models::UserRole;
use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Represents the currently authenticated user.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: String,
    pub email: String,
    pub role: UserRole,
}

impl CurrentUser {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    pub fn require_admin(&self) -> AppResult<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(AppError::Forbidden("Administrator access required".into()))
        }
    }

    /// The caller owns the resource or is an admin.
    pub fn require_owner_or_admin(&self, owner_id: &str, action: &str) -> AppResult<()> {
        if self.id == owner_id || self.is_admin() {
            Ok(())
        } else {
            Err(AppError::Forbidden(format!(
                "You are not allowed to {}",
                action
            )))
        }
    }
}

/// Extractor that requires a valid bearer access token.
/// The role is re-read from the database so deactivation and role changes
/// take effect before the token expires.
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .ok_or_else(|| AppError::Unauthorized("Authentication required".into()))?;

        let claims = state
            .tokens
            .verify(token, TokenKind::Access, Utc::now())
            .map_err(|e| {
                tracing::debug!("Rejected access token: {}", e);
                AppError::Unauthorized("Invalid or expired token".into())
            })?;

        let conn = state.db.get()?;
        let row: Option<(String, UserRole, bool)> = conn
            .query_row(
                "SELECT email, role, is_active FROM users WHERE id = ?1",
                params![claims.sub],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()?;

        match row {
            Some((email, role, true)) => Ok(CurrentUser {
                id: claims.sub,
                email,
                role,
            }),
            Some((_, _, false)) => Err(AppError::Unauthorized("Account is deactivated".into())),
            None => Err(AppError::Unauthorized("Invalid or expired token".into())),
        }
    }
}

/// Optional user extractor: `None` instead of 401 when not authenticated.
pub struct MaybeUser(pub Option<CurrentUser>);

impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        match CurrentUser::from_request_parts(parts, state).await {
            Ok(user) => Ok(MaybeUser(Some(user))),
            Err(_) => Ok(MaybeUser(None)),
        }
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    let value = parts.headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() {
        Some(token.trim())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts_with(auth: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("/");
        if let Some(value) = auth {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn bearer_token_is_extracted() {
        assert_eq!(bearer_token(&parts_with(Some("Bearer abc.def.ghi"))), Some("abc.def.ghi"));
        assert_eq!(bearer_token(&parts_with(Some("bearer xyz"))), Some("xyz"));
    }

    #[test]
    fn other_schemes_are_ignored() {
        assert_eq!(bearer_token(&parts_with(Some("Basic dXNlcjpwdw=="))), None);
        assert_eq!(bearer_token(&parts_with(Some("Bearer "))), None);
        assert_eq!(bearer_token(&parts_with(None)), None);
    }

    #[test]
    fn owner_or_admin_rules() {
        let student = CurrentUser {
            id: "u1".into(),
            email: "u1@example.edu".into(),
            role: UserRole::Student,
        };
        let admin = CurrentUser {
            id: "a1".into(),
            email: "a1@example.edu".into(),
            role: UserRole::Admin,
        };
        assert!(student.require_owner_or_admin("u1", "edit").is_ok());
        assert!(matches!(
            student.require_owner_or_admin("u2", "edit"),
            Err(AppError::Forbidden(_))
        ));
        assert!(admin.require_owner_or_admin("u2", "edit").is_ok());
        assert!(student.require_admin().is_err());
        assert!(admin.require_admin().is_ok());
    }
}
