// Domain types - pure, no database access
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::db::models::{JoinRequestStatus, MemberRole, ProjectStatus};
use crate::error::AppError;

pub const MAX_TITLE: usize = 200;
pub const MAX_DESCRIPTION: usize = 2000;
pub const MAX_CATEGORY: usize = 100;
pub const MAX_MESSAGE: usize = 500;

/// Stored deadline format; sorts and compares like `datetime('now')`.
const DEADLINE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Forbidden(String),

    #[error("You are already a member of this project")]
    AlreadyMember,

    #[error("Project leaders cannot request to join their own project")]
    LeaderCannotJoin,

    #[error("You already have a pending request for this project")]
    AlreadyRequested,

    #[error("Project is full")]
    ProjectFull,

    #[error("Project is not recruiting new members")]
    NotRecruiting,

    #[error("{0}")]
    InvalidTransition(String),

    #[error("{0}")]
    Validation(String),

    #[error("SQL error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),
}

impl From<ProjectError> for AppError {
    fn from(err: ProjectError) -> Self {
        match err {
            ProjectError::NotFound(what) => AppError::not_found(what),
            ProjectError::Forbidden(msg) => AppError::Forbidden(msg),
            e @ (ProjectError::AlreadyMember
            | ProjectError::AlreadyRequested
            | ProjectError::ProjectFull
            | ProjectError::NotRecruiting) => AppError::Conflict(e.to_string()),
            e @ (ProjectError::LeaderCannotJoin
            | ProjectError::InvalidTransition(_)
            | ProjectError::Validation(_)) => AppError::BadRequest(e.to_string()),
            ProjectError::Database(e) => AppError::Database(e),
            ProjectError::Pool(e) => AppError::Pool(e),
        }
    }
}

/// The leader's answer to a join request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinDecision {
    Approve,
    Reject,
}

impl FromStr for JoinDecision {
    type Err = ProjectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "approve" => Ok(JoinDecision::Approve),
            "reject" => Ok(JoinDecision::Reject),
            _ => Err(ProjectError::Validation(
                "Action must be either 'approve' or 'reject'".into(),
            )),
        }
    }
}

/// Join request transitions. PENDING is the only state that moves.
impl JoinRequestStatus {
    pub fn respond(self, decision: JoinDecision) -> Result<Self, ProjectError> {
        match self {
            JoinRequestStatus::Pending => Ok(match decision {
                JoinDecision::Approve => JoinRequestStatus::Approved,
                JoinDecision::Reject => JoinRequestStatus::Rejected,
            }),
            other => Err(ProjectError::InvalidTransition(format!(
                "Cannot respond to {} request",
                other.as_str().to_ascii_lowercase()
            ))),
        }
    }

    pub fn can_cancel(self) -> bool {
        self == JoinRequestStatus::Pending
    }

    pub fn is_terminal(self) -> bool {
        !self.can_cancel()
    }
}

/// Where the caller stands relative to a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserProjectStatus {
    None,
    Pending,
    Member,
    Leader,
}

impl UserProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Pending => "pending",
            Self::Member => "member",
            Self::Leader => "leader",
        }
    }
}

impl fmt::Display for UserProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Leader first, then membership, then the request table.
/// Approved or rejected requests without a membership row report `None`.
pub fn resolve_user_status(
    is_leader: bool,
    is_member: bool,
    request: Option<JoinRequestStatus>,
) -> UserProjectStatus {
    if is_leader {
        UserProjectStatus::Leader
    } else if is_member {
        UserProjectStatus::Member
    } else if request == Some(JoinRequestStatus::Pending) {
        UserProjectStatus::Pending
    } else {
        UserProjectStatus::None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capacity {
    pub current: i64,
    pub max: i64,
}

impl Capacity {
    pub fn has_open_slot(&self) -> bool {
        self.current < self.max
    }

    pub fn open_slots(&self) -> i64 {
        (self.max - self.current).max(0)
    }

    /// Guard used before adding a member.
    pub fn ensure_open(&self) -> Result<(), ProjectError> {
        if self.has_open_slot() {
            Ok(())
        } else {
            Err(ProjectError::ProjectFull)
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub title: String,
    pub description: String,
    pub category: String,
    pub leader_id: String,
    pub leader_name: String,
    pub course_id: Option<String>,
    pub course_title: Option<String>,
    pub status: ProjectStatus,
    pub max_members: i64,
    pub current_members: i64,
    pub progress: i64,
    pub deadline: Option<String>,
    pub skills_required: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Project {
    pub fn capacity(&self) -> Capacity {
        Capacity {
            current: self.current_members,
            max: self.max_members,
        }
    }

    /// New join requests are accepted only while recruiting.
    pub fn ensure_recruiting(&self) -> Result<(), ProjectError> {
        match self.status {
            ProjectStatus::Recruiting => Ok(()),
            _ => Err(ProjectError::NotRecruiting),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectMember {
    pub id: String,
    pub project_id: String,
    pub user_id: String,
    pub user_name: String,
    pub user_email: String,
    pub role: MemberRole,
    pub joined_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub id: String,
    pub project_id: String,
    pub project_title: String,
    pub user_id: String,
    pub user_name: String,
    pub user_email: String,
    pub status: JoinRequestStatus,
    pub message: Option<String>,
    pub response_message: Option<String>,
    pub responded_at: Option<String>,
    pub responded_by: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProject {
    pub title: String,
    pub description: String,
    pub category: String,
    pub course_id: Option<String>,
    pub max_members: i64,
    pub deadline: Option<String>,
    #[serde(default)]
    pub skills_required: Vec<String>,
}

impl NewProject {
    pub fn validate(&self) -> Result<(), ProjectError> {
        check_text("Title", &self.title, MAX_TITLE)?;
        check_text("Description", &self.description, MAX_DESCRIPTION)?;
        check_text("Category", &self.category, MAX_CATEGORY)?;
        check_max_members(self.max_members)?;
        if let Some(deadline) = &self.deadline {
            parse_deadline(deadline)?;
        }
        Ok(())
    }
}

/// Partial update; absent fields keep their stored value. `courseId` and
/// `deadline` are cleared by an explicit `null`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub course_id: Option<Option<String>>,
    pub status: Option<ProjectStatus>,
    pub max_members: Option<i64>,
    pub progress: Option<i64>,
    #[serde(default, deserialize_with = "present")]
    pub deadline: Option<Option<String>>,
    pub skills_required: Option<Vec<String>>,
}

/// A field that is present in the body, null or not.
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl ProjectUpdate {
    pub fn validate(&self) -> Result<(), ProjectError> {
        if let Some(title) = &self.title {
            check_text("Title", title, MAX_TITLE)?;
        }
        if let Some(description) = &self.description {
            check_text("Description", description, MAX_DESCRIPTION)?;
        }
        if let Some(category) = &self.category {
            check_text("Category", category, MAX_CATEGORY)?;
        }
        if let Some(max) = self.max_members {
            check_max_members(max)?;
        }
        if let Some(progress) = self.progress {
            if !(0..=100).contains(&progress) {
                return Err(ProjectError::Validation(
                    "Progress must be between 0 and 100".into(),
                ));
            }
        }
        if let Some(Some(deadline)) = &self.deadline {
            parse_deadline(deadline)?;
        }
        Ok(())
    }

    /// The new member limit must still fit everyone already on the project.
    pub fn check_capacity(&self, current_members: i64) -> Result<(), ProjectError> {
        match self.max_members {
            Some(max) if max < current_members => Err(ProjectError::Validation(format!(
                "Maximum members cannot be lower than the current member count ({})",
                current_members
            ))),
            _ => Ok(()),
        }
    }
}

pub fn check_message(message: Option<&str>) -> Result<Option<String>, ProjectError> {
    match message.map(str::trim).filter(|m| !m.is_empty()) {
        Some(m) if m.chars().count() > MAX_MESSAGE => Err(ProjectError::Validation(format!(
            "Message must be at most {} characters",
            MAX_MESSAGE
        ))),
        other => Ok(other.map(str::to_string)),
    }
}

fn check_text(name: &str, value: &str, max: usize) -> Result<(), ProjectError> {
    let len = value.trim().chars().count();
    if len == 0 {
        return Err(ProjectError::Validation(format!("{} is required", name)));
    }
    if len > max {
        return Err(ProjectError::Validation(format!(
            "{} must be at most {} characters",
            name, max
        )));
    }
    Ok(())
}

fn check_max_members(max: i64) -> Result<(), ProjectError> {
    if max < 1 {
        return Err(ProjectError::Validation(
            "Maximum members must be at least 1".into(),
        ));
    }
    Ok(())
}

/// Accepts RFC 3339, `YYYY-MM-DDTHH:MM:SS`, `YYYY-MM-DD HH:MM:SS` or a bare
/// date, normalized to UTC in the stored format.
pub fn parse_deadline(raw: &str) -> Result<String, ProjectError> {
    let raw = raw.trim();
    let parsed = DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.naive_utc())
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S"))
        .or_else(|_| NaiveDateTime::parse_from_str(raw, DEADLINE_FORMAT))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .ok_or_else(|| ProjectError::Validation(format!("Invalid deadline: {}", raw)))?;
    Ok(parsed.format(DEADLINE_FORMAT).to_string())
}
