use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::Row;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Declares an enum stored as upper-case TEXT in SQLite and serialized the
/// same way in JSON. Parsing is case-insensitive.
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let s = s.trim();
                $(
                    if s.eq_ignore_ascii_case($text) {
                        return Ok($name::$variant);
                    }
                )+
                Err(UnknownVariant {
                    kind: stringify!($name),
                    value: s.to_string(),
                })
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e: UnknownVariant| FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

text_enum!(UserRole {
    Student => "STUDENT",
    Tutor => "TUTOR",
    Admin => "ADMIN",
});

text_enum!(DifficultyLevel {
    Beginner => "BEGINNER",
    Intermediate => "INTERMEDIATE",
    Advanced => "ADVANCED",
});

text_enum!(MaterialType {
    Lecture => "LECTURE",
    Assignment => "ASSIGNMENT",
    Reading => "READING",
    Video => "VIDEO",
    Quiz => "QUIZ",
    Document => "DOCUMENT",
    Code => "CODE",
    Image => "IMAGE",
    Other => "OTHER",
});

text_enum!(QueryStatus {
    Open => "OPEN",
    Answered => "ANSWERED",
    Closed => "CLOSED",
});

text_enum!(VoteType {
    Upvote => "UPVOTE",
    Downvote => "DOWNVOTE",
});

text_enum!(VoteTarget {
    Query => "QUERY",
    Response => "RESPONSE",
});

text_enum!(ProjectStatus {
    Recruiting => "RECRUITING",
    Active => "ACTIVE",
    Completed => "COMPLETED",
    Paused => "PAUSED",
});

text_enum!(MemberRole {
    Leader => "LEADER",
    Member => "MEMBER",
    Contributor => "CONTRIBUTOR",
});

text_enum!(JoinRequestStatus {
    Pending => "PENDING",
    Approved => "APPROVED",
    Rejected => "REJECTED",
});

impl UserRole {
    pub fn can_teach(&self) -> bool {
        matches!(self, UserRole::Tutor | UserRole::Admin)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub role: UserRole,
    pub student_id: Option<String>,
    pub department: Option<String>,
    pub avatar_url: Option<String>,
    pub is_active: bool,
    pub is_verified: bool,
    pub last_login: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

pub const USER_COLUMNS: &str = "id, email, password_hash, first_name, last_name, role, student_id, \
     department, avatar_url, is_active, is_verified, last_login, created_at, updated_at";

impl User {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(User {
            id: row.get(0)?,
            email: row.get(1)?,
            password_hash: row.get(2)?,
            first_name: row.get(3)?,
            last_name: row.get(4)?,
            role: row.get(5)?,
            student_id: row.get(6)?,
            department: row.get(7)?,
            avatar_url: row.get(8)?,
            is_active: row.get(9)?,
            is_verified: row.get(10)?,
            last_login: row.get(11)?,
            created_at: row.get(12)?,
            updated_at: row.get(13)?,
        })
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn info(&self) -> UserInfo {
        UserInfo {
            id: self.id.clone(),
            email: self.email.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            role: self.role,
            student_id: self.student_id.clone(),
            department: self.department.clone(),
            avatar_url: self.avatar_url.clone(),
            is_verified: self.is_verified,
        }
    }
}

/// Public projection of a user returned by auth endpoints.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: UserRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub student_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub is_verified: bool,
}

/// Trim, drop blanks, de-duplicate and sort a user supplied string set.
pub fn normalize_set(items: &[String]) -> Vec<String> {
    items
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// String sets are stored as JSON arrays in TEXT columns.
pub fn encode_set(items: &[String]) -> String {
    serde_json::to_string(&normalize_set(items)).unwrap_or_else(|_| "[]".to_string())
}

pub fn decode_set(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}
