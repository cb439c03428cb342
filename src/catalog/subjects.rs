use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::db::models::{decode_set, encode_set, DifficultyLevel};
use crate::db::{self, is_unique_violation};
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: String,
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub department: Option<String>,
    pub credits: Option<i64>,
    pub difficulty: Option<DifficultyLevel>,
    pub prerequisites: Vec<String>,
    pub topics: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectInput {
    pub code: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub department: Option<String>,
    pub credits: Option<i64>,
    pub difficulty: Option<DifficultyLevel>,
    #[serde(default)]
    pub prerequisites: Vec<String>,
    #[serde(default)]
    pub topics: Vec<String>,
}

pub enum SubjectFilter<'a> {
    All,
    Department(&'a str),
    Difficulty(DifficultyLevel),
    Credits(i64),
    Prerequisite(&'a str),
    Keyword(&'a str),
}

const COLUMNS: &str = "id, code, name, description, department, credits, difficulty, \
     prerequisites, topics, created_at, updated_at";

fn map_subject(row: &Row<'_>) -> rusqlite::Result<Subject> {
    let prerequisites: String = row.get(7)?;
    let topics: String = row.get(8)?;
    Ok(Subject {
        id: row.get(0)?,
        code: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        department: row.get(4)?,
        credits: row.get(5)?,
        difficulty: row.get(6)?,
        prerequisites: decode_set(&prerequisites),
        topics: decode_set(&topics),
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

impl SubjectInput {
    fn validate(&self) -> AppResult<()> {
        if self.name.trim().is_empty() {
            return Err(AppError::BadRequest("Subject name is required".into()));
        }
        if self.name.trim().chars().count() > 100 {
            return Err(AppError::BadRequest(
                "Subject name must be at most 100 characters".into(),
            ));
        }
        if matches!(self.credits, Some(c) if c <= 0) {
            return Err(AppError::BadRequest("Credits must be positive".into()));
        }
        Ok(())
    }
}

pub fn list(conn: &Connection, filter: SubjectFilter<'_>) -> AppResult<Vec<Subject>> {
    let (clause, args): (&str, Vec<Value>) = match filter {
        SubjectFilter::All => ("1 = 1", vec![]),
        SubjectFilter::Department(d) => ("department = ?1 COLLATE NOCASE", vec![d.trim().to_string().into()]),
        SubjectFilter::Difficulty(level) => ("difficulty = ?1", vec![level.as_str().to_string().into()]),
        SubjectFilter::Credits(c) => ("credits = ?1", vec![c.into()]),
        SubjectFilter::Prerequisite(p) => (
            "EXISTS (SELECT 1 FROM json_each(subjects.prerequisites) WHERE value = ?1 COLLATE NOCASE)",
            vec![p.trim().to_string().into()],
        ),
        SubjectFilter::Keyword(k) => (
            "(name LIKE ?1 OR code LIKE ?1 OR description LIKE ?1)",
            vec![format!("%{}%", k.trim()).into()],
        ),
    };

    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM subjects WHERE {} ORDER BY name, code",
        COLUMNS, clause
    ))?;
    let subjects = stmt
        .query_map(params_from_iter(args), map_subject)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(subjects)
}

pub fn get(conn: &Connection, id: &str) -> AppResult<Subject> {
    conn.query_row(
        &format!("SELECT {} FROM subjects WHERE id = ?1", COLUMNS),
        params![id],
        map_subject,
    )
    .optional()?
    .ok_or_else(|| AppError::not_found("Subject"))
}

pub fn find_by_name(conn: &Connection, name: &str) -> AppResult<Option<Subject>> {
    let subject = conn
        .query_row(
            &format!(
                "SELECT {} FROM subjects WHERE name = ?1 COLLATE NOCASE ORDER BY created_at LIMIT 1",
                COLUMNS
            ),
            params![name.trim()],
            map_subject,
        )
        .optional()?;
    Ok(subject)
}

pub fn create(conn: &Connection, input: &SubjectInput) -> AppResult<Subject> {
    input.validate()?;
    let code = match input.code.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
        Some(code) => code.to_uppercase(),
        None => unique_code(conn, &derive_code(&input.name))?,
    };

    let id = db::new_id();
    conn.execute(
        "INSERT INTO subjects (id, code, name, description, department, credits, difficulty, prerequisites, topics)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            id,
            code,
            input.name.trim(),
            input.description,
            input.department,
            input.credits,
            input.difficulty,
            encode_set(&input.prerequisites),
            encode_set(&input.topics),
        ],
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::Conflict(format!("Subject code '{}' already exists", code))
        } else {
            e.into()
        }
    })?;

    tracing::info!(subject_id = %id, code = %code, "Subject created");
    get(conn, &id)
}

/// Updates everything except the code, which stays stable once assigned.
pub fn update(conn: &Connection, id: &str, input: &SubjectInput) -> AppResult<Subject> {
    input.validate()?;
    let changed = conn.execute(
        "UPDATE subjects SET name = ?2, description = ?3, department = ?4, credits = ?5,
             difficulty = ?6, prerequisites = ?7, topics = ?8, updated_at = datetime('now')
         WHERE id = ?1",
        params![
            id,
            input.name.trim(),
            input.description,
            input.department,
            input.credits,
            input.difficulty,
            encode_set(&input.prerequisites),
            encode_set(&input.topics),
        ],
    )?;
    if changed == 0 {
        return Err(AppError::not_found("Subject"));
    }
    get(conn, id)
}

pub fn delete(conn: &Connection, id: &str) -> AppResult<()> {
    let courses: i64 = conn.query_row(
        "SELECT COUNT(*) FROM courses WHERE subject_id = ?1",
        params![id],
        |r| r.get(0),
    )?;
    if courses > 0 {
        return Err(AppError::Conflict(format!(
            "Subject still has {} course(s)",
            courses
        )));
    }
    if conn.execute("DELETE FROM subjects WHERE id = ?1", params![id])? == 0 {
        return Err(AppError::not_found("Subject"));
    }
    tracing::info!(subject_id = %id, "Subject deleted");
    Ok(())
}

/// Look a subject up by name (case-insensitive) or create a general one.
pub fn find_or_create_by_name(conn: &Connection, name: &str) -> AppResult<Subject> {
    if let Some(subject) = find_by_name(conn, name)? {
        return Ok(subject);
    }
    let name = name.trim();
    create(
        conn,
        &SubjectInput {
            code: None,
            name: name.to_string(),
            description: Some(format!("Subject for {}", name)),
            department: Some("General".to_string()),
            credits: Some(3),
            difficulty: Some(DifficultyLevel::Beginner),
            prerequisites: vec![],
            topics: vec![],
        },
    )
}

/// First four alphanumeric characters of the name, upper-cased.
pub fn derive_code(name: &str) -> String {
    let code: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(4)
        .collect::<String>()
        .to_uppercase();
    if code.is_empty() {
        "SUBJ".to_string()
    } else {
        code
    }
}

fn unique_code(conn: &Connection, base: &str) -> AppResult<String> {
    let taken = |code: &str| -> AppResult<bool> {
        Ok(conn.query_row(
            "SELECT COUNT(*) > 0 FROM subjects WHERE code = ?1",
            params![code],
            |r| r.get(0),
        )?)
    };

    if !taken(base)? {
        return Ok(base.to_string());
    }
    let mut counter = 1;
    loop {
        let candidate = format!("{}{}", base, counter);
        if !taken(&candidate)? {
            return Ok(candidate);
        }
        counter += 1;
    }
}
