use base64::{engine::general_purpose::STANDARD, Engine as _};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::catalog::courses;
use crate::db::{self, models::MaterialType};
use crate::error::{AppError, AppResult};
use crate::extractors::CurrentUser;

pub const ALLOWED_EXTENSIONS: &[&str] = &["pdf", "jpg", "jpeg", "png", "gif", "doc", "docx", "txt"];
pub const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

const TEXT_DATA_PREFIX: &str = "data:text/plain;base64,";
const BINARY_PREFIX: &str = "binary://";
const TEXT_PREFIX: &str = "text://";

/// Listing view; never carries the file bytes.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterialSummary {
    pub id: String,
    pub course_id: String,
    pub title: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub material_type: MaterialType,
    pub file_name: String,
    pub file_size: i64,
    pub is_public: bool,
    pub uploaded_by_name: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct NewMaterial {
    pub title: String,
    pub description: Option<String>,
    pub material_type: MaterialType,
    pub file_name: String,
    pub file_url: String,
    pub file_size: i64,
    pub file_data: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Download {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
    /// Binary uploads are served as attachments, text inline.
    pub attachment: bool,
}

impl Download {
    /// `Content-Disposition` value; only printable ASCII survives in the
    /// quoted file name.
    pub fn disposition(&self) -> String {
        let name: String = self
            .file_name
            .chars()
            .filter(|c| c.is_ascii() && !c.is_ascii_control() && *c != '"' && *c != '\\')
            .collect();
        let name = if name.trim().is_empty() { "download" } else { name.trim() };
        format!(
            "{}; filename=\"{}\"",
            if self.attachment { "attachment" } else { "inline" },
            name
        )
    }
}

impl NewMaterial {
    /// A text material, its content kept inline as a base64 data URI.
    pub fn text(
        title: &str,
        description: Option<String>,
        material_type: MaterialType,
        file_name: Option<String>,
        content: Option<&str>,
    ) -> AppResult<Self> {
        let title = check_title(title)?;
        let file_name = file_name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| format!("{}.txt", title));
        let (file_url, file_size) = match content {
            Some(content) => (
                format!("{}{}", TEXT_DATA_PREFIX, STANDARD.encode(content.as_bytes())),
                content.len() as i64,
            ),
            None => (format!("{}{}.txt", TEXT_PREFIX, title), 0),
        };
        Ok(Self {
            title,
            description,
            material_type,
            file_name,
            file_url,
            file_size,
            file_data: None,
        })
    }

    /// An uploaded file, stored as bytes.
    pub fn file(
        title: &str,
        description: Option<String>,
        material_type: MaterialType,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> AppResult<Self> {
        let title = check_title(title)?;
        let file_name = file_name.trim();
        if !is_allowed_file(file_name) {
            return Err(AppError::BadRequest(format!(
                "File type not supported. Allowed: {}. You tried to upload: {}",
                ALLOWED_EXTENSIONS.join(", "),
                file_name
            )));
        }
        Ok(Self {
            title,
            description,
            material_type,
            file_name: file_name.to_string(),
            file_url: format!("{}{}", BINARY_PREFIX, file_name),
            file_size: bytes.len() as i64,
            file_data: Some(bytes),
        })
    }
}

fn check_title(title: &str) -> AppResult<String> {
    let title = title.trim();
    if title.is_empty() || title.chars().count() > 200 {
        return Err(AppError::BadRequest(
            "Material title is required and must be at most 200 characters".into(),
        ));
    }
    Ok(title.to_string())
}

fn extension(file_name: &str) -> Option<String> {
    let (stem, ext) = file_name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

pub fn is_allowed_file(file_name: &str) -> bool {
    extension(file_name).is_some_and(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()))
}

pub fn content_type_for(file_name: &str) -> String {
    mime_guess::from_path(file_name)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

fn map_summary(row: &Row<'_>) -> rusqlite::Result<MaterialSummary> {
    Ok(MaterialSummary {
        id: row.get(0)?,
        course_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        material_type: row.get(4)?,
        file_name: row.get(5)?,
        file_size: row.get::<_, Option<i64>>(6)?.unwrap_or(0),
        is_public: row.get(7)?,
        uploaded_by_name: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

const SUMMARY_SELECT: &str = "SELECT m.id, m.course_id, m.title, m.description, m.material_type, m.file_name,
        m.file_size, m.is_public,
        CASE WHEN u.id IS NULL THEN NULL ELSE u.first_name || ' ' || u.last_name END,
        m.created_at, m.updated_at
     FROM course_materials m
     LEFT JOIN users u ON u.id = m.uploaded_by";

pub fn list(conn: &Connection, course_id: &str) -> AppResult<Vec<MaterialSummary>> {
    courses::get(conn, course_id)?;
    let mut stmt = conn.prepare(&format!(
        "{} WHERE m.course_id = ?1 ORDER BY m.created_at DESC, m.id DESC",
        SUMMARY_SELECT
    ))?;
    let materials = stmt
        .query_map(params![course_id], map_summary)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(materials)
}

pub fn get_summary(conn: &Connection, course_id: &str, material_id: &str) -> AppResult<MaterialSummary> {
    conn.query_row(
        &format!("{} WHERE m.id = ?1 AND m.course_id = ?2", SUMMARY_SELECT),
        params![material_id, course_id],
        map_summary,
    )
    .optional()?
    .ok_or_else(|| AppError::not_found("Material"))
}

pub fn add(
    conn: &Connection,
    course_id: &str,
    material: NewMaterial,
    caller: &CurrentUser,
) -> AppResult<MaterialSummary> {
    courses::ensure_can_manage(conn, course_id, caller)?;

    let id = db::new_id();
    conn.execute(
        "INSERT INTO course_materials (id, course_id, title, description, material_type, file_url,
             file_data, file_size, file_name, uploaded_by)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            id,
            course_id,
            material.title,
            material.description,
            material.material_type,
            material.file_url,
            material.file_data,
            material.file_size,
            material.file_name,
            caller.id,
        ],
    )?;
    tracing::info!(material_id = %id, course_id = %course_id, size = material.file_size, "Material added");
    get_summary(conn, course_id, &id)
}

pub fn download(conn: &Connection, course_id: &str, material_id: &str) -> AppResult<Download> {
    let row: Option<(String, String, Option<Vec<u8>>, Option<String>, String)> = conn
        .query_row(
            "SELECT file_name, file_url, file_data, description, title
             FROM course_materials WHERE id = ?1 AND course_id = ?2",
            params![material_id, course_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
        )
        .optional()?;
    let (file_name, file_url, file_data, description, title) =
        row.ok_or_else(|| AppError::not_found("Material"))?;

    if let Some(bytes) = file_data {
        return Ok(Download {
            content_type: content_type_for(&file_name),
            file_name,
            bytes,
            attachment: true,
        });
    }

    let text = "text/plain; charset=utf-8".to_string();
    if let Some(encoded) = file_url.strip_prefix(TEXT_DATA_PREFIX) {
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| AppError::Internal(format!("Corrupt text material {}: {}", material_id, e)))?;
        return Ok(Download {
            file_name,
            content_type: text,
            bytes,
            attachment: false,
        });
    }
    if file_url.starts_with(TEXT_PREFIX) {
        return Ok(Download {
            file_name,
            content_type: text,
            bytes: description.unwrap_or(title).into_bytes(),
            attachment: false,
        });
    }
    Err(AppError::NotFound("Material has no downloadable content".into()))
}

pub fn delete(conn: &Connection, course_id: &str, material_id: &str, caller: &CurrentUser) -> AppResult<()> {
    courses::ensure_can_manage(conn, course_id, caller)?;
    let removed = conn.execute(
        "DELETE FROM course_materials WHERE id = ?1 AND course_id = ?2",
        params![material_id, course_id],
    )?;
    if removed == 0 {
        return Err(AppError::not_found("Material"));
    }
    tracing::info!(material_id = %material_id, course_id = %course_id, "Material deleted");
    Ok(())
}
