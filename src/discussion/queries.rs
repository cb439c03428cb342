use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::db::models::{decode_set, encode_set, QueryStatus, VoteTarget, VoteType};
use crate::db;
use crate::discussion::votes::{self, VotePolicy};
use crate::error::{AppError, AppResult};
use crate::extractors::CurrentUser;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    pub id: String,
    pub title: String,
    pub content: String,
    pub category: String,
    pub tags: Vec<String>,
    pub course_id: Option<String>,
    pub author_id: String,
    pub author_name: String,
    pub status: QueryStatus,
    pub upvotes: i64,
    pub downvotes: i64,
    pub response_count: i64,
    pub is_solved: bool,
    pub solved_at: Option<String>,
    pub solved_by: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryInput {
    pub title: String,
    pub content: String,
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub course_id: Option<String>,
}

pub enum QueryFilter<'a> {
    Category(&'a str),
    Author(&'a str),
    Course(&'a str),
    Status(QueryStatus),
}

const SELECT: &str = "SELECT q.id, q.title, q.content, q.category, q.tags, q.course_id, q.author_id,
        u.first_name || ' ' || u.last_name, q.status, q.upvotes, q.downvotes, q.response_count,
        q.is_solved, q.solved_at, q.solved_by, q.created_at, q.updated_at
     FROM queries q
     JOIN users u ON u.id = q.author_id";

const ORDER: &str = "ORDER BY q.created_at DESC, q.id DESC";

fn map_query(row: &Row<'_>) -> rusqlite::Result<Query> {
    let tags: String = row.get(4)?;
    Ok(Query {
        id: row.get(0)?,
        title: row.get(1)?,
        content: row.get(2)?,
        category: row.get(3)?,
        tags: decode_set(&tags),
        course_id: row.get(5)?,
        author_id: row.get(6)?,
        author_name: row.get(7)?,
        status: row.get(8)?,
        upvotes: row.get(9)?,
        downvotes: row.get(10)?,
        response_count: row.get(11)?,
        is_solved: row.get(12)?,
        solved_at: row.get(13)?,
        solved_by: row.get(14)?,
        created_at: row.get(15)?,
        updated_at: row.get(16)?,
    })
}

impl QueryInput {
    pub fn validate(&self) -> AppResult<()> {
        check_field("Title", &self.title, 200)?;
        check_field("Content", &self.content, 5000)?;
        check_field("Category", &self.category, 100)?;
        Ok(())
    }
}

fn check_field(name: &str, value: &str, max: usize) -> AppResult<()> {
    let len = value.trim().chars().count();
    if len == 0 {
        return Err(AppError::BadRequest(format!("{} is required", name)));
    }
    if len > max {
        return Err(AppError::BadRequest(format!(
            "{} must be at most {} characters",
            name, max
        )));
    }
    Ok(())
}

fn check_course(conn: &Connection, course_id: Option<&str>) -> AppResult<()> {
    if let Some(course_id) = course_id {
        let exists: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM courses WHERE id = ?1",
            params![course_id],
            |r| r.get(0),
        )?;
        if !exists {
            return Err(AppError::BadRequest("Course does not exist".into()));
        }
    }
    Ok(())
}

pub fn get(conn: &Connection, id: &str) -> AppResult<Query> {
    conn.query_row(&format!("{} WHERE q.id = ?1", SELECT), params![id], map_query)
        .optional()?
        .ok_or_else(|| AppError::not_found("Query"))
}

pub fn create(conn: &Connection, input: &QueryInput, author: &CurrentUser) -> AppResult<Query> {
    input.validate()?;
    check_course(conn, input.course_id.as_deref())?;

    let id = db::new_id();
    conn.execute(
        "INSERT INTO queries (id, title, content, category, tags, course_id, author_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            id,
            input.title.trim(),
            input.content.trim(),
            input.category.trim(),
            encode_set(&input.tags),
            input.course_id,
            author.id,
        ],
    )?;
    tracing::info!(query_id = %id, author_id = %author.id, "Query created");
    get(conn, &id)
}

/// Newest first. `page` is zero-based. Returns the page and the total count.
pub fn list_page(conn: &Connection, page: u32, size: u32) -> AppResult<(Vec<Query>, i64)> {
    page_where(conn, "1 = 1", vec![], page, size)
}

/// Case-insensitive substring search over title and content.
pub fn search_page(conn: &Connection, term: &str, page: u32, size: u32) -> AppResult<(Vec<Query>, i64)> {
    page_where(
        conn,
        "(q.title LIKE ?1 OR q.content LIKE ?1)",
        vec![format!("%{}%", term.trim()).into()],
        page,
        size,
    )
}

fn page_where(
    conn: &Connection,
    clause: &str,
    args: Vec<Value>,
    page: u32,
    size: u32,
) -> AppResult<(Vec<Query>, i64)> {
    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM queries q WHERE {}", clause),
        params_from_iter(args.iter()),
        |r| r.get(0),
    )?;

    let limit_idx = args.len() + 1;
    let mut page_args = args;
    page_args.push(i64::from(size).into());
    page_args.push((i64::from(page) * i64::from(size)).into());

    let mut stmt = conn.prepare(&format!(
        "{} WHERE {} {} LIMIT ?{} OFFSET ?{}",
        SELECT,
        clause,
        ORDER,
        limit_idx,
        limit_idx + 1
    ))?;
    let queries = stmt
        .query_map(params_from_iter(page_args), map_query)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok((queries, total))
}

pub fn list(conn: &Connection, filter: QueryFilter<'_>) -> AppResult<Vec<Query>> {
    let (clause, arg): (&str, Value) = match filter {
        QueryFilter::Category(c) => ("q.category = ?1 COLLATE NOCASE", c.trim().to_string().into()),
        QueryFilter::Author(id) => ("q.author_id = ?1", id.to_string().into()),
        QueryFilter::Course(id) => ("q.course_id = ?1", id.to_string().into()),
        QueryFilter::Status(s) => ("q.status = ?1", s.as_str().to_string().into()),
    };
    let mut stmt = conn.prepare(&format!("{} WHERE {} {}", SELECT, clause, ORDER))?;
    let queries = stmt
        .query_map(params![arg], map_query)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(queries)
}

/// Edits content fields only. Status and the solved markers move through
/// accepting or deleting a response.
pub fn update(conn: &Connection, id: &str, input: &QueryInput, caller: &CurrentUser) -> AppResult<Query> {
    let current = get(conn, id)?;
    caller.require_owner_or_admin(&current.author_id, "update this query")?;
    input.validate()?;
    check_course(conn, input.course_id.as_deref())?;

    conn.execute(
        "UPDATE queries SET title = ?2, content = ?3, category = ?4, tags = ?5, course_id = ?6,
             updated_at = datetime('now')
         WHERE id = ?1",
        params![
            id,
            input.title.trim(),
            input.content.trim(),
            input.category.trim(),
            encode_set(&input.tags),
            input.course_id,
        ],
    )?;
    get(conn, id)
}

pub fn delete(conn: &mut Connection, id: &str, caller: &CurrentUser) -> AppResult<()> {
    db::immediate(conn, |tx| {
        let current = get(tx, id)?;
        caller.require_owner_or_admin(&current.author_id, "delete this query")?;

        let response_ids: Vec<String> = {
            let mut stmt = tx.prepare("SELECT id FROM responses WHERE query_id = ?1")?;
            let ids = stmt
                .query_map(params![id], |r| r.get(0))?
                .collect::<Result<Vec<_>, _>>()?;
            ids
        };
        for response_id in &response_ids {
            votes::forget(tx, VoteTarget::Response, response_id)?;
        }
        votes::forget(tx, VoteTarget::Query, id)?;
        tx.execute("DELETE FROM queries WHERE id = ?1", params![id])?;
        Ok(())
    })?;
    tracing::info!(query_id = %id, by = %caller.id, "Query deleted");
    Ok(())
}

pub fn vote(
    conn: &mut Connection,
    id: &str,
    vote: VoteType,
    voter: Option<&CurrentUser>,
    policy: VotePolicy,
) -> AppResult<Query> {
    db::immediate(conn, |tx| {
        votes::cast(tx, VoteTarget::Query, id, vote, voter, policy)?;
        get(tx, id)
    })
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn input(title: &str) -> QueryInput {
        QueryInput {
            title: title.to_string(),
            content: format!("{} content", title),
            category: "General".to_string(),
            ..QueryInput::default()
        }
    }
}
