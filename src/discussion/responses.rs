use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::db::models::{VoteTarget, VoteType};
use crate::db;
use crate::discussion::queries;
use crate::discussion::votes::{self, VotePolicy};
use crate::error::{AppError, AppResult};
use crate::extractors::CurrentUser;

const MAX_CONTENT: usize = 5000;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub id: String,
    pub query_id: String,
    pub author_id: String,
    pub author_name: String,
    pub content: String,
    pub is_accepted: bool,
    pub upvotes: i64,
    pub downvotes: i64,
    pub created_at: String,
    pub updated_at: String,
}

const SELECT: &str = "SELECT r.id, r.query_id, r.author_id, u.first_name || ' ' || u.last_name,
        r.content, r.is_accepted, r.upvotes, r.downvotes, r.created_at, r.updated_at
     FROM responses r
     JOIN users u ON u.id = r.author_id";

fn map_response(row: &Row<'_>) -> rusqlite::Result<Response> {
    Ok(Response {
        id: row.get(0)?,
        query_id: row.get(1)?,
        author_id: row.get(2)?,
        author_name: row.get(3)?,
        content: row.get(4)?,
        is_accepted: row.get(5)?,
        upvotes: row.get(6)?,
        downvotes: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn check_content(content: &str) -> AppResult<&str> {
    let content = content.trim();
    if content.is_empty() {
        return Err(AppError::BadRequest("Response content is required".into()));
    }
    if content.chars().count() > MAX_CONTENT {
        return Err(AppError::BadRequest(format!(
            "Response content must be at most {} characters",
            MAX_CONTENT
        )));
    }
    Ok(content)
}

/// Keep `queries.response_count` equal to the number of response rows.
fn recount(conn: &Connection, query_id: &str) -> AppResult<()> {
    conn.execute(
        "UPDATE queries SET response_count =
             (SELECT COUNT(*) FROM responses WHERE query_id = ?1)
         WHERE id = ?1",
        params![query_id],
    )?;
    Ok(())
}

pub fn get(conn: &Connection, id: &str) -> AppResult<Response> {
    conn.query_row(&format!("{} WHERE r.id = ?1", SELECT), params![id], map_response)
        .optional()?
        .ok_or_else(|| AppError::not_found("Response"))
}

pub fn list_for_query(conn: &Connection, query_id: &str) -> AppResult<Vec<Response>> {
    queries::get(conn, query_id)?;
    let mut stmt = conn.prepare(&format!(
        "{} WHERE r.query_id = ?1 ORDER BY r.created_at DESC, r.id DESC",
        SELECT
    ))?;
    let responses = stmt
        .query_map(params![query_id], map_response)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(responses)
}

pub fn create(
    conn: &mut Connection,
    query_id: &str,
    content: &str,
    author: &CurrentUser,
) -> AppResult<Response> {
    let content = check_content(content)?;
    let id = db::immediate(conn, |tx| {
        queries::get(tx, query_id)?;
        let id = db::new_id();
        tx.execute(
            "INSERT INTO responses (id, query_id, author_id, content) VALUES (?1, ?2, ?3, ?4)",
            params![id, query_id, author.id, content],
        )?;
        recount(tx, query_id)?;
        Ok(id)
    })?;
    tracing::info!(response_id = %id, query_id = %query_id, author_id = %author.id, "Response created");
    get(conn, &id)
}

pub fn update(conn: &Connection, id: &str, content: &str, caller: &CurrentUser) -> AppResult<Response> {
    let current = get(conn, id)?;
    caller.require_owner_or_admin(&current.author_id, "edit this response")?;
    let content = check_content(content)?;
    conn.execute(
        "UPDATE responses SET content = ?2, updated_at = datetime('now') WHERE id = ?1",
        params![id, content],
    )?;
    get(conn, id)
}

pub fn delete(conn: &mut Connection, id: &str, caller: &CurrentUser) -> AppResult<()> {
    let query_id = db::immediate(conn, |tx| {
        let current = get(tx, id)?;
        caller.require_owner_or_admin(&current.author_id, "delete this response")?;

        votes::forget(tx, VoteTarget::Response, id)?;
        tx.execute("DELETE FROM responses WHERE id = ?1", params![id])?;
        if current.is_accepted {
            tx.execute(
                "UPDATE queries SET is_solved = 0, solved_at = NULL, solved_by = NULL,
                     status = CASE WHEN status = 'ANSWERED' THEN 'OPEN' ELSE status END
                 WHERE id = ?1",
                params![current.query_id],
            )?;
        }
        recount(tx, &current.query_id)?;
        Ok(current.query_id)
    })?;
    tracing::info!(response_id = %id, query_id = %query_id, by = %caller.id, "Response deleted");
    Ok(())
}

/// Mark a response as the accepted answer. Only the query author or an
/// admin may accept; any previously accepted response is cleared.
pub fn accept(
    conn: &mut Connection,
    query_id: &str,
    response_id: &str,
    caller: &CurrentUser,
) -> AppResult<queries::Query> {
    db::immediate(conn, |tx| {
        let query = queries::get(tx, query_id)?;
        caller.require_owner_or_admin(&query.author_id, "accept an answer for this query")?;
        let response = get(tx, response_id)?;
        if response.query_id != query_id {
            return Err(AppError::not_found("Response"));
        }

        tx.execute(
            "UPDATE responses SET is_accepted = (id = ?2) WHERE query_id = ?1",
            params![query_id, response_id],
        )?;
        tx.execute(
            "UPDATE queries SET is_solved = 1, status = 'ANSWERED', solved_at = datetime('now'),
                 solved_by = ?2, updated_at = datetime('now')
             WHERE id = ?1",
            params![query_id, response.author_id],
        )?;
        tracing::info!(query_id = %query_id, response_id = %response_id, "Answer accepted");
        queries::get(tx, query_id)
    })
}

pub fn vote(
    conn: &mut Connection,
    id: &str,
    vote: VoteType,
    voter: Option<&CurrentUser>,
    policy: VotePolicy,
) -> AppResult<Response> {
    db::immediate(conn, |tx| {
        votes::cast(tx, VoteTarget::Response, id, vote, voter, policy)?;
        get(tx, id)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{QueryStatus, UserRole};
    use crate::db::test_pool;
    use crate::discussion::queries::fixtures;
    use crate::users::fixtures as user_fixtures;

    fn caller(conn: &Connection, email: &str, role: UserRole) -> CurrentUser {
        let user = user_fixtures::user(conn, email, role);
        CurrentUser {
            id: user.id,
            email: user.email,
            role: user.role,
        }
    }

    #[test]
    fn response_count_tracks_creates_and_deletes() {
        let pool = test_pool();
        let mut conn = pool.get().unwrap();
        let author = caller(&conn, "ada@example.edu", UserRole::Student);
        let helper = caller(&conn, "bob@example.edu", UserRole::Student);
        let query = queries::create(&conn, &fixtures::input("Help"), &author).unwrap();

        let mut ids = Vec::new();
        for i in 0..4 {
            ids.push(create(&mut conn, &query.id, &format!("answer {}", i), &helper).unwrap().id);
        }
        assert_eq!(queries::get(&conn, &query.id).unwrap().response_count, 4);
        assert_eq!(list_for_query(&conn, &query.id).unwrap().len(), 4);

        delete(&mut conn, &ids[0], &helper).unwrap();
        assert_eq!(queries::get(&conn, &query.id).unwrap().response_count, 3);
    }

    #[test]
    fn responding_to_missing_query_is_not_found() {
        let pool = test_pool();
        let mut conn = pool.get().unwrap();
        let helper = caller(&conn, "bob@example.edu", UserRole::Student);
        assert!(matches!(
            create(&mut conn, "missing", "hello", &helper),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn blank_content_is_rejected() {
        let pool = test_pool();
        let mut conn = pool.get().unwrap();
        let author = caller(&conn, "ada@example.edu", UserRole::Student);
        let query = queries::create(&conn, &fixtures::input("Help"), &author).unwrap();
        assert!(matches!(
            create(&mut conn, &query.id, "   ", &author),
            Err(AppError::BadRequest(_))
        ));
        assert_eq!(queries::get(&conn, &query.id).unwrap().response_count, 0);
    }

    #[test]
    fn only_author_or_admin_edits_responses() {
        let pool = test_pool();
        let mut conn = pool.get().unwrap();
        let author = caller(&conn, "ada@example.edu", UserRole::Student);
        let helper = caller(&conn, "bob@example.edu", UserRole::Student);
        let admin = caller(&conn, "root@example.edu", UserRole::Admin);
        let query = queries::create(&conn, &fixtures::input("Help"), &author).unwrap();
        let response = create(&mut conn, &query.id, "try this", &helper).unwrap();

        assert!(matches!(
            update(&conn, &response.id, "hijack", &author),
            Err(AppError::Forbidden(_))
        ));
        assert_eq!(update(&conn, &response.id, "try that", &helper).unwrap().content, "try that");
        assert!(matches!(
            delete(&mut conn, &response.id, &author),
            Err(AppError::Forbidden(_))
        ));
        delete(&mut conn, &response.id, &admin).unwrap();
    }

    #[test]
    fn accepting_marks_query_solved() {
        let pool = test_pool();
        let mut conn = pool.get().unwrap();
        let author = caller(&conn, "ada@example.edu", UserRole::Student);
        let helper = caller(&conn, "bob@example.edu", UserRole::Student);
        let query = queries::create(&conn, &fixtures::input("Help"), &author).unwrap();
        let first = create(&mut conn, &query.id, "first", &helper).unwrap();
        let second = create(&mut conn, &query.id, "second", &helper).unwrap();

        assert!(matches!(
            accept(&mut conn, &query.id, &first.id, &helper),
            Err(AppError::Forbidden(_))
        ));

        accept(&mut conn, &query.id, &first.id, &author).unwrap();
        let solved = accept(&mut conn, &query.id, &second.id, &author).unwrap();
        assert!(solved.is_solved);
        assert_eq!(solved.status, QueryStatus::Answered);
        assert_eq!(solved.solved_by.as_deref(), Some(helper.id.as_str()));
        assert!(!get(&conn, &first.id).unwrap().is_accepted);
        assert!(get(&conn, &second.id).unwrap().is_accepted);

        // Removing the accepted answer reopens the query
        delete(&mut conn, &second.id, &helper).unwrap();
        let reopened = queries::get(&conn, &query.id).unwrap();
        assert!(!reopened.is_solved);
        assert_eq!(reopened.status, QueryStatus::Open);
    }

    #[test]
    fn accepting_a_response_of_another_query_fails() {
        let pool = test_pool();
        let mut conn = pool.get().unwrap();
        let author = caller(&conn, "ada@example.edu", UserRole::Student);
        let q1 = queries::create(&conn, &fixtures::input("One"), &author).unwrap();
        let q2 = queries::create(&conn, &fixtures::input("Two"), &author).unwrap();
        let response = create(&mut conn, &q2.id, "elsewhere", &author).unwrap();
        assert!(matches!(
            accept(&mut conn, &q1.id, &response.id, &author),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn responses_can_be_voted() {
        let pool = test_pool();
        let mut conn = pool.get().unwrap();
        let author = caller(&conn, "ada@example.edu", UserRole::Student);
        let query = queries::create(&conn, &fixtures::input("Help"), &author).unwrap();
        let response = create(&mut conn, &query.id, "answer", &author).unwrap();
        let voted =
            vote(&mut conn, &response.id, VoteType::Upvote, None, VotePolicy::Unrestricted).unwrap();
        assert_eq!(voted.upvotes, 1);
    }
}
