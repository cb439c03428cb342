use std::time::Duration;

use rand::Rng;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::task::JoinHandle;

use crate::db;
use crate::error::AppResult;
use crate::state::DbPool;
use crate::users;

/// Outcome of presenting a verification token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    Verified,
    Unknown,
    AlreadyUsed,
    Expired,
}

/// Create a fresh verification token for a user, replacing any earlier one.
/// Returns the token.
pub fn issue_token(conn: &Connection, user_id: &str, hours: u64) -> AppResult<String> {
    let token = generate_token();
    conn.execute(
        "DELETE FROM email_verification_tokens WHERE user_id = ?1",
        params![user_id],
    )?;
    conn.execute(
        "INSERT INTO email_verification_tokens (id, token, user_id, expires_at)
         VALUES (?1, ?2, ?3, datetime('now', ?4))",
        params![db::new_id(), token, user_id, format!("+{} hours", hours)],
    )?;
    Ok(token)
}

/// Consume a token: marks it used and the owning user verified.
pub fn consume_token(conn: &mut Connection, token: &str) -> AppResult<Verification> {
    db::immediate(conn, |tx| {
        let row: Option<(String, String, bool, bool)> = tx
            .query_row(
                "SELECT id, user_id, is_used, expires_at <= datetime('now')
                 FROM email_verification_tokens WHERE token = ?1",
                params![token],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
            )
            .optional()?;

        let Some((id, user_id, is_used, expired)) = row else {
            return Ok(Verification::Unknown);
        };
        if is_used {
            return Ok(Verification::AlreadyUsed);
        }
        if expired {
            return Ok(Verification::Expired);
        }

        tx.execute(
            "UPDATE email_verification_tokens SET is_used = 1 WHERE id = ?1",
            params![id],
        )?;
        users::mark_verified(tx, &user_id)?;
        tracing::info!(user_id = %user_id, "Email verified");
        Ok(Verification::Verified)
    })
}

/// Delete every token whose expiry has passed. Returns how many were removed.
pub fn purge_expired(conn: &Connection) -> AppResult<usize> {
    let removed = conn.execute(
        "DELETE FROM email_verification_tokens WHERE expires_at <= datetime('now')",
        [],
    )?;
    Ok(removed)
}

/// Periodically purge expired verification tokens.
pub fn spawn_sweeper(pool: DbPool, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let pool = pool.clone();
            let result = tokio::task::spawn_blocking(move || {
                let conn = pool.get()?;
                purge_expired(&conn)
            })
            .await;

            match result {
                Ok(Ok(0)) => {}
                Ok(Ok(n)) => tracing::info!("Removed {} expired verification tokens", n),
                Ok(Err(e)) => tracing::warn!("Verification token sweep failed: {}", e),
                Err(e) => tracing::warn!("Verification token sweep panicked: {}", e),
            }
        }
    })
}

/// Generate a cryptographically random 32-byte hex token.
fn generate_token() -> String {
    let bytes: [u8; 32] = rand::thread_rng().gen();
    hex::encode(bytes)
}
