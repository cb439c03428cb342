use rusqlite::{params, Connection, OptionalExtension};

use crate::db::{self, models::{VoteTarget, VoteType}};
use crate::error::{AppError, AppResult};
use crate::extractors::CurrentUser;

/// How votes are counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VotePolicy {
    /// Every call bumps a counter. Anyone may vote, repeatedly.
    Unrestricted,
    /// One recorded vote per user and target; casting the opposite vote switches it.
    OnePerUser,
}

impl VotePolicy {
    pub fn from_flag(one_vote_per_user: bool) -> Self {
        if one_vote_per_user {
            VotePolicy::OnePerUser
        } else {
            VotePolicy::Unrestricted
        }
    }
}

/// Counter changes `(upvotes, downvotes)` for a vote replacing `previous`.
pub fn counter_deltas(previous: Option<VoteType>, vote: VoteType) -> (i64, i64) {
    match (previous, vote) {
        (None, VoteType::Upvote) => (1, 0),
        (None, VoteType::Downvote) => (0, 1),
        (Some(VoteType::Downvote), VoteType::Upvote) => (1, -1),
        (Some(VoteType::Upvote), VoteType::Downvote) => (-1, 1),
        (Some(_), _) => (0, 0),
    }
}

fn table_for(target: VoteTarget) -> &'static str {
    match target {
        VoteTarget::Query => "queries",
        VoteTarget::Response => "responses",
    }
}

/// Apply a vote to a query or response. Must run inside the caller's write
/// transaction so the vote row and the counters move together.
pub fn cast(
    conn: &Connection,
    target: VoteTarget,
    target_id: &str,
    vote: VoteType,
    voter: Option<&CurrentUser>,
    policy: VotePolicy,
) -> AppResult<()> {
    let table = table_for(target);
    let exists: bool = conn.query_row(
        &format!("SELECT COUNT(*) > 0 FROM {} WHERE id = ?1", table),
        params![target_id],
        |r| r.get(0),
    )?;
    if !exists {
        return Err(AppError::not_found(match target {
            VoteTarget::Query => "Query",
            VoteTarget::Response => "Response",
        }));
    }

    let previous = match policy {
        VotePolicy::Unrestricted => None,
        VotePolicy::OnePerUser => {
            let voter = voter
                .ok_or_else(|| AppError::Unauthorized("Sign in to vote".into()))?;
            record(conn, voter, target, target_id, vote)?
        }
    };

    let (up, down) = counter_deltas(previous, vote);
    conn.execute(
        &format!(
            "UPDATE {} SET upvotes = upvotes + ?2, downvotes = downvotes + ?3,
                 updated_at = datetime('now')
             WHERE id = ?1",
            table
        ),
        params![target_id, up, down],
    )?;
    Ok(())
}

/// Write or switch the caller's vote row, returning the vote it replaced.
fn record(
    conn: &Connection,
    voter: &CurrentUser,
    target: VoteTarget,
    target_id: &str,
    vote: VoteType,
) -> AppResult<Option<VoteType>> {
    let existing: Option<(String, VoteType)> = conn
        .query_row(
            "SELECT id, vote_type FROM votes WHERE user_id = ?1 AND target_type = ?2 AND target_id = ?3",
            params![voter.id, target, target_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;

    match existing {
        Some((_, previous)) if previous == vote => Err(AppError::Conflict(format!(
            "You have already cast a {} on this {}",
            match vote {
                VoteType::Upvote => "upvote",
                VoteType::Downvote => "downvote",
            },
            match target {
                VoteTarget::Query => "query",
                VoteTarget::Response => "response",
            }
        ))),
        Some((id, previous)) => {
            conn.execute(
                "UPDATE votes SET vote_type = ?2, created_at = datetime('now') WHERE id = ?1",
                params![id, vote],
            )?;
            Ok(Some(previous))
        }
        None => {
            conn.execute(
                "INSERT INTO votes (id, user_id, target_type, target_id, vote_type)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![db::new_id(), voter.id, target, target_id, vote],
            )?;
            Ok(None)
        }
    }
}

/// Drop vote rows for targets that are about to be deleted.
pub fn forget(conn: &Connection, target: VoteTarget, target_id: &str) -> AppResult<()> {
    conn.execute(
        "DELETE FROM votes WHERE target_type = ?1 AND target_id = ?2",
        params![target, target_id],
    )?;
    Ok(())
}
