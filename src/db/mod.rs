pub mod models;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::ffi::{SQLITE_CONSTRAINT_PRIMARYKEY, SQLITE_CONSTRAINT_UNIQUE};
use rusqlite::{params, Connection, Transaction, TransactionBehavior};
use std::path::Path;
use std::time::Duration;

use crate::error::AppResult;
use crate::state::DbPool;

const MIGRATIONS: &[(&str, &str)] = &[
    (
        "001_identity",
        include_str!("../../migrations/001_identity.sql"),
    ),
    (
        "002_catalog",
        include_str!("../../migrations/002_catalog.sql"),
    ),
    (
        "003_discussion",
        include_str!("../../migrations/003_discussion.sql"),
    ),
    (
        "004_projects",
        include_str!("../../migrations/004_projects.sql"),
    ),
];

/// Per-connection settings. `foreign_keys` is connection scoped in SQLite,
/// so it has to be applied to every pooled connection.
fn init_connection(conn: &mut Connection) -> rusqlite::Result<()> {
    conn.busy_timeout(Duration::from_millis(5000))?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")
}

pub fn create_pool(db_path: &Path) -> anyhow::Result<DbPool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let manager = SqliteConnectionManager::file(db_path).with_init(init_connection);
    let pool = Pool::builder().max_size(8).build(manager)?;

    // Journal mode is persistent, so setting it once is enough
    let conn = pool.get()?;
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        ",
    )?;

    Ok(pool)
}

pub fn run_migrations(pool: &DbPool) -> anyhow::Result<()> {
    let conn = pool.get()?;

    // Create migrations tracking table
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            name TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    for (name, sql) in MIGRATIONS {
        let already_applied: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM schema_version WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )?;

        if !already_applied {
            tracing::info!("Applying migration: {}", name);
            conn.execute_batch(sql)?;
            conn.execute(
                "INSERT INTO schema_version (name) VALUES (?1)",
                params![name],
            )?;
        }
    }

    tracing::info!("Database migrations complete");
    Ok(())
}

/// Run `f` inside a `BEGIN IMMEDIATE` transaction, committing on success.
///
/// The write lock is taken up front, so read-check-write sequences run
/// serialized against other writers. Dropping without a commit rolls back.
pub fn immediate<T, F>(conn: &mut Connection, f: F) -> AppResult<T>
where
    F: FnOnce(&Transaction<'_>) -> AppResult<T>,
{
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let value = f(&tx)?;
    tx.commit()?;
    Ok(value)
}

/// True only for UNIQUE and PRIMARY KEY failures; other constraint kinds
/// (foreign key, NOT NULL, CHECK) are not duplicates.
pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == SQLITE_CONSTRAINT_UNIQUE
                || e.extended_code == SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

pub fn new_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

#[cfg(test)]
pub(crate) fn test_pool() -> DbPool {
    let manager = SqliteConnectionManager::memory().with_init(init_connection);
    let pool = Pool::builder().max_size(1).build(manager).unwrap();
    run_migrations(&pool).unwrap();
    pool
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    #[test]
    fn create_pool_creates_db_file() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("sub/dir/test.db");
        let pool = create_pool(&db_path).unwrap();
        assert!(db_path.exists());
        // Verify we can get a connection
        let conn = pool.get().unwrap();
        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode, "wal");
    }

    #[test]
    fn every_pooled_connection_enforces_foreign_keys() {
        let tmp = tempfile::tempdir().unwrap();
        let pool = create_pool(&tmp.path().join("fk.db")).unwrap();
        let first = pool.get().unwrap();
        let second = pool.get().unwrap();
        for conn in [&first, &second] {
            let on: i64 = conn
                .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
                .unwrap();
            assert_eq!(on, 1);
        }
    }

    #[test]
    fn only_duplicate_keys_count_as_unique_violations() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        let insert_user = |id: &str, email: &str| {
            conn.execute(
                "INSERT INTO users (id, email, password_hash, first_name, last_name)
                 VALUES (?1, ?2, 'x', 'A', 'B')",
                params![id, email],
            )
        };
        insert_user("u1", "ada@example.edu").unwrap();

        let duplicate_email = insert_user("u2", "ADA@example.edu").unwrap_err();
        assert!(is_unique_violation(&duplicate_email));
        let duplicate_id = insert_user("u1", "bob@example.edu").unwrap_err();
        assert!(is_unique_violation(&duplicate_id));

        let dangling = conn
            .execute(
                "INSERT INTO email_verification_tokens (id, token, user_id, expires_at)
                 VALUES ('t1', 'tok', 'nobody', datetime('now'))",
                [],
            )
            .unwrap_err();
        assert!(!is_unique_violation(&dangling));

        let bad_role = conn
            .execute(
                "INSERT INTO users (id, email, password_hash, first_name, last_name, role)
                 VALUES ('u3', 'eve@example.edu', 'x', 'E', 'V', 'WIZARD')",
                [],
            )
            .unwrap_err();
        assert!(!is_unique_violation(&bad_role));

        let missing_name = conn
            .execute(
                "INSERT INTO users (id, email, password_hash, last_name)
                 VALUES ('u4', 'max@example.edu', 'x', 'M')",
                [],
            )
            .unwrap_err();
        assert!(!is_unique_violation(&missing_name));
    }

    #[test]
    fn migrations_run_successfully() {
        let pool = test_pool();
        let conn = pool.get().unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as i64);

        let tables: Vec<String> = {
            let mut stmt = conn
                .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
                .unwrap();
            stmt.query_map([], |row| row.get(0))
                .unwrap()
                .filter_map(|r| r.ok())
                .collect()
        };
        for table in [
            "users",
            "email_verification_tokens",
            "subjects",
            "courses",
            "course_materials",
            "enrollments",
            "queries",
            "responses",
            "votes",
            "projects",
            "project_members",
            "project_join_requests",
        ] {
            assert!(tables.contains(&table.to_string()), "missing table {table}");
        }
    }

    #[test]
    fn migrations_are_idempotent() {
        let pool = test_pool();
        run_migrations(&pool).unwrap(); // Should not error on second run

        let conn = pool.get().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as i64);
    }

    #[test]
    fn foreign_keys_enforced() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        let result = conn.execute(
            "INSERT INTO responses (id, query_id, author_id, content) VALUES (?1, ?2, ?3, ?4)",
            params!["r-1", "missing-query", "missing-user", "hello"],
        );
        assert!(result.is_err());
    }

    #[test]
    fn duplicate_email_is_a_unique_violation() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        let insert = "INSERT INTO users (id, email, password_hash, first_name, last_name)
                      VALUES (?1, ?2, 'x', 'Ada', 'Lovelace')";
        conn.execute(insert, params!["u1", "ada@example.edu"]).unwrap();
        // Email comparison is case-insensitive
        let err = conn
            .execute(insert, params!["u2", "ADA@example.edu"])
            .unwrap_err();
        assert!(is_unique_violation(&err));
    }

    #[test]
    fn immediate_rolls_back_on_error() {
        let pool = test_pool();
        let mut conn = pool.get().unwrap();
        let result: AppResult<()> = immediate(&mut conn, |tx| {
            tx.execute(
                "INSERT INTO subjects (id, code, name) VALUES ('s1', 'MATH', 'Math')",
                [],
            )?;
            Err(AppError::Conflict("abort".into()))
        });
        assert!(result.is_err());

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM subjects", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn new_ids_are_unique() {
        assert_ne!(new_id(), new_id());
    }
}
