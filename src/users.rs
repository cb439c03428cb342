//! Identity store: user rows and the queries auth and admin need.

use rusqlite::{params, Connection, OptionalExtension};

use crate::db::models::{User, UserRole, USER_COLUMNS};
use crate::db::{self, is_unique_violation};
use crate::error::{AppError, AppResult};

pub struct NewUser<'a> {
    pub email: &'a str,
    pub password_hash: &'a str,
    pub first_name: &'a str,
    pub last_name: &'a str,
    pub role: UserRole,
    pub student_id: Option<&'a str>,
    pub department: Option<&'a str>,
    pub is_verified: bool,
}

pub fn find_by_id(conn: &Connection, id: &str) -> AppResult<Option<User>> {
    let user = conn
        .query_row(
            &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
            params![id],
            User::from_row,
        )
        .optional()?;
    Ok(user)
}

pub fn get(conn: &Connection, id: &str) -> AppResult<User> {
    find_by_id(conn, id)?.ok_or_else(|| AppError::not_found("User"))
}

pub fn find_by_email(conn: &Connection, email: &str) -> AppResult<Option<User>> {
    let user = conn
        .query_row(
            &format!("SELECT {} FROM users WHERE email = ?1", USER_COLUMNS),
            params![email.trim()],
            User::from_row,
        )
        .optional()?;
    Ok(user)
}

pub fn email_exists(conn: &Connection, email: &str) -> AppResult<bool> {
    let exists = conn.query_row(
        "SELECT COUNT(*) > 0 FROM users WHERE email = ?1",
        params![email.trim()],
        |row| row.get(0),
    )?;
    Ok(exists)
}

pub fn student_id_exists(conn: &Connection, student_id: &str) -> AppResult<bool> {
    let exists = conn.query_row(
        "SELECT COUNT(*) > 0 FROM users WHERE student_id = ?1",
        params![student_id.trim()],
        |row| row.get(0),
    )?;
    Ok(exists)
}

pub fn insert(conn: &Connection, user: &NewUser<'_>) -> AppResult<User> {
    let id = db::new_id();
    conn.execute(
        "INSERT INTO users (id, email, password_hash, first_name, last_name, role, student_id, department, is_verified)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            id,
            user.email.trim(),
            user.password_hash,
            user.first_name.trim(),
            user.last_name.trim(),
            user.role,
            user.student_id.map(str::trim),
            user.department.map(str::trim),
            user.is_verified,
        ],
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::Conflict("Email or student ID is already registered".into())
        } else {
            e.into()
        }
    })?;
    get(conn, &id)
}

pub fn delete(conn: &Connection, id: &str) -> AppResult<()> {
    conn.execute("DELETE FROM users WHERE id = ?1", params![id])?;
    Ok(())
}

pub fn mark_verified(conn: &Connection, id: &str) -> AppResult<()> {
    conn.execute(
        "UPDATE users SET is_verified = 1, updated_at = datetime('now') WHERE id = ?1",
        params![id],
    )?;
    Ok(())
}

pub fn touch_last_login(conn: &Connection, id: &str) -> AppResult<()> {
    conn.execute(
        "UPDATE users SET last_login = datetime('now') WHERE id = ?1",
        params![id],
    )?;
    Ok(())
}

pub fn set_active(conn: &Connection, id: &str, active: bool) -> AppResult<User> {
    let changed = conn.execute(
        "UPDATE users SET is_active = ?2, updated_at = datetime('now') WHERE id = ?1",
        params![id, active],
    )?;
    if changed == 0 {
        return Err(AppError::not_found("User"));
    }
    get(conn, id)
}

pub fn list(conn: &Connection) -> AppResult<Vec<User>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM users ORDER BY created_at DESC, id DESC",
        USER_COLUMNS
    ))?;
    let users = stmt
        .query_map([], User::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(users)
}

pub fn admin_exists(conn: &Connection) -> AppResult<bool> {
    let exists = conn.query_row(
        "SELECT COUNT(*) > 0 FROM users WHERE role = 'ADMIN'",
        [],
        |row| row.get(0),
    )?;
    Ok(exists)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// Insert a verified user with a throwaway password hash.
    pub fn user(conn: &Connection, email: &str, role: UserRole) -> User {
        insert(
            conn,
            &NewUser {
                email,
                password_hash: "$2b$04$invalidinvalidinvalidinvalidinvalidinvalidinvalidinva",
                first_name: "Test",
                last_name: email.split('@').next().unwrap_or("user"),
                role,
                student_id: None,
                department: Some("Computer Science"),
                is_verified: true,
            },
        )
        .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;

    #[test]
    fn insert_and_find() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        let user = fixtures::user(&conn, "ada@example.edu", UserRole::Student);

        let by_email = find_by_email(&conn, "ADA@example.edu").unwrap().unwrap();
        assert_eq!(by_email.id, user.id);
        assert!(by_email.is_active);
        assert!(email_exists(&conn, "ada@example.edu").unwrap());
        assert!(!email_exists(&conn, "bob@example.edu").unwrap());
    }

    #[test]
    fn duplicate_email_is_conflict() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        fixtures::user(&conn, "ada@example.edu", UserRole::Student);
        let err = insert(
            &conn,
            &NewUser {
                email: "ada@example.edu",
                password_hash: "x",
                first_name: "Ada",
                last_name: "Again",
                role: UserRole::Student,
                student_id: None,
                department: None,
                is_verified: false,
            },
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(list(&conn).unwrap().len(), 1);
    }

    #[test]
    fn set_active_toggles_and_reports_missing() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        let user = fixtures::user(&conn, "ada@example.edu", UserRole::Student);
        assert!(!set_active(&conn, &user.id, false).unwrap().is_active);
        assert!(set_active(&conn, &user.id, true).unwrap().is_active);
        assert!(matches!(
            set_active(&conn, "missing", true),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn admin_exists_checks_role() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        assert!(!admin_exists(&conn).unwrap());
        fixtures::user(&conn, "root@example.edu", UserRole::Admin);
        assert!(admin_exists(&conn).unwrap());
    }
}
