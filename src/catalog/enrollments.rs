use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::catalog::courses;
use crate::db;
use crate::error::{AppError, AppResult};
use crate::extractors::CurrentUser;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Enrollment {
    pub id: String,
    pub user_id: String,
    pub user_name: String,
    pub course_id: String,
    pub course_code: String,
    pub course_title: String,
    pub is_active: bool,
    pub grade: Option<String>,
    pub enrolled_at: String,
    pub completed_at: Option<String>,
}

const SELECT: &str = "SELECT e.id, e.user_id, u.first_name || ' ' || u.last_name, e.course_id,
        c.code, c.title, e.is_active, e.grade, e.enrolled_at, e.completed_at
     FROM enrollments e
     JOIN users u ON u.id = e.user_id
     JOIN courses c ON c.id = e.course_id";

fn map_enrollment(row: &Row<'_>) -> rusqlite::Result<Enrollment> {
    Ok(Enrollment {
        id: row.get(0)?,
        user_id: row.get(1)?,
        user_name: row.get(2)?,
        course_id: row.get(3)?,
        course_code: row.get(4)?,
        course_title: row.get(5)?,
        is_active: row.get(6)?,
        grade: row.get(7)?,
        enrolled_at: row.get(8)?,
        completed_at: row.get(9)?,
    })
}

fn get(conn: &Connection, id: &str) -> AppResult<Enrollment> {
    conn.query_row(&format!("{} WHERE e.id = ?1", SELECT), params![id], map_enrollment)
        .optional()?
        .ok_or_else(|| AppError::not_found("Enrollment"))
}

/// Enroll the caller. Seat counting and the insert share one write
/// transaction so concurrent enrollments cannot overfill a course.
pub fn enroll(conn: &mut Connection, course_id: &str, caller: &CurrentUser) -> AppResult<Enrollment> {
    let id = db::immediate(conn, |tx| {
        let (is_active, max_students): (bool, i64) = tx
            .query_row(
                "SELECT is_active, max_students FROM courses WHERE id = ?1",
                params![course_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?
            .ok_or_else(|| AppError::not_found("Course"))?;
        if !is_active {
            return Err(AppError::BadRequest("Course is not active".into()));
        }

        let existing: Option<(String, bool)> = tx
            .query_row(
                "SELECT id, is_active FROM enrollments WHERE user_id = ?1 AND course_id = ?2",
                params![caller.id, course_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        if let Some((_, true)) = existing {
            return Err(AppError::Conflict("Already enrolled in this course".into()));
        }

        let enrolled: i64 = tx.query_row(
            "SELECT COUNT(*) FROM enrollments WHERE course_id = ?1 AND is_active = 1",
            params![course_id],
            |r| r.get(0),
        )?;
        if enrolled >= max_students {
            return Err(AppError::Conflict("Course is full".into()));
        }

        match existing {
            Some((id, _)) => {
                tx.execute(
                    "UPDATE enrollments SET is_active = 1, enrolled_at = datetime('now'), completed_at = NULL
                     WHERE id = ?1",
                    params![id],
                )?;
                Ok(id)
            }
            None => {
                let id = db::new_id();
                tx.execute(
                    "INSERT INTO enrollments (id, user_id, course_id) VALUES (?1, ?2, ?3)",
                    params![id, caller.id, course_id],
                )?;
                Ok(id)
            }
        }
    })?;

    tracing::info!(user_id = %caller.id, course_id = %course_id, "Enrolled");
    get(conn, &id)
}

/// Drops the caller's active enrollment. The row is kept inactive and is
/// reactivated if the caller enrolls again.
pub fn unenroll(conn: &Connection, course_id: &str, caller: &CurrentUser) -> AppResult<()> {
    let removed = conn.execute(
        "UPDATE enrollments SET is_active = 0, completed_at = datetime('now')
         WHERE user_id = ?1 AND course_id = ?2 AND is_active = 1",
        params![caller.id, course_id],
    )?;
    if removed == 0 {
        return Err(AppError::not_found("Enrollment"));
    }
    tracing::info!(user_id = %caller.id, course_id = %course_id, "Unenrolled");
    Ok(())
}

pub fn for_course(conn: &Connection, course_id: &str, caller: &CurrentUser) -> AppResult<Vec<Enrollment>> {
    courses::ensure_can_manage(conn, course_id, caller)?;
    let mut stmt = conn.prepare(&format!(
        "{} WHERE e.course_id = ?1 AND e.is_active = 1 ORDER BY e.enrolled_at, e.id",
        SELECT
    ))?;
    let rows = stmt
        .query_map(params![course_id], map_enrollment)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn for_user(conn: &Connection, user_id: &str) -> AppResult<Vec<Enrollment>> {
    let mut stmt = conn.prepare(&format!(
        "{} WHERE e.user_id = ?1 AND e.is_active = 1 ORDER BY e.enrolled_at DESC, e.id DESC",
        SELECT
    ))?;
    let rows = stmt
        .query_map(params![user_id], map_enrollment)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::courses::fixtures;
    use crate::db::models::UserRole;
    use crate::db::test_pool;
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
    fn enroll_and_list() {
        let pool = test_pool();
        let mut conn = pool.get().unwrap();
        let course = fixtures::course(&conn, "CS101", 10);
        let student = caller(&conn, "stu@example.edu", UserRole::Student);

        let enrollment = enroll(&mut conn, &course.id, &student).unwrap();
        assert!(enrollment.is_active);
        assert_eq!(enrollment.course_code, "CS101");
        assert_eq!(for_user(&conn, &student.id).unwrap().len(), 1);
        assert_eq!(courses::get(&conn, &course.id).unwrap().enrolled_count, 1);
    }

    #[test]
    fn double_enrollment_is_conflict() {
        let pool = test_pool();
        let mut conn = pool.get().unwrap();
        let course = fixtures::course(&conn, "CS101", 10);
        let student = caller(&conn, "stu@example.edu", UserRole::Student);
        enroll(&mut conn, &course.id, &student).unwrap();
        assert!(matches!(
            enroll(&mut conn, &course.id, &student),
            Err(AppError::Conflict(_))
        ));
    }

    #[test]
    fn full_course_rejects_enrollment() {
        let pool = test_pool();
        let mut conn = pool.get().unwrap();
        let course = fixtures::course(&conn, "TINY1", 1);
        let first = caller(&conn, "a@example.edu", UserRole::Student);
        let second = caller(&conn, "b@example.edu", UserRole::Student);
        enroll(&mut conn, &course.id, &first).unwrap();
        assert!(matches!(
            enroll(&mut conn, &course.id, &second),
            Err(AppError::Conflict(_))
        ));
    }

    #[test]
    fn inactive_course_rejects_enrollment() {
        let pool = test_pool();
        let mut conn = pool.get().unwrap();
        let course = fixtures::course(&conn, "OLD1", 10);
        conn.execute("UPDATE courses SET is_active = 0", []).unwrap();
        let student = caller(&conn, "stu@example.edu", UserRole::Student);
        assert!(matches!(
            enroll(&mut conn, &course.id, &student),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn unenroll_frees_the_seat() {
        let pool = test_pool();
        let mut conn = pool.get().unwrap();
        let course = fixtures::course(&conn, "TINY1", 1);
        let first = caller(&conn, "a@example.edu", UserRole::Student);
        let second = caller(&conn, "b@example.edu", UserRole::Student);
        enroll(&mut conn, &course.id, &first).unwrap();
        unenroll(&conn, &course.id, &first).unwrap();
        enroll(&mut conn, &course.id, &second).unwrap();
        assert!(matches!(
            unenroll(&conn, &course.id, &first),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn re_enrolling_reactivates_the_dropped_row() {
        let pool = test_pool();
        let mut conn = pool.get().unwrap();
        let course = fixtures::course(&conn, "CS101", 10);
        let student = caller(&conn, "stu@example.edu", UserRole::Student);
        let first = enroll(&mut conn, &course.id, &student).unwrap();

        unenroll(&conn, &course.id, &student).unwrap();
        assert!(for_user(&conn, &student.id).unwrap().is_empty());
        assert_eq!(courses::get(&conn, &course.id).unwrap().enrolled_count, 0);

        let again = enroll(&mut conn, &course.id, &student).unwrap();
        assert_eq!(again.id, first.id);
        assert!(again.is_active);
        assert!(again.completed_at.is_none());
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM enrollments", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, 1);
        assert_eq!(courses::get(&conn, &course.id).unwrap().enrolled_count, 1);
    }

    #[test]
    fn course_roster_requires_manager() {
        let pool = test_pool();
        let mut conn = pool.get().unwrap();
        let course = fixtures::course(&conn, "CS101", 10);
        let student = caller(&conn, "stu@example.edu", UserRole::Student);
        let admin = caller(&conn, "root@example.edu", UserRole::Admin);
        enroll(&mut conn, &course.id, &student).unwrap();

        assert!(matches!(
            for_course(&conn, &course.id, &student),
            Err(AppError::Forbidden(_))
        ));
        let roster = for_course(&conn, &course.id, &admin).unwrap();
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].user_id, student.id);
    }
}
