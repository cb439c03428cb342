use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::catalog::subjects;
use crate::db::models::DifficultyLevel;
use crate::db::{self, is_unique_violation};
use crate::error::{AppError, AppResult};
use crate::extractors::CurrentUser;
use crate::users;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: String,
    pub code: String,
    pub title: String,
    pub description: Option<String>,
    pub subject_id: String,
    pub subject_name: String,
    pub professor_id: Option<String>,
    pub professor_name: Option<String>,
    pub semester: Option<String>,
    pub year: Option<String>,
    pub credits: i64,
    pub max_students: i64,
    pub difficulty_level: Option<DifficultyLevel>,
    pub is_active: bool,
    pub enrolled_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCourse {
    pub code: String,
    pub title: String,
    pub description: Option<String>,
    /// Either an existing subject id or a subject name to find or create.
    pub subject_id: Option<String>,
    pub subject_name: Option<String>,
    pub professor_id: Option<String>,
    pub semester: Option<String>,
    pub year: Option<String>,
    pub credits: Option<i64>,
    pub max_students: Option<i64>,
    pub difficulty_level: Option<DifficultyLevel>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub professor_id: Option<String>,
    pub semester: Option<String>,
    pub year: Option<String>,
    pub credits: Option<i64>,
    pub max_students: Option<i64>,
    pub difficulty_level: Option<DifficultyLevel>,
    pub is_active: Option<bool>,
}

pub enum CourseFilter<'a> {
    All,
    Subject(&'a str),
    Professor(&'a str),
    Active,
    /// Active with at least one free seat.
    Available,
    Keyword(&'a str),
}

const SELECT: &str = "SELECT c.id, c.code, c.title, c.description, c.subject_id, s.name, c.professor_id,
        CASE WHEN p.id IS NULL THEN NULL ELSE p.first_name || ' ' || p.last_name END,
        c.semester, c.year, c.credits, c.max_students, c.difficulty_level, c.is_active,
        (SELECT COUNT(*) FROM enrollments e WHERE e.course_id = c.id AND e.is_active = 1),
        c.created_at, c.updated_at
     FROM courses c
     JOIN subjects s ON s.id = c.subject_id
     LEFT JOIN users p ON p.id = c.professor_id";

const DEFAULT_CREDITS: i64 = 3;
const DEFAULT_MAX_STUDENTS: i64 = 50;

fn map_course(row: &Row<'_>) -> rusqlite::Result<Course> {
    Ok(Course {
        id: row.get(0)?,
        code: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        subject_id: row.get(4)?,
        subject_name: row.get(5)?,
        professor_id: row.get(6)?,
        professor_name: row.get(7)?,
        semester: row.get(8)?,
        year: row.get(9)?,
        credits: row.get(10)?,
        max_students: row.get(11)?,
        difficulty_level: row.get(12)?,
        is_active: row.get(13)?,
        enrolled_count: row.get(14)?,
        created_at: row.get(15)?,
        updated_at: row.get(16)?,
    })
}

pub fn list(conn: &Connection, filter: CourseFilter<'_>) -> AppResult<Vec<Course>> {
    let (clause, args): (&str, Vec<Value>) = match filter {
        CourseFilter::All => ("1 = 1", vec![]),
        CourseFilter::Subject(id) => ("c.subject_id = ?1", vec![id.to_string().into()]),
        CourseFilter::Professor(id) => ("c.professor_id = ?1", vec![id.to_string().into()]),
        CourseFilter::Active => ("c.is_active = 1", vec![]),
        CourseFilter::Available => (
            "c.is_active = 1 AND (SELECT COUNT(*) FROM enrollments e
                 WHERE e.course_id = c.id AND e.is_active = 1) < c.max_students",
            vec![],
        ),
        CourseFilter::Keyword(k) => (
            "(c.title LIKE ?1 OR c.code LIKE ?1 OR c.description LIKE ?1)",
            vec![format!("%{}%", k.trim()).into()],
        ),
    };

    let mut stmt = conn.prepare(&format!(
        "{} WHERE {} ORDER BY c.created_at DESC, c.id DESC",
        SELECT, clause
    ))?;
    let courses = stmt
        .query_map(params_from_iter(args), map_course)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(courses)
}

pub fn get(conn: &Connection, id: &str) -> AppResult<Course> {
    conn.query_row(&format!("{} WHERE c.id = ?1", SELECT), params![id], map_course)
        .optional()?
        .ok_or_else(|| AppError::not_found("Course"))
}

fn check_professor(conn: &Connection, professor_id: &str) -> AppResult<()> {
    let professor = users::find_by_id(conn, professor_id)?
        .ok_or_else(|| AppError::BadRequest("Professor does not exist".into()))?;
    if !professor.role.can_teach() {
        return Err(AppError::BadRequest(
            "Professor must be a tutor or administrator".into(),
        ));
    }
    Ok(())
}

fn check_numbers(credits: Option<i64>, max_students: Option<i64>) -> AppResult<()> {
    if matches!(credits, Some(c) if c <= 0) {
        return Err(AppError::BadRequest("Credits must be positive".into()));
    }
    if matches!(max_students, Some(m) if m <= 0) {
        return Err(AppError::BadRequest("Max students must be positive".into()));
    }
    Ok(())
}

pub fn create(conn: &Connection, input: &NewCourse) -> AppResult<Course> {
    let code = input.code.trim();
    if code.is_empty() || code.chars().count() > 20 {
        return Err(AppError::BadRequest(
            "Course code is required and must be at most 20 characters".into(),
        ));
    }
    let title = input.title.trim();
    if title.is_empty() || title.chars().count() > 200 {
        return Err(AppError::BadRequest(
            "Course title is required and must be at most 200 characters".into(),
        ));
    }
    check_numbers(input.credits, input.max_students)?;

    let subject = match (input.subject_id.as_deref(), input.subject_name.as_deref()) {
        (Some(id), _) if !id.trim().is_empty() => subjects::get(conn, id.trim())?,
        (_, Some(name)) if !name.trim().is_empty() => subjects::find_or_create_by_name(conn, name)?,
        _ => {
            return Err(AppError::BadRequest(
                "A subject id or subject name is required".into(),
            ))
        }
    };
    if let Some(professor_id) = input.professor_id.as_deref() {
        check_professor(conn, professor_id)?;
    }

    let id = db::new_id();
    conn.execute(
        "INSERT INTO courses (id, code, title, description, subject_id, professor_id, semester, year,
             credits, max_students, difficulty_level)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            id,
            code,
            title,
            input.description,
            subject.id,
            input.professor_id,
            input.semester,
            input.year,
            input.credits.unwrap_or(DEFAULT_CREDITS),
            input.max_students.unwrap_or(DEFAULT_MAX_STUDENTS),
            input.difficulty_level,
        ],
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::Conflict(format!("Course code '{}' already exists", code))
        } else {
            e.into()
        }
    })?;

    tracing::info!(course_id = %id, code = %code, subject = %subject.name, "Course created");
    get(conn, &id)
}

/// Patch semantics: absent fields keep their stored value.
pub fn update(conn: &Connection, id: &str, change: &CourseUpdate) -> AppResult<Course> {
    let current = get(conn, id)?;
    check_numbers(change.credits, change.max_students)?;
    if let Some(title) = change.title.as_deref() {
        if title.trim().is_empty() || title.trim().chars().count() > 200 {
            return Err(AppError::BadRequest(
                "Course title must be between 1 and 200 characters".into(),
            ));
        }
    }
    if let Some(professor_id) = change.professor_id.as_deref() {
        check_professor(conn, professor_id)?;
    }

    conn.execute(
        "UPDATE courses SET title = ?2, description = ?3, professor_id = ?4, semester = ?5, year = ?6,
             credits = ?7, max_students = ?8, difficulty_level = ?9, is_active = ?10,
             updated_at = datetime('now')
         WHERE id = ?1",
        params![
            id,
            change.title.as_deref().map(str::trim).unwrap_or(current.title.as_str()),
            change.description.clone().or(current.description),
            change.professor_id.clone().or(current.professor_id),
            change.semester.clone().or(current.semester),
            change.year.clone().or(current.year),
            change.credits.unwrap_or(current.credits),
            change.max_students.unwrap_or(current.max_students),
            change.difficulty_level.or(current.difficulty_level),
            change.is_active.unwrap_or(current.is_active),
        ],
    )?;
    get(conn, id)
}

pub fn delete(conn: &Connection, id: &str) -> AppResult<()> {
    if conn.execute("DELETE FROM courses WHERE id = ?1", params![id])? == 0 {
        return Err(AppError::not_found("Course"));
    }
    tracing::info!(course_id = %id, "Course deleted");
    Ok(())
}

/// Admins manage every course; tutors manage the courses they teach.
pub fn ensure_can_manage(conn: &Connection, course_id: &str, caller: &CurrentUser) -> AppResult<Course> {
    let course = get(conn, course_id)?;
    if caller.is_admin() || course.professor_id.as_deref() == Some(caller.id.as_str()) {
        Ok(course)
    } else {
        Err(AppError::Forbidden(
            "Only administrators or the course professor can manage this course".into(),
        ))
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn course(conn: &Connection, code: &str, max_students: i64) -> Course {
        create(
            conn,
            &NewCourse {
                code: code.to_string(),
                title: format!("{} title", code),
                subject_name: Some("Computer Science".to_string()),
                max_students: Some(max_students),
                ..NewCourse::default()
            },
        )
        .unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::UserRole;
    use crate::db::test_pool;
    use crate::users::fixtures as user_fixtures;

    fn caller(id: &str, role: UserRole) -> CurrentUser {
        CurrentUser {
            id: id.to_string(),
            email: format!("{}@example.edu", id),
            role,
        }
    }

    #[test]
    fn create_applies_defaults_and_creates_subject() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        let course = fixtures::course(&conn, "CS101", 50);
        assert_eq!(course.credits, 3);
        assert_eq!(course.max_students, 50);
        assert!(course.is_active);
        assert_eq!(course.subject_name, "Computer Science");
        assert_eq!(course.enrolled_count, 0);

        let second = fixtures::course(&conn, "CS102", 10);
        assert_eq!(second.subject_id, course.subject_id);
    }

    #[test]
    fn duplicate_code_is_conflict() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        fixtures::course(&conn, "CS101", 50);
        let err = create(
            &conn,
            &NewCourse {
                code: "CS101".into(),
                title: "Again".into(),
                subject_name: Some("Computer Science".into()),
                ..NewCourse::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[test]
    fn subject_is_required() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        let err = create(
            &conn,
            &NewCourse {
                code: "X1".into(),
                title: "No subject".into(),
                ..NewCourse::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn professor_must_be_able_to_teach() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        let student = user_fixtures::user(&conn, "stu@example.edu", UserRole::Student);
        let tutor = user_fixtures::user(&conn, "tut@example.edu", UserRole::Tutor);
        let mut input = NewCourse {
            code: "CS200".into(),
            title: "Systems".into(),
            subject_name: Some("Computer Science".into()),
            professor_id: Some(student.id.clone()),
            ..NewCourse::default()
        };
        assert!(matches!(create(&conn, &input), Err(AppError::BadRequest(_))));

        input.professor_id = Some(tutor.id.clone());
        let course = create(&conn, &input).unwrap();
        assert_eq!(course.professor_name.as_deref(), Some("Test tut"));
        assert_eq!(
            list(&conn, CourseFilter::Professor(&tutor.id)).unwrap().len(),
            1
        );
    }

    #[test]
    fn update_patches_only_given_fields() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        let course = fixtures::course(&conn, "CS101", 50);
        let updated = update(
            &conn,
            &course.id,
            &CourseUpdate {
                max_students: Some(25),
                is_active: Some(false),
                ..CourseUpdate::default()
            },
        )
        .unwrap();
        assert_eq!(updated.title, course.title);
        assert_eq!(updated.max_students, 25);
        assert!(!updated.is_active);
        assert!(list(&conn, CourseFilter::Active).unwrap().is_empty());
    }

    #[test]
    fn available_excludes_full_courses() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        let full = fixtures::course(&conn, "FULL1", 1);
        let open = fixtures::course(&conn, "OPEN1", 5);
        let student = user_fixtures::user(&conn, "stu@example.edu", UserRole::Student);
        conn.execute(
            "INSERT INTO enrollments (id, user_id, course_id) VALUES ('e1', ?1, ?2)",
            params![student.id, full.id],
        )
        .unwrap();

        let available: Vec<String> = list(&conn, CourseFilter::Available)
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(available, vec![open.id]);
    }

    #[test]
    fn keyword_search_matches_title_and_code() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        fixtures::course(&conn, "CS101", 50);
        fixtures::course(&conn, "MA201", 50);
        assert_eq!(list(&conn, CourseFilter::Keyword("cs1")).unwrap().len(), 1);
        assert_eq!(list(&conn, CourseFilter::Keyword("title")).unwrap().len(), 2);
    }

    #[test]
    fn only_admin_or_professor_can_manage() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        let tutor = user_fixtures::user(&conn, "tut@example.edu", UserRole::Tutor);
        let course = create(
            &conn,
            &NewCourse {
                code: "CS300".into(),
                title: "Compilers".into(),
                subject_name: Some("Computer Science".into()),
                professor_id: Some(tutor.id.clone()),
                ..NewCourse::default()
            },
        )
        .unwrap();

        assert!(ensure_can_manage(&conn, &course.id, &caller(&tutor.id, UserRole::Tutor)).is_ok());
        assert!(ensure_can_manage(&conn, &course.id, &caller("root", UserRole::Admin)).is_ok());
        assert!(matches!(
            ensure_can_manage(&conn, &course.id, &caller("other", UserRole::Tutor)),
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            ensure_can_manage(&conn, "missing", &caller("root", UserRole::Admin)),
            Err(AppError::NotFound(_))
        ));
    }

    #[test]
    fn delete_removes_course() {
        let pool = test_pool();
        let conn = pool.get().unwrap();
        let course = fixtures::course(&conn, "CS101", 50);
        delete(&conn, &course.id).unwrap();
        assert!(matches!(delete(&conn, &course.id), Err(AppError::NotFound(_))));
    }
}
