// Repository - all project persistence goes through here
use async_trait::async_trait;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::sync::Arc;

use crate::db::models::{decode_set, encode_set, JoinRequestStatus, MemberRole, ProjectStatus};
use crate::db::{self, is_unique_violation};
use crate::extractors::CurrentUser;
use crate::projects::domain::*;
use crate::state::DbPool;

/// Project listing filters.
#[derive(Debug, Clone)]
pub enum ProjectFilter {
    All,
    Leader(String),
    Course(String),
    Status(ProjectStatus),
    Category(String),
    Skill(String),
    /// Deadline strictly before the given instant (any accepted deadline format).
    DeadlineBefore(String),
    /// Recruiting projects with an open slot.
    Available,
    Keyword(String),
}

#[async_trait]
pub trait ProjectRepository: Send + Sync {
    /// Create a project; the caller becomes its leader and first member.
    async fn create(&self, input: &NewProject, leader: &CurrentUser) -> Result<Project, ProjectError>;

    async fn get(&self, id: &str) -> Result<Project, ProjectError>;

    async fn list(&self, filter: ProjectFilter) -> Result<Vec<Project>, ProjectError>;

    async fn update(
        &self,
        id: &str,
        change: &ProjectUpdate,
        caller: &CurrentUser,
    ) -> Result<Project, ProjectError>;

    async fn delete(&self, id: &str, caller: &CurrentUser) -> Result<(), ProjectError>;

    async fn request_to_join(
        &self,
        project_id: &str,
        message: Option<&str>,
        caller: &CurrentUser,
    ) -> Result<JoinRequest, ProjectError>;

    async fn respond_to_join_request(
        &self,
        request_id: &str,
        decision: JoinDecision,
        response_message: Option<&str>,
        caller: &CurrentUser,
    ) -> Result<JoinRequest, ProjectError>;

    async fn cancel_join_request(&self, request_id: &str, caller: &CurrentUser) -> Result<(), ProjectError>;

    /// Pending requests for one project. Leader or admin only.
    async fn pending_requests(
        &self,
        project_id: &str,
        caller: &CurrentUser,
    ) -> Result<Vec<JoinRequest>, ProjectError>;

    /// Every request on projects the caller leads, newest first.
    async fn requests_for_leader(&self, caller: &CurrentUser) -> Result<Vec<JoinRequest>, ProjectError>;

    /// Requests the caller has sent.
    async fn requests_for_user(&self, caller: &CurrentUser) -> Result<Vec<JoinRequest>, ProjectError>;

    async fn user_status(
        &self,
        project_id: &str,
        caller: &CurrentUser,
    ) -> Result<UserProjectStatus, ProjectError>;

    async fn members(&self, project_id: &str) -> Result<Vec<ProjectMember>, ProjectError>;

    /// The leader removes a member or a member leaves.
    async fn remove_member(
        &self,
        project_id: &str,
        user_id: &str,
        caller: &CurrentUser,
    ) -> Result<(), ProjectError>;
}

pub type DynProjectRepository = Arc<dyn ProjectRepository>;

pub struct SqliteProjectRepository {
    pool: DbPool,
}

impl SqliteProjectRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Run `f` under `BEGIN IMMEDIATE`; dropping the transaction on error rolls back.
    fn write<T, F>(&self, f: F) -> Result<T, ProjectError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, ProjectError>,
    {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

const PROJECT_SELECT: &str = "SELECT p.id, p.title, p.description, p.category, p.leader_id,
        u.first_name || ' ' || u.last_name, p.course_id, c.title, p.status, p.max_members,
        p.current_members, p.progress, p.deadline, p.skills_required, p.created_at, p.updated_at
     FROM projects p
     JOIN users u ON u.id = p.leader_id
     LEFT JOIN courses c ON c.id = p.course_id";

const REQUEST_SELECT: &str = "SELECT r.id, r.project_id, p.title, r.user_id,
        u.first_name || ' ' || u.last_name, u.email, r.status, r.message, r.response_message,
        r.responded_at, r.responded_by, r.created_at, r.updated_at
     FROM project_join_requests r
     JOIN projects p ON p.id = r.project_id
     JOIN users u ON u.id = r.user_id";

const MEMBER_SELECT: &str = "SELECT m.id, m.project_id, m.user_id,
        u.first_name || ' ' || u.last_name, u.email, m.role, m.joined_at
     FROM project_members m
     JOIN users u ON u.id = m.user_id";

fn map_project(row: &Row<'_>) -> rusqlite::Result<Project> {
    let skills: String = row.get(13)?;
    Ok(Project {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        category: row.get(3)?,
        leader_id: row.get(4)?,
        leader_name: row.get(5)?,
        course_id: row.get(6)?,
        course_title: row.get(7)?,
        status: row.get(8)?,
        max_members: row.get(9)?,
        current_members: row.get(10)?,
        progress: row.get(11)?,
        deadline: row.get(12)?,
        skills_required: decode_set(&skills),
        created_at: row.get(14)?,
        updated_at: row.get(15)?,
    })
}

fn map_request(row: &Row<'_>) -> rusqlite::Result<JoinRequest> {
    Ok(JoinRequest {
        id: row.get(0)?,
        project_id: row.get(1)?,
        project_title: row.get(2)?,
        user_id: row.get(3)?,
        user_name: row.get(4)?,
        user_email: row.get(5)?,
        status: row.get(6)?,
        message: row.get(7)?,
        response_message: row.get(8)?,
        responded_at: row.get(9)?,
        responded_by: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

fn map_member(row: &Row<'_>) -> rusqlite::Result<ProjectMember> {
    Ok(ProjectMember {
        id: row.get(0)?,
        project_id: row.get(1)?,
        user_id: row.get(2)?,
        user_name: row.get(3)?,
        user_email: row.get(4)?,
        role: row.get(5)?,
        joined_at: row.get(6)?,
    })
}

fn load_project(conn: &Connection, id: &str) -> Result<Project, ProjectError> {
    conn.query_row(&format!("{} WHERE p.id = ?1", PROJECT_SELECT), params![id], map_project)
        .optional()?
        .ok_or(ProjectError::NotFound("Project"))
}

fn load_request(conn: &Connection, id: &str) -> Result<JoinRequest, ProjectError> {
    conn.query_row(&format!("{} WHERE r.id = ?1", REQUEST_SELECT), params![id], map_request)
        .optional()?
        .ok_or(ProjectError::NotFound("Join request"))
}

fn query_requests(conn: &Connection, clause: &str, arg: &str) -> Result<Vec<JoinRequest>, ProjectError> {
    let mut stmt = conn.prepare(&format!(
        "{} WHERE {} ORDER BY r.created_at DESC, r.id DESC",
        REQUEST_SELECT, clause
    ))?;
    let requests = stmt
        .query_map(params![arg], map_request)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(requests)
}

fn is_member(conn: &Connection, project_id: &str, user_id: &str) -> Result<bool, ProjectError> {
    let member: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM project_members WHERE project_id = ?1 AND user_id = ?2",
        params![project_id, user_id],
        |r| r.get(0),
    )?;
    Ok(member)
}

/// Keep `current_members` equal to the membership row count.
fn recount_members(conn: &Connection, project_id: &str) -> Result<i64, ProjectError> {
    conn.execute(
        "UPDATE projects SET current_members =
             (SELECT COUNT(*) FROM project_members WHERE project_id = ?1),
             updated_at = datetime('now')
         WHERE id = ?1",
        params![project_id],
    )?;
    let count = conn.query_row(
        "SELECT current_members FROM projects WHERE id = ?1",
        params![project_id],
        |r| r.get(0),
    )?;
    Ok(count)
}

fn check_course(conn: &Connection, course_id: Option<&str>) -> Result<(), ProjectError> {
    if let Some(course_id) = course_id {
        let exists: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM courses WHERE id = ?1",
            params![course_id],
            |r| r.get(0),
        )?;
        if !exists {
            return Err(ProjectError::Validation("Course does not exist".into()));
        }
    }
    Ok(())
}

fn require_leader_or_admin(project: &Project, caller: &CurrentUser, action: &str) -> Result<(), ProjectError> {
    if project.leader_id == caller.id || caller.is_admin() {
        Ok(())
    } else {
        Err(ProjectError::Forbidden(format!(
            "Only the project leader can {}",
            action
        )))
    }
}

fn filter_clause(filter: &ProjectFilter) -> Result<(String, Vec<Value>), ProjectError> {
    let (clause, args): (&str, Vec<Value>) = match filter {
        ProjectFilter::All => ("1 = 1", vec![]),
        ProjectFilter::Leader(id) => ("p.leader_id = ?1", vec![id.clone().into()]),
        ProjectFilter::Course(id) => ("p.course_id = ?1", vec![id.clone().into()]),
        ProjectFilter::Status(status) => ("p.status = ?1", vec![status.as_str().to_string().into()]),
        ProjectFilter::Category(category) => (
            "p.category = ?1 COLLATE NOCASE",
            vec![category.trim().to_string().into()],
        ),
        ProjectFilter::Skill(skill) => (
            "EXISTS (SELECT 1 FROM json_each(p.skills_required) s WHERE s.value = ?1 COLLATE NOCASE)",
            vec![skill.trim().to_string().into()],
        ),
        ProjectFilter::DeadlineBefore(raw) => (
            "p.deadline IS NOT NULL AND p.deadline < ?1",
            vec![parse_deadline(raw)?.into()],
        ),
        ProjectFilter::Available => (
            "p.status = 'RECRUITING' AND p.current_members < p.max_members",
            vec![],
        ),
        ProjectFilter::Keyword(term) => (
            "(p.title LIKE ?1 OR p.description LIKE ?1)",
            vec![format!("%{}%", term.trim()).into()],
        ),
    };
    Ok((clause.to_string(), args))
}

#[async_trait]
impl ProjectRepository for SqliteProjectRepository {
    async fn create(&self, input: &NewProject, leader: &CurrentUser) -> Result<Project, ProjectError> {
        input.validate()?;
        let deadline = input.deadline.as_deref().map(parse_deadline).transpose()?;

        let project = self.write(|tx| {
            check_course(tx, input.course_id.as_deref())?;
            let id = db::new_id();
            tx.execute(
                "INSERT INTO projects (id, title, description, category, leader_id, course_id,
                     status, max_members, current_members, progress, deadline, skills_required)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, 0, ?9, ?10)",
                params![
                    id,
                    input.title.trim(),
                    input.description.trim(),
                    input.category.trim(),
                    leader.id,
                    input.course_id,
                    ProjectStatus::Recruiting,
                    input.max_members,
                    deadline,
                    encode_set(&input.skills_required),
                ],
            )?;
            tx.execute(
                "INSERT INTO project_members (id, project_id, user_id, role) VALUES (?1, ?2, ?3, ?4)",
                params![db::new_id(), id, leader.id, MemberRole::Leader],
            )?;
            recount_members(tx, &id)?;
            load_project(tx, &id)
        })?;

        tracing::info!(project_id = %project.id, leader_id = %leader.id, "Project created");
        Ok(project)
    }

    async fn get(&self, id: &str) -> Result<Project, ProjectError> {
        let conn = self.pool.get()?;
        load_project(&conn, id)
    }

    async fn list(&self, filter: ProjectFilter) -> Result<Vec<Project>, ProjectError> {
        let (clause, args) = filter_clause(&filter)?;
        let order = match filter {
            ProjectFilter::DeadlineBefore(_) => "ORDER BY p.deadline ASC",
            _ => "ORDER BY p.created_at DESC, p.id DESC",
        };

        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!("{} WHERE {} {}", PROJECT_SELECT, clause, order))?;
        let projects = stmt
            .query_map(params_from_iter(args), map_project)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(projects)
    }

    async fn update(
        &self,
        id: &str,
        change: &ProjectUpdate,
        caller: &CurrentUser,
    ) -> Result<Project, ProjectError> {
        change.validate()?;
        let deadline = match &change.deadline {
            Some(Some(raw)) => Some(Some(parse_deadline(raw)?)),
            Some(None) => Some(None),
            None => None,
        };

        self.write(|tx| {
            let current = load_project(tx, id)?;
            require_leader_or_admin(&current, caller, "update this project")?;
            change.check_capacity(current.current_members)?;
            check_course(tx, change.course_id.as_ref().and_then(|c| c.as_deref()))?;

            let skills = match &change.skills_required {
                Some(skills) => encode_set(skills),
                None => encode_set(&current.skills_required),
            };
            tx.execute(
                "UPDATE projects SET title = ?2, description = ?3, category = ?4, course_id = ?5,
                     status = ?6, max_members = ?7, progress = ?8, deadline = ?9,
                     skills_required = ?10, updated_at = datetime('now')
                 WHERE id = ?1",
                params![
                    id,
                    change.title.as_deref().map(str::trim).unwrap_or(current.title.as_str()),
                    change
                        .description
                        .as_deref()
                        .map(str::trim)
                        .unwrap_or(current.description.as_str()),
                    change.category.as_deref().map(str::trim).unwrap_or(current.category.as_str()),
                    match &change.course_id {
                        Some(course_id) => course_id.as_deref(),
                        None => current.course_id.as_deref(),
                    },
                    change.status.unwrap_or(current.status),
                    change.max_members.unwrap_or(current.max_members),
                    change.progress.unwrap_or(current.progress),
                    match &deadline {
                        Some(deadline) => deadline.as_deref(),
                        None => current.deadline.as_deref(),
                    },
                    skills,
                ],
            )?;
            tracing::info!(project_id = %id, by = %caller.id, "Project updated");
            load_project(tx, id)
        })
    }

    async fn delete(&self, id: &str, caller: &CurrentUser) -> Result<(), ProjectError> {
        self.write(|tx| {
            let project = load_project(tx, id)?;
            require_leader_or_admin(&project, caller, "delete this project")?;
            tx.execute("DELETE FROM projects WHERE id = ?1", params![id])?;
            Ok(())
        })?;
        tracing::info!(project_id = %id, by = %caller.id, "Project deleted");
        Ok(())
    }

    async fn request_to_join(
        &self,
        project_id: &str,
        message: Option<&str>,
        caller: &CurrentUser,
    ) -> Result<JoinRequest, ProjectError> {
        let message = check_message(message)?;

        let request = self.write(|tx| {
            let project = load_project(tx, project_id)?;
            if project.leader_id == caller.id {
                return Err(ProjectError::LeaderCannotJoin);
            }
            if is_member(tx, project_id, &caller.id)? {
                return Err(ProjectError::AlreadyMember);
            }

            let existing: Option<(String, JoinRequestStatus)> = tx
                .query_row(
                    "SELECT id, status FROM project_join_requests WHERE project_id = ?1 AND user_id = ?2",
                    params![project_id, caller.id],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )
                .optional()?;
            match existing {
                Some((_, JoinRequestStatus::Pending)) => return Err(ProjectError::AlreadyRequested),
                // A settled request is replaced by a fresh one
                Some((old_id, _)) => {
                    tx.execute("DELETE FROM project_join_requests WHERE id = ?1", params![old_id])?;
                }
                None => {}
            }

            project.ensure_recruiting()?;
            project.capacity().ensure_open()?;

            let id = db::new_id();
            tx.execute(
                "INSERT INTO project_join_requests (id, project_id, user_id, status, message)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, project_id, caller.id, JoinRequestStatus::Pending, message],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    ProjectError::AlreadyRequested
                } else {
                    e.into()
                }
            })?;
            load_request(tx, &id)
        })?;

        tracing::info!(
            request_id = %request.id,
            project_id = %project_id,
            user_id = %caller.id,
            "Join request created"
        );
        Ok(request)
    }

    async fn respond_to_join_request(
        &self,
        request_id: &str,
        decision: JoinDecision,
        response_message: Option<&str>,
        caller: &CurrentUser,
    ) -> Result<JoinRequest, ProjectError> {
        let response_message = check_message(response_message)?;

        let request = self.write(|tx| {
            let request = load_request(tx, request_id)?;
            let project = load_project(tx, &request.project_id)?;
            if project.leader_id != caller.id {
                return Err(ProjectError::Forbidden(
                    "Only the project leader can respond to join requests".into(),
                ));
            }

            let next = request.status.respond(decision)?;
            if next == JoinRequestStatus::Approved {
                project.capacity().ensure_open()?;
                tx.execute(
                    "INSERT INTO project_members (id, project_id, user_id, role) VALUES (?1, ?2, ?3, ?4)",
                    params![db::new_id(), project.id, request.user_id, MemberRole::Member],
                )
                .map_err(|e| {
                    if is_unique_violation(&e) {
                        ProjectError::AlreadyMember
                    } else {
                        e.into()
                    }
                })?;
                recount_members(tx, &project.id)?;
            }

            tx.execute(
                "UPDATE project_join_requests SET status = ?2, response_message = ?3,
                     responded_at = datetime('now'), responded_by = ?4, updated_at = datetime('now')
                 WHERE id = ?1",
                params![request_id, next, response_message, caller.id],
            )?;
            load_request(tx, request_id)
        })?;

        tracing::info!(
            request_id = %request_id,
            project_id = %request.project_id,
            status = %request.status,
            "Join request answered"
        );
        Ok(request)
    }

    async fn cancel_join_request(&self, request_id: &str, caller: &CurrentUser) -> Result<(), ProjectError> {
        self.write(|tx| {
            let request = load_request(tx, request_id)?;
            if request.user_id != caller.id {
                return Err(ProjectError::Forbidden(
                    "You can only cancel your own join requests".into(),
                ));
            }
            if !request.status.can_cancel() {
                return Err(ProjectError::InvalidTransition(format!(
                    "Cannot cancel {} request",
                    request.status.as_str().to_ascii_lowercase()
                )));
            }
            tx.execute("DELETE FROM project_join_requests WHERE id = ?1", params![request_id])?;
            Ok(())
        })?;
        tracing::info!(request_id = %request_id, user_id = %caller.id, "Join request cancelled");
        Ok(())
    }

    async fn pending_requests(
        &self,
        project_id: &str,
        caller: &CurrentUser,
    ) -> Result<Vec<JoinRequest>, ProjectError> {
        let conn = self.pool.get()?;
        let project = load_project(&conn, project_id)?;
        require_leader_or_admin(&project, caller, "view join requests")?;
        query_requests(&conn, "r.project_id = ?1 AND r.status = 'PENDING'", project_id)
    }

    async fn requests_for_leader(&self, caller: &CurrentUser) -> Result<Vec<JoinRequest>, ProjectError> {
        let conn = self.pool.get()?;
        query_requests(&conn, "p.leader_id = ?1", &caller.id)
    }

    async fn requests_for_user(&self, caller: &CurrentUser) -> Result<Vec<JoinRequest>, ProjectError> {
        let conn = self.pool.get()?;
        query_requests(&conn, "r.user_id = ?1", &caller.id)
    }

    async fn user_status(
        &self,
        project_id: &str,
        caller: &CurrentUser,
    ) -> Result<UserProjectStatus, ProjectError> {
        let conn = self.pool.get()?;
        let project = load_project(&conn, project_id)?;
        let member = is_member(&conn, project_id, &caller.id)?;
        let request: Option<JoinRequestStatus> = conn
            .query_row(
                "SELECT status FROM project_join_requests WHERE project_id = ?1 AND user_id = ?2",
                params![project_id, caller.id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(resolve_user_status(project.leader_id == caller.id, member, request))
    }

    async fn members(&self, project_id: &str) -> Result<Vec<ProjectMember>, ProjectError> {
        let conn = self.pool.get()?;
        load_project(&conn, project_id)?;
        let mut stmt = conn.prepare(&format!(
            "{} WHERE m.project_id = ?1
             ORDER BY CASE m.role WHEN 'LEADER' THEN 0 ELSE 1 END, m.joined_at, m.id",
            MEMBER_SELECT
        ))?;
        let members = stmt
            .query_map(params![project_id], map_member)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(members)
    }

    async fn remove_member(
        &self,
        project_id: &str,
        user_id: &str,
        caller: &CurrentUser,
    ) -> Result<(), ProjectError> {
        let remaining = self.write(|tx| {
            let project = load_project(tx, project_id)?;
            if project.leader_id == user_id {
                return Err(ProjectError::Validation(
                    "The project leader cannot be removed".into(),
                ));
            }
            if caller.id != user_id {
                require_leader_or_admin(&project, caller, "remove members")?;
            }
            let removed = tx.execute(
                "DELETE FROM project_members WHERE project_id = ?1 AND user_id = ?2",
                params![project_id, user_id],
            )?;
            if removed == 0 {
                return Err(ProjectError::NotFound("Member"));
            }
            recount_members(tx, project_id)
        })?;
        tracing::info!(
            project_id = %project_id,
            user_id = %user_id,
            by = %caller.id,
            remaining,
            "Member removed"
        );
        Ok(())
    }
}
