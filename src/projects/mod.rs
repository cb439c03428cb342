pub mod domain;
pub mod repository;

pub use domain::{
    JoinDecision, JoinRequest, NewProject, Project, ProjectError, ProjectMember, ProjectUpdate,
    UserProjectStatus,
};
pub use repository::{DynProjectRepository, ProjectFilter, ProjectRepository, SqliteProjectRepository};
