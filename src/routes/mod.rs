pub mod admin;
pub mod auth;
pub mod courses;
pub mod home;
pub mod projects;
pub mod queries;
pub mod subjects;
