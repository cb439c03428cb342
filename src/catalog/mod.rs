//! Subjects, courses, course materials and enrollments.

pub mod courses;
pub mod enrollments;
pub mod materials;
pub mod subjects;
