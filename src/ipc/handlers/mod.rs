pub mod config;
pub mod core;
pub mod dashboard;
pub mod groups;
pub mod students;
pub mod teachers;
