// src/handlers/mod.rs

pub mod attempts;
pub mod auth;
pub mod batches;
pub mod courses;
pub mod events;
pub mod quizzes;
pub mod reports;
pub mod users;
