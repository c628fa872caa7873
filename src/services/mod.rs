// src/services/mod.rs

pub mod access;
pub mod grading;
pub mod membership;
pub mod reports;
pub mod scoring;
