// src/models/mod.rs

pub mod attempt;
pub mod batch;
pub mod course;
pub mod quiz;
pub mod report;
pub mod user;
