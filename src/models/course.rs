// src/models/course.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Represents the 'courses' table in the database.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Course {
    pub id: i64,
    pub title: String,
    /// Sanitised HTML.
    pub description: Option<String>,
    pub available_to_everyone: bool,
    pub created_by: Option<i64>,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Video,
    Document,
    Link,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Video => "video",
            ResourceKind::Document => "document",
            ResourceKind::Link => "link",
        }
    }

    /// Kind of an uploaded file, decided by its content type.
    pub fn for_upload(content_type: &str) -> Self {
        if content_type.starts_with("video/") {
            ResourceKind::Video
        } else {
            ResourceKind::Document
        }
    }
}

impl TryFrom<String> for ResourceKind {
    type Error = super::user::UnknownValue;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "video" => Ok(ResourceKind::Video),
            "document" => Ok(ResourceKind::Document),
            "link" => Ok(ResourceKind::Link),
            _ => Err(super::user::UnknownValue(value)),
        }
    }
}

/// Represents the 'course_resources' table in the database.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct CourseResource {
    pub id: i64,
    pub course_id: i64,
    #[sqlx(try_from = "String")]
    pub kind: ResourceKind,
    pub title: String,
    /// Object store path for uploads, `None` for external links.
    #[serde(skip)]
    pub storage_path: Option<String>,
    pub url: String,
    pub content_type: Option<String>,
    pub size_bytes: Option<i64>,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Serialize)]
pub struct CourseDetail {
    #[serde(flatten)]
    pub course: Course,
    pub batches: Vec<i64>,
    pub resources: Vec<CourseResource>,
}

/// DTO for creating or replacing a course.
#[derive(Debug, Deserialize, Validate)]
#[validate(schema(function = validate_course_request))]
pub struct CourseRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(length(max = 20000))]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub available_to_everyone: bool,
    /// Batches that may see the course when it is not available to everyone.
    #[serde(default)]
    pub batches: Vec<i64>,
}

fn default_true() -> bool {
    true
}

fn validate_course_request(req: &CourseRequest) -> Result<(), validator::ValidationError> {
    if !req.available_to_everyone && req.batches.is_empty() {
        return Err(validator::ValidationError::new("batches")
            .with_message("a course not available to everyone needs at least one batch".into()));
    }
    Ok(())
}
