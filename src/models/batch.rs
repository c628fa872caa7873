// src/models/batch.rs

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

use super::user::MemberRole;

static BATCH_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{2,32}$").expect("batch code pattern is valid"));

/// Represents the 'batches' table in the database.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Batch {
    pub id: i64,
    /// Unique short code, e.g. "FS-2025-01".
    pub code: String,
    pub name: String,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Listing row with member counts.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct BatchSummary {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub student_count: i64,
    pub trainer_count: i64,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Member {
    pub id: i64,
    pub name: String,
    pub email: String,
    #[sqlx(try_from = "String")]
    pub role: MemberRole,
}

#[derive(Debug, Serialize)]
pub struct BatchDetail {
    #[serde(flatten)]
    pub batch: Batch,
    pub students: Vec<Member>,
    pub trainers: Vec<Member>,
}

fn validate_batch_code(code: &str) -> Result<(), validator::ValidationError> {
    if BATCH_CODE.is_match(code) {
        Ok(())
    } else {
        Err(validator::ValidationError::new("invalid_batch_code")
            .with_message("Batch code must be 2-32 letters, digits, '-' or '_'.".into()))
    }
}

/// DTO for creating a batch.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateBatchRequest {
    #[validate(custom(function = validate_batch_code))]
    pub code: String,
    #[validate(length(min = 1, max = 100))]
    pub name: String,
}

/// DTO for updating a batch. Fields are optional.
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateBatchRequest {
    #[validate(custom(function = validate_batch_code))]
    pub code: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,
}

/// DTO for toggling one user's membership in a batch.
#[derive(Debug, Deserialize)]
pub struct ToggleMemberRequest {
    pub user_id: i64,
    pub role: MemberRole,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_codes() {
        assert!(validate_batch_code("FS-2025_01").is_ok());
        assert!(validate_batch_code("A").is_err());
        assert!(validate_batch_code("has space").is_err());
        assert!(validate_batch_code(&"x".repeat(33)).is_err());
    }

    #[test]
    fn update_request_validates_only_present_fields() {
        let req = UpdateBatchRequest {
            code: None,
            name: Some("Evening cohort".into()),
        };
        assert!(req.validate().is_ok());

        let req = UpdateBatchRequest {
            code: Some("bad code!".into()),
            name: None,
        };
        assert!(req.validate().is_err());
    }
}
