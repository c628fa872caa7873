// src/models/report.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::attempt::QuizResult;
use crate::config::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};

/// Query parameters shared by paginated, searchable listings.
#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub search: Option<String>,
}

impl PageParams {
    pub fn page(&self) -> Page {
        Page::new(self.page, self.limit)
    }

    /// Trimmed search keyword, `None` when blank.
    pub fn keyword(&self) -> Option<String> {
        keyword(self.search.as_deref())
    }
}

pub fn keyword(search: Option<&str>) -> Option<String> {
    search
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

/// Highest page number accepted; keeps `page * limit` inside `i64`.
const MAX_PAGE: i64 = i64::MAX / MAX_PAGE_SIZE;

/// Normalised page request: `page >= 1`, `1 <= limit <= MAX_PAGE_SIZE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: i64,
    pub limit: i64,
}

impl Page {
    pub fn new(page: Option<i64>, limit: Option<i64>) -> Self {
        Page {
            page: page.unwrap_or(1).clamp(1, MAX_PAGE),
            limit: limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.limit)
    }

    /// Offset one past the last row of this page.
    pub fn end(&self) -> i64 {
        self.offset().saturating_add(self.limit)
    }
}

#[derive(Debug, Serialize)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub page: i64,
    pub limit: i64,
    pub total: i64,
}

impl<T> Paginated<T> {
    pub fn new(items: Vec<T>, page: Page, total: i64) -> Self {
        Paginated {
            items,
            page: page.page,
            limit: page.limit,
            total,
        }
    }
}

/// A student's own attempt in the quiz report.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct OwnAttemptRow {
    pub attempt_id: i64,
    pub quiz_id: i64,
    pub quiz_name: String,
    pub marks_obtained: i32,
    pub total_marks: i32,
    pub percentage: f64,
    #[sqlx(try_from = "String")]
    pub result: QuizResult,
    pub time_spent_seconds: i32,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct QuizRollupRow {
    pub quiz_id: i64,
    pub quiz_name: String,
    pub total_attempts: i64,
    pub pass_count: i64,
    pub fail_count: i64,
    pub latest_attempt_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow)]
pub struct BatchRollupRow {
    pub batch_id: i64,
    pub batch_code: String,
    pub batch_name: String,
    pub total_attempts: i64,
    pub pass_count: i64,
    pub fail_count: i64,
    pub latest_attempt_at: Option<DateTime<Utc>>,
}

/// Pass/fail counts with derived percentages.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptStats {
    pub total_attempts: i64,
    pub pass_count: i64,
    pub fail_count: i64,
    pub pass_percentage: f64,
    pub fail_percentage: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuizRollup {
    pub quiz_id: i64,
    pub quiz_name: String,
    #[serde(flatten)]
    pub stats: AttemptStats,
    pub latest_attempt_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchRollup {
    pub batch_id: i64,
    pub batch_code: String,
    pub batch_name: String,
    #[serde(flatten)]
    pub stats: AttemptStats,
    pub latest_attempt_at: Option<DateTime<Utc>>,
}

/// One attempt in a drill-down, with the submitting user's profile.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct DetailEntryRow {
    pub attempt_id: i64,
    pub quiz_id: i64,
    pub quiz_name: String,
    pub user_id: i64,
    pub user_name: String,
    pub user_email: String,
    pub user_batches: Vec<String>,
    pub marks_obtained: i32,
    pub percentage: f64,
    #[sqlx(try_from = "String")]
    pub result: QuizResult,
    pub time_spent_seconds: i32,
    pub submitted_at: DateTime<Utc>,
    /// Number of attempts in this entry's quiz group before pagination.
    #[serde(skip)]
    pub group_total: i64,
}

/// Attempts of one quiz, paginated within the group.
#[derive(Debug, Clone, Serialize)]
pub struct DetailGroup {
    pub quiz_id: i64,
    pub quiz_name: String,
    pub page: i64,
    pub limit: i64,
    pub total: i64,
    pub entries: Vec<DetailEntryRow>,
}
