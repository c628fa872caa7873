// src/models/attempt.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, types::Json};
use uuid::Uuid;
use validator::Validate;

use super::quiz::{Question, Quiz};
use super::user::UnknownValue;

/// The quiz exactly as it was when an attempt was graded.
/// Later edits to the quiz never touch stored snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizSnapshot {
    pub quiz_id: i64,
    pub name: String,
    pub total_marks: i32,
    pub single_question_marks: i32,
    pub pass_percentage: f64,
    pub questions: Vec<Question>,
    pub captured_at: DateTime<Utc>,
}

impl QuizSnapshot {
    pub fn capture(quiz: &Quiz, at: DateTime<Utc>) -> Self {
        QuizSnapshot {
            quiz_id: quiz.id,
            name: quiz.name.clone(),
            total_marks: quiz.total_marks,
            single_question_marks: quiz.single_question_marks,
            pass_percentage: quiz.pass_percentage,
            questions: quiz.questions.0.clone(),
            captured_at: at,
        }
    }
}

/// One answer as sent by the student. Single-choice questions use
/// `selected_option`; multiple-choice and fill-blank use `selected_options`.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmittedAnswer {
    pub question_id: Uuid,
    #[serde(default)]
    pub selected_option: Option<String>,
    #[serde(default)]
    pub selected_options: Option<Vec<String>>,
    #[serde(default)]
    pub marked_for_review: bool,
}

/// DTO for submitting a quiz attempt.
#[derive(Debug, Deserialize, Validate)]
pub struct SubmitAttemptRequest {
    #[serde(default)]
    pub answers: Vec<SubmittedAnswer>,
    #[validate(range(min = 0, message = "time_spent_seconds cannot be negative"))]
    #[serde(default)]
    pub time_spent_seconds: i32,
}

/// An answer after grading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradedAnswer {
    pub question_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_option: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_options: Option<Vec<String>>,
    pub is_correct: bool,
    pub marked_for_review: bool,
    pub unattempted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuizResult {
    Pass,
    Fail,
}

impl QuizResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuizResult::Pass => "pass",
            QuizResult::Fail => "fail",
        }
    }
}

impl TryFrom<String> for QuizResult {
    type Error = UnknownValue;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "pass" => Ok(QuizResult::Pass),
            "fail" => Ok(QuizResult::Fail),
            _ => Err(UnknownValue(value)),
        }
    }
}

/// Summary of a graded attempt.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Score {
    pub marks_obtained: i32,
    pub correct_count: i32,
    pub incorrect_count: i32,
    pub unattempted_count: i32,
    pub review_marked_count: i32,
    /// Rounded to two decimals.
    pub percentage: f64,
    #[sqlx(try_from = "String")]
    pub result: QuizResult,
}

/// Represents the 'quiz_attempts' table in the database. Insert-only.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct QuizAttempt {
    pub id: i64,
    pub quiz_id: i64,
    pub user_id: i64,
    pub quiz_snapshot: Json<QuizSnapshot>,
    pub answers: Json<Vec<GradedAnswer>>,
    pub time_spent_seconds: i32,
    pub submitted_at: DateTime<Utc>,
    #[sqlx(flatten)]
    pub score: Score,
}

pub const ATTEMPT_COLUMNS: &str = "id, quiz_id, user_id, quiz_snapshot, answers, \
    time_spent_seconds, submitted_at, marks_obtained, correct_count, incorrect_count, \
    unattempted_count, review_marked_count, percentage, result";
