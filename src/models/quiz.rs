// src/models/quiz.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, types::Json};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    SingleChoice,
    MultipleChoice,
    FillBlank,
}

/// One answer option; for fill-blank questions the options flagged correct,
/// in order, are the expected blanks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizOption {
    pub text: String,
    pub is_correct: bool,
}

/// A question with its answer key. Stored inside `quizzes.questions`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: Uuid,
    pub text: String,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    pub options: Vec<QuizOption>,
}

/// Represents the 'quizzes' table in the database.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Quiz {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub total_marks: i32,
    pub single_question_marks: i32,
    pub pass_percentage: f64,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub attempts_enabled: bool,
    /// Attempt limit, only meaningful when `attempts_enabled`.
    pub attempts: Option<i32>,
    pub available_to_everyone: bool,
    pub questions: Json<Vec<Question>>,
    pub created_by: Option<i64>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

pub const QUIZ_COLUMNS: &str = "id, name, description, total_marks, single_question_marks, \
    pass_percentage, start_at, end_at, attempts_enabled, attempts, available_to_everyone, \
    questions, created_by, created_at, updated_at";

#[derive(Debug, Serialize)]
pub struct QuizDetail {
    #[serde(flatten)]
    pub quiz: Quiz,
    pub batches: Vec<i64>,
}

/// Listing row; questions are left out.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct QuizSummary {
    pub id: i64,
    pub name: String,
    pub total_marks: i32,
    pub pass_percentage: f64,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub attempts_enabled: bool,
    pub attempts: Option<i32>,
    pub available_to_everyone: bool,
    pub question_count: i32,
    pub created_at: Option<DateTime<Utc>>,
}

/// DTO for sending a question to a student (answer key removed).
#[derive(Debug, Serialize)]
pub struct PublicQuestion {
    pub id: Uuid,
    pub text: String,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    /// Option texts; empty for fill-blank questions.
    pub options: Vec<String>,
    /// Number of blanks to fill; zero for choice questions.
    pub blanks: usize,
}

impl From<&Question> for PublicQuestion {
    fn from(q: &Question) -> Self {
        let (options, blanks) = match q.question_type {
            QuestionType::FillBlank => (Vec::new(), q.options.iter().filter(|o| o.is_correct).count()),
            QuestionType::SingleChoice | QuestionType::MultipleChoice => {
                (q.options.iter().map(|o| o.text.clone()).collect(), 0)
            }
        };
        PublicQuestion {
            id: q.id,
            text: q.text.clone(),
            question_type: q.question_type,
            options,
            blanks,
        }
    }
}

/// Quiz as shown to a student.
#[derive(Debug, Serialize)]
pub struct PublicQuiz {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub total_marks: i32,
    pub single_question_marks: i32,
    pub pass_percentage: f64,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub attempts_enabled: bool,
    pub attempts: Option<i32>,
    pub questions: Vec<PublicQuestion>,
}

impl From<&Quiz> for PublicQuiz {
    fn from(quiz: &Quiz) -> Self {
        PublicQuiz {
            id: quiz.id,
            name: quiz.name.clone(),
            description: quiz.description.clone(),
            total_marks: quiz.total_marks,
            single_question_marks: quiz.single_question_marks,
            pass_percentage: quiz.pass_percentage,
            start_at: quiz.start_at,
            end_at: quiz.end_at,
            attempts_enabled: quiz.attempts_enabled,
            attempts: quiz.attempts,
            questions: quiz.questions.iter().map(PublicQuestion::from).collect(),
        }
    }
}

/// Question as submitted by a quiz author. `id` is kept when editing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionInput {
    pub id: Option<Uuid>,
    pub text: String,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    pub options: Vec<QuizOption>,
}

impl QuestionInput {
    pub fn into_question(self) -> Question {
        Question {
            id: self.id.unwrap_or_else(Uuid::new_v4),
            text: self.text,
            question_type: self.question_type,
            options: self.options,
        }
    }
}

/// Upper bound for `total_marks` and `single_question_marks`.
pub const MAX_MARKS: i32 = 100_000;

/// DTO for creating or replacing a quiz.
#[derive(Debug, Deserialize, Validate)]
#[validate(schema(function = validate_quiz_request))]
pub struct QuizRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(length(max = 5000))]
    pub description: Option<String>,
    #[validate(range(min = 1, max = MAX_MARKS, message = "Total marks must be between 1 and 100000."))]
    pub total_marks: i32,
    #[validate(range(min = 0, max = MAX_MARKS))]
    pub single_question_marks: i32,
    #[validate(range(min = 0.0, max = 100.0))]
    pub pass_percentage: f64,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attempts_enabled: bool,
    pub attempts: Option<i32>,
    #[serde(default = "default_true")]
    pub available_to_everyone: bool,
    #[serde(default)]
    pub batches: Vec<i64>,
    #[validate(custom(function = validate_questions))]
    pub questions: Vec<QuestionInput>,
}

fn default_true() -> bool {
    true
}

fn validate_quiz_request(req: &QuizRequest) -> Result<(), validator::ValidationError> {
    if let (Some(start), Some(end)) = (req.start_at, req.end_at) {
        if start >= end {
            return Err(validator::ValidationError::new("window")
                .with_message("start_at must be before end_at".into()));
        }
    }
    if req.attempts_enabled && req.attempts.is_none_or(|n| n < 1) {
        return Err(validator::ValidationError::new("attempts")
            .with_message("attempts must be at least 1 when attempts are enabled".into()));
    }
    if !req.available_to_everyone && req.batches.is_empty() {
        return Err(validator::ValidationError::new("batches")
            .with_message("a quiz not available to everyone needs at least one batch".into()));
    }
    Ok(())
}

/// Every question needs text, at least one option and at least one option
/// flagged correct.
fn validate_questions(questions: &[QuestionInput]) -> Result<(), validator::ValidationError> {
    if questions.is_empty() {
        return Err(validator::ValidationError::new("questions_cannot_be_empty"));
    }
    for q in questions {
        if q.text.trim().is_empty() {
            return Err(validator::ValidationError::new("question_text_empty"));
        }
        if q.options.is_empty() {
            return Err(validator::ValidationError::new("options_cannot_be_empty"));
        }
        if q.options.iter().any(|o| o.text.trim().is_empty()) {
            return Err(validator::ValidationError::new("option_text_empty"));
        }
        if !q.options.iter().any(|o| o.is_correct) {
            return Err(validator::ValidationError::new("no_correct_option"));
        }
    }
    Ok(())
}
