// src/services/scoring.rs

use chrono::{DateTime, Utc};

use crate::{
    error::AppError,
    models::{
        attempt::{GradedAnswer, QuizResult, QuizSnapshot, Score},
        quiz::Quiz,
    },
};

/// Marking scheme an attempt is scored with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringRules {
    pub total_marks: i32,
    pub single_question_marks: i32,
    pub pass_percentage: f64,
}

impl From<&QuizSnapshot> for ScoringRules {
    fn from(snapshot: &QuizSnapshot) -> Self {
        ScoringRules {
            total_marks: snapshot.total_marks,
            single_question_marks: snapshot.single_question_marks,
            pass_percentage: snapshot.pass_percentage,
        }
    }
}

/// Rounds to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// `part / total` as a percentage with two decimals; 0 when `total` is 0.
pub fn rate(part: i64, total: i64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round2(part as f64 / total as f64 * 100.0)
}

/// Summarises graded answers into a `Score`.
///
/// Fails on a zero `total_marks` instead of producing a NaN percentage.
pub fn aggregate(rules: &ScoringRules, answers: &[GradedAnswer]) -> Result<Score, AppError> {
    if rules.total_marks <= 0 {
        return Err(AppError::BadRequest(
            "Quiz total marks must be greater than zero".to_string(),
        ));
    }

    let mut correct: i32 = 0;
    let mut incorrect = 0;
    let mut unattempted = 0;
    let mut review_marked = 0;

    for answer in answers {
        if answer.unattempted {
            unattempted += 1;
        } else if answer.is_correct {
            correct += 1;
        } else {
            incorrect += 1;
        }
        if answer.marked_for_review {
            review_marked += 1;
        }
    }

    let marks_obtained = correct
        .checked_mul(rules.single_question_marks)
        .ok_or_else(|| AppError::BadRequest("Quiz marks are out of range".to_string()))?;
    let percentage = round2(f64::from(marks_obtained) / f64::from(rules.total_marks) * 100.0);
    let result = if percentage >= rules.pass_percentage {
        QuizResult::Pass
    } else {
        QuizResult::Fail
    };

    Ok(Score {
        marks_obtained,
        correct_count: correct,
        incorrect_count: incorrect,
        unattempted_count: unattempted,
        review_marked_count: review_marked,
        percentage,
        result,
    })
}

/// What is known about the submitting user when an attempt arrives.
#[derive(Debug, Clone)]
pub struct AttemptContext {
    pub now: DateTime<Utc>,
    /// Attempts this user already has on the quiz.
    pub prior_attempts: i64,
    pub user_batches: Vec<i64>,
}

/// Checks, before grading, that the user may attempt the quiz:
/// the availability window is open, the attempt limit is not reached and the
/// user is in one of the quiz's batches unless the quiz is open to everyone.
pub fn check_eligibility(quiz: &Quiz, quiz_batches: &[i64], ctx: &AttemptContext) -> Result<(), AppError> {
    if quiz.start_at.is_some_and(|start| ctx.now < start) {
        return Err(AppError::Conflict(format!(
            "Quiz '{}' is not open yet",
            quiz.name
        )));
    }
    if quiz.end_at.is_some_and(|end| ctx.now > end) {
        return Err(AppError::Conflict(format!("Quiz '{}' has closed", quiz.name)));
    }

    if quiz.attempts_enabled {
        let limit = i64::from(quiz.attempts.unwrap_or(0));
        if ctx.prior_attempts >= limit {
            return Err(AppError::Conflict(format!(
                "Attempt limit reached: {} of {} attempts used",
                ctx.prior_attempts, limit
            )));
        }
    }

    if !quiz.available_to_everyone && !quiz_batches.iter().any(|b| ctx.user_batches.contains(b)) {
        return Err(AppError::Conflict(
            "You are not eligible for this quiz".to_string(),
        ));
    }

    Ok(())
}
