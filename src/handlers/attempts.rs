// src/handlers/attempts.rs

use axum::{
    Json,
    extract::{Extension, Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde_json::json;
use sqlx::{PgPool, types::Json as SqlJson};
use validator::Validate;

use crate::{
    error::AppError,
    handlers::quizzes::load_quiz,
    models::{
        attempt::{ATTEMPT_COLUMNS, QuizAttempt, QuizSnapshot, SubmitAttemptRequest},
        user::Role,
    },
    services::{
        access::{Scoped, linked_batches},
        grading::grade_submission,
        scoring::{AttemptContext, ScoringRules, aggregate, check_eligibility},
    },
    utils::{
        jwt::{CONTENT_AUTHORS, Claims},
        notify::Notifier,
    },
};

/// Grades and records a quiz attempt. Students only.
///
/// The student's row is locked for the whole transaction, so two submissions
/// from the same student are counted against the attempt limit one at a time.
pub async fn submit_attempt(
    State(pool): State<PgPool>,
    State(notifier): State<Notifier>,
    Extension(claims): Extension<Claims>,
    Path(quiz_id): Path<i64>,
    Json(payload): Json<SubmitAttemptRequest>,
) -> Result<impl IntoResponse, AppError> {
    claims.require(&[Role::Student])?;
    payload.validate()?;
    let user_id = claims.user_id()?;

    let mut tx = pool.begin().await?;

    sqlx::query_scalar::<_, i64>("SELECT id FROM users WHERE id = $1 FOR UPDATE")
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::AuthError("Account no longer exists".to_string()))?;

    let quiz = load_quiz(&mut *tx, quiz_id).await?;

    let prior_attempts = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM quiz_attempts WHERE quiz_id = $1 AND user_id = $2",
    )
    .bind(quiz_id)
    .bind(user_id)
    .fetch_one(&mut *tx)
    .await?;

    let user_batches = sqlx::query_scalar::<_, i64>(
        "SELECT batch_id FROM batch_members WHERE user_id = $1 AND role = 'student'",
    )
    .bind(user_id)
    .fetch_all(&mut *tx)
    .await?;

    let quiz_batches = linked_batches(&mut *tx, Scoped::Quiz, quiz_id).await?;

    let now = Utc::now();
    let ctx = AttemptContext {
        now,
        prior_attempts,
        user_batches,
    };
    check_eligibility(&quiz, &quiz_batches, &ctx)?;

    let snapshot = QuizSnapshot::capture(&quiz, now);
    let answers = grade_submission(&snapshot.questions, &payload.answers)?;
    let score = aggregate(&ScoringRules::from(&snapshot), &answers)?;

    let attempt = sqlx::query_as::<_, QuizAttempt>(&format!(
        "INSERT INTO quiz_attempts (quiz_id, user_id, quiz_snapshot, answers, time_spent_seconds,
            submitted_at, marks_obtained, correct_count, incorrect_count, unattempted_count,
            review_marked_count, percentage, result)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
         RETURNING {}",
        ATTEMPT_COLUMNS
    ))
    .bind(quiz_id)
    .bind(user_id)
    .bind(SqlJson(&snapshot))
    .bind(SqlJson(&answers))
    .bind(payload.time_spent_seconds)
    .bind(now)
    .bind(score.marks_obtained)
    .bind(score.correct_count)
    .bind(score.incorrect_count)
    .bind(score.unattempted_count)
    .bind(score.review_marked_count)
    .bind(score.percentage)
    .bind(score.result.as_str())
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| {
        tracing::error!("Failed to save quiz attempt: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?;

    tx.commit().await?;

    tracing::info!(
        attempt_id = attempt.id,
        quiz_id,
        user_id,
        marks = score.marks_obtained,
        result = score.result.as_str(),
        "Quiz attempt submitted"
    );
    notifier.publish(
        "attempt:submitted",
        json!({
            "attempt_id": attempt.id,
            "quiz_id": quiz_id,
            "user_id": user_id,
            "result": score.result,
        }),
    );

    Ok((StatusCode::CREATED, Json(attempt)))
}

/// One attempt. Its owner, staff and trainers may read it.
pub async fn get_attempt(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let attempt = sqlx::query_as::<_, QuizAttempt>(&format!(
        "SELECT {} FROM quiz_attempts WHERE id = $1",
        ATTEMPT_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::NotFound("Attempt not found".to_string()))?;

    if attempt.user_id != claims.user_id()? && !CONTENT_AUTHORS.contains(&claims.role) {
        return Err(AppError::Forbidden(
            "You can only view your own attempts".to_string(),
        ));
    }

    Ok(Json(attempt))
}
