// src/handlers/quizzes.rs

use std::collections::HashSet;

use axum::{
    Json,
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use sqlx::{PgConnection, PgPool, QueryBuilder, types::Json as SqlJson};
use validator::Validate;

use crate::{
    error::AppError,
    models::{
        quiz::{PublicQuiz, QUIZ_COLUMNS, Question, Quiz, QuizDetail, QuizRequest, QuizSummary},
        report::{PageParams, Paginated},
        user::Role,
    },
    services::{
        access::{Scoped, Viewer, ensure_can_edit, ensure_visible, linked_batches, push_visible, replace_batches},
        reports::like_pattern,
    },
    utils::{
        html::clean_description,
        jwt::{CONTENT_AUTHORS, Claims},
        notify::Notifier,
    },
};

pub(crate) async fn load_quiz(conn: &mut PgConnection, id: i64) -> Result<Quiz, AppError> {
    sqlx::query_as::<_, Quiz>(&format!("SELECT {} FROM quizzes WHERE id = $1", QUIZ_COLUMNS))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(AppError::NotFound("Quiz not found".to_string()))
}

/// Assigns ids to new questions and rejects a list that repeats one.
fn build_questions(payload: &QuizRequest) -> Result<Vec<Question>, AppError> {
    let questions: Vec<Question> = payload
        .questions
        .iter()
        .cloned()
        .map(|q| q.into_question())
        .collect();

    let mut seen = HashSet::new();
    if let Some(dup) = questions.iter().find(|q| !seen.insert(q.id)) {
        return Err(AppError::BadRequest(format!("Question id {} is used twice", dup.id)));
    }
    Ok(questions)
}

/// Lists the quizzes the caller can see, newest first.
pub async fn list_quizzes(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Query(params): Query<PageParams>,
) -> Result<impl IntoResponse, AppError> {
    let viewer = Viewer::from_claims(&claims)?;
    let page = params.page();
    let keyword = params.keyword();

    let mut qb = QueryBuilder::new(
        "SELECT q.id, q.name, q.total_marks, q.pass_percentage, q.start_at, q.end_at, \
         q.attempts_enabled, q.attempts, q.available_to_everyone, \
         jsonb_array_length(q.questions)::INTEGER AS question_count, q.created_at \
         FROM quizzes q WHERE TRUE",
    );
    push_visible(&mut qb, Scoped::Quiz, "q", viewer);
    if let Some(keyword) = keyword.clone() {
        qb.push(" AND q.name ILIKE ");
        qb.push_bind(like_pattern(&keyword));
    }
    qb.push(" ORDER BY q.created_at DESC, q.id DESC LIMIT ");
    qb.push_bind(page.limit);
    qb.push(" OFFSET ");
    qb.push_bind(page.offset());

    let quizzes = qb
        .build_query_as::<QuizSummary>()
        .fetch_all(&pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to list quizzes: {:?}", e);
            AppError::InternalServerError(e.to_string())
        })?;

    let mut count = QueryBuilder::new("SELECT COUNT(*) FROM quizzes q WHERE TRUE");
    push_visible(&mut count, Scoped::Quiz, "q", viewer);
    if let Some(keyword) = keyword {
        count.push(" AND q.name ILIKE ");
        count.push_bind(like_pattern(&keyword));
    }
    let total: i64 = count.build_query_scalar().fetch_one(&pool).await?;

    Ok(Json(Paginated::new(quizzes, page, total)))
}

/// Creates a quiz. Staff and trainers.
pub async fn create_quiz(
    State(pool): State<PgPool>,
    State(notifier): State<Notifier>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<QuizRequest>,
) -> Result<impl IntoResponse, AppError> {
    claims.require(CONTENT_AUTHORS)?;
    payload.validate()?;
    let questions = build_questions(&payload)?;

    let mut tx = pool.begin().await?;

    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO quizzes (name, description, total_marks, single_question_marks, pass_percentage,
            start_at, end_at, attempts_enabled, attempts, available_to_everyone, questions, created_by)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) RETURNING id",
    )
    .bind(payload.name.trim())
    .bind(clean_description(payload.description.as_deref()))
    .bind(payload.total_marks)
    .bind(payload.single_question_marks)
    .bind(payload.pass_percentage)
    .bind(payload.start_at)
    .bind(payload.end_at)
    .bind(payload.attempts_enabled)
    .bind(payload.attempts.filter(|_| payload.attempts_enabled))
    .bind(payload.available_to_everyone)
    .bind(SqlJson(&questions))
    .bind(claims.user_id()?)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| {
        tracing::error!("Failed to create quiz: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?;

    replace_batches(&mut *tx, Scoped::Quiz, id, &payload.batches).await?;
    tx.commit().await?;

    tracing::info!(quiz_id = id, questions = questions.len(), "Quiz created");
    notifier.publish("quiz:created", json!({ "id": id, "name": payload.name.trim() }));

    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}

/// Students get the quiz without its answer key.
pub async fn get_quiz(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    let mut conn = pool.acquire().await?;
    ensure_visible(&mut *conn, Scoped::Quiz, id, Viewer::from_claims(&claims)?).await?;
    let quiz = load_quiz(&mut *conn, id).await?;

    if claims.role == Role::Student {
        return Ok(Json(PublicQuiz::from(&quiz)).into_response());
    }

    let batches = linked_batches(&mut *conn, Scoped::Quiz, id).await?;
    Ok(Json(QuizDetail { quiz, batches }).into_response())
}

/// Replaces a quiz. Attempts already taken keep their own snapshot.
pub async fn update_quiz(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(payload): Json<QuizRequest>,
) -> Result<impl IntoResponse, AppError> {
    claims.require(CONTENT_AUTHORS)?;
    payload.validate()?;
    let questions = build_questions(&payload)?;

    let mut tx = pool.begin().await?;
    ensure_can_edit(&mut *tx, Scoped::Quiz, id, &claims).await?;

    sqlx::query(
        "UPDATE quizzes SET name = $1, description = $2, total_marks = $3, single_question_marks = $4,
            pass_percentage = $5, start_at = $6, end_at = $7, attempts_enabled = $8, attempts = $9,
            available_to_everyone = $10, questions = $11, updated_at = NOW()
         WHERE id = $12",
    )
    .bind(payload.name.trim())
    .bind(clean_description(payload.description.as_deref()))
    .bind(payload.total_marks)
    .bind(payload.single_question_marks)
    .bind(payload.pass_percentage)
    .bind(payload.start_at)
    .bind(payload.end_at)
    .bind(payload.attempts_enabled)
    .bind(payload.attempts.filter(|_| payload.attempts_enabled))
    .bind(payload.available_to_everyone)
    .bind(SqlJson(&questions))
    .bind(id)
    .execute(&mut *tx)
    .await?;

    replace_batches(&mut *tx, Scoped::Quiz, id, &payload.batches).await?;

    let quiz = load_quiz(&mut *tx, id).await?;
    let batches = linked_batches(&mut *tx, Scoped::Quiz, id).await?;
    tx.commit().await?;

    tracing::info!(quiz_id = id, "Quiz updated");
    Ok(Json(QuizDetail { quiz, batches }))
}

/// Deletes a quiz. Quizzes with attempts are kept, so their history stays intact.
pub async fn delete_quiz(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    claims.require(CONTENT_AUTHORS)?;

    let mut tx = pool.begin().await?;
    ensure_can_edit(&mut *tx, Scoped::Quiz, id, &claims).await?;

    let name = sqlx::query_scalar::<_, String>("SELECT name FROM quizzes WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::NotFound("Quiz not found".to_string()))?;

    let attempts = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM quiz_attempts WHERE quiz_id = $1")
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;
    if attempts > 0 {
        return Err(AppError::Conflict(format!(
            "Quiz '{}' has {} attempt(s) and cannot be deleted",
            name, attempts
        )));
    }

    sqlx::query("DELETE FROM quizzes WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            tracing::error!("Failed to delete quiz: {:?}", e);
            AppError::from(e)
        })?;
    tx.commit().await?;

    tracing::info!(quiz_id = id, "Quiz deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    fn request(ids: [Option<Uuid>; 2]) -> QuizRequest {
        let questions: Vec<serde_json::Value> = ids
            .iter()
            .map(|id| {
                json!({
                    "id": id,
                    "text": "2 + 2?",
                    "type": "single_choice",
                    "options": [{ "text": "4", "is_correct": true }]
                })
            })
            .collect();
        serde_json::from_value(json!({
            "name": "Arithmetic",
            "total_marks": 10,
            "single_question_marks": 5,
            "pass_percentage": 50.0,
            "questions": questions
        }))
        .unwrap()
    }

    #[test]
    fn new_questions_get_distinct_ids() {
        let questions = build_questions(&request([None, None])).unwrap();
        assert_ne!(questions[0].id, questions[1].id);
    }

    #[test]
    fn existing_ids_are_kept() {
        let id = Uuid::new_v4();
        let questions = build_questions(&request([Some(id), None])).unwrap();
        assert_eq!(questions[0].id, id);
    }

    #[test]
    fn repeated_ids_are_rejected() {
        let id = Uuid::new_v4();
        assert!(matches!(
            build_questions(&request([Some(id), Some(id)])),
            Err(AppError::BadRequest(_))
        ));
    }
}
