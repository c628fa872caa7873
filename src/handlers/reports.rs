// src/handlers/reports.rs

use axum::{
    Json,
    extract::{Extension, Path, Query, State},
    response::{IntoResponse, Response},
};
use serde_json::json;
use sqlx::PgPool;

use crate::{
    error::AppError,
    models::{
        report::{
            BatchRollup, BatchRollupRow, DetailEntryRow, OwnAttemptRow, PageParams, Paginated, QuizRollup,
            QuizRollupRow,
        },
        user::Role,
    },
    services::reports::{self, BatchScope, DetailSource},
    utils::jwt::{CONTENT_AUTHORS, Claims},
};

/// Quiz report. Students get their own attempts; staff and trainers get
/// pass/fail roll-ups per quiz.
pub async fn quiz_report(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Query(params): Query<PageParams>,
) -> Result<Response, AppError> {
    let page = params.page();
    let keyword = params.keyword();

    if claims.role == Role::Student {
        let user_id = claims.user_id()?;
        let items = reports::own_attempts(user_id, keyword.clone(), page)
            .build_query_as::<OwnAttemptRow>()
            .fetch_all(&pool)
            .await
            .map_err(|e| {
                tracing::error!("Failed to load own attempts: {:?}", e);
                AppError::InternalServerError(e.to_string())
            })?;
        let total: i64 = reports::own_attempts_count(user_id, keyword)
            .build_query_scalar()
            .fetch_one(&pool)
            .await?;
        return Ok(Json(Paginated::new(items, page, total)).into_response());
    }

    let rows = reports::quiz_rollup(keyword.clone(), page)
        .build_query_as::<QuizRollupRow>()
        .fetch_all(&pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to build quiz report: {:?}", e);
            AppError::InternalServerError(e.to_string())
        })?;
    let total: i64 = reports::quiz_rollup_count(keyword)
        .build_query_scalar()
        .fetch_one(&pool)
        .await?;

    let items: Vec<QuizRollup> = rows.into_iter().map(QuizRollup::from).collect();
    Ok(Json(Paginated::new(items, page, total)).into_response())
}

/// Batch report. Staff see every batch, trainers only their own.
pub async fn batch_report(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Query(params): Query<PageParams>,
) -> Result<impl IntoResponse, AppError> {
    claims.require(CONTENT_AUTHORS)?;

    let page = params.page();
    let keyword = params.keyword();
    let scope = match claims.role {
        Role::Trainer => BatchScope::TrainerOf(claims.user_id()?),
        _ => BatchScope::All,
    };

    let rows = reports::batch_rollup(scope, keyword.clone(), page)
        .build_query_as::<BatchRollupRow>()
        .fetch_all(&pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to build batch report: {:?}", e);
            AppError::InternalServerError(e.to_string())
        })?;
    let total: i64 = reports::batch_rollup_count(scope, keyword)
        .build_query_scalar()
        .fetch_one(&pool)
        .await?;

    let items: Vec<BatchRollup> = rows.into_iter().map(BatchRollup::from).collect();
    Ok(Json(Paginated::new(items, page, total)))
}

async fn detail(pool: &PgPool, source: DetailSource, params: &PageParams) -> Result<Response, AppError> {
    let page = params.page();
    let rows = reports::detail_entries(source, params.keyword(), page)
        .build_query_as::<DetailEntryRow>()
        .fetch_all(pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to build report detail: {:?}", e);
            AppError::InternalServerError(e.to_string())
        })?;

    Ok(Json(json!({
        "page": page.page,
        "limit": page.limit,
        "groups": reports::group_entries(rows, page),
    }))
    .into_response())
}

/// Attempts of one quiz with the submitting users. Staff and trainers.
pub async fn quiz_detail(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Query(params): Query<PageParams>,
) -> Result<Response, AppError> {
    claims.require(CONTENT_AUTHORS)?;

    sqlx::query_scalar::<_, i64>("SELECT id FROM quizzes WHERE id = $1")
        .bind(id)
        .fetch_optional(&pool)
        .await?
        .ok_or(AppError::NotFound("Quiz not found".to_string()))?;

    detail(&pool, DetailSource::Quiz(id), &params).await
}

/// Attempts by the students of one batch, grouped per quiz.
/// Trainers may only open batches they train.
pub async fn batch_detail(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Query(params): Query<PageParams>,
) -> Result<Response, AppError> {
    claims.require(CONTENT_AUTHORS)?;

    sqlx::query_scalar::<_, i64>("SELECT id FROM batches WHERE id = $1")
        .bind(id)
        .fetch_optional(&pool)
        .await?
        .ok_or(AppError::NotFound("Batch not found".to_string()))?;

    if claims.role == Role::Trainer {
        let trains = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM batch_members WHERE batch_id = $1 AND user_id = $2 AND role = 'trainer')",
        )
        .bind(id)
        .bind(claims.user_id()?)
        .fetch_one(&pool)
        .await?;
        if !trains {
            return Err(AppError::Forbidden(
                "You are not a trainer of this batch".to_string(),
            ));
        }
    }

    detail(&pool, DetailSource::Batch(id), &params).await
}
