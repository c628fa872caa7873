// src/handlers/batches.rs

use axum::{
    Json,
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use validator::Validate;

use crate::{
    error::{AppError, conflict_on_unique},
    models::{
        batch::{Batch, BatchDetail, BatchSummary, CreateBatchRequest, Member, ToggleMemberRequest, UpdateBatchRequest},
        report::{PageParams, Paginated},
        user::{MemberRole, Role},
    },
    services::{membership, reports::like_pattern},
    utils::jwt::{CONTENT_AUTHORS, Claims, STAFF},
};

fn push_batch_filters(qb: &mut QueryBuilder<'static, Postgres>, trainer: Option<i64>, search: Option<String>) {
    qb.push(" WHERE TRUE");
    if let Some(trainer_id) = trainer {
        qb.push(
            " AND EXISTS (SELECT 1 FROM batch_members t \
             WHERE t.batch_id = b.id AND t.role = 'trainer' AND t.user_id = ",
        );
        qb.push_bind(trainer_id);
        qb.push(")");
    }
    if let Some(keyword) = search {
        let pattern = like_pattern(&keyword);
        qb.push(" AND (b.name ILIKE ");
        qb.push_bind(pattern.clone());
        qb.push(" OR b.code ILIKE ");
        qb.push_bind(pattern);
        qb.push(")");
    }
}

/// Lists batches with member counts. Staff see every batch, trainers their own.
pub async fn list_batches(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Query(params): Query<PageParams>,
) -> Result<impl IntoResponse, AppError> {
    claims.require(CONTENT_AUTHORS)?;

    let page = params.page();
    let trainer = match claims.role {
        Role::Trainer => Some(claims.user_id()?),
        _ => None,
    };

    let mut qb = QueryBuilder::new(
        "SELECT b.id, b.code, b.name, \
         (SELECT COUNT(*) FROM batch_members s WHERE s.batch_id = b.id AND s.role = 'student') AS student_count, \
         (SELECT COUNT(*) FROM batch_members t WHERE t.batch_id = b.id AND t.role = 'trainer') AS trainer_count, \
         b.created_at FROM batches b",
    );
    push_batch_filters(&mut qb, trainer, params.keyword());
    qb.push(" ORDER BY b.created_at DESC, b.id DESC LIMIT ");
    qb.push_bind(page.limit);
    qb.push(" OFFSET ");
    qb.push_bind(page.offset());

    let batches = qb
        .build_query_as::<BatchSummary>()
        .fetch_all(&pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to list batches: {:?}", e);
            AppError::InternalServerError(e.to_string())
        })?;

    let mut count = QueryBuilder::new("SELECT COUNT(*) FROM batches b");
    push_batch_filters(&mut count, trainer, params.keyword());
    let total: i64 = count.build_query_scalar().fetch_one(&pool).await?;

    Ok(Json(Paginated::new(batches, page, total)))
}

/// Staff only.
pub async fn create_batch(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateBatchRequest>,
) -> Result<impl IntoResponse, AppError> {
    claims.require(STAFF)?;
    payload.validate()?;

    let batch = sqlx::query_as::<_, Batch>(
        "INSERT INTO batches (code, name) VALUES ($1, $2) RETURNING id, code, name, created_at",
    )
    .bind(&payload.code)
    .bind(payload.name.trim())
    .fetch_one(&pool)
    .await
    .map_err(|e| conflict_on_unique(e, format!("Batch code '{}' already exists", payload.code)))?;

    tracing::info!(batch_id = batch.id, code = %batch.code, "Batch created");
    Ok((StatusCode::CREATED, Json(batch)))
}

/// Batch with its students and trainers. Staff only.
pub async fn get_batch(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    claims.require(STAFF)?;

    let batch = sqlx::query_as::<_, Batch>("SELECT id, code, name, created_at FROM batches WHERE id = $1")
        .bind(id)
        .fetch_optional(&pool)
        .await?
        .ok_or(AppError::NotFound("Batch not found".to_string()))?;

    let members = sqlx::query_as::<_, Member>(
        "SELECT u.id, u.name, u.email, m.role FROM batch_members m
         JOIN users u ON u.id = m.user_id
         WHERE m.batch_id = $1 ORDER BY u.name, u.id",
    )
    .bind(id)
    .fetch_all(&pool)
    .await?;

    let (trainers, students): (Vec<Member>, Vec<Member>) =
        members.into_iter().partition(|m| m.role == MemberRole::Trainer);

    Ok(Json(BatchDetail {
        batch,
        students,
        trainers,
    }))
}

/// Renames a batch or changes its code. Staff only.
pub async fn update_batch(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateBatchRequest>,
) -> Result<impl IntoResponse, AppError> {
    claims.require(STAFF)?;
    payload.validate()?;

    let batch = sqlx::query_as::<_, Batch>(
        "UPDATE batches SET code = COALESCE($1, code), name = COALESCE($2, name)
         WHERE id = $3 RETURNING id, code, name, created_at",
    )
    .bind(payload.code.as_deref())
    .bind(payload.name.as_deref().map(str::trim))
    .bind(id)
    .fetch_optional(&pool)
    .await
    .map_err(|e| conflict_on_unique(e, "Batch code already exists"))?
    .ok_or(AppError::NotFound("Batch not found".to_string()))?;

    Ok(Json(batch))
}

/// Deletes a batch that no quiz, course or member refers to. Staff only.
pub async fn delete_batch(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    claims.require(STAFF)?;
    membership::delete_batch(&pool, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Adds the user to the batch, or removes them if already a member. Staff only.
pub async fn toggle_member(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(payload): Json<ToggleMemberRequest>,
) -> Result<impl IntoResponse, AppError> {
    claims.require(STAFF)?;
    let outcome = membership::toggle_membership(&pool, id, payload.user_id, payload.role).await?;

    Ok(Json(json!({
        "batch_id": id,
        "user_id": payload.user_id,
        "role": payload.role,
        "outcome": outcome,
    })))
}
