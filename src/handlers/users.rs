// src/handlers/users.rs

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
        report::{Page, Paginated, keyword},
        user::{BatchMembership, CreateUserRequest, Role, UpdateUserRequest, User, UserListParams, UserProfile},
    },
    services::{
        membership::{apply_plan, plan_user_batches, user_memberships},
        reports::like_pattern,
    },
    utils::{hash::hash_password, jwt::Claims},
};

const USER_COLUMNS: &str = "id, name, email, password, role, created_at";

/// User with batch memberships, `None` if the user does not exist.
pub(crate) async fn load_profile(pool: &PgPool, id: i64) -> Result<Option<UserProfile>, AppError> {
    let user = sqlx::query_as::<_, User>(&format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await?;

    let Some(user) = user else {
        return Ok(None);
    };

    let batches = sqlx::query_as::<_, BatchMembership>(
        "SELECT b.id AS batch_id, b.code, b.name, m.role
         FROM batch_members m JOIN batches b ON b.id = m.batch_id
         WHERE m.user_id = $1 ORDER BY b.name",
    )
    .bind(id)
    .fetch_all(pool)
    .await?;

    Ok(Some(UserProfile { user, batches }))
}

fn push_user_filters(qb: &mut QueryBuilder<'static, Postgres>, params: &UserListParams) {
    qb.push(" WHERE TRUE");
    if let Some(role) = params.role {
        qb.push(" AND role = ");
        qb.push_bind(role.as_str());
    }
    if let Some(keyword) = keyword(params.search.as_deref()) {
        let pattern = like_pattern(&keyword);
        qb.push(" AND (name ILIKE ");
        qb.push_bind(pattern.clone());
        qb.push(" OR email ILIKE ");
        qb.push_bind(pattern);
        qb.push(")");
    }
}

/// Lists users, newest first. Staff only.
pub async fn list_users(
    State(pool): State<PgPool>,
    Query(params): Query<UserListParams>,
) -> Result<impl IntoResponse, AppError> {
    let page = Page::new(params.page, params.limit);

    let mut qb = QueryBuilder::new(format!("SELECT {} FROM users", USER_COLUMNS));
    push_user_filters(&mut qb, &params);
    qb.push(" ORDER BY created_at DESC, id DESC LIMIT ");
    qb.push_bind(page.limit);
    qb.push(" OFFSET ");
    qb.push_bind(page.offset());

    let users = qb
        .build_query_as::<User>()
        .fetch_all(&pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to list users: {:?}", e);
            AppError::InternalServerError(e.to_string())
        })?;

    let mut count = QueryBuilder::new("SELECT COUNT(*) FROM users");
    push_user_filters(&mut count, &params);
    let total: i64 = count.build_query_scalar().fetch_one(&pool).await?;

    Ok(Json(Paginated::new(users, page, total)))
}

/// Creates a user and enrols them in the requested batches.
/// Staff only; admins may only create trainers and students.
pub async fn create_user(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    if !claims.role.can_manage(payload.role) {
        return Err(AppError::Forbidden(format!(
            "A {} cannot create a {}",
            claims.role, payload.role
        )));
    }

    let hashed_password = hash_password(&payload.password)?;
    let email = payload.email.trim().to_lowercase();

    let mut tx = pool.begin().await?;

    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO users (name, email, password, role) VALUES ($1, $2, $3, $4) RETURNING id",
    )
    .bind(payload.name.trim())
    .bind(&email)
    .bind(hashed_password)
    .bind(payload.role.as_str())
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| conflict_on_unique(e, format!("Email '{}' already exists", email)))?;

    let plan = plan_user_batches(payload.role, &[], payload.role, &payload.batches);
    apply_plan(&mut *tx, id, &plan).await?;

    tx.commit().await?;

    tracing::info!(user_id = id, role = %payload.role, "User created");
    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}

/// Staff only.
pub async fn get_user(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let profile = load_profile(&pool, id)
        .await?
        .ok_or(AppError::NotFound("User not found".to_string()))?;
    Ok(Json(profile))
}

/// Updates a user. A role change or a `batches` list reconciles the user's
/// batch memberships in the same transaction.
pub async fn update_user(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    payload.validate()?;

    let mut tx = pool.begin().await?;

    let existing = sqlx::query_as::<_, User>(&format!(
        "SELECT {} FROM users WHERE id = $1 FOR UPDATE",
        USER_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(AppError::NotFound("User not found".to_string()))?;

    let new_role = payload.role.unwrap_or(existing.role);
    if !claims.role.can_manage(existing.role) || !claims.role.can_manage(new_role) {
        return Err(AppError::Forbidden(format!(
            "A {} cannot edit this user",
            claims.role
        )));
    }
    if claims.user_id()? == id && new_role != existing.role {
        return Err(AppError::BadRequest("Cannot change your own role".to_string()));
    }

    let hashed_password = payload.password.as_deref().map(hash_password).transpose()?;
    let email = payload.email.as_deref().map(|e| e.trim().to_lowercase());

    sqlx::query(
        "UPDATE users SET
            name = COALESCE($1, name),
            email = COALESCE($2, email),
            password = COALESCE($3, password),
            role = $4
         WHERE id = $5",
    )
    .bind(payload.name.as_deref().map(str::trim))
    .bind(email.as_deref())
    .bind(hashed_password)
    .bind(new_role.as_str())
    .bind(id)
    .execute(&mut *tx)
    .await
    .map_err(|e| conflict_on_unique(e, "Email already in use"))?;

    if new_role != existing.role || payload.batches.is_some() {
        let current = user_memberships(&mut *tx, id).await?;
        // Without an explicit list the user keeps the same batches under the new role.
        let requested = payload
            .batches
            .unwrap_or_else(|| current.iter().map(|(batch, _)| *batch).collect());
        let plan = plan_user_batches(existing.role, &current, new_role, &requested);
        apply_plan(&mut *tx, id, &plan).await?;
    }

    tx.commit().await?;
    tracing::info!(user_id = id, role = %new_role, "User updated");

    let profile = load_profile(&pool, id)
        .await?
        .ok_or(AppError::NotFound("User not found".to_string()))?;
    Ok(Json(profile))
}

/// Deletes a user; memberships and attempts go with it.
/// Staff only. Prevents deleting self.
pub async fn delete_user(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    if id == claims.user_id()? {
        return Err(AppError::BadRequest("Cannot delete yourself".to_string()));
    }

    let role = sqlx::query_scalar::<_, String>("SELECT role FROM users WHERE id = $1")
        .bind(id)
        .fetch_optional(&pool)
        .await?
        .ok_or(AppError::NotFound("User not found".to_string()))?;
    let role = Role::try_from(role).map_err(|e| AppError::InternalServerError(e.to_string()))?;

    if !claims.role.can_manage(role) {
        return Err(AppError::Forbidden(format!("A {} cannot delete a {}", claims.role, role)));
    }

    let result = sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(id)
        .execute(&pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to delete user: {:?}", e);
            AppError::InternalServerError(e.to_string())
        })?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("User not found".to_string()));
    }

    tracing::info!(user_id = id, "User deleted");
    Ok(StatusCode::NO_CONTENT)
}
