// src/handlers/courses.rs

use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Multipart, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;
use sqlx::{PgPool, QueryBuilder};
use uuid::Uuid;
use validator::Validate;

use crate::{
    error::AppError,
    models::{
        course::{Course, CourseDetail, CourseRequest, CourseResource, ResourceKind},
        report::{PageParams, Paginated},
    },
    services::{
        access::{Scoped, Viewer, ensure_can_edit, ensure_visible, linked_batches, push_visible, replace_batches},
        reports::like_pattern,
    },
    utils::{
        html::clean_description,
        jwt::{CONTENT_AUTHORS, Claims},
        notify::Notifier,
        storage::{ObjectStore, sanitize_file_name},
    },
};

const COURSE_COLUMNS: &str =
    "c.id, c.title, c.description, c.available_to_everyone, c.created_by, c.created_at, c.updated_at";
const RESOURCE_COLUMNS: &str =
    "id, course_id, kind, title, storage_path, url, content_type, size_bytes, created_at";

async fn load_detail(pool: &PgPool, id: i64) -> Result<CourseDetail, AppError> {
    let course = sqlx::query_as::<_, Course>(&format!("SELECT {} FROM courses c WHERE c.id = $1", COURSE_COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("Course not found".to_string()))?;

    let mut conn = pool.acquire().await?;
    let batches = linked_batches(&mut *conn, Scoped::Course, id).await?;

    let resources = sqlx::query_as::<_, CourseResource>(&format!(
        "SELECT {} FROM course_resources WHERE course_id = $1 ORDER BY created_at, id",
        RESOURCE_COLUMNS
    ))
    .bind(id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(CourseDetail {
        course,
        batches,
        resources,
    })
}

/// Lists the courses the caller can see, newest first.
pub async fn list_courses(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Query(params): Query<PageParams>,
) -> Result<impl IntoResponse, AppError> {
    let viewer = Viewer::from_claims(&claims)?;
    let page = params.page();
    let keyword = params.keyword();

    let mut qb = QueryBuilder::new(format!("SELECT {} FROM courses c WHERE TRUE", COURSE_COLUMNS));
    push_visible(&mut qb, Scoped::Course, "c", viewer);
    if let Some(keyword) = keyword.clone() {
        qb.push(" AND c.title ILIKE ");
        qb.push_bind(like_pattern(&keyword));
    }
    qb.push(" ORDER BY c.created_at DESC, c.id DESC LIMIT ");
    qb.push_bind(page.limit);
    qb.push(" OFFSET ");
    qb.push_bind(page.offset());

    let courses = qb
        .build_query_as::<Course>()
        .fetch_all(&pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to list courses: {:?}", e);
            AppError::InternalServerError(e.to_string())
        })?;

    let mut count = QueryBuilder::new("SELECT COUNT(*) FROM courses c WHERE TRUE");
    push_visible(&mut count, Scoped::Course, "c", viewer);
    if let Some(keyword) = keyword {
        count.push(" AND c.title ILIKE ");
        count.push_bind(like_pattern(&keyword));
    }
    let total: i64 = count.build_query_scalar().fetch_one(&pool).await?;

    Ok(Json(Paginated::new(courses, page, total)))
}

/// Creates a course. Staff and trainers.
pub async fn create_course(
    State(pool): State<PgPool>,
    State(notifier): State<Notifier>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CourseRequest>,
) -> Result<impl IntoResponse, AppError> {
    claims.require(CONTENT_AUTHORS)?;
    payload.validate()?;

    let mut tx = pool.begin().await?;

    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO courses (title, description, available_to_everyone, created_by)
         VALUES ($1, $2, $3, $4) RETURNING id",
    )
    .bind(payload.title.trim())
    .bind(clean_description(payload.description.as_deref()))
    .bind(payload.available_to_everyone)
    .bind(claims.user_id()?)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| {
        tracing::error!("Failed to create course: {:?}", e);
        AppError::InternalServerError(e.to_string())
    })?;

    replace_batches(&mut *tx, Scoped::Course, id, &payload.batches).await?;
    tx.commit().await?;

    tracing::info!(course_id = id, "Course created");
    notifier.publish("course:created", json!({ "id": id, "title": payload.title.trim() }));

    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}

/// Course with batches and resources, if the caller can see it.
pub async fn get_course(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let mut conn = pool.acquire().await?;
    ensure_visible(&mut *conn, Scoped::Course, id, Viewer::from_claims(&claims)?).await?;
    drop(conn);

    Ok(Json(load_detail(&pool, id).await?))
}

/// Replaces a course's fields and batch list. Staff, or the trainer who created it.
pub async fn update_course(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(payload): Json<CourseRequest>,
) -> Result<impl IntoResponse, AppError> {
    claims.require(CONTENT_AUTHORS)?;
    payload.validate()?;

    let mut tx = pool.begin().await?;
    ensure_can_edit(&mut *tx, Scoped::Course, id, &claims).await?;

    sqlx::query(
        "UPDATE courses SET title = $1, description = $2, available_to_everyone = $3, updated_at = NOW()
         WHERE id = $4",
    )
    .bind(payload.title.trim())
    .bind(clean_description(payload.description.as_deref()))
    .bind(payload.available_to_everyone)
    .bind(id)
    .execute(&mut *tx)
    .await?;

    replace_batches(&mut *tx, Scoped::Course, id, &payload.batches).await?;
    tx.commit().await?;

    Ok(Json(load_detail(&pool, id).await?))
}

/// Deletes a course, its resources and their stored files.
pub async fn delete_course(
    State(pool): State<PgPool>,
    State(storage): State<Arc<dyn ObjectStore>>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    claims.require(CONTENT_AUTHORS)?;

    let mut conn = pool.acquire().await?;
    ensure_can_edit(&mut *conn, Scoped::Course, id, &claims).await?;

    let result = sqlx::query("DELETE FROM courses WHERE id = $1")
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            tracing::error!("Failed to delete course: {:?}", e);
            AppError::InternalServerError(e.to_string())
        })?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Course not found".to_string()));
    }

    if let Err(e) = storage.delete_prefix(&format!("courses/{}", id)).await {
        tracing::warn!(course_id = id, "Course deleted but its files were not removed: {}", e);
    }

    tracing::info!(course_id = id, "Course deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Adds a resource to a course.
///
/// Multipart fields: `title`, then either `file` (stored, kind taken from the
/// content type) or `url` (an external link).
pub async fn upload_resource(
    State(pool): State<PgPool>,
    State(storage): State<Arc<dyn ObjectStore>>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    claims.require(CONTENT_AUTHORS)?;

    // The connection goes back to the pool before the body streams in.
    {
        let mut conn = pool.acquire().await?;
        ensure_can_edit(&mut *conn, Scoped::Course, id, &claims).await?;
    }

    let mut title: Option<String> = None;
    let mut link: Option<String> = None;
    let mut file: Option<(String, String, Vec<u8>)> = None;

    while let Some(field) = multipart.next_field().await? {
        let field_name = field.name().map(str::to_owned);
        match field_name.as_deref() {
            Some("title") => title = Some(field.text().await?),
            Some("url") => link = Some(field.text().await?),
            Some("file") => {
                let name = sanitize_file_name(field.file_name().unwrap_or("file"));
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let data = field.bytes().await?;
                file = Some((name, content_type, data.to_vec()));
            }
            _ => {}
        }
    }

    let title = title
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or(AppError::BadRequest("title is required".to_string()))?;

    let (kind, stored, url, content_type, size) = match (file, link) {
        (Some((name, content_type, data)), _) => {
            if data.is_empty() {
                return Err(AppError::BadRequest("Uploaded file is empty".to_string()));
            }
            let key = format!("courses/{}/{}-{}", id, Uuid::new_v4(), name);
            let stored = storage.put(&key, &content_type, &data).await?;
            (
                ResourceKind::for_upload(&stored.content_type),
                Some(stored.path),
                stored.url,
                Some(stored.content_type),
                Some(stored.size),
            )
        }
        (None, Some(link)) => {
            let parsed = url::Url::parse(link.trim())
                .map_err(|_| AppError::BadRequest(format!("'{}' is not a valid URL", link)))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(AppError::BadRequest("Links must be http or https".to_string()));
            }
            (ResourceKind::Link, None, parsed.to_string(), None, None)
        }
        (None, None) => {
            return Err(AppError::BadRequest("Either a file or a url is required".to_string()));
        }
    };

    let inserted = sqlx::query_as::<_, CourseResource>(&format!(
        "INSERT INTO course_resources (course_id, kind, title, storage_path, url, content_type, size_bytes)
         VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {}",
        RESOURCE_COLUMNS
    ))
    .bind(id)
    .bind(kind.as_str())
    .bind(&title)
    .bind(stored.as_deref())
    .bind(&url)
    .bind(content_type.as_deref())
    .bind(size)
    .fetch_one(&pool)
    .await;

    let resource = match inserted {
        Ok(resource) => resource,
        Err(e) => {
            if let Some(path) = stored.as_deref() {
                if let Err(cleanup) = storage.delete(path).await {
                    tracing::warn!("Orphaned upload {}: {}", path, cleanup);
                }
            }
            tracing::error!("Failed to save course resource: {:?}", e);
            return Err(AppError::from(e));
        }
    };

    tracing::info!(course_id = id, resource_id = resource.id, kind = kind.as_str(), "Course resource added");
    Ok((StatusCode::CREATED, Json(resource)))
}

/// Deletes one resource and its stored file.
pub async fn delete_resource(
    State(pool): State<PgPool>,
    State(storage): State<Arc<dyn ObjectStore>>,
    Extension(claims): Extension<Claims>,
    Path((id, resource_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, AppError> {
    claims.require(CONTENT_AUTHORS)?;

    let mut conn = pool.acquire().await?;
    ensure_can_edit(&mut *conn, Scoped::Course, id, &claims).await?;

    let storage_path = sqlx::query_scalar::<_, Option<String>>(
        "DELETE FROM course_resources WHERE id = $1 AND course_id = $2 RETURNING storage_path",
    )
    .bind(resource_id)
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(AppError::NotFound("Resource not found".to_string()))?;

    if let Some(path) = storage_path {
        if let Err(e) = storage.delete(&path).await {
            tracing::warn!(resource_id, "Resource deleted but file {} was not removed: {}", path, e);
        }
    }

    Ok(StatusCode::NO_CONTENT)
}
