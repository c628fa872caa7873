// src/services/access.rs

//! Who may see and who may change courses and quizzes.

use sqlx::{PgConnection, Postgres, QueryBuilder};

use crate::{error::AppError, models::user::Role, utils::jwt::Claims};

/// Content scoped to batches through a link table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scoped {
    Course,
    Quiz,
}

impl Scoped {
    fn table(&self) -> &'static str {
        match self {
            Scoped::Course => "courses",
            Scoped::Quiz => "quizzes",
        }
    }

    fn link(&self) -> (&'static str, &'static str) {
        match self {
            Scoped::Course => ("course_batches", "course_id"),
            Scoped::Quiz => ("quiz_batches", "quiz_id"),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Scoped::Course => "Course",
            Scoped::Quiz => "Quiz",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Viewer {
    pub user_id: i64,
    pub role: Role,
}

impl Viewer {
    pub fn from_claims(claims: &Claims) -> Result<Self, AppError> {
        Ok(Viewer {
            user_id: claims.user_id()?,
            role: claims.role,
        })
    }
}

/// Appends ` AND <visible>` for rows of `kind` aliased as `alias`.
///
/// Staff see everything. Others see rows open to everyone or linked to one of
/// their batches; trainers also see what they authored.
pub fn push_visible(qb: &mut QueryBuilder<'static, Postgres>, kind: Scoped, alias: &str, viewer: Viewer) {
    if viewer.role.is_staff() {
        return;
    }
    let (link_table, link_col) = kind.link();

    qb.push(format!(" AND ({alias}.available_to_everyone OR EXISTS (SELECT 1 FROM {link_table} l \
         JOIN batch_members bm ON bm.batch_id = l.batch_id \
         WHERE l.{link_col} = {alias}.id AND bm.user_id = "));
    qb.push_bind(viewer.user_id);
    qb.push(")");
    if viewer.role == Role::Trainer {
        qb.push(format!(" OR {alias}.created_by = "));
        qb.push_bind(viewer.user_id);
    }
    qb.push(")");
}

/// `NotFound` unless the row exists and the viewer may see it.
pub async fn ensure_visible(conn: &mut PgConnection, kind: Scoped, id: i64, viewer: Viewer) -> Result<(), AppError> {
    let mut qb = QueryBuilder::new(format!("SELECT t.id FROM {} t WHERE t.id = ", kind.table()));
    qb.push_bind(id);
    push_visible(&mut qb, kind, "t", viewer);

    qb.build_query_scalar::<i64>()
        .fetch_optional(&mut *conn)
        .await?
        .map(|_| ())
        .ok_or(AppError::NotFound(format!("{} not found", kind.label())))
}

/// Staff may change any row; trainers only what they created.
pub async fn ensure_can_edit(conn: &mut PgConnection, kind: Scoped, id: i64, claims: &Claims) -> Result<(), AppError> {
    let created_by = sqlx::query_scalar::<_, Option<i64>>(&format!(
        "SELECT created_by FROM {} WHERE id = $1",
        kind.table()
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(AppError::NotFound(format!("{} not found", kind.label())))?;

    if claims.role.is_staff() || (claims.role == Role::Trainer && created_by == Some(claims.user_id()?)) {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "You are not allowed to modify this {}",
            kind.label().to_lowercase()
        )))
    }
}

/// Replaces the batch links of a course or quiz.
pub async fn replace_batches(conn: &mut PgConnection, kind: Scoped, id: i64, batches: &[i64]) -> Result<(), AppError> {
    super::membership::ensure_batches_exist(&mut *conn, batches).await?;

    let (link_table, link_col) = kind.link();
    sqlx::query(&format!("DELETE FROM {link_table} WHERE {link_col} = $1"))
        .bind(id)
        .execute(&mut *conn)
        .await?;

    if !batches.is_empty() {
        sqlx::query(&format!(
            "INSERT INTO {link_table} ({link_col}, batch_id) SELECT $1, b FROM UNNEST($2::BIGINT[]) AS b
             ON CONFLICT DO NOTHING"
        ))
        .bind(id)
        .bind(batches.to_vec())
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Batch ids linked to a course or quiz.
pub async fn linked_batches(conn: &mut PgConnection, kind: Scoped, id: i64) -> Result<Vec<i64>, AppError> {
    let (link_table, link_col) = kind.link();
    let batches = sqlx::query_scalar::<_, i64>(&format!(
        "SELECT batch_id FROM {link_table} WHERE {link_col} = $1 ORDER BY batch_id"
    ))
    .bind(id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(batches)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sql(kind: Scoped, role: Role) -> String {
        let mut qb = QueryBuilder::new("SELECT c.id FROM courses c WHERE TRUE");
        push_visible(&mut qb, kind, "c", Viewer { user_id: 9, role });
        qb.sql().to_string()
    }

    #[test]
    fn staff_see_everything() {
        assert_eq!(sql(Scoped::Course, Role::Admin), "SELECT c.id FROM courses c WHERE TRUE");
    }

    #[test]
    fn students_are_scoped_to_their_batches() {
        let sql = sql(Scoped::Course, Role::Student);
        assert!(sql.contains("c.available_to_everyone OR EXISTS"));
        assert!(sql.contains("FROM course_batches l"));
        assert!(!sql.contains("created_by"));
    }

    #[test]
    fn trainers_also_see_their_own() {
        let sql = sql(Scoped::Quiz, Role::Trainer);
        assert!(sql.contains("FROM quiz_batches l"));
        assert!(sql.contains("l.quiz_id = c.id"));
        assert!(sql.contains("OR c.created_by = $2"));
    }
}
