// src/services/membership.rs

//! User ↔ batch membership.
//!
//! `batch_members` is the only place membership is stored; a batch's student
//! and trainer lists and a user's batch list are both read from it, so the two
//! sides cannot drift apart. Every multi-step change runs inside one
//! transaction.

use std::collections::BTreeSet;

use serde::Serialize;
use sqlx::{PgConnection, PgPool};

use crate::{
    error::AppError,
    models::user::{MemberRole, Role},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToggleOutcome {
    Joined,
    Left,
}

/// Adds the user to the batch under `role`, or removes them if already there.
///
/// The user's row is locked for the duration, so concurrent toggles for the
/// same user are applied one after the other.
pub async fn toggle_membership(
    pool: &PgPool,
    batch_id: i64,
    user_id: i64,
    role: MemberRole,
) -> Result<ToggleOutcome, AppError> {
    let mut tx = pool.begin().await?;

    sqlx::query_scalar::<_, i64>("SELECT id FROM batches WHERE id = $1")
        .bind(batch_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::NotFound("Batch not found".to_string()))?;

    let user_role = sqlx::query_scalar::<_, String>("SELECT role FROM users WHERE id = $1 FOR UPDATE")
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::NotFound("User not found".to_string()))?;
    let user_role =
        Role::try_from(user_role).map_err(|e| AppError::InternalServerError(e.to_string()))?;

    if user_role.member_role() != Some(role) {
        return Err(AppError::BadRequest(format!(
            "User is a {}, cannot be a {} of a batch",
            user_role, role
        )));
    }

    let removed = sqlx::query(
        "DELETE FROM batch_members WHERE batch_id = $1 AND user_id = $2 AND role = $3",
    )
    .bind(batch_id)
    .bind(user_id)
    .bind(role.as_str())
    .execute(&mut *tx)
    .await?
    .rows_affected();

    let outcome = if removed > 0 {
        ToggleOutcome::Left
    } else {
        sqlx::query(
            "INSERT INTO batch_members (batch_id, user_id, role) VALUES ($1, $2, $3)
             ON CONFLICT DO NOTHING",
        )
        .bind(batch_id)
        .bind(user_id)
        .bind(role.as_str())
        .execute(&mut *tx)
        .await?;
        ToggleOutcome::Joined
    };

    tx.commit().await?;

    tracing::info!(batch_id, user_id, role = %role, outcome = ?outcome, "Batch membership toggled");
    Ok(outcome)
}

/// Membership changes needed to move a user to a new role and batch set.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MembershipPlan {
    pub remove: Vec<(i64, MemberRole)>,
    pub add: Vec<(i64, MemberRole)>,
}

impl MembershipPlan {
    pub fn is_empty(&self) -> bool {
        self.remove.is_empty() && self.add.is_empty()
    }
}

/// Plans the membership changes for a user edit.
///
/// * Staff roles end up in no batch at all.
/// * On a role change every current membership is dropped and the requested
///   batches are joined under the new role.
/// * Otherwise only the difference is applied; batches in both sets are untouched.
pub fn plan_user_batches(
    old_role: Role,
    current: &[(i64, MemberRole)],
    new_role: Role,
    requested: &[i64],
) -> MembershipPlan {
    let current_set: BTreeSet<(i64, MemberRole)> = current.iter().copied().collect();

    let Some(member_role) = new_role.member_role() else {
        return MembershipPlan {
            remove: current_set.into_iter().collect(),
            add: Vec::new(),
        };
    };
    let target: BTreeSet<i64> = requested.iter().copied().collect();

    if old_role != new_role {
        return MembershipPlan {
            remove: current_set.into_iter().collect(),
            add: target.into_iter().map(|b| (b, member_role)).collect(),
        };
    }

    let remove = current_set
        .iter()
        .filter(|(batch, role)| *role != member_role || !target.contains(batch))
        .copied()
        .collect();
    let add = target
        .iter()
        .filter(|batch| !current_set.contains(&(**batch, member_role)))
        .map(|b| (*b, member_role))
        .collect();

    MembershipPlan { remove, add }
}

/// Current memberships of a user.
pub async fn user_memberships(
    conn: &mut PgConnection,
    user_id: i64,
) -> Result<Vec<(i64, MemberRole)>, AppError> {
    let rows = sqlx::query_as::<_, (i64, String)>(
        "SELECT batch_id, role FROM batch_members WHERE user_id = $1 ORDER BY batch_id",
    )
    .bind(user_id)
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter()
        .map(|(batch_id, role)| {
            MemberRole::try_from(role)
                .map(|r| (batch_id, r))
                .map_err(|e| AppError::InternalServerError(e.to_string()))
        })
        .collect()
}

/// Fails with `NotFound` naming the first id that has no batch.
pub async fn ensure_batches_exist(conn: &mut PgConnection, batch_ids: &[i64]) -> Result<(), AppError> {
    if batch_ids.is_empty() {
        return Ok(());
    }

    let found: BTreeSet<i64> =
        sqlx::query_scalar::<_, i64>("SELECT id FROM batches WHERE id = ANY($1)")
            .bind(batch_ids.to_vec())
            .fetch_all(&mut *conn)
            .await?
            .into_iter()
            .collect();

    match batch_ids.iter().find(|id| !found.contains(id)) {
        Some(missing) => Err(AppError::NotFound(format!("Batch {} not found", missing))),
        None => Ok(()),
    }
}

/// Applies a plan inside the caller's transaction.
pub async fn apply_plan(
    conn: &mut PgConnection,
    user_id: i64,
    plan: &MembershipPlan,
) -> Result<(), AppError> {
    let added: Vec<i64> = plan.add.iter().map(|(b, _)| *b).collect();
    ensure_batches_exist(conn, &added).await?;

    for (batch_id, role) in &plan.remove {
        sqlx::query("DELETE FROM batch_members WHERE batch_id = $1 AND user_id = $2 AND role = $3")
            .bind(batch_id)
            .bind(user_id)
            .bind(role.as_str())
            .execute(&mut *conn)
            .await?;
    }

    for (batch_id, role) in &plan.add {
        sqlx::query(
            "INSERT INTO batch_members (batch_id, user_id, role) VALUES ($1, $2, $3)
             ON CONFLICT DO NOTHING",
        )
        .bind(batch_id)
        .bind(user_id)
        .bind(role.as_str())
        .execute(&mut *conn)
        .await?;
    }

    if !plan.is_empty() {
        tracing::debug!(
            user_id,
            removed = plan.remove.len(),
            added = plan.add.len(),
            "Batch memberships reconciled"
        );
    }
    Ok(())
}

/// Refuses deletion while any quiz, course or member still points at the batch.
/// The error names the first blocker found, checked in that order.
pub async fn ensure_batch_deletable(conn: &mut PgConnection, batch_id: i64) -> Result<(), AppError> {
    let quiz = sqlx::query_scalar::<_, String>(
        "SELECT q.name FROM quiz_batches qb JOIN quizzes q ON q.id = qb.quiz_id
         WHERE qb.batch_id = $1 ORDER BY q.id LIMIT 1",
    )
    .bind(batch_id)
    .fetch_optional(&mut *conn)
    .await?;
    if let Some(name) = quiz {
        return Err(AppError::Conflict(format!(
            "Batch is assigned to quiz '{}'",
            name
        )));
    }

    let course = sqlx::query_scalar::<_, String>(
        "SELECT c.title FROM course_batches cb JOIN courses c ON c.id = cb.course_id
         WHERE cb.batch_id = $1 ORDER BY c.id LIMIT 1",
    )
    .bind(batch_id)
    .fetch_optional(&mut *conn)
    .await?;
    if let Some(title) = course {
        return Err(AppError::Conflict(format!(
            "Batch is assigned to course '{}'",
            title
        )));
    }

    let member = sqlx::query_scalar::<_, String>(
        "SELECT u.email FROM batch_members m JOIN users u ON u.id = m.user_id
         WHERE m.batch_id = $1 ORDER BY u.id LIMIT 1",
    )
    .bind(batch_id)
    .fetch_optional(&mut *conn)
    .await?;
    if let Some(email) = member {
        return Err(AppError::Conflict(format!(
            "Batch still has member '{}'",
            email
        )));
    }

    Ok(())
}

/// Deletes a batch once nothing references it.
pub async fn delete_batch(pool: &PgPool, batch_id: i64) -> Result<(), AppError> {
    let mut tx = pool.begin().await?;

    sqlx::query_scalar::<_, i64>("SELECT id FROM batches WHERE id = $1 FOR UPDATE")
        .bind(batch_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::NotFound("Batch not found".to_string()))?;

    ensure_batch_deletable(&mut *tx, batch_id).await?;

    sqlx::query("DELETE FROM batches WHERE id = $1")
        .bind(batch_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    tracing::info!(batch_id, "Batch deleted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: i64 = 1;
    const B: i64 = 2;
    const C: i64 = 3;

    #[test]
    fn student_batch_edit_applies_difference_only() {
        let current = [(A, MemberRole::Student), (B, MemberRole::Student)];
        let plan = plan_user_batches(Role::Student, &current, Role::Student, &[B, C]);

        assert_eq!(plan.remove, vec![(A, MemberRole::Student)]);
        assert_eq!(plan.add, vec![(C, MemberRole::Student)]);
    }

    #[test]
    fn unchanged_set_is_a_no_op() {
        let current = [(A, MemberRole::Trainer)];
        let plan = plan_user_batches(Role::Trainer, &current, Role::Trainer, &[A]);
        assert!(plan.is_empty());
    }

    #[test]
    fn role_change_moves_every_membership() {
        let current = [(A, MemberRole::Student), (B, MemberRole::Student)];
        let plan = plan_user_batches(Role::Student, &current, Role::Trainer, &[B]);

        assert_eq!(
            plan.remove,
            vec![(A, MemberRole::Student), (B, MemberRole::Student)]
        );
        assert_eq!(plan.add, vec![(B, MemberRole::Trainer)]);
    }

    #[test]
    fn promotion_to_staff_clears_batches() {
        let current = [(A, MemberRole::Trainer), (C, MemberRole::Trainer)];
        let plan = plan_user_batches(Role::Trainer, &current, Role::Admin, &[A, B]);

        assert_eq!(
            plan.remove,
            vec![(A, MemberRole::Trainer), (C, MemberRole::Trainer)]
        );
        assert!(plan.add.is_empty());
    }

    #[test]
    fn new_user_joins_requested_batches_once() {
        let plan = plan_user_batches(Role::Student, &[], Role::Student, &[C, A, C]);
        assert!(plan.remove.is_empty());
        assert_eq!(plan.add, vec![(A, MemberRole::Student), (C, MemberRole::Student)]);
    }

    #[test]
    fn stray_membership_under_other_role_is_dropped() {
        let current = [(A, MemberRole::Trainer), (B, MemberRole::Student)];
        let plan = plan_user_batches(Role::Student, &current, Role::Student, &[A, B]);

        assert_eq!(plan.remove, vec![(A, MemberRole::Trainer)]);
        assert_eq!(plan.add, vec![(A, MemberRole::Student)]);
    }
}
