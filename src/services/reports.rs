// src/services/reports.rs

//! SQL for the reporting views.
//!
//! Each function returns a `QueryBuilder` with every user-supplied value bound,
//! so handlers only pick the row type and executor. Roll-ups come in pairs: the
//! page query and a count query over the same source.

use sqlx::{Postgres, QueryBuilder};

use crate::models::{
    report::{
        AttemptStats, BatchRollup, BatchRollupRow, DetailEntryRow, DetailGroup, Page, QuizRollup,
        QuizRollupRow,
    },
};

use super::scoring::rate;

/// Which batches a batch report may include.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchScope {
    All,
    /// Only batches where this user is a trainer.
    TrainerOf(i64),
}

/// Whose attempts a drill-down covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetailSource {
    Quiz(i64),
    /// Attempts by the students of a batch.
    Batch(i64),
}

/// Escapes LIKE wildcards and wraps the keyword for a substring match.
pub fn like_pattern(keyword: &str) -> String {
    let escaped = keyword
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

fn push_page(qb: &mut QueryBuilder<'static, Postgres>, page: Page) {
    qb.push(" LIMIT ");
    qb.push_bind(page.limit);
    qb.push(" OFFSET ");
    qb.push_bind(page.offset());
}

/// A student's own attempts, newest first.
pub fn own_attempts(user_id: i64, search: Option<String>, page: Page) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(
        "SELECT a.id AS attempt_id, a.quiz_id, q.name AS quiz_name, a.marks_obtained, \
         (a.quiz_snapshot->>'total_marks')::INTEGER AS total_marks, a.percentage, a.result, \
         a.time_spent_seconds, a.submitted_at ",
    );
    push_own_attempts_source(&mut qb, user_id, search);
    qb.push(" ORDER BY a.submitted_at DESC, a.id DESC");
    push_page(&mut qb, page);
    qb
}

pub fn own_attempts_count(user_id: i64, search: Option<String>) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new("SELECT COUNT(*) ");
    push_own_attempts_source(&mut qb, user_id, search);
    qb
}

fn push_own_attempts_source(qb: &mut QueryBuilder<'static, Postgres>, user_id: i64, search: Option<String>) {
    qb.push("FROM quiz_attempts a JOIN quizzes q ON q.id = a.quiz_id WHERE a.user_id = ");
    qb.push_bind(user_id);
    if let Some(keyword) = search {
        qb.push(" AND q.name ILIKE ");
        qb.push_bind(like_pattern(&keyword));
    }
}

/// Attempts grouped per quiz, newest quiz first.
pub fn quiz_rollup(search: Option<String>, page: Page) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(
        "SELECT a.quiz_id, q.name AS quiz_name, \
         COUNT(*) AS total_attempts, \
         COUNT(*) FILTER (WHERE a.result = 'pass') AS pass_count, \
         COUNT(*) FILTER (WHERE a.result = 'fail') AS fail_count, \
         MAX(a.submitted_at) AS latest_attempt_at ",
    );
    push_quiz_rollup_source(&mut qb, search);
    qb.push(" GROUP BY a.quiz_id, q.name, q.created_at ORDER BY q.created_at DESC, a.quiz_id DESC");
    push_page(&mut qb, page);
    qb
}

pub fn quiz_rollup_count(search: Option<String>) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new("SELECT COUNT(DISTINCT a.quiz_id) ");
    push_quiz_rollup_source(&mut qb, search);
    qb
}

fn push_quiz_rollup_source(qb: &mut QueryBuilder<'static, Postgres>, search: Option<String>) {
    qb.push("FROM quiz_attempts a JOIN quizzes q ON q.id = a.quiz_id WHERE TRUE");
    if let Some(keyword) = search {
        qb.push(" AND q.name ILIKE ");
        qb.push_bind(like_pattern(&keyword));
    }
}

/// Attempts by each batch's students, grouped per batch. Batches without
/// attempts drop out of the inner joins.
pub fn batch_rollup(scope: BatchScope, search: Option<String>, page: Page) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(
        "SELECT b.id AS batch_id, b.code AS batch_code, b.name AS batch_name, \
         COUNT(a.id) AS total_attempts, \
         COUNT(a.id) FILTER (WHERE a.result = 'pass') AS pass_count, \
         COUNT(a.id) FILTER (WHERE a.result = 'fail') AS fail_count, \
         MAX(a.submitted_at) AS latest_attempt_at ",
    );
    push_batch_rollup_source(&mut qb, scope, search);
    qb.push(" GROUP BY b.id, b.code, b.name, b.created_at ORDER BY b.created_at DESC, b.id DESC");
    push_page(&mut qb, page);
    qb
}

pub fn batch_rollup_count(scope: BatchScope, search: Option<String>) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new("SELECT COUNT(DISTINCT b.id) ");
    push_batch_rollup_source(&mut qb, scope, search);
    qb
}

fn push_batch_rollup_source(
    qb: &mut QueryBuilder<'static, Postgres>,
    scope: BatchScope,
    search: Option<String>,
) {
    qb.push(
        "FROM batches b \
         JOIN batch_members m ON m.batch_id = b.id AND m.role = 'student' \
         JOIN quiz_attempts a ON a.user_id = m.user_id \
         WHERE TRUE",
    );
    if let Some(keyword) = search {
        qb.push(" AND b.name ILIKE ");
        qb.push_bind(like_pattern(&keyword));
    }
    if let BatchScope::TrainerOf(trainer_id) = scope {
        qb.push(
            " AND EXISTS (SELECT 1 FROM batch_members t \
             WHERE t.batch_id = b.id AND t.role = 'trainer' AND t.user_id = ",
        );
        qb.push_bind(trainer_id);
        qb.push(")");
    }
}

/// Attempt entries with user profiles, grouped by quiz name and paginated
/// inside each group. Rows come back group by group, newest group first.
pub fn detail_entries(source: DetailSource, search: Option<String>, page: Page) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(
        "SELECT attempt_id, quiz_id, quiz_name, user_id, user_name, user_email, user_batches, \
         marks_obtained, percentage, result, time_spent_seconds, submitted_at, group_total \
         FROM (SELECT a.id AS attempt_id, a.quiz_id, q.name AS quiz_name, \
         u.id AS user_id, u.name AS user_name, u.email AS user_email, \
         COALESCE((SELECT array_agg(ub.name ORDER BY ub.name) FROM batch_members um \
         JOIN batches ub ON ub.id = um.batch_id WHERE um.user_id = u.id), ARRAY[]::TEXT[]) AS user_batches, \
         a.marks_obtained, a.percentage, a.result, a.time_spent_seconds, a.submitted_at, \
         ROW_NUMBER() OVER (PARTITION BY q.name ORDER BY a.submitted_at DESC, a.id DESC) AS row_pos, \
         COUNT(*) OVER (PARTITION BY q.name) AS group_total, \
         MAX(a.submitted_at) OVER (PARTITION BY q.name) AS group_latest \
         FROM quiz_attempts a \
         JOIN quizzes q ON q.id = a.quiz_id \
         JOIN users u ON u.id = a.user_id \
         WHERE ",
    );

    match source {
        DetailSource::Quiz(quiz_id) => {
            qb.push("a.quiz_id = ");
            qb.push_bind(quiz_id);
        }
        DetailSource::Batch(batch_id) => {
            qb.push(
                "a.user_id IN (SELECT sm.user_id FROM batch_members sm \
                 WHERE sm.role = 'student' AND sm.batch_id = ",
            );
            qb.push_bind(batch_id);
            qb.push(")");
        }
    }

    if let Some(keyword) = search {
        let pattern = like_pattern(&keyword);
        qb.push(" AND (u.name ILIKE ");
        qb.push_bind(pattern.clone());
        qb.push(" OR u.email ILIKE ");
        qb.push_bind(pattern);
        qb.push(")");
    }

    qb.push(") ranked WHERE row_pos > ");
    qb.push_bind(page.offset());
    qb.push(" AND row_pos <= ");
    qb.push_bind(page.end());
    qb.push(" ORDER BY group_latest DESC, quiz_name, row_pos");
    qb
}

pub fn stats(total: i64, pass: i64, fail: i64) -> AttemptStats {
    AttemptStats {
        total_attempts: total,
        pass_count: pass,
        fail_count: fail,
        pass_percentage: rate(pass, total),
        fail_percentage: rate(fail, total),
    }
}

impl From<QuizRollupRow> for QuizRollup {
    fn from(row: QuizRollupRow) -> Self {
        QuizRollup {
            quiz_id: row.quiz_id,
            quiz_name: row.quiz_name,
            stats: stats(row.total_attempts, row.pass_count, row.fail_count),
            latest_attempt_at: row.latest_attempt_at,
        }
    }
}

impl From<BatchRollupRow> for BatchRollup {
    fn from(row: BatchRollupRow) -> Self {
        BatchRollup {
            batch_id: row.batch_id,
            batch_code: row.batch_code,
            batch_name: row.batch_name,
            stats: stats(row.total_attempts, row.pass_count, row.fail_count),
            latest_attempt_at: row.latest_attempt_at,
        }
    }
}

/// Folds ordered detail rows into one group per quiz name, keeping row order.
pub fn group_entries(rows: Vec<DetailEntryRow>, page: Page) -> Vec<DetailGroup> {
    let mut groups: Vec<DetailGroup> = Vec::new();
    for row in rows {
        match groups.last_mut() {
            Some(group) if group.quiz_name == row.quiz_name => group.entries.push(row),
            _ => groups.push(DetailGroup {
                quiz_id: row.quiz_id,
                quiz_name: row.quiz_name.clone(),
                page: page.page,
                limit: page.limit,
                total: row.group_total,
                entries: vec![row],
            }),
        }
    }
    groups
}
