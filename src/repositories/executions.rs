use time::PrimitiveDateTime;

use crate::db::models::Execution;
use crate::db::types::CloseReason;

pub(crate) const COLUMNS: &str = "id, exam_id, user_id, started_at, ended_at, close_reason";

pub(crate) struct CreateExecution<'a> {
    pub(crate) id: &'a str,
    pub(crate) exam_id: &'a str,
    pub(crate) user_id: &'a str,
    pub(crate) started_at: PrimitiveDateTime,
}

/// Inserts an open execution. Returns `None` when the partial unique index
/// `ux_executions_one_open_per_user` already holds an open row for the pair.
pub(crate) async fn insert_open(
    executor: impl sqlx::PgExecutor<'_>,
    execution: CreateExecution<'_>,
) -> Result<Option<Execution>, sqlx::Error> {
    sqlx::query_as::<_, Execution>(&format!(
        "INSERT INTO executions (id, exam_id, user_id, started_at, ended_at, close_reason)
         VALUES ($1,$2,$3,$4,NULL,NULL)
         ON CONFLICT DO NOTHING
         RETURNING {COLUMNS}"
    ))
    .bind(execution.id)
    .bind(execution.exam_id)
    .bind(execution.user_id)
    .bind(execution.started_at)
    .fetch_optional(executor)
    .await
}

pub(crate) async fn find_by_id(
    executor: impl sqlx::PgExecutor<'_>,
    id: &str,
) -> Result<Option<Execution>, sqlx::Error> {
    sqlx::query_as::<_, Execution>(&format!("SELECT {COLUMNS} FROM executions WHERE id = $1"))
        .bind(id)
        .fetch_optional(executor)
        .await
}

pub(crate) async fn find_open(
    executor: impl sqlx::PgExecutor<'_>,
    exam_id: &str,
    user_id: &str,
) -> Result<Option<Execution>, sqlx::Error> {
    sqlx::query_as::<_, Execution>(&format!(
        "SELECT {COLUMNS} FROM executions
         WHERE exam_id = $1 AND user_id = $2 AND ended_at IS NULL"
    ))
    .bind(exam_id)
    .bind(user_id)
    .fetch_optional(executor)
    .await
}

pub(crate) async fn list_open_by_exam(
    executor: impl sqlx::PgExecutor<'_>,
    exam_id: &str,
) -> Result<Vec<Execution>, sqlx::Error> {
    sqlx::query_as::<_, Execution>(&format!(
        "SELECT {COLUMNS} FROM executions
         WHERE exam_id = $1 AND ended_at IS NULL
         ORDER BY started_at"
    ))
    .bind(exam_id)
    .fetch_all(executor)
    .await
}

/// Closes the execution if it is still open. `None` means it was already closed or missing.
pub(crate) async fn close_if_open(
    executor: impl sqlx::PgExecutor<'_>,
    id: &str,
    ended_at: PrimitiveDateTime,
    reason: CloseReason,
) -> Result<Option<Execution>, sqlx::Error> {
    sqlx::query_as::<_, Execution>(&format!(
        "UPDATE executions SET ended_at = $1, close_reason = $2
         WHERE id = $3 AND ended_at IS NULL
         RETURNING {COLUMNS}"
    ))
    .bind(ended_at)
    .bind(reason)
    .bind(id)
    .fetch_optional(executor)
    .await
}

/// Takes a shared row lock for the rest of the transaction. The outer `Option`
/// is `None` when the execution does not exist; the inner one is its `ended_at`.
pub(crate) async fn lock_shared_ended_at(
    executor: impl sqlx::PgExecutor<'_>,
    id: &str,
) -> Result<Option<Option<PrimitiveDateTime>>, sqlx::Error> {
    sqlx::query_scalar::<_, Option<PrimitiveDateTime>>(
        "SELECT ended_at FROM executions WHERE id = $1 FOR SHARE",
    )
    .bind(id)
    .fetch_optional(executor)
    .await
}
