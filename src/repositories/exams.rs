use time::PrimitiveDateTime;

use crate::db::models::Exam;

pub(crate) const COLUMNS: &str =
    "id, course_ref, title, state_id, start_at, end_at, created_at, updated_at";

pub(crate) struct CreateExam<'a> {
    pub(crate) id: &'a str,
    pub(crate) course_ref: &'a str,
    pub(crate) title: &'a str,
    pub(crate) state_id: i32,
    pub(crate) start_at: PrimitiveDateTime,
    pub(crate) end_at: PrimitiveDateTime,
    pub(crate) created_at: PrimitiveDateTime,
}

pub(crate) async fn create(
    executor: impl sqlx::PgExecutor<'_>,
    exam: CreateExam<'_>,
) -> Result<Exam, sqlx::Error> {
    sqlx::query_as::<_, Exam>(&format!(
        "INSERT INTO exams
            (id, course_ref, title, state_id, start_at, end_at, created_at, updated_at)
         VALUES ($1,$2,$3,$4,$5,$6,$7,$7)
         RETURNING {COLUMNS}"
    ))
    .bind(exam.id)
    .bind(exam.course_ref)
    .bind(exam.title)
    .bind(exam.state_id)
    .bind(exam.start_at)
    .bind(exam.end_at)
    .bind(exam.created_at)
    .fetch_one(executor)
    .await
}

pub(crate) async fn find_by_id(
    executor: impl sqlx::PgExecutor<'_>,
    id: &str,
) -> Result<Option<Exam>, sqlx::Error> {
    sqlx::query_as::<_, Exam>(&format!("SELECT {COLUMNS} FROM exams WHERE id = $1"))
        .bind(id)
        .fetch_optional(executor)
        .await
}

/// Reads the exam and holds a shared row lock until the transaction ends, so
/// state and window changes wait for it.
pub(crate) async fn find_for_share(
    executor: impl sqlx::PgExecutor<'_>,
    id: &str,
) -> Result<Option<Exam>, sqlx::Error> {
    sqlx::query_as::<_, Exam>(&format!("SELECT {COLUMNS} FROM exams WHERE id = $1 FOR SHARE"))
        .bind(id)
        .fetch_optional(executor)
        .await
}

pub(crate) async fn list_not_in_state(
    executor: impl sqlx::PgExecutor<'_>,
    state_id: i32,
) -> Result<Vec<Exam>, sqlx::Error> {
    sqlx::query_as::<_, Exam>(&format!(
        "SELECT {COLUMNS} FROM exams WHERE state_id <> $1 ORDER BY end_at"
    ))
    .bind(state_id)
    .fetch_all(executor)
    .await
}

pub(crate) async fn update_window(
    executor: impl sqlx::PgExecutor<'_>,
    id: &str,
    start_at: PrimitiveDateTime,
    end_at: PrimitiveDateTime,
    unless_state_id: i32,
    now: PrimitiveDateTime,
) -> Result<Option<Exam>, sqlx::Error> {
    sqlx::query_as::<_, Exam>(&format!(
        "UPDATE exams SET start_at = $1, end_at = $2, updated_at = $3
         WHERE id = $4 AND state_id <> $5
         RETURNING {COLUMNS}"
    ))
    .bind(start_at)
    .bind(end_at)
    .bind(now)
    .bind(id)
    .bind(unless_state_id)
    .fetch_optional(executor)
    .await
}

pub(crate) async fn update_state(
    executor: impl sqlx::PgExecutor<'_>,
    id: &str,
    state_id: i32,
    unless_state_id: i32,
    now: PrimitiveDateTime,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE exams SET state_id = $1, updated_at = $2 WHERE id = $3 AND state_id <> $4",
    )
    .bind(state_id)
    .bind(now)
    .bind(id)
    .bind(unless_state_id)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Moves the exam to `finished_state_id` only while its `end_at` is still `end_at`.
pub(crate) async fn finish_if_ends_at(
    executor: impl sqlx::PgExecutor<'_>,
    id: &str,
    finished_state_id: i32,
    end_at: PrimitiveDateTime,
    now: PrimitiveDateTime,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE exams SET state_id = $1, updated_at = $2 WHERE id = $3 AND end_at = $4",
    )
    .bind(finished_state_id)
    .bind(now)
    .bind(id)
    .bind(end_at)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub(crate) async fn delete_by_id(
    executor: impl sqlx::PgExecutor<'_>,
    id: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM exams WHERE id = $1").bind(id).execute(executor).await?;
    Ok(result.rows_affected() > 0)
}
