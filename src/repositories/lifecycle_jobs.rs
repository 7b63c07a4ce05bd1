use time::PrimitiveDateTime;

use crate::db::models::LifecycleJob;

pub(crate) const COLUMNS: &str = "key, exam_id, kind, fire_at, created_at";

pub(crate) async fn upsert(
    executor: impl sqlx::PgExecutor<'_>,
    job: &LifecycleJob,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO lifecycle_jobs (key, exam_id, kind, fire_at, created_at)
         VALUES ($1,$2,$3,$4,$5)
         ON CONFLICT (key)
         DO UPDATE SET exam_id = EXCLUDED.exam_id,
                       kind = EXCLUDED.kind,
                       fire_at = EXCLUDED.fire_at,
                       created_at = EXCLUDED.created_at",
    )
    .bind(&job.key)
    .bind(&job.exam_id)
    .bind(job.kind)
    .bind(job.fire_at)
    .bind(job.created_at)
    .execute(executor)
    .await?;
    Ok(())
}

pub(crate) async fn find_by_key(
    executor: impl sqlx::PgExecutor<'_>,
    key: &str,
) -> Result<Option<LifecycleJob>, sqlx::Error> {
    sqlx::query_as::<_, LifecycleJob>(&format!(
        "SELECT {COLUMNS} FROM lifecycle_jobs WHERE key = $1"
    ))
    .bind(key)
    .fetch_optional(executor)
    .await
}

pub(crate) async fn delete_keys(
    executor: impl sqlx::PgExecutor<'_>,
    keys: &[String],
) -> Result<u64, sqlx::Error> {
    if keys.is_empty() {
        return Ok(0);
    }

    let result = sqlx::query("DELETE FROM lifecycle_jobs WHERE key = ANY($1)")
        .bind(keys)
        .execute(executor)
        .await?;
    Ok(result.rows_affected())
}

/// Deletes the row only if it still describes the same firing.
pub(crate) async fn delete_if_matches(
    executor: impl sqlx::PgExecutor<'_>,
    key: &str,
    fire_at: PrimitiveDateTime,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM lifecycle_jobs WHERE key = $1 AND fire_at = $2")
        .bind(key)
        .bind(fire_at)
        .execute(executor)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub(crate) async fn list_due(
    executor: impl sqlx::PgExecutor<'_>,
    now: PrimitiveDateTime,
    limit: i64,
) -> Result<Vec<LifecycleJob>, sqlx::Error> {
    sqlx::query_as::<_, LifecycleJob>(&format!(
        "SELECT {COLUMNS} FROM lifecycle_jobs
         WHERE fire_at <= $1
         ORDER BY fire_at
         LIMIT $2"
    ))
    .bind(now)
    .bind(limit.clamp(1, 1000))
    .fetch_all(executor)
    .await
}
