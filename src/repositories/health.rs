use sqlx::PgPool;
use time::PrimitiveDateTime;

/// Number of lifecycle jobs already past their `fire_at`. Doubles as a connectivity check.
pub(crate) async fn overdue_jobs(
    pool: &PgPool,
    now: PrimitiveDateTime,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM lifecycle_jobs WHERE fire_at <= $1")
        .bind(now)
        .fetch_one(pool)
        .await
}
