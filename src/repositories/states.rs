use crate::db::models::ExamState;
use crate::db::types::StateName;

pub(crate) async fn list(
    executor: impl sqlx::PgExecutor<'_>,
) -> Result<Vec<ExamState>, sqlx::Error> {
    sqlx::query_as::<_, ExamState>("SELECT id, name FROM exam_states ORDER BY id")
        .fetch_all(executor)
        .await
}

/// Inserts any missing state rows; existing ids are never renumbered.
pub(crate) async fn seed(
    executor: impl sqlx::PgExecutor<'_>,
    states: &[(i32, StateName)],
) -> Result<u64, sqlx::Error> {
    let ids: Vec<i32> = states.iter().map(|(id, _)| *id).collect();
    let names: Vec<String> = states.iter().map(|(_, name)| name.as_str().to_string()).collect();

    let result = sqlx::query(
        "INSERT INTO exam_states (id, name)
         SELECT * FROM UNNEST($1::int4[], $2::text[])
         ON CONFLICT DO NOTHING",
    )
    .bind(ids)
    .bind(names)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}
