use time::PrimitiveDateTime;

use crate::db::models::QuestionExecution;

pub(crate) const COLUMNS: &str = "id, execution_id, question_id, answer_id, answered_at";

pub(crate) struct UpsertAnswer<'a> {
    pub(crate) id: &'a str,
    pub(crate) execution_id: &'a str,
    pub(crate) question_id: &'a str,
    pub(crate) answer_id: &'a str,
    pub(crate) answered_at: PrimitiveDateTime,
}

pub(crate) async fn upsert_answer(
    executor: impl sqlx::PgExecutor<'_>,
    answer: UpsertAnswer<'_>,
) -> Result<QuestionExecution, sqlx::Error> {
    sqlx::query_as::<_, QuestionExecution>(&format!(
        "INSERT INTO question_executions (id, execution_id, question_id, answer_id, answered_at)
         VALUES ($1,$2,$3,$4,$5)
         ON CONFLICT (execution_id, question_id)
         DO UPDATE SET answer_id = EXCLUDED.answer_id, answered_at = EXCLUDED.answered_at
         RETURNING {COLUMNS}"
    ))
    .bind(answer.id)
    .bind(answer.execution_id)
    .bind(answer.question_id)
    .bind(answer.answer_id)
    .bind(answer.answered_at)
    .fetch_one(executor)
    .await
}

pub(crate) async fn list_by_execution(
    executor: impl sqlx::PgExecutor<'_>,
    execution_id: &str,
) -> Result<Vec<QuestionExecution>, sqlx::Error> {
    sqlx::query_as::<_, QuestionExecution>(&format!(
        "SELECT {COLUMNS} FROM question_executions
         WHERE execution_id = $1
         ORDER BY question_id"
    ))
    .bind(execution_id)
    .fetch_all(executor)
    .await
}
