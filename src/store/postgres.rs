use async_trait::async_trait;
use sqlx::PgPool;
use time::PrimitiveDateTime;

use super::{
    CloseOutcome, ExamStore, ExecutionStore, JobStore, NewAnswer, NewExam, NewExecution,
    OpenOutcome, RecordOutcome, StoreError,
};
use crate::db::models::{Exam, ExamState, Execution, LifecycleJob, QuestionExecution};
use crate::db::types::{CloseReason, StateName};
use crate::repositories;

const OPEN_INSERT_ATTEMPTS: usize = 3;

/// PostgreSQL-backed store. The one-open-execution rule is the partial unique
/// index on `executions (exam_id, user_id) WHERE ended_at IS NULL`.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExamStore for PgStore {
    async fn seed_states(&self, states: &[(i32, StateName)]) -> Result<(), StoreError> {
        let inserted = repositories::states::seed(&self.pool, states).await?;
        if inserted > 0 {
            tracing::info!(inserted, "Seeded exam states");
        }
        Ok(())
    }

    async fn list_states(&self) -> Result<Vec<ExamState>, StoreError> {
        Ok(repositories::states::list(&self.pool).await?)
    }

    async fn insert_exam(&self, exam: NewExam) -> Result<Exam, StoreError> {
        Ok(repositories::exams::create(
            &self.pool,
            repositories::exams::CreateExam {
                id: &exam.id,
                course_ref: &exam.course_ref,
                title: &exam.title,
                state_id: exam.state_id,
                start_at: exam.start_at,
                end_at: exam.end_at,
                created_at: exam.created_at,
            },
        )
        .await?)
    }

    async fn find_exam(&self, exam_id: &str) -> Result<Option<Exam>, StoreError> {
        Ok(repositories::exams::find_by_id(&self.pool, exam_id).await?)
    }

    async fn list_exams_not_in_state(&self, state_id: i32) -> Result<Vec<Exam>, StoreError> {
        Ok(repositories::exams::list_not_in_state(&self.pool, state_id).await?)
    }

    async fn update_exam_window(
        &self,
        exam_id: &str,
        start_at: PrimitiveDateTime,
        end_at: PrimitiveDateTime,
        unless_state_id: i32,
        now: PrimitiveDateTime,
    ) -> Result<Option<Exam>, StoreError> {
        Ok(repositories::exams::update_window(
            &self.pool,
            exam_id,
            start_at,
            end_at,
            unless_state_id,
            now,
        )
        .await?)
    }

    async fn update_exam_state(
        &self,
        exam_id: &str,
        state_id: i32,
        unless_state_id: i32,
        now: PrimitiveDateTime,
    ) -> Result<bool, StoreError> {
        Ok(repositories::exams::update_state(&self.pool, exam_id, state_id, unless_state_id, now)
            .await?)
    }

    async fn finish_exam(
        &self,
        exam_id: &str,
        finished_state_id: i32,
        end_at: PrimitiveDateTime,
        now: PrimitiveDateTime,
    ) -> Result<bool, StoreError> {
        Ok(repositories::exams::finish_if_ends_at(
            &self.pool,
            exam_id,
            finished_state_id,
            end_at,
            now,
        )
        .await?)
    }

    async fn delete_exam(&self, exam_id: &str) -> Result<bool, StoreError> {
        Ok(repositories::exams::delete_by_id(&self.pool, exam_id).await?)
    }
}

#[async_trait]
impl JobStore for PgStore {
    async fn upsert_jobs(&self, jobs: &[LifecycleJob]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for job in jobs {
            repositories::lifecycle_jobs::upsert(&mut *tx, job).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn find_job(&self, key: &str) -> Result<Option<LifecycleJob>, StoreError> {
        Ok(repositories::lifecycle_jobs::find_by_key(&self.pool, key).await?)
    }

    async fn delete_jobs(&self, keys: &[String]) -> Result<(), StoreError> {
        repositories::lifecycle_jobs::delete_keys(&self.pool, keys).await?;
        Ok(())
    }

    async fn complete_job(
        &self,
        key: &str,
        fire_at: PrimitiveDateTime,
    ) -> Result<bool, StoreError> {
        Ok(repositories::lifecycle_jobs::delete_if_matches(&self.pool, key, fire_at).await?)
    }

    async fn list_due_jobs(
        &self,
        now: PrimitiveDateTime,
        limit: i64,
    ) -> Result<Vec<LifecycleJob>, StoreError> {
        Ok(repositories::lifecycle_jobs::list_due(&self.pool, now, limit).await?)
    }
}

#[async_trait]
impl ExecutionStore for PgStore {
    async fn insert_open_execution(
        &self,
        execution: NewExecution,
    ) -> Result<OpenOutcome, StoreError> {
        // The conflicting open row can close between the insert and the lookup;
        // in that case the insert is simply attempted again.
        for _ in 0..OPEN_INSERT_ATTEMPTS {
            let mut tx = self.pool.begin().await?;

            // Held until commit: `finish_exam` waits for this insert, and the end
            // action's scan that follows it sees the new row.
            let exam = repositories::exams::find_for_share(&mut *tx, &execution.exam_id).await?;
            let accepts = exam.as_ref().is_some_and(|exam| {
                exam.accepts_executions_at(execution.active_state_id, execution.started_at)
            });
            if !accepts {
                tx.rollback().await?;
                return Ok(OpenOutcome::Rejected(exam));
            }

            let inserted = repositories::executions::insert_open(
                &mut *tx,
                repositories::executions::CreateExecution {
                    id: &execution.id,
                    exam_id: &execution.exam_id,
                    user_id: &execution.user_id,
                    started_at: execution.started_at,
                },
            )
            .await?;

            if let Some(created) = inserted {
                tx.commit().await?;
                return Ok(OpenOutcome::Created(created));
            }

            let existing = repositories::executions::find_open(
                &mut *tx,
                &execution.exam_id,
                &execution.user_id,
            )
            .await?;
            tx.rollback().await?;
            if let Some(existing) = existing {
                return Ok(OpenOutcome::AlreadyOpen(existing));
            }
        }

        Err(StoreError::Contention(format!(
            "open execution for exam {} and user {} kept changing",
            execution.exam_id, execution.user_id
        )))
    }

    async fn find_execution(&self, execution_id: &str) -> Result<Option<Execution>, StoreError> {
        Ok(repositories::executions::find_by_id(&self.pool, execution_id).await?)
    }

    async fn find_open_execution(
        &self,
        exam_id: &str,
        user_id: &str,
    ) -> Result<Option<Execution>, StoreError> {
        Ok(repositories::executions::find_open(&self.pool, exam_id, user_id).await?)
    }

    async fn list_open_executions(&self, exam_id: &str) -> Result<Vec<Execution>, StoreError> {
        Ok(repositories::executions::list_open_by_exam(&self.pool, exam_id).await?)
    }

    async fn close_execution(
        &self,
        execution_id: &str,
        ended_at: PrimitiveDateTime,
        reason: CloseReason,
    ) -> Result<Option<CloseOutcome>, StoreError> {
        if let Some(closed) =
            repositories::executions::close_if_open(&self.pool, execution_id, ended_at, reason)
                .await?
        {
            return Ok(Some(CloseOutcome::Closed(closed)));
        }

        Ok(repositories::executions::find_by_id(&self.pool, execution_id)
            .await?
            .map(CloseOutcome::AlreadyClosed))
    }

    async fn record_answer(&self, answer: NewAnswer) -> Result<RecordOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        let ended_at =
            repositories::executions::lock_shared_ended_at(&mut *tx, &answer.execution_id).await?;
        match ended_at {
            None => {
                tx.rollback().await?;
                return Ok(RecordOutcome::ExecutionNotFound);
            }
            Some(Some(_)) => {
                tx.rollback().await?;
                return Ok(RecordOutcome::ExecutionClosed);
            }
            Some(None) => {}
        }

        let stored = repositories::question_executions::upsert_answer(
            &mut *tx,
            repositories::question_executions::UpsertAnswer {
                id: &answer.id,
                execution_id: &answer.execution_id,
                question_id: &answer.question_id,
                answer_id: &answer.answer_id,
                answered_at: answer.answered_at,
            },
        )
        .await?;

        tx.commit().await?;
        Ok(RecordOutcome::Recorded(stored))
    }

    async fn list_answers(
        &self,
        execution_id: &str,
    ) -> Result<Vec<QuestionExecution>, StoreError> {
        Ok(repositories::question_executions::list_by_execution(&self.pool, execution_id).await?)
    }
}
