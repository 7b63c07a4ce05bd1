use std::sync::Arc;

use uuid::Uuid;

use crate::core::time::primitive_now_utc;
use crate::db::models::QuestionExecution;
use crate::lifecycle::{LifecycleError, RetryPolicy};
use crate::store::{ExecutionStore, NewAnswer, RecordOutcome};

/// Last-write-wins answer storage against open executions.
#[derive(Clone)]
pub struct AnswerRecorder {
    executions: Arc<dyn ExecutionStore>,
    retry: RetryPolicy,
}

impl AnswerRecorder {
    pub fn new(executions: Arc<dyn ExecutionStore>, retry: RetryPolicy) -> Self {
        Self { executions, retry }
    }

    /// Stores `answer_id` as the selection for `question_id`. Answer membership
    /// in the question is not checked here.
    pub async fn record(
        &self,
        execution_id: &str,
        question_id: &str,
        answer_id: &str,
    ) -> Result<QuestionExecution, LifecycleError> {
        let answer = NewAnswer {
            id: Uuid::new_v4().to_string(),
            execution_id: execution_id.to_string(),
            question_id: question_id.to_string(),
            answer_id: answer_id.to_string(),
            answered_at: primitive_now_utc(),
        };

        let outcome = self
            .retry
            .run("record_answer", || self.executions.record_answer(answer.clone()))
            .await?;

        match outcome {
            RecordOutcome::Recorded(row) => {
                tracing::debug!(execution_id, question_id, "Answer recorded");
                metrics::counter!("answers_recorded_total").increment(1);
                Ok(row)
            }
            RecordOutcome::ExecutionClosed => {
                Err(LifecycleError::ExecutionClosed { execution_id: execution_id.to_string() })
            }
            RecordOutcome::ExecutionNotFound => {
                Err(LifecycleError::ExecutionNotFound(execution_id.to_string()))
            }
        }
    }

    pub async fn answers(
        &self,
        execution_id: &str,
    ) -> Result<Vec<QuestionExecution>, LifecycleError> {
        Ok(self.executions.list_answers(execution_id).await?)
    }
}
