//! Persistence contract for the exam lifecycle core.
//!
//! The core only needs point lookups, point upserts and the "open executions
//! of an exam" scan. Every method that mutates an execution or an answer is
//! atomic with respect to concurrent callers touching the same row.

mod postgres;

#[cfg(test)]
pub(crate) mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use time::PrimitiveDateTime;

use crate::db::models::{Exam, ExamState, Execution, LifecycleJob, QuestionExecution};
use crate::db::types::{CloseReason, StateName};

pub use postgres::PgStore;

const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("write contention: {0}")]
    Contention(String),
    #[error(transparent)]
    Database(sqlx::Error),
}

impl StoreError {
    /// Transient errors are worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Contention(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Self::Unavailable(err.to_string())
            }
            sqlx::Error::Database(ref db_err)
                if matches!(
                    db_err.code().as_deref(),
                    Some(SERIALIZATION_FAILURE) | Some(DEADLOCK_DETECTED)
                ) =>
            {
                Self::Contention(err.to_string())
            }
            other => Self::Database(other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewExam {
    pub id: String,
    pub course_ref: String,
    pub title: String,
    pub state_id: i32,
    pub start_at: PrimitiveDateTime,
    pub end_at: PrimitiveDateTime,
    pub created_at: PrimitiveDateTime,
}

#[derive(Debug, Clone)]
pub struct NewExecution {
    pub id: String,
    pub exam_id: String,
    pub user_id: String,
    pub started_at: PrimitiveDateTime,
    /// The insert only happens while the exam is in this state and `started_at`
    /// is inside its window.
    pub active_state_id: i32,
}

#[derive(Debug, Clone)]
pub struct NewAnswer {
    pub id: String,
    pub execution_id: String,
    pub question_id: String,
    pub answer_id: String,
    pub answered_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenOutcome {
    Created(Execution),
    AlreadyOpen(Execution),
    /// The exam is missing (`None`) or no longer accepts executions.
    Rejected(Option<Exam>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseOutcome {
    Closed(Execution),
    AlreadyClosed(Execution),
}

impl CloseOutcome {
    pub fn execution(&self) -> &Execution {
        match self {
            Self::Closed(execution) | Self::AlreadyClosed(execution) => execution,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded(QuestionExecution),
    ExecutionClosed,
    ExecutionNotFound,
}

#[async_trait]
pub trait ExamStore: Send + Sync {
    async fn seed_states(&self, states: &[(i32, StateName)]) -> Result<(), StoreError>;

    async fn list_states(&self) -> Result<Vec<ExamState>, StoreError>;

    async fn insert_exam(&self, exam: NewExam) -> Result<Exam, StoreError>;

    async fn find_exam(&self, exam_id: &str) -> Result<Option<Exam>, StoreError>;

    async fn list_exams_not_in_state(&self, state_id: i32) -> Result<Vec<Exam>, StoreError>;

    /// `Ok(None)` when the exam is missing or in `unless_state_id`.
    async fn update_exam_window(
        &self,
        exam_id: &str,
        start_at: PrimitiveDateTime,
        end_at: PrimitiveDateTime,
        unless_state_id: i32,
        now: PrimitiveDateTime,
    ) -> Result<Option<Exam>, StoreError>;

    /// `Ok(false)` when the exam is missing or in `unless_state_id`.
    async fn update_exam_state(
        &self,
        exam_id: &str,
        state_id: i32,
        unless_state_id: i32,
        now: PrimitiveDateTime,
    ) -> Result<bool, StoreError>;

    /// Moves the exam to `finished_state_id` if its `end_at` still equals `end_at`.
    /// Serialized against `insert_open_execution` on the same exam.
    async fn finish_exam(
        &self,
        exam_id: &str,
        finished_state_id: i32,
        end_at: PrimitiveDateTime,
        now: PrimitiveDateTime,
    ) -> Result<bool, StoreError>;

    async fn delete_exam(&self, exam_id: &str) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Writes all rows or none of them.
    async fn upsert_jobs(&self, jobs: &[LifecycleJob]) -> Result<(), StoreError>;

    async fn find_job(&self, key: &str) -> Result<Option<LifecycleJob>, StoreError>;

    async fn delete_jobs(&self, keys: &[String]) -> Result<(), StoreError>;

    /// Removes the row only if it still carries `fire_at`; a re-armed job is left alone.
    async fn complete_job(&self, key: &str, fire_at: PrimitiveDateTime)
        -> Result<bool, StoreError>;

    async fn list_due_jobs(
        &self,
        now: PrimitiveDateTime,
        limit: i64,
    ) -> Result<Vec<LifecycleJob>, StoreError>;
}

#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Creates the execution unless the (exam, user) pair already has an open one
    /// or the exam no longer accepts executions. The exam check and the insert
    /// are atomic with respect to `ExamStore::finish_exam`.
    async fn insert_open_execution(
        &self,
        execution: NewExecution,
    ) -> Result<OpenOutcome, StoreError>;

    async fn find_execution(&self, execution_id: &str) -> Result<Option<Execution>, StoreError>;

    async fn find_open_execution(
        &self,
        exam_id: &str,
        user_id: &str,
    ) -> Result<Option<Execution>, StoreError>;

    async fn list_open_executions(&self, exam_id: &str) -> Result<Vec<Execution>, StoreError>;

    /// `Ok(None)` when the execution does not exist.
    async fn close_execution(
        &self,
        execution_id: &str,
        ended_at: PrimitiveDateTime,
        reason: CloseReason,
    ) -> Result<Option<CloseOutcome>, StoreError>;

    /// Upserts the answer while holding the execution open; linearized against closes.
    async fn record_answer(&self, answer: NewAnswer) -> Result<RecordOutcome, StoreError>;

    async fn list_answers(&self, execution_id: &str)
        -> Result<Vec<QuestionExecution>, StoreError>;
}

/// The three store handles the lifecycle components are built from.
#[derive(Clone)]
pub struct Stores {
    pub exams: Arc<dyn ExamStore>,
    pub jobs: Arc<dyn JobStore>,
    pub executions: Arc<dyn ExecutionStore>,
}

impl Stores {
    pub fn postgres(pool: PgPool) -> Self {
        let store = Arc::new(PgStore::new(pool));
        Self { exams: store.clone(), jobs: store.clone(), executions: store }
    }
}
