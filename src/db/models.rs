use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::PrimitiveDateTime;

use crate::db::types::{CloseReason, JobKind};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ExamState {
    pub id: i32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Exam {
    pub id: String,
    pub course_ref: String,
    pub title: String,
    pub state_id: i32,
    pub start_at: PrimitiveDateTime,
    pub end_at: PrimitiveDateTime,
    pub created_at: PrimitiveDateTime,
    pub updated_at: PrimitiveDateTime,
}

impl Exam {
    /// True while the exam is in `active_state_id` and `at` falls in `[start_at, end_at)`.
    pub fn accepts_executions_at(&self, active_state_id: i32, at: PrimitiveDateTime) -> bool {
        self.state_id == active_state_id && self.start_at <= at && at < self.end_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Execution {
    pub id: String,
    pub exam_id: String,
    pub user_id: String,
    pub started_at: PrimitiveDateTime,
    pub ended_at: Option<PrimitiveDateTime>,
    pub close_reason: Option<CloseReason>,
}

impl Execution {
    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct QuestionExecution {
    pub id: String,
    pub execution_id: String,
    pub question_id: String,
    pub answer_id: Option<String>,
    pub answered_at: PrimitiveDateTime,
}

/// A persisted deferred action. Rows live until the action completes or is cancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct LifecycleJob {
    pub key: String,
    pub exam_id: String,
    pub kind: JobKind,
    pub fire_at: PrimitiveDateTime,
    pub created_at: PrimitiveDateTime,
}
