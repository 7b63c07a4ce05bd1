use std::fmt;

use thiserror::Error;

use crate::store::StoreError;

/// Why an exam does not accept new executions right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ineligibility {
    NotStarted,
    Ended,
    Inactive,
    Finished,
}

impl fmt::Display for Ineligibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::NotStarted => "exam window has not opened yet",
            Self::Ended => "exam window has closed",
            Self::Inactive => "exam is inactive",
            Self::Finished => "exam is finished",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("execution {execution_id} is already open for user {user_id} in exam {exam_id}")]
    AlreadyOpen { exam_id: String, user_id: String, execution_id: String },
    #[error("exam {exam_id} is not eligible: {reason}")]
    ExamNotEligible { exam_id: String, reason: Ineligibility },
    #[error("execution {execution_id} is closed")]
    ExecutionClosed { execution_id: String },
    #[error("exam {0} not found")]
    ExamNotFound(String),
    #[error("execution {0} not found")]
    ExecutionNotFound(String),
    #[error("invalid exam: {0}")]
    InvalidExam(String),
    #[error("failed to {operation} lifecycle jobs for exam {exam_id}: {source}")]
    SchedulingFailure {
        exam_id: String,
        operation: &'static str,
        #[source]
        source: StoreError,
    },
    #[error("failed to close execution {execution_id}: {source}")]
    ForceCloseFailure {
        execution_id: String,
        #[source]
        source: StoreError,
    },
    #[error("exam state {0} is not registered")]
    UnknownState(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LifecycleError {
    /// Errors caused by the caller's request rather than by infrastructure.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Self::AlreadyOpen { .. }
                | Self::ExamNotEligible { .. }
                | Self::ExecutionClosed { .. }
                | Self::ExamNotFound(_)
                | Self::ExecutionNotFound(_)
                | Self::InvalidExam(_)
        )
    }
}
