use std::sync::Arc;

use serde::Deserialize;
use time::{OffsetDateTime, PrimitiveDateTime};
use uuid::Uuid;
use validator::Validate;

use crate::core::time::{deserialize_datetime, primitive_now_utc, to_primitive_utc};
use crate::db::models::Exam;
use crate::db::types::StateName;
use crate::lifecycle::{ExamScheduler, Ineligibility, LifecycleError, StateRegistry};
use crate::store::{ExamStore, NewExam};

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateExamRequest {
    #[validate(length(min = 1, message = "course_ref must not be empty"))]
    pub course_ref: String,
    #[validate(length(min = 1, message = "title must not be empty"))]
    pub title: String,
    #[serde(deserialize_with = "deserialize_datetime")]
    pub start_at: OffsetDateTime,
    #[serde(deserialize_with = "deserialize_datetime")]
    pub end_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ExamWindow {
    #[serde(deserialize_with = "deserialize_datetime")]
    pub start_at: OffsetDateTime,
    #[serde(deserialize_with = "deserialize_datetime")]
    pub end_at: OffsetDateTime,
}

impl ExamWindow {
    fn to_utc(self) -> Result<(PrimitiveDateTime, PrimitiveDateTime), LifecycleError> {
        let start_at = to_primitive_utc(self.start_at);
        let end_at = to_primitive_utc(self.end_at);
        if start_at >= end_at {
            return Err(LifecycleError::InvalidExam("start_at must be before end_at".to_string()));
        }
        Ok((start_at, end_at))
    }
}

/// The paths through which exam timing and state change. Each one keeps the
/// scheduler in step with the stored exam.
#[derive(Clone)]
pub struct ExamService {
    exams: Arc<dyn ExamStore>,
    registry: StateRegistry,
    scheduler: ExamScheduler,
}

impl ExamService {
    pub fn new(
        exams: Arc<dyn ExamStore>,
        registry: StateRegistry,
        scheduler: ExamScheduler,
    ) -> Self {
        Self { exams, registry, scheduler }
    }

    /// Inserts the exam as `Active` and arms its timers. A `SchedulingFailure`
    /// leaves the exam stored with in-memory timers only.
    pub async fn create(&self, request: CreateExamRequest) -> Result<Exam, LifecycleError> {
        request.validate().map_err(|err| LifecycleError::InvalidExam(err.to_string()))?;
        let (start_at, end_at) =
            ExamWindow { start_at: request.start_at, end_at: request.end_at }.to_utc()?;

        let exam = self
            .exams
            .insert_exam(NewExam {
                id: Uuid::new_v4().to_string(),
                course_ref: request.course_ref,
                title: request.title,
                state_id: self.registry.id(StateName::Active),
                start_at,
                end_at,
                created_at: primitive_now_utc(),
            })
            .await?;

        tracing::info!(exam_id = %exam.id, course_ref = %exam.course_ref, "Exam created");
        self.scheduler.arm(&exam.id, exam.start_at, exam.end_at).await?;
        Ok(exam)
    }

    pub async fn reschedule(
        &self,
        exam_id: &str,
        window: ExamWindow,
    ) -> Result<Exam, LifecycleError> {
        let (start_at, end_at) = window.to_utc()?;
        let exam = self.find(exam_id).await?;
        self.reject_finished(&exam)?;

        // A concurrent end action may finish the exam after the check above.
        let finished = self.registry.id(StateName::Finished);
        let Some(exam) = self
            .exams
            .update_exam_window(exam_id, start_at, end_at, finished, primitive_now_utc())
            .await?
        else {
            return Err(self.not_updated(exam_id).await);
        };

        self.scheduler.arm(&exam.id, exam.start_at, exam.end_at).await?;
        Ok(exam)
    }

    /// Toggles between `Active` and `Inactive`. Timers are left as they are.
    pub async fn set_active(&self, exam_id: &str, active: bool) -> Result<Exam, LifecycleError> {
        let exam = self.find(exam_id).await?;
        self.reject_finished(&exam)?;

        let target = if active { StateName::Active } else { StateName::Inactive };
        let updated = self
            .exams
            .update_exam_state(
                exam_id,
                self.registry.id(target),
                self.registry.id(StateName::Finished),
                primitive_now_utc(),
            )
            .await?;
        if !updated {
            return Err(self.not_updated(exam_id).await);
        }

        tracing::info!(exam_id, state = %target, "Exam state changed");
        self.find(exam_id).await
    }

    /// Cancels the exam's timers, then removes the exam. The row is kept if
    /// cancellation fails so the caller can retry.
    pub async fn delete(&self, exam_id: &str) -> Result<(), LifecycleError> {
        self.scheduler.cancel(exam_id).await?;
        if !self.exams.delete_exam(exam_id).await? {
            return Err(LifecycleError::ExamNotFound(exam_id.to_string()));
        }
        tracing::info!(exam_id, "Exam deleted");
        Ok(())
    }

    pub async fn find(&self, exam_id: &str) -> Result<Exam, LifecycleError> {
        self.exams
            .find_exam(exam_id)
            .await?
            .ok_or_else(|| LifecycleError::ExamNotFound(exam_id.to_string()))
    }

    pub fn state_of(&self, exam: &Exam) -> Result<StateName, LifecycleError> {
        self.registry.name(exam.state_id)
    }

    /// Explains a conditional update that matched no row.
    async fn not_updated(&self, exam_id: &str) -> LifecycleError {
        match self.find(exam_id).await {
            Ok(exam) => match self.reject_finished(&exam) {
                Err(err) => err,
                Ok(()) => LifecycleError::ExamNotFound(exam_id.to_string()),
            },
            Err(err) => err,
        }
    }

    fn reject_finished(&self, exam: &Exam) -> Result<(), LifecycleError> {
        if self.state_of(exam)?.is_terminal() {
            return Err(LifecycleError::ExamNotEligible {
                exam_id: exam.id.clone(),
                reason: Ineligibility::Finished,
            });
        }
        Ok(())
    }
}
