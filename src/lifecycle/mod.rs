//! Exam lifecycle core: timed start/end actions, the one-open-execution guard
//! and the answer recorder.

mod errors;
mod exams;
mod guard;
mod recorder;
mod registry;
mod retry;
mod timers;

use std::time::Duration;

use sqlx::PgPool;

use crate::core::config::Settings;
use crate::store::Stores;

pub use errors::{Ineligibility, LifecycleError};
pub use exams::{CreateExamRequest, ExamService, ExamWindow};
pub use guard::{check_eligibility, ExecutionGuard, ForceCloseReport};
pub use recorder::AnswerRecorder;
pub use registry::{StateRegistry, SEED as STATE_SEED};
pub use retry::RetryPolicy;
pub use timers::ExamScheduler;

/// All lifecycle components, wired over one set of stores.
#[derive(Clone)]
pub struct Lifecycle {
    registry: StateRegistry,
    scheduler: ExamScheduler,
    guard: ExecutionGuard,
    recorder: AnswerRecorder,
    exams: ExamService,
}

impl Lifecycle {
    /// Seeds and loads the state registry, then builds the components.
    pub async fn new(stores: Stores, retry: RetryPolicy) -> Result<Self, LifecycleError> {
        let registry = StateRegistry::load(stores.exams.as_ref()).await?;

        let guard = ExecutionGuard::new(
            stores.exams.clone(),
            stores.executions.clone(),
            registry.clone(),
            retry,
        );
        let scheduler = ExamScheduler::new(
            stores.exams.clone(),
            stores.jobs.clone(),
            guard.clone(),
            registry.clone(),
            retry,
        );
        let recorder = AnswerRecorder::new(stores.executions.clone(), retry);
        let exams = ExamService::new(stores.exams, registry.clone(), scheduler.clone());

        Ok(Self { registry, scheduler, guard, recorder, exams })
    }

    pub(crate) async fn from_settings(
        settings: &Settings,
        pool: PgPool,
    ) -> Result<Self, LifecycleError> {
        let lifecycle = settings.lifecycle();
        let retry = RetryPolicy::new(
            lifecycle.retry_attempts,
            Duration::from_millis(lifecycle.retry_base_delay_ms),
        );
        Self::new(Stores::postgres(pool), retry).await
    }

    pub fn registry(&self) -> &StateRegistry {
        &self.registry
    }

    pub fn scheduler(&self) -> &ExamScheduler {
        &self.scheduler
    }

    pub fn guard(&self) -> &ExecutionGuard {
        &self.guard
    }

    pub fn recorder(&self) -> &AnswerRecorder {
        &self.recorder
    }

    pub fn exams(&self) -> &ExamService {
        &self.exams
    }
}
