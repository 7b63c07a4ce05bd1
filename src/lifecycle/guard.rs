use std::sync::Arc;

use time::PrimitiveDateTime;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::core::time::primitive_now_utc;
use crate::db::models::Execution;
use crate::db::types::{CloseReason, StateName};
use crate::lifecycle::{Ineligibility, LifecycleError, RetryPolicy, StateRegistry};
use crate::store::{CloseOutcome, ExamStore, ExecutionStore, NewExecution, OpenOutcome};

/// Outcome of closing every open execution of an exam.
#[derive(Debug)]
pub struct ForceCloseReport {
    pub exam_id: String,
    pub closed: Vec<String>,
    pub already_closed: Vec<String>,
    pub failures: Vec<LifecycleError>,
}

impl ForceCloseReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// An exam accepts new executions while it is `Active` and `now` is inside `[start_at, end_at)`.
pub fn check_eligibility(
    state: StateName,
    start_at: PrimitiveDateTime,
    end_at: PrimitiveDateTime,
    now: PrimitiveDateTime,
) -> Result<(), Ineligibility> {
    match state {
        StateName::Finished => return Err(Ineligibility::Finished),
        StateName::Inactive => return Err(Ineligibility::Inactive),
        StateName::Active => {}
    }
    if now < start_at {
        return Err(Ineligibility::NotStarted);
    }
    if now >= end_at {
        return Err(Ineligibility::Ended);
    }
    Ok(())
}

/// Creates, looks up and closes executions while keeping at most one open
/// execution per (exam, user).
#[derive(Clone)]
pub struct ExecutionGuard {
    exams: Arc<dyn ExamStore>,
    executions: Arc<dyn ExecutionStore>,
    registry: StateRegistry,
    retry: RetryPolicy,
}

impl ExecutionGuard {
    pub fn new(
        exams: Arc<dyn ExamStore>,
        executions: Arc<dyn ExecutionStore>,
        registry: StateRegistry,
        retry: RetryPolicy,
    ) -> Self {
        Self { exams, executions, registry, retry }
    }

    pub async fn open(&self, exam_id: &str, user_id: &str) -> Result<Execution, LifecycleError> {
        let exam = self
            .exams
            .find_exam(exam_id)
            .await?
            .ok_or_else(|| LifecycleError::ExamNotFound(exam_id.to_string()))?;

        let now = primitive_now_utc();
        let state = self.registry.name(exam.state_id)?;
        check_eligibility(state, exam.start_at, exam.end_at, now).map_err(|reason| {
            LifecycleError::ExamNotEligible { exam_id: exam_id.to_string(), reason }
        })?;

        let candidate = NewExecution {
            id: Uuid::new_v4().to_string(),
            exam_id: exam_id.to_string(),
            user_id: user_id.to_string(),
            started_at: now,
            active_state_id: self.registry.id(StateName::Active),
        };
        // The store re-checks the window at insert time; a retry is stamped anew.
        let outcome = self
            .retry
            .run("open_execution", || {
                self.executions.insert_open_execution(NewExecution {
                    started_at: primitive_now_utc(),
                    ..candidate.clone()
                })
            })
            .await?;

        match outcome {
            OpenOutcome::Created(execution) => {
                tracing::info!(
                    exam_id,
                    user_id,
                    execution_id = %execution.id,
                    "Execution opened"
                );
                metrics::counter!("executions_opened_total").increment(1);
                Ok(execution)
            }
            // A retried insert may find the row its own earlier attempt committed.
            OpenOutcome::AlreadyOpen(existing) if existing.id == candidate.id => {
                metrics::counter!("executions_opened_total").increment(1);
                Ok(existing)
            }
            OpenOutcome::AlreadyOpen(existing) => Err(LifecycleError::AlreadyOpen {
                exam_id: exam_id.to_string(),
                user_id: user_id.to_string(),
                execution_id: existing.id,
            }),
            OpenOutcome::Rejected(None) => Err(LifecycleError::ExamNotFound(exam_id.to_string())),
            OpenOutcome::Rejected(Some(current)) => {
                let state = self.registry.name(current.state_id)?;
                let reason =
                    check_eligibility(state, current.start_at, current.end_at, primitive_now_utc())
                        .err()
                        .unwrap_or(Ineligibility::Ended);
                tracing::info!(exam_id, user_id, reason = %reason, "Execution refused at insert");
                Err(LifecycleError::ExamNotEligible { exam_id: exam_id.to_string(), reason })
            }
        }
    }

    /// The caller's open execution, for resuming an attempt.
    pub async fn open_execution(
        &self,
        exam_id: &str,
        user_id: &str,
    ) -> Result<Option<Execution>, LifecycleError> {
        Ok(self.executions.find_open_execution(exam_id, user_id).await?)
    }

    pub async fn close(
        &self,
        execution_id: &str,
        reason: CloseReason,
    ) -> Result<CloseOutcome, LifecycleError> {
        let outcome = close_with_retry(&*self.executions, self.retry, execution_id, reason)
            .await?
            .ok_or_else(|| LifecycleError::ExecutionNotFound(execution_id.to_string()))?;

        match &outcome {
            CloseOutcome::Closed(_) => {
                tracing::info!(execution_id, reason = reason.as_str(), "Execution closed");
            }
            CloseOutcome::AlreadyClosed(_) => {
                tracing::debug!(execution_id, "Execution was already closed");
            }
        }
        Ok(outcome)
    }

    /// Closes every open execution of the exam. Each close runs on its own task
    /// with its own retries; one failure never blocks the rest.
    pub async fn force_close_exam(
        &self,
        exam_id: &str,
    ) -> Result<ForceCloseReport, LifecycleError> {
        let open = self
            .retry
            .run("list_open_executions", || self.executions.list_open_executions(exam_id))
            .await?;

        let mut report = ForceCloseReport {
            exam_id: exam_id.to_string(),
            closed: Vec::new(),
            already_closed: Vec::new(),
            failures: Vec::new(),
        };

        let mut tasks = JoinSet::new();
        for execution in open {
            let executions = self.executions.clone();
            let retry = self.retry;
            tasks.spawn(async move {
                let result =
                    close_with_retry(&*executions, retry, &execution.id, CloseReason::Forced).await;
                (execution.id, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (execution_id, result) = match joined {
                Ok(pair) => pair,
                Err(err) => {
                    tracing::error!(exam_id, error = %err, "Force-close task failed to join");
                    continue;
                }
            };

            match result {
                Ok(Some(CloseOutcome::Closed(_))) => report.closed.push(execution_id),
                Ok(Some(CloseOutcome::AlreadyClosed(_))) | Ok(None) => {
                    report.already_closed.push(execution_id)
                }
                Err(source) => {
                    tracing::error!(
                        exam_id,
                        execution_id = %execution_id,
                        error = %source,
                        "Failed to force-close execution"
                    );
                    metrics::counter!("executions_force_close_failures_total").increment(1);
                    report
                        .failures
                        .push(LifecycleError::ForceCloseFailure { execution_id, source });
                }
            }
        }

        report.closed.sort();
        report.already_closed.sort();

        tracing::info!(
            exam_id,
            closed = report.closed.len(),
            already_closed = report.already_closed.len(),
            failures = report.failures.len(),
            "Force-closed exam executions"
        );
        Ok(report)
    }
}

async fn close_with_retry(
    executions: &dyn ExecutionStore,
    retry: RetryPolicy,
    execution_id: &str,
    reason: CloseReason,
) -> Result<Option<CloseOutcome>, crate::store::StoreError> {
    let outcome = retry
        .run("close_execution", || {
            executions.close_execution(execution_id, primitive_now_utc(), reason)
        })
        .await?;

    if let Some(CloseOutcome::Closed(_)) = &outcome {
        metrics::counter!("executions_closed_total", "reason" => reason.as_str()).increment(1);
    }
    Ok(outcome)
}
