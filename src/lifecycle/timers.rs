//! Deferred start/end actions per exam.
//!
//! Every action has a row in `lifecycle_jobs` and, while the process runs, an
//! in-memory tokio timer. The row is the source of truth: a timer only acts if
//! the row still carries the timer's `fire_at`, and the sweeper re-arms rows
//! that have no live timer (crashes, failed end actions).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use time::PrimitiveDateTime;
use tokio::task::JoinHandle;

use crate::core::time::{delay_until, format_primitive, primitive_now_utc};
use crate::db::models::LifecycleJob;
use crate::db::types::{JobKind, StateName};
use crate::lifecycle::{ExecutionGuard, LifecycleError, RetryPolicy, StateRegistry};
use crate::store::{ExamStore, JobStore};

const SWEEP_BATCH: i64 = 200;

#[derive(Clone)]
pub struct ExamScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    exams: Arc<dyn ExamStore>,
    jobs: Arc<dyn JobStore>,
    guard: ExecutionGuard,
    registry: StateRegistry,
    retry: RetryPolicy,
    timers: Mutex<HashMap<String, Arc<Timer>>>,
    next_id: AtomicU64,
}

struct Timer {
    id: u64,
    key: String,
    exam_id: String,
    kind: JobKind,
    fire_at: PrimitiveDateTime,
    /// False when the job row could not be written; the timer then fires unchecked.
    verify: bool,
    cancelled: AtomicBool,
    firing: tokio::sync::Mutex<()>,
    task: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl ExamScheduler {
    pub fn new(
        exams: Arc<dyn ExamStore>,
        jobs: Arc<dyn JobStore>,
        guard: ExecutionGuard,
        registry: StateRegistry,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                exams,
                jobs,
                guard,
                registry,
                retry,
                timers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Arms the start and end actions of an exam, replacing any earlier ones.
    /// Timestamps in the past fire immediately.
    ///
    /// The job rows are written first. If that keeps failing the in-memory
    /// timers are armed anyway and `SchedulingFailure` is returned.
    pub async fn arm(
        &self,
        exam_id: &str,
        start_at: PrimitiveDateTime,
        end_at: PrimitiveDateTime,
    ) -> Result<(), LifecycleError> {
        let now = primitive_now_utc();
        let jobs = [(JobKind::Start, start_at), (JobKind::End, end_at)].map(|(kind, fire_at)| {
            LifecycleJob {
                key: kind.key_for(exam_id),
                exam_id: exam_id.to_string(),
                kind,
                fire_at,
                created_at: now,
            }
        });

        let persisted =
            self.inner.retry.run("arm_lifecycle_jobs", || self.inner.jobs.upsert_jobs(&jobs)).await;

        let verify = persisted.is_ok();
        for job in &jobs {
            self.inner.replace_timer(job, verify).await;
        }

        match persisted {
            Ok(()) => {
                tracing::info!(
                    exam_id,
                    start_at = %format_primitive(start_at),
                    end_at = %format_primitive(end_at),
                    "Exam timers armed"
                );
                Ok(())
            }
            Err(source) => {
                tracing::error!(
                    exam_id,
                    error = %source,
                    "Failed to persist lifecycle jobs; timers armed in memory only"
                );
                metrics::counter!("lifecycle_scheduling_failures_total", "operation" => "arm")
                    .increment(1);
                Err(LifecycleError::SchedulingFailure {
                    exam_id: exam_id.to_string(),
                    operation: "arm",
                    source,
                })
            }
        }
    }

    /// Cancels both actions of an exam. Idempotent. Returns once any in-flight
    /// firing of those actions has finished.
    pub async fn cancel(&self, exam_id: &str) -> Result<(), LifecycleError> {
        let keys = [JobKind::Start.key_for(exam_id), JobKind::End.key_for(exam_id)];

        let deleted = self
            .inner
            .retry
            .run("cancel_lifecycle_jobs", || self.inner.jobs.delete_jobs(&keys))
            .await;

        let removed: Vec<Arc<Timer>> = {
            let mut timers = lock(&self.inner.timers);
            keys.iter().filter_map(|key| timers.remove(key)).collect()
        };
        for timer in removed {
            stop(timer).await;
        }

        match deleted {
            Ok(()) => {
                tracing::info!(exam_id, "Exam timers cancelled");
                Ok(())
            }
            Err(source) => {
                tracing::error!(exam_id, error = %source, "Failed to delete lifecycle jobs");
                metrics::counter!("lifecycle_scheduling_failures_total", "operation" => "cancel")
                    .increment(1);
                Err(LifecycleError::SchedulingFailure {
                    exam_id: exam_id.to_string(),
                    operation: "cancel",
                    source,
                })
            }
        }
    }

    /// Arms a timer for every due job row that has no live timer. Returns how many were armed.
    pub async fn sweep_due(&self) -> Result<usize, LifecycleError> {
        let due = self.inner.jobs.list_due_jobs(primitive_now_utc(), SWEEP_BATCH).await?;

        let mut armed = 0;
        for job in due {
            let timer = self.inner.new_timer(&job, true);
            {
                let mut timers = lock(&self.inner.timers);
                if timers.contains_key(&job.key) {
                    continue;
                }
                timers.insert(job.key.clone(), timer.clone());
            }
            tracing::info!(
                exam_id = %job.exam_id,
                kind = job.kind.as_str(),
                "Re-arming due lifecycle job without a live timer"
            );
            self.inner.spawn(timer);
            armed += 1;
        }
        Ok(armed)
    }

    /// Re-arms every exam that has not finished. Used once at startup.
    pub async fn recover(&self) -> Result<usize, LifecycleError> {
        let finished = self.inner.registry.id(StateName::Finished);
        let exams = self.inner.exams.list_exams_not_in_state(finished).await?;

        let mut armed = 0;
        for exam in exams {
            match self.arm(&exam.id, exam.start_at, exam.end_at).await {
                Ok(()) => armed += 1,
                Err(err) => {
                    tracing::error!(
                        exam_id = %exam.id,
                        error = %err,
                        "Failed to re-arm exam timers"
                    )
                }
            }
        }

        tracing::info!(armed, "Recovered exam timers");
        Ok(armed)
    }

    /// Stops every in-memory timer and waits for in-flight firings. Job rows are kept.
    pub async fn shutdown(&self) {
        let timers: Vec<Arc<Timer>> = lock(&self.inner.timers).drain().map(|(_, t)| t).collect();
        let count = timers.len();
        for timer in timers {
            stop(timer).await;
        }
        tracing::info!(stopped = count, "Exam scheduler stopped");
    }

    pub fn is_armed(&self, key: &str) -> bool {
        lock(&self.inner.timers).contains_key(key)
    }
}

impl SchedulerInner {
    fn new_timer(&self, job: &LifecycleJob, verify: bool) -> Arc<Timer> {
        Arc::new(Timer {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            key: job.key.clone(),
            exam_id: job.exam_id.clone(),
            kind: job.kind,
            fire_at: job.fire_at,
            verify,
            cancelled: AtomicBool::new(false),
            firing: tokio::sync::Mutex::new(()),
            task: Mutex::new(None),
        })
    }

    /// Installs a new timer for the job's key. The previous timer is stopped
    /// before the new one starts so the two never fire concurrently.
    async fn replace_timer(self: &Arc<Self>, job: &LifecycleJob, verify: bool) {
        let timer = self.new_timer(job, verify);
        let previous = lock(&self.timers).insert(job.key.clone(), timer.clone());
        if let Some(previous) = previous {
            stop(previous).await;
        }
        self.spawn(timer);
    }

    fn spawn(self: &Arc<Self>, timer: Arc<Timer>) {
        let delay = delay_until(timer.fire_at, primitive_now_utc());
        let scheduler = Arc::downgrade(self);
        let task_timer = timer.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(scheduler) = scheduler.upgrade() {
                scheduler.fire(&task_timer).await;
            }
        });
        *lock(&timer.task) = Some(handle);
    }

    async fn fire(&self, timer: &Timer) {
        let _firing = timer.firing.lock().await;
        if timer.cancelled.load(Ordering::SeqCst) {
            return;
        }

        if timer.verify {
            match self.jobs.find_job(&timer.key).await {
                Ok(Some(job)) if job.fire_at == timer.fire_at => {}
                Ok(_) => {
                    tracing::debug!(
                        exam_id = %timer.exam_id,
                        kind = timer.kind.as_str(),
                        "Skipping stale lifecycle timer"
                    );
                    self.forget(timer);
                    return;
                }
                Err(err) => {
                    tracing::error!(
                        exam_id = %timer.exam_id,
                        kind = timer.kind.as_str(),
                        error = %err,
                        "Failed to verify lifecycle job; leaving it to the sweeper"
                    );
                    self.forget(timer);
                    return;
                }
            }
        }

        metrics::counter!("lifecycle_timers_fired_total", "kind" => timer.kind.as_str())
            .increment(1);
        match timer.kind {
            JobKind::Start => self.on_start(timer).await,
            JobKind::End => self.on_end(timer).await,
        }
        self.forget(timer);
    }

    async fn on_start(&self, timer: &Timer) {
        tracing::info!(exam_id = %timer.exam_id, "Exam window opened");
        self.complete(timer).await;
    }

    /// Marks the exam finished, then closes whatever is still open. Marking
    /// first means no open can land after the scan below.
    async fn on_end(&self, timer: &Timer) {
        let exam_id = timer.exam_id.as_str();
        let finished = self.registry.id(StateName::Finished);
        let marked = self
            .retry
            .run("finish_exam", || {
                self.exams.finish_exam(exam_id, finished, timer.fire_at, primitive_now_utc())
            })
            .await;
        match marked {
            Ok(true) => {}
            Ok(false) => {
                tracing::info!(
                    exam_id,
                    fire_at = %format_primitive(timer.fire_at),
                    "Exam was rescheduled or removed; skipping end action"
                );
                self.complete(timer).await;
                return;
            }
            Err(err) => {
                tracing::error!(exam_id, error = %err, "Failed to mark exam finished");
                return;
            }
        }

        let report = match self.guard.force_close_exam(exam_id).await {
            Ok(report) => report,
            Err(err) => {
                tracing::error!(
                    exam_id,
                    error = %err,
                    "Failed to list open executions at exam end"
                );
                return;
            }
        };

        if !report.is_complete() {
            tracing::warn!(
                exam_id,
                failures = report.failures.len(),
                "Exam finished with executions still open; keeping the job for the sweeper"
            );
            return;
        }

        tracing::info!(exam_id, closed = report.closed.len(), "Exam finished");
        self.complete(timer).await;
    }

    async fn complete(&self, timer: &Timer) {
        let result = self
            .retry
            .run("complete_lifecycle_job", || self.jobs.complete_job(&timer.key, timer.fire_at))
            .await;
        if let Err(err) = result {
            tracing::error!(
                exam_id = %timer.exam_id,
                kind = timer.kind.as_str(),
                error = %err,
                "Failed to remove completed lifecycle job"
            );
        }
    }

    /// Drops the map entry if it still belongs to `timer`.
    fn forget(&self, timer: &Timer) {
        let mut timers = lock(&self.timers);
        if timers.get(&timer.key).is_some_and(|current| current.id == timer.id) {
            timers.remove(&timer.key);
        }
    }
}

/// Marks the timer cancelled, waits for an in-flight firing, then aborts the sleeping task.
async fn stop(timer: Arc<Timer>) {
    timer.cancelled.store(true, Ordering::SeqCst);
    let _firing = timer.firing.lock().await;
    let handle = lock(&timer.task).take();
    if let Some(handle) = handle {
        handle.abort();
    }
}
