use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use time::PrimitiveDateTime;
use uuid::Uuid;

use super::{
    CloseOutcome, ExamStore, ExecutionStore, JobStore, NewAnswer, NewExam, NewExecution,
    OpenOutcome, RecordOutcome, StoreError,
};
use crate::db::models::{Exam, ExamState, Execution, LifecycleJob, QuestionExecution};
use crate::db::types::{CloseReason, StateName};

/// In-process store used by unit tests. A single mutex makes every method atomic,
/// which matches the per-row guarantees of the PostgreSQL store.
#[derive(Default)]
pub(crate) struct MemoryStore {
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    states: HashMap<i32, String>,
    exams: HashMap<String, Exam>,
    jobs: HashMap<String, LifecycleJob>,
    executions: HashMap<String, Execution>,
    answers: HashMap<(String, String), QuestionExecution>,
    failing_job_writes: usize,
    failing_closes: HashMap<String, usize>,
}

impl MemoryStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// The next `count` job-table writes fail with `StoreError::Unavailable`.
    pub(crate) fn fail_next_job_writes(&self, count: usize) {
        self.lock().failing_job_writes = count;
    }

    /// The next `times` closes of `execution_id` fail with `StoreError::Unavailable`.
    pub(crate) fn fail_closes_for(&self, execution_id: &str, times: usize) {
        self.lock().failing_closes.insert(execution_id.to_string(), times);
    }

    pub(crate) fn job_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().jobs.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub(crate) fn exam(&self, exam_id: &str) -> Option<Exam> {
        self.lock().exams.get(exam_id).cloned()
    }

    pub(crate) fn executions_for(&self, exam_id: &str) -> Vec<Execution> {
        let mut rows: Vec<Execution> = self
            .lock()
            .executions
            .values()
            .filter(|execution| execution.exam_id == exam_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.id.cmp(&b.id)));
        rows
    }

    /// Writes an execution row directly, bypassing the open-uniqueness check.
    pub(crate) fn put_execution(&self, execution: Execution) {
        self.lock().executions.insert(execution.id.clone(), execution);
    }

    pub(crate) fn put_job(&self, job: LifecycleJob) {
        self.lock().jobs.insert(job.key.clone(), job);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl MemoryState {
    fn take_job_write_failure(&mut self) -> Result<(), StoreError> {
        if self.failing_job_writes > 0 {
            self.failing_job_writes -= 1;
            return Err(StoreError::Unavailable("injected job-table failure".to_string()));
        }
        Ok(())
    }

    fn open_execution(&self, exam_id: &str, user_id: &str) -> Option<&Execution> {
        self.executions.values().find(|execution| {
            execution.exam_id == exam_id && execution.user_id == user_id && execution.is_open()
        })
    }
}

#[async_trait]
impl ExamStore for MemoryStore {
    async fn seed_states(&self, states: &[(i32, StateName)]) -> Result<(), StoreError> {
        let mut state = self.lock();
        for (id, name) in states {
            state.states.entry(*id).or_insert_with(|| name.as_str().to_string());
        }
        Ok(())
    }

    async fn list_states(&self) -> Result<Vec<ExamState>, StoreError> {
        let mut rows: Vec<ExamState> = self
            .lock()
            .states
            .iter()
            .map(|(id, name)| ExamState { id: *id, name: name.clone() })
            .collect();
        rows.sort_by_key(|row| row.id);
        Ok(rows)
    }

    async fn insert_exam(&self, exam: NewExam) -> Result<Exam, StoreError> {
        let row = Exam {
            id: exam.id,
            course_ref: exam.course_ref,
            title: exam.title,
            state_id: exam.state_id,
            start_at: exam.start_at,
            end_at: exam.end_at,
            created_at: exam.created_at,
            updated_at: exam.created_at,
        };
        self.lock().exams.insert(row.id.clone(), row.clone());
        Ok(row)
    }

    async fn find_exam(&self, exam_id: &str) -> Result<Option<Exam>, StoreError> {
        Ok(self.lock().exams.get(exam_id).cloned())
    }

    async fn list_exams_not_in_state(&self, state_id: i32) -> Result<Vec<Exam>, StoreError> {
        let mut rows: Vec<Exam> =
            self.lock().exams.values().filter(|exam| exam.state_id != state_id).cloned().collect();
        rows.sort_by(|a, b| a.start_at.cmp(&b.start_at));
        Ok(rows)
    }

    async fn update_exam_window(
        &self,
        exam_id: &str,
        start_at: PrimitiveDateTime,
        end_at: PrimitiveDateTime,
        unless_state_id: i32,
        now: PrimitiveDateTime,
    ) -> Result<Option<Exam>, StoreError> {
        let mut state = self.lock();
        let Some(exam) = state.exams.get_mut(exam_id) else {
            return Ok(None);
        };
        if exam.state_id == unless_state_id {
            return Ok(None);
        }
        exam.start_at = start_at;
        exam.end_at = end_at;
        exam.updated_at = now;
        Ok(Some(exam.clone()))
    }

    async fn update_exam_state(
        &self,
        exam_id: &str,
        state_id: i32,
        unless_state_id: i32,
        now: PrimitiveDateTime,
    ) -> Result<bool, StoreError> {
        let mut state = self.lock();
        let Some(exam) = state.exams.get_mut(exam_id) else {
            return Ok(false);
        };
        if exam.state_id == unless_state_id {
            return Ok(false);
        }
        exam.state_id = state_id;
        exam.updated_at = now;
        Ok(true)
    }

    async fn finish_exam(
        &self,
        exam_id: &str,
        finished_state_id: i32,
        end_at: PrimitiveDateTime,
        now: PrimitiveDateTime,
    ) -> Result<bool, StoreError> {
        let mut state = self.lock();
        match state.exams.get_mut(exam_id) {
            Some(exam) if exam.end_at == end_at => {
                exam.state_id = finished_state_id;
                exam.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_exam(&self, exam_id: &str) -> Result<bool, StoreError> {
        Ok(self.lock().exams.remove(exam_id).is_some())
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn upsert_jobs(&self, jobs: &[LifecycleJob]) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.take_job_write_failure()?;
        for job in jobs {
            state.jobs.insert(job.key.clone(), job.clone());
        }
        Ok(())
    }

    async fn find_job(&self, key: &str) -> Result<Option<LifecycleJob>, StoreError> {
        Ok(self.lock().jobs.get(key).cloned())
    }

    async fn delete_jobs(&self, keys: &[String]) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.take_job_write_failure()?;
        for key in keys {
            state.jobs.remove(key);
        }
        Ok(())
    }

    async fn complete_job(
        &self,
        key: &str,
        fire_at: PrimitiveDateTime,
    ) -> Result<bool, StoreError> {
        let mut state = self.lock();
        match state.jobs.get(key) {
            Some(job) if job.fire_at == fire_at => {
                state.jobs.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_due_jobs(
        &self,
        now: PrimitiveDateTime,
        limit: i64,
    ) -> Result<Vec<LifecycleJob>, StoreError> {
        let mut due: Vec<LifecycleJob> =
            self.lock().jobs.values().filter(|job| job.fire_at <= now).cloned().collect();
        due.sort_by(|a, b| a.fire_at.cmp(&b.fire_at).then_with(|| a.key.cmp(&b.key)));
        due.truncate(usize::try_from(limit.max(1)).unwrap_or(usize::MAX));
        Ok(due)
    }
}

#[async_trait]
impl ExecutionStore for MemoryStore {
    async fn insert_open_execution(
        &self,
        execution: NewExecution,
    ) -> Result<OpenOutcome, StoreError> {
        let mut state = self.lock();
        let exam = state.exams.get(&execution.exam_id);
        if !exam.is_some_and(|exam| {
            exam.accepts_executions_at(execution.active_state_id, execution.started_at)
        }) {
            return Ok(OpenOutcome::Rejected(exam.cloned()));
        }
        if let Some(existing) = state.open_execution(&execution.exam_id, &execution.user_id) {
            return Ok(OpenOutcome::AlreadyOpen(existing.clone()));
        }

        let row = Execution {
            id: execution.id,
            exam_id: execution.exam_id,
            user_id: execution.user_id,
            started_at: execution.started_at,
            ended_at: None,
            close_reason: None,
        };
        state.executions.insert(row.id.clone(), row.clone());
        Ok(OpenOutcome::Created(row))
    }

    async fn find_execution(&self, execution_id: &str) -> Result<Option<Execution>, StoreError> {
        Ok(self.lock().executions.get(execution_id).cloned())
    }

    async fn find_open_execution(
        &self,
        exam_id: &str,
        user_id: &str,
    ) -> Result<Option<Execution>, StoreError> {
        Ok(self.lock().open_execution(exam_id, user_id).cloned())
    }

    async fn list_open_executions(&self, exam_id: &str) -> Result<Vec<Execution>, StoreError> {
        let mut rows: Vec<Execution> = self
            .lock()
            .executions
            .values()
            .filter(|execution| execution.exam_id == exam_id && execution.is_open())
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.id.cmp(&b.id)));
        Ok(rows)
    }

    async fn close_execution(
        &self,
        execution_id: &str,
        ended_at: PrimitiveDateTime,
        reason: CloseReason,
    ) -> Result<Option<CloseOutcome>, StoreError> {
        let mut state = self.lock();
        if let Some(remaining) = state.failing_closes.get_mut(execution_id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(StoreError::Unavailable(format!(
                    "injected close failure for {execution_id}"
                )));
            }
        }

        let Some(execution) = state.executions.get_mut(execution_id) else {
            return Ok(None);
        };
        if !execution.is_open() {
            return Ok(Some(CloseOutcome::AlreadyClosed(execution.clone())));
        }

        execution.ended_at = Some(ended_at);
        execution.close_reason = Some(reason);
        Ok(Some(CloseOutcome::Closed(execution.clone())))
    }

    async fn record_answer(&self, answer: NewAnswer) -> Result<RecordOutcome, StoreError> {
        let mut state = self.lock();
        match state.executions.get(&answer.execution_id) {
            None => return Ok(RecordOutcome::ExecutionNotFound),
            Some(execution) if !execution.is_open() => return Ok(RecordOutcome::ExecutionClosed),
            Some(_) => {}
        }

        let key = (answer.execution_id.clone(), answer.question_id.clone());
        let row = state
            .answers
            .entry(key)
            .and_modify(|row| {
                row.answer_id = Some(answer.answer_id.clone());
                row.answered_at = answer.answered_at;
            })
            .or_insert_with(|| QuestionExecution {
                id: if answer.id.is_empty() { Uuid::new_v4().to_string() } else { answer.id },
                execution_id: answer.execution_id,
                question_id: answer.question_id,
                answer_id: Some(answer.answer_id),
                answered_at: answer.answered_at,
            });
        Ok(RecordOutcome::Recorded(row.clone()))
    }

    async fn list_answers(
        &self,
        execution_id: &str,
    ) -> Result<Vec<QuestionExecution>, StoreError> {
        let mut rows: Vec<QuestionExecution> = self
            .lock()
            .answers
            .values()
            .filter(|row| row.execution_id == execution_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.question_id.cmp(&b.question_id));
        Ok(rows)
    }
}
