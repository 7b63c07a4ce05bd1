pub(crate) mod exams;
pub(crate) mod executions;
pub(crate) mod health;
pub(crate) mod lifecycle_jobs;
pub(crate) mod question_executions;
pub(crate) mod states;
