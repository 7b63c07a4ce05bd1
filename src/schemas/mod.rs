use std::collections::HashMap;

use serde::Serialize;

#[derive(Debug, Serialize)]
pub(crate) struct HealthResponse {
    pub(crate) service: String,
    pub(crate) status: String,
    pub(crate) components: HashMap<String, String>,
    /// Due lifecycle jobs still waiting for a timer; absent when the database is unreachable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) overdue_jobs: Option<i64>,
}

#[derive(Debug, Serialize)]
pub(crate) struct RootResponse {
    pub(crate) message: String,
    pub(crate) version: String,
    pub(crate) environment: String,
}
