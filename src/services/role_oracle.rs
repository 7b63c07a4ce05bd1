use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;

use crate::core::config::Settings;
use crate::core::redis::RedisHandle;

const CACHE_PREFIX: &str = "role_oracle";

/// Resolves whether a user holds an instructor or staff role for a course.
#[async_trait]
pub trait RoleOracle: Send + Sync {
    /// False when lookups are bound to fail with `NotConfigured`.
    fn is_configured(&self) -> bool;

    async fn is_instructor_or_staff(
        &self,
        user_id: &str,
        course_context: &str,
    ) -> Result<bool, RoleOracleError>;
}

#[derive(Debug, Error)]
pub enum RoleOracleError {
    #[error("role oracle base url is not configured")]
    NotConfigured,
    #[error("role oracle request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("role oracle returned status {status}: {body}")]
    Status { status: u16, body: String },
}

/// One access-role grant as reported by the learning platform.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AccessRoleRecord {
    pub role: String,
    #[serde(default)]
    pub course_id: Option<String>,
    #[serde(default)]
    pub org: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AccessRoleResponse {
    Paged { results: Vec<AccessRoleRecord> },
    Plain(Vec<AccessRoleRecord>),
}

impl AccessRoleResponse {
    fn into_records(self) -> Vec<AccessRoleRecord> {
        match self {
            Self::Paged { results } => results,
            Self::Plain(records) => records,
        }
    }
}

/// Organization segment of a `course-v1:ORG+COURSE+RUN` course key.
pub fn course_org(course_id: &str) -> Option<&str> {
    let rest = course_id.strip_prefix("course-v1:")?;
    rest.split('+').next().filter(|org| !org.is_empty())
}

/// True when any record carries one of `roles` for the course itself, or for
/// the course's organization without naming a course.
pub fn grants_instructor_or_staff(
    records: &[AccessRoleRecord],
    course_id: &str,
    roles: &[String],
) -> bool {
    let org = course_org(course_id);
    records.iter().any(|record| {
        if !roles.iter().any(|role| role.eq_ignore_ascii_case(&record.role)) {
            return false;
        }
        match record.course_id.as_deref().filter(|value| !value.is_empty()) {
            Some(granted) => granted == course_id,
            None => org.is_some() && record.org.as_deref() == org,
        }
    })
}

#[derive(Debug, Clone)]
pub struct RoleOracleOptions {
    pub base_url: String,
    pub api_token: String,
    pub timeout: Duration,
    pub cache_ttl_seconds: u64,
    pub roles: Vec<String>,
}

/// `RoleOracle` backed by the platform's course-access-roles endpoint, with an
/// optional Redis cache in front of it.
#[derive(Clone)]
pub struct HttpRoleOracle {
    client: Client,
    options: RoleOracleOptions,
    cache: Option<RedisHandle>,
}

impl HttpRoleOracle {
    pub fn new(options: RoleOracleOptions) -> Result<Self, RoleOracleError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(options.timeout)
            .build()?;
        let options = RoleOracleOptions {
            base_url: options.base_url.trim_end_matches('/').to_string(),
            ..options
        };
        Ok(Self { client, options, cache: None })
    }

    pub(crate) fn from_settings(
        settings: &Settings,
        redis: RedisHandle,
    ) -> Result<Self, RoleOracleError> {
        let config = settings.role_oracle();
        let oracle = Self::new(RoleOracleOptions {
            base_url: config.base_url.clone(),
            api_token: config.api_token.clone(),
            timeout: Duration::from_secs(config.timeout_seconds),
            cache_ttl_seconds: config.cache_ttl_seconds,
            roles: config.roles.clone(),
        })?;
        Ok(oracle.with_cache(redis))
    }

    pub(crate) fn with_cache(mut self, redis: RedisHandle) -> Self {
        self.cache = Some(redis);
        self
    }

    async fn fetch_records(
        &self,
        user_id: &str,
        course_id: &str,
    ) -> Result<Vec<AccessRoleRecord>, RoleOracleError> {
        let endpoint = format!("{}/course-access-roles", self.options.base_url);
        let mut request =
            self.client.get(&endpoint).query(&[("user_id", user_id), ("course_id", course_id)]);
        if !self.options.api_token.is_empty() {
            request = request.bearer_auth(&self.options.api_token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RoleOracleError::Status { status: status.as_u16(), body });
        }

        let parsed: AccessRoleResponse = response.json().await?;
        Ok(parsed.into_records())
    }

    async fn cached(&self, key: &str) -> Option<bool> {
        let cache = self.cache.as_ref()?;
        match cache.get_cached(key).await {
            Ok(value) => value.map(|value| value == "1"),
            Err(err) => {
                tracing::warn!(error = %err, "Role cache read failed; querying the oracle");
                None
            }
        }
    }

    async fn store(&self, key: &str, allowed: bool) {
        let Some(cache) = self.cache.as_ref() else {
            return;
        };
        let value = if allowed { "1" } else { "0" };
        if let Err(err) = cache.set_cached(key, value, self.options.cache_ttl_seconds).await {
            tracing::warn!(error = %err, "Role cache write failed");
        }
    }
}

#[async_trait]
impl RoleOracle for HttpRoleOracle {
    fn is_configured(&self) -> bool {
        !self.options.base_url.is_empty()
    }

    async fn is_instructor_or_staff(
        &self,
        user_id: &str,
        course_context: &str,
    ) -> Result<bool, RoleOracleError> {
        if !self.is_configured() {
            return Err(RoleOracleError::NotConfigured);
        }

        let key = format!("{CACHE_PREFIX}:{user_id}:{course_context}");
        if let Some(allowed) = self.cached(&key).await {
            metrics::counter!("role_oracle_lookups_total", "source" => "cache").increment(1);
            return Ok(allowed);
        }

        let records = self.fetch_records(user_id, course_context).await.map_err(|err| {
            tracing::error!(
                user_id,
                course_id = course_context,
                error = %err,
                "Role lookup failed"
            );
            err
        })?;
        metrics::counter!("role_oracle_lookups_total", "source" => "remote").increment(1);

        let allowed = grants_instructor_or_staff(&records, course_context, &self.options.roles);
        self.store(&key, allowed).await;
        Ok(allowed)
    }
}
