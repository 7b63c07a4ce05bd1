use std::sync::Arc;

use sqlx::PgPool;

use crate::core::{config::Settings, redis::RedisHandle};
use crate::lifecycle::Lifecycle;
use crate::services::role_oracle::RoleOracle;

#[derive(Clone)]
pub(crate) struct AppState {
    inner: Arc<InnerState>,
}

struct InnerState {
    settings: Settings,
    db: PgPool,
    redis: RedisHandle,
    lifecycle: Lifecycle,
    role_oracle: Arc<dyn RoleOracle>,
}

impl AppState {
    pub(crate) fn new(
        settings: Settings,
        db: PgPool,
        redis: RedisHandle,
        lifecycle: Lifecycle,
        role_oracle: Arc<dyn RoleOracle>,
    ) -> Self {
        Self { inner: Arc::new(InnerState { settings, db, redis, lifecycle, role_oracle }) }
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub(crate) fn db(&self) -> &PgPool {
        &self.inner.db
    }

    pub(crate) fn redis(&self) -> &RedisHandle {
        &self.inner.redis
    }

    pub(crate) fn lifecycle(&self) -> &Lifecycle {
        &self.inner.lifecycle
    }

    pub(crate) fn role_oracle(&self) -> &dyn RoleOracle {
        self.inner.role_oracle.as_ref()
    }
}
