use std::sync::Arc;

use anyhow::Context;
use sqlx::PgPool;

use crate::core::config::Settings;
use crate::core::redis::RedisHandle;
use crate::db::types::StateName;
use crate::lifecycle::Lifecycle;
use crate::services::role_oracle::{HttpRoleOracle, RoleOracle};

/// Seeds the exam states and wires the lifecycle components over PostgreSQL.
pub(crate) async fn lifecycle(settings: &Settings, pool: PgPool) -> anyhow::Result<Lifecycle> {
    let lifecycle = Lifecycle::from_settings(settings, pool)
        .await
        .context("Failed to initialize exam lifecycle")?;

    let states = lifecycle.registry();
    tracing::info!(
        active = states.id(StateName::Active),
        inactive = states.id(StateName::Inactive),
        finished = states.id(StateName::Finished),
        "Exam state registry loaded"
    );
    Ok(lifecycle)
}

pub(crate) fn role_oracle(
    settings: &Settings,
    redis: RedisHandle,
) -> anyhow::Result<Arc<dyn RoleOracle>> {
    let oracle = HttpRoleOracle::from_settings(settings, redis)
        .context("Failed to build role oracle HTTP client")?;
    if !oracle.is_configured() {
        tracing::warn!("ROLE_ORACLE_BASE_URL not configured; role lookups will fail");
    }
    Ok(Arc::new(oracle))
}
