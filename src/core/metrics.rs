use std::sync::OnceLock;

use metrics::{describe_counter, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::core::config::Settings;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub(crate) fn init(settings: &Settings) -> anyhow::Result<()> {
    if !settings.telemetry().prometheus_enabled {
        return Ok(());
    }

    if PROM_HANDLE.get().is_none() {
        let handle = PrometheusBuilder::new().install_recorder()?;
        let _ = PROM_HANDLE.set(handle);
        describe_lifecycle_metrics();
    }
    Ok(())
}

pub(crate) fn render() -> Option<String> {
    PROM_HANDLE.get().map(|handle| handle.render())
}

fn describe_lifecycle_metrics() {
    describe_counter!("lifecycle_timers_fired_total", Unit::Count, "Exam timers that fired");
    describe_counter!(
        "lifecycle_scheduling_failures_total",
        Unit::Count,
        "Arm or cancel calls that exhausted their persistence retries"
    );
    describe_counter!("executions_opened_total", Unit::Count, "Executions created");
    describe_counter!("executions_closed_total", Unit::Count, "Executions closed, by reason");
    describe_counter!(
        "executions_force_close_failures_total",
        Unit::Count,
        "Executions that could not be closed when their exam ended"
    );
    describe_counter!("answers_recorded_total", Unit::Count, "Answer selections stored");
    describe_counter!("role_oracle_lookups_total", Unit::Count, "Role oracle lookups, by source");
}
