use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::core::shutdown::Shutdown;
use crate::core::state::AppState;
use crate::lifecycle::Lifecycle;

/// Runs the job-table sweeper until shutdown, then stops the in-memory timers.
pub(crate) async fn run(state: AppState, shutdown: watch::Receiver<bool>) {
    let lifecycle = state.lifecycle().clone();
    let period = Duration::from_secs(state.settings().lifecycle().sweep_interval_seconds);

    let sweeper = tokio::spawn(sweep_loop(lifecycle.clone(), period, shutdown.clone()));

    Shutdown::wait(shutdown).await;
    if let Err(err) = sweeper.await {
        tracing::error!(error = %err, "Lifecycle sweeper join failed");
    }
    lifecycle.scheduler().shutdown().await;
}

async fn sweep_loop(lifecycle: Lifecycle, period: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut tick = interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tick.tick() => {
                match lifecycle.scheduler().sweep_due().await {
                    Ok(0) => {}
                    Ok(armed) => tracing::info!(armed, "Lifecycle sweeper re-armed due jobs"),
                    Err(err) => tracing::error!(error = %err, "Lifecycle sweep failed"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration as StdDuration;

    use time::Duration;

    use super::sweep_loop;
    use crate::core::shutdown::Shutdown;
    use crate::core::time::primitive_now_utc;
    use crate::db::models::LifecycleJob;
    use crate::db::types::{JobKind, StateName};
    use crate::test_support::{eventually, seed_exam, LifecycleHarness};

    #[tokio::test]
    async fn sweep_loop_fires_orphaned_jobs_and_stops_on_shutdown() {
        let harness = LifecycleHarness::new().await;
        let now = primitive_now_utc();
        let exam = seed_exam(
            &harness,
            StateName::Active,
            now - Duration::hours(2),
            now - Duration::minutes(1),
        )
        .await;
        harness.store.put_job(LifecycleJob {
            key: JobKind::End.key_for(&exam.id),
            exam_id: exam.id.clone(),
            kind: JobKind::End,
            fire_at: exam.end_at,
            created_at: exam.start_at,
        });

        let shutdown = Shutdown::new();
        let handle = tokio::spawn(sweep_loop(
            harness.lifecycle.clone(),
            StdDuration::from_millis(50),
            shutdown.subscribe(),
        ));

        eventually(|| harness.exam_state(&exam.id) == Some(StateName::Finished)).await;
        assert!(harness.store.job_keys().is_empty());

        shutdown.trigger();
        tokio::time::timeout(StdDuration::from_secs(1), handle)
            .await
            .expect("sweeper stopped")
            .expect("join");
    }
}
