// service/background_jobs.rs
use std::sync::Arc;
use chrono::Utc;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::AppState;

/// Escalates unanswered change requests and expires stale extension
/// requests. Reads do the same lazily; this pass catches contracts nobody
/// opens. An interval of zero disables the job.
pub async fn start_escalation_sweep_job(app_state: Arc<AppState>) {
    let every = app_state.env.escalation_sweep_interval_secs;
    if every == 0 {
        tracing::info!("Escalation sweep disabled");
        return;
    }

    let mut interval = interval(Duration::from_secs(every));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;

        tracing::debug!("Running escalation sweep at {}", Utc::now());

        match app_state.amendment_service.sweep().await {
            Ok(0) => {}
            Ok(count) => tracing::info!("Escalation sweep checked {} contracts", count),
            Err(e) => tracing::error!("Escalation sweep failed: {}", e),
        }
    }
}
