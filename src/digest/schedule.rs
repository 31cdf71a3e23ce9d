//! Cron-driven background jobs.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

/// Next time `schedule` fires after `after`.
pub fn next_fire(schedule: &cron::Schedule, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule.after(&after).next()
}

/// Spawn a task that awaits `run()` every time `schedule` fires.
///
/// Runs never overlap within one ticker: the next fire time is computed
/// after the previous run returns.
pub fn spawn_ticker<F, Fut>(
    job: &'static str,
    schedule: cron::Schedule,
    run: F,
) -> tokio::task::JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            let now = Utc::now();
            let Some(next) = next_fire(&schedule, now) else {
                warn!(job, "Schedule has no upcoming fire time, stopping ticker");
                return;
            };
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            info!(job, next = %next, "Next scheduled run");
            tokio::time::sleep(wait).await;
            run().await;
        }
    })
}
