use chrono::{DateTime, Days, Local, NaiveTime, TimeZone};
use log::{debug, error};
use std::future::Future;
use std::time::Duration as StdDuration;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};

pub const DAILY: StdDuration = StdDuration::from_secs(24 * 60 * 60);

/// Runs a job after `first_delay` and then every `period` until stopped.
///
/// Cancellation is only observed between runs: a run that has started always
/// finishes before the task exits. Dropping the task cancels it too, without
/// waiting.
pub struct PeriodicTask {
    name: String,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    _cancel_on_drop: DropGuard,
}

impl PeriodicTask {
    pub fn spawn<F, Fut>(name: &str, first_delay: StdDuration, period: StdDuration, mut job: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task_name = name.to_string();
        let handle = tokio::spawn(async move {
            let mut delay = first_delay;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
                debug!("Running periodic task {}", task_name);
                job().await;
                delay = period;
            }
            debug!("Periodic task {} stopped", task_name);
        });

        Self {
            name: name.to_string(),
            _cancel_on_drop: cancel.clone().drop_guard(),
            cancel,
            handle,
        }
    }

    /// Signals the task to stop and waits until it has.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            error!("Periodic task {} ended abnormally: {}", self.name, e);
        }
    }
}

/// Time from `now` until the next local midnight.
pub fn until_next_midnight(now: DateTime<Local>) -> StdDuration {
    let next_day = now.date_naive().checked_add_days(Days::new(1));
    let midnight = next_day
        .map(|day| day.and_time(NaiveTime::MIN))
        .and_then(|naive| Local.from_local_datetime(&naive).earliest());

    match midnight {
        Some(midnight) => (midnight - now).to_std().unwrap_or(StdDuration::ZERO),
        // No representable midnight (end of calendar); fall back to a full day
        None => DAILY,
    }
}
