//! Periodic heartbeat task

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Run `tick` every `period` until `cancel` fires. The first tick happens one
/// full period after spawning. A tick that returns false stops the task.
pub fn spawn_heartbeat<F>(period: Duration, cancel: CancellationToken, mut tick: F) -> JoinHandle<()>
where
    F: FnMut() -> bool + Send + 'static,
{
    let first = Instant::now() + period;
    tokio::spawn(async move {
        let mut interval = interval_at(first, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if !tick() {
                        break;
                    }
                }
            }
        }
        debug!("Heartbeat stopped");
    })
}
