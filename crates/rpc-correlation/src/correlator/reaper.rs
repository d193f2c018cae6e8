//! Periodic sweep of stale correlation records.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::debug;

use super::Correlator;

/// Background task that sweeps `correlator` every `interval` until
/// `shutdown` flips to `true` or its sender is dropped.
pub async fn reaper_task(
    correlator: Arc<Correlator>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut sweep_interval = time::interval_at(Instant::now() + interval, interval);
    sweep_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    debug!(interval_ms = interval.as_millis() as u64, "Reaper started");

    loop {
        tokio::select! {
            _ = sweep_interval.tick() => {
                correlator.sweep(Instant::now());
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    debug!("Reaper stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Outcome, RequestState};

    #[tokio::test(start_paused = true)]
    async fn test_reaper_collects_timed_out_records() {
        let correlator = Arc::new(Correlator::new(
            Duration::from_secs(5),
            Duration::from_secs(300),
        ));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(reaper_task(
            Arc::clone(&correlator),
            Duration::from_millis(100),
            shutdown_rx,
        ));

        let outcome = correlator
            .wait_for_reply(1, Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::TimedOut);
        assert_eq!(correlator.request_state(1), Some(RequestState::TimedOut));

        time::sleep(Duration::from_millis(100)).await;
        assert_eq!(correlator.count_records(), 0);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaper_stops_when_sender_dropped() {
        let correlator = Arc::new(Correlator::new(
            Duration::from_secs(5),
            Duration::from_secs(300),
        ));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(reaper_task(correlator, Duration::from_secs(30), shutdown_rx));

        drop(shutdown_tx);
        task.await.unwrap();
    }
}
