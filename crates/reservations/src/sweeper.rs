//! Background expiry sweep.

use std::time::Duration;

use common::Clock;
use store::{ReservationStore, StockStore};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::manager::ReservationManager;

/// Periodically expires overdue reservations.
///
/// Dropping the sweeper stops the task too, without waiting for it.
pub struct ExpirySweeper {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ExpirySweeper {
    /// Spawns a sweep every `interval` on the current tokio runtime.
    ///
    /// The first sweep runs immediately.
    pub fn spawn<S>(manager: ReservationManager<S>, interval: Duration) -> Self
    where
        S: StockStore + ReservationStore + Clone + 'static,
    {
        let (shutdown, mut stop) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(?interval, "expiry sweeper started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let now = manager.clock().now();
                        match manager.sweep_expired(now).await {
                            Ok(report) => {
                                metrics::counter!("reservation_sweeps_total").increment(1);
                                if report.failed > 0 {
                                    tracing::warn!(failed = report.failed, "expiry sweep left reservations active");
                                }
                            }
                            Err(e) => tracing::error!(error = %e, "expiry sweep failed"),
                        }
                    }
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }

            tracing::info!("expiry sweeper stopped");
        });

        Self { shutdown, handle }
    }

    /// Stops the sweeper and waits for an in-flight sweep to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            tracing::error!(error = %e, "expiry sweeper task panicked");
        }
    }
}
