//! Periodic expiry worker
//!
//! One ticker-driven task runs the manager's sweep: once at start, then on
//! every tick. Ticks are serialized, so a slow sweep delays the next one
//! instead of overlapping it. Sweep errors are logged and the loop keeps
//! going; the next tick picks up whatever was missed.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::manager::ServicePoolManager;

/// Run the expiry loop until the token is cancelled.
pub async fn run(manager: Arc<ServicePoolManager>, period: Duration, shutdown: CancellationToken) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("expiry worker stopping");
                return;
            }
            // The first tick completes immediately, so the sweep also runs
            // once at startup.
            _ = ticker.tick() => {
                if let Err(e) = manager.expire_services().await {
                    error!(error = %e, "could not expire services");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::kube_client::MockKubeClient;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn manager_counting_sweeps(sweeps: Arc<AtomicU32>) -> Arc<ServicePoolManager> {
        let mut kube = MockKubeClient::new();
        let counter = sweeps.clone();
        kube.expect_list_deployments().returning(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(vec![])
        });
        kube.expect_list_services().returning(|_| Ok(vec![]));

        let mut clock = MockClock::new();
        clock
            .expect_now()
            .returning(|| Utc.with_ymd_and_hms(2026, 8, 2, 12, 0, 0).unwrap());

        Arc::new(ServicePoolManager::with_placement(
            Arc::new(kube),
            Arc::new(clock),
            Default::default(),
        ))
    }

    #[tokio::test]
    async fn sweeps_once_at_start_and_then_per_tick() {
        let sweeps = Arc::new(AtomicU32::new(0));
        let manager = manager_counting_sweeps(sweeps.clone());
        let shutdown = CancellationToken::new();

        let worker = tokio::spawn(run(
            manager,
            Duration::from_millis(20),
            shutdown.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(70)).await;
        shutdown.cancel();
        worker.await.unwrap();

        let count = sweeps.load(Ordering::SeqCst);
        assert!(count >= 2, "expected startup sweep plus ticks, got {count}");
    }

    #[tokio::test]
    async fn sweep_errors_do_not_stop_the_loop() {
        let calls = Arc::new(AtomicU32::new(0));

        let mut kube = MockKubeClient::new();
        let counter = calls.clone();
        kube.expect_list_deployments().returning(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(crate::error::Error::cluster("could not list deployments: boom"))
        });

        let mut clock = MockClock::new();
        clock
            .expect_now()
            .returning(|| Utc.with_ymd_and_hms(2026, 8, 2, 12, 0, 0).unwrap());

        let manager = Arc::new(ServicePoolManager::with_placement(
            Arc::new(kube),
            Arc::new(clock),
            Default::default(),
        ));

        let shutdown = CancellationToken::new();
        let worker = tokio::spawn(run(
            manager,
            Duration::from_millis(20),
            shutdown.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(70)).await;
        shutdown.cancel();
        worker.await.unwrap();

        assert!(calls.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn cancellation_stops_the_worker_promptly() {
        let sweeps = Arc::new(AtomicU32::new(0));
        let manager = manager_counting_sweeps(sweeps);
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        // Already-cancelled token: the worker must return without ticking
        // forever.
        tokio::time::timeout(
            Duration::from_secs(1),
            run(manager, Duration::from_secs(3600), shutdown),
        )
        .await
        .unwrap();
    }
}
