//! Replay of queued operations when connectivity returns

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::queue::OfflineOperationQueue;
use super::transport::NetworkTransport;
use crate::notify::{Notification, Presenter};

/// Lower bound for the replay timeout and the retry cadence
const MIN_PERIOD: Duration = Duration::from_secs(1);

/// Outcome of one sync pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub attempted: usize,
    pub replayed: usize,
    pub failed: usize,
    /// Live queue length after the pass
    pub remaining: usize,
    /// Another pass was already running
    pub skipped: bool,
}

pub struct SyncCoordinator {
    queue: Arc<Mutex<OfflineOperationQueue>>,
    transport: Arc<dyn NetworkTransport>,
    presenter: Arc<dyn Presenter>,
    request_timeout: Duration,
    retry_interval: Duration,
    in_flight: AtomicBool,
}

/// Clears the in-flight flag when a pass ends, however it ends
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SyncCoordinator {
    pub fn new(
        queue: Arc<Mutex<OfflineOperationQueue>>,
        transport: Arc<dyn NetworkTransport>,
        presenter: Arc<dyn Presenter>,
        request_timeout: Duration,
        retry_interval: Duration,
    ) -> Self {
        Self {
            queue,
            transport,
            presenter,
            request_timeout: request_timeout.max(MIN_PERIOD),
            retry_interval: retry_interval.max(MIN_PERIOD),
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn is_syncing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Replay a snapshot of the queue in order.
    ///
    /// Successes are removed from the live queue by id; failures stay for the
    /// next pass. Operations enqueued during the pass are left untouched.
    pub async fn sync(&self) -> SyncReport {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            debug!("Sync already in progress, skipping");
            return SyncReport {
                skipped: true,
                ..Default::default()
            };
        }
        let _guard = InFlight(&self.in_flight);

        let snapshot = self.queue.lock().await.snapshot();
        let mut report = SyncReport {
            attempted: snapshot.len(),
            ..Default::default()
        };
        if snapshot.is_empty() {
            return report;
        }
        info!("Replaying {} queued operation(s)", snapshot.len());

        let mut succeeded = Vec::new();
        for operation in &snapshot {
            let request = &operation.request_descriptor;
            match time::timeout(self.request_timeout, self.transport.send(request)).await {
                Ok(Ok(true)) => succeeded.push(operation.id.clone()),
                Ok(Ok(false)) => {
                    warn!("Replay of {} {} was rejected, keeping {}", request.method, request.url, operation.id);
                }
                Ok(Err(e)) => {
                    warn!("Replay of {} failed: {:#}", operation.id, e);
                }
                Err(_) => {
                    warn!(
                        "Replay of {} timed out after {}s",
                        operation.id,
                        self.request_timeout.as_secs()
                    );
                }
            }
        }

        let mut queue = self.queue.lock().await;
        report.replayed = queue.remove(&succeeded);
        report.failed = report.attempted - succeeded.len();
        report.remaining = queue.len();
        if let Err(e) = queue.persist() {
            warn!("{:#}", e);
        }
        drop(queue);

        info!(
            "Sync finished: {} replayed, {} failed, {} remaining",
            report.replayed, report.failed, report.remaining
        );
        if report.remaining == 0 {
            self.presenter.notify(Notification::SyncComplete {
                replayed: report.replayed,
            });
        }
        report
    }

    async fn sync_if_pending(&self) {
        if !self.queue.lock().await.is_empty() {
            self.sync().await;
        }
    }

    /// Drive replays from connectivity changes and a fixed retry cadence
    /// until shutdown is signalled or the connectivity sender goes away
    pub async fn run(
        &self,
        mut connectivity: watch::Receiver<bool>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut ticker = time::interval(self.retry_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        let mut online = *connectivity.borrow_and_update();
        if online {
            self.sync_if_pending().await;
        }

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    debug!("Sync coordinator shutting down");
                    break;
                }
                changed = connectivity.changed() => {
                    if changed.is_err() {
                        debug!("Connectivity source closed, stopping sync coordinator");
                        break;
                    }
                    let now = *connectivity.borrow_and_update();
                    if now && !online {
                        info!("Connectivity restored");
                        online = now;
                        self.sync_if_pending().await;
                    } else {
                        if !now && online {
                            info!("Connectivity lost");
                        }
                        online = now;
                    }
                }
                _ = ticker.tick() => {
                    if online {
                        self.sync_if_pending().await;
                    }
                }
            }
        }
    }
}
