//! Integration tests for offline queueing and replay:
//! - no operation is lost when replays fail
//! - operations queued during a pass are not part of it
//! - reconnects drain the queue and notify once

use anyhow::{bail, Result};
use portal_telemetry::notify::ChannelPresenter;
use portal_telemetry::offline::{OfflineOperation, SyncCoordinator};
use portal_telemetry::storage::OFFLINE_QUEUE_KEY;
use portal_telemetry::{
    ChannelEventSource, LogPresenter, ManualProbe, MemoryStore, NetworkTransport, Notification,
    OfflineOperationQueue, RequestDescriptor, Telemetry, TelemetryConfig,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};

/// Fails every call whose position is a multiple of `every`
struct Flaky {
    calls: AtomicUsize,
    every: usize,
}

#[async_trait::async_trait]
impl NetworkTransport for Flaky {
    async fn send(&self, _request: &RequestDescriptor) -> Result<bool> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n % self.every == 0 {
            bail!("connection reset");
        }
        Ok(true)
    }
}

/// Succeeds, and while a first-generation request is in flight enqueues a
/// follow-up for it. Records every URL it sends.
struct EnqueuesDuringSend {
    queue: Arc<Mutex<OfflineOperationQueue>>,
    sent: Mutex<Vec<String>>,
}

#[async_trait::async_trait]
impl NetworkTransport for EnqueuesDuringSend {
    async fn send(&self, request: &RequestDescriptor) -> Result<bool> {
        self.sent.lock().await.push(request.url.clone());
        if !request.url.ends_with("/follow-up") {
            let follow_up = RequestDescriptor::new("PUT", &format!("{}/follow-up", request.url));
            self.queue.lock().await.enqueue(follow_up)?;
        }
        Ok(true)
    }
}

/// Replays succeed only when the URL says so
struct ByUrl;

#[async_trait::async_trait]
impl NetworkTransport for ByUrl {
    async fn send(&self, request: &RequestDescriptor) -> Result<bool> {
        Ok(!request.url.contains("fail"))
    }
}

fn coordinator(
    queue: Arc<Mutex<OfflineOperationQueue>>,
    transport: Arc<dyn NetworkTransport>,
) -> SyncCoordinator {
    SyncCoordinator::new(
        queue,
        transport,
        Arc::new(LogPresenter),
        Duration::from_secs(30),
        Duration::from_secs(60),
    )
}

#[tokio::test]
async fn test_queue_conservation_under_failure() {
    let store = Arc::new(MemoryStore::new());
    let mut queue = OfflineOperationQueue::new(store.clone());
    for i in 0..12 {
        queue
            .enqueue(RequestDescriptor::new("POST", &format!("/api/op/{}", i)))
            .unwrap();
    }
    let original: HashSet<String> = queue.list().iter().map(|op| op.id.clone()).collect();
    let queue = Arc::new(Mutex::new(queue));

    let sync = coordinator(
        queue.clone(),
        Arc::new(Flaky {
            calls: AtomicUsize::new(0),
            every: 3,
        }),
    );

    let report = sync.sync().await;
    assert_eq!(report.attempted, 12);
    assert_eq!(report.replayed, 8);
    assert_eq!(report.failed, 4);
    assert_eq!(report.replayed + report.remaining, original.len());

    // Remaining operations are exactly the failed ones, persisted as such
    let remaining: Vec<OfflineOperation> = queue.lock().await.snapshot();
    assert!(remaining.iter().all(|op| original.contains(&op.id)));
    let persisted: Vec<OfflineOperation> =
        serde_json::from_str(&store.raw(OFFLINE_QUEUE_KEY).unwrap()).unwrap();
    assert_eq!(persisted, remaining);

    // A second pass keeps conserving
    let second = sync.sync().await;
    assert_eq!(second.attempted, 4);
    assert_eq!(second.replayed + second.remaining, 4);
}

#[tokio::test]
async fn test_operations_enqueued_mid_pass_wait_for_next_pass() {
    let queue = Arc::new(Mutex::new(OfflineOperationQueue::new(Arc::new(MemoryStore::new()))));
    {
        let mut q = queue.lock().await;
        q.enqueue(RequestDescriptor::new("POST", "/api/a")).unwrap();
        q.enqueue(RequestDescriptor::new("POST", "/api/b")).unwrap();
    }

    let transport = Arc::new(EnqueuesDuringSend {
        queue: queue.clone(),
        sent: Mutex::new(Vec::new()),
    });
    let sync = coordinator(queue.clone(), transport.clone());

    let report = sync.sync().await;
    assert_eq!(report.attempted, 2);
    assert_eq!(report.replayed, 2);
    assert_eq!(report.remaining, 2);

    let urls: Vec<String> = queue
        .lock()
        .await
        .list()
        .iter()
        .map(|op| op.request_descriptor.url.clone())
        .collect();
    assert_eq!(urls, vec!["/api/a/follow-up", "/api/b/follow-up"]);

    // The next pass picks them up, and each is sent exactly once
    let second = sync.sync().await;
    assert_eq!(second.attempted, 2);
    assert_eq!(second.replayed, 2);
    assert_eq!(second.remaining, 0);
    assert_eq!(
        *transport.sent.lock().await,
        vec!["/api/a", "/api/b", "/api/a/follow-up", "/api/b/follow-up"]
    );

    assert_eq!(sync.sync().await.attempted, 0);
}

#[tokio::test]
async fn test_mixed_results_do_not_announce_completion() {
    let (presenter, mut notifications) = ChannelPresenter::new();
    let telemetry = Telemetry::builder(TelemetryConfig::default())
        .store(Arc::new(MemoryStore::new()))
        .probe(Arc::new(ManualProbe::new()))
        .transport(Arc::new(ByUrl))
        .presenter(Arc::new(presenter))
        .build()
        .unwrap();

    for url in ["/api/ok/1", "/api/fail/2", "/api/ok/3"] {
        telemetry
            .record_failed_request(RequestDescriptor::new("POST", url))
            .await
            .unwrap();
    }
    while notifications.try_recv().is_ok() {}

    let report = telemetry.sync().await;
    assert_eq!(report.remaining, 1);

    let queued = telemetry.queued_operations().await;
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].request_descriptor.url, "/api/fail/2");
    assert!(notifications.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_drains_queue_and_notifies() {
    let (presenter, mut notifications) = ChannelPresenter::new();
    let telemetry = Telemetry::builder(TelemetryConfig::default())
        .store(Arc::new(MemoryStore::new()))
        .probe(Arc::new(ManualProbe::new()))
        .transport(Arc::new(ByUrl))
        .presenter(Arc::new(presenter))
        .build()
        .unwrap();

    let source = ChannelEventSource::new();
    let (online_tx, online_rx) = watch::channel(false);
    telemetry.init(&source, online_rx).await.unwrap();

    telemetry
        .record_failed_request(RequestDescriptor::new("PATCH", "/api/perfil").with_body(r#"{"nome":"Ana"}"#))
        .await
        .unwrap();
    assert!(matches!(
        notifications.recv().await,
        Some(Notification::OperationQueued { .. })
    ));

    online_tx.send(true).unwrap();
    assert_eq!(
        notifications.recv().await,
        Some(Notification::SyncComplete { replayed: 1 })
    );
    assert!(telemetry.queued_operations().await.is_empty());

    telemetry.dispose().await.unwrap();
}
