//! Telemetry context
//!
//! Owns every store and collaborator, routes raw events into learning and
//! audit, and exposes the read API. Constructed explicitly through
//! [`TelemetryBuilder`], started with [`Telemetry::init`] and shut down with
//! [`Telemetry::dispose`].

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::audit::{
    self, AuditFilter, AuditForwarder, AuditLevel, AuditLog, AuditLogEntry, AuditStats,
    ExportFormat, HttpForwarder,
};
use crate::config::TelemetryConfig;
use crate::events::EventSource;
use crate::learning::{
    predict_next_actions, route_prefix_predicate, AutomationRule, AutomationRules,
    BoundedEventContext, FormPredicate, LearningCategory, LearningStore, OptimizationRecord,
    PatternAnalyzer, PredictionRecord, SuggestionEngine, SuggestionRecord,
};
use crate::notify::{LogPresenter, Notification, Presenter};
use crate::offline::{
    HttpTransport, NetworkTransport, OfflineOperation, OfflineOperationQueue, RequestDescriptor,
    SyncCoordinator, SyncReport,
};
use crate::pressure::{MeminfoProbe, PressureGate, ResourcePressureProbe};
use crate::storage::{DurableKeyValueStore, FileStore};
use crate::types::{fields, Event, EventPayload, Scalar};

/// Usage counters for dashboards and the CLI
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryStats {
    pub total_interactions: usize,
    pub total_navigations: usize,
    pub total_form_interactions: usize,
    pub total_errors: usize,
    pub suggestions_generated: u64,
    pub automation_rules: usize,
    pub enabled_rules: usize,
    pub audit_entries: usize,
    pub queued_operations: usize,
}

/// Lifecycle of a telemetry context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryState {
    Idle,
    Running,
    Disposed,
}

impl std::fmt::Display for TelemetryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TelemetryState::Idle => write!(f, "Idle"),
            TelemetryState::Running => write!(f, "Running"),
            TelemetryState::Disposed => write!(f, "Disposed"),
        }
    }
}

/// Who is using the portal and where they are
struct Session {
    user_id: Option<String>,
    session_id: String,
    /// Page the user is on and when they got there
    page_entered: Option<(String, DateTime<Utc>)>,
}

struct Lifecycle {
    state: TelemetryState,
    shutdown_tx: Option<broadcast::Sender<()>>,
    tasks: Vec<JoinHandle<()>>,
}

struct Inner {
    config: TelemetryConfig,
    analyzer: PatternAnalyzer,
    context: Mutex<BoundedEventContext>,
    learning: Mutex<LearningStore>,
    engine: Mutex<SuggestionEngine>,
    rules: Mutex<AutomationRules>,
    audit: Mutex<AuditLog>,
    queue: Arc<Mutex<OfflineOperationQueue>>,
    sync: Arc<SyncCoordinator>,
    presenter: Arc<dyn Presenter>,
    forwarder: Option<Arc<dyn AuditForwarder>>,
    session: Mutex<Session>,
    lifecycle: Mutex<Lifecycle>,
}

/// Assembles a [`Telemetry`] context. Collaborators not supplied fall back
/// to the file store, the meminfo probe, reqwest transport and forwarder,
/// and the log presenter.
pub struct TelemetryBuilder {
    config: TelemetryConfig,
    store: Option<Arc<dyn DurableKeyValueStore>>,
    probe: Option<Arc<dyn ResourcePressureProbe>>,
    transport: Option<Arc<dyn NetworkTransport>>,
    forwarder: Option<Arc<dyn AuditForwarder>>,
    presenter: Option<Arc<dyn Presenter>>,
    form_predicate: Option<FormPredicate>,
}

impl TelemetryBuilder {
    pub fn new(config: TelemetryConfig) -> Self {
        Self {
            config,
            store: None,
            probe: None,
            transport: None,
            forwarder: None,
            presenter: None,
            form_predicate: None,
        }
    }

    pub fn store(mut self, store: Arc<dyn DurableKeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn probe(mut self, probe: Arc<dyn ResourcePressureProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn NetworkTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn forwarder(mut self, forwarder: Arc<dyn AuditForwarder>) -> Self {
        self.forwarder = Some(forwarder);
        self
    }

    pub fn presenter(mut self, presenter: Arc<dyn Presenter>) -> Self {
        self.presenter = Some(presenter);
        self
    }

    pub fn form_predicate(mut self, predicate: FormPredicate) -> Self {
        self.form_predicate = Some(predicate);
        self
    }

    /// Build the context and restore persisted state
    pub fn build(self) -> Result<Telemetry> {
        let config = self.config;

        let store: Arc<dyn DurableKeyValueStore> = match self.store {
            Some(store) => store,
            None => Arc::new(FileStore::from_config(&config)?),
        };
        let probe: Arc<dyn ResourcePressureProbe> = match self.probe {
            Some(probe) => probe,
            None => Arc::new(MeminfoProbe::new()),
        };
        let transport: Arc<dyn NetworkTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(
                config.offline.base_url.clone(),
                config.offline.request_timeout(),
            )?),
        };
        let forwarder: Option<Arc<dyn AuditForwarder>> = match (self.forwarder, &config.audit.forward_endpoint) {
            (Some(forwarder), _) => Some(forwarder),
            (None, Some(endpoint)) => Some(Arc::new(HttpForwarder::new(endpoint)?)),
            (None, None) => None,
        };
        let presenter = self.presenter.unwrap_or_else(|| Arc::new(LogPresenter));
        let form_predicate = self
            .form_predicate
            .unwrap_or_else(|| route_prefix_predicate(config.learning.form_routes.clone()));

        let mut learning = LearningStore::new(
            store.clone(),
            PressureGate::new(probe.clone(), config.pressure.learning()),
            config.learning.category_capacity,
            config.learning.flush_every,
        );
        learning.load();

        let mut audit = AuditLog::new(
            store.clone(),
            PressureGate::new(probe, config.pressure.audit()),
            &config.audit,
        );
        audit.load();

        let mut rules = AutomationRules::new(store.clone());
        rules.load();

        let mut queue = OfflineOperationQueue::new(store);
        queue.load();
        let queue = Arc::new(Mutex::new(queue));

        let sync = Arc::new(SyncCoordinator::new(
            queue.clone(),
            transport,
            presenter.clone(),
            config.offline.request_timeout(),
            config.offline.retry_interval(),
        ));

        let engine = SuggestionEngine::new(
            form_predicate,
            config.learning.slow_page_threshold_ms,
            config.learning.form_friction_threshold,
        );

        let inner = Inner {
            analyzer: PatternAnalyzer::from_config(&config.learning),
            context: Mutex::new(BoundedEventContext::new(config.learning.context_capacity)),
            learning: Mutex::new(learning),
            engine: Mutex::new(engine),
            rules: Mutex::new(rules),
            audit: Mutex::new(audit),
            queue,
            sync,
            presenter,
            forwarder,
            session: Mutex::new(Session {
                user_id: None,
                session_id: format!("session-{}", uuid::Uuid::new_v4().simple()),
                page_entered: None,
            }),
            lifecycle: Mutex::new(Lifecycle {
                state: TelemetryState::Idle,
                shutdown_tx: None,
                tasks: Vec::new(),
            }),
            config,
        };

        Ok(Telemetry {
            inner: Arc::new(inner),
        })
    }
}

/// Shared handle to the telemetry context
#[derive(Clone)]
pub struct Telemetry {
    inner: Arc<Inner>,
}

impl Telemetry {
    pub fn builder(config: TelemetryConfig) -> TelemetryBuilder {
        TelemetryBuilder::new(config)
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.inner.config
    }

    pub async fn state(&self) -> TelemetryState {
        self.inner.lifecycle.lock().await.state
    }

    /// Subscribe to events and start the ingestion, forwarding and sync tasks
    pub async fn init(&self, source: &dyn EventSource, connectivity: watch::Receiver<bool>) -> Result<()> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        if lifecycle.state != TelemetryState::Idle {
            bail!("Telemetry cannot start from state {}", lifecycle.state);
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        if let Some(ref forwarder) = self.inner.forwarder {
            let (tx, rx) = mpsc::unbounded_channel();
            self.inner.audit.lock().await.attach_forwarder(tx);
            lifecycle.tasks.push(audit::spawn_forwarder(forwarder.clone(), rx));
        }

        let mut events = source.subscribe();
        let mut shutdown_rx = shutdown_tx.subscribe();
        let telemetry = self.clone();
        lifecycle.tasks.push(tokio::spawn(async move {
            loop {
                // Events already delivered are handled before shutdown
                tokio::select! {
                    biased;
                    event = events.recv() => match event {
                        Some(event) => telemetry.handle_event(event).await,
                        None => {
                            debug!("Event source closed");
                            break;
                        }
                    },
                    _ = shutdown_rx.recv() => break,
                }
            }
        }));

        let sync = self.inner.sync.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        lifecycle.tasks.push(tokio::spawn(async move {
            sync.run(connectivity, shutdown_rx).await;
        }));

        lifecycle.shutdown_tx = Some(shutdown_tx);
        lifecycle.state = TelemetryState::Running;
        info!("Telemetry running (session {})", self.inner.session.lock().await.session_id);
        Ok(())
    }

    /// Stop background tasks and flush every store
    pub async fn dispose(&self) -> Result<()> {
        let tasks = {
            let mut lifecycle = self.inner.lifecycle.lock().await;
            if lifecycle.state == TelemetryState::Disposed {
                return Ok(());
            }
            if let Some(tx) = lifecycle.shutdown_tx.take() {
                let _ = tx.send(());
            }
            lifecycle.state = TelemetryState::Disposed;
            std::mem::take(&mut lifecycle.tasks)
        };

        self.inner.audit.lock().await.detach_forwarder();
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Telemetry task ended abnormally: {}", e);
            }
        }

        if self.flush().await.is_err() {
            warn!("Telemetry disposed with unsaved state");
        }
        info!("Telemetry disposed");
        Ok(())
    }

    /// Persist learning data, audit log and offline queue now
    ///
    /// Every store is attempted; the first failure is returned.
    pub async fn flush(&self) -> Result<()> {
        let learning = self.inner.learning.lock().await.flush();
        let audit = self.inner.audit.lock().await.flush();
        let queue = self.inner.queue.lock().await.persist();

        let mut first = None;
        for result in [learning, audit, queue] {
            if let Err(e) = result {
                warn!("Flush failed: {:#}", e);
                first.get_or_insert(e);
            }
        }
        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Route one raw event into the context, learning store and audit log
    pub async fn handle_event(&self, event: Event) {
        if self.inner.learning.lock().await.admits() {
            self.inner.context.lock().await.push(event.clone());
        }

        let occurred_at = event.occurred_at;
        match event.payload {
            EventPayload::Navigation { from, to } => {
                let previous = {
                    let mut session = self.inner.session.lock().await;
                    session.page_entered.replace((to.clone(), occurred_at))
                };

                let mut learning = self.inner.learning.lock().await;
                learning.record_at(
                    LearningCategory::Navigation,
                    fields([("from", from.as_str()), ("to", to.as_str())]),
                    occurred_at,
                );
                if let Some((page, entered)) = previous {
                    let duration = (occurred_at - entered).num_milliseconds().max(0) as f64;
                    learning.record_at(
                        LearningCategory::PageTime,
                        fields([("page", Scalar::from(page)), ("duration", Scalar::from(duration))]),
                        occurred_at,
                    );
                }
                drop(learning);

                self.fire_automation(&to).await;
            }
            EventPayload::Click { target, location } => {
                self.inner.learning.lock().await.record_at(
                    LearningCategory::Interactions,
                    fields([("target", target.as_str()), ("location", location.as_str())]),
                    occurred_at,
                );
                self.log_audit(
                    "user_interaction",
                    AuditLevel::Info,
                    json_map([("target", target.into()), ("location", location.into())]),
                )
                .await;
            }
            EventPayload::FormInput {
                form,
                field,
                value,
                location,
            } => {
                self.inner.learning.lock().await.record_at(
                    LearningCategory::FormInteractions,
                    fields([
                        ("form", form.as_str()),
                        ("field", field.as_str()),
                        ("location", location.as_str()),
                    ]),
                    occurred_at,
                );
                self.log_audit(
                    "form_interaction",
                    AuditLevel::Info,
                    json_map([
                        ("form", form.into()),
                        ("location", location.into()),
                        (field.as_str(), value.into()),
                    ]),
                )
                .await;
            }
            EventPayload::Error { message, source } => {
                self.inner.learning.lock().await.record_at(
                    LearningCategory::Errors,
                    fields([("message", message.as_str()), ("source", source.as_str())]),
                    occurred_at,
                );
                self.log_audit(
                    "application_error",
                    AuditLevel::Error,
                    json_map([("message", message.into()), ("source", source.into())]),
                )
                .await;
            }
            EventPayload::NetworkCompleted {
                url,
                method,
                status,
                duration_ms,
                ok,
            } => {
                if !ok {
                    let message = match status {
                        Some(code) => format!("HTTP {}", code),
                        None => "Network Error".to_string(),
                    };
                    self.inner.learning.lock().await.record_at(
                        LearningCategory::Errors,
                        fields([("message", message.as_str()), ("source", url.as_str())]),
                        occurred_at,
                    );
                }
                self.log_audit(
                    "network_request",
                    network_level(ok, status),
                    json_map([
                        ("url", url.into()),
                        ("method", method.into()),
                        ("status", status.into()),
                        ("durationMs", duration_ms.into()),
                        ("ok", ok.into()),
                    ]),
                )
                .await;
            }
        }
    }

    async fn fire_automation(&self, location: &str) {
        let triggered: Vec<AutomationRule> = self
            .inner
            .rules
            .lock()
            .await
            .matching(location)
            .into_iter()
            .cloned()
            .collect();

        for rule in triggered {
            debug!("Automation rule {} matched {}", rule.id, location);
            self.inner.presenter.notify(Notification::AutomationTriggered {
                rule_id: rule.id,
                name: rule.name,
                action: rule.action,
            });
        }
    }

    /// Suggestions for the current surface, highest priority first
    pub async fn generate_suggestions(&self) -> Vec<SuggestionRecord> {
        let context = self.inner.context.lock().await.snapshot();
        let analysis = self.inner.analyzer.analyze(self.inner.learning.lock().await.data());
        self.inner.engine.lock().await.generate(&context, &analysis)
    }

    /// Likely next destinations from the current location
    pub async fn get_predictions(&self) -> Vec<PredictionRecord> {
        let Some(location) = self.current_location().await else {
            return Vec::new();
        };
        let learning = self.inner.learning.lock().await;
        predict_next_actions(&learning.data().navigation, &location)
    }

    /// Predictions from an explicit location
    pub async fn predictions_from(&self, location: &str) -> Vec<PredictionRecord> {
        let learning = self.inner.learning.lock().await;
        predict_next_actions(&learning.data().navigation, location)
    }

    pub async fn get_optimizations(&self) -> Vec<OptimizationRecord> {
        let analysis = self.inner.analyzer.analyze(self.inner.learning.lock().await.data());
        self.inner.engine.lock().await.optimizations(&analysis)
    }

    pub async fn get_stats(&self) -> TelemetryStats {
        let mut stats = TelemetryStats::default();
        {
            let learning = self.inner.learning.lock().await;
            stats.total_interactions = learning.len(LearningCategory::Interactions);
            stats.total_navigations = learning.len(LearningCategory::Navigation);
            stats.total_form_interactions = learning.len(LearningCategory::FormInteractions);
            stats.total_errors = learning.len(LearningCategory::Errors);
        }
        stats.suggestions_generated = self.inner.engine.lock().await.generated();
        {
            let rules = self.inner.rules.lock().await;
            stats.automation_rules = rules.count();
            stats.enabled_rules = rules.enabled_count();
        }
        stats.audit_entries = self.inner.audit.lock().await.len();
        stats.queued_operations = self.inner.queue.lock().await.len();
        stats
    }

    /// Where the user is now: the newest located event, else the last page entered
    pub async fn current_location(&self) -> Option<String> {
        if let Some(location) = self.inner.context.lock().await.current_location() {
            return Some(location.to_string());
        }
        self.inner
            .session
            .lock()
            .await
            .page_entered
            .as_ref()
            .map(|(page, _)| page.clone())
    }

    /// Record an audit entry attributed to the current user and session
    pub async fn log_audit(
        &self,
        event_type: &str,
        level: AuditLevel,
        data: serde_json::Map<String, serde_json::Value>,
    ) -> bool {
        let (user_id, session_id) = {
            let session = self.inner.session.lock().await;
            (session.user_id.clone(), session.session_id.clone())
        };
        self.inner
            .audit
            .lock()
            .await
            .log(event_type, level, data, user_id.as_deref(), Some(&session_id))
    }

    pub async fn audit_logs(&self, filter: &AuditFilter) -> Vec<AuditLogEntry> {
        self.inner.audit.lock().await.get_logs(filter)
    }

    pub async fn export_audit(&self, format: ExportFormat, filter: &AuditFilter) -> Result<String> {
        self.inner.audit.lock().await.export_logs(format, filter)
    }

    pub async fn audit_stats(&self) -> AuditStats {
        self.inner.audit.lock().await.stats()
    }

    /// Resume audit logging after a storage failure disabled it
    pub async fn enable_audit(&self) {
        self.inner.audit.lock().await.enable();
    }

    /// Queue a request that failed for lack of connectivity.
    ///
    /// Only mutating methods are queued; returns the operation id when queued.
    pub async fn record_failed_request(&self, request: RequestDescriptor) -> Result<Option<String>> {
        if !request.is_mutating() {
            debug!("Not queueing {} {}", request.method, request.url);
            return Ok(None);
        }
        let (method, url) = (request.method.clone(), request.url.clone());
        let id = self.inner.queue.lock().await.enqueue(request)?;
        self.inner.presenter.notify(Notification::OperationQueued {
            id: id.clone(),
            method,
            url,
        });
        Ok(Some(id))
    }

    pub async fn queued_operations(&self) -> Vec<OfflineOperation> {
        self.inner.queue.lock().await.snapshot()
    }

    /// Replay queued operations now
    pub async fn sync(&self) -> SyncReport {
        self.inner.sync.sync().await
    }

    pub async fn set_user(&self, user_id: Option<&str>) {
        self.inner.session.lock().await.user_id = user_id.map(String::from);
    }

    pub async fn session_id(&self) -> String {
        self.inner.session.lock().await.session_id.clone()
    }

    pub async fn add_rule(&self, name: &str, trigger: &str, action: &str) -> Result<String> {
        self.inner.rules.lock().await.add(name, trigger, action)
    }

    pub async fn set_rule_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        self.inner.rules.lock().await.set_enabled(id, enabled)
    }

    pub async fn remove_rule(&self, id: &str) -> Result<bool> {
        self.inner.rules.lock().await.remove(id)
    }

    pub async fn rules(&self) -> Vec<AutomationRule> {
        self.inner.rules.lock().await.list().to_vec()
    }

    /// Forget everything: learning data, audit log, queue, rules and context
    pub async fn clear_all(&self) -> Result<()> {
        self.inner.context.lock().await.clear();
        self.inner.learning.lock().await.clear()?;
        self.inner.audit.lock().await.clear()?;
        self.inner.queue.lock().await.clear()?;
        self.inner.rules.lock().await.clear()?;
        self.inner.session.lock().await.page_entered = None;
        info!("Cleared all telemetry data");
        Ok(())
    }
}

/// Audit level for a finished network call
pub fn network_level(ok: bool, status: Option<u16>) -> AuditLevel {
    match (ok, status) {
        (true, _) => AuditLevel::Info,
        (false, Some(401 | 403)) => AuditLevel::Security,
        (false, Some(400..=499)) => AuditLevel::Warning,
        (false, _) => AuditLevel::Error,
    }
}

fn json_map<'a>(
    pairs: impl IntoIterator<Item = (&'a str, serde_json::Value)>,
) -> serde_json::Map<String, serde_json::Value> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::ChannelPresenter;
    use crate::pressure::ManualProbe;
    use crate::storage::{MemoryStore, StoreError, AUDIT_KEY, LEARNING_KEY, OFFLINE_QUEUE_KEY};
    use chrono::Duration as ChronoDuration;

    struct Unreachable;

    #[async_trait::async_trait]
    impl NetworkTransport for Unreachable {
        async fn send(&self, _request: &RequestDescriptor) -> Result<bool> {
            bail!("offline")
        }
    }

    fn telemetry(probe: Arc<ManualProbe>) -> Telemetry {
        Telemetry::builder(TelemetryConfig::default())
            .store(Arc::new(MemoryStore::new()))
            .probe(probe)
            .transport(Arc::new(Unreachable))
            .build()
            .unwrap()
    }

    /// Memory store that rejects writes to one key
    struct RejectingKey {
        inner: MemoryStore,
        key: &'static str,
    }

    impl DurableKeyValueStore for RejectingKey {
        fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
            if key == self.key {
                return Err(StoreError::Io {
                    key: key.to_string(),
                    source: std::io::Error::other("disk full"),
                });
            }
            self.inner.set(key, value)
        }

        fn remove(&self, key: &str) -> Result<(), StoreError> {
            self.inner.remove(key)
        }
    }

    fn nav(from: &str, to: &str, at: DateTime<Utc>) -> Event {
        Event::at(
            EventPayload::Navigation {
                from: from.into(),
                to: to.into(),
            },
            at,
        )
    }

    #[tokio::test]
    async fn test_flush_persists_audit_when_learning_write_fails() {
        let store = Arc::new(RejectingKey {
            inner: MemoryStore::new(),
            key: LEARNING_KEY,
        });
        let t = Telemetry::builder(TelemetryConfig::default())
            .store(store.clone())
            .probe(Arc::new(ManualProbe::new()))
            .transport(Arc::new(Unreachable))
            .build()
            .unwrap();

        for i in 0..3 {
            t.log_audit(&format!("event_{}", i), AuditLevel::Info, serde_json::Map::new())
                .await;
        }
        assert!(store.inner.raw(AUDIT_KEY).is_none());

        assert!(t.flush().await.is_err());
        let persisted: Vec<AuditLogEntry> =
            serde_json::from_str(&store.inner.raw(AUDIT_KEY).unwrap()).unwrap();
        assert_eq!(persisted.len(), 3);
        assert!(store.inner.raw(OFFLINE_QUEUE_KEY).is_some());

        t.dispose().await.unwrap();
        assert_eq!(t.state().await, TelemetryState::Disposed);
    }

    #[test]
    fn test_network_level() {
        assert_eq!(network_level(true, Some(200)), AuditLevel::Info);
        assert_eq!(network_level(false, Some(401)), AuditLevel::Security);
        assert_eq!(network_level(false, Some(403)), AuditLevel::Security);
        assert_eq!(network_level(false, Some(404)), AuditLevel::Warning);
        assert_eq!(network_level(false, Some(503)), AuditLevel::Error);
        assert_eq!(network_level(false, None), AuditLevel::Error);
    }

    #[tokio::test]
    async fn test_navigation_records_page_time() {
        let t = telemetry(Arc::new(ManualProbe::new()));
        let start = Utc::now();
        t.handle_event(nav("/", "/inicio", start)).await;
        t.handle_event(nav("/inicio", "/protocolos", start + ChronoDuration::milliseconds(7500)))
            .await;

        let learning = t.inner.learning.lock().await;
        assert_eq!(learning.len(LearningCategory::Navigation), 2);
        let page_time = learning.records(LearningCategory::PageTime);
        assert_eq!(page_time.len(), 1);
        assert_eq!(page_time[0].text("page"), Some("/inicio"));
        assert_eq!(page_time[0].number("duration"), Some(7500.0));
    }

    #[tokio::test]
    async fn test_form_input_masks_sensitive_field_and_never_stores_value() {
        let t = telemetry(Arc::new(ManualProbe::new()));
        t.handle_event(Event::new(EventPayload::FormInput {
            form: "login".into(),
            field: "senha".into(),
            value: "segredo123".into(),
            location: "/entrar".into(),
        }))
        .await;

        let entries = t.audit_logs(&AuditFilter::default()).await;
        assert_eq!(entries[0].event_type, "form_interaction");
        assert_eq!(entries[0].data["senha"], "***");
        assert_eq!(entries[0].data["form"], "login");

        let learning = t.inner.learning.lock().await;
        let record = &learning.records(LearningCategory::FormInteractions)[0];
        assert_eq!(record.text("field"), Some("senha"));
        assert!(record.fields.values().all(|v| v.as_str() != Some("segredo123")));
    }

    #[tokio::test]
    async fn test_failed_network_call_feeds_errors_and_audit() {
        let t = telemetry(Arc::new(ManualProbe::new()));
        t.handle_event(Event::new(EventPayload::NetworkCompleted {
            url: "/api/protocolos".into(),
            method: "GET".into(),
            status: Some(403),
            duration_ms: 120,
            ok: false,
        }))
        .await;

        let entries = t.audit_logs(&AuditFilter::default()).await;
        assert_eq!(entries[0].level, AuditLevel::Security);
        assert_eq!(entries[0].data["durationMs"], 120);

        let learning = t.inner.learning.lock().await;
        assert_eq!(
            learning.records(LearningCategory::Errors)[0].text("message"),
            Some("HTTP 403")
        );
    }

    #[tokio::test]
    async fn test_pressure_gates_learning_and_audit() {
        let probe = Arc::new(ManualProbe::with_pressure(0.9));
        let t = telemetry(probe.clone());
        t.handle_event(Event::new(EventPayload::Click {
            target: "#enviar".into(),
            location: "/reclamacao".into(),
        }))
        .await;

        let stats = t.get_stats().await;
        assert_eq!(stats.total_interactions, 0);
        assert_eq!(stats.audit_entries, 0);
        assert!(t.current_location().await.is_none());

        probe.set(0.1);
        t.handle_event(Event::new(EventPayload::Click {
            target: "#enviar".into(),
            location: "/reclamacao".into(),
        }))
        .await;
        let stats = t.get_stats().await;
        assert_eq!(stats.total_interactions, 1);
        assert_eq!(stats.audit_entries, 1);
    }

    #[tokio::test]
    async fn test_only_mutating_requests_queue() {
        let (presenter, mut rx) = ChannelPresenter::new();
        let t = Telemetry::builder(TelemetryConfig::default())
            .store(Arc::new(MemoryStore::new()))
            .probe(Arc::new(ManualProbe::new()))
            .transport(Arc::new(Unreachable))
            .presenter(Arc::new(presenter))
            .build()
            .unwrap();

        assert!(t
            .record_failed_request(RequestDescriptor::new("GET", "/api/x"))
            .await
            .unwrap()
            .is_none());
        let id = t
            .record_failed_request(RequestDescriptor::new("POST", "/api/x"))
            .await
            .unwrap()
            .unwrap();

        assert!(matches!(rx.try_recv().unwrap(), Notification::OperationQueued { id: ref queued, .. } if *queued == id));

        let report = t.sync().await;
        assert_eq!(report.failed, 1);
        assert_eq!(t.queued_operations().await.len(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_automation_rule_fires_on_navigation() {
        let (presenter, mut rx) = ChannelPresenter::new();
        let t = Telemetry::builder(TelemetryConfig::default())
            .store(Arc::new(MemoryStore::new()))
            .probe(Arc::new(ManualProbe::new()))
            .transport(Arc::new(Unreachable))
            .presenter(Arc::new(presenter))
            .build()
            .unwrap();

        let id = t.add_rule("Protocolos", "/protocolos", "open_last_protocol").await.unwrap();
        t.handle_event(nav("/", "/protocolos/42", Utc::now())).await;

        match rx.try_recv().unwrap() {
            Notification::AutomationTriggered { rule_id, action, .. } => {
                assert_eq!(rule_id, id);
                assert_eq!(action, "open_last_protocol");
            }
            other => panic!("unexpected notification: {:?}", other),
        }
        assert_eq!(t.get_stats().await.enabled_rules, 1);
    }

    #[tokio::test]
    async fn test_empty_history_read_api() {
        let t = telemetry(Arc::new(ManualProbe::new()));
        assert!(t.generate_suggestions().await.is_empty());
        assert!(t.get_predictions().await.is_empty());
        assert!(t.get_optimizations().await.is_empty());
        assert_eq!(t.get_stats().await, TelemetryStats::default());
    }

    #[tokio::test]
    async fn test_user_attribution() {
        let t = telemetry(Arc::new(ManualProbe::new()));
        t.set_user(Some("cidadao-7")).await;
        t.log_audit("login", AuditLevel::Info, serde_json::Map::new()).await;

        let entry = &t.audit_logs(&AuditFilter::default()).await[0];
        assert_eq!(entry.user_id.as_deref(), Some("cidadao-7"));
        assert_eq!(entry.session_id, Some(t.session_id().await));
    }
}
