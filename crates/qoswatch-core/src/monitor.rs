// ── Monitor context ──
//
// Explicit context object for one backend: owns the telemetry store, the
// shared stream connection and the rule gateway. Views read store
// snapshots and call the actions here; nothing else mutates the store.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use qoswatch_api::{
    ConnectionManager, ConnectionState, GatewayError, MetricsSnapshot, NewSdnRule, Packet,
    QosRule, RuleGateway, RuleId, SdnAction, SdnRule, StreamEvent, Subscription, Transport,
    TransportConfig, WsTransport,
};
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::error::CoreError;
use crate::store::keyed::KeyedLocks;
use crate::store::{
    LinkStatus, PendingEntry, PendingWrite, ProtocolAggregation, TelemetrySnapshot,
    TelemetryStore,
};
use crate::stream::StateStream;
use crate::trend::{TrendPoint, bucketize};

// ── Monitor ──────────────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<MonitorInner>`. The stream subscription is
/// released by [`teardown()`](Self::teardown) or when the last clone is
/// dropped.
#[derive(Clone)]
pub struct Monitor {
    inner: Arc<MonitorInner>,
}

struct MonitorInner {
    config: MonitorConfig,
    store: Arc<TelemetryStore>,
    gateway: RuleGateway,
    connection: ConnectionManager,
    subscription: Mutex<Option<Subscription>>,
    qos_locks: KeyedLocks,
    sdn_locks: KeyedLocks,
}

impl Monitor {
    // ── Lifecycle ────────────────────────────────────────────────────

    /// Build a monitor and attach it to the telemetry stream.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn create(config: MonitorConfig) -> Result<Self, CoreError> {
        Self::with_transport(config, Arc::new(WsTransport))
    }

    /// Like [`create`](Self::create) with a caller-supplied stream transport.
    pub fn with_transport(
        config: MonitorConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, CoreError> {
        let monitor = Self::build(config, transport)?;
        monitor.attach_stream();
        Ok(monitor)
    }

    /// Build a monitor for request/response work only.
    ///
    /// No stream connection is opened; history stays empty. Used by
    /// single-shot CLI commands.
    pub fn oneshot(config: MonitorConfig) -> Result<Self, CoreError> {
        Self::build(config, Arc::new(WsTransport))
    }

    fn build(config: MonitorConfig, transport: Arc<dyn Transport>) -> Result<Self, CoreError> {
        config.validate()?;

        let transport_config = TransportConfig {
            timeout: config.timeout,
            connect_timeout: None,
        };
        let gateway = RuleGateway::new(config.api_url.clone(), &transport_config)?;
        let connection = ConnectionManager::new(
            config.stream_url.clone(),
            transport,
            config.reconnect.clone(),
        );
        let store = Arc::new(TelemetryStore::new(config.history_capacity));

        Ok(Self {
            inner: Arc::new(MonitorInner {
                config,
                store,
                gateway,
                connection,
                subscription: Mutex::new(None),
                qos_locks: KeyedLocks::default(),
                sdn_locks: KeyedLocks::default(),
            }),
        })
    }

    /// Subscribe the store to the stream, replacing any previous
    /// subscription. The new handler is registered before the old one is
    /// released, so a live connection is kept.
    fn attach_stream(&self) {
        let store = Arc::clone(&self.inner.store);
        let subscription = self.inner.connection.subscribe(move |event| match event {
            StreamEvent::Batch(batch) => store.apply_batch(batch),
            StreamEvent::Terminated => store.mark_stale(),
        });
        let previous = self
            .inner
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(subscription);
        drop(previous);
    }

    /// Manually restart the stream after it gave up reconnecting.
    ///
    /// Cancels any pending reconnect timer and resets the attempt counter.
    /// Must be called from within a Tokio runtime.
    pub fn reconnect(&self) {
        info!(url = %self.inner.config.stream_url, "manual stream reconnect");
        self.attach_stream();
    }

    /// Detach from the stream. Store contents stay readable.
    pub fn teardown(&self) {
        let subscription = self
            .inner
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
            debug!("monitor detached from telemetry stream");
        }
    }

    /// Wait until the first batch arrives.
    ///
    /// Fails with `Disconnected` if the stream gives up first and with
    /// `Timeout` if neither happens within `timeout`.
    pub async fn wait_for_data(&self, timeout: Duration) -> Result<(), CoreError> {
        let mut link = self.inner.store.subscribe_link();
        let settled = tokio::time::timeout(
            timeout,
            link.wait_for(|s| matches!(s, LinkStatus::Live | LinkStatus::Stale)),
        )
        .await
        .map_err(|_| CoreError::Timeout {
            timeout_secs: timeout.as_secs().max(1),
        })?
        .map(|status| *status)
        .map_err(|_| CoreError::Internal("telemetry store dropped".into()))?;

        match settled {
            LinkStatus::Live => Ok(()),
            LinkStatus::Waiting | LinkStatus::Stale => Err(CoreError::Disconnected),
        }
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn config(&self) -> &MonitorConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<TelemetryStore> {
        &self.inner.store
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.inner.connection
    }

    // ── QoS actions ──────────────────────────────────────────────────

    /// Set, replace or delete the QoS rule for `protocol`.
    ///
    /// Both `priority` and `bandwidth_limit` absent deletes the rule.
    /// Otherwise the rule is upserted with `priority` defaulting to the
    /// lowest valid value and an absent limit meaning unlimited. The QoS
    /// list is re-read from the backend whether or not the write succeeds.
    pub async fn set_qos_rule(
        &self,
        protocol: &str,
        priority: Option<u8>,
        bandwidth_limit: Option<u64>,
    ) -> Result<(), CoreError> {
        if priority.is_none() && bandwidth_limit.is_none() {
            return self.delete_qos_rule(protocol).await;
        }

        let protocol = require_key("protocol", protocol)?;
        let range = &self.inner.config.qos_priority_range;
        let priority = priority.unwrap_or_else(|| self.inner.config.default_priority());
        if !range.contains(&priority) {
            return Err(CoreError::Validation {
                message: format!(
                    "priority {priority} outside {}..={}",
                    range.start(),
                    range.end()
                ),
            });
        }

        let rule = QosRule {
            protocol: protocol.to_owned(),
            priority,
            bandwidth_limit,
        };
        let qos = &self.inner.store.qos;

        let _guard = self.inner.qos_locks.lock(protocol).await;
        qos.mark_pending(protocol, PendingWrite::Upsert(rule.clone()));
        let written = self.inner.gateway.upsert_qos_rule(&rule).await;
        qos.clear_pending(protocol);

        let refreshed = self.refresh_qos_rules().await;
        settle("qos", protocol, written, refreshed)
    }

    /// Remove the QoS rule for `protocol`, then re-read the QoS list.
    pub async fn delete_qos_rule(&self, protocol: &str) -> Result<(), CoreError> {
        let protocol = require_key("protocol", protocol)?;
        let qos = &self.inner.store.qos;

        let _guard = self.inner.qos_locks.lock(protocol).await;
        qos.mark_pending(protocol, PendingWrite::Delete);
        let written = self.inner.gateway.delete_qos_rule(protocol).await;
        qos.clear_pending(protocol);

        let refreshed = self.refresh_qos_rules().await;
        settle("qos", protocol, written, refreshed)
    }

    /// Re-read the QoS list. A response older than one already applied is
    /// discarded.
    pub async fn refresh_qos_rules(&self) -> Result<(), CoreError> {
        let qos = &self.inner.store.qos;
        let ticket = qos.begin_refresh();
        match self.inner.gateway.list_qos_rules().await {
            Ok(rules) => {
                qos.apply_refresh(ticket, rules);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "QoS rule refresh failed");
                Err(e.into())
            }
        }
    }

    // ── SDN actions ──────────────────────────────────────────────────

    /// Create an SDN rule; the backend assigns its id. The SDN list is
    /// re-read whether or not the write succeeds.
    pub async fn create_sdn_rule(
        &self,
        source_ip: &str,
        destination_ip: &str,
        action: SdnAction,
    ) -> Result<(), CoreError> {
        let rule = NewSdnRule {
            source_ip: require_key("source address", source_ip)?.to_owned(),
            destination_ip: require_key("destination address", destination_ip)?.to_owned(),
            action,
        };
        let key = format!("{}->{}", rule.source_ip, rule.destination_ip);
        let sdn = &self.inner.store.sdn;

        let _guard = self.inner.sdn_locks.lock(&key).await;
        sdn.mark_pending(&key, PendingWrite::Upsert(rule.clone()));
        let written = self.inner.gateway.create_sdn_rule(&rule).await;
        sdn.clear_pending(&key);

        let refreshed = self.refresh_sdn_rules().await;
        settle("sdn", &key, written, refreshed)
    }

    /// Delete the SDN rule `id`, then re-read the SDN list.
    pub async fn delete_sdn_rule(&self, id: &RuleId) -> Result<(), CoreError> {
        let key = id.to_string();
        require_key("rule id", &key)?;
        let sdn = &self.inner.store.sdn;

        let _guard = self.inner.sdn_locks.lock(&key).await;
        sdn.mark_pending(&key, PendingWrite::Delete);
        let written = self.inner.gateway.delete_sdn_rule(id).await;
        sdn.clear_pending(&key);

        let refreshed = self.refresh_sdn_rules().await;
        settle("sdn", &key, written, refreshed)
    }

    pub async fn refresh_sdn_rules(&self) -> Result<(), CoreError> {
        let sdn = &self.inner.store.sdn;
        let ticket = sdn.begin_refresh();
        match self.inner.gateway.list_sdn_rules().await {
            Ok(rules) => {
                sdn.apply_refresh(ticket, rules);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "SDN rule refresh failed");
                Err(e.into())
            }
        }
    }

    // ── Metrics actions ──────────────────────────────────────────────

    /// Pull a point-in-time metrics snapshot and make it current.
    pub async fn refresh_metrics(&self) -> Result<Arc<MetricsSnapshot>, CoreError> {
        let snapshot = self.inner.gateway.get_metrics_snapshot().await?;
        self.inner.store.set_metrics(snapshot);
        self.inner
            .store
            .metrics()
            .ok_or_else(|| CoreError::Internal("metrics missing after refresh".into()))
    }

    /// Ask the backend to drop its metrics history.
    pub async fn clear_history(&self) -> Result<(), CoreError> {
        self.inner.gateway.clear_metrics_history().await?;
        info!("backend metrics history cleared");
        Ok(())
    }

    /// Re-read both rule lists and the metrics snapshot concurrently.
    ///
    /// Every part is attempted; the first failure is returned.
    pub async fn refresh_all(&self) -> Result<(), CoreError> {
        let (qos, sdn, metrics) = tokio::join!(
            self.refresh_qos_rules(),
            self.refresh_sdn_rules(),
            self.refresh_metrics(),
        );
        qos?;
        sdn?;
        metrics.map(drop)
    }

    // ── Local-only actions ───────────────────────────────────────────

    /// Drop local packet history without touching the backend.
    pub fn clear_packets(&self) {
        self.inner.store.clear_packets();
    }

    pub fn set_protocol_filter(&self, protocol: Option<String>) {
        self.inner.store.set_protocol_filter(protocol);
    }

    // ── Snapshot reads ───────────────────────────────────────────────

    pub fn telemetry(&self) -> Arc<TelemetrySnapshot> {
        self.inner.store.telemetry()
    }

    pub fn packets(&self) -> Arc<Vec<Arc<Packet>>> {
        self.inner.store.packets()
    }

    pub fn filtered_packets(&self) -> Vec<Arc<Packet>> {
        self.inner.store.filtered_packets()
    }

    pub fn metrics(&self) -> Option<Arc<MetricsSnapshot>> {
        self.inner.store.metrics()
    }

    pub fn aggregation(&self) -> Arc<ProtocolAggregation> {
        self.inner.store.aggregation()
    }

    pub fn qos_rules(&self) -> Arc<Vec<Arc<QosRule>>> {
        self.inner.store.qos_rules()
    }

    pub fn sdn_rules(&self) -> Arc<Vec<Arc<SdnRule>>> {
        self.inner.store.sdn_rules()
    }

    /// QoS writes sent but not yet confirmed by a re-list.
    pub fn pending_qos_writes(&self) -> Vec<PendingEntry<QosRule>> {
        self.inner.store.qos.pending()
    }

    pub fn pending_sdn_writes(&self) -> Vec<PendingEntry<NewSdnRule>> {
        self.inner.store.sdn.pending()
    }

    pub fn link_status(&self) -> LinkStatus {
        self.inner.store.link_status()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    /// Trend series over the current history.
    pub fn trend(&self) -> Vec<TrendPoint> {
        bucketize(&self.inner.store.packets(), &self.inner.config.trend)
    }

    // ── Subscriptions ────────────────────────────────────────────────

    pub fn telemetry_stream(&self) -> StateStream<Arc<TelemetrySnapshot>> {
        StateStream::new(self.inner.store.subscribe_telemetry())
    }

    pub fn qos_stream(&self) -> StateStream<Arc<Vec<Arc<QosRule>>>> {
        StateStream::new(self.inner.store.qos.subscribe())
    }

    pub fn sdn_stream(&self) -> StateStream<Arc<Vec<Arc<SdnRule>>>> {
        StateStream::new(self.inner.store.sdn.subscribe())
    }

    pub fn link_stream(&self) -> StateStream<LinkStatus> {
        StateStream::new(self.inner.store.subscribe_link())
    }

    pub fn connection_stream(&self) -> StateStream<ConnectionState> {
        StateStream::new(self.inner.connection.state_changes())
    }
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("api_url", &self.inner.config.api_url.as_str())
            .field("store", &self.inner.store)
            .field("connection", &self.inner.connection)
            .finish_non_exhaustive()
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

fn require_key<'a>(what: &str, value: &'a str) -> Result<&'a str, CoreError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(CoreError::Validation {
            message: format!("{what} must not be empty"),
        })
    } else {
        Ok(trimmed)
    }
}

/// Combine a rule write with the re-list that followed it.
///
/// The write decides the outcome. A failed re-list after a successful
/// write leaves the confirmed list behind the backend until the next
/// refresh; that is logged, not returned.
fn settle(
    rules: &'static str,
    key: &str,
    written: Result<(), GatewayError>,
    refreshed: Result<(), CoreError>,
) -> Result<(), CoreError> {
    match (written, refreshed) {
        (Err(e), _) => {
            warn!(rules, key, error = %e, "rule write failed");
            Err(e.into())
        }
        (Ok(()), Err(e)) => {
            warn!(rules, key, error = %e, "rule write applied but re-list failed");
            Ok(())
        }
        (Ok(()), Ok(())) => {
            info!(rules, key, "rule write confirmed");
            Ok(())
        }
    }
}
