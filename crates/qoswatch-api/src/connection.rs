//! Single shared telemetry stream with subscriber fan-out.
//!
//! [`ConnectionManager`] owns at most one live connection per instance and
//! multiplexes every consumer over it. The connection is opened by the
//! first [`subscribe`](ConnectionManager::subscribe) and closed when the
//! last [`Subscription`] goes away.
//!
//! Lifecycle:
//!
//! ```text
//! Idle → Connecting → Open → (Closing | Reconnecting) → Connecting | Terminated
//! ```
//!
//! Each connection run ("session") is a spawned task owning its one
//! reconnect timer. Sessions carry a generation number; a superseded
//! session can neither publish state nor deliver batches.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures_util::StreamExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::error::{ParseError, TransportError};
use crate::model::Batch;
use crate::websocket::{Frame, FrameStream, ReconnectConfig, Transport, calculate_backoff};

// ── Public types ─────────────────────────────────────────────────────

/// Observable state of the shared connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No subscribers, no connection.
    Idle,
    Connecting,
    Open,
    /// Waiting out the backoff before reconnect attempt `attempt` (1-based).
    Reconnecting { attempt: u32 },
    /// Last subscriber left; the connection is being torn down.
    Closing,
    /// Reconnect attempts exhausted. Left only by a new `subscribe`.
    Terminated,
}

/// What a subscriber receives.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// One decoded batch, shared by every subscriber.
    Batch(Arc<Batch>),
    /// Reconnection gave up; no further batches until a new `subscribe`.
    Terminated,
}

/// Subscriber callback. Runs on the connection task and must not block.
pub type Handler = Arc<dyn Fn(&StreamEvent) + Send + Sync>;

// ── ConnectionManager ────────────────────────────────────────────────

/// Shared handle to the telemetry stream. Cheap to clone.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    url: Url,
    transport: Arc<dyn Transport>,
    reconnect: ReconnectConfig,
    registry: Mutex<Registry>,
    state: watch::Sender<ConnectionState>,
    opened: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Default)]
struct Registry {
    /// Handlers in subscription order.
    handlers: Vec<(u64, Handler)>,
    next_id: u64,
    generation: u64,
    session: Option<Session>,
}

struct Session {
    generation: u64,
    cancel: CancellationToken,
}

impl ConnectionManager {
    /// Create a manager for `url`. Nothing connects until the first subscriber.
    pub fn new(url: Url, transport: Arc<dyn Transport>, reconnect: ReconnectConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        Self {
            inner: Arc::new(Inner {
                url,
                transport,
                reconnect,
                registry: Mutex::new(Registry::default()),
                state,
                opened: AtomicU64::new(0),
                delivered: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Register `handler` for every inbound event.
    ///
    /// Opens the connection if none is running. While connecting or open,
    /// this only registers. After termination, or while waiting to
    /// reconnect, it cancels the pending timer and starts a fresh cycle
    /// with the attempt counter reset.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use = "dropping the Subscription unsubscribes immediately"]
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&StreamEvent) + Send + Sync + 'static,
    {
        let mut registry = self.inner.lock();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.handlers.push((id, Arc::new(handler)));

        let needs_start = registry.session.is_none()
            || matches!(
                *self.inner.state.borrow(),
                ConnectionState::Reconnecting { .. }
                    | ConnectionState::Terminated
                    | ConnectionState::Closing
                    | ConnectionState::Idle
            );
        if needs_start {
            Inner::start_session(&self.inner, &mut registry);
        }
        debug!(subscriber = id, "stream subscriber added");

        Subscription {
            id,
            inner: Arc::downgrade(&self.inner),
            active: AtomicBool::new(true),
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Watch connection state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Number of connections successfully opened over this manager's life.
    pub fn connections_opened(&self) -> u64 {
        self.inner.opened.load(Ordering::Relaxed)
    }

    /// Batches decoded and fanned out.
    pub fn batches_delivered(&self) -> u64 {
        self.inner.delivered.load(Ordering::Relaxed)
    }

    /// Messages dropped because they were not valid batches.
    pub fn batches_dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().handlers.len()
    }

    /// The stream endpoint this manager connects to.
    pub fn url(&self) -> &Url {
        &self.inner.url
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("url", &self.inner.url.as_str())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// ── Subscription ─────────────────────────────────────────────────────

/// Registration handle returned by [`ConnectionManager::subscribe`].
///
/// Unsubscribes on drop. Explicit [`unsubscribe`](Self::unsubscribe) is
/// idempotent.
pub struct Subscription {
    id: u64,
    inner: Weak<Inner>,
    active: AtomicBool,
}

impl Subscription {
    /// Remove this subscriber. Removing the last one closes the connection.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(inner) = self.inner.upgrade() {
            inner.remove(self.id);
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

// ── Registry operations ──────────────────────────────────────────────

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Registry> {
        // Handlers never run under this lock, so poisoning cannot leave
        // the registry half-updated.
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn start_session(this: &Arc<Self>, registry: &mut Registry) {
        if let Some(old) = registry.session.take() {
            old.cancel.cancel();
        }
        registry.generation += 1;
        let generation = registry.generation;
        let cancel = CancellationToken::new();
        registry.session = Some(Session {
            generation,
            cancel: cancel.clone(),
        });
        this.state.send_replace(ConnectionState::Connecting);

        tokio::spawn(run_session(Arc::clone(this), generation, cancel));
    }

    fn remove(&self, id: u64) {
        let mut registry = self.lock();
        let before = registry.handlers.len();
        registry.handlers.retain(|(hid, _)| *hid != id);
        if registry.handlers.len() == before {
            return;
        }
        debug!(subscriber = id, "stream subscriber removed");

        if registry.handlers.is_empty() {
            if let Some(session) = registry.session.take() {
                session.cancel.cancel();
                self.state.send_replace(ConnectionState::Closing);
                info!("last subscriber left, closing telemetry stream");
            } else {
                self.state.send_replace(ConnectionState::Idle);
            }
        }
    }

    fn is_current(registry: &Registry, generation: u64) -> bool {
        registry
            .session
            .as_ref()
            .is_some_and(|s| s.generation == generation)
    }

    /// Publish `state` if `generation` is still the live session.
    fn set_state(&self, generation: u64, state: ConnectionState) -> bool {
        let registry = self.lock();
        if Self::is_current(&registry, generation) {
            self.state.send_replace(state);
            true
        } else {
            false
        }
    }

    /// Snapshot of handlers if `generation` is still the live session.
    fn handlers_for(&self, generation: u64) -> Option<Vec<(u64, Handler)>> {
        let registry = self.lock();
        Self::is_current(&registry, generation).then(|| registry.handlers.clone())
    }

    /// Give up after exhausting reconnect attempts.
    fn terminate(&self, generation: u64) {
        let handlers = {
            let mut registry = self.lock();
            if !Self::is_current(&registry, generation) {
                return;
            }
            registry.session = None;
            self.state.send_replace(ConnectionState::Terminated);
            registry.handlers.clone()
        };
        dispatch(&handlers, &StreamEvent::Terminated);
    }

    /// Settle `Closing` into `Idle` once a cancelled session has wound down.
    fn finish(&self, generation: u64) {
        let registry = self.lock();
        if registry.generation == generation
            && registry.session.is_none()
            && *self.state.borrow() == ConnectionState::Closing
        {
            self.state.send_replace(ConnectionState::Idle);
        }
    }

    fn handle_text(&self, generation: u64, text: &str) {
        match parse_batch(text) {
            Ok(batch) => {
                let Some(handlers) = self.handlers_for(generation) else {
                    return;
                };
                self.delivered.fetch_add(1, Ordering::Relaxed);
                dispatch(&handlers, &StreamEvent::Batch(Arc::new(batch)));
            }
            Err(e) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "dropping malformed telemetry batch");
            }
        }
    }
}

/// Invoke each handler in order. A panicking handler is logged and skipped.
fn dispatch(handlers: &[(u64, Handler)], event: &StreamEvent) {
    for (id, handler) in handlers {
        if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
            warn!(subscriber = id, "stream subscriber panicked; continuing fan-out");
        }
    }
}

/// Decode one stream message into a batch.
pub fn parse_batch(text: &str) -> Result<Batch, ParseError> {
    serde_json::from_str(text).map_err(|e| ParseError {
        message: e.to_string(),
        payload_len: text.len(),
    })
}

// ── Session task ─────────────────────────────────────────────────────

enum ReadOutcome {
    Cancelled,
    Lost(TransportError),
}

/// Connect → read → on failure, back off → reconnect, until cancelled or
/// out of attempts.
async fn run_session(inner: Arc<Inner>, generation: u64, cancel: CancellationToken) {
    let mut attempt: u32 = 0;

    loop {
        let opened = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            result = inner.transport.open(&inner.url) => result,
        };

        let failure = match opened {
            Ok(frames) => {
                if !inner.set_state(generation, ConnectionState::Open) {
                    break;
                }
                attempt = 0;
                inner.opened.fetch_add(1, Ordering::Relaxed);
                info!(url = %inner.url, "telemetry stream connected");

                match read_frames(&inner, generation, frames, &cancel).await {
                    ReadOutcome::Cancelled => break,
                    ReadOutcome::Lost(e) => e,
                }
            }
            Err(e) => e,
        };
        warn!(error = %failure, attempt, "telemetry stream failure");

        if let Some(max) = inner.reconnect.max_retries {
            if attempt >= max {
                error!(max_retries = max, "telemetry stream reconnection limit reached, giving up");
                inner.terminate(generation);
                return;
            }
        }

        let delay = calculate_backoff(attempt, &inner.reconnect);
        attempt += 1;
        if !inner.set_state(generation, ConnectionState::Reconnecting { attempt }) {
            break;
        }
        info!(
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            attempt,
            "Waiting before reconnect"
        );

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }

        if !inner.set_state(generation, ConnectionState::Connecting) {
            break;
        }
    }

    inner.finish(generation);
    debug!(generation, "telemetry session exiting");
}

/// Pump frames from one open connection until it drops or is cancelled.
async fn read_frames(
    inner: &Inner,
    generation: u64,
    mut frames: FrameStream,
    cancel: &CancellationToken,
) -> ReadOutcome {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return ReadOutcome::Cancelled,
            frame = frames.next() => match frame {
                Some(Ok(Frame::Text(text))) => inner.handle_text(generation, &text),
                Some(Ok(Frame::Close { code, reason })) => {
                    info!(code, reason = %reason, "telemetry stream closed by peer");
                    return ReadOutcome::Lost(TransportError::AbnormalClose { code, reason });
                }
                Some(Err(e)) => return ReadOutcome::Lost(e),
                None => {
                    return ReadOutcome::Lost(TransportError::AbnormalClose {
                        code: 1006,
                        reason: "stream ended without close frame".into(),
                    });
                }
            },
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use futures_util::future::BoxFuture;
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::UnboundedReceiverStream;

    use super::*;

    type FrameTx = mpsc::UnboundedSender<Result<Frame, TransportError>>;

    enum Step {
        Fail,
        Open(mpsc::UnboundedReceiver<Result<Frame, TransportError>>),
    }

    /// Plays back a fixed script of connection outcomes, then fails forever.
    #[derive(Default)]
    struct ScriptedTransport {
        opens: AtomicUsize,
        script: Mutex<VecDeque<Step>>,
    }

    impl ScriptedTransport {
        fn push_open(&self) -> FrameTx {
            let (tx, rx) = mpsc::unbounded_channel();
            self.script.lock().unwrap().push_back(Step::Open(rx));
            tx
        }

        fn push_fail(&self) {
            self.script.lock().unwrap().push_back(Step::Fail);
        }

        fn attempts(&self) -> usize {
            self.opens.load(Ordering::SeqCst)
        }
    }

    impl Transport for ScriptedTransport {
        fn open(&self, _url: &Url) -> BoxFuture<'static, Result<FrameStream, TransportError>> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            let step = self.script.lock().unwrap().pop_front();
            Box::pin(async move {
                match step {
                    Some(Step::Open(rx)) => {
                        Ok(Box::pin(UnboundedReceiverStream::new(rx)) as FrameStream)
                    }
                    Some(Step::Fail) | None => Err(TransportError::Connect("refused".into())),
                }
            })
        }
    }

    fn manager(transport: &Arc<ScriptedTransport>, max_retries: Option<u32>) -> ConnectionManager {
        let transport: Arc<dyn Transport> = Arc::clone(transport) as Arc<dyn Transport>;
        ConnectionManager::new(
            Url::parse("ws://backend.test/ws/traffic").unwrap(),
            transport,
            ReconnectConfig {
                initial_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(30),
                max_retries,
            },
        )
    }

    fn batch_json(protocol: &str) -> String {
        serde_json::json!({
            "packets": [{
                "protocols": [protocol],
                "length": 100,
                "timestamp": "2026-03-01T12:00:00Z"
            }],
            "metrics": {}
        })
        .to_string()
    }

    async fn wait_for(manager: &ConnectionManager, state: ConnectionState) {
        let mut rx = manager.state_changes();
        tokio::time::timeout(Duration::from_secs(600), rx.wait_for(|s| *s == state))
            .await
            .expect("state not reached")
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn second_subscribe_reuses_open_connection() {
        let transport = Arc::new(ScriptedTransport::default());
        let _frames = transport.push_open();
        let mgr = manager(&transport, Some(3));

        let _a = mgr.subscribe(|_| {});
        wait_for(&mgr, ConnectionState::Open).await;
        let _b = mgr.subscribe(|_| {});
        tokio::task::yield_now().await;

        assert_eq!(mgr.connections_opened(), 1);
        assert_eq!(transport.attempts(), 1);
        assert_eq!(mgr.subscriber_count(), 2);
        assert_eq!(mgr.state(), ConnectionState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn handlers_run_in_subscription_order() {
        let transport = Arc::new(ScriptedTransport::default());
        let frames = transport.push_open();
        let mgr = manager(&transport, Some(3));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();

        let first = Arc::clone(&seen);
        let _a = mgr.subscribe(move |_| first.lock().unwrap().push("first"));
        let second = Arc::clone(&seen);
        let _b = mgr.subscribe(move |_| {
            second.lock().unwrap().push("second");
            let _ = done_tx.send(());
        });

        wait_for(&mgr, ConnectionState::Open).await;
        frames.send(Ok(Frame::Text(batch_json("TCP")))).unwrap();
        done_rx.recv().await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["first", "second"]);
        assert_eq!(mgr.batches_delivered(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_handler_does_not_block_others() {
        let transport = Arc::new(ScriptedTransport::default());
        let frames = transport.push_open();
        let mgr = manager(&transport, Some(3));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let _bad = mgr.subscribe(|_| panic!("view blew up"));
        let _good = mgr.subscribe(move |event| {
            if let StreamEvent::Batch(batch) = event {
                let _ = tx.send(batch.packets.len());
            }
        });

        wait_for(&mgr, ConnectionState::Open).await;
        frames.send(Ok(Frame::Text(batch_json("UDP")))).unwrap();
        frames.send(Ok(Frame::Text(batch_json("UDP")))).unwrap();

        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(mgr.state(), ConnectionState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_batch_is_dropped_and_connection_survives() {
        let transport = Arc::new(ScriptedTransport::default());
        let frames = transport.push_open();
        let mgr = manager(&transport, Some(3));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let _sub = mgr.subscribe(move |event| {
            if let StreamEvent::Batch(batch) = event {
                let _ = tx.send(batch.packets[0].protocols[0].clone());
            }
        });

        wait_for(&mgr, ConnectionState::Open).await;
        frames.send(Ok(Frame::Text("{not json".into()))).unwrap();
        frames.send(Ok(Frame::Text(r#"{"packets": []}"#.into()))).unwrap();
        frames.send(Ok(Frame::Text(batch_json("ICMP")))).unwrap();

        assert_eq!(rx.recv().await.as_deref(), Some("ICMP"));
        assert_eq!(mgr.batches_dropped(), 2);
        assert_eq!(mgr.batches_delivered(), 1);
        assert_eq!(mgr.connections_opened(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_retries_until_resubscribed() {
        let transport = Arc::new(ScriptedTransport::default());
        let mgr = manager(&transport, Some(3));
        let terminated = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&terminated);
        let _sub = mgr.subscribe(move |event| {
            if matches!(event, StreamEvent::Terminated) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        wait_for(&mgr, ConnectionState::Terminated).await;
        // initial attempt + 3 reconnects
        assert_eq!(transport.attempts(), 4);
        assert_eq!(terminated.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(transport.attempts(), 4, "no automatic retry after termination");

        let _again = mgr.subscribe(|_| {});
        wait_for(&mgr, ConnectionState::Terminated).await;
        assert_eq!(transport.attempts(), 8);
        assert_eq!(terminated.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn successful_connection_resets_attempts() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push_fail();
        transport.push_fail();
        let frames = transport.push_open();
        let mgr = manager(&transport, Some(2));

        let _sub = mgr.subscribe(|_| {});
        wait_for(&mgr, ConnectionState::Open).await;
        assert_eq!(transport.attempts(), 3);

        // Losing the connection starts a fresh budget of 2 reconnects.
        drop(frames);
        wait_for(&mgr, ConnectionState::Terminated).await;
        assert_eq!(transport.attempts(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn resubscribe_cancels_pending_reconnect_timer() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push_fail();
        let _frames = transport.push_open();
        let mgr = ConnectionManager::new(
            Url::parse("ws://backend.test/ws/traffic").unwrap(),
            Arc::clone(&transport) as Arc<dyn Transport>,
            ReconnectConfig {
                initial_delay: Duration::from_secs(600),
                max_delay: Duration::from_secs(600),
                max_retries: Some(5),
            },
        );

        let started = tokio::time::Instant::now();
        let _a = mgr.subscribe(|_| {});
        wait_for(&mgr, ConnectionState::Reconnecting { attempt: 1 }).await;

        let _b = mgr.subscribe(|_| {});
        wait_for(&mgr, ConnectionState::Open).await;

        assert!(started.elapsed() < Duration::from_secs(60));
        assert_eq!(mgr.connections_opened(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn last_unsubscribe_closes_connection() {
        let transport = Arc::new(ScriptedTransport::default());
        let frames = transport.push_open();
        let mgr = manager(&transport, Some(3));

        let a = mgr.subscribe(|_| {});
        let b = mgr.subscribe(|_| {});
        wait_for(&mgr, ConnectionState::Open).await;

        a.unsubscribe();
        a.unsubscribe();
        assert_eq!(mgr.subscriber_count(), 1);
        assert_eq!(mgr.state(), ConnectionState::Open);

        drop(b);
        wait_for(&mgr, ConnectionState::Idle).await;
        assert!(frames.is_closed(), "frame stream should be dropped");
        assert_eq!(mgr.subscriber_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn peer_close_triggers_reconnect() {
        let transport = Arc::new(ScriptedTransport::default());
        let first = transport.push_open();
        let _second = transport.push_open();
        let mgr = manager(&transport, Some(3));

        let _sub = mgr.subscribe(|_| {});
        wait_for(&mgr, ConnectionState::Open).await;
        first
            .send(Ok(Frame::Close {
                code: 1001,
                reason: "going away".into(),
            }))
            .unwrap();

        wait_for(&mgr, ConnectionState::Reconnecting { attempt: 1 }).await;
        wait_for(&mgr, ConnectionState::Open).await;
        assert_eq!(mgr.connections_opened(), 2);
    }

    #[test]
    fn parse_batch_reports_payload_length() {
        let err = parse_batch("[]").unwrap_err();
        assert_eq!(err.payload_len, 2);
    }
}
