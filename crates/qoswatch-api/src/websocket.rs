//! Telemetry stream transport and reconnect policy.
//!
//! [`Transport`] is the seam between the connection state machine in
//! [`crate::connection`] and the wire: it opens one connection and yields
//! its frames until the peer goes away. [`WsTransport`] is the production
//! implementation on top of `tokio-tungstenite`.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use qoswatch_api::connection::ConnectionManager;
//! use qoswatch_api::websocket::{ReconnectConfig, WsTransport};
//!
//! let url = "ws://localhost:8000/ws/traffic".parse()?;
//! let manager = ConnectionManager::new(url, Arc::new(WsTransport), ReconnectConfig::default());
//! let sub = manager.subscribe(|event| println!("{event:?}"));
//! ```

use std::time::Duration;

use futures_util::StreamExt;
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder};
use url::Url;

use crate::error::TransportError;

// ── Frames ───────────────────────────────────────────────────────────

/// A transport-level message, before batch decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A text payload; expected to hold one JSON batch.
    Text(String),
    /// The peer closed the connection.
    Close { code: u16, reason: String },
}

/// Frames from one open connection. Ends when the connection drops.
pub type FrameStream = BoxStream<'static, Result<Frame, TransportError>>;

// ── Transport ────────────────────────────────────────────────────────

/// Opens streaming connections to the backend.
///
/// Dropping the returned stream closes the connection.
pub trait Transport: Send + Sync + 'static {
    fn open(&self, url: &Url) -> BoxFuture<'static, Result<FrameStream, TransportError>>;
}

/// WebSocket transport backed by `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsTransport;

impl Transport for WsTransport {
    fn open(&self, url: &Url) -> BoxFuture<'static, Result<FrameStream, TransportError>> {
        let url = url.clone();
        Box::pin(async move { connect(url).await })
    }
}

async fn connect(url: Url) -> Result<FrameStream, TransportError> {
    tracing::info!(url = %url, "Connecting to telemetry stream");

    let uri: tungstenite::http::Uri = url
        .as_str()
        .parse()
        .map_err(|e: tungstenite::http::uri::InvalidUri| TransportError::InvalidUrl(e.to_string()))?;

    let (ws_stream, _response) = tokio_tungstenite::connect_async(ClientRequestBuilder::new(uri))
        .await
        .map_err(|e| TransportError::Connect(e.to_string()))?;

    // The stream is push-only; the write half is kept alive inside the
    // generator so tungstenite can still answer pings.
    let (write, mut read) = ws_stream.split();

    let frames = async_stream::stream! {
        let _write = write;
        while let Some(message) = read.next().await {
            match message {
                Ok(tungstenite::Message::Text(text)) => {
                    yield Ok(Frame::Text(text.as_str().to_owned()));
                }
                Ok(tungstenite::Message::Binary(bytes)) => {
                    // Not expected from the backend; handed on so the batch
                    // decoder reports it rather than silently skipping it.
                    yield Ok(Frame::Text(String::from_utf8_lossy(&bytes).into_owned()));
                }
                Ok(tungstenite::Message::Close(frame)) => {
                    let (code, reason) = frame.map_or_else(
                        || (1005, String::new()),
                        |cf| (u16::from(cf.code), cf.reason.as_str().to_owned()),
                    );
                    yield Ok(Frame::Close { code, reason });
                    break;
                }
                Ok(_) => {
                    // Ping / Pong / raw frames
                    tracing::trace!("telemetry stream control frame");
                }
                Err(e) => {
                    yield Err(TransportError::Frame(e.to_string()));
                    break;
                }
            }
        }
    };

    Ok(Box::pin(frames))
}

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Exponential backoff configuration for stream reconnection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,

    /// Reconnection attempts after a failure before giving up.
    /// `None` means retry forever. Default: 5.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: Some(5),
        }
    }
}

// ── Backoff calculation ──────────────────────────────────────────────

/// Exponential backoff with jitter.
///
/// `delay = min(initial * 2^attempt, max) * (1 ± 0.25)`
///
/// The jitter is deterministic in the attempt number so every client
/// instance spreads its retries the same reproducible way.
#[allow(clippy::cast_possible_wrap, clippy::cast_precision_loss, clippy::as_conversions)]
pub(crate) fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let exponent = attempt.min(30) as i32;
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(exponent);
    let capped = base.min(config.max_delay.as_secs_f64());

    let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
    let with_jitter = (capped * jitter_factor).max(0.0);

    Duration::from_secs_f64(with_jitter)
}

// ── Tests ────────────────────────────────────────────────────────────
