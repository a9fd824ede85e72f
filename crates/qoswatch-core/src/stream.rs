// ── Reactive state streams ──
//
// Subscription handles for consuming store changes without polling.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

/// A subscription to one piece of monitor state.
///
/// Provides both point-in-time access and change notification via
/// [`changed()`](Self::changed) or by converting to a `Stream`.
pub struct StateStream<V: Clone + Send + Sync + 'static> {
    current: V,
    receiver: watch::Receiver<V>,
}

impl<V: Clone + Send + Sync + 'static> StateStream<V> {
    pub(crate) fn new(receiver: watch::Receiver<V>) -> Self {
        let current = receiver.borrow().clone();
        Self { current, receiver }
    }

    /// The value captured at creation (or at the last `changed()`).
    pub fn current(&self) -> &V {
        &self.current
    }

    /// The latest value, which may be newer than `current()`.
    pub fn latest(&self) -> V {
        self.receiver.borrow().clone()
    }

    /// Wait for the next change, returning the new value.
    /// Returns `None` once the store has been dropped.
    pub async fn changed(&mut self) -> Option<V> {
        self.receiver.changed().await.ok()?;
        let value = self.receiver.borrow_and_update().clone();
        self.current = value.clone();
        Some(value)
    }

    /// Convert into a `Stream` yielding the current value, then each change.
    pub fn into_stream(self) -> StateWatchStream<V> {
        StateWatchStream {
            inner: WatchStream::new(self.receiver),
        }
    }
}

/// `Stream` adapter backed by a `watch::Receiver`.
pub struct StateWatchStream<V: Clone + Send + Sync + 'static> {
    inner: WatchStream<V>,
}

impl<V: Clone + Send + Sync + 'static> Stream for StateWatchStream<V> {
    type Item = V;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use futures_util::StreamExt;

    use super::*;

    #[tokio::test]
    async fn changed_tracks_latest_value() {
        let (tx, rx) = watch::channel(1_u32);
        let mut stream = StateStream::new(rx);
        assert_eq!(*stream.current(), 1);

        tx.send_replace(2);
        assert_eq!(stream.latest(), 2);
        assert_eq!(*stream.current(), 1);

        assert_eq!(stream.changed().await, Some(2));
        assert_eq!(*stream.current(), 2);

        drop(tx);
        assert_eq!(stream.changed().await, None);
    }

    #[tokio::test]
    async fn into_stream_yields_current_then_updates() {
        let (tx, rx) = watch::channel("idle");
        let mut stream = StateStream::new(rx).into_stream();
        assert_eq!(stream.next().await, Some("idle"));

        tx.send_replace("live");
        assert_eq!(stream.next().await, Some("live"));
    }
}
