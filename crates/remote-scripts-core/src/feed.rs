//! Broadcast + history event feed for one execution.

use std::{
    collections::VecDeque,
    sync::{PoisonError, RwLock},
};

use futures::{StreamExt, future};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::{ExecutionEvent, config::DEFAULT_HISTORY_BYTES};

const CHANNEL_CAPACITY: usize = 10_000;

#[derive(Clone)]
struct StoredEvent {
    event: ExecutionEvent,
    bytes: usize,
}

struct Inner {
    history: VecDeque<StoredEvent>,
    total_bytes: usize,
}

/// Event feed with broadcast and bounded history.
///
/// Subscribers attaching late (e.g. after a reconnection scan) receive
/// history first, then live events.
pub struct EventFeed {
    inner: RwLock<Inner>,
    sender: broadcast::Sender<ExecutionEvent>,
    history_bytes: usize,
}

impl Default for EventFeed {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_BYTES)
    }
}

impl EventFeed {
    /// Create a feed keeping at most `history_bytes` of history.
    #[must_use]
    pub fn new(history_bytes: usize) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            inner: RwLock::new(Inner {
                history: VecDeque::with_capacity(32),
                total_bytes: 0,
            }),
            sender,
            history_bytes,
        }
    }

    /// Push an event to both history and live listeners.
    pub fn push(&self, event: ExecutionEvent) {
        let bytes = event.approx_bytes();

        // The lock spans the broadcast so a subscriber taking a history
        // snapshot never sees an event twice or misses one.
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        while inner.total_bytes.saturating_add(bytes) > self.history_bytes {
            if let Some(front) = inner.history.pop_front() {
                inner.total_bytes = inner.total_bytes.saturating_sub(front.bytes);
            } else {
                break;
            }
        }
        inner.history.push_back(StoredEvent {
            event: event.clone(),
            bytes,
        });
        inner.total_bytes = inner.total_bytes.saturating_add(bytes);

        let _ = self.sender.send(event); // live listeners
    }

    /// Get a receiver for live events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }

    /// Get a snapshot of the history.
    #[must_use]
    pub fn history(&self) -> Vec<ExecutionEvent> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .history
            .iter()
            .map(|s| s.event.clone())
            .collect()
    }

    /// Stream that yields history first, then live events.
    #[must_use]
    pub fn history_plus_stream(&self) -> futures::stream::BoxStream<'static, ExecutionEvent> {
        let (history, rx) = {
            let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
            let history: Vec<_> = inner.history.iter().map(|s| s.event.clone()).collect();
            (history, self.sender.subscribe())
        };

        let hist = futures::stream::iter(history);
        let live = BroadcastStream::new(rx).filter_map(|res| future::ready(res.ok()));

        Box::pin(hist.chain(live))
    }

    /// Stream of output text until the execution reaches a final status.
    #[must_use]
    pub fn output_stream(&self) -> futures::stream::BoxStream<'static, String> {
        self.history_plus_stream()
            .take_while(|event| future::ready(!event.is_terminal()))
            .filter_map(|event| async move {
                match event {
                    ExecutionEvent::Log(chunk) => Some(chunk.text),
                    _ => None,
                }
            })
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;
    use crate::{ExecutionStatus, LogChunk};

    fn log(text: &str) -> ExecutionEvent {
        ExecutionEvent::Log(LogChunk::now(text))
    }

    #[tokio::test]
    async fn test_history_then_live() {
        let feed = EventFeed::default();
        feed.push(log("a"));
        feed.push(log("b"));

        let mut stream = feed.output_stream();
        assert_eq!(stream.next().await.as_deref(), Some("a"));
        assert_eq!(stream.next().await.as_deref(), Some("b"));

        feed.push(log("c"));
        feed.push(ExecutionEvent::Status {
            status: ExecutionStatus::Finished,
            error: None,
        });
        assert_eq!(stream.next().await.as_deref(), Some("c"));
        assert_eq!(stream.next().await, None);
    }

    #[test]
    fn test_history_is_bounded() {
        let feed = EventFeed::new(64);
        for i in 0..10 {
            feed.push(log(&format!("line {i}")));
        }
        let history = feed.history();
        assert!(history.len() < 10);
        match history.last() {
            Some(ExecutionEvent::Log(chunk)) => assert_eq!(chunk.text, "line 9"),
            other => panic!("unexpected last event: {other:?}"),
        }
    }
}
