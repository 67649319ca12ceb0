//! In-process transport for tests and embedding.
//!
//! Each connection opened through a [`MemoryTransport`] shows up as a
//! [`ServerEnd`] that a test drives by hand: open it, push frames, read
//! what the client sent, then close it with any code.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, PoisonError},
};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{Notify, mpsc};

use crate::connection::{Transport, TransportEvent};

/// Send error.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("Channel closed")]
    ChannelClosed,
    #[error("Serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Default)]
struct Shared {
    pending: Mutex<VecDeque<ServerEnd>>,
    endpoints: Mutex<Vec<String>>,
    notify: Notify,
}

/// Transport whose server side lives in the same process.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    shared: Arc<Shared>,
}

impl MemoryTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the next connection attempt.
    pub async fn accept(&self) -> ServerEnd {
        loop {
            let notified = self.shared.notify.notified();
            if let Some(end) = self.take(|_| true) {
                return end;
            }
            notified.await;
        }
    }

    /// Wait for the next connection attempt to `endpoint`, leaving others
    /// pending.
    pub async fn accept_endpoint(&self, endpoint: &str) -> ServerEnd {
        loop {
            let notified = self.shared.notify.notified();
            if let Some(end) = self.take(|end| end.endpoint == endpoint) {
                return end;
            }
            notified.await;
        }
    }

    /// Number of connections ever opened.
    #[must_use]
    pub fn connections(&self) -> usize {
        self.endpoints().len()
    }

    /// Endpoints of every connection ever opened, oldest first.
    #[must_use]
    pub fn endpoints(&self) -> Vec<String> {
        self.shared
            .endpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn take(&self, matches: impl Fn(&ServerEnd) -> bool) -> Option<ServerEnd> {
        let mut pending = self
            .shared
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let pos = pending.iter().position(matches)?;
        pending.remove(pos)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn run(
        &self,
        endpoint: String,
        outbound: mpsc::UnboundedReceiver<String>,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) {
        self.shared
            .endpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(endpoint.clone());
        self.shared
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(ServerEnd {
                endpoint,
                events,
                inbound: outbound,
            });
        self.shared.notify.notify_one();
    }
}

/// Server side of one in-memory connection.
///
/// Dropping it ends the connection without a close frame.
pub struct ServerEnd {
    endpoint: String,
    events: mpsc::UnboundedSender<TransportEvent>,
    inbound: mpsc::UnboundedReceiver<String>,
}

impl ServerEnd {
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Accept the connection.
    pub fn open(&self) {
        self.emit(TransportEvent::Opened);
    }

    /// Push a text frame to the client.
    pub fn push(&self, frame: impl Into<String>) {
        self.emit(TransportEvent::Frame(frame.into()));
    }

    /// Push a JSON frame to the client.
    ///
    /// # Errors
    /// Returns error if serialization fails or the client is gone.
    pub fn push_json<T: Serialize>(&self, message: &T) -> Result<(), SendError> {
        let frame = serde_json::to_string(message)?;
        self.events
            .send(TransportEvent::Frame(frame))
            .map_err(|_| SendError::ChannelClosed)
    }

    /// Close with a code. Handshake rejections use the HTTP status.
    pub fn close(&self, code: u16) {
        self.emit(TransportEvent::Closed(code));
    }

    /// Fail with a transport error.
    pub fn fail(&self, message: impl Into<String>) {
        self.emit(TransportEvent::Failed(message.into()));
    }

    /// Next frame sent by the client; `None` once the client closed.
    pub async fn recv(&mut self) -> Option<String> {
        self.inbound.recv().await
    }

    /// Next frame sent by the client, if one is already waiting.
    pub fn try_recv(&mut self) -> Option<String> {
        self.inbound.try_recv().ok()
    }

    /// Whether the client released its side.
    #[must_use]
    pub fn is_client_closed(&self) -> bool {
        self.inbound.is_closed()
    }

    fn emit(&self, event: TransportEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("Client for {} is gone", self.endpoint);
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::protocol::StreamEvent;

    #[tokio::test]
    async fn test_accept_endpoint_leaves_others_pending() {
        let transport = MemoryTransport::new();
        for endpoint in ["a", "b"] {
            let (_out_tx, out_rx) = mpsc::unbounded_channel();
            let (ev_tx, _ev_rx) = mpsc::unbounded_channel();
            transport.run(endpoint.into(), out_rx, ev_tx).await;
        }

        let b = transport.accept_endpoint("b").await;
        assert_eq!(b.endpoint(), "b");
        let a = transport.accept().await;
        assert_eq!(a.endpoint(), "a");
        assert_eq!(transport.endpoints(), vec!["a", "b"]);
        assert_eq!(transport.connections(), 2);
    }

    #[tokio::test]
    async fn test_push_json_and_client_release() {
        let transport = MemoryTransport::new();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (ev_tx, mut ev_rx) = mpsc::unbounded_channel();
        transport.run("e".into(), out_rx, ev_tx).await;
        let server = transport.accept().await;

        server.push_json(&StreamEvent::Output("hi".into())).unwrap();
        assert_eq!(
            ev_rx.recv().await,
            Some(TransportEvent::Frame(r#"{"event":"output","data":"hi"}"#.into()))
        );

        assert!(!server.is_client_closed());
        drop(out_tx);
        assert!(server.is_client_closed());

        drop(ev_rx);
        assert_matches!(
            server.push_json(&StreamEvent::Output("late".into())),
            Err(SendError::ChannelClosed)
        );
    }
}
