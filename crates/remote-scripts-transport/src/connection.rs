//! Queued persistent connection owned by exactly one session.
//!
//! Frames sent while the transport is still connecting are held in a FIFO
//! queue and flushed in order once the connection opens. After the
//! connection ends every send is dropped.

use std::{collections::VecDeque, sync::Arc};

use async_trait::async_trait;
use serde::Serialize;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::close::{ABNORMAL_CLOSURE, CloseOutcome};

/// Low-level event reported by a transport task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Frame(String),
    /// Close frame or HTTP handshake rejection with its code.
    Closed(u16),
    /// Transport error without a close code.
    Failed(String),
}

/// Something that can carry text frames to and from the server.
///
/// `run` drives one connection until it ends. Frames to send arrive on
/// `outbound`; when that channel closes the transport should close the
/// connection and return without reporting further events.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn run(
        &self,
        endpoint: String,
        outbound: mpsc::UnboundedReceiver<String>,
        events: mpsc::UnboundedSender<TransportEvent>,
    );
}

/// Connection lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed(CloseOutcome),
    /// Closed locally; no outcome is reported.
    Released,
}

impl ConnectionState {
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed(_) | Self::Released)
    }
}

/// Event surfaced to the owning session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Opened,
    Frame(String),
    Closed(CloseOutcome),
}

/// Persistent connection to one endpoint.
pub struct Connection {
    endpoint: String,
    state: ConnectionState,
    queue: VecDeque<String>,
    outbound: Option<mpsc::UnboundedSender<String>>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    task: JoinHandle<()>,
}

impl Connection {
    /// Start connecting to `endpoint`. Must be called inside a tokio runtime.
    #[must_use]
    pub fn open(transport: Arc<dyn Transport>, endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        tracing::debug!("Opening connection to {endpoint}");
        let task = {
            let endpoint = endpoint.clone();
            tokio::spawn(async move {
                transport.run(endpoint, outbound_rx, events_tx).await;
            })
        };

        Self {
            endpoint,
            state: ConnectionState::Connecting,
            queue: VecDeque::new(),
            outbound: Some(outbound_tx),
            events: events_rx,
            task,
        }
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    #[must_use]
    pub const fn state(&self) -> &ConnectionState {
        &self.state
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// Frames waiting for the connection to open.
    #[must_use]
    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    /// Send a frame, queueing it while connecting.
    pub fn send(&mut self, frame: impl Into<String>) {
        let frame = frame.into();
        match self.state {
            ConnectionState::Connecting => self.queue.push_back(frame),
            ConnectionState::Open => self.write(frame),
            ConnectionState::Closed(_) | ConnectionState::Released => {
                tracing::debug!("Dropping frame for closed connection {}", self.endpoint);
            }
        }
    }

    /// Serialize and send a message.
    ///
    /// # Errors
    /// Returns error if the message cannot be serialized.
    pub fn send_json<T: Serialize>(&mut self, message: &T) -> Result<(), serde_json::Error> {
        let frame = serde_json::to_string(message)?;
        self.send(frame);
        Ok(())
    }

    /// Send only if the connection is open right now. Returns whether the
    /// frame was handed to the transport.
    pub fn send_if_open(&mut self, frame: impl Into<String>) -> bool {
        if self.is_open() {
            self.write(frame.into());
            true
        } else {
            false
        }
    }

    /// Close locally, discarding anything still queued.
    pub fn close(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        tracing::debug!(
            "Closing connection to {} ({} queued frames discarded)",
            self.endpoint,
            self.queue.len()
        );
        if self.state == ConnectionState::Connecting {
            self.task.abort();
        }
        self.queue.clear();
        self.outbound = None;
        self.state = ConnectionState::Released;
    }

    /// Wait for the next connection event.
    ///
    /// Cancel safe. Once the connection has ended this never resolves.
    pub async fn next_event(&mut self) -> ConnectionEvent {
        if self.state.is_terminal() {
            return std::future::pending().await;
        }
        match self.events.recv().await {
            Some(TransportEvent::Opened) => {
                self.state = ConnectionState::Open;
                self.flush();
                ConnectionEvent::Opened
            }
            Some(TransportEvent::Frame(frame)) => ConnectionEvent::Frame(frame),
            Some(TransportEvent::Closed(code)) => self.finish(CloseOutcome::from_code(code)),
            Some(TransportEvent::Failed(msg)) => self.finish(CloseOutcome::ConnectionError(msg)),
            None => self.finish(CloseOutcome::from_code(ABNORMAL_CLOSURE)),
        }
    }

    fn write(&mut self, frame: String) {
        let Some(outbound) = &self.outbound else {
            return;
        };
        if outbound.send(frame).is_err() {
            tracing::debug!("Transport for {} already stopped", self.endpoint);
        }
    }

    fn flush(&mut self) {
        while let Some(frame) = self.queue.pop_front() {
            self.write(frame);
        }
    }

    fn finish(&mut self, outcome: CloseOutcome) -> ConnectionEvent {
        tracing::debug!("Connection to {} ended: {outcome:?}", self.endpoint);
        self.queue.clear();
        self.outbound = None;
        self.state = ConnectionState::Closed(outcome.clone());
        ConnectionEvent::Closed(outcome)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // A transport still connecting never observes the outbound channel.
        if self.state == ConnectionState::Connecting {
            self.task.abort();
        }
    }
}
