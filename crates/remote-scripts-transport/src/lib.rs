//! Connection layer for remote script sessions.
//!
//! Provides:
//! - Wire protocol (JSON envelopes, typed inbound events)
//! - `Connection` - queued persistent connection owned by one session
//! - Close-code mapping shared by every session kind
//! - WebSocket transport (feature: websocket) and an in-memory transport

pub mod close;
pub mod connection;
pub mod memory;
pub mod protocol;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use close::{ABNORMAL_CLOSURE, CloseOutcome, NORMAL_CLOSURE, NO_STATUS};
pub use connection::{Connection, ConnectionEvent, ConnectionState, Transport, TransportEvent};
pub use memory::{MemoryTransport, SendError, ServerEnd};
pub use protocol::{ConfigEnvelope, ConfigEvent, ConfigRequest, StreamEvent, StreamFrame};

#[cfg(feature = "websocket")]
pub use websocket::WebSocketTransport;
