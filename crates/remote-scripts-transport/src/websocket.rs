//! WebSocket transport backed by tokio-tungstenite.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use remote_scripts_core::ClientConfig;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite};
use tungstenite::{Message, error::ProtocolError};

use crate::{
    close::{ABNORMAL_CLOSURE, NO_STATUS},
    connection::{Transport, TransportEvent},
};

/// Connects endpoints relative to the configured server.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    config: ClientConfig,
}

impl WebSocketTransport {
    #[must_use]
    pub const fn new(config: ClientConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn run(
        &self,
        endpoint: String,
        mut outbound: mpsc::UnboundedReceiver<String>,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) {
        let url = match self.config.websocket_url(&endpoint) {
            Ok(url) => url,
            Err(e) => {
                let _ = events.send(TransportEvent::Failed(e.to_string()));
                return;
            }
        };

        let connect = tokio::time::timeout(self.config.request_timeout(), connect_async(url.as_str()));
        let stream = match connect.await {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(tungstenite::Error::Http(response))) => {
                tracing::debug!("Handshake for {endpoint} rejected: {}", response.status());
                let _ = events.send(TransportEvent::Closed(response.status().as_u16()));
                return;
            }
            Ok(Err(e)) => {
                let _ = events.send(TransportEvent::Failed(e.to_string()));
                return;
            }
            Err(_) => {
                let _ = events.send(TransportEvent::Failed(format!("Timed out connecting to {url}")));
                return;
            }
        };

        if events.send(TransportEvent::Opened).is_err() {
            return;
        }
        let (mut sink, mut source) = stream.split();

        loop {
            tokio::select! {
                frame = outbound.recv() => {
                    let Some(frame) = frame else {
                        // Released by the session.
                        let _ = sink.send(Message::Close(None)).await;
                        return;
                    };
                    if let Err(e) = sink.send(Message::Text(frame.into())).await {
                        let _ = events.send(TransportEvent::Failed(e.to_string()));
                        return;
                    }
                }
                msg = source.next() => {
                    let event = match msg {
                        Some(Ok(Message::Text(text))) => TransportEvent::Frame(text.as_str().to_owned()),
                        Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                            Ok(text) => TransportEvent::Frame(text),
                            Err(_) => continue,
                        },
                        Some(Ok(Message::Close(frame))) => {
                            let code = frame.map_or(NO_STATUS, |f| u16::from(f.code));
                            let _ = events.send(TransportEvent::Closed(code));
                            return;
                        }
                        Some(Ok(_)) => continue,
                        Some(Err(
                            tungstenite::Error::Protocol(ProtocolError::ResetWithoutClosingHandshake)
                            | tungstenite::Error::ConnectionClosed,
                        ))
                        | None => {
                            let _ = events.send(TransportEvent::Closed(ABNORMAL_CLOSURE));
                            return;
                        }
                        Some(Err(e)) => {
                            let _ = events.send(TransportEvent::Failed(e.to_string()));
                            return;
                        }
                    };
                    if events.send(event).is_err() {
                        return;
                    }
                }
            }
        }
    }
}
