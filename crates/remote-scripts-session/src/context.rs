//! Shared collaborators handed to every session.

use std::sync::Arc;

use remote_scripts_core::{ClientConfig, JobApi};
use remote_scripts_transport::{Transport, WebSocketTransport};
use tokio::sync::broadcast;

/// Client-wide signal raised by a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientSignal {
    /// The configuration stream was refused as unauthenticated.
    ReauthenticationRequired,
}

/// Transport, job API and signal bus shared by the registry and the
/// configuration client.
#[derive(Clone)]
pub struct SyncContext {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    api: Arc<dyn JobApi>,
    signals: broadcast::Sender<ClientSignal>,
}

impl SyncContext {
    #[must_use]
    pub fn new(config: ClientConfig, transport: Arc<dyn Transport>, api: Arc<dyn JobApi>) -> Self {
        let (signals, _) = broadcast::channel(16);
        Self {
            config,
            transport,
            api,
            signals,
        }
    }

    /// Context streaming over WebSockets to the configured server.
    #[must_use]
    pub fn websocket(config: ClientConfig, api: Arc<dyn JobApi>) -> Self {
        let transport = Arc::new(WebSocketTransport::new(config.clone()));
        Self::new(config, transport, api)
    }

    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    #[must_use]
    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.transport)
    }

    #[must_use]
    pub fn api(&self) -> Arc<dyn JobApi> {
        Arc::clone(&self.api)
    }

    #[must_use]
    pub fn subscribe_signals(&self) -> broadcast::Receiver<ClientSignal> {
        self.signals.subscribe()
    }

    pub(crate) fn signals(&self) -> broadcast::Sender<ClientSignal> {
        self.signals.clone()
    }
}
