//! Configuration session: the live parameter schema of one script.
//!
//! Local edits and model reloads are stamped with a client state version
//! that only ever grows within one session. The server pushes whole
//! schemas (`initialConfig`, `reloadedConfig`) and single-parameter deltas;
//! every change is forwarded in order on the session's update channel.

use std::collections::HashSet;

use remote_scripts_core::{Parameter, ParameterValues, ScriptConfig, ScriptInfo, SessionError};
use remote_scripts_transport::{
    CloseOutcome, ConfigEnvelope, ConfigEvent, ConfigRequest, Connection, ConnectionState,
};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, watch};
use uuid::Uuid;

use crate::{
    context::{ClientSignal, SyncContext},
    machine::{SessionHandle, SessionMachine},
    reconcile::PendingReloads,
    values::ParameterSink,
};

/// Streaming endpoint for a script's configuration.
#[must_use]
pub fn script_endpoint(script_name: &str) -> String {
    format!("scripts/{}", urlencoding::encode(script_name))
}

/// Published state of the configuration session.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigState {
    pub script_name: String,
    /// Script metadata from the latest full schema.
    pub info: Option<ScriptInfo>,
    pub parameters: Vec<Parameter>,
    /// True until `initialConfig` arrives.
    pub loading: bool,
    pub connection: ConnectionState,
    /// Mutations waiting for the connection to open.
    pub queued: usize,
    /// Version of the last mutation sent by this client.
    pub client_state_version: u64,
    /// Latest client version the server reported as applied.
    pub accepted_client_version: Option<u64>,
    pub server_state_version: Option<u64>,
    pub pending_reloads: usize,
    pub close_outcome: Option<CloseOutcome>,
    pub error: Option<SessionError>,
    /// Last inbound message that could not be decoded. Not fatal.
    pub decode_error: Option<SessionError>,
}

impl ConfigState {
    fn new(script_name: &str) -> Self {
        Self {
            script_name: script_name.to_string(),
            info: None,
            parameters: Vec::new(),
            loading: true,
            connection: ConnectionState::Connecting,
            queued: 0,
            client_state_version: 0,
            accepted_client_version: None,
            server_state_version: None,
            pending_reloads: 0,
            close_outcome: None,
            error: None,
            decode_error: None,
        }
    }

    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

/// One schema change, as delivered to the value store.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaChange {
    /// Full schema after the change.
    pub parameters: Vec<Parameter>,
    /// Whole schema replaced rather than one parameter changed.
    pub replaced: bool,
    /// Values of the reload this replacement answers.
    pub reloaded_values: Option<ParameterValues>,
}

/// Command accepted by the configuration session.
#[derive(Debug, Clone)]
pub enum ConfigCommand {
    SetValue { name: String, value: Value },
    ReloadModel { model_id: String, values: ParameterValues },
}

struct ConfigMachine {
    script_name: String,
    version: u64,
    pending: PendingReloads,
    updates: mpsc::UnboundedSender<SchemaChange>,
    signals: broadcast::Sender<ClientSignal>,
}

impl ConfigMachine {
    fn next_version(&mut self) -> u64 {
        self.version += 1;
        self.version
    }

    fn send(&self, conn: &mut Connection, request: &ConfigRequest) {
        if let Err(e) = conn.send_json(request) {
            tracing::error!(script = %self.script_name, "Failed to serialize request: {e}");
        }
    }

    fn emit(&self, state: &ConfigState, replaced: bool, reloaded_values: Option<ParameterValues>) {
        let change = SchemaChange {
            parameters: state.parameters.clone(),
            replaced,
            reloaded_values,
        };
        if self.updates.send(change).is_err() {
            tracing::trace!(script = %self.script_name, "No listener for schema changes");
        }
    }

    fn replace_schema(&mut self, config: ScriptConfig, state: &mut ConfigState) {
        let ScriptConfig { info, parameters } = config;
        let reloaded = info
            .client_model_id
            .as_deref()
            .and_then(|model_id| self.pending.resolve(model_id));
        if reloaded.is_some() {
            tracing::debug!(script = %self.script_name, "Schema answers pending reload");
        }

        state.parameters = self.unique(parameters);
        state.info = Some(info);
        self.emit(state, true, reloaded);
    }

    fn unique(&self, parameters: Vec<Parameter>) -> Vec<Parameter> {
        let mut seen = HashSet::new();
        parameters
            .into_iter()
            .filter(|p| {
                let fresh = seen.insert(p.name.clone());
                if !fresh {
                    tracing::warn!(script = %self.script_name, "Duplicate parameter '{}' dropped", p.name);
                }
                fresh
            })
            .collect()
    }

    fn apply(&mut self, event: ConfigEvent, state: &mut ConfigState) {
        match event {
            ConfigEvent::InitialConfig(config) => {
                state.loading = false;
                self.replace_schema(config, state);
            }
            ConfigEvent::ReloadedConfig(config) => self.replace_schema(config, state),
            ConfigEvent::ParameterChanged(parameter) => {
                let Some(slot) = state.parameters.iter_mut().find(|p| p.name == parameter.name)
                else {
                    tracing::debug!(script = %self.script_name, "Change for unknown parameter '{}'", parameter.name);
                    return;
                };
                *slot = parameter;
                self.emit(state, false, None);
            }
            ConfigEvent::ParameterAdded(parameter) => {
                match state.parameters.iter_mut().find(|p| p.name == parameter.name) {
                    Some(slot) => *slot = parameter,
                    None => state.parameters.push(parameter),
                }
                self.emit(state, false, None);
            }
            ConfigEvent::ParameterRemoved(removed) => {
                let before = state.parameters.len();
                state.parameters.retain(|p| p.name != removed.parameter_name);
                if state.parameters.len() != before {
                    self.emit(state, false, None);
                }
            }
            ConfigEvent::ClientStateVersionAccepted(data) => {
                if let Some(version) = data.as_u64() {
                    state.accepted_client_version = Some(version);
                }
            }
            ConfigEvent::PreloadScript(_) => {
                tracing::trace!(script = %self.script_name, "Ignoring preloadScript");
            }
        }
    }
}

impl SessionMachine for ConfigMachine {
    type Command = ConfigCommand;
    type State = ConfigState;

    fn label(&self) -> String {
        format!("configuration {}", self.script_name)
    }

    fn on_opened(&mut self, conn: &mut Connection, _state: &mut ConfigState) {
        tracing::info!(script = %self.script_name, endpoint = %conn.endpoint(), "Configuration stream open");
    }

    fn on_frame(&mut self, frame: String, _conn: &mut Connection, state: &mut ConfigState) {
        let envelope = match ConfigEnvelope::decode(&frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(script = %self.script_name, "Dropping undecodable config message: {e}");
                state.decode_error = Some(e.into());
                return;
            }
        };
        if let Some(version) = envelope.server_state_version {
            state.server_state_version = Some(version);
        }
        if let Some(version) = envelope.client_state_version {
            state.accepted_client_version = Some(version);
        }
        match envelope.event {
            Ok(event) => self.apply(event, state),
            Err(e) => {
                tracing::warn!(script = %self.script_name, "Dropping config message: {e}");
                state.decode_error = Some(e);
            }
        }
    }

    fn on_closed(&mut self, outcome: CloseOutcome, state: &mut ConfigState) {
        let error = outcome.error();
        match &error {
            Some(e) => tracing::warn!(script = %self.script_name, "Configuration stream failed: {e}"),
            None => tracing::info!(script = %self.script_name, "Configuration stream closed: {outcome:?}"),
        }
        if outcome.is_unauthorized() {
            let _ = self.signals.send(ClientSignal::ReauthenticationRequired);
        }
        state.error = error;
        state.close_outcome = Some(outcome);
    }

    fn on_command(&mut self, command: ConfigCommand, conn: &mut Connection, state: &mut ConfigState) {
        let request = match command {
            ConfigCommand::SetValue { name, value } => ConfigRequest::ParameterValue {
                parameter: name,
                value,
                client_state_version: self.next_version(),
            },
            ConfigCommand::ReloadModel { model_id, values } => {
                let version = self.next_version();
                self.pending.insert(model_id.clone(), values.clone(), version);
                ConfigRequest::ReloadModelValues {
                    parameter_values: values,
                    client_model_id: model_id,
                    client_state_version: version,
                }
            }
        };
        self.send(conn, &request);
        state.client_state_version = self.version;
    }

    fn on_released(&mut self, state: &mut ConfigState) {
        let expired = self.pending.expire_all();
        if expired > 0 {
            tracing::debug!(script = %self.script_name, "Expired {expired} pending reloads");
        }
        self.version = 0;
        state.info = None;
        state.parameters.clear();
        state.client_state_version = 0;
        state.accepted_client_version = None;
        state.server_state_version = None;
    }

    fn sync_connection(&self, conn: &Connection, state: &mut ConfigState) {
        state.connection = conn.state().clone();
        state.queued = conn.queued_len();
        state.pending_reloads = self.pending.len();
    }
}

/// Handle to the live configuration session.
#[derive(Clone)]
pub struct ConfigurationHandle {
    script_name: String,
    session: SessionHandle<ConfigCommand, ConfigState>,
}

impl ConfigurationHandle {
    fn spawn(ctx: &SyncContext, script_name: &str) -> (Self, mpsc::UnboundedReceiver<SchemaChange>) {
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let conn = Connection::open(ctx.transport(), script_endpoint(script_name));
        let machine = ConfigMachine {
            script_name: script_name.to_string(),
            version: 0,
            pending: PendingReloads::new(),
            updates: updates_tx,
            signals: ctx.signals(),
        };
        let (session, _task) = SessionHandle::spawn(machine, ConfigState::new(script_name), conn);
        let handle = Self {
            script_name: script_name.to_string(),
            session,
        };
        (handle, updates_rx)
    }

    #[must_use]
    pub fn script_name(&self) -> &str {
        &self.script_name
    }

    #[must_use]
    pub fn state(&self) -> ConfigState {
        self.session.snapshot()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConfigState> {
        self.session.subscribe()
    }

    /// Send one parameter value, queued while connecting.
    pub fn send_parameter_value(&self, name: impl Into<String>, value: Value) {
        self.session.send(ConfigCommand::SetValue {
            name: name.into(),
            value,
        });
    }

    /// Ask the server to rebuild the schema from `values`. Returns the model
    /// id the answering schema will carry.
    pub fn reload_model(&self, values: ParameterValues) -> String {
        let model_id = Uuid::new_v4().to_string();
        self.session.send(ConfigCommand::ReloadModel {
            model_id: model_id.clone(),
            values,
        });
        model_id
    }

    pub async fn wait_for(&self, predicate: impl FnMut(&ConfigState) -> bool) -> ConfigState {
        self.session.wait_for(predicate).await
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.session.is_finished()
    }

    fn close(&self) {
        self.session.close();
    }
}

impl ParameterSink for ConfigurationHandle {
    fn send_parameter_value(&self, name: &str, value: Value) {
        Self::send_parameter_value(self, name, value);
    }

    fn reload_model(&self, values: ParameterValues) -> String {
        Self::reload_model(self, values)
    }
}

/// Owner of the single configuration session. The latest `connect` wins.
pub struct ConfigurationClient {
    ctx: SyncContext,
    current: Option<ConfigurationHandle>,
}

impl ConfigurationClient {
    #[must_use]
    pub const fn new(ctx: SyncContext) -> Self {
        Self { ctx, current: None }
    }

    /// Tear down any current session and open one for `script_name`.
    ///
    /// The receiver yields every schema change of the new session.
    pub fn connect(
        &mut self,
        script_name: &str,
    ) -> (ConfigurationHandle, mpsc::UnboundedReceiver<SchemaChange>) {
        self.disconnect();
        tracing::info!(script = %script_name, "Connecting configuration");
        let (handle, updates) = ConfigurationHandle::spawn(&self.ctx, script_name);
        self.current = Some(handle.clone());
        (handle, updates)
    }

    /// Close the current session, discarding queued mutations.
    pub fn disconnect(&mut self) {
        if let Some(handle) = self.current.take() {
            tracing::debug!(script = %handle.script_name(), "Disconnecting configuration");
            handle.close();
        }
    }

    #[must_use]
    pub const fn current(&self) -> Option<&ConfigurationHandle> {
        self.current.as_ref()
    }
}

impl Drop for ConfigurationClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use assert_matches::assert_matches;
    use remote_scripts_core::ClientConfig;
    use remote_scripts_transport::MemoryTransport;
    use serde_json::json;

    use super::*;
    use crate::memory_api::MemoryJobApi;

    fn setup() -> (ConfigurationClient, SyncContext, MemoryTransport) {
        let transport = MemoryTransport::new();
        let ctx = SyncContext::new(
            ClientConfig::new("http://localhost:5000").unwrap(),
            Arc::new(transport.clone()),
            Arc::new(MemoryJobApi::new()),
        );
        (ConfigurationClient::new(ctx.clone()), ctx, transport)
    }

    fn initial_config(parameters: Value) -> String {
        json!({
            "event": "initialConfig",
            "data": {"name": "deploy", "parameters": parameters}
        })
        .to_string()
    }

    #[test]
    fn test_script_endpoint_is_encoded() {
        assert_eq!(script_endpoint("my script/v2"), "scripts/my%20script%2Fv2");
    }

    #[tokio::test]
    async fn test_schema_events() {
        let (mut client, _ctx, transport) = setup();
        let (handle, mut updates) = client.connect("deploy");
        let server = transport.accept().await;
        server.open();

        server.push(initial_config(json!([
            {"name": "env", "type": "list", "values": ["dev", "prod"]},
            {"name": "env", "type": "text"},
            {"name": "count", "type": "int"}
        ])));
        let change = updates.recv().await.unwrap();
        assert!(change.replaced);
        assert_eq!(change.parameters.len(), 2);

        server.push(
            json!({"event": "parameterChanged", "data": {"name": "count", "type": "int", "max": 5}})
                .to_string(),
        );
        server.push(json!({"event": "parameterChanged", "data": {"name": "ghost"}}).to_string());
        server.push(json!({"event": "parameterAdded", "data": {"name": "dry_run", "withoutValue": true}}).to_string());
        server.push(json!({"event": "parameterRemoved", "data": {"parameterName": "env"}}).to_string());

        let changed = updates.recv().await.unwrap();
        assert_eq!(changed.parameters[1].max, Some(5.0));
        assert!(!changed.replaced);
        let added = updates.recv().await.unwrap();
        assert_eq!(added.parameters.len(), 3);
        let removed = updates.recv().await.unwrap();
        let names: Vec<_> = removed.parameters.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["count", "dry_run"]);

        let state = handle.wait_for(|s| s.parameters.len() == 2).await;
        assert!(!state.loading);
        assert_eq!(state.info.unwrap().name, "deploy");
    }

    #[tokio::test]
    async fn test_versions_are_monotonic_and_stamped() {
        let (mut client, _ctx, transport) = setup();
        let (handle, _updates) = client.connect("deploy");
        let mut server = transport.accept().await;

        handle.send_parameter_value("env", json!("a"));
        let model_id = handle.reload_model(ParameterValues::new());
        handle.send_parameter_value("env", json!("b"));
        let state = handle.wait_for(|s| s.queued == 3).await;
        assert_eq!(state.client_state_version, 3);

        server.open();
        let mut versions = Vec::new();
        for _ in 0..3 {
            let frame: Value = serde_json::from_str(&server.recv().await.unwrap()).unwrap();
            versions.push(frame["data"]["clientStateVersion"].as_u64().unwrap());
            if frame["event"] == "reloadModelValues" {
                assert_eq!(frame["data"]["clientModelId"], json!(model_id));
            }
        }
        assert_eq!(versions, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_inbound_versions_do_not_touch_counter() {
        let (mut client, _ctx, transport) = setup();
        let (handle, _updates) = client.connect("deploy");
        let server = transport.accept().await;
        server.open();

        handle.send_parameter_value("env", json!("a"));
        server.push(
            json!({"event": "clientStateVersionAccepted", "clientStateVersion": 40, "serverStateVersion": 7})
                .to_string(),
        );
        let state = handle.wait_for(|s| s.server_state_version.is_some()).await;
        assert_eq!(state.accepted_client_version, Some(40));
        assert_eq!(state.server_state_version, Some(7));

        handle.send_parameter_value("env", json!("b"));
        let state = handle.wait_for(|s| s.client_state_version == 2).await;
        assert_eq!(state.client_state_version, 2);
    }

    #[tokio::test]
    async fn test_reload_resolution() {
        let (mut client, _ctx, transport) = setup();
        let (handle, mut updates) = client.connect("deploy");
        let server = transport.accept().await;
        server.open();

        let mut values = ParameterValues::new();
        values.insert("env".into(), json!("staging"));
        let model_id = handle.reload_model(values.clone());
        handle.wait_for(|s| s.pending_reloads == 1).await;

        server.push(
            json!({"event": "reloadedConfig", "data": {"name": "deploy", "clientModelId": "other", "parameters": []}})
                .to_string(),
        );
        assert_eq!(updates.recv().await.unwrap().reloaded_values, None);

        server.push(
            json!({"event": "reloadedConfig", "data": {"name": "deploy", "clientModelId": model_id, "parameters": []}})
                .to_string(),
        );
        assert_eq!(updates.recv().await.unwrap().reloaded_values, Some(values));
        let state = handle.wait_for(|s| s.pending_reloads == 0).await;
        assert_eq!(state.pending_reloads, 0);
    }

    #[tokio::test]
    async fn test_malformed_frames_are_dropped() {
        let (mut client, _ctx, transport) = setup();
        let (handle, mut updates) = client.connect("deploy");
        let server = transport.accept().await;
        server.open();

        server.push("garbage");
        server.push(json!({"event": "parameterAdded", "data": 12}).to_string());
        server.push(initial_config(json!([{"name": "env"}])));

        let change = updates.recv().await.unwrap();
        assert_eq!(change.parameters.len(), 1);
        let state = handle.state();
        assert_eq!(state.error, None);
        assert_matches!(state.decode_error, Some(SessionError::ProtocolDecode(_)));
    }

    #[tokio::test]
    async fn test_unknown_event_still_records_versions() {
        let (mut client, _ctx, transport) = setup();
        let (handle, _updates) = client.connect("deploy");
        let server = transport.accept().await;
        server.open();

        server.push(json!({"event": "somethingNew", "data": {}, "serverStateVersion": 5}).to_string());
        server.push(json!({"event": "clientStateVersionAccepted", "clientStateVersion": 1}).to_string());

        let state = handle.wait_for(|s| s.accepted_client_version == Some(1)).await;
        assert_eq!(state.server_state_version, Some(5));
        assert_matches!(state.decode_error, Some(SessionError::ProtocolDecode(_)));
        assert_eq!(state.error, None);
    }

    #[tokio::test]
    async fn test_unauthorized_signals_reauthentication() {
        let (mut client, ctx, transport) = setup();
        let mut signals = ctx.subscribe_signals();
        let (handle, _updates) = client.connect("deploy");
        transport.accept().await.close(4001);

        assert_eq!(signals.recv().await.unwrap(), ClientSignal::ReauthenticationRequired);
        let state = handle.wait_for(|s| s.close_outcome.is_some()).await;
        assert_eq!(state.error, Some(SessionError::AuthenticationRequired));
    }

    #[tokio::test]
    async fn test_close_outcomes() {
        for (code, error) in [
            (1000, None),
            (1006, None),
            (403, Some(SessionError::AccessDenied)),
            (4004, Some(SessionError::NotFound)),
        ] {
            let (mut client, _ctx, transport) = setup();
            let (handle, _updates) = client.connect("deploy");
            let server = transport.accept().await;
            server.open();
            server.close(code);

            let state = handle.wait_for(|s| s.close_outcome.is_some()).await;
            assert_eq!(state.error, error, "code {code}");
            assert_matches!(state.connection, ConnectionState::Closed(_));
        }
    }

    #[tokio::test]
    async fn test_connect_replaces_previous_session() {
        let (mut client, _ctx, transport) = setup();
        let (first, _first_updates) = client.connect("deploy");
        let mut first_server = transport.accept().await;
        first.send_parameter_value("env", json!("queued"));

        let (second, _second_updates) = client.connect("build");
        let second_server = transport.accept().await;
        assert_eq!(second_server.endpoint(), "scripts/build");

        assert_eq!(first_server.recv().await, None);
        let state = first.wait_for(|s| s.connection == ConnectionState::Released).await;
        assert_eq!(state.client_state_version, 0);
        assert_eq!(state.queued, 0);
        assert_eq!(second.state().client_state_version, 0);
        assert_eq!(client.current().unwrap().script_name(), "build");
    }
}
