//! Execution session: live output, files and input for one running job.

use std::sync::Arc;

use futures::stream::BoxStream;
use remote_scripts_core::{
    EventFeed, ExecutionEvent, ExecutionId, ExecutionState, ExecutionStatus, LogChunk,
};
use remote_scripts_transport::{CloseOutcome, Connection, StreamEvent, StreamFrame};
use tokio::sync::watch;

use crate::{
    context::SyncContext,
    machine::{SessionHandle, SessionMachine},
};

/// Streaming endpoint for an execution.
#[must_use]
pub fn execution_endpoint(id: &ExecutionId) -> String {
    format!("executions/io/{id}")
}

/// Command accepted by an execution session.
#[derive(Debug, Clone)]
pub enum ExecutionCommand {
    SendInput(String),
}

struct ExecutionMachine {
    id: ExecutionId,
    feed: Arc<EventFeed>,
}

impl ExecutionMachine {
    fn set_status(&self, state: &mut ExecutionState, status: ExecutionStatus) {
        tracing::info!(execution_id = %self.id, "Execution {:?} -> {status:?}", state.status);
        state.status = status;
        self.feed.push(ExecutionEvent::Status {
            status,
            error: state.error.clone(),
        });
    }

    fn append_log(&self, state: &mut ExecutionState, text: String) {
        let chunk = LogChunk::now(text);
        state.logs.push(chunk.clone());
        self.feed.push(ExecutionEvent::Log(chunk));
    }
}

impl SessionMachine for ExecutionMachine {
    type Command = ExecutionCommand;
    type State = ExecutionState;

    fn label(&self) -> String {
        format!("execution {}", self.id)
    }

    fn on_opened(&mut self, _conn: &mut Connection, state: &mut ExecutionState) {
        if state.status == ExecutionStatus::Initializing {
            self.set_status(state, ExecutionStatus::Executing);
        }
    }

    fn on_frame(&mut self, frame: String, _conn: &mut Connection, state: &mut ExecutionState) {
        match StreamFrame::decode(frame) {
            StreamFrame::Event(StreamEvent::Output(text)) | StreamFrame::Text(text) => {
                self.append_log(state, text);
            }
            StreamFrame::Event(StreamEvent::Input(prompt)) => {
                state.input_prompt = Some(prompt.clone());
                self.feed.push(ExecutionEvent::InputPrompt { text: prompt });
            }
            StreamFrame::Event(StreamEvent::File(file)) => {
                state.files.push(file.clone());
                self.feed.push(ExecutionEvent::File(file));
            }
            StreamFrame::Event(StreamEvent::InlineImage(image)) => {
                state
                    .inline_images
                    .insert(image.output_path.clone(), image.download_url.clone());
                self.feed.push(ExecutionEvent::InlineImage {
                    output_path: image.output_path,
                    download_url: image.download_url,
                });
            }
            StreamFrame::Ignored(event) => {
                tracing::debug!(execution_id = %self.id, "Ignoring stream event '{event}'");
            }
        }
    }

    fn on_closed(&mut self, outcome: CloseOutcome, state: &mut ExecutionState) {
        if !state.status.is_active() {
            tracing::debug!(execution_id = %self.id, "Close after {:?} ignored", state.status);
            return;
        }
        let status = match (&outcome, outcome.error()) {
            (_, Some(error)) => {
                tracing::warn!(execution_id = %self.id, "Execution stream failed: {error}");
                state.error = Some(error);
                ExecutionStatus::Error
            }
            (CloseOutcome::NormalClosure, None) => ExecutionStatus::Finished,
            (_, None) => ExecutionStatus::Disconnected,
        };
        self.set_status(state, status);
    }

    fn on_command(
        &mut self,
        command: ExecutionCommand,
        conn: &mut Connection,
        state: &mut ExecutionState,
    ) {
        match command {
            ExecutionCommand::SendInput(text) => {
                if !conn.send_if_open(text) {
                    tracing::debug!(execution_id = %self.id, "Input dropped, stream not open");
                }
                state.input_prompt = None;
                self.feed.push(ExecutionEvent::InputAnswered);
            }
        }
    }
}

/// Handle to one execution session.
#[derive(Clone)]
pub struct ExecutionHandle {
    id: ExecutionId,
    session: SessionHandle<ExecutionCommand, ExecutionState>,
    feed: Arc<EventFeed>,
}

impl ExecutionHandle {
    /// Open the execution's stream and start tracking it from `initial`.
    #[must_use]
    pub fn spawn(ctx: &SyncContext, initial: ExecutionState) -> Self {
        let id = initial.id.clone();
        let feed = Arc::new(EventFeed::new(ctx.config().history_bytes()));
        let conn = Connection::open(ctx.transport(), execution_endpoint(&id));
        let machine = ExecutionMachine {
            id: id.clone(),
            feed: Arc::clone(&feed),
        };
        let (session, _task) = SessionHandle::spawn(machine, initial, conn);
        Self { id, session, feed }
    }

    #[must_use]
    pub const fn id(&self) -> &ExecutionId {
        &self.id
    }

    #[must_use]
    pub fn state(&self) -> ExecutionState {
        self.session.snapshot()
    }

    #[must_use]
    pub fn status(&self) -> ExecutionStatus {
        self.session.borrow().status
    }

    #[must_use]
    pub fn script_name(&self) -> String {
        self.session.borrow().script_name.clone()
    }

    /// Receiver observing every state update.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ExecutionState> {
        self.session.subscribe()
    }

    #[must_use]
    pub fn feed(&self) -> Arc<EventFeed> {
        Arc::clone(&self.feed)
    }

    /// Output text so far, then live output until the execution ends.
    #[must_use]
    pub fn output_stream(&self) -> BoxStream<'static, String> {
        self.feed.output_stream()
    }

    /// Reply to the input prompt. Sent only if the stream is open; the
    /// prompt is cleared either way.
    pub fn send_input(&self, text: impl Into<String>) {
        self.session.send(ExecutionCommand::SendInput(text.into()));
    }

    /// Wait until the state satisfies `predicate`.
    pub async fn wait_for(&self, predicate: impl FnMut(&ExecutionState) -> bool) -> ExecutionState {
        self.session.wait_for(predicate).await
    }

    /// Wait until the execution leaves INITIALIZING/EXECUTING.
    pub async fn finished(&self) -> ExecutionState {
        self.wait_for(|s| !s.status.is_active()).await
    }

    pub(crate) fn close(&self) {
        self.session.close();
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use futures::StreamExt;
    use remote_scripts_core::{ClientConfig, ParameterValues, SessionError};
    use remote_scripts_transport::MemoryTransport;
    use serde_json::json;

    use super::*;
    use crate::memory_api::MemoryJobApi;

    fn setup() -> (SyncContext, MemoryTransport) {
        let transport = MemoryTransport::new();
        let config = ClientConfig::new("http://localhost:5000").unwrap();
        let ctx = SyncContext::new(
            config,
            Arc::new(transport.clone()),
            Arc::new(MemoryJobApi::new()),
        );
        (ctx, transport)
    }

    fn spawn(ctx: &SyncContext, status: ExecutionStatus) -> ExecutionHandle {
        let state = ExecutionState::new(
            ExecutionId::new("42"),
            "build",
            status,
            ParameterValues::new(),
        );
        ExecutionHandle::spawn(ctx, state)
    }

    #[tokio::test]
    async fn test_stream_events_update_state() {
        let (ctx, transport) = setup();
        let handle = spawn(&ctx, ExecutionStatus::Initializing);
        let server = transport.accept().await;
        assert_eq!(server.endpoint(), "executions/io/42");

        server.open();
        server.push(json!({"event": "output", "data": "hello\n"}).to_string());
        server.push(json!({"event": "input", "data": "Continue?"}).to_string());
        server.push(
            json!({"event": "file", "data": {"url": "result_files/a.txt", "filename": "a.txt"}})
                .to_string(),
        );
        server.push("not json at all");

        let state = handle.wait_for(|s| s.logs.len() == 2).await;
        assert_eq!(state.status, ExecutionStatus::Executing);
        assert_eq!(state.output(), "hello\nnot json at all");
        assert_eq!(state.input_prompt.as_deref(), Some("Continue?"));
        assert_eq!(state.files.len(), 1);
        assert_eq!(state.files[0].filename, "a.txt");
    }

    #[tokio::test]
    async fn test_send_input_is_raw_and_clears_prompt() {
        let (ctx, transport) = setup();
        let handle = spawn(&ctx, ExecutionStatus::Initializing);
        let mut server = transport.accept().await;
        server.open();
        server.push(json!({"event": "input", "data": "Name?"}).to_string());
        handle.wait_for(|s| s.input_prompt.is_some()).await;

        handle.send_input("alice");
        assert_eq!(server.recv().await.as_deref(), Some("alice"));
        let state = handle.wait_for(|s| s.input_prompt.is_none()).await;
        assert_eq!(state.input_prompt, None);
    }

    #[tokio::test]
    async fn test_input_before_open_is_not_queued() {
        let (ctx, transport) = setup();
        let handle = spawn(&ctx, ExecutionStatus::Initializing);
        let mut server = transport.accept().await;

        let mut events = handle.feed().subscribe();
        handle.send_input("too early");
        assert_eq!(events.recv().await.unwrap(), ExecutionEvent::InputAnswered);
        server.open();
        handle.wait_for(|s| s.status == ExecutionStatus::Executing).await;
        handle.send_input("on time");
        assert_eq!(server.recv().await.as_deref(), Some("on time"));
    }

    #[tokio::test]
    async fn test_close_codes_map_to_status() {
        let cases = [
            (1000, ExecutionStatus::Finished, None),
            (1006, ExecutionStatus::Disconnected, None),
            (4001, ExecutionStatus::Error, Some(SessionError::AuthenticationRequired)),
            (403, ExecutionStatus::Error, Some(SessionError::AccessDenied)),
            (4004, ExecutionStatus::Error, Some(SessionError::NotFound)),
        ];
        for (code, status, error) in cases {
            let (ctx, transport) = setup();
            let handle = spawn(&ctx, ExecutionStatus::Initializing);
            let server = transport.accept().await;
            server.open();
            server.close(code);

            let state = handle.finished().await;
            assert_eq!(state.status, status, "code {code}");
            assert_eq!(state.error, error, "code {code}");
        }
    }

    #[tokio::test]
    async fn test_transport_failure_before_open_is_error() {
        let (ctx, transport) = setup();
        let handle = spawn(&ctx, ExecutionStatus::Initializing);
        transport.accept().await.fail("connection refused");

        let state = handle.finished().await;
        assert_eq!(state.status, ExecutionStatus::Error);
        assert_matches!(state.error, Some(SessionError::ConnectionError(msg)) if msg == "connection refused");
    }

    #[tokio::test]
    async fn test_reattached_execution_stays_executing_on_open() {
        let (ctx, transport) = setup();
        let handle = spawn(&ctx, ExecutionStatus::Executing);
        let server = transport.accept().await;
        server.open();
        server.push(json!({"event": "output", "data": "resumed"}).to_string());

        let state = handle.wait_for(|s| !s.logs.is_empty()).await;
        assert_eq!(state.status, ExecutionStatus::Executing);
    }

    #[tokio::test]
    async fn test_output_stream_ends_with_execution() {
        let (ctx, transport) = setup();
        let handle = spawn(&ctx, ExecutionStatus::Initializing);
        let server = transport.accept().await;
        server.open();
        server.push(json!({"event": "output", "data": "a"}).to_string());
        server.push(json!({"event": "output", "data": "b"}).to_string());
        server.close(1000);

        let output: Vec<String> = handle.output_stream().collect().await;
        assert_eq!(output, vec!["a", "b"]);
    }
}
