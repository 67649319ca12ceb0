//! Shared session lifecycle: one actor task per session.
//!
//! The actor owns the session's [`Connection`] and its state. Commands from
//! handles and events from the connection are handled one at a time, and
//! every handler runs inside `watch::Sender::send_modify` so observers only
//! ever see whole updates.

use remote_scripts_transport::{CloseOutcome, Connection, ConnectionEvent};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};

/// Per-kind behaviour plugged into the shared run loop.
pub trait SessionMachine: Send + 'static {
    type Command: Send + 'static;
    type State: Send + Sync + 'static;

    /// Short label for logs.
    fn label(&self) -> String;

    fn on_opened(&mut self, conn: &mut Connection, state: &mut Self::State);

    fn on_frame(&mut self, frame: String, conn: &mut Connection, state: &mut Self::State);

    fn on_closed(&mut self, outcome: CloseOutcome, state: &mut Self::State);

    fn on_command(&mut self, command: Self::Command, conn: &mut Connection, state: &mut Self::State);

    /// Called after the connection was closed locally.
    fn on_released(&mut self, _state: &mut Self::State) {}

    /// Called after every handler with the connection as it now stands.
    fn sync_connection(&self, _conn: &Connection, _state: &mut Self::State) {}
}

enum Control<C> {
    Command(C),
    Close,
}

/// Cloneable handle to a running session actor.
pub struct SessionHandle<C, S> {
    commands: mpsc::UnboundedSender<Control<C>>,
    state: watch::Receiver<S>,
}

impl<C, S> Clone for SessionHandle<C, S> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            state: self.state.clone(),
        }
    }
}

impl<C: Send + 'static, S: Send + Sync + 'static> SessionHandle<C, S> {
    /// Spawn the actor for `machine`. Must be called inside a tokio runtime.
    pub fn spawn<M>(machine: M, initial: S, conn: Connection) -> (Self, JoinHandle<()>)
    where
        M: SessionMachine<Command = C, State = S>,
    {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(initial);
        let task = tokio::spawn(run(machine, conn, state_tx, commands_rx));
        (
            Self {
                commands: commands_tx,
                state: state_rx,
            },
            task,
        )
    }

    /// Queue a command. Commands to a finished session are dropped.
    pub fn send(&self, command: C) {
        if self.commands.send(Control::Command(command)).is_err() {
            tracing::debug!("Dropping command for finished session");
        }
    }

    /// Ask the actor to close its connection and stop.
    pub fn close(&self) {
        let _ = self.commands.send(Control::Close);
    }

    /// Whether the actor has stopped.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.commands.is_closed()
    }

    /// Borrow the current state.
    #[must_use]
    pub fn borrow(&self) -> watch::Ref<'_, S> {
        self.state.borrow()
    }

    /// Receiver that observes every state update.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<S> {
        self.state.clone()
    }
}

impl<C: Send + 'static, S: Clone + Send + Sync + 'static> SessionHandle<C, S> {
    #[must_use]
    pub fn snapshot(&self) -> S {
        self.state.borrow().clone()
    }

    /// Wait until the state satisfies `predicate` and return it.
    ///
    /// Returns the last published state if the actor stops first.
    pub async fn wait_for(&self, mut predicate: impl FnMut(&S) -> bool) -> S {
        let mut rx = self.state.clone();
        if let Ok(state) = rx.wait_for(|s| predicate(s)).await {
            return state.clone();
        }
        rx.borrow().clone()
    }
}

async fn run<M: SessionMachine>(
    mut machine: M,
    mut conn: Connection,
    state: watch::Sender<M::State>,
    mut commands: mpsc::UnboundedReceiver<Control<M::Command>>,
) {
    let label = machine.label();
    tracing::debug!(session = %label, endpoint = %conn.endpoint(), "Session started");

    loop {
        tokio::select! {
            control = commands.recv() => match control {
                Some(Control::Command(command)) => state.send_modify(|s| {
                    machine.on_command(command, &mut conn, s);
                    machine.sync_connection(&conn, s);
                }),
                Some(Control::Close) | None => {
                    conn.close();
                    state.send_modify(|s| {
                        machine.on_released(s);
                        machine.sync_connection(&conn, s);
                    });
                    break;
                }
            },
            event = conn.next_event() => state.send_modify(|s| {
                match event {
                    ConnectionEvent::Opened => machine.on_opened(&mut conn, s),
                    ConnectionEvent::Frame(frame) => machine.on_frame(frame, &mut conn, s),
                    ConnectionEvent::Closed(outcome) => machine.on_closed(outcome, s),
                }
                machine.sync_connection(&conn, s);
            }),
        }
    }

    tracing::debug!(session = %label, "Session stopped");
}
