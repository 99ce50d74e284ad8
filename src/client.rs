//! Client runtime: one task owns the state and serializes every mutation.
//!
//! Commands from the front end and updates pushed by the session are both
//! folded into core events, applied through the pure `transition`, and the
//! resulting effects executed here. Observers get notifications on a
//! broadcast channel and state snapshots on a watch channel; a lagging
//! observer skips, never blocks, the loop.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use crate::session::{Message, SessionUpdate, StreamSession};
use crate::state_machine::{
    transition, ClientState, Effect, Event, SessionView, StageEvent, TimelineStep,
};

/// Operations the front end may request.
#[derive(Debug)]
enum Command {
    Submit { text: String },
    Cancel,
}

/// Notifications published to observers.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// A step joined the live timeline.
    Step { step: TimelineStep },
    /// The conversation changed; carries the full list.
    Messages { messages: Vec<Message> },
    /// The session's run flag flipped.
    Loading { loading: bool },
    /// A finished turn was archived under its answer message id.
    TurnArchived { message_id: String },
    /// The conversation was torn down; all state is gone.
    SessionReset,
    /// A transport failure; informational, the run simply ends.
    Error { message: String },
}

/// The runtime task. Constructed and spawned via [`ResearchClient::spawn`].
pub struct ResearchClient {
    state: ClientState,
    session: Arc<dyn StreamSession>,
    command_rx: mpsc::Receiver<Command>,
    update_rx: mpsc::Receiver<SessionUpdate>,
    broadcast_tx: broadcast::Sender<ClientEvent>,
    state_tx: watch::Sender<ClientState>,
}

impl ResearchClient {
    /// Spawn the runtime over `session`, consuming the update channel the
    /// session was constructed with. The returned handle is the only
    /// surface other tasks see.
    pub fn spawn(
        session: Arc<dyn StreamSession>,
        update_rx: mpsc::Receiver<SessionUpdate>,
    ) -> ClientHandle {
        let (command_tx, command_rx) = mpsc::channel(32);
        let (broadcast_tx, _) = broadcast::channel(128);
        let (state_tx, state_rx) = watch::channel(ClientState::default());

        let client = Self {
            state: ClientState::default(),
            session,
            command_rx,
            update_rx,
            broadcast_tx: broadcast_tx.clone(),
            state_tx,
        };
        tokio::spawn(client.run());

        ClientHandle {
            command_tx,
            broadcast_tx,
            state_rx,
        }
    }

    async fn run(mut self) {
        info!("research client started");
        loop {
            tokio::select! {
                Some(command) = self.command_rx.recv() => self.handle_command(command).await,
                Some(update) = self.update_rx.recv() => self.handle_update(update).await,
                else => break,
            }
        }
        info!("research client stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Submit { text } => {
                let id = uuid::Uuid::new_v4().to_string();
                self.apply(Event::Submit { id, text }).await;
            }
            Command::Cancel => self.apply(Event::Cancel).await,
        }
    }

    async fn handle_update(&mut self, update: SessionUpdate) {
        match update {
            SessionUpdate::Update(raw) => {
                self.apply(Event::Stage(StageEvent::from_update(raw))).await;
            }
            SessionUpdate::MessagesChanged => {
                self.apply(Event::Sync).await;
                self.broadcast(ClientEvent::Messages {
                    messages: self.session.messages(),
                });
            }
            SessionUpdate::LoadingChanged(loading) => {
                self.apply(Event::Sync).await;
                self.broadcast(ClientEvent::Loading { loading });
            }
            SessionUpdate::Finished(payload) => {
                // Informational only; completion is detected from the
                // loading flag and the message list.
                debug!(has_payload = payload.is_some(), "run finished");
                self.apply(Event::Sync).await;
            }
            SessionUpdate::Failed(error) => {
                warn!(%error, "run failed");
                self.broadcast(ClientEvent::Error {
                    message: error.to_string(),
                });
                self.apply(Event::Sync).await;
            }
        }
    }

    /// Apply one core event: snapshot the session view, run the pure
    /// transition, install the new state, execute the effects in order,
    /// publish the snapshot.
    async fn apply(&mut self, event: Event) {
        debug!(?event, "applying event");
        let view = SessionView::new(
            self.session.is_loading(),
            self.session.messages().last().cloned(),
        );
        let result = transition(&self.state, &view, event);
        self.state = result.new_state;
        for effect in result.effects {
            self.execute(effect).await;
        }
        self.state_tx.send_replace(self.state.clone());
    }

    async fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::SubmitTurn { message } => {
                let mut messages = self.session.messages();
                messages.push(message);
                if let Err(error) = self.session.submit(messages).await {
                    warn!(%error, "failed to start run");
                    self.broadcast(ClientEvent::Error {
                        message: error.to_string(),
                    });
                }
            }
            Effect::StopRun => self.session.stop().await,
            Effect::ResetSession => {
                self.session.reset().await;
                self.broadcast(ClientEvent::SessionReset);
            }
            Effect::StepAppended { step } => self.broadcast(ClientEvent::Step { step }),
            Effect::TurnArchived { message_id } => {
                info!(
                    message_id = %message_id,
                    steps = self.state.timeline.len(),
                    "turn archived"
                );
                self.broadcast(ClientEvent::TurnArchived { message_id });
            }
        }
    }

    fn broadcast(&self, event: ClientEvent) {
        // No subscribers is fine; the runtime never depends on delivery.
        let _ = self.broadcast_tx.send(event);
    }
}

/// Clone-able handle to a running [`ResearchClient`].
#[derive(Clone)]
pub struct ClientHandle {
    command_tx: mpsc::Sender<Command>,
    broadcast_tx: broadcast::Sender<ClientEvent>,
    state_rx: watch::Receiver<ClientState>,
}

impl ClientHandle {
    /// Submit a query. Whitespace-only text is dropped by the core.
    pub async fn submit(&self, text: impl Into<String>) {
        let _ = self
            .command_tx
            .send(Command::Submit { text: text.into() })
            .await;
    }

    /// Stop the in-flight turn and discard the whole conversation.
    pub async fn cancel(&self) {
        let _ = self.command_tx.send(Command::Cancel).await;
    }

    /// Subscribe to client notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.broadcast_tx.subscribe()
    }

    /// Snapshot of the current core state.
    pub fn state(&self) -> ClientState {
        self.state_rx.borrow().clone()
    }

    /// Live timeline for the in-flight turn.
    pub fn timeline(&self) -> Vec<TimelineStep> {
        self.state_rx.borrow().timeline.clone()
    }

    /// Archived timeline for a completed turn, if one was recorded.
    pub fn archived(&self, message_id: &str) -> Option<Vec<TimelineStep>> {
        self.state_rx
            .borrow()
            .archived(message_id)
            .map(<[TimelineStep]>::to_vec)
    }

    /// Watch receiver over state snapshots, for callers that need to wait
    /// on a condition rather than poll.
    #[allow(dead_code)] // Exercised by the runtime integration tests
    pub fn watch(&self) -> watch::Receiver<ClientState> {
        self.state_rx.clone()
    }
}
