//! Session: one connection plus its conversation.
//!
//! The session runs as a single task. User commands from [`SessionHandle`]s
//! and connection signals are handled strictly one at a time, so no two
//! handlers ever run concurrently and document transactions complete before
//! the step that depends on them.

use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::connection::{
    ConnectionManager, ConnectionSignal, ConnectionState, Connector, SignalOutcome,
};
use crate::conversation::{Conversation, ConversationEntry, ConversationSnapshot};
use crate::document::{DocumentHost, DocumentSync};
use crate::error::{NotConnected, SessionError};
use crate::mutation::{MutationApplier, MutationOutcome};
use crate::protocol::{self, Envelope, Inbound, Intent};

/// Capacity of the conversation entry broadcast.
const ENTRY_BROADCAST_CAPACITY: usize = 256;

/// Commands that can be sent to a session
#[derive(Debug)]
enum SessionCommand {
    Open {
        respond_to: oneshot::Sender<()>,
    },
    Send {
        intent: Intent,
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },
    SyncDocument {
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },
    GetConversation {
        respond_to: oneshot::Sender<ConversationSnapshot>,
    },
    Close {
        respond_to: oneshot::Sender<()>,
    },
}

/// Handle to communicate with a running session
#[derive(Clone)]
pub struct SessionHandle {
    sender: mpsc::Sender<SessionCommand>,
    status: watch::Receiver<ConnectionState>,
    entries: broadcast::Sender<ConversationEntry>,
}

impl SessionHandle {
    /// Start connecting. No-op while connecting or connected.
    pub async fn open(&self) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SessionCommand::Open { respond_to: tx })
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    /// Send a user intent with a fresh snapshot of the active sheet.
    ///
    /// Fails with [`SessionError::NotConnected`] (carrying the intent back)
    /// when the connection is not up; nothing is recorded in that case.
    pub async fn send(&self, intent: Intent) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SessionCommand::Send {
                intent,
                respond_to: tx,
            })
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)?
    }

    pub async fn send_message(&self, text: impl Into<String>) -> Result<(), SessionError> {
        self.send(Intent::Message(text.into())).await
    }

    pub async fn send_suggestion(&self, text: impl Into<String>) -> Result<(), SessionError> {
        self.send(Intent::Suggestion(text.into())).await
    }

    /// Push the current state of the active sheet without a user message.
    pub async fn sync_document(&self) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SessionCommand::SyncDocument { respond_to: tx })
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)?
    }

    pub async fn conversation(&self) -> Result<ConversationSnapshot, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SessionCommand::GetConversation { respond_to: tx })
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    /// Tear the session down: cancels any pending reconnect and closes the
    /// socket before returning. Closing twice is fine.
    pub async fn close(&self) {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(SessionCommand::Close { respond_to: tx })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
    }

    /// Current connection status, for the status indicator.
    pub fn status(&self) -> ConnectionState {
        *self.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionState> {
        self.status.clone()
    }

    /// Subscribe to conversation entries as they are recorded.
    pub fn subscribe(&self) -> broadcast::Receiver<ConversationEntry> {
        self.entries.subscribe()
    }
}

/// Spawn a session task. Call [`SessionHandle::open`] to connect.
pub fn spawn<C, H>(config: &SessionConfig, connector: Arc<C>, host: Arc<H>) -> SessionHandle
where
    C: Connector,
    H: DocumentHost,
{
    let (cmd_tx, cmd_rx) = mpsc::channel(config.command_buffer);
    let (signal_tx, signal_rx) = mpsc::unbounded_channel();
    let (status_tx, status_rx) = watch::channel(ConnectionState::Disconnected);
    let (entries_tx, _) = broadcast::channel(ENTRY_BROADCAST_CAPACITY);

    let actor = SessionActor {
        connection: ConnectionManager::new(
            connector,
            config.reconnect_delay,
            signal_tx,
            status_tx,
        ),
        conversation: Conversation::new(),
        document: DocumentSync::new(host.clone()),
        mutations: MutationApplier::new(host),
        entries: entries_tx.clone(),
        sync_on_connect: config.sync_on_connect,
    };
    tokio::spawn(actor.run(cmd_rx, signal_rx));

    SessionHandle {
        sender: cmd_tx,
        status: status_rx,
        entries: entries_tx,
    }
}

struct SessionActor<C, H> {
    connection: ConnectionManager<C>,
    conversation: Conversation,
    document: DocumentSync<H>,
    mutations: MutationApplier<H>,
    entries: broadcast::Sender<ConversationEntry>,
    sync_on_connect: bool,
}

impl<C: Connector, H: DocumentHost> SessionActor<C, H> {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<SessionCommand>,
        mut signals: mpsc::UnboundedReceiver<ConnectionSignal>,
    ) {
        info!("session started");
        loop {
            tokio::select! {
                // Socket events already queued are handled before new commands.
                biased;

                Some(signal) = signals.recv() => {
                    match self.connection.handle_signal(signal).await {
                        SignalOutcome::Nothing => {}
                        SignalOutcome::Connected => self.on_connected().await,
                        SignalOutcome::Frame(text) => self.on_frame(&text).await,
                    }
                }
                cmd = commands.recv() => match cmd {
                    Some(cmd) => {
                        if !self.handle_command(cmd).await {
                            break;
                        }
                    }
                    None => {
                        debug!("all session handles dropped");
                        self.connection.close().await;
                        break;
                    }
                },
            }
        }
        info!(entries = self.conversation.entries().len(), "session closed");
    }

    /// Returns false once the session has been closed.
    async fn handle_command(&mut self, cmd: SessionCommand) -> bool {
        match cmd {
            SessionCommand::Open { respond_to } => {
                self.connection.open().await;
                let _ = respond_to.send(());
            }
            SessionCommand::Send { intent, respond_to } => {
                let _ = respond_to.send(self.send_intent(intent).await);
            }
            SessionCommand::SyncDocument { respond_to } => {
                let _ = respond_to.send(self.sync_document().await);
            }
            SessionCommand::GetConversation { respond_to } => {
                let _ = respond_to.send(self.conversation.snapshot());
            }
            SessionCommand::Close { respond_to } => {
                self.connection.close().await;
                let _ = respond_to.send(());
                return false;
            }
        }
        true
    }

    async fn send_intent(&mut self, intent: Intent) -> Result<(), SessionError> {
        if !self.connection.is_connected() {
            return Err(SessionError::NotConnected { intent });
        }

        let entry = self
            .conversation
            .record_user_intent(intent.kind(), intent.transcript())
            .clone();
        self.publish(entry);

        let snapshot = match self.document.snapshot().await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(error = %e, "sending without workbook context");
                None
            }
        };

        let text = Envelope::for_intent(&intent, snapshot).to_text()?;
        debug!(kind = ?intent.kind(), bytes = text.len(), "sending intent");
        self.connection
            .send(text)
            .map_err(|_| SessionError::NotConnected { intent })
    }

    async fn sync_document(&mut self) -> Result<(), SessionError> {
        if !self.connection.is_connected() {
            return Err(NotConnected.into());
        }
        let snapshot = self.document.snapshot().await?;
        let text = Envelope::excel_sync(snapshot).to_text()?;
        debug!(bytes = text.len(), "sending workbook sync");
        self.connection.send(text)?;
        Ok(())
    }

    async fn on_connected(&mut self) {
        if !self.sync_on_connect {
            return;
        }
        if let Err(e) = self.sync_document().await {
            warn!(error = %e, "initial workbook sync failed");
        }
    }

    async fn on_frame(&mut self, text: &str) {
        let entry = match protocol::decode(text) {
            Inbound::AssistantReply {
                content,
                suggestions,
            } => self
                .conversation
                .record_assistant_reply(content, suggestions)
                .clone(),
            Inbound::ExcelUpdate { content, updates } => {
                match self.mutations.apply(updates).await {
                    MutationOutcome::Applied(applied) => self
                        .conversation
                        .record_mutation_result(content, applied, true)
                        .clone(),
                    MutationOutcome::Failed(e) => self
                        .conversation
                        .record_mutation_result(
                            format!("I couldn't update the spreadsheet: {e}"),
                            Vec::new(),
                            false,
                        )
                        .clone(),
                }
            }
            Inbound::ErrorReply { message } => self.conversation.record_error(message).clone(),
        };
        self.publish(entry);
    }

    fn publish(&self, entry: ConversationEntry) {
        // No subscribers is fine; the conversation is still recorded.
        let _ = self.entries.send(entry);
    }
}
