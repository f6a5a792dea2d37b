//! ConnectionManager: the one logical socket of a session.
//!
//! Owns the socket, the dial task and the reconnect timer. Everything that
//! happens asynchronously (dial results, frames, errors, closes, timer
//! expiry) comes back as a [`ConnectionSignal`] on the session's channel and
//! is fed to [`ConnectionManager::handle_signal`] by the session's dispatch
//! loop, one at a time.

mod machine;
pub mod websocket;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use crate::error::{NotConnected, TransportError};

pub use machine::{ConnectionAction, ConnectionEvent, ConnectionMachine, ConnectionState};
pub use websocket::WebSocketConnector;

/// Something that happened on a live socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketSignal {
    Frame(String),
    Error(String),
    Closed,
}

/// Asynchronous input to the connection manager.
#[derive(Debug)]
pub enum ConnectionSignal {
    Dialed {
        generation: u64,
        result: Result<Socket, TransportError>,
    },
    Socket {
        generation: u64,
        signal: SocketSignal,
    },
    RetryElapsed {
        timer: u64,
    },
}

/// What the session needs to act on after a signal was handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalOutcome {
    Nothing,
    Connected,
    Frame(String),
}

/// Tagged sender handed to a connector so its pump can report socket events.
#[derive(Debug, Clone)]
pub struct SocketEvents {
    generation: u64,
    tx: mpsc::UnboundedSender<ConnectionSignal>,
}

impl SocketEvents {
    pub fn frame(&self, text: String) {
        self.emit(SocketSignal::Frame(text));
    }

    pub fn error(&self, reason: impl Into<String>) {
        self.emit(SocketSignal::Error(reason.into()));
    }

    pub fn closed(&self) {
        self.emit(SocketSignal::Closed);
    }

    fn emit(&self, signal: SocketSignal) {
        // The receiver is gone only after the session has shut down.
        let _ = self.tx.send(ConnectionSignal::Socket {
            generation: self.generation,
            signal,
        });
    }
}

/// Handle to an open socket and its I/O pump. Dropping it stops the pump.
#[derive(Debug)]
pub struct Socket {
    outbound: mpsc::UnboundedSender<String>,
    cancel: DropGuard,
    task: JoinHandle<()>,
}

impl Socket {
    pub fn new(
        outbound: mpsc::UnboundedSender<String>,
        cancel: CancellationToken,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            outbound,
            cancel: cancel.drop_guard(),
            task,
        }
    }

    /// Queue a text frame. A dead pump is reported later as a close.
    fn send_text(&self, text: String) {
        if self.outbound.send(text).is_err() {
            debug!("socket pump already stopped; frame dropped");
        }
    }

    /// Stop the pump and wait for it to finish.
    async fn release(self) {
        let Socket { cancel, task, .. } = self;
        drop(cancel);
        if let Err(e) = task.await {
            if e.is_panic() {
                warn!("socket pump panicked: {e}");
            }
        }
    }
}

/// Opens sockets to the backend.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a socket. The implementation reports frames, errors and the final
    /// close through `events`, and stops when the returned socket is released.
    async fn connect(&self, events: SocketEvents) -> Result<Socket, TransportError>;
}

struct ReconnectTimer {
    id: u64,
    cancel: CancellationToken,
}

pub struct ConnectionManager<C> {
    connector: Arc<C>,
    machine: ConnectionMachine,
    reconnect_delay: Duration,
    signals: mpsc::UnboundedSender<ConnectionSignal>,
    status: watch::Sender<ConnectionState>,
    socket: Option<Socket>,
    generation: u64,
    dial: Option<JoinHandle<()>>,
    timer: Option<ReconnectTimer>,
    next_timer_id: u64,
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(
        connector: Arc<C>,
        reconnect_delay: Duration,
        signals: mpsc::UnboundedSender<ConnectionSignal>,
        status: watch::Sender<ConnectionState>,
    ) -> Self {
        Self {
            connector,
            machine: ConnectionMachine::new(),
            reconnect_delay,
            signals,
            status,
            socket: None,
            generation: 0,
            dial: None,
            timer: None,
            next_timer_id: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.machine.state()
    }

    pub fn is_connected(&self) -> bool {
        self.machine.state() == ConnectionState::Connected
    }

    pub fn reconnect_pending(&self) -> bool {
        self.timer.is_some()
    }

    /// Start connecting. No-op while connecting or connected.
    pub async fn open(&mut self) {
        self.dispatch(ConnectionEvent::OpenRequested).await;
    }

    /// Queue a text frame on the live socket.
    pub fn send(&self, text: String) -> Result<(), NotConnected> {
        match (&self.socket, self.is_connected()) {
            (Some(socket), true) => {
                socket.send_text(text);
                Ok(())
            }
            _ => Err(NotConnected),
        }
    }

    /// Cancel any pending reconnect and release the socket before returning.
    /// No further connection attempts are made afterwards.
    pub async fn close(&mut self) {
        self.dispatch(ConnectionEvent::Shutdown).await;
        if let Some(dial) = self.dial.take() {
            dial.abort();
        }
        info!("connection closed");
    }

    pub async fn handle_signal(&mut self, signal: ConnectionSignal) -> SignalOutcome {
        match signal {
            ConnectionSignal::Dialed { generation, result } => {
                if generation != self.generation || self.machine.is_shut_down() {
                    if let Ok(socket) = result {
                        socket.release().await;
                    }
                    return SignalOutcome::Nothing;
                }
                self.dial = None;
                match result {
                    Ok(socket) => {
                        if let Some(previous) = self.socket.replace(socket) {
                            previous.release().await;
                        }
                        self.dispatch(ConnectionEvent::Opened).await;
                        if self.is_connected() {
                            info!(generation, "connected to backend");
                            return SignalOutcome::Connected;
                        }
                        SignalOutcome::Nothing
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to connect to backend");
                        self.dispatch(ConnectionEvent::Errored).await;
                        self.dispatch(ConnectionEvent::Closed).await;
                        SignalOutcome::Nothing
                    }
                }
            }
            ConnectionSignal::Socket { generation, signal } => {
                if generation != self.generation {
                    debug!(generation, "ignoring signal from a stale socket");
                    return SignalOutcome::Nothing;
                }
                match signal {
                    SocketSignal::Frame(text) => {
                        if self.is_connected() {
                            SignalOutcome::Frame(text)
                        } else {
                            SignalOutcome::Nothing
                        }
                    }
                    SocketSignal::Error(reason) => {
                        warn!(%reason, "socket error");
                        self.dispatch(ConnectionEvent::Errored).await;
                        SignalOutcome::Nothing
                    }
                    SocketSignal::Closed => {
                        info!("socket closed by backend");
                        self.dispatch(ConnectionEvent::Closed).await;
                        SignalOutcome::Nothing
                    }
                }
            }
            ConnectionSignal::RetryElapsed { timer } => {
                if self.timer.as_ref().map(|t| t.id) != Some(timer) {
                    return SignalOutcome::Nothing;
                }
                self.timer = None;
                debug!("reconnect delay elapsed");
                self.dispatch(ConnectionEvent::RetryElapsed).await;
                SignalOutcome::Nothing
            }
        }
    }

    async fn dispatch(&mut self, event: ConnectionEvent) {
        let before = self.machine.state();
        let actions = self.machine.handle(event);
        for action in actions {
            self.perform(action).await;
        }
        let after = self.machine.state();
        if before != after {
            debug!(from = %before, to = %after, ?event, "connection state changed");
        }
        self.status.send_replace(after);
    }

    async fn perform(&mut self, action: ConnectionAction) {
        match action {
            ConnectionAction::Dial => self.dial(),
            ConnectionAction::ScheduleReconnect => self.schedule_reconnect(),
            ConnectionAction::CancelReconnect => {
                if let Some(timer) = self.timer.take() {
                    timer.cancel.cancel();
                }
            }
            ConnectionAction::ReleaseSocket => {
                if let Some(socket) = self.socket.take() {
                    socket.release().await;
                }
            }
        }
    }

    fn dial(&mut self) {
        self.generation += 1;
        let generation = self.generation;
        let connector = self.connector.clone();
        let signals = self.signals.clone();
        let events = SocketEvents {
            generation,
            tx: signals.clone(),
        };
        debug!(generation, "dialing backend");
        if let Some(previous) = self.dial.replace(tokio::spawn(async move {
            let result = connector.connect(events).await;
            let _ = signals.send(ConnectionSignal::Dialed { generation, result });
        })) {
            previous.abort();
        }
    }

    fn schedule_reconnect(&mut self) {
        self.next_timer_id += 1;
        let id = self.next_timer_id;
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let signals = self.signals.clone();
        let delay = self.reconnect_delay;

        tokio::spawn(async move {
            tokio::select! {
                _ = task_cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = signals.send(ConnectionSignal::RetryElapsed { timer: id });
                }
            }
        });

        info!(delay_secs = delay.as_secs_f64(), "reconnect scheduled");
        if let Some(previous) = self.timer.replace(ReconnectTimer { id, cancel }) {
            previous.cancel.cancel();
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted connector for driving the manager and session without a network.

    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// What the next dial should do.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum DialPlan {
        Accept,
        Refuse,
    }

    /// Server side of an accepted fake socket.
    pub struct FakeRemote {
        pub events: SocketEvents,
        pub sent: mpsc::UnboundedReceiver<String>,
        pub released: CancellationToken,
    }

    impl FakeRemote {
        /// Frames the client has sent so far.
        pub fn drain_sent(&mut self) -> Vec<String> {
            let mut out = Vec::new();
            while let Ok(frame) = self.sent.try_recv() {
                out.push(frame);
            }
            out
        }
    }

    #[derive(Default)]
    pub struct FakeConnector {
        plans: Mutex<VecDeque<DialPlan>>,
        remotes: Mutex<Vec<FakeRemote>>,
        dials: Mutex<Vec<tokio::time::Instant>>,
    }

    impl FakeConnector {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Dials not covered by a plan are accepted.
        pub fn plan(&self, plan: DialPlan) {
            self.plans.lock().unwrap().push_back(plan);
        }

        pub fn dial_count(&self) -> usize {
            self.dials.lock().unwrap().len()
        }

        pub fn dial_times(&self) -> Vec<tokio::time::Instant> {
            self.dials.lock().unwrap().clone()
        }

        pub fn take_remote(&self) -> Option<FakeRemote> {
            let mut remotes = self.remotes.lock().unwrap();
            if remotes.is_empty() {
                None
            } else {
                Some(remotes.remove(0))
            }
        }
    }

    #[async_trait]
    impl Connector for FakeConnector {
        async fn connect(&self, events: SocketEvents) -> Result<Socket, TransportError> {
            self.dials.lock().unwrap().push(tokio::time::Instant::now());
            let plan = self
                .plans
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(DialPlan::Accept);
            if plan == DialPlan::Refuse {
                return Err(TransportError::Unavailable);
            }

            let (tx, rx) = mpsc::unbounded_channel();
            let cancel = CancellationToken::new();
            let task_cancel = cancel.clone();
            let task = tokio::spawn(async move { task_cancel.cancelled().await });
            self.remotes.lock().unwrap().push(FakeRemote {
                events,
                sent: rx,
                released: cancel.clone(),
            });
            Ok(Socket::new(tx, cancel, task))
        }
    }
}
