//! Connection lifecycle as an explicit transition table.
//!
//! ```text
//! disconnected --open--> connecting --opened--> connected
//!      ^                     |                      |
//!      |                  errored               errored
//!      |                     v                      v
//!      +------closed------ error <------------------+
//!      |
//!      +--(retry timer)--> connecting
//! ```
//!
//! The machine never performs I/O. It returns the actions the connection
//! manager must carry out, and it alone decides when a reconnect timer is
//! scheduled, so at most one can be pending.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// The transport reported an error; a close is expected to follow.
    Error,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    OpenRequested,
    Opened,
    Errored,
    Closed,
    RetryElapsed,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionAction {
    Dial,
    ScheduleReconnect,
    CancelReconnect,
    ReleaseSocket,
}

#[derive(Debug, Default)]
pub struct ConnectionMachine {
    state: ConnectionState,
    reconnect_pending: bool,
    shut_down: bool,
}

impl ConnectionMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn reconnect_pending(&self) -> bool {
        self.reconnect_pending
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    /// Apply one event and return the actions it calls for, in order.
    pub fn handle(&mut self, event: ConnectionEvent) -> Vec<ConnectionAction> {
        use ConnectionAction::*;
        use ConnectionState::*;

        if self.shut_down {
            // Anything that still shows up after shutdown only needs releasing.
            return match event {
                ConnectionEvent::Opened => vec![ReleaseSocket],
                _ => Vec::new(),
            };
        }

        match (self.state, event) {
            (Disconnected | Error, ConnectionEvent::OpenRequested) => {
                let mut actions = self.cancel_reconnect();
                // An errored socket is still held until its close arrives.
                if self.state == Error {
                    actions.push(ReleaseSocket);
                }
                self.state = Connecting;
                actions.push(Dial);
                actions
            }
            (Connecting | Connected, ConnectionEvent::OpenRequested) => Vec::new(),

            (Connecting, ConnectionEvent::Opened) => {
                self.state = Connected;
                Vec::new()
            }
            (_, ConnectionEvent::Opened) => vec![ReleaseSocket],

            (Connecting | Connected, ConnectionEvent::Errored) => {
                self.state = Error;
                Vec::new()
            }
            (_, ConnectionEvent::Errored) => Vec::new(),

            (Connecting | Connected | Error, ConnectionEvent::Closed) => {
                self.state = Disconnected;
                let mut actions = vec![ReleaseSocket];
                actions.extend(self.schedule_reconnect());
                actions
            }
            (Disconnected, ConnectionEvent::Closed) => self.schedule_reconnect(),

            (state, ConnectionEvent::RetryElapsed) => {
                self.reconnect_pending = false;
                if state == Disconnected {
                    self.state = Connecting;
                    vec![Dial]
                } else {
                    Vec::new()
                }
            }

            (_, ConnectionEvent::Shutdown) => {
                self.shut_down = true;
                self.state = Disconnected;
                let mut actions = self.cancel_reconnect();
                actions.push(ReleaseSocket);
                actions
            }
        }
    }

    fn schedule_reconnect(&mut self) -> Vec<ConnectionAction> {
        if self.reconnect_pending {
            return Vec::new();
        }
        self.reconnect_pending = true;
        vec![ConnectionAction::ScheduleReconnect]
    }

    fn cancel_reconnect(&mut self) -> Vec<ConnectionAction> {
        if !self.reconnect_pending {
            return Vec::new();
        }
        self.reconnect_pending = false;
        vec![ConnectionAction::CancelReconnect]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionAction::*;
    use ConnectionEvent::*;

    fn connected() -> ConnectionMachine {
        let mut m = ConnectionMachine::new();
        m.handle(OpenRequested);
        m.handle(Opened);
        assert_eq!(m.state(), ConnectionState::Connected);
        m
    }

    #[test]
    fn test_open_dials_once() {
        let mut m = ConnectionMachine::new();
        assert_eq!(m.handle(OpenRequested), vec![Dial]);
        assert_eq!(m.state(), ConnectionState::Connecting);
        assert!(m.handle(OpenRequested).is_empty());
        m.handle(Opened);
        assert!(m.handle(OpenRequested).is_empty());
    }

    #[test]
    fn test_close_schedules_one_reconnect() {
        let mut m = connected();
        assert_eq!(m.handle(Closed), vec![ReleaseSocket, ScheduleReconnect]);
        assert_eq!(m.state(), ConnectionState::Disconnected);
        assert!(m.reconnect_pending());
        // further closes while the timer is pending add nothing
        assert!(m.handle(Closed).is_empty());
        assert!(m.handle(Errored).is_empty());
        assert!(m.handle(Closed).is_empty());
    }

    #[test]
    fn test_error_alone_does_not_reconnect() {
        let mut m = connected();
        assert!(m.handle(Errored).is_empty());
        assert_eq!(m.state(), ConnectionState::Error);
        assert!(!m.reconnect_pending());
        assert_eq!(m.handle(Closed), vec![ReleaseSocket, ScheduleReconnect]);
    }

    #[test]
    fn test_failed_dial_is_error_then_close() {
        let mut m = ConnectionMachine::new();
        m.handle(OpenRequested);
        m.handle(Errored);
        assert_eq!(m.handle(Closed), vec![ReleaseSocket, ScheduleReconnect]);
    }

    #[test]
    fn test_retry_redials() {
        let mut m = connected();
        m.handle(Closed);
        assert_eq!(m.handle(RetryElapsed), vec![Dial]);
        assert_eq!(m.state(), ConnectionState::Connecting);
        assert!(!m.reconnect_pending());
    }

    #[test]
    fn test_manual_open_cancels_pending_timer() {
        let mut m = connected();
        m.handle(Closed);
        assert_eq!(m.handle(OpenRequested), vec![CancelReconnect, Dial]);
        assert!(!m.reconnect_pending());
    }

    #[test]
    fn test_open_from_error_releases_errored_socket() {
        let mut m = connected();
        m.handle(Errored);
        assert_eq!(m.handle(OpenRequested), vec![ReleaseSocket, Dial]);
        assert_eq!(m.state(), ConnectionState::Connecting);
        // nothing is held after a plain disconnect
        let mut m = connected();
        m.handle(Closed);
        assert_eq!(m.handle(OpenRequested), vec![CancelReconnect, Dial]);
    }

    #[test]
    fn test_shutdown_cancels_and_releases() {
        let mut m = connected();
        m.handle(Closed);
        assert_eq!(m.handle(Shutdown), vec![CancelReconnect, ReleaseSocket]);
        assert!(m.is_shut_down());
        assert!(m.handle(RetryElapsed).is_empty());
        assert!(m.handle(OpenRequested).is_empty());
        assert!(m.handle(Closed).is_empty());
        assert_eq!(m.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_socket_opening_after_shutdown_is_released() {
        let mut m = ConnectionMachine::new();
        m.handle(OpenRequested);
        m.handle(Shutdown);
        assert_eq!(m.handle(Opened), vec![ReleaseSocket]);
        assert_eq!(m.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_at_most_one_timer_for_any_event_sequence() {
        let events = [
            Closed,
            Errored,
            OpenRequested,
            Opened,
            Closed,
            Closed,
            RetryElapsed,
            Errored,
            Closed,
        ];
        let mut m = ConnectionMachine::new();
        let mut pending = 0i32;
        for _ in 0..4 {
            for event in events {
                if event == RetryElapsed {
                    // the timer that fired is no longer pending
                    pending = 0;
                }
                for action in m.handle(event) {
                    match action {
                        ScheduleReconnect => pending += 1,
                        CancelReconnect => pending -= 1,
                        _ => {}
                    }
                }
                assert!((0..=1).contains(&pending), "more than one reconnect timer pending");
                assert_eq!(pending == 1, m.reconnect_pending());
            }
        }
    }
}
