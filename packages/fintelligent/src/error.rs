use tokio_tungstenite::tungstenite;

use crate::protocol::Intent;

/// Transport-level failure: the socket could not be opened or died.
///
/// Never fatal. The connection manager turns these into a close and retries
/// after the reconnect delay.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("backend is unavailable")]
    Unavailable,

    #[error("invalid backend url: {0}")]
    InvalidUrl(String),

    #[error("websocket error: {0}")]
    WebSocket(#[source] Box<tungstenite::Error>),
}

impl TransportError {
    pub fn from_tungstenite(err: tungstenite::Error) -> Self {
        let is_connect = match &err {
            tungstenite::Error::Io(io_err) => matches!(
                io_err.kind(),
                std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        };
        match err {
            _ if is_connect => Self::Unavailable,
            tungstenite::Error::Url(url_err) => Self::InvalidUrl(url_err.to_string()),
            other => Self::WebSocket(Box::new(other)),
        }
    }
}

/// An inbound payload that could not be understood.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("payload is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unrecognized payload: {0}")]
    Unrecognized(String),
}

/// Failure reported by the document-editing host.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DocumentError {
    #[error("no active worksheet")]
    NoActiveSheet,

    #[error("unknown worksheet `{0}`")]
    UnknownSheet(String),

    #[error("invalid cell address `{0}`")]
    InvalidAddress(String),

    #[error("failed to read used range: {0}")]
    Read(String),

    #[error("failed to write {address}: {reason}")]
    Write { address: String, reason: String },

    #[error("transaction commit failed: {0}")]
    Commit(String),
}

/// `send` was called while the connection is not in the `connected` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("not connected to the backend")]
pub struct NotConnected;

/// Errors surfaced to callers of [`crate::SessionHandle`].
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The intent was not sent and no conversation entry was recorded.
    /// The intent is handed back so the caller can retry once connected.
    #[error("not connected to the backend")]
    NotConnected { intent: Intent },

    /// A session-level operation (such as a workbook sync) needs a live connection.
    #[error(transparent)]
    Offline(#[from] NotConnected),

    #[error("session is closed")]
    Closed,

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error("failed to encode envelope: {0}")]
    Encode(#[from] serde_json::Error),
}

impl SessionError {
    /// Take back the intent of a rejected send, if there is one.
    pub fn into_intent(self) -> Option<Intent> {
        match self {
            Self::NotConnected { intent } => Some(intent),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refused_connection_is_unavailable() {
        let io = std::io::Error::from(std::io::ErrorKind::ConnectionRefused);
        let err = TransportError::from_tungstenite(tungstenite::Error::Io(io));
        assert!(matches!(err, TransportError::Unavailable));
    }

    #[test]
    fn test_other_io_errors_are_kept() {
        let io = std::io::Error::from(std::io::ErrorKind::TimedOut);
        let err = TransportError::from_tungstenite(tungstenite::Error::Io(io));
        assert!(matches!(err, TransportError::WebSocket(_)));
    }

    #[test]
    fn test_not_connected_returns_intent() {
        let err = SessionError::NotConnected {
            intent: Intent::Message("hi".into()),
        };
        assert_eq!(err.into_intent(), Some(Intent::Message("hi".into())));
        assert_eq!(SessionError::Closed.into_intent(), None);
    }
}
