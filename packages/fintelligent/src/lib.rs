//! Client session core for a spreadsheet assistant.
//!
//! A session keeps one WebSocket connection to the assistant backend alive,
//! reconnecting on a fixed delay, and keeps the conversation that flows over
//! it. Every user intent carries a fresh snapshot of the active worksheet,
//! and the backend can send back batches of cell writes that are applied
//! atomically through a [`DocumentHost`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use fintelligent::{MemoryWorkbook, SessionConfig, WebSocketConnector};
//!
//! # async fn run() -> Result<(), fintelligent::SessionError> {
//! let config = SessionConfig::default();
//! let connector = Arc::new(WebSocketConnector::new(&config.backend_url));
//! let session = fintelligent::spawn(&config, connector, Arc::new(MemoryWorkbook::new("Sheet1")));
//! session.open().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod conversation;
pub mod document;
pub mod error;
pub mod mutation;
pub mod protocol;
pub mod session;

pub use config::SessionConfig;
pub use connection::{ConnectionState, Connector, WebSocketConnector};
pub use conversation::{ConversationEntry, ConversationSnapshot, Role};
pub use document::{DocumentHost, DocumentTransaction, MemoryWorkbook, SheetId};
pub use error::{DocumentError, NotConnected, ProtocolError, SessionError, TransportError};
pub use protocol::{CellValue, DocumentSnapshot, Intent, IntentKind, Update};
pub use session::{SessionHandle, spawn};
