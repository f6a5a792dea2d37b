use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{Connector, Socket, SocketEvents};
use crate::error::TransportError;

/// Upper bound on sending our close frame when the socket is released.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Connects to the backend over a WebSocket carrying JSON text frames.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, events: SocketEvents) -> Result<Socket, TransportError> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(TransportError::from_tungstenite)?;
        debug!(url = %self.url, "websocket handshake complete");

        let (mut ws_write, mut ws_read) = ws_stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let cancel = CancellationToken::new();
        let pump_cancel = cancel.clone();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    // Released by the connection manager: close quietly.
                    _ = pump_cancel.cancelled() => {
                        let close = ws_write.send(tungstenite::Message::Close(None));
                        let _ = tokio::time::timeout(CLOSE_TIMEOUT, close).await;
                        break;
                    }

                    Some(text) = rx.recv() => {
                        let frame = tungstenite::Message::Text(text.into());
                        if let Err(e) = ws_write.send(frame).await {
                            events.error(e.to_string());
                            events.closed();
                            break;
                        }
                    }

                    msg = ws_read.next() => {
                        match msg {
                            Some(Ok(tungstenite::Message::Text(text))) => {
                                events.frame(text.as_str().to_owned());
                            }
                            Some(Ok(tungstenite::Message::Binary(data))) => {
                                match String::from_utf8(data.to_vec()) {
                                    Ok(text) => events.frame(text),
                                    Err(_) => {
                                        debug!(len = data.len(), "ignoring non-text binary frame")
                                    }
                                }
                            }
                            Some(Ok(tungstenite::Message::Close(_))) | None => {
                                events.closed();
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                events.error(e.to_string());
                                events.closed();
                                break;
                            }
                        }
                    }
                }
            }
        });

        Ok(Socket::new(tx, cancel, task))
    }
}
