//! End-to-end session tests against a local WebSocket backend.

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{WebSocketStream, tungstenite::Message};

use fintelligent::{
    CellValue, ConnectionState, MemoryWorkbook, Role, SessionConfig, SessionHandle,
    WebSocketConnector,
};

const WAIT: Duration = Duration::from_secs(5);

/// Accepts backend connections and hands each upgraded socket to the test.
async fn backend() -> (String, mpsc::UnboundedReceiver<WebSocketStream<TcpStream>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/ws", listener.local_addr().unwrap());
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            if let Ok(ws) = tokio_tungstenite::accept_async(stream).await {
                if tx.send(ws).is_err() {
                    break;
                }
            }
        }
    });
    (url, rx)
}

fn start(url: String, book: &MemoryWorkbook) -> SessionHandle {
    let config = SessionConfig {
        backend_url: url,
        reconnect_delay: Duration::from_millis(200),
        ..Default::default()
    };
    let connector = Arc::new(WebSocketConnector::new(&config.backend_url));
    fintelligent::spawn(&config, connector, Arc::new(book.clone()))
}

async fn wait_for_status(session: &SessionHandle, state: ConnectionState) {
    let mut status = session.watch_status();
    tokio::time::timeout(WAIT, status.wait_for(|s| *s == state))
        .await
        .expect("timed out waiting for status")
        .unwrap();
}

async fn next_text(ws: &mut WebSocketStream<TcpStream>) -> Value {
    loop {
        let msg = tokio::time::timeout(WAIT, ws.next())
            .await
            .expect("timed out waiting for a frame")
            .unwrap()
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

#[tokio::test]
async fn test_message_round_trip() {
    let (url, mut accepted) = backend().await;
    let book = MemoryWorkbook::new("Sheet1");
    book.set_cell("A1", "Revenue").unwrap();
    book.set_cell("B1", 1200).unwrap();

    let session = start(url, &book);
    let mut entries = session.subscribe();
    session.open().await.unwrap();
    let mut ws = tokio::time::timeout(WAIT, accepted.recv()).await.unwrap().unwrap();
    wait_for_status(&session, ConnectionState::Connected).await;

    session.send_message("what is the total?").await.unwrap();
    let sent = next_text(&mut ws).await;
    assert_eq!(sent["type"], "message");
    assert_eq!(sent["content"], "what is the total?");
    assert_eq!(sent["excel_context"]["values"], json!([["Revenue", 1200]]));

    ws.send(Message::Text(
        json!({"content": "1200", "suggestions": ["Chart it"]})
            .to_string()
            .into(),
    ))
    .await
    .unwrap();

    let user = tokio::time::timeout(WAIT, entries.recv()).await.unwrap().unwrap();
    let reply = tokio::time::timeout(WAIT, entries.recv()).await.unwrap().unwrap();
    assert_eq!(user.role, Role::User);
    assert_eq!(reply.role, Role::Assistant);
    assert_eq!(reply.content, "1200");
    assert_eq!(reply.suggestions, Some(vec!["Chart it".to_string()]));

    session.close().await;
    assert_eq!(session.status(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_backend_update_is_written_to_workbook() {
    let (url, mut accepted) = backend().await;
    let book = MemoryWorkbook::new("Sheet1");
    let session = start(url, &book);
    let mut entries = session.subscribe();
    session.open().await.unwrap();
    let mut ws = tokio::time::timeout(WAIT, accepted.recv()).await.unwrap().unwrap();
    wait_for_status(&session, ConnectionState::Connected).await;

    ws.send(Message::Text(
        json!({
            "type": "excel_update",
            "content": "Added totals",
            "updates": [
                {"cell": "A1", "value": 3},
                {"cell": "A2", "value": 4},
                {"cell": "A3", "value": "==SUM(A1:A2)"}
            ]
        })
        .to_string()
        .into(),
    ))
    .await
    .unwrap();

    let entry = tokio::time::timeout(WAIT, entries.recv()).await.unwrap().unwrap();
    assert!(!entry.is_error);
    assert_eq!(entry.applied_updates.map(|u| u.len()), Some(3));
    assert_eq!(book.cell("A2").unwrap(), CellValue::from(4));
    assert_eq!(book.cell("A3").unwrap(), CellValue::from("=SUM(A1:A2)"));

    session.close().await;
}

#[tokio::test]
async fn test_reconnects_after_backend_drops() {
    let (url, mut accepted) = backend().await;
    let book = MemoryWorkbook::new("Sheet1");
    let session = start(url, &book);
    session.open().await.unwrap();

    let first = tokio::time::timeout(WAIT, accepted.recv()).await.unwrap().unwrap();
    wait_for_status(&session, ConnectionState::Connected).await;
    drop(first);
    wait_for_status(&session, ConnectionState::Disconnected).await;

    let mut second = tokio::time::timeout(WAIT, accepted.recv()).await.unwrap().unwrap();
    wait_for_status(&session, ConnectionState::Connected).await;

    session.send_message("still there?").await.unwrap();
    assert_eq!(next_text(&mut second).await["content"], "still there?");

    session.close().await;
}

#[tokio::test]
async fn test_failing_backend_is_retried() {
    // Accepts TCP and hangs up before the handshake, counting attempts.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/ws", listener.local_addr().unwrap());
    let (tx, mut attempts) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            drop(stream);
            if tx.send(()).is_err() {
                break;
            }
        }
    });

    let book = MemoryWorkbook::new("Sheet1");
    let session = start(url, &book);
    session.open().await.unwrap();

    for _ in 0..2 {
        tokio::time::timeout(WAIT, attempts.recv())
            .await
            .expect("session stopped dialing")
            .unwrap();
    }
    assert_ne!(session.status(), ConnectionState::Connected);

    let err = session.send_message("hello").await.unwrap_err();
    assert!(err.into_intent().is_some());
    assert!(session.conversation().await.unwrap().entries.is_empty());

    session.close().await;
}
