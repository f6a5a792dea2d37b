use anyhow::{Context, Result};
use fintelligent::{
    ConversationEntry, Intent, MemoryWorkbook, Role, SessionConfig, SessionError, SessionHandle,
    WebSocketConnector,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::workbook_file;

const HELP: &str = "commands: /s N (send suggestion N), /file PATH, /sync, /retry, /history, /quit";

/// One line of user input, parsed.
#[derive(Debug, PartialEq, Eq)]
enum Input {
    Message(String),
    Suggestion(usize),
    File(PathBuf),
    Sync,
    Retry,
    History,
    Quit,
    Help,
    Empty,
}

fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Input::Message(line.to_string());
    };
    let (cmd, arg) = match rest.split_once(char::is_whitespace) {
        Some((cmd, arg)) => (cmd, arg.trim()),
        None => (rest, ""),
    };
    match cmd {
        "s" => match arg.parse::<usize>() {
            Ok(n) if n > 0 => Input::Suggestion(n),
            _ => Input::Help,
        },
        "file" if !arg.is_empty() => Input::File(PathBuf::from(arg)),
        "sync" => Input::Sync,
        "retry" => Input::Retry,
        "history" => Input::History,
        "quit" | "exit" => Input::Quit,
        _ => Input::Help,
    }
}

/// Interactive session: stdin lines become intents, entries print as they arrive.
pub async fn run(config: &SessionConfig, workbook: Option<PathBuf>, save: bool) -> Result<()> {
    let book = match &workbook {
        Some(path) => workbook_file::load(path)?,
        None => MemoryWorkbook::new("Sheet1"),
    };

    let connector = Arc::new(WebSocketConnector::new(&config.backend_url));
    let session = fintelligent::spawn(config, connector, Arc::new(book.clone()));
    let mut entries = session.subscribe();
    let mut status = session.watch_status();
    info!(url = %config.backend_url, "connecting");
    session.open().await?;

    println!("{HELP}");
    let mut chat = Chat {
        session: &session,
        suggestions: Vec::new(),
        pending: None,
    };
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                if !chat.handle_input(parse_input(&line)).await? {
                    break;
                }
            }

            entry = entries.recv() => match entry {
                Ok(entry) => chat.show(&entry),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    println!("[{n} entries skipped; /history to see them]");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },

            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *status.borrow_and_update();
                println!("[{state}]");
            }
        }
    }

    session.close().await;
    if let (true, Some(path)) = (save, &workbook) {
        workbook_file::save(&book, path)?;
        println!("[saved {}]", path.display());
    }
    Ok(())
}

struct Chat<'a> {
    session: &'a SessionHandle,
    /// Suggestions from the most recent reply that carried any.
    suggestions: Vec<String>,
    /// Intent rejected while offline, kept for `/retry`.
    pending: Option<Intent>,
}

impl Chat<'_> {
    /// Returns false when the user asked to quit.
    async fn handle_input(&mut self, input: Input) -> Result<bool> {
        match input {
            Input::Empty => {}
            Input::Quit => return Ok(false),
            Input::Help => println!("{HELP}"),
            Input::Message(text) => self.send(Intent::Message(text)).await?,
            Input::Suggestion(n) => match self.suggestions.get(n - 1) {
                Some(text) => self.send(Intent::Suggestion(text.clone())).await?,
                None => println!("[no suggestion {n}]"),
            },
            Input::File(path) => self.send(read_attachment(&path)?).await?,
            Input::Sync => match self.session.sync_document().await {
                Ok(()) => println!("[workbook synced]"),
                Err(e) => println!("[sync failed: {e}]"),
            },
            Input::Retry => match self.pending.take() {
                Some(intent) => self.send(intent).await?,
                None => println!("[nothing to retry]"),
            },
            Input::History => {
                let convo = self.session.conversation().await?;
                for entry in &convo.entries {
                    self.show(entry);
                }
            }
        }
        Ok(true)
    }

    async fn send(&mut self, intent: Intent) -> Result<()> {
        match self.session.send(intent).await {
            Ok(()) => Ok(()),
            Err(SessionError::NotConnected { intent }) => {
                debug!(kind = ?intent.kind(), "holding intent until reconnect");
                println!("[not connected ({}); /retry once connected]", self.session.status());
                self.pending = Some(intent);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn show(&mut self, entry: &ConversationEntry) {
        let who = match entry.role {
            Role::User => "you",
            Role::Assistant => "assistant",
        };
        if entry.is_error {
            println!("{who}! {}", entry.content);
        } else {
            println!("{who}> {}", entry.content);
        }
        for update in entry.applied_updates.iter().flatten() {
            println!("    {} = {}", update.cell, update.value);
        }
        if let Some(suggestions) = &entry.suggestions {
            for (i, s) in suggestions.iter().enumerate() {
                println!("  /s {}: {s}", i + 1);
            }
            self.suggestions = suggestions.clone();
        }
    }
}

fn read_attachment(path: &Path) -> Result<Intent> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok(Intent::file(name, &bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_a_message() {
        assert_eq!(parse_input("  sum B  "), Input::Message("sum B".into()));
        assert_eq!(parse_input("   "), Input::Empty);
    }

    #[test]
    fn test_slash_commands() {
        assert_eq!(parse_input("/s 2"), Input::Suggestion(2));
        assert_eq!(parse_input("/s 0"), Input::Help);
        assert_eq!(parse_input("/file data.csv"), Input::File("data.csv".into()));
        assert_eq!(parse_input("/file"), Input::Help);
        assert_eq!(parse_input("/sync"), Input::Sync);
        assert_eq!(parse_input("/retry"), Input::Retry);
        assert_eq!(parse_input("/history"), Input::History);
        assert_eq!(parse_input("/quit"), Input::Quit);
        assert_eq!(parse_input("/bogus"), Input::Help);
    }
}
