//! Wire protocol between the spreadsheet client and the assistant backend.
//!
//! Every frame is a single JSON text message. Outbound frames are
//! [`Envelope`]s; inbound frames are classified into an [`Inbound`] reply.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::ProtocolError;

/// Shown when a reply cannot be understood at all.
pub const UNREADABLE_REPLY: &str =
    "Received a response I couldn't understand. Please try again.";

/// Shown when the backend flags an error without a message.
pub const GENERIC_ERROR: &str =
    "I encountered an error while processing your request. Please try again.";

/// A single spreadsheet cell value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    #[default]
    Empty,
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
}

impl CellValue {
    /// Blank cells are `null` or the empty string, like the host reports them.
    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.is_empty(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Empty => Ok(()),
            CellValue::Bool(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            CellValue::Number(n) => write!(f, "{n}"),
            CellValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(s.to_string())
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        CellValue::Text(s)
    }
}

impl From<bool> for CellValue {
    fn from(b: bool) -> Self {
        CellValue::Bool(b)
    }
}

impl From<i32> for CellValue {
    fn from(n: i32) -> Self {
        CellValue::Number(n.into())
    }
}

impl From<i64> for CellValue {
    fn from(n: i64) -> Self {
        CellValue::Number(n.into())
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        serde_json::Number::from_f64(n)
            .map(CellValue::Number)
            .unwrap_or(CellValue::Empty)
    }
}

/// One single-cell write instruction. Order within a batch is significant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Update {
    pub cell: String,
    pub value: CellValue,
}

impl Update {
    pub fn new(cell: impl Into<String>, value: impl Into<CellValue>) -> Self {
        Self {
            cell: cell.into(),
            value: value.into(),
        }
    }
}

/// Read-only capture of the active sheet's used range.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    pub values: Vec<Vec<CellValue>>,
    pub address: String,
}

impl DocumentSnapshot {
    /// True when there is no data: no rows, or nothing but blank cells.
    pub fn is_blank(&self) -> bool {
        self.values.iter().flatten().all(CellValue::is_blank)
    }

    pub fn row_count(&self) -> usize {
        self.values.len()
    }

    pub fn column_count(&self) -> usize {
        self.values.iter().map(Vec::len).max().unwrap_or(0)
    }
}

/// Envelope `type` discriminator for outbound frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    Message,
    Suggestion,
    File,
    ExcelSync,
}

/// Something the user asked the assistant to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// Free-form text typed by the user.
    Message(String),
    /// A canned suggestion the user picked.
    Suggestion(String),
    /// A text-decoded file selected by the user.
    File { name: String, contents: String },
}

impl Intent {
    /// Build a file intent, decoding the bytes as UTF-8 (invalid sequences are replaced).
    pub fn file(name: impl Into<String>, bytes: &[u8]) -> Self {
        Intent::File {
            name: name.into(),
            contents: String::from_utf8_lossy(bytes).into_owned(),
        }
    }

    pub fn kind(&self) -> IntentKind {
        match self {
            Intent::Message(_) => IntentKind::Message,
            Intent::Suggestion(_) => IntentKind::Suggestion,
            Intent::File { .. } => IntentKind::File,
        }
    }

    /// What goes into the envelope's `content`.
    pub fn payload(&self) -> &str {
        match self {
            Intent::Message(text) | Intent::Suggestion(text) => text,
            Intent::File { contents, .. } => contents,
        }
    }

    /// What the user sees in the transcript.
    pub fn transcript(&self) -> String {
        match self {
            Intent::Message(text) | Intent::Suggestion(text) => text.clone(),
            Intent::File { name, .. } => format!("Attached {name}"),
        }
    }
}

/// Outbound frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: IntentKind,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excel_context: Option<DocumentSnapshot>,
}

impl Envelope {
    pub fn for_intent(intent: &Intent, snapshot: Option<DocumentSnapshot>) -> Self {
        Self {
            kind: intent.kind(),
            content: intent.payload().to_string(),
            excel_context: snapshot,
        }
    }

    pub fn excel_sync(snapshot: DocumentSnapshot) -> Self {
        Self {
            kind: IntentKind::ExcelSync,
            content: String::new(),
            excel_context: Some(snapshot),
        }
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// A classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    AssistantReply {
        content: String,
        suggestions: Option<Vec<String>>,
    },
    ExcelUpdate {
        content: String,
        updates: Vec<Update>,
    },
    ErrorReply {
        message: String,
    },
}

#[derive(Deserialize)]
struct AssistantWire {
    content: String,
    #[serde(default)]
    suggestions: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct ExcelUpdateWire {
    #[serde(default)]
    content: String,
    updates: Vec<Update>,
}

/// Decode a raw frame. Never fails: anything unreadable becomes an error reply.
pub fn decode(raw: &str) -> Inbound {
    classify(raw).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "discarding unreadable reply");
        Inbound::ErrorReply {
            message: UNREADABLE_REPLY.to_string(),
        }
    })
}

/// Parse and classify a raw frame.
///
/// Priority: `type == "excel_update"`, then an explicit `error` field, then an
/// assistant reply.
pub fn classify(raw: &str) -> Result<Inbound, ProtocolError> {
    let value: Value = serde_json::from_str(raw)?;
    let Some(obj) = value.as_object() else {
        return Err(ProtocolError::Unrecognized(format!(
            "expected a JSON object, got {}",
            json_kind(&value)
        )));
    };

    if obj.get("type").and_then(Value::as_str) == Some("excel_update") {
        let wire: ExcelUpdateWire = serde_json::from_value(value)?;
        return Ok(Inbound::ExcelUpdate {
            content: wire.content,
            updates: wire.updates,
        });
    }

    if let Some(flag) = obj.get("error") {
        let explicit = match flag {
            Value::Bool(b) => *b,
            Value::String(_) => true,
            _ => false,
        };
        if explicit {
            let message = obj
                .get("message")
                .and_then(Value::as_str)
                .or_else(|| flag.as_str())
                .filter(|m| !m.is_empty())
                .unwrap_or(GENERIC_ERROR)
                .to_string();
            return Ok(Inbound::ErrorReply { message });
        }
    }

    let wire: AssistantWire = serde_json::from_value(value)?;
    let suggestions = wire.suggestions.filter(|s| !s.is_empty());
    Ok(Inbound::AssistantReply {
        content: wire.content,
        suggestions,
    })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
