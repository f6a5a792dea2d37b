//! Append-only conversation history and first-reply suggestion gating.

use serde::{Deserialize, Serialize};

use crate::protocol::{IntentKind, Update};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One rendered line of the conversation. Never mutated after it is recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationEntry {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_updates: Option<Vec<Update>>,
    #[serde(default)]
    pub is_error: bool,
}

impl ConversationEntry {
    fn new(role: Role, content: String) -> Self {
        Self {
            role,
            content,
            suggestions: None,
            applied_updates: None,
            is_error: false,
        }
    }
}

/// Point-in-time copy of the session's conversation, for rendering.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSnapshot {
    pub entries: Vec<ConversationEntry>,
    pub suggestions_already_shown: bool,
    pub awaiting_reply: bool,
}

/// Conversation history owned by a single session.
///
/// Entries are only ever appended, in the order intents are sent and replies
/// are received.
#[derive(Debug, Default)]
pub struct Conversation {
    entries: Vec<ConversationEntry>,
    suggestions_already_shown: bool,
    in_flight: Option<IntentKind>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[ConversationEntry] {
        &self.entries
    }

    pub fn suggestions_already_shown(&self) -> bool {
        self.suggestions_already_shown
    }

    /// True between a sent user intent and the next inbound reply.
    pub fn awaiting_reply(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn snapshot(&self) -> ConversationSnapshot {
        ConversationSnapshot {
            entries: self.entries.clone(),
            suggestions_already_shown: self.suggestions_already_shown,
            awaiting_reply: self.awaiting_reply(),
        }
    }

    pub fn record_user_intent(&mut self, kind: IntentKind, content: String) -> &ConversationEntry {
        self.in_flight = Some(kind);
        self.push(ConversationEntry::new(Role::User, content))
    }

    /// Append an assistant reply. Suggestions are attached only to the first
    /// assistant reply of the session; the gate closes once that entry is in
    /// the list, within the same call.
    pub fn record_assistant_reply(
        &mut self,
        content: String,
        suggestions: Option<Vec<String>>,
    ) -> &ConversationEntry {
        self.in_flight = None;
        let mut entry = ConversationEntry::new(Role::Assistant, content);
        let first_reply = !self.suggestions_already_shown;
        if first_reply {
            entry.suggestions = suggestions.filter(|s| !s.is_empty());
        }
        let index = self.entries.len();
        self.entries.push(entry);
        if first_reply {
            self.suggestions_already_shown = true;
        }
        &self.entries[index]
    }

    /// Append the result of a mutation batch: all updates on success, none on failure.
    pub fn record_mutation_result(
        &mut self,
        content: String,
        updates: Vec<Update>,
        success: bool,
    ) -> &ConversationEntry {
        self.in_flight = None;
        let mut entry = ConversationEntry::new(Role::Assistant, content);
        if success {
            entry.applied_updates = Some(updates);
        } else {
            entry.is_error = true;
        }
        self.push(entry)
    }

    pub fn record_error(&mut self, message: String) -> &ConversationEntry {
        self.in_flight = None;
        let mut entry = ConversationEntry::new(Role::Assistant, message);
        entry.is_error = true;
        self.push(entry)
    }

    fn push(&mut self, entry: ConversationEntry) -> &ConversationEntry {
        let index = self.entries.len();
        self.entries.push(entry);
        &self.entries[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn suggestions() -> Option<Vec<String>> {
        Some(vec!["Analyze this data".into(), "Show data summary".into()])
    }

    #[test]
    fn test_order_matches_send_and_receive() {
        let mut convo = Conversation::new();
        convo.record_user_intent(IntentKind::Message, "hi".into());
        convo.record_assistant_reply("hello".into(), None);

        let roles: Vec<_> = convo
            .entries()
            .iter()
            .map(|e| (e.role, e.content.as_str()))
            .collect();
        assert_eq!(roles, vec![(Role::User, "hi"), (Role::Assistant, "hello")]);
    }

    #[test]
    fn test_suggestions_only_on_first_reply() {
        let mut convo = Conversation::new();
        assert!(!convo.suggestions_already_shown());

        let first = convo.record_assistant_reply("one".into(), suggestions());
        assert_eq!(first.suggestions, suggestions());
        assert!(convo.suggestions_already_shown());

        for i in 0..5 {
            let later = convo.record_assistant_reply(format!("reply {i}"), suggestions());
            assert!(later.suggestions.is_none());
        }
        let with_suggestions = convo
            .entries()
            .iter()
            .filter(|e| e.suggestions.is_some())
            .count();
        assert_eq!(with_suggestions, 1);
    }

    #[test]
    fn test_back_to_back_replies_cannot_both_be_first() {
        let mut convo = Conversation::new();
        convo.record_assistant_reply("a".into(), suggestions());
        convo.record_assistant_reply("b".into(), suggestions());
        assert!(convo.entries()[0].suggestions.is_some());
        assert!(convo.entries()[1].suggestions.is_none());
    }

    #[test]
    fn test_first_reply_without_suggestions_closes_gate() {
        let mut convo = Conversation::new();
        convo.record_assistant_reply("plain".into(), None);
        assert!(convo.suggestions_already_shown());
        let next = convo.record_assistant_reply("later".into(), suggestions());
        assert!(next.suggestions.is_none());
    }

    #[test]
    fn test_errors_and_mutations_do_not_consume_gate() {
        let mut convo = Conversation::new();
        convo.record_error("boom".into());
        convo.record_mutation_result("done".into(), vec![Update::new("A1", 1)], true);
        assert!(!convo.suggestions_already_shown());
        let first = convo.record_assistant_reply("hello".into(), suggestions());
        assert!(first.suggestions.is_some());
    }

    #[test]
    fn test_mutation_success_lists_updates() {
        let mut convo = Conversation::new();
        let updates = vec![Update::new("A1", 5), Update::new("B1", "x")];
        let entry = convo.record_mutation_result("Updated".into(), updates.clone(), true);
        assert_eq!(entry.applied_updates.as_ref(), Some(&updates));
        assert!(!entry.is_error);
    }

    #[test]
    fn test_mutation_failure_has_no_updates() {
        let mut convo = Conversation::new();
        let updates = vec![Update::new("A1", 5), Update::new("B1", "x")];
        let entry = convo.record_mutation_result("failed".into(), updates, false);
        assert!(entry.is_error);
        assert!(entry.applied_updates.is_none());
    }

    #[test]
    fn test_in_flight_tracking() {
        let mut convo = Conversation::new();
        assert!(!convo.awaiting_reply());
        convo.record_user_intent(IntentKind::Suggestion, "Analyze".into());
        assert!(convo.awaiting_reply());
        convo.record_error("nope".into());
        assert!(!convo.awaiting_reply());
    }

    #[test]
    fn test_entry_json_uses_camel_case() {
        let mut convo = Conversation::new();
        convo.record_mutation_result("ok".into(), vec![], true);
        let json = serde_json::to_value(&convo.entries()[0]).unwrap();
        assert_eq!(json["role"], "assistant");
        assert_eq!(json["isError"], false);
        assert!(json["appliedUpdates"].is_array());
        assert!(json.get("suggestions").is_none());
    }
}
