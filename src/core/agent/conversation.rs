//! Conversation state management.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::types::{Message, Role, ToolCall};

/// Ordered log of conversation turns.
///
/// Messages are only appended. The system message at index 0 is the one
/// entry that gets replaced, once per loop iteration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    /// Create a new conversation.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all messages.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Check if the conversation has any messages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Get the system prompt.
    #[must_use]
    pub fn system(&self) -> Option<&str> {
        self.messages
            .first()
            .filter(|m| m.role == Role::System)
            .map(Message::text_content)
    }

    /// Set or replace the system message at index 0.
    pub fn set_system(&mut self, system: impl Into<String>) {
        let message = Message::system(system);
        match self.messages.first_mut() {
            Some(first) if first.role == Role::System => *first = message,
            _ => self.messages.insert(0, message),
        }
    }

    /// Add a user message.
    pub fn add_user_message(&mut self, text: impl Into<String>) {
        self.messages.push(Message::user(text));
    }

    /// Add an assistant message.
    pub fn add_assistant_message(&mut self, text: impl Into<String>) {
        self.messages.push(Message::assistant(text));
    }

    /// Add an assistant message carrying tool calls.
    pub fn add_assistant_calls(&mut self, text: impl Into<String>, calls: Vec<ToolCall>) {
        self.messages.push(Message::assistant_with_calls(text, calls));
    }

    /// Append already-built messages, such as tool results.
    pub fn extend(&mut self, messages: impl IntoIterator<Item = Message>) {
        self.messages.extend(messages);
    }

    /// Text of the most recent assistant message that had any.
    #[must_use]
    pub fn last_assistant_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .filter(|m| m.role == Role::Assistant)
            .filter_map(|m| m.content.as_deref())
            .find(|text| !text.is_empty())
    }

    /// Check that every tool message answers a call of the assistant message
    /// directly before its run of tool messages.
    #[must_use]
    pub fn tool_links_valid(&self) -> bool {
        let mut calls: Option<&[ToolCall]> = None;
        for message in &self.messages {
            match message.role {
                Role::Tool => {
                    let (Some(calls), Some(id)) = (calls, message.tool_call_id.as_deref()) else {
                        return false;
                    };
                    if calls.iter().filter(|c| c.id == id).count() != 1 {
                        return false;
                    }
                }
                Role::Assistant => calls = Some(&message.tool_calls),
                Role::System | Role::User => calls = None,
            }
        }
        true
    }

    /// Truncate history once it grows past `threshold` messages.
    ///
    /// Keeps the system message plus the newest `keep` messages, then drops
    /// tool messages left at the front without their assistant message.
    /// Returns the number of messages removed.
    pub fn compact(&mut self, threshold: usize, keep: usize) -> usize {
        if self.messages.len() <= threshold {
            return 0;
        }

        let before = self.messages.len();
        let has_system = self.messages.first().is_some_and(|m| m.role == Role::System);
        let head = usize::from(has_system);
        let tail_start = before.saturating_sub(keep).max(head);
        let orphans = self.messages[tail_start..]
            .iter()
            .take_while(|m| m.role == Role::Tool)
            .count();

        self.messages.drain(head..tail_start + orphans);
        let removed = before - self.messages.len();
        tracing::debug!(removed, remaining = self.messages.len(), "compacted history");
        removed
    }

    /// Clear all messages.
    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Save conversation to a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load conversation from a file.
    ///
    /// Returns a new empty conversation if the file doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        let conversation: Self = serde_json::from_str(&contents)?;
        Ok(conversation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(id: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: "readFile".to_string(),
            arguments_json: "{}".to_string(),
        }
    }

    #[test]
    fn conversation_tracks_messages() {
        let mut conv = Conversation::new();

        conv.add_user_message("Hello");
        conv.add_assistant_message("Hi there!");

        assert_eq!(conv.len(), 2);
        assert_eq!(conv.messages()[0].role, Role::User);
        assert_eq!(conv.messages()[1].role, Role::Assistant);
    }

    #[test]
    fn set_system_replaces_index_zero() {
        let mut conv = Conversation::new();
        conv.add_user_message("Hello");
        conv.set_system("first");
        conv.set_system("second");

        assert_eq!(conv.len(), 2);
        assert_eq!(conv.system(), Some("second"));
        assert_eq!(conv.messages()[1].role, Role::User);
    }

    #[test]
    fn last_assistant_text_skips_call_only_turns() {
        let mut conv = Conversation::new();
        conv.add_assistant_message("earlier");
        conv.add_assistant_calls("", vec![call("a")]);
        conv.extend([Message::tool_result("a", "{}")]);

        assert_eq!(conv.last_assistant_text(), Some("earlier"));
    }

    #[test]
    fn tool_links_detect_orphans() {
        let mut conv = Conversation::new();
        conv.set_system("s");
        conv.add_user_message("u");
        conv.add_assistant_calls("", vec![call("a"), call("b")]);
        conv.extend([Message::tool_result("a", "1"), Message::tool_result("b", "2")]);
        assert!(conv.tool_links_valid());

        conv.extend([Message::tool_result("zzz", "3")]);
        assert!(!conv.tool_links_valid());

        let mut orphan = Conversation::new();
        orphan.extend([Message::tool_result("a", "1")]);
        assert!(!orphan.tool_links_valid());
    }

    #[test]
    fn compact_below_threshold_is_noop() {
        let mut conv = Conversation::new();
        conv.set_system("s");
        for i in 0..10 {
            conv.add_user_message(format!("m{i}"));
        }
        assert_eq!(conv.compact(60, 40), 0);
        assert_eq!(conv.len(), 11);
    }

    #[test]
    fn compact_keeps_system_and_tail() {
        let mut conv = Conversation::new();
        conv.set_system("s");
        for i in 0..69 {
            conv.add_user_message(format!("m{i}"));
        }
        assert_eq!(conv.len(), 70);

        let removed = conv.compact(60, 40);

        assert_eq!(removed, 29);
        assert_eq!(conv.len(), 41);
        assert_eq!(conv.messages()[0].role, Role::System);
        assert_eq!(conv.messages()[1].text_content(), "m29");
        assert_eq!(conv.messages()[40].text_content(), "m68");
    }

    #[test]
    fn compact_drops_leading_orphan_tool_messages() {
        let mut conv = Conversation::new();
        conv.set_system("s");
        conv.add_user_message("u");
        conv.add_assistant_calls("", vec![call("a"), call("b")]);
        conv.extend([Message::tool_result("a", "1"), Message::tool_result("b", "2")]);
        conv.add_assistant_message("done");
        conv.add_user_message("next");

        // Tail of 3 starts at the second tool message.
        let removed = conv.compact(4, 3);

        assert_eq!(removed, 4);
        assert_eq!(conv.len(), 3);
        assert_eq!(conv.messages()[1].text_content(), "done");
        assert!(conv.tool_links_valid());
    }

    #[test]
    fn compact_without_system_message() {
        let mut conv = Conversation::new();
        for i in 0..5 {
            conv.add_user_message(format!("m{i}"));
        }
        conv.compact(3, 2);
        assert_eq!(conv.len(), 2);
        assert_eq!(conv.messages()[0].text_content(), "m3");
    }

    #[test]
    fn conversation_clears() {
        let mut conv = Conversation::new();
        conv.add_user_message("Hello");
        conv.clear();

        assert!(conv.is_empty());
    }

    #[test]
    fn save_and_load_preserve_calls() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("conversation.json");

        let mut conv = Conversation::new();
        conv.set_system("s");
        conv.add_assistant_calls("looking", vec![call("a")]);
        conv.extend([Message::tool_result("a", "{\"ok\":true}")]);
        conv.save(&path).unwrap();

        let loaded = Conversation::load(&path).unwrap();
        assert_eq!(loaded.messages(), conv.messages());
    }

    #[test]
    fn load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let conv = Conversation::load(&dir.path().join("none.json")).unwrap();
        assert!(conv.is_empty());
    }
}
