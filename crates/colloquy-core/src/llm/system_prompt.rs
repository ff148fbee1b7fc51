//! Ensures a prompt starts with exactly one system message.

use colloquy_types::llm::{Message, MessageRole};

/// Prepend a system message built from `default_prompt` unless the first
/// message already has the system role.
///
/// Idempotent: normalizing an already-normalized list returns it unchanged.
pub fn normalize(mut messages: Vec<Message>, default_prompt: &str) -> Vec<Message> {
    if matches!(messages.first(), Some(m) if m.role == MessageRole::System) {
        return messages;
    }
    messages.insert(0, Message::system(default_prompt));
    messages
}

/// The system prompt for a conversation: its override when set and
/// non-blank, else the configured default.
pub fn resolve<'a>(conversation_override: Option<&'a str>, default_prompt: &'a str) -> &'a str {
    match conversation_override {
        Some(prompt) if !prompt.trim().is_empty() => prompt,
        _ => default_prompt,
    }
}
