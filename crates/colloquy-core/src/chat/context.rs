//! Token-bounded context window assembly.
//!
//! Turns newest-first persisted history plus one incoming utterance into the
//! chronological, system-prompt-normalized message list sent to the backend.

use std::sync::Arc;

use colloquy_types::chat::{ChatMessage, MessageRole};
use colloquy_types::config::ContextConfig;
use colloquy_types::error::RepositoryError;
use colloquy_types::llm::Message;

use crate::chat::repository::ChatRepository;
use crate::llm::system_prompt;
use crate::llm::tokenizer::TokenCounter;

/// Budget settings for one context window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextWindowConfig {
    /// Most-recent messages fetched before budgeting.
    pub history_limit: u32,
    pub max_context_tokens: usize,
    /// Headroom left for the model's reply.
    pub reserved_tokens: usize,
}

impl ContextWindowConfig {
    /// Tokens available for history plus the utterance.
    pub fn budget(&self) -> usize {
        self.max_context_tokens.saturating_sub(self.reserved_tokens)
    }
}

impl Default for ContextWindowConfig {
    fn default() -> Self {
        ContextConfig::default().into()
    }
}

impl From<ContextConfig> for ContextWindowConfig {
    fn from(config: ContextConfig) -> Self {
        Self {
            history_limit: config.history_limit,
            max_context_tokens: config.max_context_tokens,
            reserved_tokens: config.reserved_tokens,
        }
    }
}

/// An assembled prompt plus the accounting behind it.
#[derive(Debug, Clone)]
pub struct ContextWindow {
    /// System message first, then retained history, then the utterance.
    pub messages: Vec<Message>,
    pub incoming_tokens: usize,
    pub history_tokens: usize,
    /// History messages kept out of those fetched.
    pub retained: usize,
    pub fetched: usize,
    pub budget: usize,
}

impl ContextWindow {
    /// Tokens charged against the budget (system message excluded).
    pub fn total_tokens(&self) -> usize {
        self.incoming_tokens + self.history_tokens
    }
}

/// Number of newest-first history entries that fit, and their total cost.
///
/// The running total starts at `incoming`. The walk stops at the first
/// message that would push it above `budget`; later, cheaper messages are
/// never considered, so the kept messages stay a contiguous suffix of the
/// conversation.
pub fn fit_to_budget(costs_newest_first: &[usize], incoming: usize, budget: usize) -> (usize, usize) {
    let mut total = incoming;
    let mut retained = 0;
    for cost in costs_newest_first {
        if total.saturating_add(*cost) > budget {
            break;
        }
        total += cost;
        retained += 1;
    }
    (retained, total - incoming)
}

/// Builds context windows from a repository and a shared token counter.
pub struct ContextWindowAssembler {
    counter: Arc<TokenCounter>,
    config: ContextWindowConfig,
}

impl ContextWindowAssembler {
    pub fn new(counter: Arc<TokenCounter>, config: ContextWindowConfig) -> Self {
        Self { counter, config }
    }

    pub fn config(&self) -> &ContextWindowConfig {
        &self.config
    }

    /// Fetch recent history for `conversation_id` and assemble the window
    /// for `utterance`.
    pub async fn build<C: ChatRepository>(
        &self,
        repo: &C,
        conversation_id: &str,
        utterance: &str,
        system_prompt: &str,
    ) -> Result<ContextWindow, RepositoryError> {
        let history = repo
            .list_recent(conversation_id, self.config.history_limit)
            .await?;
        Ok(self.assemble(&history, utterance, system_prompt))
    }

    /// Assemble a window from already-fetched newest-first history.
    ///
    /// Stored system-role messages are not replayed; the window's only
    /// system message is the normalized one at position 0.
    pub fn assemble(
        &self,
        history_newest_first: &[ChatMessage],
        utterance: &str,
        system_prompt: &str,
    ) -> ContextWindow {
        let history: Vec<&ChatMessage> = history_newest_first
            .iter()
            .filter(|m| m.role != MessageRole::System)
            .collect();
        let costs: Vec<usize> = history
            .iter()
            .map(|m| self.counter.count(&m.content))
            .collect();

        let budget = self.config.budget();
        let incoming_tokens = self.counter.count(utterance);
        let (retained, history_tokens) = fit_to_budget(&costs, incoming_tokens, budget);

        let mut messages: Vec<Message> = history[..retained]
            .iter()
            .rev()
            .map(|m| Message {
                role: m.role,
                content: m.content.clone(),
            })
            .collect();
        messages.push(Message::user(utterance));

        ContextWindow {
            messages: system_prompt::normalize(messages, system_prompt),
            incoming_tokens,
            history_tokens,
            retained,
            fetched: history_newest_first.len(),
            budget,
        }
    }
}
