//! Conversation history collaborator: durable chat messages per conversation.
use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use flow_stream::{ChatMessage, ChatRole};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

const TITLE_MAX_CHARS: usize = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Public struct `ConversationSummary` used by conversation lists and sidebars.
pub struct ConversationSummary {
    pub conversation_id: String,
    pub title: String,
    pub message_count: usize,
    pub updated_unix_ms: u64,
}

#[async_trait]
/// Trait contract for `ConversationHistoryStore` behavior.
///
/// Messages are append-only; the only removal is deleting a whole conversation.
pub trait ConversationHistoryStore: Send + Sync {
    async fn append_message(&self, conversation_id: &str, message: ChatMessage) -> Result<()>;

    async fn load_messages(&self, conversation_id: &str) -> Result<Vec<ChatMessage>>;

    /// Lists conversations, most recently updated first.
    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>>;

    /// Returns false when the conversation did not exist.
    async fn delete_conversation(&self, conversation_id: &str) -> Result<bool>;
}

/// Builds a summary from one conversation's messages in append order.
pub(crate) fn summarize_conversation(
    conversation_id: &str,
    messages: &[ChatMessage],
) -> Option<ConversationSummary> {
    let last = messages.last()?;
    let title_source = messages
        .iter()
        .find(|message| message.role == ChatRole::User)
        .unwrap_or(last);
    Some(ConversationSummary {
        conversation_id: conversation_id.to_string(),
        title: conversation_title(&title_source.content),
        message_count: messages.len(),
        updated_unix_ms: messages
            .iter()
            .map(|message| message.timestamp_unix_ms)
            .max()
            .unwrap_or(last.timestamp_unix_ms),
    })
}

fn conversation_title(content: &str) -> String {
    let first_line = content.lines().next().unwrap_or_default().trim();
    if first_line.chars().count() <= TITLE_MAX_CHARS {
        return first_line.to_string();
    }
    let mut title = first_line
        .chars()
        .take(TITLE_MAX_CHARS.saturating_sub(1))
        .collect::<String>();
    title.push('…');
    title
}

pub(crate) fn sort_summaries(summaries: &mut [ConversationSummary]) {
    summaries.sort_by(|left, right| {
        right
            .updated_unix_ms
            .cmp(&left.updated_unix_ms)
            .then_with(|| left.conversation_id.cmp(&right.conversation_id))
    });
}

#[derive(Debug, Default)]
/// Process-local history, for tests and short-lived sessions.
pub struct InMemoryConversationHistory {
    conversations: Mutex<BTreeMap<String, Vec<ChatMessage>>>,
}

impl InMemoryConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationHistoryStore for InMemoryConversationHistory {
    async fn append_message(&self, conversation_id: &str, message: ChatMessage) -> Result<()> {
        self.conversations
            .lock()
            .await
            .entry(conversation_id.to_string())
            .or_default()
            .push(message);
        Ok(())
    }

    async fn load_messages(&self, conversation_id: &str) -> Result<Vec<ChatMessage>> {
        Ok(self
            .conversations
            .lock()
            .await
            .get(conversation_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>> {
        let conversations = self.conversations.lock().await;
        let mut summaries = conversations
            .iter()
            .filter_map(|(conversation_id, messages)| {
                summarize_conversation(conversation_id, messages)
            })
            .collect::<Vec<_>>();
        sort_summaries(&mut summaries);
        Ok(summaries)
    }

    async fn delete_conversation(&self, conversation_id: &str) -> Result<bool> {
        Ok(self
            .conversations
            .lock()
            .await
            .remove(conversation_id)
            .is_some())
    }
}
