//! Chat-turn runtime: runs one streamed turn and records it in history.
use std::sync::{Arc, Mutex};

use anyhow::Result;
use flow_stream::{
    ChatCompletion, ChatMessage, ChatSessionState, ChatStreamRequest, FlowStreamError,
    SnapshotHandler, StreamCancellationToken, StreamClient, StreamOutcome,
};

use crate::ConversationHistoryStore;

pub const FAILED_TURN_MESSAGE: &str =
    "Sorry, something went wrong while talking to the agent. Please try again.";

#[derive(Debug)]
/// How a chat turn ended, after history has been updated.
pub enum ChatTurnOutcome {
    Completed(ChatCompletion),
    /// The stream failed; `message` is the synthesized assistant reply.
    Failed {
        message: ChatMessage,
        conversation_id: Option<String>,
        error: FlowStreamError,
    },
    Cancelled,
}

impl ChatTurnOutcome {
    pub fn conversation_id(&self) -> Option<&str> {
        match self {
            Self::Completed(completion) => completion.conversation_id.as_deref(),
            Self::Failed {
                conversation_id, ..
            } => conversation_id.as_deref(),
            Self::Cancelled => None,
        }
    }
}

#[derive(Clone)]
/// Runs chat turns against the agent and keeps conversation history in step.
///
/// For a known conversation the user message is stored when the turn is
/// submitted. A new conversation has no id until the stream reports one, so
/// its user message is stored together with the assistant reply, or with the
/// apology when the stream fails after reporting the id. Cancelled turns never
/// store an assistant message.
pub struct ChatTurnRunner {
    client: StreamClient,
    history: Arc<dyn ConversationHistoryStore>,
}

impl ChatTurnRunner {
    pub fn new(client: StreamClient, history: Arc<dyn ConversationHistoryStore>) -> Self {
        Self { client, history }
    }

    pub async fn run_turn(
        &self,
        message: &str,
        conversation_id: Option<&str>,
        on_snapshot: SnapshotHandler<ChatSessionState>,
        cancel: &StreamCancellationToken,
    ) -> Result<ChatTurnOutcome> {
        let user_message = ChatMessage::user(message);
        let mut pending_user_message = None;
        match conversation_id {
            Some(conversation_id) => {
                self.history
                    .append_message(conversation_id, user_message)
                    .await?;
            }
            None => pending_user_message = Some(user_message),
        }

        let learned_id = Arc::new(Mutex::new(None::<String>));
        let on_snapshot = if conversation_id.is_some() {
            on_snapshot
        } else {
            record_conversation_id(on_snapshot, learned_id.clone())
        };

        let request = ChatStreamRequest {
            message: message.to_string(),
            conversation_id: conversation_id.map(str::to_string),
        };
        let result = self.client.run_chat(&request, on_snapshot, cancel).await;

        match result {
            Ok(StreamOutcome::Completed(mut completion)) => {
                if completion.conversation_id.is_none() {
                    completion.conversation_id = conversation_id.map(str::to_string);
                }
                match completion.conversation_id.as_deref() {
                    Some(resolved_id) => {
                        if let Some(user_message) = pending_user_message.take() {
                            self.history.append_message(resolved_id, user_message).await?;
                        }
                        self.history
                            .append_message(resolved_id, completion.message.clone())
                            .await?;
                    }
                    None => {
                        tracing::warn!("chat turn completed without a conversation id; not stored");
                    }
                }
                Ok(ChatTurnOutcome::Completed(completion))
            }
            Ok(StreamOutcome::Cancelled) => {
                tracing::debug!(
                    conversation_id = conversation_id.unwrap_or_default(),
                    "chat turn cancelled"
                );
                Ok(ChatTurnOutcome::Cancelled)
            }
            Err(error) => {
                tracing::warn!(
                    conversation_id = conversation_id.unwrap_or_default(),
                    error = %error,
                    "chat turn failed"
                );
                let message = ChatMessage::assistant(FAILED_TURN_MESSAGE, Vec::new());
                let resolved_id = conversation_id
                    .map(str::to_string)
                    .or_else(|| learned_id.lock().ok().and_then(|slot| slot.clone()));
                if let Some(resolved_id) = resolved_id.as_deref() {
                    if let Some(user_message) = pending_user_message.take() {
                        self.history.append_message(resolved_id, user_message).await?;
                    }
                    self.history
                        .append_message(resolved_id, message.clone())
                        .await?;
                }
                Ok(ChatTurnOutcome::Failed {
                    message,
                    conversation_id: resolved_id,
                    error,
                })
            }
        }
    }
}

fn record_conversation_id(
    inner: SnapshotHandler<ChatSessionState>,
    learned_id: Arc<Mutex<Option<String>>>,
) -> SnapshotHandler<ChatSessionState> {
    Arc::new(move |state: &ChatSessionState| {
        if let Some(conversation_id) = state.conversation_id() {
            if let Ok(mut slot) = learned_id.lock() {
                if slot.is_none() {
                    *slot = Some(conversation_id.to_string());
                }
            }
        }
        inner(state);
    })
}
