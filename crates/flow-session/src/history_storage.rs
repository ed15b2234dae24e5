//! JSONL-file conversation history backend.
use std::{
    collections::BTreeMap,
    fs,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use flow_core::{append_line, write_text_atomic};
use flow_stream::ChatMessage;
use serde::{Deserialize, Serialize};

use crate::{
    history::{sort_summaries, summarize_conversation, ConversationSummary},
    history_locking::lock_history_file,
    ConversationHistoryStore,
};

pub const HISTORY_SCHEMA_VERSION: u32 = 1;
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_LOCK_STALE_AFTER: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "record_type", rename_all = "snake_case")]
enum HistoryRecord {
    Meta(HistoryMeta),
    Message(HistoryMessageRecord),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct HistoryMeta {
    schema_version: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct HistoryMessageRecord {
    conversation_id: String,
    message: ChatMessage,
}

#[derive(Debug, Clone)]
/// Conversation history persisted as one JSONL file shared by all conversations.
///
/// Appends are single-line writes; deletion rewrites the file atomically.
/// Every operation holds a sibling `.lock` file so concurrent processes do not
/// interleave a rewrite with an append.
pub struct JsonlConversationHistory {
    path: Arc<PathBuf>,
    lock_timeout: Duration,
    lock_stale_after: Duration,
}

impl JsonlConversationHistory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Arc::new(path.into()),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            lock_stale_after: DEFAULT_LOCK_STALE_AFTER,
        }
    }

    async fn with_locked_file<T, F>(&self, operation: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Path) -> Result<T> + Send + 'static,
    {
        let path = self.path.clone();
        let timeout = self.lock_timeout;
        let stale_after = self.lock_stale_after;
        tokio::task::spawn_blocking(move || {
            let _lock = lock_history_file(path.as_path(), timeout, stale_after)?;
            operation(path.as_path())
        })
        .await
        .context("history storage task failed")?
    }
}

#[async_trait]
impl ConversationHistoryStore for JsonlConversationHistory {
    async fn append_message(&self, conversation_id: &str, message: ChatMessage) -> Result<()> {
        let record = HistoryRecord::Message(HistoryMessageRecord {
            conversation_id: conversation_id.to_string(),
            message,
        });
        self.with_locked_file(move |path| append_history_record(path, &record))
            .await
    }

    async fn load_messages(&self, conversation_id: &str) -> Result<Vec<ChatMessage>> {
        let conversation_id = conversation_id.to_string();
        self.with_locked_file(move |path| {
            Ok(read_history_records(path)?
                .into_iter()
                .filter(|record| record.conversation_id == conversation_id)
                .map(|record| record.message)
                .collect())
        })
        .await
    }

    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>> {
        self.with_locked_file(|path| {
            let mut grouped = BTreeMap::<String, Vec<ChatMessage>>::new();
            for record in read_history_records(path)? {
                grouped
                    .entry(record.conversation_id)
                    .or_default()
                    .push(record.message);
            }
            let mut summaries = grouped
                .iter()
                .filter_map(|(conversation_id, messages)| {
                    summarize_conversation(conversation_id, messages)
                })
                .collect::<Vec<_>>();
            sort_summaries(&mut summaries);
            Ok(summaries)
        })
        .await
    }

    async fn delete_conversation(&self, conversation_id: &str) -> Result<bool> {
        let conversation_id = conversation_id.to_string();
        self.with_locked_file(move |path| {
            let records = read_history_records(path)?;
            let before = records.len();
            let kept = records
                .into_iter()
                .filter(|record| record.conversation_id != conversation_id)
                .collect::<Vec<_>>();
            if kept.len() == before {
                return Ok(false);
            }
            write_history_records_atomic(path, &kept)?;
            tracing::debug!(
                conversation_id = conversation_id.as_str(),
                removed = before - kept.len(),
                "deleted conversation from history"
            );
            Ok(true)
        })
        .await
    }
}

fn encode_record(record: &HistoryRecord) -> Result<String> {
    serde_json::to_string(record).context("failed to encode history record")
}

fn meta_record() -> HistoryRecord {
    HistoryRecord::Meta(HistoryMeta {
        schema_version: HISTORY_SCHEMA_VERSION,
    })
}

fn append_history_record(path: &Path, record: &HistoryRecord) -> Result<()> {
    let is_new = fs::metadata(path)
        .map(|metadata| metadata.len() == 0)
        .unwrap_or(true);
    if is_new {
        append_line(path, &encode_record(&meta_record())?)?;
    }
    append_line(path, &encode_record(record)?)
}

fn read_history_records(path: &Path) -> Result<Vec<HistoryMessageRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = fs::File::open(path)
        .with_context(|| format!("failed to open history file {}", path.display()))?;
    let reader = BufReader::new(file);

    let mut records = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line.with_context(|| {
            format!("failed to read line {} from {}", index + 1, path.display())
        })?;
        if line.trim().is_empty() {
            continue;
        }

        let record = serde_json::from_str::<HistoryRecord>(&line).with_context(|| {
            format!(
                "failed to parse history line {} in {}",
                index + 1,
                path.display()
            )
        })?;
        match record {
            HistoryRecord::Meta(meta) => {
                if meta.schema_version > HISTORY_SCHEMA_VERSION {
                    bail!(
                        "unsupported history schema version {} in {} (supported up to {})",
                        meta.schema_version,
                        path.display(),
                        HISTORY_SCHEMA_VERSION
                    );
                }
            }
            HistoryRecord::Message(message) => records.push(message),
        }
    }

    Ok(records)
}

fn write_history_records_atomic(path: &Path, records: &[HistoryMessageRecord]) -> Result<()> {
    let mut content = encode_record(&meta_record())?;
    content.push('\n');
    for record in records {
        content.push_str(&encode_record(&HistoryRecord::Message(record.clone()))?);
        content.push('\n');
    }
    write_text_atomic(path, &content)
}
