//! Caller-side collaborators for Flowpilot stream runs.
//!
//! Conversation history stores, the workflow/execution read-model store, and
//! the runtimes that drive a chat turn or an execution watch end to end.
mod chat_runtime;
mod execution_runtime;
mod history;
mod history_locking;
mod history_storage;
mod workflow_store;

pub use chat_runtime::{ChatTurnOutcome, ChatTurnRunner, FAILED_TURN_MESSAGE};
pub use execution_runtime::ExecutionWatcher;
pub use history::{ConversationHistoryStore, ConversationSummary, InMemoryConversationHistory};
pub use history_storage::{JsonlConversationHistory, HISTORY_SCHEMA_VERSION};
pub use workflow_store::{
    ExecutionDetail, ExecutionStepDetail, HttpWorkflowStore, WorkflowDefinition, WorkflowNode,
    WorkflowStore,
};
