//! Streaming event protocol client for agent chat turns and workflow executions.
//!
//! Bytes from a long-lived HTTP response are framed into lines, decoded into a
//! closed set of typed events, and folded by a per-protocol reducer into the
//! live view a caller renders. The same pipeline serves the chat protocol and
//! the execution-progress protocol.
mod cancel;
mod chat;
mod client;
mod decode;
mod frame;
mod progress;
mod types;

pub use cancel::StreamCancellationToken;
pub use chat::{
    ChatCompletion, ChatEvent, ChatMessage, ChatPhase, ChatRole, ChatSessionState,
    ChatStreamRequest, DraftWorkflowItem, DraftWorkflowSummary, ReadModel, Step, StepEvent,
    StepKind, StepStatus,
};
pub use client::{
    drive_stream, StreamClient, StreamClientConfig, DEFAULT_CHAT_PATH,
    DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_EXECUTION_PATH,
};
pub use decode::{decode_event, decode_event_line, SkippedLine, EVENT_LINE_PREFIX};
pub use frame::FrameReader;
pub use progress::{
    ExecutionProgressState, ExecutionStreamRequest, NodeStatus, OverallStatus, ProgressEvent,
    ProgressSummary,
};
pub use types::{FlowStreamError, Reduction, SnapshotHandler, StreamOutcome, StreamReducer};
