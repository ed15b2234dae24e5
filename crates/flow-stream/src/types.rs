use std::sync::Arc;

use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Debug, Error)]
/// Enumerates supported `FlowStreamError` values.
pub enum FlowStreamError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("stream endpoint returned non-success status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("stream endpoint returned an empty response body")]
    MissingBody,
    #[error("stream endpoint returned unsupported content type '{0}'")]
    UnsupportedBody(String),
    #[error("stream transport failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("{protocol} stream ended before its terminal event")]
    StreamEnded { protocol: &'static str },
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid stream client configuration: {0}")]
    InvalidConfig(String),
}

impl FlowStreamError {
    /// True for failures of the underlying connection, as opposed to client misconfiguration.
    pub fn is_transport(&self) -> bool {
        !matches!(self, Self::InvalidConfig(_) | Self::Serde(_))
    }
}

/// What applying one event did to a reducer's visible state.
#[derive(Debug, Clone, PartialEq)]
pub enum Reduction<T> {
    /// Nothing observable changed; no snapshot is delivered.
    Ignored,
    /// Visible state changed; the caller receives a snapshot.
    Changed,
    /// The terminal event was processed and produced the stream's output.
    Terminated(T),
}

impl<T> Reduction<T> {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminated(_))
    }
}

/// Terminal result of one stream run.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamOutcome<T> {
    Completed(T),
    Cancelled,
}

impl<T> StreamOutcome<T> {
    pub fn completed(self) -> Option<T> {
        match self {
            Self::Completed(value) => Some(value),
            Self::Cancelled => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Trait contract for a line-framed, typed-event stream state machine.
///
/// Implementors own the in-flight state for exactly one stream. `apply` must
/// ignore every event once it has returned [`Reduction::Terminated`].
pub trait StreamReducer {
    /// Closed set of events this protocol decodes from `data:` lines.
    type Event: DeserializeOwned;
    /// Value handed to the caller when the terminal event arrives.
    type Output;

    /// Short protocol label used in logs and errors.
    const PROTOCOL: &'static str;

    fn apply(&mut self, event: Self::Event) -> Reduction<Self::Output>;

    fn is_terminated(&self) -> bool;
}

/// Receives a borrowed view of the reducer state after every visible change.
pub type SnapshotHandler<S> = Arc<dyn Fn(&S) + Send + Sync>;
