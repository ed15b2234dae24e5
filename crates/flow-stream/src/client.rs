use std::sync::atomic::{AtomicU64, Ordering};

use flow_core::current_unix_timestamp_ms;
use futures_util::{Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde::Serialize;

use crate::{
    decode::decode_event, frame::FrameReader, ChatCompletion, ChatSessionState,
    ChatStreamRequest, ExecutionProgressState, ExecutionStreamRequest, FlowStreamError,
    ProgressSummary, Reduction, SnapshotHandler, StreamCancellationToken, StreamOutcome,
    StreamReducer,
};

pub const DEFAULT_CHAT_PATH: &str = "/api/agent/chat";
pub const DEFAULT_EXECUTION_PATH: &str = "/api/executions/stream";
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;
const REQUEST_ID_HEADER: &str = "x-flow-request-id";
const STREAM_CONTENT_TYPES: &[&str] = &[
    "text/event-stream",
    "text/plain",
    "application/x-ndjson",
    "application/octet-stream",
];

static REQUEST_COUNTER: AtomicU64 = AtomicU64::new(1);

fn new_request_id() -> String {
    let count = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("flow-{}-{count}", current_unix_timestamp_ms())
}

#[derive(Debug, Clone)]
/// Public struct `StreamClientConfig` used across Flowpilot components.
pub struct StreamClientConfig {
    pub api_base: String,
    pub api_key: Option<String>,
    /// Bounds connection setup only. Open streams have no idle timeout because
    /// the agent can pause for a long time while it reasons.
    pub connect_timeout_ms: u64,
    pub chat_path: String,
    pub execution_path: String,
}

impl StreamClientConfig {
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            api_key: None,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            chat_path: DEFAULT_CHAT_PATH.to_string(),
            execution_path: DEFAULT_EXECUTION_PATH.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
/// Stream orchestrator: one streaming POST per run, folded through a reducer.
pub struct StreamClient {
    client: reqwest::Client,
    config: StreamClientConfig,
}

impl StreamClient {
    pub fn new(config: StreamClientConfig) -> Result<Self, FlowStreamError> {
        if config.api_base.trim().is_empty() {
            return Err(FlowStreamError::InvalidConfig(
                "api base URL cannot be empty".to_string(),
            ));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        if let Some(api_key) = config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
        {
            let bearer = format!("Bearer {api_key}");
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&bearer).map_err(|e| {
                    FlowStreamError::InvalidConfig(format!("invalid API key header: {e}"))
                })?,
            );
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .connect_timeout(std::time::Duration::from_millis(
                config.connect_timeout_ms.max(1),
            ))
            .build()?;

        Ok(Self { client, config })
    }

    /// Resolves `endpoint` against the configured base unless it is already absolute.
    pub fn endpoint_url(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            return endpoint.to_string();
        }
        format!(
            "{}/{}",
            self.config.api_base.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }

    /// Opens one stream and folds it into `reducer` until a terminal outcome.
    ///
    /// `on_snapshot` sees the reducer after every event that changed visible
    /// state. Returns exactly once: the terminal output, `Cancelled`, or the
    /// transport failure that ended the stream first.
    pub async fn run<R, P>(
        &self,
        endpoint: &str,
        payload: &P,
        reducer: R,
        on_snapshot: SnapshotHandler<R>,
        cancel: &StreamCancellationToken,
    ) -> Result<StreamOutcome<R::Output>, FlowStreamError>
    where
        R: StreamReducer,
        P: Serialize + ?Sized,
    {
        let url = self.endpoint_url(endpoint);
        let request_id = new_request_id();
        tracing::debug!(
            protocol = R::PROTOCOL,
            endpoint = url.as_str(),
            request_id = request_id.as_str(),
            "opening stream"
        );

        let send = self
            .client
            .post(&url)
            .header(REQUEST_ID_HEADER, request_id.as_str())
            .json(payload)
            .send();
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(protocol = R::PROTOCOL, "stream cancelled before response");
                return Ok(StreamOutcome::Cancelled);
            }
            response = send => response?,
        };

        let response = ensure_stream_response(response).await.inspect_err(|error| {
            tracing::warn!(
                protocol = R::PROTOCOL,
                endpoint = url.as_str(),
                error = %error,
                "stream endpoint rejected request"
            );
        })?;
        drive_stream(response.bytes_stream(), reducer, on_snapshot, cancel).await
    }

    pub async fn run_chat(
        &self,
        request: &ChatStreamRequest,
        on_snapshot: SnapshotHandler<ChatSessionState>,
        cancel: &StreamCancellationToken,
    ) -> Result<StreamOutcome<ChatCompletion>, FlowStreamError> {
        self.run(
            &self.config.chat_path,
            request,
            ChatSessionState::new(),
            on_snapshot,
            cancel,
        )
        .await
    }

    pub async fn run_execution_progress(
        &self,
        request: &ExecutionStreamRequest,
        initial: ExecutionProgressState,
        on_snapshot: SnapshotHandler<ExecutionProgressState>,
        cancel: &StreamCancellationToken,
    ) -> Result<StreamOutcome<ProgressSummary>, FlowStreamError> {
        self.run(
            &self.config.execution_path,
            request,
            initial,
            on_snapshot,
            cancel,
        )
        .await
    }
}

async fn ensure_stream_response(
    response: reqwest::Response,
) -> Result<reqwest::Response, FlowStreamError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await?;
        return Err(FlowStreamError::HttpStatus {
            status: status.as_u16(),
            body,
        });
    }

    if response.content_length() == Some(0) {
        return Err(FlowStreamError::MissingBody);
    }

    if let Some(content_type) = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
    {
        let normalized = content_type.trim().to_ascii_lowercase();
        if !STREAM_CONTENT_TYPES
            .iter()
            .any(|supported| normalized.starts_with(supported))
        {
            return Err(FlowStreamError::UnsupportedBody(content_type.to_string()));
        }
    }

    Ok(response)
}

/// Drives any chunked byte stream through framing, decoding and `reducer`.
///
/// This is the transport-agnostic half of [`StreamClient::run`]; events are
/// applied strictly in arrival order and the stream is dropped on return.
pub async fn drive_stream<R, S, B, E>(
    stream: S,
    mut reducer: R,
    on_snapshot: SnapshotHandler<R>,
    cancel: &StreamCancellationToken,
) -> Result<StreamOutcome<R::Output>, FlowStreamError>
where
    R: StreamReducer,
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Into<FlowStreamError>,
{
    futures_util::pin_mut!(stream);
    let mut frames = FrameReader::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(cancelled::<R>()),
            next = stream.next() => next,
        };

        let chunk = match next {
            Some(Ok(chunk)) => chunk,
            Some(Err(error)) => {
                let error = error.into();
                tracing::warn!(protocol = R::PROTOCOL, error = %error, "stream transport failed");
                return Err(error);
            }
            None => {
                let dropped_bytes = frames.finish();
                if dropped_bytes > 0 {
                    tracing::debug!(
                        protocol = R::PROTOCOL,
                        dropped_bytes,
                        "discarding unterminated trailing line"
                    );
                }
                tracing::warn!(protocol = R::PROTOCOL, "stream closed before terminal event");
                return Err(FlowStreamError::StreamEnded {
                    protocol: R::PROTOCOL,
                });
            }
        };

        for line in frames.push(chunk.as_ref()) {
            if cancel.is_cancelled() {
                return Ok(cancelled::<R>());
            }
            let Some(event) = decode_event::<R::Event>(R::PROTOCOL, &line) else {
                continue;
            };
            match reducer.apply(event) {
                Reduction::Ignored => {}
                Reduction::Changed => on_snapshot(&reducer),
                Reduction::Terminated(output) => {
                    on_snapshot(&reducer);
                    tracing::debug!(protocol = R::PROTOCOL, "stream reached terminal event");
                    return Ok(StreamOutcome::Completed(output));
                }
            }
        }
    }
}

fn cancelled<R: StreamReducer>() -> StreamOutcome<R::Output> {
    tracing::debug!(protocol = R::PROTOCOL, "stream cancelled");
    StreamOutcome::Cancelled
}
