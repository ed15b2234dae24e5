use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use flow_session::{HttpWorkflowStore, JsonlConversationHistory};
use flow_stream::{StreamCancellationToken, StreamClient, StreamClientConfig};
use tokio::task::JoinHandle;
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

use crate::Cli;

pub fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

pub fn stream_client_config(cli: &Cli) -> StreamClientConfig {
    let mut config = StreamClientConfig::new(cli.api_base.clone());
    config.api_key = cli.api_key.clone();
    config.connect_timeout_ms = cli.connect_timeout_ms;
    config.chat_path = cli.chat_path.clone();
    config.execution_path = cli.execution_path.clone();
    config
}

pub fn build_stream_client(cli: &Cli) -> Result<StreamClient> {
    StreamClient::new(stream_client_config(cli)).context("failed to build stream client")
}

pub fn build_history(cli: &Cli) -> Arc<JsonlConversationHistory> {
    Arc::new(JsonlConversationHistory::new(cli.history_path.clone()))
}

pub fn build_workflow_store(cli: &Cli) -> Result<Arc<HttpWorkflowStore>> {
    Ok(Arc::new(HttpWorkflowStore::new(
        cli.api_base.clone(),
        cli.api_key.as_deref(),
    )?))
}

/// Token cancelled by Ctrl-C and, when configured, by the stream timeout.
pub fn stream_cancellation(cli: &Cli) -> (StreamCancellationToken, Vec<JoinHandle<()>>) {
    let token = StreamCancellationToken::new();
    let mut tasks = Vec::new();
    if let Some(timeout_ms) = cli.stream_timeout_ms {
        tasks.push(token.cancel_after(Duration::from_millis(timeout_ms)));
    }
    let interrupt = token.clone();
    tasks.push(tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::debug!("interrupt received; cancelling stream");
            interrupt.cancel();
        }
    }));
    (token, tasks)
}
