//! Command dispatch for the `flowpilot` binary.
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use flow_session::{
    ChatTurnOutcome, ChatTurnRunner, ConversationHistoryStore, ExecutionWatcher, WorkflowStore,
};
use flow_stream::{
    ChatSessionState, ExecutionProgressState, ExecutionStreamRequest, SnapshotHandler,
    StreamOutcome,
};
use serde::Serialize;
use serde_json::json;
use tokio::task::JoinHandle;

use crate::{
    bootstrap::{build_history, build_stream_client, build_workflow_store, stream_cancellation},
    render::{
        render_conversation_list, render_execution_detail, render_message,
        render_progress_summary, ChatTranscript, ProgressTranscript,
    },
    Cli, CliCommand, CliOutputFormat, ExecutionCommand, HistoryCommand,
};

fn print_lines(lines: impl IntoIterator<Item = String>) {
    for line in lines {
        println!("{line}");
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string(value) {
        Ok(encoded) => println!("{encoded}"),
        Err(error) => tracing::warn!(error = %error, "failed to encode output"),
    }
}

fn abort_all(tasks: Vec<JoinHandle<()>>) {
    for task in tasks {
        task.abort();
    }
}

fn chat_snapshot_printer(format: CliOutputFormat) -> SnapshotHandler<ChatSessionState> {
    let transcript = Mutex::new(ChatTranscript::new());
    Arc::new(move |state: &ChatSessionState| {
        if format.is_json() {
            print_json(state);
            return;
        }
        if let Ok(mut transcript) = transcript.lock() {
            print_lines(transcript.update(state));
        }
    })
}

fn progress_snapshot_printer(format: CliOutputFormat) -> SnapshotHandler<ExecutionProgressState> {
    let transcript = Mutex::new(ProgressTranscript::new());
    Arc::new(move |state: &ExecutionProgressState| {
        if format.is_json() {
            print_json(state);
            return;
        }
        if let Ok(mut transcript) = transcript.lock() {
            print_lines(transcript.update(state));
        }
    })
}

pub async fn run_cli(cli: Cli) -> Result<()> {
    match &cli.command {
        CliCommand::Chat {
            conversation_id,
            message,
        } => {
            let message = CliCommand::chat_message(message);
            run_chat(&cli, &message, conversation_id.as_deref()).await
        }
        CliCommand::Watch { workflow_id, input } => {
            let request = ExecutionStreamRequest {
                workflow_id: workflow_id.clone(),
                input: input.clone(),
            };
            run_watch(&cli, &request).await
        }
        CliCommand::History { command } => {
            let history = build_history(&cli);
            run_history(&*history, command, cli.output_format).await
        }
        CliCommand::Execution {
            command: ExecutionCommand::Show { execution_id },
        } => {
            let workflows = build_workflow_store(&cli)?;
            let execution = workflows.fetch_execution(execution_id).await?;
            if cli.output_format.is_json() {
                print_json(&execution);
            } else {
                print_lines(render_execution_detail(&execution));
            }
            Ok(())
        }
    }
}

async fn run_chat(cli: &Cli, message: &str, conversation_id: Option<&str>) -> Result<()> {
    let runner = ChatTurnRunner::new(build_stream_client(cli)?, build_history(cli));
    let (cancel, tasks) = stream_cancellation(cli);
    let outcome = runner
        .run_turn(
            message,
            conversation_id,
            chat_snapshot_printer(cli.output_format),
            &cancel,
        )
        .await;
    abort_all(tasks);

    match outcome? {
        ChatTurnOutcome::Completed(completion) => {
            if cli.output_format.is_json() {
                print_json(&json!({
                    "outcome": "completed",
                    "conversation_id": completion.conversation_id,
                    "message": completion.message,
                }));
            } else {
                println!("{}", completion.message.content);
                if let Some(conversation_id) = &completion.conversation_id {
                    eprintln!("conversation: {conversation_id}");
                }
            }
            Ok(())
        }
        ChatTurnOutcome::Failed { message, error, .. } => {
            if cli.output_format.is_json() {
                print_json(&json!({
                    "outcome": "failed",
                    "message": message,
                    "error": error.to_string(),
                }));
            } else {
                println!("{}", message.content);
            }
            bail!("chat turn failed: {error}")
        }
        ChatTurnOutcome::Cancelled => {
            if cli.output_format.is_json() {
                print_json(&json!({"outcome": "cancelled"}));
            } else {
                eprintln!("cancelled");
            }
            Ok(())
        }
    }
}

async fn run_watch(cli: &Cli, request: &ExecutionStreamRequest) -> Result<()> {
    let watcher = ExecutionWatcher::new(build_stream_client(cli)?, build_workflow_store(cli)?);
    let (cancel, tasks) = stream_cancellation(cli);
    let outcome = watcher
        .watch(request, progress_snapshot_printer(cli.output_format), &cancel)
        .await;
    abort_all(tasks);

    match outcome? {
        StreamOutcome::Completed(summary) => {
            if cli.output_format.is_json() {
                print_json(&summary);
            } else {
                println!("{}", render_progress_summary(&summary));
            }
            Ok(())
        }
        StreamOutcome::Cancelled => {
            eprintln!("cancelled");
            Ok(())
        }
    }
}

pub async fn run_history(
    history: &dyn ConversationHistoryStore,
    command: &HistoryCommand,
    format: CliOutputFormat,
) -> Result<()> {
    match command {
        HistoryCommand::List => {
            let summaries = history.list_conversations().await?;
            if format.is_json() {
                print_json(&summaries);
            } else {
                print_lines(render_conversation_list(&summaries));
            }
        }
        HistoryCommand::Show { conversation_id } => {
            let messages = history.load_messages(conversation_id).await?;
            if messages.is_empty() {
                bail!("conversation {conversation_id} not found");
            }
            if format.is_json() {
                print_json(&messages);
            } else {
                print_lines(messages.iter().flat_map(render_message));
            }
        }
        HistoryCommand::Delete { conversation_id } => {
            if !history.delete_conversation(conversation_id).await? {
                bail!("conversation {conversation_id} not found");
            }
            if format.is_json() {
                print_json(&json!({"deleted": conversation_id}));
            } else {
                println!("deleted {conversation_id}");
            }
        }
    }
    Ok(())
}
