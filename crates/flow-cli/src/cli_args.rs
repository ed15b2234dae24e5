use std::path::PathBuf;

use clap::{Parser, Subcommand};
use flow_stream::{DEFAULT_CHAT_PATH, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_EXECUTION_PATH};

use crate::CliOutputFormat;

pub const DEFAULT_API_BASE: &str = "http://localhost:8000";
pub const DEFAULT_HISTORY_PATH: &str = ".flowpilot/history.jsonl";

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_json_value(value: &str) -> Result<serde_json::Value, String> {
    serde_json::from_str(value).map_err(|error| format!("invalid JSON: {error}"))
}

#[derive(Debug, Parser)]
#[command(
    name = "flowpilot",
    about = "Terminal client for the Flowpilot workflow agent",
    version
)]
/// Public struct `Cli` used across Flowpilot components.
pub struct Cli {
    #[arg(
        long = "api-base",
        env = "FLOW_API_BASE",
        default_value = DEFAULT_API_BASE,
        help = "Base URL of the Flowpilot backend API"
    )]
    pub api_base: String,

    #[arg(
        long = "api-key",
        env = "FLOW_API_KEY",
        hide_env_values = true,
        help = "Bearer token sent with every backend request"
    )]
    pub api_key: Option<String>,

    #[arg(
        long = "connect-timeout-ms",
        env = "FLOW_CONNECT_TIMEOUT_MS",
        default_value_t = DEFAULT_CONNECT_TIMEOUT_MS,
        value_parser = parse_positive_u64,
        help = "Connection setup timeout in milliseconds"
    )]
    pub connect_timeout_ms: u64,

    #[arg(
        long = "stream-timeout-ms",
        env = "FLOW_STREAM_TIMEOUT_MS",
        value_parser = parse_positive_u64,
        help = "Cancel a running stream after this many milliseconds (unset = no limit)"
    )]
    pub stream_timeout_ms: Option<u64>,

    #[arg(
        long = "history-path",
        env = "FLOW_HISTORY_PATH",
        default_value = DEFAULT_HISTORY_PATH,
        help = "JSONL file holding local conversation history"
    )]
    pub history_path: PathBuf,

    #[arg(
        long = "chat-path",
        env = "FLOW_CHAT_PATH",
        default_value = DEFAULT_CHAT_PATH,
        help = "Chat stream endpoint, relative to --api-base or absolute"
    )]
    pub chat_path: String,

    #[arg(
        long = "execution-path",
        env = "FLOW_EXECUTION_PATH",
        default_value = DEFAULT_EXECUTION_PATH,
        help = "Execution progress stream endpoint, relative to --api-base or absolute"
    )]
    pub execution_path: String,

    #[arg(
        long = "output-format",
        value_enum,
        default_value_t = CliOutputFormat::Text,
        global = true,
        help = "Render snapshots as text or as JSON lines"
    )]
    pub output_format: CliOutputFormat,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Send one message to the agent and stream its reply
    Chat {
        /// Continue an existing conversation
        #[arg(long = "conversation")]
        conversation_id: Option<String>,
        /// Message text; multiple words are joined with spaces
        #[arg(required = true, num_args = 1..)]
        message: Vec<String>,
    },
    /// Start a workflow run and follow its progress
    Watch {
        workflow_id: String,
        /// JSON input handed to the workflow trigger
        #[arg(long, value_parser = parse_json_value)]
        input: Option<serde_json::Value>,
    },
    /// Inspect or prune local conversation history
    History {
        #[command(subcommand)]
        command: HistoryCommand,
    },
    /// Inspect finished workflow runs
    Execution {
        #[command(subcommand)]
        command: ExecutionCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum HistoryCommand {
    /// List conversations, most recent first
    List,
    /// Print every message of one conversation
    Show { conversation_id: String },
    /// Remove one conversation
    Delete { conversation_id: String },
}

#[derive(Debug, Subcommand)]
pub enum ExecutionCommand {
    /// Fetch and print one execution record
    Show { execution_id: String },
}

impl CliCommand {
    pub fn chat_message(message: &[String]) -> String {
        message.join(" ")
    }
}
