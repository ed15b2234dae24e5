use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::{SystemTime, UNIX_EPOCH},
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use flow_session::{
    ChatTurnOutcome, ChatTurnRunner, ConversationHistoryStore, ExecutionDetail, ExecutionWatcher,
    JsonlConversationHistory, WorkflowDefinition, WorkflowNode, WorkflowStore,
};
use flow_stream::{
    ChatRole, ChatSessionState, ExecutionProgressState, ExecutionStreamRequest, NodeStatus,
    OverallStatus, SnapshotHandler, StepKind, StreamCancellationToken, StreamClient,
    StreamClientConfig,
};
use httpmock::prelude::*;
use serde_json::json;
use tokio::sync::Mutex as AsyncMutex;

static WORKSPACE_COUNTER: AtomicU64 = AtomicU64::new(1);

struct ScriptedWorkflowStore {
    workflows: Vec<WorkflowDefinition>,
    requests: AsyncMutex<Vec<String>>,
}

impl ScriptedWorkflowStore {
    fn new(workflows: Vec<WorkflowDefinition>) -> Self {
        Self {
            workflows,
            requests: AsyncMutex::new(Vec::new()),
        }
    }

    async fn requested_ids(&self) -> Vec<String> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl WorkflowStore for ScriptedWorkflowStore {
    async fn fetch_workflow(&self, workflow_id: &str) -> Result<WorkflowDefinition> {
        self.requests.lock().await.push(workflow_id.to_string());
        self.workflows
            .iter()
            .find(|workflow| workflow.id == workflow_id)
            .cloned()
            .ok_or_else(|| anyhow!("unknown workflow {workflow_id}"))
    }

    async fn fetch_execution(&self, execution_id: &str) -> Result<ExecutionDetail> {
        Err(anyhow!("execution {execution_id} is not scripted"))
    }
}

struct IsolatedWorkspace {
    root: PathBuf,
}

impl IsolatedWorkspace {
    fn new(label: &str) -> Self {
        let tick = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock should be after unix epoch")
            .as_nanos();
        let count = WORKSPACE_COUNTER.fetch_add(1, Ordering::Relaxed);
        let root = std::env::temp_dir().join(format!(
            "flowpilot-{label}-{}-{tick}-{count}",
            std::process::id()
        ));
        fs::create_dir_all(&root).expect("must create isolated workspace root");
        Self { root }
    }

    fn root(&self) -> &Path {
        &self.root
    }
}

impl Drop for IsolatedWorkspace {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.root);
    }
}

fn stream_client(server: &MockServer) -> StreamClient {
    StreamClient::new(StreamClientConfig::new(server.base_url())).expect("stream client")
}

fn workflow(id: &str, node_ids: &[&str]) -> WorkflowDefinition {
    WorkflowDefinition {
        id: id.to_string(),
        name: format!("workflow {id}"),
        description: None,
        nodes: node_ids
            .iter()
            .map(|node_id| WorkflowNode {
                id: node_id.to_string(),
                label: None,
                node_type: None,
            })
            .collect(),
    }
}

#[tokio::test]
async fn integration_two_turn_conversation_with_escalation_survives_reopen() {
    let workspace = IsolatedWorkspace::new("two-turn");
    let history_path = workspace.root().join(".flowpilot").join("history.jsonl");
    let server = MockServer::start();
    let first_turn = server.mock(|when, then| {
        when.method(POST)
            .path("/api/agent/chat")
            .json_body(json!({"message": "Post new leads to Slack"}));
        then.status(200)
            .header("content-type", "text/event-stream")
            .body(concat!(
                "data: {\"type\":\"conversation\",\"conversation_id\":\"c7\"}\n",
                "data: {\"type\":\"step\",\"index\":0,\"label\":\"Find lead source\",\"status\":\"done\"}\n",
                "data: {\"type\":\"agent_escalate\",\"question\":\"Which Slack channel?\"}\n",
                "data: {\"type\":\"step\",\"index\":1,\"label\":\"Draft workflow\",\"status\":\"running\"}\n",
                "data: {\"type\":\"message\",\"content\":\"Which channel should I post to?\"}\n",
                "data: {\"type\":\"done\"}\n",
            ));
    });
    let second_turn = server.mock(|when, then| {
        when.method(POST)
            .path("/api/agent/chat")
            .json_body(json!({"message": "#sales", "conversation_id": "c7"}));
        then.status(200)
            .header("content-type", "text/event-stream")
            .body(concat!(
                "data: {\"type\":\"message\",\"content\":\"Posting to #sales\"}\n",
                "data: {\"type\":\"done\",\"conversation_id\":\"c7\"}\n",
            ));
    });

    let runner = ChatTurnRunner::new(
        stream_client(&server),
        Arc::new(JsonlConversationHistory::new(&history_path)),
    );
    let ignore: SnapshotHandler<ChatSessionState> = Arc::new(|_: &ChatSessionState| {});

    let first = runner
        .run_turn(
            "Post new leads to Slack",
            None,
            ignore.clone(),
            &StreamCancellationToken::new(),
        )
        .await
        .expect("first turn");
    let conversation_id = first
        .conversation_id()
        .expect("conversation id learned")
        .to_string();
    let second = runner
        .run_turn(
            "#sales",
            Some(&conversation_id),
            ignore,
            &StreamCancellationToken::new(),
        )
        .await
        .expect("second turn");
    assert!(matches!(second, ChatTurnOutcome::Completed(_)));
    first_turn.assert();
    second_turn.assert();

    let reopened = JsonlConversationHistory::new(&history_path);
    let messages = reopened.load_messages("c7").await.expect("load");
    let roles = messages.iter().map(|message| message.role).collect::<Vec<_>>();
    assert_eq!(
        roles,
        vec![
            ChatRole::User,
            ChatRole::Assistant,
            ChatRole::User,
            ChatRole::Assistant
        ]
    );
    let steps = messages[1].steps.as_ref().expect("first reply steps");
    let kinds = steps.iter().map(|step| step.kind).collect::<Vec<_>>();
    assert_eq!(
        kinds,
        vec![StepKind::Agent, StepKind::Escalation, StepKind::Agent]
    );
    assert_eq!(steps[1].label, "Which Slack channel?");
    assert_eq!(messages[3].content, "Posting to #sales");

    let summaries = reopened.list_conversations().await.expect("list");
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].title, "Post new leads to Slack");
    assert_eq!(summaries[0].message_count, 4);
}

#[tokio::test]
async fn integration_watcher_uses_any_workflow_store_implementation() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/api/executions/stream");
        then.status(200)
            .header("content-type", "text/event-stream")
            .body(concat!(
                "data: {\"type\":\"start\",\"execution_id\":\"ex_9\"}\n",
                "data: {\"type\":\"step\",\"node_id\":\"fetch\",\"status\":\"running\",\"completed\":0}\n",
                "data: {\"type\":\"step\",\"node_id\":\"fetch\",\"status\":\"success\",\"completed\":1}\n",
                "data: {\"type\":\"step\",\"node_id\":\"notify\",\"status\":\"success\",\"completed\":2}\n",
                "data: {\"type\":\"complete\",\"status\":\"completed\"}\n",
            ));
    });

    let store = Arc::new(ScriptedWorkflowStore::new(vec![workflow(
        "wf_leads",
        &["fetch", "filter", "notify"],
    )]));
    let watcher = ExecutionWatcher::new(stream_client(&server), store.clone());
    let running_seen = Arc::new(Mutex::new(false));
    let sink = running_seen.clone();
    let handler: SnapshotHandler<ExecutionProgressState> =
        Arc::new(move |state: &ExecutionProgressState| {
            if state.node_status("fetch") == Some(NodeStatus::Running) {
                *sink.lock().expect("flag lock") = true;
            }
        });

    let summary = watcher
        .watch(
            &ExecutionStreamRequest {
                workflow_id: "wf_leads".to_string(),
                input: Some(json!({"since": "2024-01-01"})),
            },
            handler,
            &StreamCancellationToken::new(),
        )
        .await
        .expect("watch")
        .completed()
        .expect("summary");

    assert_eq!(store.requested_ids().await, vec!["wf_leads".to_string()]);
    assert!(*running_seen.lock().expect("flag lock"));
    assert_eq!(summary.execution_id.as_deref(), Some("ex_9"));
    assert_eq!(summary.overall_status, OverallStatus::Completed);
    assert_eq!(summary.node_statuses.get("filter"), Some(&NodeStatus::Pending));
    assert_eq!(summary.node_statuses.get("notify"), Some(&NodeStatus::Completed));
}
