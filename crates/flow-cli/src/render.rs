//! Text rendering for snapshots, history and execution records.
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use flow_session::{ConversationSummary, ExecutionDetail};
use flow_stream::{
    ChatMessage, ChatRole, ChatSessionState, ExecutionProgressState, NodeStatus, OverallStatus,
    ProgressSummary, Step, StepKind, StepStatus,
};

pub fn format_timestamp_ms(timestamp_unix_ms: u64) -> String {
    i64::try_from(timestamp_unix_ms)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|time| time.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| timestamp_unix_ms.to_string())
}

fn step_marker(step: &Step) -> &'static str {
    match (step.kind, step.status) {
        (StepKind::Escalation, _) => "?",
        (_, StepStatus::Running) => "…",
        (_, StepStatus::Done) => "✓",
        (_, StepStatus::Error) => "✗",
    }
}

fn node_marker(status: NodeStatus) -> &'static str {
    match status {
        NodeStatus::Pending => "·",
        NodeStatus::Running => "…",
        NodeStatus::Completed => "✓",
        NodeStatus::Failed => "✗",
    }
}

fn overall_label(status: OverallStatus) -> &'static str {
    match status {
        OverallStatus::Running => "running",
        OverallStatus::Completed => "completed",
        OverallStatus::Failed => "failed",
    }
}

pub fn render_step(step: &Step) -> Vec<String> {
    let mut lines = vec![format!("[{}] {}", step_marker(step), step.label)];
    if let Some(detail) = step.detail.as_deref().filter(|detail| !detail.is_empty()) {
        lines.push(format!("    {detail}"));
    }
    if let Some(draft) = &step.draft {
        let capabilities = draft
            .items
            .iter()
            .map(|item| {
                let name = item.label.as_deref().unwrap_or(&item.capability);
                if item.connected {
                    name.to_string()
                } else {
                    format!("{name} (not connected)")
                }
            })
            .collect::<Vec<_>>();
        let mut line = format!("    workflow: {}", draft.name);
        if !capabilities.is_empty() {
            line.push_str(&format!(" [{}]", capabilities.join(", ")));
        }
        lines.push(line);
        if !draft.missing_capabilities.is_empty() {
            lines.push(format!(
                "    missing connections: {}",
                draft.missing_capabilities.join(", ")
            ));
        }
    }
    lines
}

#[derive(Debug, Default)]
/// Turns successive chat snapshots into the lines that changed since the last one.
pub struct ChatTranscript {
    thinking: Option<String>,
    steps: Vec<Step>,
}

impl ChatTranscript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, state: &ChatSessionState) -> Vec<String> {
        let mut lines = Vec::new();
        if let Some(thinking) = state.thinking_text() {
            if self.thinking.as_deref() != Some(thinking) {
                lines.push(format!("… {thinking}"));
                self.thinking = Some(thinking.to_string());
            }
        }
        // Steps keep their first-seen position, so position identifies a step.
        for (position, step) in state.steps().iter().enumerate() {
            if self.steps.get(position) != Some(step) {
                lines.extend(render_step(step));
            }
        }
        if !state.steps().is_empty() {
            self.steps = state.steps().to_vec();
        }
        lines
    }
}

#[derive(Debug, Default)]
pub struct ProgressTranscript {
    execution_id: Option<String>,
    nodes: BTreeMap<String, NodeStatus>,
}

impl ProgressTranscript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, state: &ExecutionProgressState) -> Vec<String> {
        let mut lines = Vec::new();
        if let Some(execution_id) = state.execution_id() {
            if self.execution_id.as_deref() != Some(execution_id) {
                lines.push(format!("execution {execution_id} started"));
                self.execution_id = Some(execution_id.to_string());
            }
        }
        for (node_id, status) in state.node_statuses() {
            if self.nodes.get(node_id) == Some(status) {
                continue;
            }
            self.nodes.insert(node_id.clone(), *status);
            if *status == NodeStatus::Pending {
                continue;
            }
            // One event changes one node, and it is the current step.
            let label = state.current_step_label().unwrap_or(node_id);
            lines.push(format!(
                "[{}] {label} ({} completed)",
                node_marker(*status),
                state.completed_count()
            ));
        }
        lines
    }
}

pub fn render_progress_summary(summary: &ProgressSummary) -> String {
    format!(
        "execution {} {}: {} of {} steps completed",
        summary.execution_id.as_deref().unwrap_or("(unknown)"),
        overall_label(summary.overall_status),
        summary.completed_count,
        summary.node_statuses.len().max(summary.completed_count as usize)
    )
}

pub fn render_conversation_list(summaries: &[ConversationSummary]) -> Vec<String> {
    if summaries.is_empty() {
        return vec!["no conversations".to_string()];
    }
    summaries
        .iter()
        .map(|summary| {
            format!(
                "{}  {}  {:>3} msgs  {}",
                summary.conversation_id,
                format_timestamp_ms(summary.updated_unix_ms),
                summary.message_count,
                summary.title
            )
        })
        .collect()
}

pub fn render_message(message: &ChatMessage) -> Vec<String> {
    let role = match message.role {
        ChatRole::User => "you",
        ChatRole::Assistant => "agent",
    };
    let mut lines = vec![format!(
        "[{}] {role}: {}",
        format_timestamp_ms(message.timestamp_unix_ms),
        message.content
    )];
    for step in message.steps.iter().flatten() {
        lines.extend(render_step(step).into_iter().map(|line| format!("  {line}")));
    }
    lines
}

pub fn render_execution_detail(execution: &ExecutionDetail) -> Vec<String> {
    let mut lines = vec![format!(
        "execution {} (workflow {}): {}",
        execution.id, execution.workflow_id, execution.status
    )];
    if let Some(started_at) = &execution.started_at {
        lines.push(format!("  started:  {started_at}"));
    }
    if let Some(finished_at) = &execution.finished_at {
        lines.push(format!("  finished: {finished_at}"));
    }
    for step in &execution.steps {
        let label = step.node_label.as_deref().unwrap_or(&step.node_id);
        lines.push(format!("  [{}] {label}", node_marker(step.status)));
        if let Some(error) = &step.error {
            lines.push(format!("      error: {error}"));
        }
    }
    lines
}
