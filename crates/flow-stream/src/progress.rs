//! Execution-progress protocol: per-node status while a workflow runs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Reduction, StreamReducer};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `NodeStatus` values.
pub enum NodeStatus {
    #[default]
    Pending,
    Running,
    #[serde(alias = "success")]
    Completed,
    #[serde(alias = "error", alias = "failure")]
    Failed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `OverallStatus` values.
pub enum OverallStatus {
    #[default]
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
/// Enumerates supported `ProgressEvent` values.
pub enum ProgressEvent {
    Start {
        execution_id: String,
    },
    Step {
        node_id: String,
        #[serde(default)]
        node_label: Option<String>,
        status: NodeStatus,
        #[serde(default)]
        completed: u64,
    },
    Complete {
        status: String,
        #[serde(default)]
        execution_id: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// Payload posted to the execution endpoint to start and follow a run.
pub struct ExecutionStreamRequest {
    pub workflow_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// Finished execution as handed to the caller after `complete`.
pub struct ProgressSummary {
    pub execution_id: Option<String>,
    pub overall_status: OverallStatus,
    pub completed_count: u64,
    pub node_statuses: BTreeMap<String, NodeStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
/// Live view of a workflow run, folded from execution events.
pub struct ExecutionProgressState {
    execution_id: Option<String>,
    completed_count: u64,
    current_step_label: Option<String>,
    node_statuses: BTreeMap<String, NodeStatus>,
    overall_status: OverallStatus,
    terminated: bool,
}

impl ExecutionProgressState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts with every known node marked pending, e.g. from a workflow definition.
    pub fn with_nodes<I, S>(node_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            node_statuses: node_ids
                .into_iter()
                .map(|node_id| (node_id.into(), NodeStatus::Pending))
                .collect(),
            ..Self::default()
        }
    }

    pub fn execution_id(&self) -> Option<&str> {
        self.execution_id.as_deref()
    }

    pub fn completed_count(&self) -> u64 {
        self.completed_count
    }

    pub fn current_step_label(&self) -> Option<&str> {
        self.current_step_label.as_deref()
    }

    pub fn node_status(&self, node_id: &str) -> Option<NodeStatus> {
        self.node_statuses.get(node_id).copied()
    }

    pub fn node_statuses(&self) -> &BTreeMap<String, NodeStatus> {
        &self.node_statuses
    }

    pub fn overall_status(&self) -> OverallStatus {
        self.overall_status
    }

    fn summary(&self) -> ProgressSummary {
        ProgressSummary {
            execution_id: self.execution_id.clone(),
            overall_status: self.overall_status,
            completed_count: self.completed_count,
            node_statuses: self.node_statuses.clone(),
        }
    }
}

impl StreamReducer for ExecutionProgressState {
    type Event = ProgressEvent;
    type Output = ProgressSummary;

    const PROTOCOL: &'static str = "execution";

    fn apply(&mut self, event: ProgressEvent) -> Reduction<ProgressSummary> {
        if self.terminated {
            return Reduction::Ignored;
        }

        match event {
            ProgressEvent::Start { execution_id } => {
                if self.execution_id.as_deref() == Some(execution_id.as_str()) {
                    return Reduction::Ignored;
                }
                self.execution_id = Some(execution_id);
                Reduction::Changed
            }
            ProgressEvent::Step {
                node_id,
                node_label,
                status,
                completed,
            } => {
                self.completed_count = completed;
                self.current_step_label = node_label;
                self.node_statuses.insert(node_id, status);
                Reduction::Changed
            }
            ProgressEvent::Complete {
                status,
                execution_id,
            } => {
                self.overall_status = if status.eq_ignore_ascii_case("completed") {
                    OverallStatus::Completed
                } else {
                    OverallStatus::Failed
                };
                if self.execution_id.is_none() {
                    self.execution_id = execution_id;
                }
                self.terminated = true;
                Reduction::Terminated(self.summary())
            }
        }
    }

    fn is_terminated(&self) -> bool {
        self.terminated
    }
}
