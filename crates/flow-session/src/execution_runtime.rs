//! Execution-watch runtime: starts a run and follows its progress stream.
use std::sync::Arc;

use flow_stream::{
    ExecutionProgressState, ExecutionStreamRequest, FlowStreamError, ProgressSummary,
    SnapshotHandler, StreamCancellationToken, StreamClient, StreamOutcome,
};

use crate::WorkflowStore;

#[derive(Clone)]
pub struct ExecutionWatcher {
    client: StreamClient,
    workflows: Arc<dyn WorkflowStore>,
}

impl ExecutionWatcher {
    pub fn new(client: StreamClient, workflows: Arc<dyn WorkflowStore>) -> Self {
        Self { client, workflows }
    }

    /// Progress state with every node of the workflow marked pending.
    ///
    /// A failed definition fetch only costs the pending placeholders, so it is
    /// logged and the run starts from an empty node map.
    pub async fn seed_state(&self, workflow_id: &str) -> ExecutionProgressState {
        match self.workflows.fetch_workflow(workflow_id).await {
            Ok(workflow) => ExecutionProgressState::with_nodes(workflow.node_ids()),
            Err(error) => {
                tracing::warn!(
                    workflow_id,
                    error = %error,
                    "failed to load workflow definition; progress starts without pending nodes"
                );
                ExecutionProgressState::new()
            }
        }
    }

    pub async fn watch(
        &self,
        request: &ExecutionStreamRequest,
        on_snapshot: SnapshotHandler<ExecutionProgressState>,
        cancel: &StreamCancellationToken,
    ) -> Result<StreamOutcome<ProgressSummary>, FlowStreamError> {
        let initial = self.seed_state(&request.workflow_id).await;
        self.client
            .run_execution_progress(request, initial, on_snapshot, cancel)
            .await
    }
}
