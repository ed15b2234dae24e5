//! Chat protocol: agent reasoning and workflow-draft steps streamed per turn.

use flow_core::current_unix_timestamp_ms;
use serde::{Deserialize, Deserializer, Serialize};

use crate::{Reduction, StreamReducer};

const ESCALATION_FALLBACK_LABEL: &str = "The agent needs your input to continue";

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `StepStatus` values.
pub enum StepStatus {
    Running,
    Done,
    Error,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
/// Who produced a step: the agent, or the client while folding an escalation.
pub enum StepKind {
    #[default]
    Agent,
    Escalation,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// One capability a drafted workflow needs, and whether the user has connected it.
pub struct DraftWorkflowItem {
    #[serde(alias = "service", alias = "app")]
    pub capability: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub connected: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
/// Workflow the agent is assembling, as attached to a step.
pub struct DraftWorkflowSummary {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default)]
    pub items: Vec<DraftWorkflowItem>,
    #[serde(default)]
    pub missing_capabilities: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// One unit of visible progress, keyed by `(kind, index)`.
///
/// Agent steps carry the producer-assigned index; escalation steps are numbered
/// by the client, so the two index spaces never collide.
pub struct Step {
    pub index: usize,
    pub label: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draft: Option<DraftWorkflowSummary>,
    #[serde(default)]
    pub kind: StepKind,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
/// Wire shape of a `step` event.
pub struct StepEvent {
    pub index: usize,
    pub label: String,
    pub status: StepStatus,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub workflow_name: Option<String>,
    #[serde(default)]
    pub workflow_id: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub workflow_steps: Vec<DraftWorkflowItem>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub missing_connections: Vec<String>,
}

impl Step {
    pub fn identity(&self) -> (StepKind, usize) {
        (self.kind, self.index)
    }
}

impl From<StepEvent> for Step {
    fn from(event: StepEvent) -> Self {
        let has_draft = event.workflow_name.is_some()
            || event.workflow_id.is_some()
            || !event.workflow_steps.is_empty()
            || !event.missing_connections.is_empty();
        let draft = has_draft.then(|| DraftWorkflowSummary {
            name: event.workflow_name.unwrap_or_default(),
            workflow_id: event.workflow_id,
            summary: event.summary,
            items: event.workflow_steps,
            missing_capabilities: event.missing_connections,
        });
        Self {
            index: event.index,
            label: event.label,
            status: event.status,
            detail: event.detail,
            draft,
            kind: StepKind::Agent,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
/// Enumerates supported `ChatEvent` values.
pub enum ChatEvent {
    Conversation {
        conversation_id: String,
    },
    Thinking {
        content: String,
    },
    AgentThinking {
        content: String,
    },
    Step(StepEvent),
    AgentMessage {
        content: String,
    },
    AgentEscalate {
        #[serde(default)]
        question: Option<String>,
        #[serde(default)]
        reason: Option<String>,
    },
    Message {
        content: String,
    },
    Done {
        #[serde(default)]
        conversation_id: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `ChatRole` values.
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// Durable conversation entry. Created once and never edited afterwards.
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    pub timestamp_unix_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<Vec<Step>>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
            timestamp_unix_ms: current_unix_timestamp_ms(),
            steps: None,
        }
    }

    pub fn assistant(content: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            timestamp_unix_ms: current_unix_timestamp_ms(),
            steps: (!steps.is_empty()).then_some(steps),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
/// Caller-owned read models that go stale when a turn completes.
pub enum ReadModel {
    ConversationList,
    SidebarSummaries,
}

#[derive(Debug, Clone, PartialEq)]
/// Result of a chat stream that reached `done`.
pub struct ChatCompletion {
    pub message: ChatMessage,
    pub conversation_id: Option<String>,
    pub refresh: Vec<ReadModel>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
/// Lifecycle of a chat turn; `Terminated` freezes the state.
pub enum ChatPhase {
    #[default]
    Idle,
    Streaming,
    Terminated,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// Payload posted to the agent chat endpoint.
pub struct ChatStreamRequest {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

/// In-flight chat turn: the live view folded from chat events.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChatSessionState {
    phase: ChatPhase,
    thinking_text: Option<String>,
    steps: Vec<Step>,
    final_text: String,
    conversation_id: Option<String>,
}

impl ChatSessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> ChatPhase {
        self.phase
    }

    pub fn thinking_text(&self) -> Option<&str> {
        self.thinking_text.as_deref()
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn final_text(&self) -> &str {
        &self.final_text
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    fn adopt_conversation_id(&mut self, conversation_id: String) -> bool {
        if self.conversation_id.is_some() || conversation_id.trim().is_empty() {
            return false;
        }
        self.conversation_id = Some(conversation_id);
        true
    }

    fn replace_thinking(&mut self, content: String) -> bool {
        if self.thinking_text.as_deref() == Some(content.as_str()) {
            return false;
        }
        self.thinking_text = Some(content);
        true
    }

    fn upsert_step(&mut self, step: Step) {
        let identity = step.identity();
        let existing = self
            .steps
            .iter()
            .position(|current| current.identity() == identity);
        match existing {
            Some(position) => self.steps[position] = step,
            None => self.steps.push(step),
        }
    }

    fn push_escalation(&mut self, question: Option<String>, reason: Option<String>) {
        let question = question.filter(|value| !value.trim().is_empty());
        let reason = reason.filter(|value| !value.trim().is_empty());
        let (label, detail) = match (question, reason) {
            (Some(question), reason) => (question, reason),
            (None, Some(reason)) => (reason, None),
            (None, None) => (ESCALATION_FALLBACK_LABEL.to_string(), None),
        };
        let index = self.steps.len();
        self.steps.push(Step {
            index,
            label,
            status: StepStatus::Error,
            detail,
            draft: None,
            kind: StepKind::Escalation,
        });
    }

    fn terminate(&mut self) -> ChatCompletion {
        self.phase = ChatPhase::Terminated;
        self.thinking_text = None;
        let steps = std::mem::take(&mut self.steps);
        ChatCompletion {
            message: ChatMessage::assistant(self.final_text.clone(), steps),
            conversation_id: self.conversation_id.clone(),
            refresh: vec![ReadModel::ConversationList, ReadModel::SidebarSummaries],
        }
    }
}

impl StreamReducer for ChatSessionState {
    type Event = ChatEvent;
    type Output = ChatCompletion;

    const PROTOCOL: &'static str = "chat";

    fn apply(&mut self, event: ChatEvent) -> Reduction<ChatCompletion> {
        match self.phase {
            ChatPhase::Terminated => return Reduction::Ignored,
            ChatPhase::Idle => self.phase = ChatPhase::Streaming,
            ChatPhase::Streaming => {}
        }

        match event {
            ChatEvent::Conversation { conversation_id } => {
                if self.adopt_conversation_id(conversation_id) {
                    Reduction::Changed
                } else {
                    Reduction::Ignored
                }
            }
            ChatEvent::Thinking { content }
            | ChatEvent::AgentThinking { content }
            | ChatEvent::AgentMessage { content } => {
                if self.replace_thinking(content) {
                    Reduction::Changed
                } else {
                    Reduction::Ignored
                }
            }
            ChatEvent::Step(step) => {
                self.thinking_text = None;
                self.upsert_step(step.into());
                Reduction::Changed
            }
            ChatEvent::AgentEscalate { question, reason } => {
                self.thinking_text = None;
                self.push_escalation(question, reason);
                Reduction::Changed
            }
            ChatEvent::Message { content } => {
                self.final_text = content;
                Reduction::Changed
            }
            ChatEvent::Done { conversation_id } => {
                if let Some(conversation_id) = conversation_id {
                    self.adopt_conversation_id(conversation_id);
                }
                Reduction::Terminated(self.terminate())
            }
        }
    }

    fn is_terminated(&self) -> bool {
        self.phase == ChatPhase::Terminated
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;

    fn step(index: usize, label: &str, status: StepStatus) -> ChatEvent {
        ChatEvent::Step(StepEvent {
            index,
            label: label.to_string(),
            status,
            detail: None,
            workflow_name: None,
            workflow_id: None,
            workflow_steps: Vec::new(),
            summary: None,
            missing_connections: Vec::new(),
        })
    }

    fn fold(events: Vec<ChatEvent>) -> (ChatSessionState, Option<ChatCompletion>) {
        let mut state = ChatSessionState::new();
        let mut completion = None;
        for event in events {
            if let Reduction::Terminated(output) = state.apply(event) {
                completion = Some(output);
            }
        }
        (state, completion)
    }

    #[test]
    fn functional_happy_path_produces_single_assistant_message() {
        let (state, completion) = fold(vec![
            ChatEvent::Conversation {
                conversation_id: "c1".to_string(),
            },
            step(0, "Parse request", StepStatus::Running),
            step(0, "Parse request", StepStatus::Done),
            ChatEvent::Message {
                content: "Done!".to_string(),
            },
            ChatEvent::Done {
                conversation_id: None,
            },
        ]);

        let completion = completion.expect("done produces completion");
        assert_eq!(completion.message.role, ChatRole::Assistant);
        assert_eq!(completion.message.content, "Done!");
        assert_eq!(completion.conversation_id.as_deref(), Some("c1"));
        let steps = completion.message.steps.expect("steps snapshot");
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].index, 0);
        assert_eq!(steps[0].status, StepStatus::Done);
        assert_eq!(
            completion.refresh,
            vec![ReadModel::ConversationList, ReadModel::SidebarSummaries]
        );

        assert_eq!(state.phase(), ChatPhase::Terminated);
        assert!(state.steps().is_empty());
        assert!(state.thinking_text().is_none());
        assert_eq!(state.conversation_id(), Some("c1"));
    }

    #[test]
    fn functional_escalation_appends_error_step_after_existing_steps() {
        let (_, completion) = fold(vec![
            step(0, "Look up CRM", StepStatus::Done),
            ChatEvent::AgentEscalate {
                question: Some("Which account?".to_string()),
                reason: None,
            },
            ChatEvent::Done {
                conversation_id: None,
            },
        ]);

        let steps = completion
            .expect("completion")
            .message
            .steps
            .expect("steps snapshot");
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[1].status, StepStatus::Error);
        assert!(steps[1].label.contains("Which account?"));
        assert_eq!(steps[1].index, 1);
        assert_eq!(steps[1].kind, StepKind::Escalation);
    }

    #[test]
    fn unit_escalation_label_falls_back_to_reason_then_default() {
        let mut state = ChatSessionState::new();
        state.apply(ChatEvent::AgentEscalate {
            question: None,
            reason: Some("Missing Slack credentials".to_string()),
        });
        state.apply(ChatEvent::AgentEscalate {
            question: Some("  ".to_string()),
            reason: None,
        });
        assert_eq!(state.steps()[0].label, "Missing Slack credentials");
        assert_eq!(state.steps()[1].label, ESCALATION_FALLBACK_LABEL);
        assert_eq!(state.steps()[1].index, 1);
    }

    #[test]
    fn regression_step_after_escalation_does_not_replace_escalation() {
        let mut state = ChatSessionState::new();
        state.apply(step(0, "Draft", StepStatus::Done));
        state.apply(ChatEvent::AgentEscalate {
            question: Some("Which channel?".to_string()),
            reason: None,
        });
        state.apply(step(1, "Post to channel", StepStatus::Running));
        state.apply(step(0, "Draft", StepStatus::Error));

        let labels = state
            .steps()
            .iter()
            .map(|step| step.label.as_str())
            .collect::<Vec<_>>();
        assert_eq!(labels, vec!["Draft", "Which channel?", "Post to channel"]);
        assert_eq!(state.steps()[0].status, StepStatus::Error);
        assert_eq!(state.steps()[1].kind, StepKind::Escalation);
    }

    #[test]
    fn regression_step_sharing_escalation_index_keeps_identities_unique() {
        let mut state = ChatSessionState::new();
        state.apply(step(0, "Find lead source", StepStatus::Done));
        state.apply(ChatEvent::AgentEscalate {
            question: Some("Which Slack channel?".to_string()),
            reason: None,
        });
        state.apply(step(1, "Draft workflow", StepStatus::Running));
        state.apply(step(1, "Draft workflow", StepStatus::Done));

        let identities = state
            .steps()
            .iter()
            .map(Step::identity)
            .collect::<Vec<_>>();
        assert_eq!(
            identities,
            vec![
                (StepKind::Agent, 0),
                (StepKind::Escalation, 1),
                (StepKind::Agent, 1)
            ]
        );
        assert_eq!(state.steps()[2].status, StepStatus::Done);
        assert_eq!(state.steps()[1].label, "Which Slack channel?");
    }

    #[test]
    fn unit_conversation_id_first_write_wins() {
        let mut state = ChatSessionState::new();
        assert_eq!(
            state.apply(ChatEvent::Conversation {
                conversation_id: "c1".to_string()
            }),
            Reduction::Changed
        );
        assert_eq!(
            state.apply(ChatEvent::Conversation {
                conversation_id: "c1".to_string()
            }),
            Reduction::Ignored
        );
        assert_eq!(
            state.apply(ChatEvent::Conversation {
                conversation_id: "c2".to_string()
            }),
            Reduction::Ignored
        );
        let Reduction::Terminated(completion) = state.apply(ChatEvent::Done {
            conversation_id: Some("c3".to_string()),
        }) else {
            panic!("done must terminate");
        };
        assert_eq!(completion.conversation_id.as_deref(), Some("c1"));
    }

    #[test]
    fn unit_done_can_carry_first_conversation_id() {
        let (_, completion) = fold(vec![ChatEvent::Done {
            conversation_id: Some("late".to_string()),
        }]);
        let completion = completion.expect("completion");
        assert_eq!(completion.conversation_id.as_deref(), Some("late"));
        assert!(completion.message.steps.is_none());
        assert_eq!(completion.message.content, "");
    }

    #[test]
    fn unit_thinking_synonyms_replace_text_and_step_clears_it() {
        let mut state = ChatSessionState::new();
        state.apply(ChatEvent::Thinking {
            content: "one".to_string(),
        });
        assert_eq!(state.thinking_text(), Some("one"));
        state.apply(ChatEvent::AgentThinking {
            content: "two".to_string(),
        });
        assert_eq!(state.thinking_text(), Some("two"));
        assert_eq!(
            state.apply(ChatEvent::AgentMessage {
                content: "two".to_string(),
            }),
            Reduction::Ignored
        );
        assert!(state.steps().is_empty());
        state.apply(step(4, "Build trigger", StepStatus::Running));
        assert!(state.thinking_text().is_none());
    }

    #[test]
    fn unit_message_last_value_wins() {
        let mut state = ChatSessionState::new();
        state.apply(ChatEvent::Message {
            content: "draft".to_string(),
        });
        state.apply(ChatEvent::Message {
            content: "final".to_string(),
        });
        assert_eq!(state.final_text(), "final");
    }

    #[test]
    fn unit_step_event_builds_draft_workflow_summary() {
        let event: ChatEvent = serde_json::from_value(json!({
            "type": "step",
            "index": 3,
            "label": "Assemble workflow",
            "status": "done",
            "detail": "2 of 3 apps connected",
            "workflow_name": "Lead follow-up",
            "workflow_id": "wf_9",
            "summary": "Emails new leads",
            "workflow_steps": [
                {"capability": "gmail", "label": "Send email", "connected": true},
                {"service": "hubspot", "connected": false},
                {"app": "slack", "connected": null}
            ],
            "missing_connections": ["hubspot", "slack"]
        }))
        .expect("step event");

        let mut state = ChatSessionState::new();
        state.apply(event);
        let draft = state.steps()[0].draft.as_ref().expect("draft summary");
        assert_eq!(draft.name, "Lead follow-up");
        assert_eq!(draft.workflow_id.as_deref(), Some("wf_9"));
        assert_eq!(draft.summary.as_deref(), Some("Emails new leads"));
        assert_eq!(draft.items.len(), 3);
        assert!(draft.items[0].connected);
        assert_eq!(draft.items[1].capability, "hubspot");
        assert!(!draft.items[2].connected);
        assert_eq!(draft.missing_capabilities, vec!["hubspot", "slack"]);
    }

    #[test]
    fn unit_step_with_null_collections_decodes_without_draft() {
        let event: ChatEvent = serde_json::from_value(json!({
            "type": "step",
            "index": 0,
            "label": "Think",
            "status": "running",
            "workflow_steps": null,
            "missing_connections": null
        }))
        .expect("step event");
        let mut state = ChatSessionState::new();
        state.apply(event);
        assert!(state.steps()[0].draft.is_none());
    }

    #[test]
    fn regression_events_after_done_are_ignored() {
        let mut state = ChatSessionState::new();
        state.apply(step(0, "Parse", StepStatus::Done));
        assert!(state
            .apply(ChatEvent::Done {
                conversation_id: None
            })
            .is_terminal());
        let frozen = state.clone();

        for event in [
            step(1, "Late", StepStatus::Running),
            ChatEvent::Thinking {
                content: "late".to_string(),
            },
            ChatEvent::Message {
                content: "late".to_string(),
            },
            ChatEvent::Conversation {
                conversation_id: "late".to_string(),
            },
            ChatEvent::Done {
                conversation_id: None,
            },
        ] {
            assert_eq!(state.apply(event), Reduction::Ignored);
        }
        assert_eq!(state, frozen);
    }

    #[test]
    fn unit_chat_message_serializes_without_empty_steps() {
        let message = ChatMessage::user("Build me a lead router");
        let value = serde_json::to_value(&message).expect("serialize");
        assert_eq!(value["role"], "user");
        assert!(value.get("steps").is_none());
    }

    fn arb_status() -> impl Strategy<Value = StepStatus> {
        prop_oneof![
            Just(StepStatus::Running),
            Just(StepStatus::Done),
            Just(StepStatus::Error),
        ]
    }

    proptest! {
        #[test]
        fn property_step_upsert_keeps_one_entry_per_index_in_first_seen_order(
            updates in proptest::collection::vec((0usize..6, "[a-z]{1,6}", arb_status()), 0..40)
        ) {
            let mut state = ChatSessionState::new();
            for (index, label, status) in &updates {
                state.apply(step(*index, label, *status));
            }

            let mut first_seen = Vec::new();
            for (index, _, _) in &updates {
                if !first_seen.contains(index) {
                    first_seen.push(*index);
                }
            }
            let observed = state.steps().iter().map(|step| step.index).collect::<Vec<_>>();
            prop_assert_eq!(&observed, &first_seen);

            for step in state.steps() {
                let (_, label, status) = updates
                    .iter()
                    .rev()
                    .find(|(index, _, _)| *index == step.index)
                    .expect("index was observed");
                prop_assert_eq!(&step.label, label);
                prop_assert_eq!(step.status, *status);
            }
        }

        #[test]
        fn property_escalation_stays_after_steps_present_when_it_arrived(
            before in proptest::collection::vec(0usize..5, 0..10),
            after in proptest::collection::vec(0usize..8, 0..10),
        ) {
            let mut state = ChatSessionState::new();
            for index in &before {
                state.apply(step(*index, "before", StepStatus::Done));
            }
            let present = state.steps().len();
            state.apply(ChatEvent::AgentEscalate {
                question: Some("Need approval".to_string()),
                reason: None,
            });
            for index in &after {
                state.apply(step(*index, "after", StepStatus::Running));
            }

            let mut identities = std::collections::HashSet::new();
            for step in state.steps() {
                prop_assert!(identities.insert(step.identity()));
            }

            let escalation = &state.steps()[present];
            prop_assert_eq!(escalation.kind, StepKind::Escalation);
            prop_assert_eq!(escalation.index, present);
            prop_assert_eq!(escalation.status, StepStatus::Error);
            prop_assert!(state.steps()[..present]
                .iter()
                .all(|step| step.kind == StepKind::Agent));
        }
    }
}
