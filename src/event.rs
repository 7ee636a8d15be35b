//! Runtime event model and typed relay payloads
//!
//! The agent runtime pushes [`SessionEvent`]s. Each relay carries one
//! [`RelayPayload`] type and projects the events it cares about out of the
//! raw stream, so subscribers of one kind never see another kind's data.

use crate::types::{now_millis, UsageSnapshot};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A single event pushed by the agent runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEvent {
    /// Unique event identifier (evt-<uuid>)
    pub id: String,

    /// Session that produced the event
    pub session_id: String,

    /// Unix timestamp in milliseconds
    pub timestamp: u64,

    /// Event kind and payload
    pub data: EventData,
}

impl SessionEvent {
    /// Create an event with auto-generated id and timestamp
    pub fn new(session_id: impl Into<String>, data: EventData) -> Self {
        Self {
            id: format!("evt-{}", uuid::Uuid::new_v4()),
            session_id: session_id.into(),
            timestamp: now_millis(),
            data,
        }
    }

    /// Relay kind this event is routed to
    pub fn kind(&self) -> EventKind {
        self.data.kind()
    }
}

/// Event kinds emitted by the runtime, tagged with their wire names
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum EventData {
    #[serde(rename = "session.start")]
    SessionStart(SessionStartData),
    #[serde(rename = "session.resume")]
    SessionResume(SessionStartData),
    #[serde(rename = "assistant.message")]
    AssistantMessage(AssistantMessageData),
    #[serde(rename = "assistant.message_delta")]
    AssistantMessageDelta(MessageDeltaData),
    #[serde(rename = "assistant.reasoning")]
    AssistantReasoning(ReasoningData),
    #[serde(rename = "assistant.usage")]
    AssistantUsage(AssistantUsageData),
    #[serde(rename = "tool.execution_start")]
    ToolExecutionStart(ToolStartData),
    #[serde(rename = "tool.execution_progress")]
    ToolExecutionProgress(ToolProgressData),
    #[serde(rename = "tool.execution_complete")]
    ToolExecutionComplete(ToolCompleteData),
    #[serde(rename = "tool.diff_available")]
    ToolDiffAvailable(DiffData),
    #[serde(rename = "session.usage_info")]
    SessionUsageInfo(UsageInfoData),
    #[serde(rename = "session.model_change")]
    SessionModelChange(ModelChangeData),
    #[serde(rename = "session.error")]
    SessionError(SessionErrorData),
    #[serde(rename = "pending_messages.modified")]
    PendingMessagesModified,
    #[serde(rename = "assistant.turn_start")]
    AssistantTurnStart(TurnData),
    #[serde(rename = "assistant.turn_end")]
    AssistantTurnEnd(TurnData),
    #[serde(rename = "abort")]
    Abort(AbortData),
    #[serde(rename = "session.idle")]
    SessionIdle,
}

impl EventData {
    /// Relay kind for this event
    pub fn kind(&self) -> EventKind {
        match self {
            Self::AssistantMessage(_) | Self::AssistantMessageDelta(_) => EventKind::OutputText,
            Self::AssistantReasoning(_) => EventKind::ReasoningText,
            Self::ToolExecutionStart(_) => EventKind::ToolStart,
            Self::ToolExecutionProgress(_) => EventKind::ToolUpdate,
            Self::ToolExecutionComplete(_) => EventKind::ToolComplete,
            Self::SessionUsageInfo(_) | Self::AssistantUsage(_) => EventKind::UsageInfo,
            Self::ToolDiffAvailable(_) => EventKind::DiffAvailable,
            Self::SessionError(_) => EventKind::Error,
            Self::SessionStart(_)
            | Self::SessionResume(_)
            | Self::SessionModelChange(_)
            | Self::PendingMessagesModified
            | Self::AssistantTurnStart(_)
            | Self::AssistantTurnEnd(_)
            | Self::Abort(_)
            | Self::SessionIdle => EventKind::Status,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStartData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantMessageData {
    pub message_id: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDeltaData {
    pub message_id: String,
    pub delta_content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasoningData {
    pub reasoning_id: String,
    pub content: String,
}

/// Per-request usage reported after each model call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantUsageData {
    pub model: String,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolStartData {
    pub tool_call_id: String,
    pub tool_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolProgressData {
    pub tool_call_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCompleteData {
    pub tool_call_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// File diff produced by a tool, possibly after the tool finished
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffData {
    pub tool_call_id: String,
    pub file_path: PathBuf,
    pub diff: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageInfoData {
    pub current_tokens: u64,
    pub token_limit: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_quota_percentage: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelChangeData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_model: Option<String>,
    pub new_model: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionErrorData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbortData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Relay channels, one per kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    OutputText,
    ReasoningText,
    ToolStart,
    ToolUpdate,
    ToolComplete,
    UsageInfo,
    Status,
    DiffAvailable,
    Error,
}

impl EventKind {
    /// Every relay kind
    pub const ALL: [EventKind; 9] = [
        EventKind::OutputText,
        EventKind::ReasoningText,
        EventKind::ToolStart,
        EventKind::ToolUpdate,
        EventKind::ToolComplete,
        EventKind::UsageInfo,
        EventKind::Status,
        EventKind::DiffAvailable,
        EventKind::Error,
    ];

    /// Stable snake_case identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OutputText => "output_text",
            Self::ReasoningText => "reasoning_text",
            Self::ToolStart => "tool_start",
            Self::ToolUpdate => "tool_update",
            Self::ToolComplete => "tool_complete",
            Self::UsageInfo => "usage_info",
            Self::Status => "status",
            Self::DiffAvailable => "diff_available",
            Self::Error => "error",
        }
    }
}

/// A relayed payload together with its origin
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope<T> {
    /// Session that produced the event
    pub session_id: String,

    /// Unix timestamp in milliseconds
    pub timestamp: u64,

    /// Typed payload
    pub payload: T,
}

/// Payload type carried by one relay
pub trait RelayPayload: Clone + Send + Sync + 'static {
    /// Relay kind
    const KIND: EventKind;

    /// Extract this payload from a raw event, if it belongs to this kind
    fn project(data: &EventData) -> Option<Self>;

    /// Wrap a projected payload with its origin
    fn envelope(event: &SessionEvent) -> Option<Envelope<Self>> {
        Self::project(&event.data).map(|payload| Envelope {
            session_id: event.session_id.clone(),
            timestamp: event.timestamp,
            payload,
        })
    }
}

/// Assistant output text
#[derive(Debug, Clone, PartialEq)]
pub enum OutputText {
    /// Streaming chunk
    Delta(MessageDeltaData),
    /// Final message content
    Message(AssistantMessageData),
}

impl RelayPayload for OutputText {
    const KIND: EventKind = EventKind::OutputText;

    fn project(data: &EventData) -> Option<Self> {
        match data {
            EventData::AssistantMessageDelta(d) => Some(Self::Delta(d.clone())),
            EventData::AssistantMessage(m) => Some(Self::Message(m.clone())),
            _ => None,
        }
    }
}

impl RelayPayload for ReasoningData {
    const KIND: EventKind = EventKind::ReasoningText;

    fn project(data: &EventData) -> Option<Self> {
        match data {
            EventData::AssistantReasoning(r) => Some(r.clone()),
            _ => None,
        }
    }
}

impl RelayPayload for ToolStartData {
    const KIND: EventKind = EventKind::ToolStart;

    fn project(data: &EventData) -> Option<Self> {
        match data {
            EventData::ToolExecutionStart(t) => Some(t.clone()),
            _ => None,
        }
    }
}

impl RelayPayload for ToolProgressData {
    const KIND: EventKind = EventKind::ToolUpdate;

    fn project(data: &EventData) -> Option<Self> {
        match data {
            EventData::ToolExecutionProgress(t) => Some(t.clone()),
            _ => None,
        }
    }
}

impl RelayPayload for ToolCompleteData {
    const KIND: EventKind = EventKind::ToolComplete;

    fn project(data: &EventData) -> Option<Self> {
        match data {
            EventData::ToolExecutionComplete(t) => Some(t.clone()),
            _ => None,
        }
    }
}

/// Usage information
#[derive(Debug, Clone, PartialEq)]
pub enum UsageUpdate {
    /// Context-window snapshot (replaces the previous one)
    Window(UsageSnapshot),
    /// Per-request token usage with the model that served it
    Request(AssistantUsageData),
}

impl RelayPayload for UsageUpdate {
    const KIND: EventKind = EventKind::UsageInfo;

    fn project(data: &EventData) -> Option<Self> {
        match data {
            EventData::SessionUsageInfo(u) => Some(Self::Window(UsageSnapshot {
                window_used_tokens: u.current_tokens,
                window_limit: u.token_limit,
                remaining_quota_percentage: u.remaining_quota_percentage,
            })),
            EventData::AssistantUsage(u) => Some(Self::Request(u.clone())),
            _ => None,
        }
    }
}

/// Session status transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    /// Session started or resumed
    Started { model: Option<String>, resumed: bool },
    /// Agent began a turn
    TurnStarted { turn_id: Option<String> },
    /// Agent finished a turn
    TurnEnded { turn_id: Option<String> },
    /// Upstream queue changed; carries no identifying data
    QueueModified,
    /// Active model changed
    ModelChanged(ModelChangeData),
    /// In-flight turn aborted
    Aborted { reason: Option<String> },
    /// Queue fully drained, agent waiting for input
    Idle,
}

impl RelayPayload for StatusEvent {
    const KIND: EventKind = EventKind::Status;

    fn project(data: &EventData) -> Option<Self> {
        let status = match data {
            EventData::SessionStart(s) => Self::Started {
                model: s.model.clone(),
                resumed: false,
            },
            EventData::SessionResume(s) => Self::Started {
                model: s.model.clone(),
                resumed: true,
            },
            EventData::AssistantTurnStart(t) => Self::TurnStarted {
                turn_id: t.turn_id.clone(),
            },
            EventData::AssistantTurnEnd(t) => Self::TurnEnded {
                turn_id: t.turn_id.clone(),
            },
            EventData::PendingMessagesModified => Self::QueueModified,
            EventData::SessionModelChange(m) => Self::ModelChanged(m.clone()),
            EventData::Abort(a) => Self::Aborted {
                reason: a.reason.clone(),
            },
            EventData::SessionIdle => Self::Idle,
            _ => return None,
        };
        Some(status)
    }
}

impl RelayPayload for DiffData {
    const KIND: EventKind = EventKind::DiffAvailable;

    fn project(data: &EventData) -> Option<Self> {
        match data {
            EventData::ToolDiffAvailable(d) => Some(d.clone()),
            _ => None,
        }
    }
}

impl RelayPayload for SessionErrorData {
    const KIND: EventKind = EventKind::Error;

    fn project(data: &EventData) -> Option<Self> {
        match data {
            EventData::SessionError(e) => Some(e.clone()),
            _ => None,
        }
    }
}
