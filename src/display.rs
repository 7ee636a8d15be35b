//! Display protocol
//!
//! A closed set of messages sent to the display layer and intents received
//! from it. Each kind has exactly one payload shape. Intents are validated at
//! the boundary by [`DisplayIntent::parse`] before anything acts on them.

use crate::error::{ErrorClass, Result, SessionError};
use crate::tools::ToolExecutionState;
use crate::types::{
    Attachment, PendingMessage, PlanModeState, Session, SessionMode, SessionNotice, UsageSnapshot,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::mpsc;

/// Who produced a piece of conversation text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    Assistant,
    Reasoning,
}

/// Messages posted to the display layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum DisplayMessage {
    /// Snapshot posted once the display is ready
    Init {
        session: Option<Session>,
        plan: PlanModeState,
        runtime: String,
    },
    /// Append (or stream into) a conversation message
    MessageAppend {
        session_id: String,
        message_id: String,
        role: MessageRole,
        content: String,
        /// True for streaming chunks, false for the final content
        partial: bool,
    },
    /// Create or replace a tool card
    ToolUpsert {
        session_id: String,
        tool: ToolExecutionState,
    },
    /// Status line transition
    Status { transition: StatusTransition },
    /// Context-window usage
    Usage {
        session_id: String,
        snapshot: UsageSnapshot,
    },
    /// Per-request token usage
    TokenUsage {
        session_id: String,
        model: String,
        input_tokens: u64,
        output_tokens: u64,
    },
    /// A file diff is ready to show
    DiffAvailable {
        session_id: String,
        tool_call_id: String,
        file_path: PathBuf,
        diff: String,
    },
    /// Messages waiting behind the current turn
    QueueUpdated {
        session_id: String,
        queued: Vec<PendingMessage>,
    },
    /// Plan-mode state changed
    PlanState { plan: PlanModeState },
    /// Attachments validated for the next send
    AttachmentsPicked { attachments: Vec<Attachment> },
}

/// Status transitions shown to the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum StatusTransition {
    SessionReady {
        session_id: String,
        mode: SessionMode,
        resumed: bool,
    },
    SessionDestroyed {
        session_id: String,
    },
    SessionExpired {
        previous_session_id: Option<String>,
        new_session_id: String,
        message: String,
    },
    ModelChanged {
        session_id: String,
        previous_model: Option<String>,
        new_model: String,
    },
    TurnStarted {
        session_id: String,
    },
    Idle {
        session_id: String,
    },
    Aborted {
        session_id: String,
        reason: Option<String>,
    },
    PlanModeEnabled {
        plan_session_id: String,
    },
    PlanModeDisabled,
    PlanReady {
        plan_session_id: String,
    },
    PlanAccepted {
        path: PathBuf,
    },
    PlanRejected,
    Error {
        class: ErrorClass,
        message: String,
    },
    Fatal {
        class: ErrorClass,
        message: String,
    },
}

impl StatusTransition {
    /// Status for a classified failure
    pub fn error(error: &SessionError) -> Self {
        Self::Error {
            class: error.class(),
            message: error.user_message(),
        }
    }
}

impl From<&SessionNotice> for StatusTransition {
    fn from(notice: &SessionNotice) -> Self {
        match notice {
            SessionNotice::SessionCreated { session_id, mode } => Self::SessionReady {
                session_id: session_id.clone(),
                mode: *mode,
                resumed: false,
            },
            SessionNotice::SessionResumed { session_id, mode } => Self::SessionReady {
                session_id: session_id.clone(),
                mode: *mode,
                resumed: true,
            },
            SessionNotice::SessionDestroyed { session_id } => Self::SessionDestroyed {
                session_id: session_id.clone(),
            },
            SessionNotice::SessionExpired {
                previous_session_id,
                new_session_id,
            } => Self::SessionExpired {
                previous_session_id: previous_session_id.clone(),
                new_session_id: new_session_id.clone(),
                message: ErrorClass::SessionExpired.user_message().to_string(),
            },
            SessionNotice::ModelChanged {
                session_id,
                previous_model,
                new_model,
            } => Self::ModelChanged {
                session_id: session_id.clone(),
                previous_model: previous_model.clone(),
                new_model: new_model.clone(),
            },
            SessionNotice::PlanModeEnabled { plan_session_id } => Self::PlanModeEnabled {
                plan_session_id: plan_session_id.clone(),
            },
            SessionNotice::PlanModeDisabled { .. } => Self::PlanModeDisabled,
            SessionNotice::PlanReady { plan_session_id } => Self::PlanReady {
                plan_session_id: plan_session_id.clone(),
            },
            SessionNotice::PlanAccepted { path, .. } => Self::PlanAccepted { path: path.clone() },
            SessionNotice::PlanRejected { .. } => Self::PlanRejected,
            SessionNotice::Fatal { class, message } => Self::Fatal {
                class: *class,
                message: message.clone(),
            },
        }
    }
}

/// Intents received from the display layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum DisplayIntent {
    SendMessage {
        text: String,
        #[serde(default)]
        attachments: Vec<PathBuf>,
    },
    Abort,
    CreateSession {
        #[serde(default)]
        model: Option<String>,
        cwd: PathBuf,
    },
    SwitchSession {
        session_id: String,
        #[serde(default)]
        model: Option<String>,
        #[serde(default)]
        cwd: Option<PathBuf>,
    },
    DestroySession,
    SwitchModel {
        model: String,
    },
    TogglePlanMode,
    AcceptPlan,
    RejectPlan,
    PickAttachments {
        paths: Vec<PathBuf>,
    },
}

impl DisplayIntent {
    /// Parse and validate a raw intent
    pub fn parse(json: &str) -> Result<Self> {
        let intent: Self =
            serde_json::from_str(json).map_err(|e| SessionError::InvalidIntent(e.to_string()))?;
        intent.validate()?;
        Ok(intent)
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Self::SendMessage { text, attachments } => {
                if text.trim().is_empty() && attachments.is_empty() {
                    return invalid("sendMessage requires text or attachments");
                }
                require_absolute(attachments.iter())
            }
            Self::CreateSession { model, cwd } => {
                require_model(model.as_deref())?;
                require_absolute(std::iter::once(cwd))
            }
            Self::SwitchSession {
                session_id,
                model,
                cwd,
            } => {
                if session_id.trim().is_empty() {
                    return invalid("switchSession requires a session id");
                }
                require_model(model.as_deref())?;
                require_absolute(cwd.iter())
            }
            Self::SwitchModel { model } => require_model(Some(model)),
            Self::PickAttachments { paths } => {
                if paths.is_empty() {
                    return invalid("pickAttachments requires at least one path");
                }
                require_absolute(paths.iter())
            }
            Self::Abort
            | Self::DestroySession
            | Self::TogglePlanMode
            | Self::AcceptPlan
            | Self::RejectPlan => Ok(()),
        }
    }
}

fn invalid(message: &str) -> Result<()> {
    Err(SessionError::InvalidIntent(message.to_string()))
}

fn require_model(model: Option<&str>) -> Result<()> {
    match model {
        Some(m) if m.trim().is_empty() => invalid("model must not be empty"),
        _ => Ok(()),
    }
}

fn require_absolute<'a>(mut paths: impl Iterator<Item = &'a PathBuf>) -> Result<()> {
    match paths.find(|p| !p.is_absolute()) {
        Some(p) => Err(SessionError::InvalidIntent(format!(
            "path must be absolute: {}",
            p.display()
        ))),
        None => Ok(()),
    }
}

/// Receives display messages
///
/// Posting is synchronous: it is called from relay handlers.
pub trait DisplaySink: Send + Sync {
    fn post(&self, message: DisplayMessage) -> Result<()>;
}

/// Sink backed by an unbounded tokio channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<DisplayMessage>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DisplayMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl DisplaySink for ChannelSink {
    fn post(&self, message: DisplayMessage) -> Result<()> {
        self.tx
            .send(message)
            .map_err(|_| SessionError::runtime("post", "display channel closed"))
    }
}
