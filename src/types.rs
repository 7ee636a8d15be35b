//! Core session types for a3s-session
//!
//! All types use camelCase JSON serialization for wire compatibility with
//! the display layer and the agent runtime.

use crate::error::ErrorClass;
use crate::permission::PermissionPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Operating mode of a session, fixed at creation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// Normal session with the full tool surface
    #[default]
    Work,
    /// Restricted planning session
    Plan,
}

/// A live agent session owned by one coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Runtime-assigned session id, never reused after destruction
    pub id: String,

    /// Work or plan; immutable
    pub mode: SessionMode,

    /// Currently active model
    pub model: String,

    /// Working directory the agent operates in
    pub cwd: PathBuf,

    /// Unix timestamp in milliseconds
    pub created_at: u64,

    /// Unix timestamp in milliseconds of the last send/resume/model change
    pub last_activity_at: u64,
}

impl Session {
    /// Create a session record stamped with the current time
    pub fn new(
        id: impl Into<String>,
        mode: SessionMode,
        model: impl Into<String>,
        cwd: impl Into<PathBuf>,
    ) -> Self {
        let now = now_millis();
        Self {
            id: id.into(),
            mode,
            model: model.into(),
            cwd: cwd.into(),
            created_at: now,
            last_activity_at: now,
        }
    }

    /// Update the last activity timestamp
    pub fn touch(&mut self) {
        self.last_activity_at = now_millis();
    }
}

/// Tool surface requested from the runtime
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolConfig {
    /// Allow-list of tool names; `None` means every runtime tool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_tools: Option<Vec<String>>,

    /// Tools removed from the surface
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_tools: Vec<String>,
}

impl ToolConfig {
    /// Read-only exploration surface used by plan sessions
    ///
    /// Writes stay on the surface so the agent can draft the plan artifact;
    /// the plan-mode permission policy confines them to that single path.
    pub fn plan_surface() -> Self {
        Self {
            available_tools: Some(
                [
                    "view", "read", "glob", "grep", "ls", "web_fetch", "task", "create", "edit",
                ]
                .iter()
                .map(|t| t.to_string())
                .collect(),
            ),
            excluded_tools: vec!["bash".to_string(), "shell".to_string()],
        }
    }

    /// Whether a tool is on the surface
    pub fn allows(&self, tool_name: &str) -> bool {
        if self.excluded_tools.iter().any(|t| t == tool_name) {
            return false;
        }
        match &self.available_tools {
            Some(tools) => tools.iter().any(|t| t == tool_name),
            None => true,
        }
    }
}

/// Local MCP server launched by the runtime for a session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpServerConfig {
    /// Executable to spawn
    pub command: String,

    /// Command-line arguments
    #[serde(default)]
    pub args: Vec<String>,

    /// Extra environment variables
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Tools to expose (`["*"]` for all)
    #[serde(default = "default_mcp_tools")]
    pub tools: Vec<String>,
}

fn default_mcp_tools() -> Vec<String> {
    vec!["*".to_string()]
}

/// Options used to create or resume a session
///
/// Carried forward verbatim on recovery so a recreated session keeps the
/// caller's model, working directory, and tool configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOptions {
    /// Model to run; always passed explicitly on resume
    pub model: String,

    /// Working directory
    pub cwd: PathBuf,

    /// Session mode
    #[serde(default)]
    pub mode: SessionMode,

    /// Tool surface
    #[serde(default)]
    pub tools: ToolConfig,

    /// Answer given to the runtime's per-operation permission callback
    #[serde(default)]
    pub permissions: PermissionPolicy,

    /// Extra system message appended to the runtime's default prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_message: Option<String>,

    /// MCP servers keyed by name
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub mcp_servers: HashMap<String, McpServerConfig>,

    /// Whether the runtime should stream message deltas
    #[serde(default = "default_streaming")]
    pub streaming: bool,

    /// Deadline for create/resume in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

fn default_streaming() -> bool {
    true
}

impl SessionOptions {
    /// Work-session options for a model and directory
    pub fn new(model: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            model: model.into(),
            cwd: cwd.into(),
            mode: SessionMode::Work,
            tools: ToolConfig::default(),
            permissions: PermissionPolicy::ApproveAll,
            system_message: None,
            mcp_servers: HashMap::new(),
            streaming: true,
            timeout_ms: None,
        }
    }

    /// Set the tool surface
    pub fn with_tools(mut self, tools: ToolConfig) -> Self {
        self.tools = tools;
        self
    }

    /// Set the create/resume deadline
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Register an MCP server
    pub fn with_mcp_server(mut self, name: impl Into<String>, server: McpServerConfig) -> Self {
        self.mcp_servers.insert(name.into(), server);
        self
    }
}

/// A file attached to an outgoing message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    /// Absolute path of the file
    pub path: PathBuf,

    /// Name shown in the display layer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl Attachment {
    /// Attach a file, naming it after the last path component
    pub fn file(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let display_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());
        Self { path, display_name }
    }
}

/// Message sent to the agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    /// Prompt text
    pub text: String,

    /// Attached files
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl OutgoingMessage {
    /// Plain text message without attachments
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attachments: Vec::new(),
        }
    }
}

/// A send tracked in memory while it waits for its turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingMessage {
    /// Local id (msg-<uuid>)
    pub id: String,

    /// Prompt text
    pub text: String,

    /// Attached files
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,

    /// Unix timestamp in milliseconds
    pub enqueued_at: u64,
}

impl PendingMessage {
    /// Track an outgoing message
    pub fn from_outgoing(message: &OutgoingMessage) -> Self {
        Self {
            id: format!("msg-{}", uuid::Uuid::new_v4()),
            text: message.text.clone(),
            attachments: message.attachments.clone(),
            enqueued_at: now_millis(),
        }
    }
}

/// Context-window usage, replaced wholesale on every usage event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSnapshot {
    /// Tokens currently occupying the context window
    pub window_used_tokens: u64,

    /// Context window size
    pub window_limit: u64,

    /// Remaining premium quota, when the runtime reports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_quota_percentage: Option<f64>,
}

/// Phase of the plan-mode state machine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanPhase {
    /// Relays follow the work session
    #[default]
    Work,
    /// Relays follow the plan session; plan is being drafted
    PlanActive,
    /// Plan session finished drafting; awaiting accept or reject
    PlanReady,
}

/// Snapshot of plan-mode state exposed to the display layer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanModeState {
    /// Whether plan mode is active
    pub enabled: bool,

    /// Current phase
    pub phase: PlanPhase,

    /// Work session the plan belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_session_id: Option<String>,

    /// Plan session, stable across enter/exit cycles
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_session_id: Option<String>,

    /// Whether the acceptance affordance should be shown
    pub plan_ready: bool,
}

/// Notifications produced by coordinators and the plan-mode controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum SessionNotice {
    /// A session was created
    SessionCreated { session_id: String, mode: SessionMode },
    /// A session was resumed
    SessionResumed { session_id: String, mode: SessionMode },
    /// A session was destroyed
    SessionDestroyed { session_id: String },
    /// The session expired and was transparently recreated
    SessionExpired {
        previous_session_id: Option<String>,
        new_session_id: String,
    },
    /// In-place model change confirmed
    ModelChanged {
        session_id: String,
        previous_model: Option<String>,
        new_model: String,
    },
    /// Relays now follow the plan session
    PlanModeEnabled { plan_session_id: String },
    /// Relays returned to the work session
    PlanModeDisabled { work_session_id: Option<String> },
    /// Plan drafting finished
    PlanReady { plan_session_id: String },
    /// Plan accepted; content handed to the work session
    PlanAccepted { path: PathBuf, content: String },
    /// Plan rejected; plan session kept for revision
    PlanRejected { plan_session_id: String },
    /// Unrecoverable failure
    Fatal { class: ErrorClass, message: String },
}

/// Current time in Unix milliseconds
pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
