//! Permission policy answered from the runtime's permission callback
//!
//! The runtime invokes the callback for every privileged operation, even when
//! a process-level "approve all" flag is set, so every session carries an
//! explicit policy. A denial is a normal tool outcome fed back to the agent,
//! never an error.

use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

/// Category of a privileged operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionKind {
    /// File or directory read
    Read,
    /// File creation or modification
    Write,
    /// Shell command execution
    Shell,
    /// MCP server tool invocation
    Mcp,
    /// URL fetch
    Url,
    /// Sub-agent dispatch
    Task,
    /// Anything the runtime does not categorize
    Other,
}

/// A permission request raised by the runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRequest {
    /// Operation category
    pub kind: PermissionKind,

    /// Tool call that triggered the request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Tool name, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,

    /// Target path for read/write requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Command line for shell requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Sub-agent type for task requests (e.g. "explore")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<String>,
}

impl PermissionRequest {
    /// Request of the given kind with no details
    pub fn new(kind: PermissionKind) -> Self {
        Self {
            kind,
            tool_call_id: None,
            tool_name: None,
            path: None,
            command: None,
            agent_type: None,
        }
    }

    /// Write request for a path
    pub fn write(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::new(PermissionKind::Write)
        }
    }

    /// Read request for a path
    pub fn read(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::new(PermissionKind::Read)
        }
    }

    /// Shell request for a command line
    pub fn shell(command: impl Into<String>) -> Self {
        Self {
            command: Some(command.into()),
            ..Self::new(PermissionKind::Shell)
        }
    }

    /// Sub-agent dispatch request
    pub fn task(agent_type: impl Into<String>) -> Self {
        Self {
            agent_type: Some(agent_type.into()),
            ..Self::new(PermissionKind::Task)
        }
    }
}

/// Structured answer returned to the runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum PermissionDecision {
    /// Operation may proceed
    Approved,
    /// Operation refused; the reason is shown to the agent
    Denied { reason: String },
}

impl PermissionDecision {
    /// Build a denial
    pub fn denied(reason: impl Into<String>) -> Self {
        Self::Denied {
            reason: reason.into(),
        }
    }

    /// Whether the operation may proceed
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved)
    }
}

/// Sub-agent types allowed inside plan mode
const PLAN_MODE_AGENT_TYPES: &[&str] = &["explore"];

/// Policy attached to a session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum PermissionPolicy {
    /// Approve every request (work sessions)
    #[default]
    ApproveAll,
    /// Read-only exploration; writes confined to one artifact
    PlanMode { artifact_path: PathBuf },
}

impl PermissionPolicy {
    /// Answer a permission request
    pub fn evaluate(&self, request: &PermissionRequest) -> PermissionDecision {
        let decision = match self {
            Self::ApproveAll => PermissionDecision::Approved,
            Self::PlanMode { artifact_path } => evaluate_plan_mode(artifact_path, request),
        };

        if let PermissionDecision::Denied { reason } = &decision {
            tracing::debug!(
                kind = ?request.kind,
                tool = ?request.tool_name,
                reason = %reason,
                "Permission denied"
            );
        }

        decision
    }
}

fn evaluate_plan_mode(artifact_path: &Path, request: &PermissionRequest) -> PermissionDecision {
    match request.kind {
        PermissionKind::Read | PermissionKind::Url => PermissionDecision::Approved,
        PermissionKind::Write => match &request.path {
            Some(path) if normalize(path) == normalize(artifact_path) => {
                PermissionDecision::Approved
            }
            Some(path) => PermissionDecision::denied(format!(
                "Plan mode is read-only: only the plan file {} may be written, not {}",
                artifact_path.display(),
                path.display()
            )),
            None => PermissionDecision::denied(format!(
                "Plan mode is read-only: only the plan file {} may be written",
                artifact_path.display()
            )),
        },
        PermissionKind::Task => match request.agent_type.as_deref() {
            Some(agent) if PLAN_MODE_AGENT_TYPES.contains(&agent) => PermissionDecision::Approved,
            other => PermissionDecision::denied(format!(
                "Plan mode only dispatches exploration agents (requested {})",
                other.unwrap_or("unspecified")
            )),
        },
        PermissionKind::Shell => PermissionDecision::denied(
            "Plan mode does not run shell commands; use read-only tools instead",
        ),
        PermissionKind::Mcp | PermissionKind::Other => PermissionDecision::denied(format!(
            "Plan mode does not allow {}",
            request.tool_name.as_deref().unwrap_or("this operation")
        )),
    }
}

/// Lexically normalize a path (resolves `.` and `..` without touching disk)
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
