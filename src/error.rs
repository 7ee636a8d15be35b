//! Error types and failure classification for a3s-session
//!
//! Raw upstream error text is mapped to an [`ErrorClass`] by a single ordered
//! rule list. Recovery decisions and user-facing messages both go through
//! [`classify`], so the two can never disagree about what a failure means.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use thiserror::Error;

/// Errors that can occur while coordinating sessions
#[derive(Debug, Error)]
pub enum SessionError {
    /// Session creation failed (process spawn, transport, auth)
    #[error("Failed to create session: {0}")]
    Creation(String),

    /// Resuming an existing session failed
    #[error("Failed to resume session '{session_id}': {reason}")]
    Resume { session_id: String, reason: String },

    /// An operation on a live session failed in the runtime
    #[error("Runtime error during {operation}: {message}")]
    Runtime { operation: String, message: String },

    /// No session handle is currently held
    #[error("No active session")]
    NoActiveSession,

    /// Operation exceeded its deadline
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Model change was issued but never confirmed by the runtime
    #[error("Model change to '{model}' not confirmed: {reason}")]
    ModelChange { model: String, reason: String },

    /// One-shot recreation after an expired session failed
    #[error("Session recovery failed after {cause}: {reason}")]
    RecoveryFailed { cause: ErrorClass, reason: String },

    /// Plan-mode operation not valid in the current phase
    #[error("Invalid plan mode transition: {0}")]
    InvalidTransition(String),

    /// Plan artifact could not be read
    #[error("Plan artifact unavailable at {path}: {reason}")]
    PlanArtifact { path: String, reason: String },

    /// Display-layer intent failed boundary validation
    #[error("Invalid intent: {0}")]
    InvalidIntent(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SessionError {
    /// Build a runtime error for the given operation
    pub fn runtime(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Runtime {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Classify this error
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Creation(message) => classify(message),
            Self::Resume { reason, .. } => classify(reason),
            Self::Runtime { message, .. } => classify(message),
            Self::Timeout(_) => ErrorClass::NetworkTimeout,
            Self::ModelChange { reason, .. } => classify(reason),
            Self::RecoveryFailed { cause, .. } => *cause,
            Self::NoActiveSession => ErrorClass::SessionNotReady,
            _ => ErrorClass::Unknown,
        }
    }

    /// Human-readable description suitable for a status line
    pub fn user_message(&self) -> String {
        format!("{} ({})", self.class().user_message(), self)
    }
}

/// Result type alias for session operations
pub type Result<T> = std::result::Result<T, SessionError>;

/// Failure taxonomy shared by recovery and user-facing messaging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Authentication,
    SessionExpired,
    SessionNotReady,
    ConnectionClosed,
    NetworkTimeout,
    CliVersionIncompatible,
    PermissionDenied,
    Unknown,
}

impl ErrorClass {
    /// Stable snake_case identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authentication => "authentication",
            Self::SessionExpired => "session_expired",
            Self::SessionNotReady => "session_not_ready",
            Self::ConnectionClosed => "connection_closed",
            Self::NetworkTimeout => "network_timeout",
            Self::CliVersionIncompatible => "cli_version_incompatible",
            Self::PermissionDenied => "permission_denied",
            Self::Unknown => "unknown",
        }
    }

    /// Message shown to the user for this class
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Authentication => {
                "Authentication failed. Sign in to the agent runtime and try again."
            }
            Self::SessionExpired => "The session is no longer available on the agent runtime.",
            Self::SessionNotReady => "The session is still starting. Try again in a moment.",
            Self::ConnectionClosed => "The connection to the agent runtime was closed.",
            Self::NetworkTimeout => "The agent runtime did not respond in time.",
            Self::CliVersionIncompatible => {
                "The installed agent CLI version is not compatible. Update the CLI."
            }
            Self::PermissionDenied => "The operation was denied by the permission policy.",
            Self::Unknown => "An unexpected error occurred.",
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered classification rules, compiled once and cached.
///
/// Order matters: version mismatches often mention authentication or
/// sessions in the same message and must win over those rules.
fn classification_rules() -> &'static [(ErrorClass, Regex)] {
    static RULES: OnceLock<Vec<(ErrorClass, Regex)>> = OnceLock::new();
    RULES.get_or_init(|| {
        let raw = vec![
            (
                ErrorClass::CliVersionIncompatible,
                r"(?i)(protocol\s+version|version\s+mismatch|unsupported\s+(cli\s+)?version|incompatible\s+version|requires\s+(a\s+)?(newer|cli)\s+version|please\s+upgrade)",
            ),
            (
                ErrorClass::Authentication,
                r"(?i)(not\s+authenticated|authentication\s+(failed|required)|unauthori[sz]ed|\b401\b|not\s+logged\s+in|invalid\s+(auth\s+)?token|token\s+(has\s+)?expired|login\s+required)",
            ),
            (
                ErrorClass::SessionExpired,
                r"(?i)(session\s+not\s+found|session\s+(has\s+)?expired|unknown\s+session|invalid\s+session|no\s+such\s+session|session\s+.*\s+does\s+not\s+exist)",
            ),
            (
                ErrorClass::SessionNotReady,
                r"(?i)(not\s+ready|not\s+(yet\s+)?initiali[sz]ed|still\s+starting|session\s+is\s+starting)",
            ),
            (
                ErrorClass::ConnectionClosed,
                r"(?i)(connection\s+(closed|reset|lost)|broken\s+pipe|\bepipe\b|\beconnreset\b|\beconnrefused\b|process\s+exited|stream\s+(closed|ended)|disposed)",
            ),
            (
                ErrorClass::NetworkTimeout,
                r"(?i)(timed?\s*out|\betimedout\b|deadline\s+exceeded|\benotfound\b|network\s+(error|unreachable))",
            ),
            (
                ErrorClass::PermissionDenied,
                r"(?i)(permission\s+denied|\bdenied\s+by\b|not\s+permitted)",
            ),
        ];

        raw.into_iter()
            .filter_map(|(class, pattern)| Regex::new(pattern).ok().map(|r| (class, r)))
            .collect()
    })
}

/// Map raw upstream error text to an [`ErrorClass`]
pub fn classify(message: &str) -> ErrorClass {
    classification_rules()
        .iter()
        .find(|(_, pattern)| pattern.is_match(message))
        .map(|(class, _)| *class)
        .unwrap_or(ErrorClass::Unknown)
}
