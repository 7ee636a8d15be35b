//! Agent runtime trait — the core abstraction for agent backends
//!
//! The runtime owns model inference, tool execution, and its own session
//! store. This crate only drives it through `AgentRuntime` and listens to
//! the event stream attached to every session handle.

use crate::emitter::Emitter;
use crate::error::Result;
use crate::event::SessionEvent;
use crate::permission::{PermissionDecision, PermissionRequest};
use crate::types::{OutgoingMessage, Session, SessionOptions};
use async_trait::async_trait;

pub mod memory;

/// Core trait for agent runtime backends
///
/// Implementations handle process management and transport. Every session
/// handle carries the session's event stream; the runtime pushes events into
/// it for as long as the session lives.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    /// Create a new session
    async fn create_session(&self, options: &SessionOptions) -> Result<SessionHandle>;

    /// Resume an existing session
    ///
    /// `options.model` is always honoured; a resumed session must not fall
    /// back to the model it last ran with.
    async fn resume_session(&self, session_id: &str, options: &SessionOptions)
        -> Result<SessionHandle>;

    /// Release a session
    async fn destroy_session(&self, session_id: &str) -> Result<()>;

    /// Send a message; queued upstream if a turn is in progress
    async fn send(&self, session_id: &str, message: &OutgoingMessage) -> Result<()>;

    /// Stop the in-flight turn, keeping the session alive
    async fn abort(&self, session_id: &str) -> Result<()>;

    /// Change the active model in place
    ///
    /// Completion is confirmed by a `session.model_change` event.
    async fn set_model(&self, session_id: &str, model: &str) -> Result<()>;

    /// Runtime name (e.g., "memory", "copilot-cli")
    fn name(&self) -> &str;

    /// Health check — returns true if the runtime is reachable
    ///
    /// Default implementation always reports healthy.
    async fn health(&self) -> Result<bool> {
        Ok(true)
    }
}

/// A live session handle returned by the runtime
#[derive(Clone)]
pub struct SessionHandle {
    /// Session record
    pub session: Session,

    /// Event stream for this session
    pub events: Emitter<SessionEvent>,
}

impl SessionHandle {
    /// Create a handle
    pub fn new(session: Session, events: Emitter<SessionEvent>) -> Self {
        Self { session, events }
    }

    /// Session id
    pub fn id(&self) -> &str {
        &self.session.id
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("session", &self.session)
            .field("listeners", &self.events.listener_count())
            .finish()
    }
}

/// Answer the runtime's permission callback for a session
///
/// Runtimes call this for every privileged operation, whether or not a
/// process-level approve-all flag is set.
pub fn answer_permission(options: &SessionOptions, request: &PermissionRequest) -> PermissionDecision {
    options.permissions.evaluate(request)
}
