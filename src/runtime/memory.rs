//! In-memory agent runtime for testing and single-process use
//!
//! `MemoryRuntime` keeps sessions in a map and pushes events synchronously.
//! Failures, delays, and upstream quirks can be scripted so coordinator
//! behaviour can be exercised without spawning an agent process.

use super::{AgentRuntime, SessionHandle};
use crate::emitter::{lock, Emitter};
use crate::error::{Result, SessionError};
use crate::event::{
    AbortData, AssistantMessageData, AssistantUsageData, EventData, ModelChangeData,
    SessionEvent, SessionStartData, TurnData,
};
use crate::permission::{PermissionDecision, PermissionRequest};
use crate::types::{OutgoingMessage, Session, SessionOptions};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Runtime operation, used for call recording and failure scripting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeOp {
    Create,
    Resume,
    Destroy,
    Send,
    Abort,
    SetModel,
}

/// A recorded runtime call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeCall {
    pub op: RuntimeOp,
    pub session_id: Option<String>,
    pub model: Option<String>,
}

/// Behaviour switches for the memory runtime
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Delay before create/resume completes
    pub startup_delay: Option<Duration>,

    /// Emit a canned turn (start, message, usage, end, idle) on every send
    pub auto_reply: bool,

    /// Emit `session.model_change` after `set_model`
    pub confirm_model_change: bool,

    /// Keep the session's last-used model on resume, ignoring the request
    pub sticky_resume_model: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            startup_delay: None,
            auto_reply: false,
            confirm_model_change: true,
            sticky_resume_model: false,
        }
    }
}

struct MemorySession {
    session: Session,
    options: SessionOptions,
    events: Emitter<SessionEvent>,
    sent: Vec<OutgoingMessage>,
}

#[derive(Default)]
struct MemoryState {
    sessions: HashMap<String, MemorySession>,
    destroyed: HashSet<String>,
    failures: HashMap<RuntimeOp, VecDeque<String>>,
    calls: Vec<RuntimeCall>,
}

/// In-memory agent runtime
#[derive(Clone, Default)]
pub struct MemoryRuntime {
    config: MemoryConfig,
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryRuntime {
    /// Create a runtime with default behaviour
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a runtime with custom behaviour
    pub fn with_config(config: MemoryConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(MemoryState::default())),
        }
    }

    /// Fail the next call of `op` with the given upstream message
    pub fn fail_next(&self, op: RuntimeOp, message: impl Into<String>) {
        lock(&self.state)
            .failures
            .entry(op)
            .or_default()
            .push_back(message.into());
    }

    /// Forget a live session, as if the runtime process lost it
    pub fn expire(&self, session_id: &str) -> bool {
        lock(&self.state).sessions.remove(session_id).is_some()
    }

    /// Register a session that exists in the runtime's store but has no
    /// live handle, so it can be resumed. Destroyed ids stay gone; returns
    /// false for them.
    pub fn seed_session(&self, session: Session, options: SessionOptions) -> bool {
        let mut state = lock(&self.state);
        if state.destroyed.contains(&session.id) {
            return false;
        }
        let events = Emitter::new(format!("session:{}", session.id));
        state.sessions.insert(
            session.id.clone(),
            MemorySession {
                session,
                options,
                events,
                sent: Vec::new(),
            },
        );
        true
    }

    /// Whether `destroy_session` has been called for this id
    pub fn is_destroyed(&self, session_id: &str) -> bool {
        lock(&self.state).destroyed.contains(session_id)
    }

    /// Push an event into a session's stream
    pub fn emit(&self, session_id: &str, data: EventData) -> Result<usize> {
        let events = self.events_for(session_id, "emit")?;
        Ok(events.fire(&SessionEvent::new(session_id, data)))
    }

    /// Answer a permission request the way the runtime callback would
    pub fn request_permission(
        &self,
        session_id: &str,
        request: &PermissionRequest,
    ) -> Result<PermissionDecision> {
        let state = lock(&self.state);
        let entry = state
            .sessions
            .get(session_id)
            .ok_or_else(|| not_found("permission", session_id))?;
        Ok(super::answer_permission(&entry.options, request))
    }

    /// Current session record
    pub fn session(&self, session_id: &str) -> Option<Session> {
        lock(&self.state)
            .sessions
            .get(session_id)
            .map(|s| s.session.clone())
    }

    /// Options the session was created or last resumed with
    pub fn options(&self, session_id: &str) -> Option<SessionOptions> {
        lock(&self.state)
            .sessions
            .get(session_id)
            .map(|s| s.options.clone())
    }

    /// Messages sent to a session
    pub fn sent(&self, session_id: &str) -> Vec<OutgoingMessage> {
        lock(&self.state)
            .sessions
            .get(session_id)
            .map(|s| s.sent.clone())
            .unwrap_or_default()
    }

    /// Ids of live sessions
    pub fn live_sessions(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.state).sessions.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Every call made so far
    pub fn calls(&self) -> Vec<RuntimeCall> {
        lock(&self.state).calls.clone()
    }

    /// Number of calls of one kind
    pub fn call_count(&self, op: RuntimeOp) -> usize {
        lock(&self.state).calls.iter().filter(|c| c.op == op).count()
    }

    fn record(&self, op: RuntimeOp, session_id: Option<&str>, model: Option<&str>) -> Option<String> {
        let mut state = lock(&self.state);
        state.calls.push(RuntimeCall {
            op,
            session_id: session_id.map(str::to_string),
            model: model.map(str::to_string),
        });
        state.failures.get_mut(&op).and_then(|queue| queue.pop_front())
    }

    fn events_for(&self, session_id: &str, operation: &str) -> Result<Emitter<SessionEvent>> {
        lock(&self.state)
            .sessions
            .get(session_id)
            .map(|s| s.events.clone())
            .ok_or_else(|| not_found(operation, session_id))
    }

    async fn startup_delay(&self) {
        if let Some(delay) = self.config.startup_delay {
            tokio::time::sleep(delay).await;
        }
    }
}

fn not_found(operation: &str, session_id: &str) -> SessionError {
    SessionError::runtime(operation, format!("Session not found: {}", session_id))
}

#[async_trait]
impl AgentRuntime for MemoryRuntime {
    async fn create_session(&self, options: &SessionOptions) -> Result<SessionHandle> {
        let failure = self.record(RuntimeOp::Create, None, Some(&options.model));
        self.startup_delay().await;
        if let Some(message) = failure {
            return Err(SessionError::Creation(message));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let session = Session::new(&id, options.mode, &options.model, &options.cwd);
        let events = Emitter::new(format!("session:{}", id));

        lock(&self.state).sessions.insert(
            id.clone(),
            MemorySession {
                session: session.clone(),
                options: options.clone(),
                events: events.clone(),
                sent: Vec::new(),
            },
        );

        events.fire(&SessionEvent::new(
            &id,
            EventData::SessionStart(SessionStartData {
                model: Some(options.model.clone()),
                cwd: Some(options.cwd.clone()),
            }),
        ));

        tracing::debug!(session_id = %id, model = %options.model, "Memory session created");
        Ok(SessionHandle::new(session, events))
    }

    async fn resume_session(
        &self,
        session_id: &str,
        options: &SessionOptions,
    ) -> Result<SessionHandle> {
        let failure = self.record(RuntimeOp::Resume, Some(session_id), Some(&options.model));
        self.startup_delay().await;
        if let Some(message) = failure {
            return Err(SessionError::Resume {
                session_id: session_id.to_string(),
                reason: message,
            });
        }

        let sticky = self.config.sticky_resume_model;
        let (session, events) = {
            let mut state = lock(&self.state);
            if state.destroyed.contains(session_id) {
                return Err(SessionError::Resume {
                    session_id: session_id.to_string(),
                    reason: format!("Session not found: {} was destroyed", session_id),
                });
            }
            let entry = match state.sessions.get_mut(session_id) {
                Some(entry) => entry,
                None => {
                    return Err(SessionError::Resume {
                        session_id: session_id.to_string(),
                        reason: format!("Session not found: {}", session_id),
                    })
                }
            };
            if !sticky {
                entry.session.model = options.model.clone();
            }
            entry.session.touch();
            entry.options = SessionOptions {
                model: entry.session.model.clone(),
                ..options.clone()
            };
            entry.events = Emitter::new(format!("session:{}", session_id));
            (entry.session.clone(), entry.events.clone())
        };

        events.fire(&SessionEvent::new(
            session_id,
            EventData::SessionResume(SessionStartData {
                model: Some(session.model.clone()),
                cwd: Some(session.cwd.clone()),
            }),
        ));

        Ok(SessionHandle::new(session, events))
    }

    async fn destroy_session(&self, session_id: &str) -> Result<()> {
        if let Some(message) = self.record(RuntimeOp::Destroy, Some(session_id), None) {
            return Err(SessionError::runtime("destroy", message));
        }
        let mut state = lock(&self.state);
        state.sessions.remove(session_id);
        state.destroyed.insert(session_id.to_string());
        Ok(())
    }

    async fn send(&self, session_id: &str, message: &OutgoingMessage) -> Result<()> {
        if let Some(failure) = self.record(RuntimeOp::Send, Some(session_id), None) {
            return Err(SessionError::runtime("send", failure));
        }

        let (events, model) = {
            let mut state = lock(&self.state);
            let entry = state
                .sessions
                .get_mut(session_id)
                .ok_or_else(|| not_found("send", session_id))?;
            entry.sent.push(message.clone());
            entry.session.touch();
            (entry.events.clone(), entry.session.model.clone())
        };

        if self.config.auto_reply {
            let turn = TurnData {
                turn_id: Some(uuid::Uuid::new_v4().to_string()),
            };
            let replies = [
                EventData::AssistantTurnStart(turn.clone()),
                EventData::AssistantMessage(AssistantMessageData {
                    message_id: uuid::Uuid::new_v4().to_string(),
                    content: format!("ack: {}", message.text),
                }),
                EventData::AssistantUsage(AssistantUsageData {
                    model,
                    input_tokens: message.text.len() as u64,
                    output_tokens: 1,
                }),
                EventData::AssistantTurnEnd(turn),
                EventData::SessionIdle,
            ];
            for data in replies {
                events.fire(&SessionEvent::new(session_id, data));
            }
        }
        Ok(())
    }

    async fn abort(&self, session_id: &str) -> Result<()> {
        if let Some(failure) = self.record(RuntimeOp::Abort, Some(session_id), None) {
            return Err(SessionError::runtime("abort", failure));
        }
        let events = self.events_for(session_id, "abort")?;
        events.fire(&SessionEvent::new(
            session_id,
            EventData::Abort(AbortData {
                reason: Some("user initiated".to_string()),
            }),
        ));
        events.fire(&SessionEvent::new(session_id, EventData::SessionIdle));
        Ok(())
    }

    async fn set_model(&self, session_id: &str, model: &str) -> Result<()> {
        if let Some(failure) = self.record(RuntimeOp::SetModel, Some(session_id), Some(model)) {
            return Err(SessionError::runtime("set_model", failure));
        }

        let (events, previous) = {
            let mut state = lock(&self.state);
            let entry = state
                .sessions
                .get_mut(session_id)
                .ok_or_else(|| not_found("set_model", session_id))?;
            let previous = std::mem::replace(&mut entry.session.model, model.to_string());
            entry.options.model = model.to_string();
            entry.session.touch();
            (entry.events.clone(), previous)
        };

        if self.config.confirm_model_change {
            events.fire(&SessionEvent::new(
                session_id,
                EventData::SessionModelChange(ModelChangeData {
                    previous_model: Some(previous),
                    new_model: model.to_string(),
                }),
            ));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
