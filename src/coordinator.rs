//! Session coordinator
//!
//! A `SessionCoordinator` owns at most one live session handle and is the
//! only place that talks to the runtime about that session. Every operation
//! that affects the session is serialized on an async lock, so a model
//! switch can never interleave with a resume or a recovery.
//!
//! Relay inputs are rebound as the very last step of a successful
//! create/resume/switch/recovery, and only while the coordinator is
//! attached. Plan mode uses `attach`/`detach` to hand relay ownership
//! between the work and plan coordinators.

use crate::config::CoreConfig;
use crate::emitter::{lock, Emitter};
use crate::error::{Result, SessionError};
use crate::event::{EventData, ModelChangeData};
use crate::recovery::RecoveryManager;
use crate::relay::RelayHub;
use crate::runtime::{AgentRuntime, SessionHandle};
use crate::types::{OutgoingMessage, Session, SessionNotice, SessionOptions};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

/// Run `fut` under an optional deadline, mapping expiry to `Timeout`
pub(crate) async fn with_deadline<T, F>(
    deadline: Option<Duration>,
    operation: &str,
    fut: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match deadline {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(SessionError::Timeout(format!(
                "{} exceeded {}ms",
                operation,
                limit.as_millis()
            ))),
        },
        None => fut.await,
    }
}

#[derive(Default)]
struct CoordinatorState {
    handle: Option<SessionHandle>,
    options: Option<SessionOptions>,
}

/// Owns one session and drives it through the runtime
pub struct SessionCoordinator {
    name: String,
    runtime: Arc<dyn AgentRuntime>,
    relays: Arc<RelayHub>,
    recovery: RecoveryManager,
    notices: Emitter<SessionNotice>,
    session_timeout: Option<Duration>,
    model_change_timeout: Duration,
    state: tokio::sync::Mutex<CoordinatorState>,
    attached: AtomicBool,
}

impl SessionCoordinator {
    /// Create a coordinator
    ///
    /// `name` only appears in logs. A new coordinator is attached: it owns
    /// the relay inputs until `detach` is called.
    pub fn new(
        name: impl Into<String>,
        runtime: Arc<dyn AgentRuntime>,
        relays: Arc<RelayHub>,
        notices: Emitter<SessionNotice>,
        config: &CoreConfig,
    ) -> Self {
        Self {
            name: name.into(),
            runtime,
            relays,
            recovery: RecoveryManager::new(config.recovery.clone(), notices.clone()),
            notices,
            session_timeout: config.session_timeout(),
            model_change_timeout: config.model_change_timeout(),
            state: tokio::sync::Mutex::new(CoordinatorState::default()),
            attached: AtomicBool::new(true),
        }
    }

    /// Start without relay ownership
    pub fn detached(self) -> Self {
        self.attached.store(false, Ordering::SeqCst);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn runtime_name(&self) -> &str {
        self.runtime.name()
    }

    pub fn recovery(&self) -> &RecoveryManager {
        &self.recovery
    }

    /// Create a new session, replacing any session currently held
    pub async fn create(&self, options: SessionOptions) -> Result<Session> {
        let mut state = self.state.lock().await;
        let deadline = self.deadline(&options);

        let handle = with_deadline(deadline, "create", self.runtime.create_session(&options))
            .await
            .map_err(|e| {
                tracing::warn!(coordinator = %self.name, error = %e, "Session creation failed");
                e
            })?;

        let session = handle.session.clone();
        tracing::info!(
            coordinator = %self.name,
            session_id = %session.id,
            model = %session.model,
            mode = ?session.mode,
            "Session created"
        );
        self.install(&mut state, handle, options);
        self.notices.fire(&SessionNotice::SessionCreated {
            session_id: session.id.clone(),
            mode: session.mode,
        });
        Ok(session)
    }

    /// Resume an existing session with an explicit model
    ///
    /// If the runtime comes back on a different model, a confirmed in-place
    /// model change is issued before returning. An expired id is recovered
    /// by creating a fresh session with the same options.
    pub async fn resume(&self, session_id: &str, options: SessionOptions) -> Result<Session> {
        let mut state = self.state.lock().await;
        self.resume_locked(&mut state, session_id, options).await
    }

    /// Switch to another session; the current handle is released only after
    /// the new one is bound
    pub async fn switch_session(&self, session_id: &str, options: SessionOptions) -> Result<Session> {
        let mut state = self.state.lock().await;
        if let Some(current) = &state.handle {
            if current.id() == session_id && current.session.model == options.model {
                return Ok(current.session.clone());
            }
        }
        let previous = state.handle.as_ref().map(|h| h.id().to_string());
        let session = self.resume_locked(&mut state, session_id, options).await?;
        tracing::info!(
            coordinator = %self.name,
            from = previous.as_deref().unwrap_or("-"),
            to = %session.id,
            "Session switched"
        );
        Ok(session)
    }

    async fn resume_locked(
        &self,
        state: &mut CoordinatorState,
        session_id: &str,
        options: SessionOptions,
    ) -> Result<Session> {
        let deadline = self.deadline(&options);
        let resumed = with_deadline(
            deadline,
            "resume",
            self.runtime.resume_session(session_id, &options),
        )
        .await;

        let mut handle = match resumed {
            Ok(handle) => handle,
            Err(e) if self.recovery.should_recover(&e) => {
                let handle = self
                    .recovery
                    .recreate(
                        self.runtime.as_ref(),
                        Some(session_id),
                        &options,
                        e.class(),
                        deadline,
                    )
                    .await?;
                let session = handle.session.clone();
                self.install(state, handle, options);
                return Ok(session);
            }
            Err(e) => {
                tracing::warn!(
                    coordinator = %self.name,
                    session_id = %session_id,
                    error = %e,
                    "Session resume failed"
                );
                return Err(e);
            }
        };

        if handle.session.model != options.model {
            tracing::info!(
                session_id = %session_id,
                active = %handle.session.model,
                requested = %options.model,
                "Resumed session on a stale model, switching"
            );
            self.confirm_model_change(&handle, &options.model).await?;
            handle.session.model = options.model.clone();
        }

        let session = handle.session.clone();
        self.install(state, handle, options);
        self.notices.fire(&SessionNotice::SessionResumed {
            session_id: session.id.clone(),
            mode: session.mode,
        });
        tracing::info!(
            coordinator = %self.name,
            session_id = %session.id,
            model = %session.model,
            "Session resumed"
        );
        Ok(session)
    }

    /// Change the model of the live session in place
    ///
    /// Waits for the runtime's `session.model_change` confirmation. The
    /// session is never destroyed or recreated.
    pub async fn switch_model(&self, model: &str) -> Result<ModelChangeData> {
        let mut state = self.state.lock().await;
        let handle = state.handle.as_ref().ok_or(SessionError::NoActiveSession)?;

        let change = self.confirm_model_change(handle, model).await?;

        if let Some(handle) = state.handle.as_mut() {
            handle.session.model = model.to_string();
            handle.session.touch();
        }
        if let Some(options) = state.options.as_mut() {
            options.model = model.to_string();
        }

        let session_id = state
            .handle
            .as_ref()
            .map(|h| h.id().to_string())
            .unwrap_or_default();
        tracing::info!(
            session_id = %session_id,
            previous = change.previous_model.as_deref().unwrap_or("-"),
            model = %model,
            "Model changed"
        );
        self.notices.fire(&SessionNotice::ModelChanged {
            session_id,
            previous_model: change.previous_model.clone(),
            new_model: change.new_model.clone(),
        });
        Ok(change)
    }

    async fn confirm_model_change(
        &self,
        handle: &SessionHandle,
        model: &str,
    ) -> Result<ModelChangeData> {
        let (tx, rx) = oneshot::channel();
        let slot = Arc::new(Mutex::new(Some(tx)));
        let target = model.to_string();

        // Subscribe before issuing the change so the confirmation cannot be missed
        let waiter = Arc::clone(&slot);
        let _confirmation = handle.events.subscribe(move |event| {
            if let EventData::SessionModelChange(change) = &event.data {
                if change.new_model == target {
                    if let Some(tx) = lock(&waiter).take() {
                        let _ = tx.send(change.clone());
                    }
                }
            }
            Ok(())
        });

        self.runtime
            .set_model(handle.id(), model)
            .await
            .map_err(|e| SessionError::ModelChange {
                model: model.to_string(),
                reason: e.to_string(),
            })?;

        match tokio::time::timeout(self.model_change_timeout, rx).await {
            Ok(Ok(change)) => Ok(change),
            Ok(Err(_)) => Err(SessionError::ModelChange {
                model: model.to_string(),
                reason: "confirmation channel closed".to_string(),
            }),
            Err(_) => Err(SessionError::ModelChange {
                model: model.to_string(),
                reason: format!(
                    "confirmation timed out after {}ms",
                    self.model_change_timeout.as_millis()
                ),
            }),
        }
    }

    /// Destroy the current session; a no-op when none is held
    pub async fn destroy(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let handle = match state.handle.take() {
            Some(handle) => handle,
            None => return Ok(()),
        };
        state.options = None;

        if self.is_attached() && self.relays.input_id().as_deref() == Some(handle.id()) {
            self.relays.clear_input();
        }

        let result = self.runtime.destroy_session(handle.id()).await;
        match &result {
            Ok(()) => tracing::info!(coordinator = %self.name, session_id = %handle.id(), "Session destroyed"),
            Err(e) => tracing::warn!(
                coordinator = %self.name,
                session_id = %handle.id(),
                error = %e,
                "Session destroy failed"
            ),
        }
        self.notices.fire(&SessionNotice::SessionDestroyed {
            session_id: handle.id().to_string(),
        });
        result
    }

    /// Send a message to the live session
    ///
    /// An expired session is recreated once and the send retried once; a
    /// second failure is returned as-is.
    pub async fn send(&self, message: &OutgoingMessage) -> Result<()> {
        let mut state = self.state.lock().await;
        let handle = state.handle.clone().ok_or(SessionError::NoActiveSession)?;

        let error = match self.runtime.send(handle.id(), message).await {
            Ok(()) => {
                if let Some(h) = state.handle.as_mut() {
                    h.session.touch();
                }
                return Ok(());
            }
            Err(e) => e,
        };

        if !self.recovery.should_recover(&error) {
            tracing::warn!(session_id = %handle.id(), error = %error, "Send failed");
            return Err(error);
        }

        let options = state.options.clone().ok_or(SessionError::NoActiveSession)?;
        let deadline = self.deadline(&options);
        let fresh = self
            .recovery
            .recreate(
                self.runtime.as_ref(),
                Some(handle.id()),
                &options,
                error.class(),
                deadline,
            )
            .await?;
        let fresh_id = fresh.id().to_string();
        self.install(&mut state, fresh, options);

        self.runtime.send(&fresh_id, message).await
    }

    /// Stop the in-flight turn; the session stays alive
    pub async fn abort(&self) -> Result<()> {
        let state = self.state.lock().await;
        let handle = state.handle.as_ref().ok_or(SessionError::NoActiveSession)?;
        tracing::debug!(session_id = %handle.id(), "Aborting turn");
        self.runtime.abort(handle.id()).await
    }

    /// Take relay ownership and bind the relays to the current session
    pub async fn attach(&self) {
        let state = self.state.lock().await;
        self.attached.store(true, Ordering::SeqCst);
        if let Some(handle) = &state.handle {
            self.bind(handle);
        }
    }

    /// Give up relay ownership; relay inputs are left for the next owner
    pub async fn detach(&self) {
        let _state = self.state.lock().await;
        self.attached.store(false, Ordering::SeqCst);
        tracing::debug!(coordinator = %self.name, "Detached from relays");
    }

    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }

    /// Current session record
    pub async fn session(&self) -> Option<Session> {
        self.state.lock().await.handle.as_ref().map(|h| h.session.clone())
    }

    /// Options the current session was created or resumed with
    pub async fn options(&self) -> Option<SessionOptions> {
        self.state.lock().await.options.clone()
    }

    /// Whether a session is held
    pub async fn has_session(&self) -> bool {
        self.state.lock().await.handle.is_some()
    }

    fn deadline(&self, options: &SessionOptions) -> Option<Duration> {
        options
            .timeout_ms
            .map(Duration::from_millis)
            .or(self.session_timeout)
    }

    /// Store a confirmed handle; rebinding relays is the last step
    fn install(&self, state: &mut CoordinatorState, handle: SessionHandle, options: SessionOptions) {
        let previous = state.handle.replace(handle);
        state.options = Some(options);
        if let Some(handle) = &state.handle {
            self.bind(handle);
        }
        if let Some(previous) = previous {
            tracing::debug!(session_id = %previous.id(), "Released previous handle");
        }
    }

    fn bind(&self, handle: &SessionHandle) {
        if self.is_attached() {
            self.relays.set_input(handle.id(), &handle.events);
            tracing::debug!(coordinator = %self.name, session_id = %handle.id(), "Relays bound");
        }
    }
}

impl std::fmt::Debug for SessionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCoordinator")
            .field("name", &self.name)
            .field("runtime", &self.runtime.name())
            .field("attached", &self.is_attached())
            .finish()
    }
}
