//! Session host: the composition root
//!
//! `SessionHost` owns the relays, both coordinators, the plan-mode
//! controller, and the trackers, and connects them to a [`DisplaySink`].
//! It has an explicit lifecycle: `start` subscribes to every relay (which
//! flushes anything buffered while the display was loading) and posts the
//! initial snapshot; `dispose` drops the subscriptions and releases the
//! sessions.

use crate::config::CoreConfig;
use crate::coordinator::SessionCoordinator;
use crate::display::{DisplayIntent, DisplayMessage, DisplaySink, MessageRole, StatusTransition};
use crate::emitter::{lock, Emitter, HandlerError, HandlerResult, Subscription};
use crate::error::{classify, Result, SessionError};
use crate::event::{OutputText, StatusEvent, UsageUpdate};
use crate::plan::PlanModeController;
use crate::queue::MessageQueueTracker;
use crate::relay::RelayHub;
use crate::runtime::AgentRuntime;
use crate::tools::{ToolExecutionState, ToolExecutionTracker};
use crate::types::{
    Attachment, OutgoingMessage, PendingMessage, SessionMode, SessionNotice, SessionOptions,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

type Queues = Arc<Mutex<HashMap<String, MessageQueueTracker>>>;

/// Wires the session engine to a display
pub struct SessionHost {
    runtime: Arc<dyn AgentRuntime>,
    relays: Arc<RelayHub>,
    notices: Emitter<SessionNotice>,
    controller: Arc<PlanModeController>,
    sink: Arc<dyn DisplaySink>,
    config: CoreConfig,
    tools: Arc<Mutex<ToolExecutionTracker>>,
    queues: Queues,
    subscriptions: Mutex<Vec<Subscription>>,
    started: AtomicBool,
}

impl SessionHost {
    /// Create a host over a runtime
    pub fn new(
        runtime: impl AgentRuntime + 'static,
        sink: impl DisplaySink + 'static,
        config: CoreConfig,
    ) -> Self {
        Self::with_shared(Arc::new(runtime), Arc::new(sink), config)
    }

    /// Create a host from shared handles
    pub fn with_shared(
        runtime: Arc<dyn AgentRuntime>,
        sink: Arc<dyn DisplaySink>,
        config: CoreConfig,
    ) -> Self {
        let relays = Arc::new(RelayHub::new());
        let notices = Emitter::new("notices");

        let work = Arc::new(SessionCoordinator::new(
            "work",
            Arc::clone(&runtime),
            Arc::clone(&relays),
            notices.clone(),
            &config,
        ));
        let plan = Arc::new(
            SessionCoordinator::new(
                "plan",
                Arc::clone(&runtime),
                Arc::clone(&relays),
                notices.clone(),
                &config,
            )
            .detached(),
        );
        let controller = Arc::new(PlanModeController::new(
            work,
            plan,
            notices.clone(),
            config.clone(),
        ));

        Self {
            runtime,
            relays,
            notices,
            controller,
            sink,
            config,
            tools: Arc::new(Mutex::new(ToolExecutionTracker::new())),
            queues: Arc::new(Mutex::new(HashMap::new())),
            subscriptions: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }

    pub fn relays(&self) -> &Arc<RelayHub> {
        &self.relays
    }

    pub fn notices(&self) -> &Emitter<SessionNotice> {
        &self.notices
    }

    pub fn controller(&self) -> &Arc<PlanModeController> {
        &self.controller
    }

    pub fn work(&self) -> &Arc<SessionCoordinator> {
        self.controller.work()
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Tool calls tracked for a session, in first-seen order
    pub fn tool_states(&self, session_id: &str) -> Vec<ToolExecutionState> {
        lock(&self.tools)
            .tools(session_id)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Messages waiting behind the current turn of a session
    pub fn queued_messages(&self, session_id: &str) -> Vec<PendingMessage> {
        lock(&self.queues)
            .get(session_id)
            .map(|q| q.queued())
            .unwrap_or_default()
    }

    /// Subscribe to every relay and post the initial snapshot
    ///
    /// Called once the display is ready; calling it again is a no-op.
    pub async fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut subs = Vec::new();
        subs.push(self.subscribe_notices());
        subs.extend(self.subscribe_conversation());
        subs.extend(self.subscribe_tools());
        subs.push(self.subscribe_usage());
        subs.push(self.subscribe_status());
        subs.push(self.subscribe_errors());
        lock(&self.subscriptions).extend(subs);

        let session = self.work().session().await;
        tracing::info!(
            runtime = %self.runtime.name(),
            session_id = session.as_ref().map(|s| s.id.as_str()).unwrap_or("-"),
            "Session host started"
        );
        self.sink.post(DisplayMessage::Init {
            session,
            plan: self.controller.state(),
            runtime: self.runtime.name().to_string(),
        })
    }

    /// Drop every subscription and release both sessions
    pub async fn dispose(&self) -> Result<()> {
        lock(&self.subscriptions).clear();
        self.started.store(false, Ordering::SeqCst);
        self.controller.reset().await?;
        self.work().destroy().await?;
        tracing::info!("Session host disposed");
        Ok(())
    }

    /// Parse, validate and dispatch a raw intent
    pub async fn handle_raw_intent(&self, json: &str) -> Result<()> {
        let intent = DisplayIntent::parse(json).map_err(|e| {
            tracing::warn!(error = %e, "Rejected display intent");
            e
        })?;
        self.handle_intent(intent).await
    }

    /// Dispatch an intent; failures are also posted as status transitions
    pub async fn handle_intent(&self, intent: DisplayIntent) -> Result<()> {
        intent.validate()?;
        let result = self.dispatch(intent).await;
        if let Err(e) = &result {
            // Recovery failures were already reported as fatal
            if !matches!(e, SessionError::RecoveryFailed { .. }) {
                let _ = self.sink.post(DisplayMessage::Status {
                    transition: StatusTransition::error(e),
                });
            }
        }
        result
    }

    async fn dispatch(&self, intent: DisplayIntent) -> Result<()> {
        match intent {
            DisplayIntent::SendMessage { text, attachments } => {
                let message = OutgoingMessage {
                    text,
                    attachments: attachments.into_iter().map(Attachment::file).collect(),
                };
                let active = self.controller.active().await;
                self.send_to(&active, message).await
            }
            DisplayIntent::Abort => self.controller.active().await.abort().await,
            DisplayIntent::CreateSession { model, cwd } => {
                self.controller.reset().await?;
                let model = model.unwrap_or_else(|| self.config.default_model.clone());
                self.work().create(SessionOptions::new(model, cwd)).await?;
                Ok(())
            }
            DisplayIntent::SwitchSession {
                session_id,
                model,
                cwd,
            } => {
                let options = self.switch_options(model, cwd).await?;
                self.controller.reset().await?;
                self.work().switch_session(&session_id, options).await?;
                Ok(())
            }
            DisplayIntent::DestroySession => {
                self.controller.reset().await?;
                self.work().destroy().await
            }
            DisplayIntent::SwitchModel { model } => {
                self.controller.active().await.switch_model(&model).await?;
                Ok(())
            }
            DisplayIntent::TogglePlanMode => {
                self.controller.toggle_plan_mode().await?;
                Ok(())
            }
            DisplayIntent::AcceptPlan => {
                let accepted = self.controller.accept_plan().await?;
                self.send_to(
                    self.work(),
                    OutgoingMessage::text(accepted.implementation_prompt()),
                )
                .await
            }
            DisplayIntent::RejectPlan => {
                self.controller.reject_plan().await?;
                Ok(())
            }
            DisplayIntent::PickAttachments { paths } => self.pick_attachments(paths).await,
        }
    }

    async fn send_to(&self, coordinator: &SessionCoordinator, message: OutgoingMessage) -> Result<()> {
        let session = coordinator
            .session()
            .await
            .ok_or(SessionError::NoActiveSession)?;

        // A user message closes the open tool group
        lock(&self.tools).on_message(&session.id);

        // Record before sending: the runtime may start the turn before send returns
        let (pending_id, queued) = {
            let mut queues = lock(&self.queues);
            let queue = queues.entry(session.id.clone()).or_default();
            let (pending, behind_turn) = queue.on_send(&message);
            tracing::debug!(
                session_id = %session.id,
                message_id = %pending.id,
                queued = behind_turn,
                "Message sent"
            );
            (pending.id, queue.queued())
        };
        let _ = self.sink.post(DisplayMessage::QueueUpdated {
            session_id: session.id.clone(),
            queued,
        });

        let result = coordinator.send(&message).await;

        // Recovery may have moved the entry to the replacement session
        let rolled_back = {
            let mut queues = lock(&self.queues);
            match &result {
                Ok(()) => {
                    queues.values_mut().for_each(|q| q.on_delivered(&pending_id));
                    None
                }
                Err(_) => queues
                    .iter_mut()
                    .find_map(|(id, q)| q.remove(&pending_id).then(|| (id.clone(), q.queued()))),
            }
        };
        if let Some((session_id, queued)) = rolled_back {
            tracing::debug!(
                session_id = %session_id,
                message_id = %pending_id,
                "Send rejected, removed from queue"
            );
            let _ = self.sink.post(DisplayMessage::QueueUpdated { session_id, queued });
        }

        result
    }

    async fn switch_options(
        &self,
        model: Option<String>,
        cwd: Option<PathBuf>,
    ) -> Result<SessionOptions> {
        let current = self.work().options().await;
        let cwd = cwd
            .or_else(|| current.as_ref().map(|o| o.cwd.clone()))
            .ok_or_else(|| {
                SessionError::InvalidIntent("switchSession requires cwd when no session is open".into())
            })?;
        let model = model
            .or_else(|| current.as_ref().map(|o| o.model.clone()))
            .unwrap_or_else(|| self.config.default_model.clone());
        Ok(SessionOptions::new(model, cwd))
    }

    async fn pick_attachments(&self, paths: Vec<PathBuf>) -> Result<()> {
        let mut attachments = Vec::new();
        for path in paths {
            match tokio::fs::metadata(&path).await {
                Ok(meta) if meta.is_file() => attachments.push(Attachment::file(path)),
                Ok(_) => tracing::warn!(path = %path.display(), "Attachment is not a file"),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Attachment unavailable"),
            }
        }
        self.sink.post(DisplayMessage::AttachmentsPicked { attachments })
    }

    fn subscribe_notices(&self) -> Subscription {
        let sink = Arc::clone(&self.sink);
        let queues = Arc::clone(&self.queues);
        let tools = Arc::clone(&self.tools);
        let controller = Arc::downgrade(&self.controller);
        self.notices.subscribe(move |notice| {
            match notice {
                SessionNotice::SessionExpired {
                    previous_session_id: Some(previous),
                    new_session_id,
                } => {
                    {
                        let mut by_session = lock(&queues);
                        if let Some(mut queue) = by_session.remove(previous) {
                            by_session.insert(new_session_id.clone(), queue.carry_over());
                        }
                    }
                    lock(&tools).clear(previous);
                }
                SessionNotice::SessionDestroyed { session_id } => {
                    lock(&queues).remove(session_id);
                    lock(&tools).clear(session_id);
                }
                SessionNotice::SessionCreated {
                    session_id,
                    mode: SessionMode::Work,
                }
                | SessionNotice::SessionResumed {
                    session_id,
                    mode: SessionMode::Work,
                } => {
                    lock(&queues).remove(session_id);
                }
                _ => {}
            }

            post(&*sink, DisplayMessage::Status {
                transition: StatusTransition::from(notice),
            })?;

            let plan_notice = matches!(
                notice,
                SessionNotice::PlanModeEnabled { .. }
                    | SessionNotice::PlanModeDisabled { .. }
                    | SessionNotice::SessionExpired { .. }
                    | SessionNotice::PlanReady { .. }
                    | SessionNotice::PlanAccepted { .. }
                    | SessionNotice::PlanRejected { .. }
            );
            if plan_notice {
                if let Some(controller) = controller.upgrade() {
                    post(&*sink, DisplayMessage::PlanState {
                        plan: controller.state(),
                    })?;
                }
            }
            Ok(())
        })
    }

    fn subscribe_conversation(&self) -> Vec<Subscription> {
        let sink = Arc::clone(&self.sink);
        let tools = Arc::clone(&self.tools);
        let output = self.relays.output().subscribe(move |env| {
            let (message_id, content, partial) = match &env.payload {
                OutputText::Delta(d) => (d.message_id.clone(), d.delta_content.clone(), true),
                OutputText::Message(m) => {
                    lock(&tools).on_message(&env.session_id);
                    (m.message_id.clone(), m.content.clone(), false)
                }
            };
            post(&*sink, DisplayMessage::MessageAppend {
                session_id: env.session_id.clone(),
                message_id,
                role: MessageRole::Assistant,
                content,
                partial,
            })
        });

        let sink = Arc::clone(&self.sink);
        let reasoning = self.relays.reasoning().subscribe(move |env| {
            post(&*sink, DisplayMessage::MessageAppend {
                session_id: env.session_id.clone(),
                message_id: env.payload.reasoning_id.clone(),
                role: MessageRole::Reasoning,
                content: env.payload.content.clone(),
                partial: false,
            })
        });

        vec![output, reasoning]
    }

    fn subscribe_tools(&self) -> Vec<Subscription> {
        let (sink, tools) = (Arc::clone(&self.sink), Arc::clone(&self.tools));
        let start = self.relays.tool_start().subscribe(move |env| {
            let state = lock(&tools).on_start(&env.session_id, &env.payload, env.timestamp);
            upsert(&*sink, &env.session_id, state)
        });

        let (sink, tools) = (Arc::clone(&self.sink), Arc::clone(&self.tools));
        let update = self.relays.tool_update().subscribe(move |env| {
            let state = lock(&tools).on_progress(&env.session_id, &env.payload, env.timestamp);
            upsert(&*sink, &env.session_id, state)
        });

        let (sink, tools) = (Arc::clone(&self.sink), Arc::clone(&self.tools));
        let complete = self.relays.tool_complete().subscribe(move |env| {
            let state = lock(&tools).on_complete(&env.session_id, &env.payload, env.timestamp);
            upsert(&*sink, &env.session_id, state)
        });

        let (sink, tools) = (Arc::clone(&self.sink), Arc::clone(&self.tools));
        let diff = self.relays.diff().subscribe(move |env| {
            let state = lock(&tools).on_diff(&env.session_id, &env.payload, env.timestamp);
            let changed = state.is_some();
            upsert(&*sink, &env.session_id, state)?;
            if changed {
                post(&*sink, DisplayMessage::DiffAvailable {
                    session_id: env.session_id.clone(),
                    tool_call_id: env.payload.tool_call_id.clone(),
                    file_path: env.payload.file_path.clone(),
                    diff: env.payload.diff.clone(),
                })?;
            }
            Ok(())
        });

        vec![start, update, complete, diff]
    }

    fn subscribe_usage(&self) -> Subscription {
        let sink = Arc::clone(&self.sink);
        self.relays.usage().subscribe(move |env| {
            let message = match &env.payload {
                UsageUpdate::Window(snapshot) => DisplayMessage::Usage {
                    session_id: env.session_id.clone(),
                    snapshot: snapshot.clone(),
                },
                UsageUpdate::Request(usage) => DisplayMessage::TokenUsage {
                    session_id: env.session_id.clone(),
                    model: usage.model.clone(),
                    input_tokens: usage.input_tokens,
                    output_tokens: usage.output_tokens,
                },
            };
            post(&*sink, message)
        })
    }

    fn subscribe_status(&self) -> Subscription {
        let sink = Arc::clone(&self.sink);
        let queues = Arc::clone(&self.queues);
        let controller = Arc::downgrade(&self.controller);
        self.relays.status().subscribe(move |env| {
            let session_id = env.session_id.clone();

            let queue_changed = {
                let mut queues = lock(&queues);
                let queue = queues.entry(session_id.clone()).or_default();
                match &env.payload {
                    StatusEvent::TurnStarted { .. } => {
                        queue.on_turn_start();
                        Some(queue.queued())
                    }
                    StatusEvent::TurnEnded { .. } => {
                        queue.on_turn_end();
                        None
                    }
                    StatusEvent::Idle => {
                        queue.on_idle();
                        Some(Vec::new())
                    }
                    StatusEvent::QueueModified => {
                        queue.on_queue_modified();
                        None
                    }
                    _ => None,
                }
            };
            if let Some(queued) = queue_changed {
                post(&*sink, DisplayMessage::QueueUpdated {
                    session_id: session_id.clone(),
                    queued,
                })?;
            }

            if let Some(controller) = controller.upgrade() {
                controller.handle_status(env);
            }

            let transition = match &env.payload {
                StatusEvent::TurnStarted { .. } => Some(StatusTransition::TurnStarted { session_id }),
                StatusEvent::Idle => Some(StatusTransition::Idle { session_id }),
                StatusEvent::Aborted { reason } => Some(StatusTransition::Aborted {
                    session_id,
                    reason: reason.clone(),
                }),
                _ => None,
            };
            match transition {
                Some(transition) => post(&*sink, DisplayMessage::Status { transition }),
                None => Ok(()),
            }
        })
    }

    fn subscribe_errors(&self) -> Subscription {
        let sink = Arc::clone(&self.sink);
        self.relays.error().subscribe(move |env| {
            let class = classify(&env.payload.message);
            tracing::warn!(
                session_id = %env.session_id,
                class = %class,
                error = %env.payload.message,
                "Session error"
            );
            post(&*sink, DisplayMessage::Status {
                transition: StatusTransition::Error {
                    class,
                    message: format!("{} ({})", class.user_message(), env.payload.message),
                },
            })
        })
    }
}

fn post(sink: &dyn DisplaySink, message: DisplayMessage) -> HandlerResult {
    sink.post(message).map_err(|e| HandlerError::new(e.to_string()))
}

fn upsert(sink: &dyn DisplaySink, session_id: &str, state: Option<ToolExecutionState>) -> HandlerResult {
    match state {
        Some(tool) => post(sink, DisplayMessage::ToolUpsert {
            session_id: session_id.to_string(),
            tool,
        }),
        None => Ok(()),
    }
}

impl std::fmt::Debug for SessionHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHost")
            .field("runtime", &self.runtime.name())
            .field("started", &self.started.load(Ordering::SeqCst))
            .field("plan", &self.controller.state())
            .finish()
    }
}
