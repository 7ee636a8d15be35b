//! Plan mode
//!
//! Plan mode runs a second, restricted session next to the work session.
//! The plan session explores the codebase read-only and drafts a plan into a
//! single artifact file; the work session is left untouched. Entering and
//! leaving plan mode only moves relay ownership between the two
//! coordinators, so display subscribers never resubscribe.
//!
//! Phases: `work → plan_active → plan_ready → work`, with `exit` allowed
//! from either plan phase.

use crate::config::CoreConfig;
use crate::coordinator::SessionCoordinator;
use crate::emitter::{lock, Emitter, Subscription};
use crate::error::{Result, SessionError};
use crate::event::{Envelope, StatusEvent};
use crate::permission::PermissionPolicy;
use crate::types::{
    PlanModeState, PlanPhase, Session, SessionMode, SessionNotice, SessionOptions, ToolConfig,
};
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::MutexGuard;

/// System message for plan sessions; `{path}` is replaced with the artifact path
pub const PLAN_MODE_SYSTEM_MESSAGE: &str = "Plan mode is active. Investigate the codebase with \
read-only tools before proposing anything: read the relevant files, search for call sites, and \
fetch documentation when needed. Then write a step-by-step implementation plan to {path} \
covering the files to change, the commands to run, risks, and how to validate the result. \
That file is the only one you may write. Do not run shell commands and do not modify any other \
file; the plan will be carried out after it is approved.";

/// Plan handed back to the work session on acceptance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedPlan {
    pub path: PathBuf,
    pub content: String,
}

impl AcceptedPlan {
    /// Prompt sent to the work session to carry out the plan
    pub fn implementation_prompt(&self) -> String {
        format!(
            "The following plan was approved. Implement it.\n\nPlan ({}):\n\n{}",
            self.path.display(),
            self.content
        )
    }
}

/// The coordinator the user is talking to
///
/// Holds the transition lock, so plan mode cannot be entered or left while
/// an operation on it is in progress.
pub struct ActiveCoordinator<'a> {
    coordinator: &'a Arc<SessionCoordinator>,
    _transition: MutexGuard<'a, ()>,
}

impl Deref for ActiveCoordinator<'_> {
    type Target = SessionCoordinator;

    fn deref(&self) -> &SessionCoordinator {
        self.coordinator
    }
}

#[derive(Debug, Default)]
struct PlanTracking {
    state: PlanModeState,
    artifact_path: Option<PathBuf>,
    /// A plan-session turn finished since plan mode was entered
    turn_completed: bool,
}

impl PlanTracking {
    /// Follow a session that recovery replaced under a new id
    fn relabel(&mut self, previous: &str, replacement: &str) {
        if self.state.plan_session_id.as_deref() == Some(previous) {
            self.state.plan_session_id = Some(replacement.to_string());
            // The dead session's turn never reaches idle
            self.turn_completed = false;
            tracing::info!(
                previous = %previous,
                plan_session_id = %replacement,
                "Plan session replaced"
            );
        }
        if self.state.work_session_id.as_deref() == Some(previous) {
            self.state.work_session_id = Some(replacement.to_string());
            tracing::info!(
                previous = %previous,
                work_session_id = %replacement,
                "Work session replaced"
            );
        }
    }
}

/// Drives the work/plan dual-session workflow
pub struct PlanModeController {
    work: Arc<SessionCoordinator>,
    plan: Arc<SessionCoordinator>,
    notices: Emitter<SessionNotice>,
    config: CoreConfig,
    transition: tokio::sync::Mutex<()>,
    tracking: Arc<Mutex<PlanTracking>>,
    _recovered: Subscription,
}

impl PlanModeController {
    /// Create a controller
    ///
    /// `plan` must be detached; `work` owns the relays until plan mode is
    /// entered.
    pub fn new(
        work: Arc<SessionCoordinator>,
        plan: Arc<SessionCoordinator>,
        notices: Emitter<SessionNotice>,
        config: CoreConfig,
    ) -> Self {
        let tracking = Arc::new(Mutex::new(PlanTracking::default()));
        let recovered = {
            let tracking = Arc::clone(&tracking);
            notices.subscribe(move |notice| {
                if let SessionNotice::SessionExpired {
                    previous_session_id: Some(previous),
                    new_session_id,
                } = notice
                {
                    lock(&tracking).relabel(previous, new_session_id);
                }
                Ok(())
            })
        };

        Self {
            work,
            plan,
            notices,
            config,
            transition: tokio::sync::Mutex::new(()),
            tracking,
            _recovered: recovered,
        }
    }

    pub fn work(&self) -> &Arc<SessionCoordinator> {
        &self.work
    }

    pub fn plan(&self) -> &Arc<SessionCoordinator> {
        &self.plan
    }

    /// Current plan-mode state
    pub fn state(&self) -> PlanModeState {
        lock(&self.tracking).state.clone()
    }

    /// Artifact path of the current plan session
    pub fn artifact_path(&self) -> Option<PathBuf> {
        lock(&self.tracking).artifact_path.clone()
    }

    /// Wait for any plan-mode transition to finish and return the
    /// coordinator that currently owns the relays
    pub async fn active(&self) -> ActiveCoordinator<'_> {
        let transition = self.transition.lock().await;
        let coordinator = if self.state().enabled {
            &self.plan
        } else {
            &self.work
        };
        ActiveCoordinator {
            coordinator,
            _transition: transition,
        }
    }

    /// Enter plan mode when it is off, leave it when it is on
    pub async fn toggle_plan_mode(&self) -> Result<PlanModeState> {
        let _guard = self.transition.lock().await;
        if self.state().enabled {
            self.exit_locked().await
        } else {
            self.enter_locked().await
        }
    }

    /// Enter plan mode, creating the plan session on first use
    pub async fn enter_plan_mode(&self) -> Result<PlanModeState> {
        let _guard = self.transition.lock().await;
        self.enter_locked().await
    }

    async fn enter_locked(&self) -> Result<PlanModeState> {
        if self.state().enabled {
            return Ok(self.state());
        }

        let work_session = self.work.session().await.ok_or(SessionError::NoActiveSession)?;
        let (known_work, known_plan) = {
            let tracking = lock(&self.tracking);
            (
                tracking.state.work_session_id.clone(),
                tracking.artifact_path.clone(),
            )
        };

        let reusable = known_work.as_deref() == Some(work_session.id.as_str())
            && known_plan.is_some()
            && self.plan.has_session().await;

        let artifact_path = match known_plan {
            Some(path) if reusable => path,
            _ => {
                if self.plan.has_session().await {
                    // Work session changed; the old plan belongs to another conversation
                    if let Err(e) = self.plan.destroy().await {
                        tracing::warn!(error = %e, "Failed to destroy stale plan session");
                    }
                }
                self.create_plan_session(&work_session).await?
            }
        };

        let plan_session = self.plan.session().await.ok_or(SessionError::NoActiveSession)?;

        self.work.detach().await;
        self.plan.attach().await;

        {
            let mut tracking = lock(&self.tracking);
            tracking.state = PlanModeState {
                enabled: true,
                phase: PlanPhase::PlanActive,
                work_session_id: Some(work_session.id.clone()),
                plan_session_id: Some(plan_session.id.clone()),
                plan_ready: false,
            };
            tracking.artifact_path = Some(artifact_path);
            tracking.turn_completed = false;
        }

        tracing::info!(
            work_session_id = %work_session.id,
            plan_session_id = %plan_session.id,
            "Plan mode enabled"
        );
        self.notices.fire(&SessionNotice::PlanModeEnabled {
            plan_session_id: plan_session.id,
        });
        Ok(self.state())
    }

    async fn create_plan_session(&self, work_session: &Session) -> Result<PathBuf> {
        let artifact_path = self
            .config
            .plan_artifact_path(&work_session.cwd, &work_session.id);

        if let Some(dir) = artifact_path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(dir).await {
                tracing::warn!(path = %dir.display(), error = %e, "Failed to create plan directory");
            }
        }

        let timeout_ms = self.work.options().await.and_then(|o| o.timeout_ms);
        let mut options = plan_session_options(work_session, &artifact_path);
        options.timeout_ms = timeout_ms;

        self.plan.create(options).await?;
        Ok(artifact_path)
    }

    /// Leave plan mode without a decision; the plan session is kept
    pub async fn exit_plan_mode(&self) -> Result<PlanModeState> {
        let _guard = self.transition.lock().await;
        self.exit_locked().await
    }

    async fn exit_locked(&self) -> Result<PlanModeState> {
        if !self.state().enabled {
            return Ok(self.state());
        }

        self.return_to_work().await;
        let work_session_id = self.state().work_session_id;
        tracing::info!("Plan mode disabled");
        self.notices
            .fire(&SessionNotice::PlanModeDisabled { work_session_id });
        Ok(self.state())
    }

    /// Reject the drafted plan; the plan session is kept for revision
    pub async fn reject_plan(&self) -> Result<PlanModeState> {
        let _guard = self.transition.lock().await;
        let plan_session_id = self.require_ready("reject")?;

        self.return_to_work().await;
        tracing::info!(plan_session_id = %plan_session_id, "Plan rejected");
        self.notices
            .fire(&SessionNotice::PlanRejected { plan_session_id });
        Ok(self.state())
    }

    /// Accept the drafted plan and return its content
    ///
    /// If the artifact cannot be read, plan mode stays active.
    pub async fn accept_plan(&self) -> Result<AcceptedPlan> {
        let _guard = self.transition.lock().await;
        self.require_ready("accept")?;

        let path = self.artifact_path().ok_or_else(|| {
            SessionError::InvalidTransition("accept: no plan artifact".to_string())
        })?;
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| SessionError::PlanArtifact {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

        self.return_to_work().await;
        tracing::info!(path = %path.display(), bytes = content.len(), "Plan accepted");
        self.notices.fire(&SessionNotice::PlanAccepted {
            path: path.clone(),
            content: content.clone(),
        });
        Ok(AcceptedPlan { path, content })
    }

    /// Start a new conversation: leave plan mode and destroy the plan session
    pub async fn reset(&self) -> Result<()> {
        let _guard = self.transition.lock().await;
        if self.state().enabled {
            self.return_to_work().await;
        }
        *lock(&self.tracking) = PlanTracking::default();
        self.plan.destroy().await
    }

    /// Observe a status event from the relays
    ///
    /// The plan session going idle after finishing a turn moves plan mode to
    /// `plan_ready`. Returns true when that transition happened.
    pub fn handle_status(&self, envelope: &Envelope<StatusEvent>) -> bool {
        let plan_session_id = {
            let mut tracking = lock(&self.tracking);
            let state = &tracking.state;
            if state.phase != PlanPhase::PlanActive
                || state.plan_session_id.as_deref() != Some(envelope.session_id.as_str())
            {
                return false;
            }
            match envelope.payload {
                StatusEvent::TurnEnded { .. } => {
                    tracking.turn_completed = true;
                    return false;
                }
                StatusEvent::Idle if tracking.turn_completed => {
                    tracking.state.phase = PlanPhase::PlanReady;
                    tracking.state.plan_ready = true;
                    envelope.session_id.clone()
                }
                _ => return false,
            }
        };

        tracing::info!(plan_session_id = %plan_session_id, "Plan ready");
        self.notices
            .fire(&SessionNotice::PlanReady { plan_session_id });
        true
    }

    fn require_ready(&self, operation: &str) -> Result<String> {
        let state = self.state();
        match (state.phase, state.plan_session_id) {
            (PlanPhase::PlanReady, Some(id)) => Ok(id),
            (phase, _) => Err(SessionError::InvalidTransition(format!(
                "{} requires plan_ready, current phase is {:?}",
                operation, phase
            ))),
        }
    }

    async fn return_to_work(&self) {
        self.plan.detach().await;
        self.work.attach().await;
        let mut tracking = lock(&self.tracking);
        tracking.state.enabled = false;
        tracking.state.phase = PlanPhase::Work;
        tracking.state.plan_ready = false;
        tracking.turn_completed = false;
    }
}

/// Options for a plan session derived from its work session
pub fn plan_session_options(work_session: &Session, artifact_path: &Path) -> SessionOptions {
    let mut options = SessionOptions::new(&work_session.model, &work_session.cwd);
    options.mode = SessionMode::Plan;
    options.tools = ToolConfig::plan_surface();
    options.permissions = PermissionPolicy::PlanMode {
        artifact_path: artifact_path.to_path_buf(),
    };
    options.system_message = Some(
        PLAN_MODE_SYSTEM_MESSAGE.replace("{path}", &artifact_path.display().to_string()),
    );
    options
}
