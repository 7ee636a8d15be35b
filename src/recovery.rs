//! One-shot session recovery
//!
//! When an operation fails because the runtime no longer knows the session
//! (or, if enabled, because credentials were refreshed underneath it), the
//! stale handle is destroyed and a fresh session is **created** with the
//! original options. Recreation happens at most once per failed operation;
//! if it fails the error is fatal.

use crate::coordinator::with_deadline;
use crate::emitter::Emitter;
use crate::error::{ErrorClass, Result, SessionError};
use crate::runtime::{AgentRuntime, SessionHandle};
use crate::types::{SessionNotice, SessionOptions};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Which failures trigger recovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryPolicy {
    /// Master switch
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Also recover from authentication failures
    #[serde(default = "default_true")]
    pub recover_authentication: bool,
}

fn default_true() -> bool {
    true
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            recover_authentication: true,
        }
    }
}

impl RecoveryPolicy {
    /// Policy that never recovers
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Whether a failure of this class triggers recreation
    pub fn should_recover(&self, class: ErrorClass) -> bool {
        if !self.enabled {
            return false;
        }
        match class {
            ErrorClass::SessionExpired => true,
            ErrorClass::Authentication => self.recover_authentication,
            _ => false,
        }
    }
}

/// Performs session recreation and reports it on the notice channel
pub struct RecoveryManager {
    policy: RecoveryPolicy,
    notices: Emitter<SessionNotice>,
    attempts: AtomicU64,
    failures: AtomicU64,
}

impl RecoveryManager {
    pub fn new(policy: RecoveryPolicy, notices: Emitter<SessionNotice>) -> Self {
        Self {
            policy,
            notices,
            attempts: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn policy(&self) -> &RecoveryPolicy {
        &self.policy
    }

    /// Whether `error` should be answered with a recreation
    pub fn should_recover(&self, error: &SessionError) -> bool {
        self.policy.should_recover(error.class())
    }

    /// Replace a stale session with a freshly created one
    ///
    /// The stale session is destroyed first; failures there are logged and
    /// ignored. Emits `session_expired` on success and `fatal` on failure.
    pub async fn recreate(
        &self,
        runtime: &dyn AgentRuntime,
        stale_session_id: Option<&str>,
        options: &SessionOptions,
        cause: ErrorClass,
        deadline: Option<Duration>,
    ) -> Result<SessionHandle> {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            session_id = stale_session_id.unwrap_or("-"),
            cause = %cause,
            "Recreating session"
        );

        if let Some(stale) = stale_session_id {
            if let Err(e) = runtime.destroy_session(stale).await {
                tracing::debug!(session_id = %stale, error = %e, "Stale session destroy failed");
            }
        }

        match with_deadline(deadline, "recreate", runtime.create_session(options)).await {
            Ok(handle) => {
                tracing::info!(
                    previous = stale_session_id.unwrap_or("-"),
                    session_id = %handle.id(),
                    model = %handle.session.model,
                    "Session recovered"
                );
                self.notices.fire(&SessionNotice::SessionExpired {
                    previous_session_id: stale_session_id.map(str::to_string),
                    new_session_id: handle.id().to_string(),
                });
                Ok(handle)
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                let class = e.class();
                let error = SessionError::RecoveryFailed {
                    cause,
                    reason: e.to_string(),
                };
                tracing::warn!(error = %error, class = %class, "Session recovery failed");
                self.notices.fire(&SessionNotice::Fatal {
                    class,
                    message: class.user_message().to_string(),
                });
                Err(error)
            }
        }
    }

    /// Number of recreations attempted
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Number of recreations that failed
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}
