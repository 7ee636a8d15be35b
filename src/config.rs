//! Configuration for a3s-session
//!
//! Loaded from camelCase JSON. Every field has a default, so an empty
//! object is a valid configuration.

use crate::error::{Result, SessionError};
use crate::recovery::RecoveryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory under the work session's cwd used for plan artifacts when
/// `planDir` is not set
pub const DEFAULT_PLAN_DIR: &str = ".a3s/plans";

/// Core configuration shared by coordinators, the plan-mode controller and
/// the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CoreConfig {
    /// Model used when the display layer does not pick one
    pub default_model: String,

    /// Deadline for create/resume in milliseconds; per-session
    /// `timeoutMs` takes precedence. `null` disables the deadline, so the
    /// key is always written
    pub session_timeout_ms: Option<u64>,

    /// How long to wait for `session.model_change` after a model switch
    pub model_change_timeout_ms: u64,

    /// Recovery policy
    pub recovery: RecoveryPolicy,

    /// Directory for plan artifacts; defaults to `<cwd>/.a3s/plans`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_dir: Option<PathBuf>,

    /// Fixed plan artifact file name; defaults to `<work-session-id>.md`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_file_name: Option<String>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            default_model: "claude-sonnet-4.5".to_string(),
            session_timeout_ms: Some(60_000),
            model_change_timeout_ms: 10_000,
            recovery: RecoveryPolicy::default(),
            plan_dir: None,
            plan_file_name: None,
        }
    }
}

impl CoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a JSON document
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| SessionError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            SessionError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json(&content).map_err(|e| match e {
            SessionError::Config(msg) => {
                SessionError::Config(format!("{} ({})", msg, path.display()))
            }
            other => other,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_model.trim().is_empty() {
            return Err(SessionError::Config("defaultModel must not be empty".into()));
        }
        if self.session_timeout_ms == Some(0) {
            return Err(SessionError::Config(
                "sessionTimeoutMs must be positive; set it to null to disable".into(),
            ));
        }
        if self.model_change_timeout_ms == 0 {
            return Err(SessionError::Config(
                "modelChangeTimeoutMs must be positive".into(),
            ));
        }
        if let Some(name) = &self.plan_file_name {
            let plain = Path::new(name)
                .file_name()
                .map(|f| f == name.as_str())
                .unwrap_or(false);
            if !plain {
                return Err(SessionError::Config(format!(
                    "planFileName must be a bare file name, got '{}'",
                    name
                )));
            }
        }
        Ok(())
    }

    pub fn session_timeout(&self) -> Option<Duration> {
        self.session_timeout_ms.map(Duration::from_millis)
    }

    pub fn model_change_timeout(&self) -> Duration {
        Duration::from_millis(self.model_change_timeout_ms)
    }

    /// Plan artifact path for a work session
    pub fn plan_artifact_path(&self, cwd: &Path, work_session_id: &str) -> PathBuf {
        let dir = match &self.plan_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => cwd.join(dir),
            None => cwd.join(DEFAULT_PLAN_DIR),
        };
        let file = self
            .plan_file_name
            .clone()
            .unwrap_or_else(|| format!("{}.md", work_session_id));
        dir.join(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_is_default() {
        let config = CoreConfig::from_json("{}").unwrap();
        assert_eq!(config, CoreConfig::default());
        assert_eq!(config.model_change_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_camel_case_fields() {
        let config = CoreConfig::from_json(
            r#"{
                "defaultModel": "gpt-5",
                "modelChangeTimeoutMs": 250,
                "recovery": {"recoverAuthentication": false},
                "planDir": "/tmp/plans"
            }"#,
        )
        .unwrap();
        assert_eq!(config.default_model, "gpt-5");
        assert_eq!(config.model_change_timeout_ms, 250);
        assert!(config.recovery.enabled);
        assert!(!config.recovery.recover_authentication);
        assert_eq!(config.plan_dir, Some(PathBuf::from("/tmp/plans")));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            CoreConfig::from_json(r#"{"defaultModel": " "}"#),
            Err(SessionError::Config(_))
        ));
        assert!(CoreConfig::from_json(r#"{"modelChangeTimeoutMs": 0}"#).is_err());
        assert!(CoreConfig::from_json(r#"{"sessionTimeoutMs": 0}"#).is_err());
        assert!(CoreConfig::from_json(r#"{"planFileName": "../escape.md"}"#).is_err());
        assert!(CoreConfig::from_json("not json").is_err());
    }

    #[test]
    fn test_disabled_session_timeout_survives_round_trip() {
        let config = CoreConfig {
            session_timeout_ms: None,
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"sessionTimeoutMs\":null"));

        let back = CoreConfig::from_json(&json).unwrap();
        assert_eq!(back.session_timeout(), None);
        assert_eq!(back, config);

        let omitted = CoreConfig::from_json("{}").unwrap();
        assert_eq!(omitted.session_timeout(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_plan_artifact_path() {
        let cwd = Path::new("/repo");
        let config = CoreConfig::default();
        assert_eq!(
            config.plan_artifact_path(cwd, "s-1"),
            PathBuf::from("/repo/.a3s/plans/s-1.md")
        );

        let config = CoreConfig {
            plan_dir: Some(PathBuf::from("docs/plans")),
            plan_file_name: Some("plan.md".to_string()),
            ..Default::default()
        };
        assert_eq!(
            config.plan_artifact_path(cwd, "s-1"),
            PathBuf::from("/repo/docs/plans/plan.md")
        );
    }

    #[tokio::test]
    async fn test_from_file_missing() {
        let err = CoreConfig::from_file("/nonexistent/a3s-session.json")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
