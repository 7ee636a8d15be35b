//! Tool execution tracking
//!
//! Every tool call is a small state machine keyed by its call id:
//! `pending → running → complete | failed`. Status only ever moves forward
//! and terminal states are final. Events may arrive out of order (an update
//! before its start, a diff after completion) and are merged into the same
//! entry.
//!
//! Tools observed between two non-tool messages form one display group.

use crate::event::{DiffData, ToolCompleteData, ToolProgressData, ToolStartData};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Status of a tool call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Pending,
    Running,
    Complete,
    Failed,
}

impl ToolStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Running => 1,
            Self::Complete | Self::Failed => 2,
        }
    }

    /// Complete or failed
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

/// Tracked state of one tool call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolExecutionState {
    pub tool_call_id: String,
    /// Unknown until the start event arrives
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub status: ToolStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<String>,
    pub start_time: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_data: Option<DiffData>,
    /// Display group
    pub group: u64,
}

impl ToolExecutionState {
    fn new(tool_call_id: &str, group: u64, timestamp: u64) -> Self {
        Self {
            tool_call_id: tool_call_id.to_string(),
            name: None,
            status: ToolStatus::Pending,
            arguments: None,
            result: None,
            error: None,
            progress: None,
            start_time: timestamp,
            end_time: None,
            diff_data: None,
            group,
        }
    }

    /// Move to `next` if that is a forward transition
    fn advance(&mut self, next: ToolStatus) -> bool {
        if self.status.is_terminal() || next.rank() <= self.status.rank() {
            return false;
        }
        self.status = next;
        true
    }
}

#[derive(Debug, Default)]
struct SessionTools {
    entries: HashMap<String, ToolExecutionState>,
    order: Vec<String>,
    open_group: Option<u64>,
    next_group: u64,
}

impl SessionTools {
    fn entry(&mut self, tool_call_id: &str, timestamp: u64) -> &mut ToolExecutionState {
        let Self {
            entries,
            order,
            open_group,
            next_group,
        } = self;
        entries.entry(tool_call_id.to_string()).or_insert_with(|| {
            let group = *open_group.get_or_insert_with(|| {
                let group = *next_group;
                *next_group += 1;
                group
            });
            order.push(tool_call_id.to_string());
            ToolExecutionState::new(tool_call_id, group, timestamp)
        })
    }
}

/// Tool execution state for every session
#[derive(Debug, Default)]
pub struct ToolExecutionTracker {
    sessions: HashMap<String, SessionTools>,
}

impl ToolExecutionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a start event
    ///
    /// Returns the updated state, or `None` when the event changed nothing.
    pub fn on_start(
        &mut self,
        session_id: &str,
        data: &ToolStartData,
        timestamp: u64,
    ) -> Option<ToolExecutionState> {
        let entry = self.session(session_id).entry(&data.tool_call_id, timestamp);
        let mut changed = false;
        if entry.name.is_none() {
            entry.name = Some(data.tool_name.clone());
            changed = true;
        }
        if entry.arguments.is_none() && data.arguments.is_some() {
            entry.arguments = data.arguments.clone();
            changed = true;
        }
        if entry.advance(ToolStatus::Running) {
            entry.start_time = timestamp;
            changed = true;
        }
        changed.then(|| entry.clone())
    }

    /// Apply a progress update; an unseen id creates a pending entry
    pub fn on_progress(
        &mut self,
        session_id: &str,
        data: &ToolProgressData,
        timestamp: u64,
    ) -> Option<ToolExecutionState> {
        let tools = self.session(session_id);
        let created = !tools.entries.contains_key(&data.tool_call_id);
        let entry = tools.entry(&data.tool_call_id, timestamp);
        if entry.status.is_terminal() {
            return None;
        }
        let changed = data.progress_message.is_some() && entry.progress != data.progress_message;
        if changed {
            entry.progress = data.progress_message.clone();
        }
        (created || changed).then(|| entry.clone())
    }

    /// Apply a completion; terminal entries are never changed again
    pub fn on_complete(
        &mut self,
        session_id: &str,
        data: &ToolCompleteData,
        timestamp: u64,
    ) -> Option<ToolExecutionState> {
        let entry = self.session(session_id).entry(&data.tool_call_id, timestamp);
        let next = if data.success {
            ToolStatus::Complete
        } else {
            ToolStatus::Failed
        };
        if !entry.advance(next) {
            tracing::debug!(
                tool_call_id = %data.tool_call_id,
                status = ?entry.status,
                "Ignoring completion for finished tool"
            );
            return None;
        }
        entry.result = data.result.clone();
        entry.error = data.error.clone();
        entry.end_time = Some(timestamp);
        Some(entry.clone())
    }

    /// Merge a diff without touching status; applying the same diff twice
    /// is a no-op
    pub fn on_diff(
        &mut self,
        session_id: &str,
        data: &DiffData,
        timestamp: u64,
    ) -> Option<ToolExecutionState> {
        let entry = self.session(session_id).entry(&data.tool_call_id, timestamp);
        if entry.diff_data.as_ref() == Some(data) {
            return None;
        }
        entry.diff_data = Some(data.clone());
        Some(entry.clone())
    }

    /// A non-tool message closes the current display group
    pub fn on_message(&mut self, session_id: &str) {
        if let Some(tools) = self.sessions.get_mut(session_id) {
            tools.open_group = None;
        }
    }

    pub fn get(&self, session_id: &str, tool_call_id: &str) -> Option<&ToolExecutionState> {
        self.sessions.get(session_id)?.entries.get(tool_call_id)
    }

    /// All tool calls of a session in first-seen order
    pub fn tools(&self, session_id: &str) -> Vec<&ToolExecutionState> {
        match self.sessions.get(session_id) {
            Some(tools) => tools
                .order
                .iter()
                .filter_map(|id| tools.entries.get(id))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Tool calls of one display group
    pub fn group(&self, session_id: &str, group: u64) -> Vec<&ToolExecutionState> {
        self.tools(session_id)
            .into_iter()
            .filter(|t| t.group == group)
            .collect()
    }

    /// Calls not yet finished
    pub fn active_count(&self, session_id: &str) -> usize {
        self.tools(session_id)
            .iter()
            .filter(|t| !t.status.is_terminal())
            .count()
    }

    /// Forget a session's tool calls
    pub fn clear(&mut self, session_id: &str) {
        self.sessions.remove(session_id);
    }

    fn session(&mut self, session_id: &str) -> &mut SessionTools {
        self.sessions.entry(session_id.to_string()).or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn start(id: &str) -> ToolStartData {
        ToolStartData {
            tool_call_id: id.to_string(),
            tool_name: "edit".to_string(),
            arguments: Some(serde_json::json!({"path": "src/lib.rs"})),
        }
    }

    fn progress(id: &str, msg: &str) -> ToolProgressData {
        ToolProgressData {
            tool_call_id: id.to_string(),
            progress_message: Some(msg.to_string()),
        }
    }

    fn complete(id: &str, success: bool) -> ToolCompleteData {
        ToolCompleteData {
            tool_call_id: id.to_string(),
            success,
            result: success.then(|| "ok".to_string()),
            error: (!success).then(|| "boom".to_string()),
        }
    }

    fn diff(id: &str) -> DiffData {
        DiffData {
            tool_call_id: id.to_string(),
            file_path: PathBuf::from("src/lib.rs"),
            diff: "@@ -1 +1 @@\n-a\n+b".to_string(),
        }
    }

    #[test]
    fn test_lifecycle() {
        let mut tracker = ToolExecutionTracker::new();
        let state = tracker.on_start("s", &start("t1"), 10).unwrap();
        assert_eq!(state.status, ToolStatus::Running);
        assert_eq!(state.name.as_deref(), Some("edit"));

        tracker.on_progress("s", &progress("t1", "writing"), 11);
        let state = tracker.on_complete("s", &complete("t1", true), 12).unwrap();
        assert_eq!(state.status, ToolStatus::Complete);
        assert_eq!(state.progress.as_deref(), Some("writing"));
        assert_eq!(state.end_time, Some(12));
        assert_eq!(tracker.active_count("s"), 0);
    }

    #[test]
    fn test_status_never_regresses() {
        let mut tracker = ToolExecutionTracker::new();
        let sequences: Vec<Vec<&str>> = vec![
            vec!["start", "progress", "complete"],
            vec!["progress", "start", "complete"],
            vec!["complete", "start", "progress"],
            vec!["start", "complete", "start", "fail"],
            vec!["progress", "fail", "complete"],
        ];

        for (i, sequence) in sequences.iter().enumerate() {
            let id = format!("t{}", i);
            let mut last_rank = 0;
            for step in sequence {
                match *step {
                    "start" => {
                        tracker.on_start("s", &start(&id), 1);
                    }
                    "progress" => {
                        tracker.on_progress("s", &progress(&id, "p"), 1);
                    }
                    "complete" => {
                        tracker.on_complete("s", &complete(&id, true), 1);
                    }
                    _ => {
                        tracker.on_complete("s", &complete(&id, false), 1);
                    }
                }
                let rank = tracker.get("s", &id).unwrap().status.rank();
                assert!(rank >= last_rank, "sequence {:?} regressed", sequence);
                last_rank = rank;
            }
        }

        assert_eq!(tracker.get("s", "t3").unwrap().status, ToolStatus::Complete);
        assert_eq!(tracker.get("s", "t4").unwrap().status, ToolStatus::Failed);
    }

    #[test]
    fn test_update_for_unseen_id_creates_pending() {
        let mut tracker = ToolExecutionTracker::new();
        let state = tracker.on_progress("s", &progress("t9", "queued"), 5).unwrap();
        assert_eq!(state.status, ToolStatus::Pending);
        assert!(state.name.is_none());

        let state = tracker.on_start("s", &start("t9"), 6).unwrap();
        assert_eq!(state.status, ToolStatus::Running);
        assert_eq!(state.name.as_deref(), Some("edit"));
    }

    #[test]
    fn test_late_diff_merges_idempotently() {
        let mut tracker = ToolExecutionTracker::new();
        tracker.on_start("s", &start("t1"), 1);
        tracker.on_complete("s", &complete("t1", true), 2);

        let once = tracker.on_diff("s", &diff("t1"), 3).unwrap();
        assert_eq!(once.status, ToolStatus::Complete);
        assert!(once.diff_data.is_some());

        assert!(tracker.on_diff("s", &diff("t1"), 4).is_none());
        assert_eq!(tracker.get("s", "t1").unwrap(), &once);
    }

    #[test]
    fn test_terminal_ignores_progress() {
        let mut tracker = ToolExecutionTracker::new();
        tracker.on_complete("s", &complete("t1", false), 1);
        assert!(tracker.on_progress("s", &progress("t1", "late"), 2).is_none());
        assert!(tracker.on_complete("s", &complete("t1", true), 3).is_none());
        assert_eq!(tracker.get("s", "t1").unwrap().status, ToolStatus::Failed);
    }

    #[test]
    fn test_grouping_closed_by_message() {
        let mut tracker = ToolExecutionTracker::new();
        tracker.on_start("s", &start("a"), 1);
        tracker.on_start("s", &start("b"), 2);
        tracker.on_message("s");
        tracker.on_start("s", &start("c"), 3);

        let a = tracker.get("s", "a").unwrap().group;
        let b = tracker.get("s", "b").unwrap().group;
        let c = tracker.get("s", "c").unwrap().group;
        assert_eq!(a, b);
        assert_ne!(b, c);
        assert_eq!(tracker.group("s", a).len(), 2);
    }

    #[test]
    fn test_sessions_isolated() {
        let mut tracker = ToolExecutionTracker::new();
        tracker.on_start("work", &start("t1"), 1);
        tracker.on_start("plan", &start("t1"), 1);
        tracker.on_complete("plan", &complete("t1", true), 2);

        assert_eq!(tracker.get("work", "t1").unwrap().status, ToolStatus::Running);
        tracker.clear("plan");
        assert!(tracker.tools("plan").is_empty());
    }

    #[test]
    fn test_state_serialization() {
        let mut tracker = ToolExecutionTracker::new();
        let state = tracker.on_start("s", &start("t1"), 1).unwrap();
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["toolCallId"], "t1");
        assert_eq!(json["status"], "running");
        assert!(json.get("diffData").is_none());
    }
}
