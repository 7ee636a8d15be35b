//! Session engine integration tests
//!
//! End-to-end tests driving `SessionHost` and the coordinators against the
//! in-memory runtime. Covers relay switching, tool tracking, queue
//! inference, resume and recovery, model changes, and the plan-mode
//! workflow.

use a3s_session::{
    ChannelSink, CoreConfig, DisplayIntent, DisplayMessage, ErrorClass, EventData, MemoryConfig,
    MemoryRuntime, OutputText, PermissionRequest, PlanPhase, RuntimeOp, Session, SessionError,
    SessionHost, SessionMode, SessionOptions, StatusEvent, StatusTransition, ToolStatus,
};
use a3s_session::event::{
    AssistantMessageData, DiffData, ModelChangeData, ToolCompleteData, ToolStartData, TurnData,
};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_test::{assert_err, assert_ok, assert_pending, assert_ready};

struct Harness {
    runtime: MemoryRuntime,
    host: SessionHost,
    display: UnboundedReceiver<DisplayMessage>,
    plan_dir: PathBuf,
}

impl Harness {
    async fn new(memory: MemoryConfig) -> Self {
        let plan_dir = std::env::temp_dir().join(format!("a3s-session-it-{}", uuid::Uuid::new_v4()));
        let config = CoreConfig {
            plan_dir: Some(plan_dir.clone()),
            ..Default::default()
        };
        let runtime = MemoryRuntime::with_config(memory);
        let (sink, display) = ChannelSink::new();
        let host = SessionHost::new(runtime.clone(), sink, config);
        assert_ok!(host.start().await);
        Self {
            runtime,
            host,
            display,
            plan_dir,
        }
    }

    async fn with_session(memory: MemoryConfig, model: &str) -> (Self, Session) {
        let mut harness = Self::new(memory).await;
        assert_ok!(
            harness
                .host
                .handle_intent(DisplayIntent::CreateSession {
                    model: Some(model.to_string()),
                    cwd: PathBuf::from("/work/repo"),
                })
                .await
        );
        let session = harness.host.work().session().await.unwrap();
        harness.drain();
        (harness, session)
    }

    fn drain(&mut self) -> Vec<DisplayMessage> {
        let mut out = Vec::new();
        while let Ok(message) = self.display.try_recv() {
            out.push(message);
        }
        out
    }

    fn emit(&self, session_id: &str, data: EventData) {
        assert_ok!(self.runtime.emit(session_id, data));
    }

    async fn cleanup(self) {
        let _ = tokio::fs::remove_dir_all(&self.plan_dir).await;
    }
}

fn transitions(messages: &[DisplayMessage]) -> Vec<StatusTransition> {
    messages
        .iter()
        .filter_map(|m| match m {
            DisplayMessage::Status { transition } => Some(transition.clone()),
            _ => None,
        })
        .collect()
}

fn send(text: &str) -> DisplayIntent {
    DisplayIntent::SendMessage {
        text: text.to_string(),
        attachments: vec![],
    }
}

fn turn() -> TurnData {
    TurnData { turn_id: None }
}

// ─── Relays & Plan Mode Switching ───────────────────────────────

#[tokio::test]
async fn test_plan_toggle_restores_work_relay_input() {
    let (mut h, work) = Harness::with_session(MemoryConfig::default(), "model-a").await;
    assert_eq!(h.host.relays().input_id(), Some(work.id.clone()));

    assert_ok!(h.host.handle_intent(DisplayIntent::TogglePlanMode).await);
    let plan_id = h.host.controller().state().plan_session_id.unwrap();
    assert_eq!(h.host.relays().input_id(), Some(plan_id.clone()));

    for i in 0..25 {
        h.emit(
            &plan_id,
            EventData::AssistantMessage(AssistantMessageData {
                message_id: format!("m{}", i),
                content: "exploring".to_string(),
            }),
        );
    }
    // Work-session events are not relayed while planning
    h.emit(
        &work.id,
        EventData::AssistantMessage(AssistantMessageData {
            message_id: "hidden".to_string(),
            content: "work".to_string(),
        }),
    );

    assert_ok!(h.host.handle_intent(DisplayIntent::TogglePlanMode).await);
    assert_eq!(h.host.relays().input_id(), Some(work.id.clone()));

    let appended: Vec<String> = h
        .drain()
        .into_iter()
        .filter_map(|m| match m {
            DisplayMessage::MessageAppend { session_id, .. } => Some(session_id),
            _ => None,
        })
        .collect();
    assert_eq!(appended.len(), 25);
    assert!(appended.iter().all(|id| *id == plan_id));

    h.cleanup().await;
}

#[tokio::test]
async fn test_relay_stream_receives_events() {
    let (h, work) = Harness::with_session(MemoryConfig::default(), "model-a").await;

    let mut stream = tokio_test::task::spawn(h.host.relays().output().stream());
    assert_pending!(stream.poll_next());

    h.emit(
        &work.id,
        EventData::AssistantMessage(AssistantMessageData {
            message_id: "m1".to_string(),
            content: "hello".to_string(),
        }),
    );
    match assert_ready!(stream.poll_next()) {
        Some(envelope) => {
            assert_eq!(envelope.session_id, work.id);
            assert!(matches!(envelope.payload, OutputText::Message(_)));
        }
        None => panic!("stream ended"),
    }

    h.cleanup().await;
}

// ─── Tool Tracking ──────────────────────────────────────────────

#[tokio::test]
async fn test_tool_lifecycle_with_late_diff() {
    let (mut h, work) = Harness::with_session(MemoryConfig::default(), "model-a").await;

    h.emit(
        &work.id,
        EventData::ToolExecutionStart(ToolStartData {
            tool_call_id: "call-1".to_string(),
            tool_name: "edit".to_string(),
            arguments: Some(serde_json::json!({"path": "src/lib.rs"})),
        }),
    );
    h.emit(
        &work.id,
        EventData::ToolExecutionComplete(ToolCompleteData {
            tool_call_id: "call-1".to_string(),
            success: true,
            result: Some("edited".to_string()),
            error: None,
        }),
    );
    let diff = DiffData {
        tool_call_id: "call-1".to_string(),
        file_path: PathBuf::from("src/lib.rs"),
        diff: "@@ -1 +1 @@".to_string(),
    };
    h.emit(&work.id, EventData::ToolDiffAvailable(diff.clone()));
    let after_first = h.host.tool_states(&work.id);
    h.emit(&work.id, EventData::ToolDiffAvailable(diff));
    let after_second = h.host.tool_states(&work.id);

    assert_eq!(after_first, after_second);
    assert_eq!(after_first[0].status, ToolStatus::Complete);
    assert!(after_first[0].diff_data.is_some());

    let messages = h.drain();
    let diffs = messages
        .iter()
        .filter(|m| matches!(m, DisplayMessage::DiffAvailable { .. }))
        .count();
    assert_eq!(diffs, 1);

    h.cleanup().await;
}

#[tokio::test]
async fn test_user_message_closes_tool_group() {
    let (h, work) = Harness::with_session(MemoryConfig::default(), "model-a").await;
    let tool = |id: &str| {
        EventData::ToolExecutionStart(ToolStartData {
            tool_call_id: id.to_string(),
            tool_name: "read".to_string(),
            arguments: None,
        })
    };

    assert_ok!(h.host.handle_intent(send("first")).await);
    h.emit(&work.id, tool("t1"));
    h.emit(&work.id, EventData::SessionIdle);
    assert_ok!(h.host.handle_intent(send("second")).await);
    h.emit(&work.id, tool("t2"));

    let states = h.host.tool_states(&work.id);
    assert_eq!(states.len(), 2);
    assert_ne!(states[0].group, states[1].group);

    h.cleanup().await;
}

// ─── Message Queue ──────────────────────────────────────────────

#[tokio::test]
async fn test_queue_inferred_from_turn_boundaries() {
    let (h, work) = Harness::with_session(MemoryConfig::default(), "model-a").await;

    for text in ["one", "two", "three", "four"] {
        assert_ok!(h.host.handle_intent(send(text)).await);
    }
    assert_eq!(h.host.queued_messages(&work.id).len(), 3);

    h.emit(&work.id, EventData::AssistantTurnStart(turn()));
    let queued = h.host.queued_messages(&work.id);
    assert_eq!(queued.len(), 3);
    assert_eq!(queued[0].text, "two");

    h.emit(&work.id, EventData::PendingMessagesModified);
    assert_eq!(h.host.queued_messages(&work.id).len(), 3);

    h.emit(&work.id, EventData::SessionIdle);
    assert!(h.host.queued_messages(&work.id).is_empty());

    h.cleanup().await;
}

#[tokio::test]
async fn test_rejected_send_leaves_queue() {
    let (mut h, work) = Harness::with_session(MemoryConfig::default(), "model-a").await;
    h.runtime.fail_next(RuntimeOp::Send, "connection closed");

    let err = assert_err!(h.host.handle_intent(send("lost")).await);
    assert_eq!(err.class(), ErrorClass::ConnectionClosed);
    assert!(h.host.queued_messages(&work.id).is_empty());
    let last_update = h.drain().into_iter().rev().find_map(|m| match m {
        DisplayMessage::QueueUpdated { queued, .. } => Some(queued),
        _ => None,
    });
    assert_eq!(last_update, Some(vec![]));

    assert_ok!(h.host.handle_intent(send("real")).await);
    assert!(h.host.queued_messages(&work.id).is_empty());
    h.emit(&work.id, EventData::AssistantTurnStart(turn()));
    assert!(h.host.queued_messages(&work.id).is_empty());

    h.cleanup().await;
}

#[tokio::test]
async fn test_queue_follows_recovered_session() {
    let (h, work) = Harness::with_session(MemoryConfig::default(), "model-a").await;
    h.runtime.expire(&work.id);

    assert_ok!(h.host.handle_intent(send("retried")).await);
    let fresh = h.host.work().session().await.unwrap();
    assert_ne!(fresh.id, work.id);
    assert!(h.host.queued_messages(&work.id).is_empty());

    assert_ok!(h.host.handle_intent(send("next")).await);
    h.emit(&fresh.id, EventData::AssistantTurnStart(turn()));
    let queued = h.host.queued_messages(&fresh.id);
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].text, "next");

    h.cleanup().await;
}

// ─── Resume, Model Change & Recovery ────────────────────────────

#[tokio::test]
async fn test_resume_uses_explicit_model() {
    let mut h = Harness::new(MemoryConfig {
        sticky_resume_model: true,
        ..Default::default()
    })
    .await;
    h.runtime.seed_session(
        Session::new("persisted", SessionMode::Work, "model-old", "/work/repo"),
        SessionOptions::new("model-old", "/work/repo"),
    );

    assert_ok!(
        h.host
            .handle_intent(DisplayIntent::SwitchSession {
                session_id: "persisted".to_string(),
                model: Some("model-new".to_string()),
                cwd: Some(PathBuf::from("/work/repo")),
            })
            .await
    );

    let session = h.host.work().session().await.unwrap();
    assert_eq!(session.id, "persisted");
    assert_eq!(session.model, "model-new");
    assert_eq!(h.runtime.session("persisted").unwrap().model, "model-new");
    assert!(transitions(&h.drain())
        .iter()
        .any(|t| matches!(t, StatusTransition::SessionReady { resumed: true, .. })));

    h.cleanup().await;
}

#[tokio::test]
async fn test_model_switch_scenario() {
    let (mut h, work) = Harness::with_session(
        MemoryConfig {
            auto_reply: true,
            ..Default::default()
        },
        "A",
    )
    .await;

    let changes = Arc::new(Mutex::new(Vec::<ModelChangeData>::new()));
    let c = Arc::clone(&changes);
    let _sub = h.host.relays().status().subscribe(move |env| {
        if let StatusEvent::ModelChanged(change) = &env.payload {
            c.lock().unwrap().push(change.clone());
        }
        Ok(())
    });

    assert_ok!(
        h.host
            .handle_intent(DisplayIntent::SwitchModel {
                model: "B".to_string(),
            })
            .await
    );
    assert_eq!(
        *changes.lock().unwrap(),
        vec![ModelChangeData {
            previous_model: Some("A".to_string()),
            new_model: "B".to_string(),
        }]
    );

    assert_ok!(h.host.handle_intent(send("after switch")).await);
    let usage_models: Vec<String> = h
        .drain()
        .into_iter()
        .filter_map(|m| match m {
            DisplayMessage::TokenUsage { model, .. } => Some(model),
            _ => None,
        })
        .collect();
    assert_eq!(usage_models, vec!["B".to_string()]);
    assert_eq!(h.host.work().session().await.unwrap().id, work.id);
    assert_eq!(h.runtime.call_count(RuntimeOp::Destroy), 0);

    h.cleanup().await;
}

#[tokio::test]
async fn test_expired_session_recovered_exactly_once() {
    let (mut h, work) = Harness::with_session(MemoryConfig::default(), "model-a").await;
    h.runtime.expire(&work.id);

    assert_ok!(h.host.handle_intent(send("still there?")).await);

    let fresh = h.host.work().session().await.unwrap();
    assert_ne!(fresh.id, work.id);
    assert_eq!(fresh.model, "model-a");
    assert_eq!(fresh.cwd, PathBuf::from("/work/repo"));
    assert_eq!(h.runtime.call_count(RuntimeOp::Create), 2);
    assert_eq!(h.runtime.sent(&fresh.id).len(), 1);
    assert_eq!(h.host.relays().input_id(), Some(fresh.id.clone()));

    let expired: Vec<StatusTransition> = transitions(&h.drain())
        .into_iter()
        .filter(|t| matches!(t, StatusTransition::SessionExpired { .. }))
        .collect();
    assert_eq!(expired.len(), 1);

    h.cleanup().await;
}

#[tokio::test]
async fn test_failed_recreation_is_fatal() {
    let (mut h, work) = Harness::with_session(MemoryConfig::default(), "model-a").await;
    h.runtime.expire(&work.id);
    h.runtime
        .fail_next(RuntimeOp::Create, "CLI protocol version mismatch: not authenticated");

    let err = assert_err!(h.host.handle_intent(send("hello")).await);
    assert!(matches!(err, SessionError::RecoveryFailed { .. }));
    assert_eq!(h.runtime.call_count(RuntimeOp::Create), 2);

    let fatal: Vec<StatusTransition> = transitions(&h.drain())
        .into_iter()
        .filter(|t| {
            matches!(
                t,
                StatusTransition::Fatal { .. } | StatusTransition::Error { .. }
            )
        })
        .collect();
    assert!(matches!(
        fatal.as_slice(),
        [StatusTransition::Fatal {
            class: ErrorClass::CliVersionIncompatible,
            ..
        }]
    ));

    h.cleanup().await;
}

#[tokio::test]
async fn test_runtime_error_event_classified() {
    let (mut h, work) = Harness::with_session(MemoryConfig::default(), "model-a").await;
    h.emit(
        &work.id,
        EventData::SessionError(a3s_session::event::SessionErrorData {
            error_type: Some("query".to_string()),
            message: "connection reset by peer".to_string(),
        }),
    );

    assert!(matches!(
        transitions(&h.drain()).as_slice(),
        [StatusTransition::Error {
            class: ErrorClass::ConnectionClosed,
            ..
        }]
    ));

    h.cleanup().await;
}

// ─── Plan Mode Workflow ─────────────────────────────────────────

#[tokio::test]
async fn test_plan_accept_sends_plan_to_work_session() {
    let (mut h, work) = Harness::with_session(MemoryConfig::default(), "model-a").await;

    assert_ok!(h.host.handle_intent(DisplayIntent::TogglePlanMode).await);
    let state = h.host.controller().state();
    let plan_id = state.plan_session_id.clone().unwrap();
    assert_eq!(state.phase, PlanPhase::PlanActive);

    // Messages typed while planning go to the plan session
    assert_ok!(h.host.handle_intent(send("plan the refactor")).await);
    assert_eq!(h.runtime.sent(&plan_id).len(), 1);
    assert!(h.runtime.sent(&work.id).is_empty());

    let artifact = h.host.controller().artifact_path().unwrap();
    let decision = assert_ok!(
        h.runtime
            .request_permission(&plan_id, &PermissionRequest::write(&artifact))
    );
    assert!(decision.is_approved());
    let decision = assert_ok!(
        h.runtime
            .request_permission(&plan_id, &PermissionRequest::shell("cargo build"))
    );
    assert!(!decision.is_approved());

    assert_ok!(tokio::fs::write(&artifact, "1. Split the parser module").await);
    h.emit(&plan_id, EventData::AssistantTurnStart(turn()));
    h.emit(&plan_id, EventData::AssistantTurnEnd(turn()));
    h.emit(&plan_id, EventData::SessionIdle);
    assert_eq!(h.host.controller().state().phase, PlanPhase::PlanReady);
    assert!(transitions(&h.drain())
        .iter()
        .any(|t| matches!(t, StatusTransition::PlanReady { .. })));

    assert_ok!(h.host.handle_intent(DisplayIntent::AcceptPlan).await);
    assert_eq!(h.host.relays().input_id(), Some(work.id.clone()));
    let sent = h.runtime.sent(&work.id);
    assert_eq!(sent.len(), 1);
    assert!(sent[0].text.contains("1. Split the parser module"));

    let messages = h.drain();
    assert!(transitions(&messages)
        .iter()
        .any(|t| matches!(t, StatusTransition::PlanAccepted { .. })));
    assert!(messages.iter().any(|m| matches!(
        m,
        DisplayMessage::PlanState { plan } if !plan.enabled
    )));

    h.cleanup().await;
}

#[tokio::test]
async fn test_plan_reject_keeps_plan_session() {
    let (h, _work) = Harness::with_session(MemoryConfig::default(), "model-a").await;

    assert_ok!(h.host.handle_intent(DisplayIntent::TogglePlanMode).await);
    let plan_id = h.host.controller().state().plan_session_id.unwrap();
    h.emit(&plan_id, EventData::AssistantTurnEnd(turn()));
    h.emit(&plan_id, EventData::SessionIdle);

    assert_ok!(h.host.handle_intent(DisplayIntent::RejectPlan).await);
    assert!(h.runtime.session(&plan_id).is_some());

    assert_ok!(h.host.handle_intent(DisplayIntent::TogglePlanMode).await);
    assert_eq!(
        h.host.controller().state().plan_session_id,
        Some(plan_id)
    );

    h.cleanup().await;
}

#[tokio::test]
async fn test_new_conversation_discards_plan_session() {
    let (h, _work) = Harness::with_session(MemoryConfig::default(), "model-a").await;

    assert_ok!(h.host.handle_intent(DisplayIntent::TogglePlanMode).await);
    let plan_id = h.host.controller().state().plan_session_id.unwrap();

    assert_ok!(
        h.host
            .handle_intent(DisplayIntent::CreateSession {
                model: None,
                cwd: PathBuf::from("/work/other"),
            })
            .await
    );
    assert!(h.runtime.session(&plan_id).is_none());
    assert!(!h.host.controller().state().enabled);

    let session = h.host.work().session().await.unwrap();
    assert_eq!(session.model, h.host.config().default_model);
    assert_eq!(h.host.relays().input_id(), Some(session.id));

    h.cleanup().await;
}

#[tokio::test]
async fn test_recovered_plan_session_reaches_ready() {
    let (mut h, _work) = Harness::with_session(MemoryConfig::default(), "model-a").await;
    assert_ok!(h.host.handle_intent(DisplayIntent::TogglePlanMode).await);
    let old_plan = h.host.controller().state().plan_session_id.unwrap();
    h.drain();

    h.runtime.expire(&old_plan);
    assert_ok!(h.host.handle_intent(send("revise step 2")).await);
    let new_plan = h.host.relays().input_id().unwrap();
    assert_ne!(new_plan, old_plan);
    assert_eq!(h.runtime.sent(&new_plan).len(), 1);

    let messages = h.drain();
    assert!(messages.iter().any(|m| matches!(
        m,
        DisplayMessage::PlanState { plan } if plan.plan_session_id.as_deref() == Some(new_plan.as_str())
    )));

    h.emit(&new_plan, EventData::AssistantTurnStart(turn()));
    h.emit(&new_plan, EventData::AssistantTurnEnd(turn()));
    h.emit(&new_plan, EventData::SessionIdle);
    assert_eq!(h.host.controller().state().phase, PlanPhase::PlanReady);

    h.cleanup().await;
}

#[tokio::test]
async fn test_send_during_toggle_reaches_plan_session() {
    let (h, work) = Harness::with_session(
        MemoryConfig {
            startup_delay: Some(std::time::Duration::from_millis(20)),
            ..Default::default()
        },
        "model-a",
    )
    .await;

    let (toggled, sent) = tokio::join!(
        h.host.handle_intent(DisplayIntent::TogglePlanMode),
        h.host.handle_intent(send("draft the plan")),
    );
    assert_ok!(toggled);
    assert_ok!(sent);

    let plan_id = h.host.controller().state().plan_session_id.unwrap();
    assert_eq!(h.runtime.sent(&plan_id).len(), 1);
    assert!(h.runtime.sent(&work.id).is_empty());

    h.cleanup().await;
}

// ─── Display Boundary ───────────────────────────────────────────

#[tokio::test]
async fn test_pick_attachments_filters_missing_files() {
    let (mut h, _work) = Harness::with_session(MemoryConfig::default(), "model-a").await;
    let existing = std::env::temp_dir().join(format!("a3s-attach-{}.txt", uuid::Uuid::new_v4()));
    assert_ok!(tokio::fs::write(&existing, "notes").await);

    assert_ok!(
        h.host
            .handle_intent(DisplayIntent::PickAttachments {
                paths: vec![existing.clone(), PathBuf::from("/definitely/not/here.txt")],
            })
            .await
    );

    match h.drain().as_slice() {
        [DisplayMessage::AttachmentsPicked { attachments }] => {
            assert_eq!(attachments.len(), 1);
            assert_eq!(attachments[0].path, existing);
        }
        other => panic!("unexpected messages {:?}", other),
    }

    let _ = tokio::fs::remove_file(&existing).await;
    h.cleanup().await;
}

#[tokio::test]
async fn test_dispose_releases_sessions() {
    let (h, work) = Harness::with_session(MemoryConfig::default(), "model-a").await;
    assert_ok!(h.host.dispose().await);

    assert!(h.runtime.session(&work.id).is_none());
    assert_eq!(h.host.relays().status().subscriber_count(), 0);
    h.cleanup().await;
}
