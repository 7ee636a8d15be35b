//! # a3s-session
//!
//! Session lifecycle, event relay, and plan-mode coordination for
//! conversational coding agents.
//!
//! ## Overview
//!
//! `a3s-session` sits between an agent runtime (model inference, tool
//! execution, its own session store) and a display layer. It creates,
//! resumes and recovers sessions, relays the runtime's events to display
//! subscribers that survive session switches, tracks tool executions and
//! queued messages, and runs a restricted planning session next to the work
//! session.
//!
//! ## Quick Start
//!
//! ```rust
//! use a3s_session::{ChannelSink, CoreConfig, DisplayIntent, MemoryRuntime, SessionHost};
//!
//! # async fn example() -> a3s_session::Result<()> {
//! let (sink, mut display) = ChannelSink::new();
//! let host = SessionHost::new(MemoryRuntime::new(), sink, CoreConfig::default());
//! host.start().await?;
//!
//! host.handle_intent(DisplayIntent::CreateSession {
//!     model: Some("claude-sonnet-4.5".to_string()),
//!     cwd: "/work/repo".into(),
//! })
//! .await?;
//!
//! host.handle_raw_intent(r#"{"type": "sendMessage", "text": "Explain src/main.rs"}"#)
//!     .await?;
//!
//! while let Ok(message) = display.try_recv() {
//!     println!("{:?}", message);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Runtimes
//!
//! - **memory** — In-process runtime for testing and single-process use
//!
//! ## Architecture
//!
//! - **AgentRuntime** trait — the agent backend every runtime implements
//! - **EventRelay** / **RelayHub** — one typed relay per event kind with a
//!   swappable upstream
//! - **SessionCoordinator** — create/resume/switch/model change/destroy
//! - **RecoveryManager** — one-shot recreation after an expired session
//! - **PlanModeController** — work/plan dual-session workflow
//! - **ToolExecutionTracker** / **MessageQueueTracker** — display state
//! - **SessionHost** — composition root wired to a `DisplaySink`

pub mod config;
pub mod coordinator;
pub mod display;
pub mod emitter;
pub mod error;
pub mod event;
pub mod host;
pub mod permission;
pub mod plan;
pub mod queue;
pub mod recovery;
pub mod relay;
pub mod runtime;
pub mod tools;
pub mod types;

// Re-export core types
pub use config::CoreConfig;
pub use coordinator::SessionCoordinator;
pub use display::{
    ChannelSink, DisplayIntent, DisplayMessage, DisplaySink, MessageRole, StatusTransition,
};
pub use emitter::{Emitter, HandlerError, HandlerResult, Subscription};
pub use error::{classify, ErrorClass, Result, SessionError};
pub use event::{
    Envelope, EventData, EventKind, OutputText, RelayPayload, SessionEvent, StatusEvent,
    UsageUpdate,
};
pub use host::SessionHost;
pub use permission::{PermissionDecision, PermissionKind, PermissionPolicy, PermissionRequest};
pub use plan::{AcceptedPlan, ActiveCoordinator, PlanModeController};
pub use queue::MessageQueueTracker;
pub use recovery::{RecoveryManager, RecoveryPolicy};
pub use relay::{EventRelay, RelayHub, RelayStream};
pub use runtime::{AgentRuntime, SessionHandle};
pub use tools::{ToolExecutionState, ToolExecutionTracker, ToolStatus};
pub use types::{
    Attachment, McpServerConfig, OutgoingMessage, PendingMessage, PlanModeState, PlanPhase,
    Session, SessionMode, SessionNotice, SessionOptions, ToolConfig, UsageSnapshot,
};

// Re-export runtimes for convenience
pub use runtime::memory::{MemoryConfig, MemoryRuntime, RuntimeOp};
