//! Event relays with a swappable upstream and stable downstream
//!
//! An `EventRelay` sits between a session's event stream and any number of
//! downstream subscribers. Its upstream input can be pointed at another
//! session at any time (plan-mode switch, resume, recovery) without the
//! subscribers noticing. Events that arrive before anyone subscribes are
//! buffered and flushed, in order, to the first subscriber.

use crate::emitter::{deliver, lock, Emitter, HandlerResult, Listener, Subscription};
use crate::event::{
    DiffData, Envelope, EventKind, OutputText, ReasoningData, RelayPayload, SessionErrorData,
    SessionEvent, StatusEvent, ToolCompleteData, ToolProgressData, ToolStartData, UsageUpdate,
};
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::Stream;

struct RelayInput {
    source_id: String,
    _subscription: Subscription,
}

struct OutputState<T> {
    next_id: u64,
    listeners: Vec<(u64, Listener<Envelope<T>>)>,
    buffer: VecDeque<Envelope<T>>,
    /// Set once the first subscriber registers; buffering stops for good
    primed: bool,
    flushing: bool,
}

struct RelayOutput<T> {
    state: Mutex<OutputState<T>>,
}

impl<T: RelayPayload> RelayOutput<T> {
    fn push(&self, envelope: Envelope<T>) {
        let listeners = {
            let mut state = lock(&self.state);
            if !state.primed || state.flushing {
                state.buffer.push_back(envelope);
                return;
            }
            snapshot(&state.listeners)
        };

        for listener in &listeners {
            deliver(T::KIND.as_str(), listener, &envelope);
        }
    }

    fn flush(&self) {
        loop {
            let (envelope, listeners) = {
                let mut state = lock(&self.state);
                match state.buffer.pop_front() {
                    Some(envelope) => (envelope, snapshot(&state.listeners)),
                    None => {
                        state.flushing = false;
                        return;
                    }
                }
            };

            for listener in &listeners {
                deliver(T::KIND.as_str(), listener, &envelope);
            }
        }
    }
}

fn snapshot<T>(listeners: &[(u64, Listener<T>)]) -> Vec<Listener<T>> {
    listeners.iter().map(|(_, l)| Arc::clone(l)).collect()
}

/// Relay for one event kind
pub struct EventRelay<T: RelayPayload> {
    input: Mutex<Option<RelayInput>>,
    output: Arc<RelayOutput<T>>,
}

impl<T: RelayPayload> Default for EventRelay<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: RelayPayload> EventRelay<T> {
    /// Create a relay with no input and no subscribers
    pub fn new() -> Self {
        Self {
            input: Mutex::new(None),
            output: Arc::new(RelayOutput {
                state: Mutex::new(OutputState {
                    next_id: 0,
                    listeners: Vec::new(),
                    buffer: VecDeque::new(),
                    primed: false,
                    flushing: false,
                }),
            }),
        }
    }

    /// Kind carried by this relay
    pub fn kind(&self) -> EventKind {
        T::KIND
    }

    /// Point the relay at a new upstream source
    ///
    /// The previous upstream subscription is disposed first. Downstream
    /// subscribers are untouched.
    pub fn set_input(&self, source_id: &str, source: &Emitter<SessionEvent>) {
        let mut input = lock(&self.input);
        input.take();

        let output = Arc::clone(&self.output);
        let subscription = source.subscribe(move |event: &SessionEvent| -> HandlerResult {
            if let Some(envelope) = T::envelope(event) {
                output.push(envelope);
            }
            Ok(())
        });

        *input = Some(RelayInput {
            source_id: source_id.to_string(),
            _subscription: subscription,
        });

        tracing::debug!(kind = T::KIND.as_str(), source = %source_id, "Relay input set");
    }

    /// Detach from the current upstream source, if any
    pub fn clear_input(&self) {
        if let Some(previous) = lock(&self.input).take() {
            tracing::debug!(kind = T::KIND.as_str(), source = %previous.source_id, "Relay input cleared");
        }
    }

    /// Id of the session currently feeding this relay
    pub fn input_id(&self) -> Option<String> {
        lock(&self.input).as_ref().map(|i| i.source_id.clone())
    }

    /// Register a downstream handler
    ///
    /// The first registration ever flushes any buffered events to the
    /// handler before this call returns. Dropping the subscription
    /// unsubscribes.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&Envelope<T>) -> HandlerResult + Send + Sync + 'static,
    {
        let listener: Listener<Envelope<T>> = Arc::new(handler);
        let (id, flush) = {
            let mut state = lock(&self.output.state);
            let id = state.next_id;
            state.next_id += 1;
            state.listeners.push((id, listener));

            let first = !state.primed;
            state.primed = true;
            let flush = first && !state.buffer.is_empty();
            if flush {
                state.flushing = true;
            }
            (id, flush)
        };

        if flush {
            self.output.flush();
        }

        let weak = Arc::downgrade(&self.output);
        Subscription::new(move || {
            if let Some(output) = weak.upgrade() {
                lock(&output.state).listeners.retain(|(entry, _)| *entry != id);
            }
        })
    }

    /// Consume the relay as an async stream
    ///
    /// Counts as a subscriber: the first stream or handler flushes the buffer.
    pub fn stream(&self) -> RelayStream<T> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let subscription = self.subscribe(move |envelope| {
            // Receiver gone means the stream was dropped mid-delivery
            let _ = tx.send(envelope.clone());
            Ok(())
        });
        RelayStream {
            inner: UnboundedReceiverStream::new(rx),
            _subscription: subscription,
        }
    }

    /// Number of downstream subscribers
    pub fn subscriber_count(&self) -> usize {
        lock(&self.output.state).listeners.len()
    }

    /// Number of events waiting for the first subscriber
    pub fn buffered_len(&self) -> usize {
        lock(&self.output.state).buffer.len()
    }
}

/// Async stream over a relay's events
pub struct RelayStream<T: RelayPayload> {
    inner: UnboundedReceiverStream<Envelope<T>>,
    _subscription: Subscription,
}

impl<T: RelayPayload> Stream for RelayStream<T> {
    type Item = Envelope<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// One relay per event kind, rebound together
pub struct RelayHub {
    output: EventRelay<OutputText>,
    reasoning: EventRelay<ReasoningData>,
    tool_start: EventRelay<ToolStartData>,
    tool_update: EventRelay<ToolProgressData>,
    tool_complete: EventRelay<ToolCompleteData>,
    usage: EventRelay<UsageUpdate>,
    status: EventRelay<StatusEvent>,
    diff: EventRelay<DiffData>,
    error: EventRelay<SessionErrorData>,
}

impl Default for RelayHub {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayHub {
    /// Create a hub with every relay unbound
    pub fn new() -> Self {
        Self {
            output: EventRelay::new(),
            reasoning: EventRelay::new(),
            tool_start: EventRelay::new(),
            tool_update: EventRelay::new(),
            tool_complete: EventRelay::new(),
            usage: EventRelay::new(),
            status: EventRelay::new(),
            diff: EventRelay::new(),
            error: EventRelay::new(),
        }
    }

    /// Point every relay at one session's event stream
    pub fn set_input(&self, source_id: &str, source: &Emitter<SessionEvent>) {
        self.output.set_input(source_id, source);
        self.reasoning.set_input(source_id, source);
        self.tool_start.set_input(source_id, source);
        self.tool_update.set_input(source_id, source);
        self.tool_complete.set_input(source_id, source);
        self.usage.set_input(source_id, source);
        self.status.set_input(source_id, source);
        self.diff.set_input(source_id, source);
        self.error.set_input(source_id, source);
        tracing::info!(session_id = %source_id, "Relays bound to session");
    }

    /// Detach every relay from its source
    pub fn clear_input(&self) {
        self.output.clear_input();
        self.reasoning.clear_input();
        self.tool_start.clear_input();
        self.tool_update.clear_input();
        self.tool_complete.clear_input();
        self.usage.clear_input();
        self.status.clear_input();
        self.diff.clear_input();
        self.error.clear_input();
    }

    /// Input id per kind
    pub fn input_ids(&self) -> Vec<(EventKind, Option<String>)> {
        vec![
            (self.output.kind(), self.output.input_id()),
            (self.reasoning.kind(), self.reasoning.input_id()),
            (self.tool_start.kind(), self.tool_start.input_id()),
            (self.tool_update.kind(), self.tool_update.input_id()),
            (self.tool_complete.kind(), self.tool_complete.input_id()),
            (self.usage.kind(), self.usage.input_id()),
            (self.status.kind(), self.status.input_id()),
            (self.diff.kind(), self.diff.input_id()),
            (self.error.kind(), self.error.input_id()),
        ]
    }

    /// Session feeding every relay, or `None` if unbound or inconsistent
    pub fn input_id(&self) -> Option<String> {
        let ids = self.input_ids();
        let first = ids.first().and_then(|(_, id)| id.clone())?;
        ids.iter()
            .all(|(_, id)| id.as_deref() == Some(first.as_str()))
            .then_some(first)
    }

    pub fn output(&self) -> &EventRelay<OutputText> {
        &self.output
    }

    pub fn reasoning(&self) -> &EventRelay<ReasoningData> {
        &self.reasoning
    }

    pub fn tool_start(&self) -> &EventRelay<ToolStartData> {
        &self.tool_start
    }

    pub fn tool_update(&self) -> &EventRelay<ToolProgressData> {
        &self.tool_update
    }

    pub fn tool_complete(&self) -> &EventRelay<ToolCompleteData> {
        &self.tool_complete
    }

    pub fn usage(&self) -> &EventRelay<UsageUpdate> {
        &self.usage
    }

    pub fn status(&self) -> &EventRelay<StatusEvent> {
        &self.status
    }

    pub fn diff(&self) -> &EventRelay<DiffData> {
        &self.diff
    }

    pub fn error(&self) -> &EventRelay<SessionErrorData> {
        &self.error
    }
}
