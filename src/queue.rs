//! Inferred message queue
//!
//! The runtime queues sends made while a turn is running but only says
//! `pending_messages.modified`, without saying what changed. The queue is
//! reconstructed from turn boundaries instead: each turn start consumes the
//! oldest outstanding send, and `session.idle` means everything was drained.
//! A send that the runtime rejects is taken back out by id.

use crate::types::{OutgoingMessage, PendingMessage};
use std::collections::{HashSet, VecDeque};

#[derive(Debug, Default)]
pub struct MessageQueueTracker {
    in_turn: bool,
    /// Sends not yet picked up by a turn, oldest first
    outstanding: VecDeque<PendingMessage>,
    /// Ids of recorded sends the runtime has not acknowledged yet
    in_flight: HashSet<String>,
}

impl MessageQueueTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a send; returns the tracked message and whether it is queued
    /// behind an active turn or an earlier send
    pub fn on_send(&mut self, message: &OutgoingMessage) -> (PendingMessage, bool) {
        let queued = self.in_turn || !self.outstanding.is_empty();
        let pending = PendingMessage::from_outgoing(message);
        self.outstanding.push_back(pending.clone());
        self.in_flight.insert(pending.id.clone());
        (pending, queued)
    }

    /// The runtime accepted the send
    pub fn on_delivered(&mut self, id: &str) {
        self.in_flight.remove(id);
    }

    /// Take back a send the runtime rejected; false if it is not tracked here
    pub fn remove(&mut self, id: &str) -> bool {
        self.in_flight.remove(id);
        let before = self.outstanding.len();
        self.outstanding.retain(|m| m.id != id);
        self.outstanding.len() != before
    }

    /// State to carry onto a replacement session: only sends still in
    /// flight, which the replacement will receive on retry. Turn state and
    /// anything the dead session had accepted are dropped.
    pub fn carry_over(&mut self) -> Self {
        let in_flight = std::mem::take(&mut self.in_flight);
        let outstanding = self
            .outstanding
            .drain(..)
            .filter(|m| in_flight.contains(&m.id))
            .collect();
        self.in_turn = false;
        Self {
            in_turn: false,
            outstanding,
            in_flight,
        }
    }

    pub fn on_turn_start(&mut self) {
        // The runtime runs one turn at a time and every queued send gets its
        // own turn, so a turn start belongs to the oldest outstanding send.
        // A turn nobody asked for finds nothing outstanding and pops nothing.
        if !self.in_turn {
            self.in_turn = true;
            if let Some(consumed) = self.outstanding.pop_front() {
                self.in_flight.remove(&consumed.id);
            }
        }
    }

    pub fn on_turn_end(&mut self) {
        self.in_turn = false;
    }

    /// Queue fully drained
    pub fn on_idle(&mut self) {
        self.in_turn = false;
        self.outstanding.clear();
        self.in_flight.clear();
    }

    /// Upstream says its queue changed; the payload is never inspected
    pub fn on_queue_modified(&self) {
        tracing::debug!(
            in_turn = self.in_turn,
            outstanding = self.outstanding.len(),
            "Pending messages modified"
        );
    }

    /// Number of sends waiting behind the current or next turn
    pub fn queued_count(&self) -> usize {
        if self.in_turn {
            self.outstanding.len()
        } else {
            self.outstanding.len().saturating_sub(1)
        }
    }

    /// Messages waiting, oldest first
    pub fn queued(&self) -> Vec<PendingMessage> {
        let skip = if self.in_turn { 0 } else { 1 };
        self.outstanding.iter().skip(skip).cloned().collect()
    }

    pub fn in_turn(&self) -> bool {
        self.in_turn
    }

    /// Forget everything, e.g. after switching sessions
    pub fn reset(&mut self) {
        self.in_turn = false;
        self.outstanding.clear();
        self.in_flight.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(text: &str) -> OutgoingMessage {
        OutgoingMessage::text(text)
    }

    #[test]
    fn test_n_sends_before_first_turn() {
        for n in 1..=5 {
            let mut tracker = MessageQueueTracker::new();
            for i in 0..n {
                tracker.on_send(&msg(&format!("m{}", i)));
            }
            assert_eq!(tracker.queued_count(), n - 1);

            tracker.on_turn_start();
            assert_eq!(tracker.queued_count(), n - 1);

            tracker.on_idle();
            assert_eq!(tracker.queued_count(), 0);
        }
    }

    #[test]
    fn test_first_send_not_queued() {
        let mut tracker = MessageQueueTracker::new();
        let (_, queued) = tracker.on_send(&msg("a"));
        assert!(!queued);
        let (_, queued) = tracker.on_send(&msg("b"));
        assert!(queued);
    }

    #[test]
    fn test_send_during_turn_queued() {
        let mut tracker = MessageQueueTracker::new();
        tracker.on_send(&msg("a"));
        tracker.on_turn_start();
        assert_eq!(tracker.queued_count(), 0);

        let (pending, queued) = tracker.on_send(&msg("b"));
        assert!(queued);
        assert_eq!(tracker.queued(), vec![pending]);

        tracker.on_turn_end();
        tracker.on_turn_start();
        assert_eq!(tracker.queued_count(), 0);
    }

    #[test]
    fn test_repeated_turn_start_consumes_once() {
        let mut tracker = MessageQueueTracker::new();
        tracker.on_send(&msg("a"));
        tracker.on_send(&msg("b"));
        tracker.on_send(&msg("c"));
        tracker.on_turn_start();
        tracker.on_turn_start();
        assert_eq!(tracker.queued_count(), 2);
        assert_eq!(tracker.queued()[0].text, "b");
    }

    #[test]
    fn test_queue_modified_is_observational() {
        let mut tracker = MessageQueueTracker::new();
        tracker.on_send(&msg("a"));
        tracker.on_send(&msg("b"));
        tracker.on_queue_modified();
        assert_eq!(tracker.queued_count(), 1);
        tracker.reset();
        assert!(!tracker.in_turn());
        assert_eq!(tracker.queued_count(), 0);
    }

    #[test]
    fn test_rejected_send_taken_back() {
        let mut tracker = MessageQueueTracker::new();
        let (failed, _) = tracker.on_send(&msg("lost"));
        assert!(tracker.remove(&failed.id));
        assert!(!tracker.remove(&failed.id));

        let (real, queued) = tracker.on_send(&msg("real"));
        assert!(!queued);
        tracker.on_delivered(&real.id);
        tracker.on_turn_start();
        assert!(tracker.queued().is_empty());
    }

    #[test]
    fn test_carry_over_keeps_only_in_flight() {
        let mut tracker = MessageQueueTracker::new();
        let (first, _) = tracker.on_send(&msg("first"));
        tracker.on_delivered(&first.id);
        tracker.on_turn_start();
        let (accepted, _) = tracker.on_send(&msg("accepted"));
        tracker.on_delivered(&accepted.id);
        let (retrying, _) = tracker.on_send(&msg("retrying"));

        let mut carried = tracker.carry_over();
        assert!(!carried.in_turn());
        assert_eq!(tracker.queued_count(), 0);

        // The retried send is the replacement session's first turn
        assert!(carried.queued().is_empty());
        let (later, queued) = carried.on_send(&msg("later"));
        assert!(queued);
        carried.on_delivered(&retrying.id);
        carried.on_turn_start();
        assert_eq!(carried.queued(), vec![later]);
    }

    #[test]
    fn test_unprompted_turn_consumes_nothing() {
        let mut tracker = MessageQueueTracker::new();
        tracker.on_turn_start();
        let (pending, queued) = tracker.on_send(&msg("during"));
        assert!(queued);
        assert_eq!(tracker.queued(), vec![pending.clone()]);

        tracker.on_turn_end();
        assert!(tracker.queued().is_empty());
        tracker.on_turn_start();
        assert!(tracker.queued().is_empty());
        assert!(!tracker.remove(&pending.id));
    }
}
