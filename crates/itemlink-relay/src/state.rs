//! Per-relay state and its transitions.
//!
//! [`RelayState`] is plain data: the in-flight slot, the duplicate detector,
//! auxiliary item state and counters. It is only ever touched by the relay
//! actor, which applies one command at a time, so every method here runs to
//! completion without interleaving.

use std::collections::HashMap;
use std::time::Duration;

use itemlink_core::{is_empty_id, HandoffError, Message};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::dedup::{DuplicateDetector, Verdict};

/// Observable state of the send side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SendState {
    /// Nothing awaits acknowledgment.
    Idle,
    /// One message has been staged and awaits acknowledgment.
    InFlight { unique_id: String },
}

impl SendState {
    pub fn is_idle(&self) -> bool {
        matches!(self, SendState::Idle)
    }
}

/// What the send loop should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendDecision {
    /// Nothing in flight: take the next outbound message.
    Idle,
    /// Hand the in-flight message with this id to the device bus now.
    Deliver(String),
    /// In flight and not yet due for resend.
    WaitUntil(Instant),
}

/// Result of matching an acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// Matched the in-flight id; the slot is now empty.
    Cleared,
    /// Did not match; nothing changed.
    Stale,
}

/// Counters kept per relay. Not cleared by reset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayStats {
    /// First successful handoff of a staged message
    pub delivered: u64,
    /// Later successful handoffs of the same message
    pub resent: u64,
    pub handoff_timeouts: u64,
    /// Handoffs refused because the device bus was closed
    pub bus_closed: u64,
    pub acknowledged: u64,
    pub stale_acknowledgments: u64,
    pub forwarded: u64,
    pub duplicates: u64,
    pub forward_failures: u64,
    pub resets: u64,
    /// Unix millis of the last successful handoff
    pub last_delivered_at: Option<i64>,
}

#[derive(Debug, Clone)]
struct InFlight {
    message: Message,
    /// Last successful handoff; `None` until the bus accepts it once.
    delivered_at: Option<Instant>,
}

/// Everything a relay owns besides its queues and buses.
#[derive(Debug)]
pub struct RelayState {
    in_flight: Option<InFlight>,
    detector: DuplicateDetector,
    effects: HashMap<String, String>,
    phase: String,
    stats: RelayStats,
}

impl RelayState {
    pub fn new(dedup_capacity: usize) -> Self {
        Self {
            in_flight: None,
            detector: DuplicateDetector::new(dedup_capacity),
            effects: HashMap::new(),
            phase: String::new(),
            stats: RelayStats::default(),
        }
    }

    pub fn send_state(&self) -> SendState {
        match &self.in_flight {
            Some(slot) => SendState::InFlight {
                unique_id: slot.message.unique_id.clone(),
            },
            None => SendState::Idle,
        }
    }

    /// Decide the next send step at `now`.
    ///
    /// A staged message the bus has never accepted is due immediately; after
    /// that it is due once `resend_interval` has passed since the last
    /// successful handoff. Timed-out handoffs do not restart the interval.
    pub fn next_send(&self, now: Instant, resend_interval: Duration) -> SendDecision {
        let Some(slot) = &self.in_flight else {
            return SendDecision::Idle;
        };
        match slot.delivered_at {
            None => SendDecision::Deliver(slot.message.unique_id.clone()),
            Some(at) => {
                let due = at + resend_interval;
                if now >= due {
                    SendDecision::Deliver(slot.message.unique_id.clone())
                } else {
                    SendDecision::WaitUntil(due)
                }
            }
        }
    }

    /// Put `message` in flight. Hands it back if the slot is taken.
    pub fn stage(&mut self, message: Message) -> Result<(), Message> {
        if self.in_flight.is_some() || is_empty_id(&message.unique_id) {
            return Err(message);
        }
        self.in_flight = Some(InFlight {
            message,
            delivered_at: None,
        });
        Ok(())
    }

    /// A copy of the in-flight message, if its id is `unique_id`.
    pub fn in_flight_message(&self, unique_id: &str) -> Option<Message> {
        self.in_flight
            .as_ref()
            .filter(|slot| slot.message.unique_id == unique_id)
            .map(|slot| slot.message.clone())
    }

    /// The bus accepted `unique_id` at `at`.
    ///
    /// Ignored if that message is no longer in flight (acked or reset while
    /// the handoff was pending).
    pub fn record_delivery(&mut self, unique_id: &str, at: Instant) -> bool {
        let Some(slot) = self.in_flight.as_mut() else {
            return false;
        };
        if slot.message.unique_id != unique_id {
            return false;
        }
        if slot.delivered_at.is_some() {
            self.stats.resent += 1;
        } else {
            self.stats.delivered += 1;
        }
        slot.delivered_at = Some(at);
        self.stats.last_delivered_at = Some(chrono::Utc::now().timestamp_millis());
        true
    }

    pub fn record_handoff_failure(&mut self, error: HandoffError) {
        match error {
            HandoffError::Timeout => self.stats.handoff_timeouts += 1,
            HandoffError::Closed => self.stats.bus_closed += 1,
        }
    }

    /// Match an acknowledgment against the in-flight id.
    pub fn acknowledge(&mut self, acked_id: &str) -> AckOutcome {
        let matches = !is_empty_id(acked_id)
            && self
                .in_flight
                .as_ref()
                .is_some_and(|slot| slot.message.unique_id == acked_id);

        if matches {
            self.in_flight = None;
            self.stats.acknowledged += 1;
            AckOutcome::Cleared
        } else {
            self.stats.stale_acknowledgments += 1;
            AckOutcome::Stale
        }
    }

    /// Run a report id through the duplicate detector.
    pub fn observe(&mut self, unique_id: &str) -> Verdict {
        let verdict = self.detector.observe(unique_id);
        if verdict == Verdict::Duplicate {
            self.stats.duplicates += 1;
        }
        verdict
    }

    pub fn record_forward(&mut self, forwarded: bool) {
        if forwarded {
            self.stats.forwarded += 1;
        } else {
            self.stats.forward_failures += 1;
        }
    }

    /// Back to construction-time defaults for everything per-round.
    pub fn reset(&mut self) {
        self.in_flight = None;
        self.detector.clear();
        self.effects.clear();
        self.phase.clear();
        self.stats.resets += 1;
    }

    pub fn set_effect(&mut self, name: String, value: String) {
        self.effects.insert(name, value);
    }

    pub fn effect(&self, name: &str) -> Option<String> {
        self.effects.get(name).cloned()
    }

    pub fn effects(&self) -> HashMap<String, String> {
        self.effects.clone()
    }

    pub fn set_phase(&mut self, phase: String) {
        self.phase = phase;
    }

    pub fn phase(&self) -> &str {
        &self.phase
    }

    pub fn detector(&self) -> &DuplicateDetector {
        &self.detector
    }

    pub fn stats(&self) -> &RelayStats {
        &self.stats
    }
}
