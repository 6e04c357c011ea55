//! The relay actor.
//!
//! A single task owns [`RelayState`]. The send loop, the receive loop and
//! external callers all go through [`ActorHandle`], which turns each
//! operation into a [`RelayCommand`] on a bounded queue. Commands are applied
//! one at a time, so a reset can never land in the middle of a send or
//! receive step. The device-bus handoff itself is committed here too: the
//! send loop only reserves a bus slot, and the actor publishes through it if
//! the message is still in flight when the reservation arrives.

use std::collections::HashMap;
use std::time::Duration;

use itemlink_core::{BusPermit, Error, HandoffError, Message, Result};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

use crate::dedup::Verdict;
use crate::state::{AckOutcome, RelayState, RelayStats, SendDecision, SendState};

/// Commands applied by the actor.
#[derive(Debug)]
pub(crate) enum RelayCommand {
    NextSend {
        now: Instant,
        reply: oneshot::Sender<SendDecision>,
    },
    Stage {
        message: Message,
        reply: oneshot::Sender<std::result::Result<(), Message>>,
    },
    CommitDelivery {
        unique_id: String,
        permit: BusPermit,
        at: Instant,
    },
    HandoffFailed(HandoffError),
    Acknowledge {
        acked_id: String,
        reply: oneshot::Sender<AckOutcome>,
    },
    Observe {
        unique_id: String,
        reply: oneshot::Sender<Verdict>,
    },
    Forwarded {
        ok: bool,
    },
    Reset {
        reply: oneshot::Sender<()>,
    },
    SetEffect {
        name: String,
        value: String,
    },
    GetEffect {
        name: String,
        reply: oneshot::Sender<Option<String>>,
    },
    GetEffects {
        reply: oneshot::Sender<HashMap<String, String>>,
    },
    SetPhase {
        phase: String,
    },
    GetPhase {
        reply: oneshot::Sender<String>,
    },
    GetStats {
        reply: oneshot::Sender<RelayStats>,
    },
}

/// Owns the relay state and applies commands in arrival order.
pub(crate) struct RelayActor {
    item_id: String,
    state: RelayState,
    resend_interval: Duration,
    commands: mpsc::Receiver<RelayCommand>,
    send_state: watch::Sender<SendState>,
}

impl RelayActor {
    /// Create the actor, its command handle and the send-state watch.
    pub(crate) fn new(
        item_id: String,
        dedup_capacity: usize,
        resend_interval: Duration,
        command_capacity: usize,
    ) -> (Self, ActorHandle, watch::Receiver<SendState>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(command_capacity);
        let (state_tx, state_rx) = watch::channel(SendState::Idle);
        let actor = Self {
            item_id: item_id.clone(),
            state: RelayState::new(dedup_capacity),
            resend_interval,
            commands: cmd_rx,
            send_state: state_tx,
        };
        let handle = ActorHandle {
            item_id,
            tx: cmd_tx,
        };
        (actor, handle, state_rx)
    }

    /// Apply commands until every handle is dropped.
    pub(crate) async fn run(mut self) {
        while let Some(command) = self.commands.recv().await {
            self.apply(command);
        }
        tracing::debug!("Relay actor for {} stopped", self.item_id);
    }

    /// Send-state changes are published before replying, so a caller that
    /// awaited the reply never reads a stale state.
    fn apply(&mut self, command: RelayCommand) {
        // Replies are best effort: a caller that gave up waiting is not an error.
        match command {
            RelayCommand::NextSend { now, reply } => {
                let _ = reply.send(self.state.next_send(now, self.resend_interval));
            }
            RelayCommand::Stage { message, reply } => {
                let result = self.state.stage(message);
                self.publish_send_state();
                if let Err(rejected) = &result {
                    tracing::warn!(
                        "Relay {} refused to stage {}: slot occupied or id empty",
                        self.item_id,
                        rejected.unique_id
                    );
                }
                let _ = reply.send(result);
            }
            RelayCommand::CommitDelivery {
                unique_id,
                permit,
                at,
            } => match self.state.in_flight_message(&unique_id) {
                Some(message) => {
                    permit.send(message);
                    self.state.record_delivery(&unique_id, at);
                }
                None => {
                    // Acked or reset while the slot was awaited; the permit
                    // is dropped unused.
                    tracing::debug!(
                        "Relay {} skipped {}: no longer in flight",
                        self.item_id,
                        unique_id
                    );
                }
            },
            RelayCommand::HandoffFailed(error) => self.state.record_handoff_failure(error),
            RelayCommand::Acknowledge { acked_id, reply } => {
                let outcome = self.state.acknowledge(&acked_id);
                self.publish_send_state();
                match outcome {
                    AckOutcome::Cleared => {
                        tracing::debug!("Relay {} acknowledged {}", self.item_id, acked_id)
                    }
                    AckOutcome::Stale => {
                        tracing::debug!("Relay {} ignored stale ack {}", self.item_id, acked_id)
                    }
                }
                let _ = reply.send(outcome);
            }
            RelayCommand::Observe { unique_id, reply } => {
                let _ = reply.send(self.state.observe(&unique_id));
            }
            RelayCommand::Forwarded { ok } => self.state.record_forward(ok),
            RelayCommand::Reset { reply } => {
                self.state.reset();
                self.publish_send_state();
                tracing::info!("Relay {} reset", self.item_id);
                let _ = reply.send(());
            }
            RelayCommand::SetEffect { name, value } => self.state.set_effect(name, value),
            RelayCommand::GetEffect { name, reply } => {
                let _ = reply.send(self.state.effect(&name));
            }
            RelayCommand::GetEffects { reply } => {
                let _ = reply.send(self.state.effects());
            }
            RelayCommand::SetPhase { phase } => self.state.set_phase(phase),
            RelayCommand::GetPhase { reply } => {
                let _ = reply.send(self.state.phase().to_string());
            }
            RelayCommand::GetStats { reply } => {
                let _ = reply.send(self.state.stats().clone());
            }
        }
    }

    fn publish_send_state(&self) {
        let current = self.state.send_state();
        self.send_state.send_if_modified(|published| {
            if *published == current {
                false
            } else {
                *published = current;
                true
            }
        });
    }
}

/// Cloneable handle for sending commands to the actor.
#[derive(Clone)]
pub(crate) struct ActorHandle {
    item_id: String,
    tx: mpsc::Sender<RelayCommand>,
}

impl ActorHandle {
    fn closed(&self) -> Error {
        Error::RelayClosed(self.item_id.clone())
    }

    async fn send(&self, command: RelayCommand) -> Result<()> {
        self.tx.send(command).await.map_err(|_| self.closed())
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> RelayCommand,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.send(build(reply)).await?;
        rx.await.map_err(|_| self.closed())
    }

    pub(crate) async fn next_send(&self, now: Instant) -> Result<SendDecision> {
        self.request(|reply| RelayCommand::NextSend { now, reply }).await
    }

    pub(crate) async fn stage(&self, message: Message) -> Result<std::result::Result<(), Message>> {
        self.request(|reply| RelayCommand::Stage { message, reply }).await
    }

    /// Publish the in-flight message through `permit` if it is still `unique_id`.
    pub(crate) async fn commit_delivery(
        &self,
        unique_id: String,
        permit: BusPermit,
        at: Instant,
    ) -> Result<()> {
        self.send(RelayCommand::CommitDelivery {
            unique_id,
            permit,
            at,
        })
        .await
    }

    pub(crate) async fn handoff_failed(&self, error: HandoffError) -> Result<()> {
        self.send(RelayCommand::HandoffFailed(error)).await
    }

    pub(crate) async fn acknowledge(&self, acked_id: String) -> Result<AckOutcome> {
        self.request(|reply| RelayCommand::Acknowledge { acked_id, reply })
            .await
    }

    pub(crate) async fn observe(&self, unique_id: String) -> Result<Verdict> {
        self.request(|reply| RelayCommand::Observe { unique_id, reply })
            .await
    }

    pub(crate) async fn forwarded(&self, ok: bool) -> Result<()> {
        self.send(RelayCommand::Forwarded { ok }).await
    }

    pub(crate) async fn reset(&self) -> Result<()> {
        self.request(|reply| RelayCommand::Reset { reply }).await
    }

    pub(crate) async fn set_effect(&self, name: String, value: String) -> Result<()> {
        self.send(RelayCommand::SetEffect { name, value }).await
    }

    pub(crate) async fn effect(&self, name: String) -> Result<Option<String>> {
        self.request(|reply| RelayCommand::GetEffect { name, reply })
            .await
    }

    pub(crate) async fn effects(&self) -> Result<HashMap<String, String>> {
        self.request(|reply| RelayCommand::GetEffects { reply }).await
    }

    pub(crate) async fn set_phase(&self, phase: String) -> Result<()> {
        self.send(RelayCommand::SetPhase { phase }).await
    }

    pub(crate) async fn phase(&self) -> Result<String> {
        self.request(|reply| RelayCommand::GetPhase { reply }).await
    }

    pub(crate) async fn stats(&self) -> Result<RelayStats> {
        self.request(|reply| RelayCommand::GetStats { reply }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use itemlink_core::MessageBus;

    fn spawn_actor() -> (ActorHandle, watch::Receiver<SendState>) {
        let (actor, handle, state_rx) =
            RelayActor::new("lamp".to_string(), 4, Duration::from_millis(1000), 8);
        tokio::spawn(actor.run());
        (handle, state_rx)
    }

    #[tokio::test]
    async fn test_stage_and_ack_publish_state() {
        let (actor, mut state_rx) = spawn_actor();
        let message = Message::report("lamp", Vec::new()).with_unique_id("lamp-1");

        actor.stage(message).await.unwrap().unwrap();
        state_rx.changed().await.unwrap();
        assert_eq!(
            *state_rx.borrow_and_update(),
            SendState::InFlight {
                unique_id: "lamp-1".to_string()
            }
        );

        assert_eq!(
            actor.acknowledge("lamp-1".to_string()).await.unwrap(),
            AckOutcome::Cleared
        );
        state_rx.changed().await.unwrap();
        assert!(state_rx.borrow().is_idle());
    }

    #[tokio::test]
    async fn test_commands_are_serialised_with_reset() {
        let (actor, _state_rx) = spawn_actor();

        assert_eq!(actor.observe("r1".to_string()).await.unwrap(), Verdict::New);
        actor
            .set_effect("smoke".to_string(), "on".to_string())
            .await
            .unwrap();
        actor.set_phase("playing".to_string()).await.unwrap();
        actor.reset().await.unwrap();

        assert_eq!(actor.observe("r1".to_string()).await.unwrap(), Verdict::New);
        assert!(actor.effects().await.unwrap().is_empty());
        assert_eq!(actor.phase().await.unwrap(), "");
        assert_eq!(actor.stats().await.unwrap().resets, 1);
    }

    #[tokio::test]
    async fn test_commit_after_reset_publishes_nothing() {
        let (actor, _state_rx) = spawn_actor();
        let (bus, mut rx) = MessageBus::channel("device", 1);
        let timeout = Duration::from_millis(100);
        let message = Message::report("lamp", Vec::new()).with_unique_id("lamp-1");
        actor.stage(message).await.unwrap().unwrap();

        let permit = bus.reserve(timeout).await.unwrap();
        actor.reset().await.unwrap();
        actor
            .commit_delivery("lamp-1".to_string(), permit, Instant::now())
            .await
            .unwrap();
        assert_eq!(actor.stats().await.unwrap().delivered, 0);
        assert!(rx.try_recv().is_none());

        // The unused permit was released
        let message = Message::report("lamp", Vec::new()).with_unique_id("lamp-2");
        actor.stage(message).await.unwrap().unwrap();
        let permit = bus.reserve(timeout).await.unwrap();
        actor
            .commit_delivery("lamp-2".to_string(), permit, Instant::now())
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap().unique_id, "lamp-2");
        assert_eq!(actor.stats().await.unwrap().delivered, 1);
    }

    #[tokio::test]
    async fn test_closed_actor() {
        let (actor, handle, _state_rx) =
            RelayActor::new("lamp".to_string(), 4, Duration::from_millis(1000), 8);
        drop(actor);

        assert!(matches!(handle.stats().await, Err(Error::RelayClosed(id)) if id == "lamp"));
    }
}
