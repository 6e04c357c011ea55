//! Outbound side of a relay.
//!
//! Drains the outbound queue one message at a time. A dequeued message gets
//! a fresh unique id, is staged with the actor and handed to the device bus;
//! it stays in flight, and is re-offered every resend interval, until the
//! receive loop reports a matching acknowledgment. The loop sleeps on the
//! resend deadline or a send-state change, never spinning.

use std::time::Duration;

use itemlink_core::{HandoffError, Message, SharedBus, SharedIdGenerator};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::actor::ActorHandle;
use crate::queue::QueueReceiver;
use crate::state::{SendDecision, SendState};

/// Ids tried for one outbound message before it is dropped.
const MAX_ID_ATTEMPTS: usize = 3;

pub(crate) struct SendLoop {
    pub(crate) item_id: String,
    pub(crate) actor: ActorHandle,
    pub(crate) outbound: QueueReceiver,
    pub(crate) send_state: watch::Receiver<SendState>,
    pub(crate) device_bus: SharedBus,
    pub(crate) ids: SharedIdGenerator,
    pub(crate) resend_interval: Duration,
    pub(crate) handoff_timeout: Duration,
}

impl SendLoop {
    pub(crate) async fn run(mut self) {
        loop {
            let decision = match self.actor.next_send(Instant::now()).await {
                Ok(decision) => decision,
                Err(_) => break,
            };

            let proceed = match decision {
                SendDecision::Idle => match self.outbound.recv().await {
                    Some(message) => self.stage(message).await,
                    None => false,
                },
                SendDecision::Deliver(unique_id) => self.hand_off(unique_id).await,
                SendDecision::WaitUntil(deadline) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(deadline) => true,
                        changed = self.send_state.changed() => changed.is_ok(),
                    }
                }
            };
            if !proceed {
                break;
            }
        }
        tracing::debug!("Send loop for {} stopped", self.item_id);
    }

    fn assign_id(&self, mut message: Message) -> Message {
        message.unique_id = self.ids.generate(&message.publisher);
        tracing::debug!("Relay {} dequeued {}", self.item_id, message.unique_id);
        message
    }

    /// Give a dequeued message an id and put it in flight.
    ///
    /// Only this loop stages, so a refusal means the generated id was empty.
    /// A fresh id is tried a few times before the message is dropped.
    async fn stage(&self, mut message: Message) -> bool {
        for _ in 0..MAX_ID_ATTEMPTS {
            message = self.assign_id(message);
            match self.actor.stage(message).await {
                Ok(Ok(())) => return true,
                Ok(Err(refused)) => message = refused,
                Err(_) => return false,
            }
        }
        tracing::warn!(
            "Relay {} dropped an outbound message from {}: no usable id after {} attempts",
            self.item_id,
            message.publisher,
            MAX_ID_ATTEMPTS
        );
        true
    }

    /// One bounded handoff attempt. Returns `false` once the actor is gone.
    ///
    /// Only a bus slot is reserved here; the actor publishes through it, so an
    /// ack or reset that lands during the wait keeps the message off the bus.
    async fn hand_off(&self, unique_id: String) -> bool {
        let result = match self.device_bus.reserve(self.handoff_timeout).await {
            Ok(permit) => {
                tracing::debug!("Relay {} handing {} to the device bus", self.item_id, unique_id);
                self.actor
                    .commit_delivery(unique_id, permit, Instant::now())
                    .await
            }
            Err(HandoffError::Timeout) => {
                tracing::warn!(
                    "Relay {}: device bus {} saturated, {} stays in flight",
                    self.item_id,
                    self.device_bus.name(),
                    unique_id
                );
                self.actor.handoff_failed(HandoffError::Timeout).await
            }
            Err(HandoffError::Closed) => {
                tracing::warn!(
                    "Relay {}: device bus {} closed, retrying {} in {:?}",
                    self.item_id,
                    self.device_bus.name(),
                    unique_id,
                    self.resend_interval
                );
                let result = self.actor.handoff_failed(HandoffError::Closed).await;
                tokio::time::sleep(self.resend_interval).await;
                result
            }
        };
        result.is_ok()
    }
}
