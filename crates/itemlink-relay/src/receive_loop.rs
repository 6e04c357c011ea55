//! Inbound side of a relay.
//!
//! Acknowledgments are matched against the in-flight id by the actor.
//! Everything else, including unrecognised type tags, is treated as a report:
//! deduplicated and, if new, forwarded to the internal bus within a bounded
//! wait so one slow consumer cannot stall deduplication.

use std::time::Duration;

use itemlink_core::{Message, SharedBus};

use crate::actor::ActorHandle;
use crate::dedup::Verdict;
use crate::queue::QueueReceiver;

pub(crate) struct ReceiveLoop {
    pub(crate) item_id: String,
    pub(crate) actor: ActorHandle,
    pub(crate) inbound: QueueReceiver,
    pub(crate) internal_bus: SharedBus,
    pub(crate) forward_timeout: Duration,
}

impl ReceiveLoop {
    pub(crate) async fn run(mut self) {
        while let Some(message) = self.inbound.recv().await {
            if self.handle(message).await.is_err() {
                break;
            }
        }
        tracing::debug!("Receive loop for {} stopped", self.item_id);
    }

    async fn handle(&self, message: Message) -> itemlink_core::Result<()> {
        if message.msg_type.is_acknowledgment() {
            match message.acknowledged_id() {
                Some(acked_id) => {
                    self.actor.acknowledge(acked_id.to_string()).await?;
                }
                None => {
                    tracing::debug!(
                        "Relay {} dropped acknowledgment {} without a reference",
                        self.item_id,
                        message.unique_id
                    );
                }
            }
            return Ok(());
        }

        match self.actor.observe(message.unique_id.clone()).await? {
            Verdict::New => self.forward(message).await,
            Verdict::Duplicate => {
                tracing::debug!("Relay {} dropped duplicate {}", self.item_id, message.unique_id);
                Ok(())
            }
        }
    }

    async fn forward(&self, message: Message) -> itemlink_core::Result<()> {
        let unique_id = message.unique_id.clone();
        match self.internal_bus.offer(message, self.forward_timeout).await {
            Ok(()) => self.actor.forwarded(true).await,
            Err(e) => {
                tracing::warn!(
                    "Relay {} could not forward {} to {}: {}",
                    self.item_id,
                    unique_id,
                    self.internal_bus.name(),
                    e
                );
                self.actor.forwarded(false).await
            }
        }
    }
}
