//! Per-item relay handle.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use itemlink_core::{Message, RelayConfig, Result, SharedBus, SharedIdGenerator, UuidIdGenerator};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::actor::{ActorHandle, RelayActor};
use crate::queue::{self, QueueSender};
use crate::receive_loop::ReceiveLoop;
use crate::send_loop::SendLoop;
use crate::state::{RelayStats, SendState};

/// Reliability relay for one item.
///
/// Owns an actor task plus the send and receive loops. Outbound commands go
/// in through [`Relay::enqueue`]; device traffic for this item goes in
/// through [`Relay::deliver`]. Both buses are shared with every other relay
/// and outlive this one.
pub struct Relay {
    item_id: String,
    config: RelayConfig,
    actor: ActorHandle,
    outbound: QueueSender,
    inbound: QueueSender,
    send_state: watch::Receiver<SendState>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Relay {
    /// Start a relay with the default id generator.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        item_id: impl Into<String>,
        config: RelayConfig,
        device_bus: SharedBus,
        internal_bus: SharedBus,
    ) -> Result<Self> {
        Self::spawn_with_id_generator(
            item_id,
            config,
            device_bus,
            internal_bus,
            Arc::new(UuidIdGenerator),
        )
    }

    /// Start a relay that takes message ids from `ids`.
    pub fn spawn_with_id_generator(
        item_id: impl Into<String>,
        config: RelayConfig,
        device_bus: SharedBus,
        internal_bus: SharedBus,
        ids: SharedIdGenerator,
    ) -> Result<Self> {
        config.validate()?;
        let item_id = item_id.into();

        let (actor, handle, send_state) = RelayActor::new(
            item_id.clone(),
            config.dedup_capacity,
            config.resend_interval(),
            config.command_capacity,
        );
        let (outbound, outbound_rx) =
            queue::bounded(format!("outbound queue of {}", item_id), config.outbound_capacity);
        let (inbound, inbound_rx) =
            queue::bounded(format!("inbound queue of {}", item_id), config.inbound_capacity);

        let send_loop = SendLoop {
            item_id: item_id.clone(),
            actor: handle.clone(),
            outbound: outbound_rx,
            send_state: send_state.clone(),
            device_bus,
            ids,
            resend_interval: config.resend_interval(),
            handoff_timeout: config.handoff_timeout(),
        };
        let receive_loop = ReceiveLoop {
            item_id: item_id.clone(),
            actor: handle.clone(),
            inbound: inbound_rx,
            internal_bus,
            forward_timeout: config.forward_timeout(),
        };

        let span = tracing::info_span!("item", item_id = %item_id);
        let tasks = vec![
            tokio::spawn(actor.run().instrument(span.clone())),
            tokio::spawn(send_loop.run().instrument(span.clone())),
            tokio::spawn(receive_loop.run().instrument(span)),
        ];

        tracing::info!(
            "Relay {} started (resend {:?}, handoff timeout {:?}, dedup capacity {})",
            item_id,
            config.resend_interval(),
            config.handoff_timeout(),
            config.dedup_capacity
        );

        Ok(Self {
            item_id,
            config,
            actor: handle,
            outbound,
            inbound,
            send_state,
            tasks: Mutex::new(tasks),
        })
    }

    pub fn item_id(&self) -> &str {
        &self.item_id
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Queue an outbound message for the device. Its unique id is assigned
    /// when it is dequeued.
    pub fn enqueue(&self, message: Message) -> Result<()> {
        self.outbound.try_push(message)
    }

    /// Like [`Relay::enqueue`], waiting at most `timeout` for room.
    pub async fn enqueue_timeout(&self, message: Message, timeout: Duration) -> Result<()> {
        self.outbound.push_timeout(message, timeout).await
    }

    /// Hand device traffic for this item to the relay.
    pub fn deliver(&self, message: Message) -> Result<()> {
        self.inbound.try_push(message)
    }

    /// Like [`Relay::deliver`], waiting at most `timeout` for room.
    pub async fn deliver_timeout(&self, message: Message, timeout: Duration) -> Result<()> {
        self.inbound.push_timeout(message, timeout).await
    }

    /// Messages waiting in the outbound queue.
    pub fn outbound_len(&self) -> usize {
        self.outbound.len()
    }

    /// Clear the in-flight message, the duplicate detector and auxiliary
    /// state in one step. Queued messages are kept.
    pub async fn reset(&self) -> Result<()> {
        self.actor.reset().await
    }

    pub async fn set_effect(&self, name: impl Into<String>, value: impl Into<String>) -> Result<()> {
        self.actor.set_effect(name.into(), value.into()).await
    }

    pub async fn effect(&self, name: impl Into<String>) -> Result<Option<String>> {
        self.actor.effect(name.into()).await
    }

    pub async fn effects(&self) -> Result<HashMap<String, String>> {
        self.actor.effects().await
    }

    /// Set the phase marker.
    pub async fn set_phase(&self, phase: impl Into<String>) -> Result<()> {
        self.actor.set_phase(phase.into()).await
    }

    pub async fn phase(&self) -> Result<String> {
        self.actor.phase().await
    }

    pub async fn stats(&self) -> Result<RelayStats> {
        self.actor.stats().await
    }

    /// Current send state.
    pub fn send_state(&self) -> SendState {
        self.send_state.borrow().clone()
    }

    /// Watch send-state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<SendState> {
        self.send_state.clone()
    }

    /// Stop the actor and both loops. Queued messages are dropped.
    pub async fn shutdown(&self) {
        let tasks = self.take_tasks();
        if tasks.is_empty() {
            return;
        }
        for task in &tasks {
            task.abort();
        }
        for task in tasks {
            let _ = task.await;
        }
        tracing::info!("Relay {} shut down", self.item_id);
    }
}

impl Relay {
    fn take_tasks(&self) -> Vec<JoinHandle<()>> {
        let mut tasks = self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        tasks.drain(..).collect()
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        for task in self.take_tasks() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("item_id", &self.item_id)
            .field("send_state", &*self.send_state.borrow())
            .field("outbound_len", &self.outbound.len())
            .finish()
    }
}
