//! Shared message buses.
//!
//! A [`MessageBus`] is the handle relays use to publish onto one of the two
//! system-wide channels: the device-facing publish bus and the internal
//! distribution bus. Both are bounded; a publisher that cannot place a
//! message within its timeout gets [`HandoffError::Timeout`] back instead of
//! blocking forever.
//!
//! Buses are owned by the surrounding system and shared by every relay via
//! [`SharedBus`]. The consuming side ([`BusReceiver`]) belongs to whatever
//! transport drains the bus.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{SendTimeoutError, TryRecvError};

use crate::message::Message;

/// A reserved slot on a bus. Sending through it cannot block or fail.
pub type BusPermit = mpsc::OwnedPermit<Message>;

/// Default channel capacity for a bus.
pub const DEFAULT_BUS_CAPACITY: usize = 1000;

/// Why a message could not be placed on a bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HandoffError {
    /// The bus stayed full for the whole timeout.
    #[error("bus saturated, handoff timed out")]
    Timeout,

    /// The consuming side of the bus is gone.
    #[error("bus closed")]
    Closed,
}

/// Bounded multi-producer bus handle.
#[derive(Clone)]
pub struct MessageBus {
    tx: mpsc::Sender<Message>,
    /// Bus name for identification
    name: String,
}

impl MessageBus {
    /// Create a bus with the default capacity.
    pub fn new(name: impl Into<String>) -> (Self, BusReceiver) {
        Self::channel(name, DEFAULT_BUS_CAPACITY)
    }

    /// Create a bus with the specified capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn channel(name: impl Into<String>, capacity: usize) -> (Self, BusReceiver) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx,
                name: name.into(),
            },
            BusReceiver { rx },
        )
    }

    /// Get the name of this bus.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Free slots currently available.
    pub fn available(&self) -> usize {
        self.tx.capacity()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Offer a message, waiting at most `timeout` for room.
    pub async fn offer(&self, message: Message, timeout: Duration) -> Result<(), HandoffError> {
        match self.tx.send_timeout(message, timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(HandoffError::Timeout),
            Err(SendTimeoutError::Closed(_)) => Err(HandoffError::Closed),
        }
    }

    /// Reserve one slot, waiting at most `timeout` for room.
    ///
    /// The message is chosen when the permit is used, so the caller can still
    /// decide not to publish after the wait. Dropping the permit frees the slot.
    pub async fn reserve(&self, timeout: Duration) -> Result<BusPermit, HandoffError> {
        match tokio::time::timeout(timeout, self.tx.clone().reserve_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(HandoffError::Closed),
            Err(_) => Err(HandoffError::Timeout),
        }
    }
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("name", &self.name)
            .field("available", &self.available())
            .finish()
    }
}

/// Shared bus handle.
///
/// Passed once to every relay at construction; relays never own or close it.
pub type SharedBus = Arc<MessageBus>;

/// Consuming side of a bus.
pub struct BusReceiver {
    rx: mpsc::Receiver<Message>,
}

impl BusReceiver {
    /// Receive the next message.
    ///
    /// Returns `None` once every [`MessageBus`] handle has been dropped.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&mut self) -> Option<Message> {
        match self.rx.try_recv() {
            Ok(msg) => Some(msg),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Drain everything currently buffered.
    pub fn drain(&mut self) -> Vec<Message> {
        let mut drained = Vec::new();
        while let Some(msg) = self.try_recv() {
            drained.push(msg);
        }
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_offer_and_recv() {
        let (bus, mut rx) = MessageBus::channel("device", 4);
        bus.offer(Message::report("lamp", Vec::new()), Duration::from_millis(10))
            .await
            .unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.publisher, "lamp");
        assert_eq!(bus.name(), "device");
    }

    #[tokio::test(start_paused = true)]
    async fn test_offer_times_out_when_full() {
        let (bus, mut rx) = MessageBus::channel("device", 1);
        let timeout = Duration::from_millis(500);

        bus.offer(Message::report("lamp", Vec::new()), timeout).await.unwrap();
        let result = bus.offer(Message::report("lamp", Vec::new()), timeout).await;
        assert_eq!(result, Err(HandoffError::Timeout));

        assert_eq!(rx.drain().len(), 1);
    }

    #[tokio::test]
    async fn test_offer_closed() {
        let (bus, rx) = MessageBus::channel("internal", 1);
        drop(rx);

        let result = bus
            .offer(Message::report("lamp", Vec::new()), Duration::from_millis(10))
            .await;
        assert_eq!(result, Err(HandoffError::Closed));
        assert!(bus.is_closed());
        assert!(matches!(
            bus.reserve(Duration::from_millis(10)).await,
            Err(HandoffError::Closed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reserve_waits_for_room() {
        let (bus, mut rx) = MessageBus::channel("device", 1);
        let timeout = Duration::from_millis(500);

        let held = bus.reserve(timeout).await.unwrap();
        assert!(matches!(bus.reserve(timeout).await, Err(HandoffError::Timeout)));

        // Dropping an unused permit gives the slot back
        drop(held);
        let permit = bus.reserve(timeout).await.unwrap();
        permit.send(Message::report("lamp", Vec::new()));
        assert_eq!(rx.recv().await.unwrap().publisher, "lamp");
    }
}
