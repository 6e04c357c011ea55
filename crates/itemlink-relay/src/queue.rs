//! Bounded hand-off queues in front of the relay loops.
//!
//! Producers push without blocking (or with a bounded wait); the single
//! consumer is one of the relay loops. A full queue is reported to the
//! producer as [`Error::QueueFull`], never grown.

use std::time::Duration;

use itemlink_core::{Error, Message, Result};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};

/// Create a bounded queue.
pub(crate) fn bounded(name: impl Into<String>, capacity: usize) -> (QueueSender, QueueReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (
        QueueSender {
            tx,
            name: name.into(),
        },
        QueueReceiver { rx },
    )
}

/// Producer side of a relay queue.
#[derive(Clone)]
pub(crate) struct QueueSender {
    tx: mpsc::Sender<Message>,
    name: String,
}

impl QueueSender {
    /// Messages currently waiting.
    pub(crate) fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Push without waiting.
    pub(crate) fn try_push(&self, message: Message) -> Result<()> {
        match self.tx.try_send(message) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(Error::QueueFull(self.name.clone())),
            Err(TrySendError::Closed(_)) => Err(Error::RelayClosed(self.name.clone())),
        }
    }

    /// Push, waiting at most `timeout` for room.
    pub(crate) async fn push_timeout(&self, message: Message, timeout: Duration) -> Result<()> {
        match self.tx.send_timeout(message, timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(Error::QueueFull(self.name.clone())),
            Err(SendTimeoutError::Closed(_)) => Err(Error::RelayClosed(self.name.clone())),
        }
    }
}

/// Consumer side of a relay queue.
pub(crate) struct QueueReceiver {
    rx: mpsc::Receiver<Message>,
}

impl QueueReceiver {
    /// Wait for the next message; `None` once every sender is gone.
    pub(crate) async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_queue_full() {
        let (tx, mut rx) = bounded("outbound queue of lamp", 2);

        tx.try_push(Message::report("lamp", Vec::new())).unwrap();
        tx.try_push(Message::report("lamp", Vec::new())).unwrap();
        assert_eq!(tx.len(), 2);

        let err = tx.try_push(Message::report("lamp", Vec::new())).unwrap_err();
        assert!(matches!(err, Error::QueueFull(name) if name == "outbound queue of lamp"));

        rx.recv().await.unwrap();
        assert_eq!(tx.len(), 1);
        assert!(tx.try_push(Message::report("lamp", Vec::new())).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_timeout_when_full() {
        let (tx, _rx) = bounded("inbound", 1);
        tx.try_push(Message::report("lamp", Vec::new())).unwrap();

        let result = tx
            .push_timeout(Message::report("lamp", Vec::new()), Duration::from_millis(50))
            .await;
        assert!(matches!(result, Err(Error::QueueFull(_))));
    }

    #[tokio::test]
    async fn test_closed_queue() {
        let (tx, rx) = bounded("inbound", 1);
        drop(rx);

        let result = tx.try_push(Message::report("lamp", Vec::new()));
        assert!(matches!(result, Err(Error::RelayClosed(_))));
    }
}
