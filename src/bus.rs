//! In-process bounded message queue between gateways and the
//! orchestrator.
//!
//! Producers hold a cloneable [`MessageBus`] handle; the single consumer
//! loop owns the [`BusConsumer`]. A full queue rejects with a typed
//! error, never a silent drop.

use thiserror::Error;
use tokio::sync::mpsc;

use crate::domain_types::MessageId;
use crate::messages::InboundMessage;

/// Bus errors.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("message queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("message bus is closed")]
    Closed,
}

/// Queue depth and capacity.
#[derive(Debug, Clone, Copy)]
pub struct BusStats {
    pub depth: usize,
    pub capacity: usize,
}

/// Producer handle onto the queue.
#[derive(Clone)]
pub struct MessageBus {
    sender: mpsc::Sender<InboundMessage>,
    capacity: usize,
}

/// The consuming end; exactly one loop owns it.
pub struct BusConsumer {
    receiver: mpsc::Receiver<InboundMessage>,
}

impl MessageBus {
    pub fn new(capacity: usize) -> (Self, BusConsumer) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender, capacity }, BusConsumer { receiver })
    }

    /// Enqueue a message, rejecting when the queue is full.
    pub fn enqueue(&self, message: InboundMessage) -> Result<MessageId, BusError> {
        let id = message.id;
        match self.sender.try_send(message) {
            Ok(()) => Ok(id),
            Err(mpsc::error::TrySendError::Full(_)) => Err(BusError::QueueFull {
                capacity: self.capacity,
            }),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(BusError::Closed),
        }
    }

    /// Current queue stats.
    pub fn stats(&self) -> BusStats {
        BusStats {
            depth: self.capacity - self.sender.capacity(),
            capacity: self.capacity,
        }
    }
}

impl BusConsumer {
    /// Await the next message; `None` once every producer handle is gone
    /// and the queue is drained.
    pub async fn recv(&mut self) -> Option<InboundMessage> {
        self.receiver.recv().await
    }

    /// Drain without waiting; used during shutdown.
    pub fn try_recv(&mut self) -> Option<InboundMessage> {
        self.receiver.try_recv().ok()
    }
}
