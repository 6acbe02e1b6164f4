use crate::message::{IngestMessage, PriorityBand};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue channel closed for topic {topic}")]
    ChannelClosed { topic: String },

    #[error("Queue full for topic {topic}")]
    Full { topic: String },

    #[error("Invalid message: {0}")]
    InvalidMessage(#[from] serde_json::Error),
}

/// Producer side of the ingress queue. Cheap to clone.
#[derive(Clone)]
pub struct IngestQueue {
    high: mpsc::Sender<IngestMessage>,
    normal: mpsc::Sender<IngestMessage>,
    low: mpsc::Sender<IngestMessage>,
}

/// Producer handle that does not keep the queue open.
///
/// Consumers hold one of these to requeue failed messages without preventing
/// the receiver from observing that every real producer is gone.
#[derive(Clone)]
pub struct WeakIngestQueue {
    high: mpsc::WeakSender<IngestMessage>,
    normal: mpsc::WeakSender<IngestMessage>,
    low: mpsc::WeakSender<IngestMessage>,
}

/// Consumer side of the ingress queue
pub struct IngestReceiver {
    high: mpsc::Receiver<IngestMessage>,
    normal: mpsc::Receiver<IngestMessage>,
    low: mpsc::Receiver<IngestMessage>,
}

impl IngestQueue {
    /// Create a queue with `buffer_size` slots per priority band
    pub fn create_channel(buffer_size: usize) -> (IngestQueue, IngestReceiver) {
        let buffer_size = buffer_size.max(1);
        let (high_tx, high_rx) = mpsc::channel(buffer_size);
        let (normal_tx, normal_rx) = mpsc::channel(buffer_size);
        let (low_tx, low_rx) = mpsc::channel(buffer_size);
        (
            IngestQueue {
                high: high_tx,
                normal: normal_tx,
                low: low_tx,
            },
            IngestReceiver {
                high: high_rx,
                normal: normal_rx,
                low: low_rx,
            },
        )
    }

    fn sender(&self, band: PriorityBand) -> &mpsc::Sender<IngestMessage> {
        match band {
            PriorityBand::High => &self.high,
            PriorityBand::Normal => &self.normal,
            PriorityBand::Low => &self.low,
        }
    }

    /// Route a message onto the topic for its priority, waiting for capacity
    pub async fn send(&self, message: IngestMessage) -> Result<(), QueueError> {
        let topic = message.topic();
        debug!(topic = %topic, project_id = message.project_id(), "Enqueue ingress message");
        self.sender(message.meta().band())
            .send(message)
            .await
            .map_err(|_| QueueError::ChannelClosed { topic })
    }

    /// Put a failed message back with its retry counter bumped
    pub async fn requeue(&self, mut message: IngestMessage) -> Result<(), QueueError> {
        message.meta_mut().retry_count += 1;
        self.send(message).await
    }

    /// Requeue without waiting. On failure the message is handed back so the
    /// caller can dead-letter it.
    pub fn try_requeue(&self, mut message: IngestMessage) -> Result<(), (QueueError, IngestMessage)> {
        message.meta_mut().retry_count += 1;
        let topic = message.topic();
        self.sender(message.meta().band())
            .try_send(message)
            .map_err(|err| match err {
                mpsc::error::TrySendError::Full(message) => (QueueError::Full { topic }, message),
                mpsc::error::TrySendError::Closed(message) => {
                    (QueueError::ChannelClosed { topic }, message)
                }
            })
    }

    pub fn downgrade(&self) -> WeakIngestQueue {
        WeakIngestQueue {
            high: self.high.downgrade(),
            normal: self.normal.downgrade(),
            low: self.low.downgrade(),
        }
    }

    /// Parse a JSON encoded message and enqueue it
    pub async fn send_json(&self, raw: &str) -> Result<(), QueueError> {
        let message: IngestMessage = serde_json::from_str(raw)?;
        self.send(message).await
    }
}

impl WeakIngestQueue {
    /// `None` once every strong producer has been dropped
    pub fn upgrade(&self) -> Option<IngestQueue> {
        Some(IngestQueue {
            high: self.high.upgrade()?,
            normal: self.normal.upgrade()?,
            low: self.low.upgrade()?,
        })
    }
}

impl IngestReceiver {
    /// Next message in strict priority order.
    ///
    /// Returns `None` once every producer is gone and all bands are drained.
    pub async fn recv(&mut self) -> Option<IngestMessage> {
        tokio::select! {
            biased;
            Some(message) = self.high.recv() => Some(message),
            Some(message) = self.normal.recv() => Some(message),
            Some(message) = self.low.recv() => Some(message),
            else => None,
        }
    }

    /// Stop accepting new messages; already queued ones can still be received
    pub fn close(&mut self) {
        self.high.close();
        self.normal.close();
        self.low.close();
    }
}
