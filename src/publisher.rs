//! Dedicated publisher task for outbound messages.
//!
//! Requests from `act` and replies from handlers are funnelled through a
//! single task that owns the transport's publish side. Handlers never touch
//! the transport directly.
//!
//! # Architecture
//!
//! ```text
//! act()     ─┐
//! Handler 1 ─┼─► mpsc::Sender<Message> ─► Publisher Task ─► Transport
//! Handler N ─┘
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{HemeraError, Result, CONNECTION_CLOSED};
use crate::transport::{Message, Transport};

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Maximum messages drained per wakeup.
const MAX_BATCH_SIZE: usize = 64;

/// Handle for queueing messages on the publisher task.
///
/// This is cheaply cloneable and can be shared across handlers.
#[derive(Clone)]
pub struct PublisherHandle {
    tx: mpsc::Sender<Message>,
    pending: Arc<AtomicUsize>,
}

impl PublisherHandle {
    /// Queue a message, waiting for channel capacity.
    pub async fn send(&self, message: Message) -> Result<()> {
        // Increment pending count BEFORE sending
        self.pending.fetch_add(1, Ordering::AcqRel);

        self.tx.send(message).await.map_err(|_| {
            self.pending.fetch_sub(1, Ordering::Release);
            HemeraError::transport(CONNECTION_CLOSED)
        })
    }

    /// Messages queued but not yet handed to the transport.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Whether the publisher task has stopped.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Spawn the publisher task on the current runtime.
///
/// The task ends once every [`PublisherHandle`] is dropped.
pub fn spawn_publisher_task(
    transport: Arc<dyn Transport>,
    channel_capacity: usize,
) -> (PublisherHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(channel_capacity.max(1));
    let pending = Arc::new(AtomicUsize::new(0));

    let handle = PublisherHandle {
        tx,
        pending: pending.clone(),
    };
    let task = tokio::spawn(publisher_loop(rx, transport, pending));

    (handle, task)
}

async fn publisher_loop(
    mut rx: mpsc::Receiver<Message>,
    transport: Arc<dyn Transport>,
    pending: Arc<AtomicUsize>,
) {
    let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);

    loop {
        let first = match rx.recv().await {
            Some(m) => m,
            None => return,
        };
        batch.push(first);

        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(m) => batch.push(m),
                Err(_) => break,
            }
        }

        let batch_size = batch.len();
        for message in batch.drain(..) {
            let subject = message.subject.clone();
            if let Err(e) = transport.publish(message).await {
                tracing::warn!("Publish to {} failed: {}", subject, e);
            } else {
                tracing::trace!("Published to {}", subject);
            }
        }

        pending.fetch_sub(batch_size, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_messages_reach_transport_in_order() {
        let bus = MemoryTransport::new();
        let mut sub = bus.subscribe("svc").unwrap();

        let transport: Arc<dyn Transport> = Arc::new(bus.connection());
        let (handle, _task) = spawn_publisher_task(transport, 8);

        for i in 0..20u8 {
            handle
                .send(Message::new("svc", None, Bytes::from(vec![i])))
                .await
                .unwrap();
        }

        for i in 0..20u8 {
            let got = sub.next().await.unwrap();
            assert_eq!(got.payload[0], i);
        }
    }

    #[tokio::test]
    async fn test_task_ends_when_handles_dropped() {
        let transport: Arc<dyn Transport> = Arc::new(MemoryTransport::new());
        let (handle, task) = spawn_publisher_task(transport, 8);

        drop(handle);
        assert!(task.await.is_ok());
    }

    #[tokio::test]
    async fn test_send_after_task_stopped_fails() {
        let transport: Arc<dyn Transport> = Arc::new(MemoryTransport::new());
        let (handle, task) = spawn_publisher_task(transport, 8);

        task.abort();
        let _ = task.await;

        assert!(handle.is_closed());
        let err = handle
            .send(Message::new("svc", None, Bytes::new()))
            .await
            .unwrap_err();
        assert_eq!(err.name(), "TransportError");
        assert_eq!(handle.pending_count(), 0);
    }
}
