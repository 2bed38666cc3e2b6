//! In-process broker.
//!
//! # Example
//!
//! ```
//! use bytes::Bytes;
//! use hemera::transport::{MemoryTransport, Message, Transport};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> hemera::error::Result<()> {
//! let bus = MemoryTransport::new();
//! let peer = bus.connection();
//!
//! let mut sub = peer.subscribe("math")?;
//! bus.publish(Message::new("math", None, Bytes::from_static(b"hi"))).await?;
//!
//! let msg = sub.next().await.unwrap();
//! assert_eq!(&msg.payload[..], b"hi");
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{Message, Subscription, Transport};
use crate::error::{HemeraError, Result, CONNECTION_CLOSED};
use crate::handler::BoxFuture;

/// Per-subscription queue depth.
pub const SUBSCRIPTION_CAPACITY: usize = 1024;

#[derive(Default)]
struct Bus {
    subjects: Mutex<HashMap<String, Vec<(u64, mpsc::Sender<Message>)>>>,
    next_id: AtomicU64,
}

impl Bus {
    fn senders(&self, subject: &str) -> Vec<(u64, mpsc::Sender<Message>)> {
        self.subjects
            .lock()
            .get(subject)
            .cloned()
            .unwrap_or_default()
    }

    fn remove(&self, id: u64) {
        let mut subjects = self.subjects.lock();
        subjects.retain(|_, subs| {
            subs.retain(|(sub_id, _)| *sub_id != id);
            !subs.is_empty()
        });
    }
}

/// Connection to an in-process bus.
///
/// [`MemoryTransport::connection`] opens another connection to the same bus,
/// so several instances can talk to each other. Closing a connection only
/// drops its own subscriptions.
pub struct MemoryTransport {
    bus: Arc<Bus>,
    owned: Mutex<Vec<u64>>,
    closed: AtomicBool,
}

impl MemoryTransport {
    /// Create a fresh bus and a first connection to it.
    pub fn new() -> Self {
        Self::attach(Arc::new(Bus::default()))
    }

    fn attach(bus: Arc<Bus>) -> Self {
        Self {
            bus,
            owned: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Open another connection to the same bus.
    pub fn connection(&self) -> Self {
        Self::attach(self.bus.clone())
    }

    /// Number of live subscriptions on `subject` across the bus.
    pub fn subscriber_count(&self, subject: &str) -> usize {
        self.bus.senders(subject).len()
    }

    /// Drop every subscription on `subject`, as a failing server would.
    pub fn sever(&self, subject: &str) {
        self.bus.subjects.lock().remove(subject);
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(HemeraError::transport(CONNECTION_CLOSED));
        }
        Ok(())
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MemoryTransport {
    fn connect(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { self.ensure_open() })
    }

    fn publish(&self, message: Message) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.ensure_open()?;

            // Clone senders out so the lock is not held across awaits
            let senders = self.bus.senders(&message.subject);
            for (id, tx) in senders {
                if tx.send(message.clone()).await.is_err() {
                    // Receiver dropped without unsubscribing
                    self.bus.remove(id);
                }
            }
            Ok(())
        })
    }

    fn subscribe(&self, subject: &str) -> Result<Subscription> {
        self.ensure_open()?;

        let id = self.bus.next_id.fetch_add(1, Ordering::AcqRel) + 1;
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);

        self.bus
            .subjects
            .lock()
            .entry(subject.to_string())
            .or_default()
            .push((id, tx));
        self.owned.lock().push(id);

        Ok(Subscription::new(id, subject, rx))
    }

    fn unsubscribe(&self, id: u64) {
        self.bus.remove(id);
        self.owned.lock().retain(|owned| *owned != id);
    }

    fn close(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if self.closed.swap(true, Ordering::AcqRel) {
                return Ok(());
            }
            let owned = std::mem::take(&mut *self.owned.lock());
            for id in owned {
                self.bus.remove(id);
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn msg(subject: &str, body: &'static [u8]) -> Message {
        Message::new(subject, None, Bytes::from_static(body))
    }

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber() {
        let bus = MemoryTransport::new();
        let peer = bus.connection();

        let mut a = bus.subscribe("news").unwrap();
        let mut b = peer.subscribe("news").unwrap();

        bus.publish(msg("news", b"hello")).await.unwrap();

        assert_eq!(&a.next().await.unwrap().payload[..], b"hello");
        assert_eq!(&b.next().await.unwrap().payload[..], b"hello");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let bus = MemoryTransport::new();
        assert!(bus.publish(msg("void", b"x")).await.is_ok());
    }

    #[tokio::test]
    async fn test_reply_to_is_preserved() {
        let bus = MemoryTransport::new();
        let mut sub = bus.subscribe("svc").unwrap();

        let message = Message::new("svc", Some("_INBOX.1".into()), Bytes::new());
        bus.publish(message).await.unwrap();

        let got = sub.next().await.unwrap();
        assert_eq!(got.reply_to.as_deref(), Some("_INBOX.1"));
    }

    #[tokio::test]
    async fn test_unsubscribe_ends_stream() {
        let bus = MemoryTransport::new();
        let mut sub = bus.subscribe("svc").unwrap();
        assert_eq!(bus.subscriber_count("svc"), 1);

        bus.unsubscribe(sub.id());
        assert_eq!(bus.subscriber_count("svc"), 0);
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn test_close_only_drops_own_subscriptions() {
        let bus = MemoryTransport::new();
        let peer = bus.connection();

        let _mine = bus.subscribe("svc").unwrap();
        let _theirs = peer.subscribe("svc").unwrap();

        bus.close().await.unwrap();
        bus.close().await.unwrap();

        assert_eq!(peer.subscriber_count("svc"), 1);
        assert!(bus.publish(msg("svc", b"x")).await.is_err());
        assert!(bus.subscribe("svc").is_err());
    }

    #[tokio::test]
    async fn test_sever_ends_subscriptions() {
        let bus = MemoryTransport::new();
        let mut sub = bus.subscribe("svc").unwrap();

        bus.sever("svc");
        assert!(sub.next().await.is_none());
    }
}
