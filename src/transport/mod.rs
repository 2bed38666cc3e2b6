//! Transport module - the publish/subscribe collaborator.
//!
//! The RPC layer only needs fire-and-forget publish, subject
//! subscriptions and a reply-subject convention; request/reply is built on
//! top of those in [`crate::correlation`].
//!
//! - [`Transport`] - capability set a messaging backend must provide
//! - [`MemoryTransport`] - in-process broker, shareable between instances

mod memory;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::handler::BoxFuture;

pub use memory::MemoryTransport;

/// Prefix of per-call reply subjects.
pub const INBOX_PREFIX: &str = "_INBOX.";

/// A message as delivered by the transport.
#[derive(Debug, Clone)]
pub struct Message {
    /// Subject the message was published on.
    pub subject: String,
    /// Subject the receiver should publish its reply on.
    pub reply_to: Option<String>,
    /// Encoded envelope.
    pub payload: Bytes,
}

impl Message {
    pub fn new(subject: impl Into<String>, reply_to: Option<String>, payload: Bytes) -> Self {
        Self {
            subject: subject.into(),
            reply_to,
            payload,
        }
    }
}

/// Interest in one subject. Messages arrive in publish order.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    subject: String,
    rx: mpsc::Receiver<Message>,
}

impl Subscription {
    pub fn new(id: u64, subject: impl Into<String>, rx: mpsc::Receiver<Message>) -> Self {
        Self {
            id,
            subject: subject.into(),
            rx,
        }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Next message, `None` once the transport dropped this subscription.
    pub async fn next(&mut self) -> Option<Message> {
        self.rx.recv().await
    }
}

/// Capability set required from a publish/subscribe backend.
pub trait Transport: Send + Sync + 'static {
    /// Complete the connection handshake.
    fn connect(&self) -> BoxFuture<'_, Result<()>>;

    /// Publish a message. Delivery to zero subscribers is not an error.
    fn publish(&self, message: Message) -> BoxFuture<'_, Result<()>>;

    /// Register interest in `subject`.
    ///
    /// Interest is registered before this returns, so any publish issued
    /// afterwards on the same bus is observed.
    fn subscribe(&self, subject: &str) -> Result<Subscription>;

    /// Drop a subscription. Unknown ids are ignored.
    fn unsubscribe(&self, id: u64);

    /// Release every subscription and the connection.
    fn close(&self) -> BoxFuture<'_, Result<()>>;
}

/// Generate a fresh call token.
pub fn new_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Reply subject for the call identified by `token`.
pub fn inbox_for(token: &str) -> String {
    format!("{}{}", INBOX_PREFIX, token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbox_format() {
        let token = new_token();
        let inbox = inbox_for(&token);
        assert!(inbox.starts_with(INBOX_PREFIX));
        assert!(inbox.ends_with(&token));
        assert_eq!(inbox.len(), INBOX_PREFIX.len() + 32);
    }

    #[test]
    fn test_token_uniqueness() {
        let inboxes: Vec<String> = (0..10).map(|_| new_token()).collect();
        for (i, a) in inboxes.iter().enumerate() {
            for b in &inboxes[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
