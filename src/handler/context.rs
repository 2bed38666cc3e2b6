//! Reply channel handed to handlers.
//!
//! - `reply` - send a success result
//! - `ack` - send an empty success
//! - `fail` - report a business failure
//! - `respond` - send either, from a `Result`
//!
//! # Example
//!
//! ```ignore
//! async fn add(args: AddArgs, ctx: ReplyContext) -> HandlerResult {
//!     ctx.reply(&json!({ "result": args.a + args.b })).await
//! }
//!
//! async fn guarded(args: Args, ctx: ReplyContext) -> HandlerResult {
//!     if args.to.is_empty() {
//!         return ctx.fail("no recipient").await;
//!     }
//!     ctx.ack().await
//! }
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::codec::{Envelope, EnvelopeCodec};
use crate::error::{HemeraError, Result};
use crate::publisher::PublisherHandle;
use crate::transport::Message;

#[derive(Clone)]
struct ReplySink {
    publisher: PublisherHandle,
    codec: Arc<dyn EnvelopeCodec>,
}

/// Context passed to handlers.
///
/// `ReplyContext` is `Clone`; every clone shares the same "already
/// replied" flag, so only the first reply for a request is published.
#[derive(Clone)]
pub struct ReplyContext {
    id: String,
    reply_to: Option<String>,
    meta: Option<Value>,
    context: Option<Value>,
    replied: Arc<AtomicBool>,
    sink: Option<ReplySink>,
}

impl ReplyContext {
    /// Create a detached context (for testing without a publisher).
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            reply_to: None,
            meta: None,
            context: None,
            replied: Arc::new(AtomicBool::new(false)),
            sink: None,
        }
    }

    pub(crate) fn with_sink(
        id: impl Into<String>,
        reply_to: Option<String>,
        meta: Option<Value>,
        context: Option<Value>,
        publisher: PublisherHandle,
        codec: Arc<dyn EnvelopeCodec>,
    ) -> Self {
        Self {
            id: id.into(),
            reply_to,
            meta,
            context,
            replied: Arc::new(AtomicBool::new(false)),
            sink: Some(ReplySink { publisher, codec }),
        }
    }

    /// Correlation token of the request.
    #[inline]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// `meta$` of the request.
    #[inline]
    pub fn meta(&self) -> Option<&Value> {
        self.meta.as_ref()
    }

    /// `context$` of the request.
    #[inline]
    pub fn context(&self) -> Option<&Value> {
        self.context.as_ref()
    }

    /// Whether a reply was already sent.
    #[inline]
    pub fn has_replied(&self) -> bool {
        self.replied.load(Ordering::Acquire)
    }

    /// Send a success reply.
    pub async fn reply<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        let outcome = serde_json::to_value(value)
            .map_err(|e| HemeraError::parse(HemeraError::from_std(&e)));
        self.send_outcome(outcome).await
    }

    /// Send an empty success reply.
    pub async fn ack(&self) -> Result<()> {
        self.send_outcome(Ok(Value::Null)).await
    }

    /// Report a failure; the caller receives a `BusinessError` caused by `err`.
    #[track_caller]
    pub fn fail(&self, err: impl Into<HemeraError>) -> impl Future<Output = Result<()>> + Send + '_ {
        let err = HemeraError::business(err.into());
        self.send_outcome(Err(err))
    }

    /// Reply from an error-first result.
    #[track_caller]
    pub fn respond<T, E>(
        &self,
        result: std::result::Result<T, E>,
    ) -> impl Future<Output = Result<()>> + Send + '_
    where
        T: Serialize,
        E: Into<HemeraError>,
    {
        let outcome = match result {
            Ok(value) => serde_json::to_value(&value)
                .map_err(|e| HemeraError::parse(HemeraError::from_std(&e))),
            Err(err) => Err(HemeraError::business(err.into())),
        };
        self.send_outcome(outcome)
    }

    /// Send an error reply without wrapping it.
    pub(crate) async fn reject(&self, err: HemeraError) -> Result<()> {
        self.send_outcome(Err(err)).await
    }

    async fn send_outcome(&self, outcome: Result<Value>) -> Result<()> {
        if self.replied.swap(true, Ordering::AcqRel) {
            tracing::warn!("Reply for {} already sent, dropping another", self.id);
            return Ok(());
        }

        let (sink, reply_to) = match (&self.sink, &self.reply_to) {
            (Some(sink), Some(reply_to)) => (sink, reply_to),
            _ => {
                tracing::trace!("No reply subject for {}", self.id);
                return Ok(());
            }
        };

        let context = self.context.clone();
        let envelope = match outcome {
            Ok(result) => Envelope::success(self.id.as_str(), result, context.clone()),
            Err(err) => Envelope::failure(self.id.as_str(), err, context.clone()),
        };

        let payload = match sink.codec.encode(&envelope) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!("Failed to encode reply for {}: {}", self.id, err);
                sink.codec
                    .encode(&Envelope::failure(self.id.as_str(), err, context))?
            }
        };

        tracing::debug!("Replying to {} on {}", self.id, reply_to);
        sink.publisher
            .send(Message::new(reply_to.as_str(), None, payload))
            .await
    }
}

impl std::fmt::Debug for ReplyContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplyContext")
            .field("id", &self.id)
            .field("reply_to", &self.reply_to)
            .field("replied", &self.has_replied())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonCodec;
    use crate::publisher::spawn_publisher_task;
    use crate::transport::{MemoryTransport, Transport};
    use serde_json::json;

    fn wired(bus: &MemoryTransport, reply_to: &str) -> ReplyContext {
        let transport: Arc<dyn Transport> = Arc::new(bus.connection());
        let (publisher, _task) = spawn_publisher_task(transport, 16);
        ReplyContext::with_sink(
            "token",
            Some(reply_to.to_string()),
            Some(json!("meta")),
            Some(json!("ctx")),
            publisher,
            Arc::new(JsonCodec),
        )
    }

    #[test]
    fn test_context_creation() {
        let ctx = ReplyContext::new("abc");
        assert_eq!(ctx.id(), "abc");
        assert!(ctx.meta().is_none());
        assert!(!ctx.has_replied());
    }

    #[tokio::test]
    async fn test_reply_without_sink_is_noop() {
        let ctx = ReplyContext::new("abc");
        ctx.reply(&json!({"result": 1})).await.unwrap();
        assert!(ctx.has_replied());
    }

    #[tokio::test]
    async fn test_reply_is_published_with_context() {
        let bus = MemoryTransport::new();
        let mut inbox = bus.subscribe("_INBOX.1").unwrap();
        let ctx = wired(&bus, "_INBOX.1");

        ctx.reply(&json!({"result": 3})).await.unwrap();

        let message = inbox.next().await.unwrap();
        let envelope = JsonCodec.decode(&message.payload).unwrap();
        assert_eq!(envelope.id, "token");
        assert_eq!(envelope.context, Some(json!("ctx")));
        assert_eq!(envelope.into_outcome().unwrap(), json!({"result": 3}));
    }

    #[tokio::test]
    async fn test_fail_wraps_business_error() {
        let bus = MemoryTransport::new();
        let mut inbox = bus.subscribe("_INBOX.2").unwrap();
        let ctx = wired(&bus, "_INBOX.2");

        ctx.fail("Uups").await.unwrap();

        let message = inbox.next().await.unwrap();
        let err = JsonCodec
            .decode(&message.payload)
            .unwrap()
            .into_outcome()
            .unwrap_err();
        assert_eq!(err.name(), "BusinessError");
        assert_eq!(err.cause().unwrap().message(), "Uups");
        assert!(err.own_stack().unwrap().contains("context.rs"));
    }

    #[tokio::test]
    async fn test_only_first_reply_is_sent() {
        let bus = MemoryTransport::new();
        let mut inbox = bus.subscribe("_INBOX.3").unwrap();
        let ctx = wired(&bus, "_INBOX.3");

        ctx.respond(Ok::<_, HemeraError>(1)).await.unwrap();
        ctx.clone().reply(&2).await.unwrap();
        ctx.ack().await.unwrap();

        let first = inbox.next().await.unwrap();
        let envelope = JsonCodec.decode(&first.payload).unwrap();
        assert_eq!(envelope.into_outcome().unwrap(), json!(1));

        let second = tokio::time::timeout(std::time::Duration::from_millis(50), inbox.next()).await;
        assert!(second.is_err());
    }
}
