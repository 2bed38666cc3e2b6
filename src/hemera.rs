//! Instance builder and handle.
//!
//! The [`HemeraBuilder`] provides a fluent API for configuring an instance.
//! [`HemeraBuilder::start`] runs the lifecycle:
//! 1. Connect the transport
//! 2. Spawn the outbound publisher task
//! 3. Hand out a [`Hemera`] handle
//!
//! Topic subscriptions are opened lazily by `add`.
//!
//! # Example
//!
//! ```ignore
//! use hemera::{Hemera, Pattern};
//! use hemera::transport::MemoryTransport;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> hemera::error::Result<()> {
//!     let hemera = Hemera::builder(MemoryTransport::new())
//!         .timeout(std::time::Duration::from_secs(1))
//!         .start()
//!         .await?;
//!
//!     hemera.add(
//!         Pattern::new().with("topic", "math").with("cmd", "add"),
//!         |args: AddArgs, ctx| async move { ctx.reply(&json!({ "result": args.a + args.b })).await },
//!     )?;
//!
//!     let out = hemera.act(json!({ "topic": "math", "cmd": "add", "a": 1, "b": 2 })).await?;
//!     assert_eq!(out, json!({ "result": 3 }));
//!
//!     hemera.close().await
//! }
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::runtime::Handle;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::Level;

use crate::codec::{Envelope, EnvelopeCodec, JsonCodec, PayloadValidator, ShapeValidator};
use crate::config::Config;
use crate::context::{current_context, current_scope, sync_scope, CallScope};
use crate::correlation::{self, Caller, OutboundCall, PendingCalls};
use crate::dispatch;
use crate::error::{
    ErrorKind, HemeraError, Result, CONNECTION_CLOSED, NO_TOPIC_TO_REQUEST,
};
use crate::fatal::{FatalHook, FatalPolicy};
use crate::handler::{
    Addition, Handler, HandlerResult, MatchPolicy, PatternRegistry, ReplyContext, TypedHandler,
};
use crate::pattern::{is_reserved, Pattern, TOPIC_KEY};
use crate::plugin::{Plugin, PluginRecord, PluginRegistry};
use crate::publisher::spawn_publisher_task;
use crate::transport::{new_token, Message, Transport};

const META_KEY: &str = "meta$";
const CONTEXT_KEY: &str = "context$";
const TIMEOUT_KEY: &str = "timeout$";

/// Builder for configuring and starting an instance.
pub struct HemeraBuilder {
    transport: Arc<dyn Transport>,
    config: Config,
    codec: Arc<dyn EnvelopeCodec>,
    validator: Arc<dyn PayloadValidator>,
    fatal_hook: Option<FatalHook>,
}

impl HemeraBuilder {
    /// Create a builder over `transport`.
    pub fn new(transport: impl Transport) -> Self {
        Self {
            transport: Arc::new(transport),
            config: Config::default(),
            codec: Arc::new(JsonCodec),
            validator: Arc::new(ShapeValidator),
            fatal_hook: None,
        }
    }

    /// Set the default `act` deadline.
    ///
    /// Default: 2 seconds
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Invoke the fatal hook on fatal failures.
    ///
    /// Default: false
    pub fn crash_on_fatal(mut self, enabled: bool) -> Self {
        self.config.crash_on_fatal = enabled;
        self
    }

    /// Replace the fatal hook, which otherwise exits the process.
    pub fn fatal_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&HemeraError) + Send + Sync + 'static,
    {
        self.fatal_hook = Some(Arc::new(hook));
        self
    }

    /// Set the envelope codec. Every instance on a bus must agree on it.
    ///
    /// Default: [`JsonCodec`]
    pub fn codec(mut self, codec: impl EnvelopeCodec) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    /// Set the payload validator.
    pub fn validator(mut self, validator: impl PayloadValidator) -> Self {
        self.validator = Arc::new(validator);
        self
    }

    /// Set how overlapping patterns are resolved.
    pub fn match_policy(mut self, policy: MatchPolicy) -> Self {
        self.config.match_policy = policy;
        self
    }

    /// Set the maximum number of concurrent handlers.
    ///
    /// When this limit is reached, further requests wait for a free slot.
    /// Default: 256
    pub fn max_concurrent_handlers(mut self, limit: usize) -> Self {
        self.config.max_concurrent_handlers = limit;
        self
    }

    /// Set the publisher channel capacity.
    ///
    /// Default: 1024
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity;
        self
    }

    /// Connect the transport and start the instance.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn start(self) -> Result<Hemera> {
        self.transport.connect().await?;

        let (publisher, publisher_task) =
            spawn_publisher_task(self.transport.clone(), self.config.channel_capacity);
        let (ready, _) = watch::channel(true);

        let inner = Arc::new(Inner {
            id: new_token(),
            caller: Caller {
                transport: self.transport,
                publisher,
                codec: self.codec,
                pending: Arc::new(PendingCalls::new()),
            },
            validator: self.validator,
            registry: RwLock::new(PatternRegistry::with_policy(self.config.match_policy)),
            plugins: Mutex::new(PluginRegistry::new()),
            fatal: FatalPolicy::new(self.config.crash_on_fatal, self.fatal_hook),
            permits: Arc::new(Semaphore::new(self.config.max_concurrent_handlers.max(1))),
            runtime: Handle::current(),
            topics: Mutex::new(HashMap::new()),
            publisher_task: Mutex::new(Some(publisher_task)),
            ready,
            closed: AtomicBool::new(false),
            config: self.config,
        });

        tracing::info!("Instance {} connected", inner.id);
        Ok(Hemera { inner })
    }
}

/// Subscription and task serving one topic.
struct TopicListener {
    subscription: u64,
    task: JoinHandle<()>,
}

/// State shared by every handle of an instance and by its tasks.
pub(crate) struct Inner {
    pub(crate) id: String,
    pub(crate) config: Config,
    pub(crate) caller: Caller,
    pub(crate) validator: Arc<dyn PayloadValidator>,
    pub(crate) registry: RwLock<PatternRegistry>,
    pub(crate) plugins: Mutex<PluginRegistry>,
    pub(crate) fatal: FatalPolicy,
    pub(crate) permits: Arc<Semaphore>,
    pub(crate) runtime: Handle,
    topics: Mutex<HashMap<String, TopicListener>>,
    publisher_task: Mutex<Option<JoinHandle<()>>>,
    ready: watch::Sender<bool>,
    closed: AtomicBool,
}

impl Inner {
    #[inline]
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn reply_context(
        &self,
        id: String,
        reply_to: Option<String>,
        meta: Option<Value>,
        context: Option<Value>,
    ) -> ReplyContext {
        ReplyContext::with_sink(
            id,
            reply_to,
            meta,
            context,
            self.caller.publisher.clone(),
            self.caller.codec.clone(),
        )
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        for (_, listener) in self.topics.get_mut().drain() {
            listener.task.abort();
        }
        if let Some(task) = self.publisher_task.get_mut().take() {
            task.abort();
        }
    }
}

/// A running instance.
///
/// Cheap to clone; every clone drives the same registries and transport.
#[derive(Clone)]
pub struct Hemera {
    inner: Arc<Inner>,
}

impl Hemera {
    /// Create a new builder.
    pub fn builder(transport: impl Transport) -> HemeraBuilder {
        HemeraBuilder::new(transport)
    }

    /// Instance identifier, used in logs.
    #[inline]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Register a typed handler for `pattern`.
    ///
    /// # Errors
    ///
    /// `ConfigError` when the pattern has no topic or is already in use.
    pub fn add<F, T, Fut>(&self, pattern: Pattern, handler: F) -> Result<Arc<Addition>>
    where
        F: Fn(T, ReplyContext) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.add_handler(pattern, Arc::new(TypedHandler::new(handler)))
    }

    /// Register a handler object for `pattern`.
    pub fn add_handler(&self, pattern: Pattern, handler: Arc<dyn Handler>) -> Result<Arc<Addition>> {
        self.ensure_open()?;

        let addition = self.inner.registry.write().add(pattern, handler)?;
        if let Err(err) = self.ensure_topic(addition.topic()) {
            self.inner.registry.write().remove(addition.pattern());
            return Err(err);
        }

        tracing::info!("Added {}", addition.pattern());
        Ok(addition)
    }

    /// Unregister the handler owning `pattern`'s fields.
    ///
    /// The topic subscription is dropped with its last handler.
    pub fn remove(&self, pattern: &Pattern) -> bool {
        let removed = {
            let mut registry = self.inner.registry.write();
            registry
                .remove(pattern)
                .map(|a| (a.topic().to_string(), registry.has_topic(a.topic())))
        };

        match removed {
            Some((topic, still_used)) => {
                if !still_used {
                    if let Some(listener) = self.inner.topics.lock().remove(&topic) {
                        listener.task.abort();
                        self.inner.caller.transport.unsubscribe(listener.subscription);
                    }
                }
                tracing::info!("Removed {}", pattern);
                true
            }
            None => false,
        }
    }

    fn ensure_topic(&self, topic: &str) -> Result<()> {
        let mut topics = self.inner.topics.lock();
        if topics.contains_key(topic) {
            return Ok(());
        }

        let subscription = self.inner.caller.transport.subscribe(topic)?;
        let listener = TopicListener {
            subscription: subscription.id(),
            task: dispatch::spawn_listener(&self.inner, subscription),
        };
        topics.insert(topic.to_string(), listener);
        Ok(())
    }

    /// Send a request and wait for its reply.
    ///
    /// `message` is a JSON object holding the pattern fields and the payload,
    /// plus optional `meta$`, `context$` and `timeout$` (milliseconds).
    /// Without `context$`, the context of the request being served by the
    /// current task is inherited.
    ///
    /// The message is checked immediately; a `ConfigError` ("No topic to
    /// request") is returned without publishing anything.
    pub fn act(&self, message: Value) -> impl Future<Output = Result<Value>> + Send + 'static {
        let prepared = self.prepare(message);
        let caller = self.inner.caller.clone();
        async move { correlation::request(caller, prepared?).await }
    }

    /// Send a request and run `callback` with the outcome.
    ///
    /// The callback runs exactly once on a runtime task. Its call scope
    /// carries the context sent with this request, so requests issued from
    /// the callback inherit it. A panicking callback is a fatal failure.
    pub fn act_with<F>(&self, message: Value, callback: F) -> Result<()>
    where
        F: FnOnce(Result<Value>) + Send + 'static,
    {
        let call = self.prepare(message)?;
        let caller = self.inner.caller.clone();
        let fatal = self.inner.fatal.clone();
        let meta = current_scope().and_then(|s| s.meta);
        let scope = CallScope::new(call.context.clone(), meta);

        self.inner.runtime.spawn(async move {
            let outcome = correlation::request(caller, call).await;
            let timed_out = matches!(&outcome, Err(e) if e.kind() == ErrorKind::Timeout);

            let run = catch_unwind(AssertUnwindSafe(|| sync_scope(scope, || callback(outcome))));
            if let Err(payload) = run {
                let message = if timed_out {
                    "Unexpected error during timeout handling"
                } else {
                    "Unexpected error in act callback"
                };
                fatal.report(&HemeraError::fatal(message).with_cause(HemeraError::from_panic(payload)));
            }
        });
        Ok(())
    }

    /// Publish a request without waiting for a reply.
    pub async fn send(&self, message: Value) -> Result<()> {
        let call = self.prepare(message)?;
        let token = new_token();
        let envelope = Envelope::request(token.as_str(), call.request, call.meta, call.context);
        let payload = self.inner.caller.codec.encode(&envelope)?;

        tracing::debug!("Sending {} on {}", token, call.topic);
        self.inner
            .caller
            .publisher
            .send(Message::new(call.topic, None, payload))
            .await
    }

    fn prepare(&self, message: Value) -> Result<OutboundCall> {
        self.ensure_open()?;

        let Value::Object(mut fields) = message else {
            return Err(HemeraError::config(NO_TOPIC_TO_REQUEST));
        };
        let topic = match fields.get(TOPIC_KEY) {
            Some(Value::String(t)) if !t.is_empty() => t.clone(),
            _ => return Err(HemeraError::config(NO_TOPIC_TO_REQUEST)),
        };

        let meta = take_reserved(&mut fields, META_KEY);
        let context = take_reserved(&mut fields, CONTEXT_KEY).or_else(current_context);
        let timeout = match take_reserved(&mut fields, TIMEOUT_KEY) {
            Some(v) => v
                .as_u64()
                .map(Duration::from_millis)
                .ok_or_else(|| HemeraError::config(format!("Invalid {}: {}", TIMEOUT_KEY, v)))?,
            None => self.inner.config.timeout,
        };
        fields.retain(|k, _| !is_reserved(k));

        Ok(OutboundCall {
            topic,
            request: fields,
            meta,
            context,
            timeout,
        })
    }

    /// Install a plugin.
    ///
    /// # Errors
    ///
    /// `ConfigError` when a plugin with the same name is installed, or the
    /// error returned by the plugin's registration function.
    pub fn use_plugin(&self, plugin: Plugin) -> Result<()> {
        let (name, options, register) = plugin.into_parts();
        self.inner.plugins.lock().insert(&name, options.clone())?;

        if let Err(err) = register(self, options) {
            self.inner.plugins.lock().release(&name);
            return Err(err);
        }

        tracing::info!("Plugin {} registered", name);
        Ok(())
    }

    /// All registered patterns, in registration order.
    pub fn list(&self) -> Vec<Pattern> {
        self.inner.registry.read().list()
    }

    /// Names of installed plugins, in installation order.
    pub fn plugins(&self) -> Vec<String> {
        self.inner.plugins.lock().names()
    }

    /// The installed plugin called `name`, with the options it was given.
    pub fn plugin(&self, name: &str) -> Option<PluginRecord> {
        self.inner.plugins.lock().get(name).cloned()
    }

    /// Calls awaiting a reply.
    pub fn pending_calls(&self) -> usize {
        self.inner.caller.pending.len()
    }

    /// Outbound messages not yet handed to the transport.
    pub fn queued_messages(&self) -> usize {
        self.inner.caller.publisher.pending_count()
    }

    /// Wait until the transport handshake completed.
    ///
    /// # Errors
    ///
    /// `CancellationError` when the instance is closed.
    pub async fn ready(&self) -> Result<()> {
        let mut rx = self.inner.ready.subscribe();
        if self.inner.is_closed() {
            return Err(HemeraError::cancelled());
        }
        let result = rx
            .wait_for(|ready| *ready)
            .await
            .map(|_| ())
            .map_err(|_| HemeraError::cancelled());
        result
    }

    pub fn is_ready(&self) -> bool {
        *self.inner.ready.borrow()
            && !self.inner.is_closed()
            && !self.inner.caller.publisher.is_closed()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Log through the instance.
    pub fn log(&self, level: Level, message: &str) {
        let id = self.inner.id.as_str();
        if level == Level::ERROR {
            tracing::error!(instance = id, "{}", message);
        } else if level == Level::WARN {
            tracing::warn!(instance = id, "{}", message);
        } else if level == Level::INFO {
            tracing::info!(instance = id, "{}", message);
        } else if level == Level::DEBUG {
            tracing::debug!(instance = id, "{}", message);
        } else {
            tracing::trace!(instance = id, "{}", message);
        }
    }

    /// Route `err` through the fatal policy.
    pub fn fatal(&self, err: HemeraError) {
        self.inner.fatal.report(&err);
    }

    /// Release every subscription and the transport.
    ///
    /// Pending calls resolve with `CancellationError`. Idempotent.
    pub async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.inner.ready.send_replace(false);

        let listeners: Vec<TopicListener> =
            self.inner.topics.lock().drain().map(|(_, l)| l).collect();
        for listener in listeners {
            listener.task.abort();
        }

        let cancelled = self.inner.caller.pending.cancel_all();
        let result = self.inner.caller.transport.close().await;

        if let Some(task) = self.inner.publisher_task.lock().take() {
            task.abort();
        }

        tracing::info!(
            "Instance {} closed, {} pending calls cancelled",
            self.inner.id,
            cancelled
        );
        result
    }

    fn ensure_open(&self) -> Result<()> {
        if self.inner.is_closed() {
            return Err(HemeraError::transport(CONNECTION_CLOSED));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Hemera {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hemera")
            .field("id", &self.inner.id)
            .field("closed", &self.inner.is_closed())
            .finish_non_exhaustive()
    }
}

fn take_reserved(fields: &mut Map<String, Value>, key: &str) -> Option<Value> {
    fields.remove(key).filter(|v| !v.is_null())
}
