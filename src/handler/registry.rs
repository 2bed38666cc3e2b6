//! Pattern registry: stores additions and resolves requests to handlers.
//!
//! A stored pattern matches a request when every one of its fields is
//! present in the request with an equal value. At most one handler may own
//! a given set of fields; registering the same set twice is rejected.
//!
//! # Example
//!
//! ```ignore
//! use hemera::handler::PatternRegistry;
//! use hemera::pattern::Pattern;
//!
//! let mut registry = PatternRegistry::new();
//!
//! registry.register(
//!     Pattern::new().with("topic", "math").with("cmd", "add"),
//!     |args: AddArgs, ctx| async move { ctx.reply(&(args.a + args.b)).await },
//! )?;
//!
//! let addition = registry.resolve(&request)?;
//! ```

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use super::ReplyContext;
use crate::error::{HemeraError, Result, NO_TOPIC_TO_SUBSCRIBE, PATTERN_IN_USE};
use crate::pattern::Pattern;

/// Result type for handler functions.
///
/// An `Err` escapes the reply channel and is reported to the caller as an
/// `ImplementationError`.
pub type HandlerResult = Result<()>;

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Trait for handler functions.
pub trait Handler: Send + Sync + 'static {
    /// Handle a request with its fields and payload.
    fn call(&self, request: Map<String, Value>, ctx: ReplyContext)
        -> BoxFuture<'static, HandlerResult>;
}

/// Wrapper that deserializes the request before calling the handler.
///
/// A request that does not deserialize into `T` is answered with a
/// `PayloadValidationError` and the handler is not invoked.
pub struct TypedHandler<F, T, Fut>
where
    F: Fn(T, ReplyContext) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    handler: F,
    _phantom: PhantomData<fn(T) -> Fut>,
}

impl<F, T, Fut> TypedHandler<F, T, Fut>
where
    F: Fn(T, ReplyContext) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    /// Create a new typed handler.
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, T, Fut> Handler for TypedHandler<F, T, Fut>
where
    F: Fn(T, ReplyContext) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(
        &self,
        request: Map<String, Value>,
        ctx: ReplyContext,
    ) -> BoxFuture<'static, HandlerResult> {
        let parsed: T = match serde_json::from_value(Value::Object(request)) {
            Ok(v) => v,
            Err(e) => {
                let err = HemeraError::validation(HemeraError::from_std(&e));
                return Box::pin(async move { ctx.reject(err).await });
            }
        };

        Box::pin((self.handler)(parsed, ctx))
    }
}

/// How overlapping patterns are resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MatchPolicy {
    /// The match with the most fields wins; ties go to the earliest addition.
    #[default]
    MostSpecific,
    /// The earliest registered match wins.
    FirstAdded,
}

/// A registered pattern and its handler. Immutable once created.
pub struct Addition {
    id: u64,
    pattern: Pattern,
    handler: Arc<dyn Handler>,
}

impl Addition {
    /// Registration sequence number.
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    /// Topic this addition listens on.
    pub fn topic(&self) -> &str {
        self.pattern.topic().unwrap_or_default()
    }

    pub(crate) fn handler(&self) -> Arc<dyn Handler> {
        self.handler.clone()
    }
}

impl std::fmt::Debug for Addition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Addition")
            .field("id", &self.id)
            .field("pattern", &self.pattern)
            .finish_non_exhaustive()
    }
}

/// Registry of additions, in registration order.
pub struct PatternRegistry {
    additions: Vec<Arc<Addition>>,
    next_id: u64,
    policy: MatchPolicy,
}

impl PatternRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::with_policy(MatchPolicy::default())
    }

    /// Create a registry with the given overlap policy.
    pub fn with_policy(policy: MatchPolicy) -> Self {
        Self {
            additions: Vec::new(),
            next_id: 1,
            policy,
        }
    }

    #[inline]
    pub fn policy(&self) -> MatchPolicy {
        self.policy
    }

    /// Register a typed handler.
    pub fn register<F, T, Fut>(&mut self, pattern: Pattern, handler: F) -> Result<Arc<Addition>>
    where
        F: Fn(T, ReplyContext) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.add(pattern, Arc::new(TypedHandler::new(handler)))
    }

    /// Store an addition.
    ///
    /// # Errors
    ///
    /// `ConfigError` when the pattern has no topic or its fields are
    /// already owned by another addition.
    pub fn add(&mut self, pattern: Pattern, handler: Arc<dyn Handler>) -> Result<Arc<Addition>> {
        if pattern.topic().is_none() {
            return Err(HemeraError::config(NO_TOPIC_TO_SUBSCRIBE));
        }
        if self.additions.iter().any(|a| a.pattern.same_key_set(&pattern)) {
            return Err(HemeraError::config(PATTERN_IN_USE));
        }

        let addition = Arc::new(Addition {
            id: self.next_id,
            pattern,
            handler,
        });
        self.next_id += 1;
        self.additions.push(addition.clone());
        Ok(addition)
    }

    /// Remove the addition owning the same fields as `pattern`.
    pub fn remove(&mut self, pattern: &Pattern) -> Option<Arc<Addition>> {
        let index = self
            .additions
            .iter()
            .position(|a| a.pattern.same_key_set(pattern))?;
        Some(self.additions.remove(index))
    }

    /// Find the handler for a request.
    ///
    /// # Errors
    ///
    /// `PatternNotFound` when nothing matches.
    pub fn resolve(&self, request: &Map<String, Value>) -> Result<Arc<Addition>> {
        let mut candidates = self.additions.iter().filter(|a| a.pattern.matches(request));

        let found = match self.policy {
            MatchPolicy::FirstAdded => candidates.next(),
            MatchPolicy::MostSpecific => candidates.fold(None, |best: Option<&Arc<Addition>>, a| {
                match best {
                    Some(b) if b.pattern.len() >= a.pattern.len() => Some(b),
                    _ => Some(a),
                }
            }),
        };

        found.cloned().ok_or_else(HemeraError::pattern_not_found)
    }

    /// All stored patterns, in registration order.
    pub fn list(&self) -> Vec<Pattern> {
        self.additions.iter().map(|a| a.pattern.clone()).collect()
    }

    /// Whether any addition listens on `topic`.
    pub fn has_topic(&self, topic: &str) -> bool {
        self.additions.iter().any(|a| a.topic() == topic)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.additions.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.additions.is_empty()
    }
}

impl Default for PatternRegistry {
    fn default() -> Self {
        Self::new()
    }
}
