//! Dispatch engine: serves requests arriving on a topic subscription.
//!
//! For each request:
//! 1. Decode; failure replies `ParseError`.
//! 2. Resolve the pattern; failure replies `PatternNotFound`.
//! 3. Validate the declared shape; failure replies `PayloadValidationError`.
//! 4. Run the handler in its own task with the request's call scope bound.
//!    A handler that returns `Err` or panics without having replied gets an
//!    `ImplementationError` reply, and the failure goes to the fatal policy.
//!
//! A handler that never replies gets no reply; the caller times out.

use std::sync::{Arc, Weak};

use tokio::task::JoinHandle;

use crate::codec::validate;
use crate::context::{with_scope, CallScope};
use crate::error::HemeraError;
use crate::hemera::Inner;
use crate::transport::{Message, Subscription};

/// Spawn the listener serving `subscription`.
///
/// Each message is handled on its own task once a handler slot is free.
pub(crate) fn spawn_listener(inner: &Arc<Inner>, subscription: Subscription) -> JoinHandle<()> {
    let weak = Arc::downgrade(inner);
    inner.runtime.spawn(listen(weak, subscription))
}

async fn listen(weak: Weak<Inner>, mut subscription: Subscription) {
    let subject = subscription.subject().to_string();
    tracing::debug!("Listening on {}", subject);

    while let Some(message) = subscription.next().await {
        let Some(inner) = weak.upgrade() else {
            return;
        };

        let permit = match inner.permits.clone().acquire_owned().await {
            Ok(p) => p,
            Err(_) => return,
        };

        inner.runtime.clone().spawn(async move {
            // Permit is held until this task completes
            let _permit = permit;
            dispatch(inner, message).await;
        });
    }

    if let Some(inner) = weak.upgrade() {
        if !inner.is_closed() {
            inner.fatal.report(&HemeraError::fatal(format!(
                "Subscription to {} ended unexpectedly",
                subject
            )));
        }
    }
}

/// Serve one request.
pub(crate) async fn dispatch(inner: Arc<Inner>, message: Message) {
    let envelope = match inner.caller.codec.decode(&message.payload) {
        Ok(e) => e,
        Err(err) => {
            tracing::warn!("Undecodable request on {}: {}", message.subject, err);
            let ctx = inner.reply_context(String::new(), message.reply_to, None, None);
            let _ = ctx.reject(err).await;
            return;
        }
    };

    let ctx = inner.reply_context(
        envelope.id,
        message.reply_to,
        envelope.meta.clone(),
        envelope.context.clone(),
    );
    let request = envelope.request;

    let resolved = inner.registry.read().resolve(&request);
    let addition = match resolved {
        Ok(a) => a,
        Err(err) => {
            tracing::debug!("No handler on {} for request {}", message.subject, ctx.id());
            let _ = ctx.reject(err).await;
            return;
        }
    };

    if let Err(err) = validate::check(
        inner.validator.as_ref(),
        &request,
        addition.pattern().shape(),
    ) {
        tracing::debug!("Request {} rejected: {}", ctx.id(), err);
        let _ = ctx.reject(err).await;
        return;
    }

    tracing::debug!("Dispatching {} to {}", ctx.id(), addition.pattern());

    let handler = addition.handler();
    let scope = CallScope::new(envelope.context, envelope.meta);
    let handler_ctx = ctx.clone();
    let outcome = inner
        .runtime
        .spawn(with_scope(scope, async move {
            handler.call(request, handler_ctx).await
        }))
        .await;

    let failure = match outcome {
        Ok(Ok(())) => return,
        Ok(Err(err)) => err,
        Err(join) if join.is_panic() => HemeraError::from_panic(join.into_panic()),
        Err(_) => HemeraError::cancelled(),
    };

    let err = HemeraError::implementation(failure);
    if !ctx.has_replied() {
        if let Err(e) = ctx.reject(err.clone()).await {
            tracing::warn!("Failed to reply to {}: {}", ctx.id(), e);
        }
    }
    let fatal = HemeraError::fatal(format!("Handler for {} failed", addition.pattern()));
    inner.fatal.report(&fatal.with_cause(err));
}
