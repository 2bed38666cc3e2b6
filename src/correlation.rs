//! Correlation and timeout engine.
//!
//! Each `act` gets a correlation token and a private reply subject
//! (`_INBOX.<token>`). The call is recorded in [`PendingCalls`] until the
//! first of these happens:
//!
//! ```text
//!            reply decoded ──► Resolved
//! Pending ── deadline ───────► TimedOut
//!            close() ────────► Cancelled
//! ```
//!
//! Whichever path removes the entry from the table owns the resolution,
//! so the outcome is delivered exactly once. The table entry, the inbox
//! subscription and the reply listener are released when the call
//! finishes, including when the caller drops the future early.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

use crate::codec::{Envelope, EnvelopeCodec};
use crate::error::{HemeraError, Result};
use crate::publisher::PublisherHandle;
use crate::transport::{inbox_for, new_token, Message, Subscription, Transport};

/// Terminal state of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Resolved,
    TimedOut,
    Cancelled,
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallState::Resolved => "resolved",
            CallState::TimedOut => "timed out",
            CallState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

struct PendingCall {
    tx: oneshot::Sender<Result<Value>>,
    started: Instant,
}

/// Table of calls awaiting resolution.
#[derive(Default)]
pub struct PendingCalls {
    calls: Mutex<HashMap<String, PendingCall>>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, token: String, tx: oneshot::Sender<Result<Value>>) {
        self.calls.lock().insert(
            token,
            PendingCall {
                tx,
                started: Instant::now(),
            },
        );
    }

    /// Resolve `token` with `outcome`.
    ///
    /// Returns `false` when the call was already resolved.
    pub fn settle(&self, token: &str, outcome: Result<Value>, state: CallState) -> bool {
        let Some(call) = self.calls.lock().remove(token) else {
            return false;
        };
        tracing::debug!(
            "Call {} {} after {:?}",
            token,
            state,
            call.started.elapsed()
        );
        // The caller may have stopped waiting
        let _ = call.tx.send(outcome);
        true
    }

    /// Drop `token` without resolving it.
    fn forget(&self, token: &str) -> bool {
        self.calls.lock().remove(token).is_some()
    }

    /// Resolve every call with a `CancellationError`.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<(String, PendingCall)> = self.calls.lock().drain().collect();
        let count = drained.len();
        for (token, call) in drained {
            tracing::debug!("Call {} {}", token, CallState::Cancelled);
            let _ = call.tx.send(Err(HemeraError::cancelled()));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Everything needed to issue requests, shared by all calls of an instance.
#[derive(Clone)]
pub(crate) struct Caller {
    pub transport: Arc<dyn Transport>,
    pub publisher: PublisherHandle,
    pub codec: Arc<dyn EnvelopeCodec>,
    pub pending: Arc<PendingCalls>,
}

/// A request ready to publish.
#[derive(Debug, Clone)]
pub(crate) struct OutboundCall {
    pub topic: String,
    pub request: Map<String, Value>,
    pub meta: Option<Value>,
    pub context: Option<Value>,
    pub timeout: Duration,
}

/// Releases a call's resources however the call ends.
struct CallGuard {
    token: String,
    subscription: u64,
    pending: Arc<PendingCalls>,
    transport: Arc<dyn Transport>,
    listener: Option<AbortHandle>,
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        if self.pending.forget(&self.token) {
            tracing::trace!("Call {} abandoned by caller", self.token);
        }
        self.transport.unsubscribe(self.subscription);
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}

/// Publish `call` and wait for its reply or deadline.
pub(crate) async fn request(caller: Caller, call: OutboundCall) -> Result<Value> {
    let token = new_token();
    let inbox = inbox_for(&token);

    let envelope = Envelope::request(token.as_str(), call.request, call.meta, call.context);
    let payload = caller.codec.encode(&envelope)?;

    let subscription = caller.transport.subscribe(&inbox)?;
    let (tx, mut rx) = oneshot::channel();
    caller.pending.insert(token.clone(), tx);

    let mut guard = CallGuard {
        token: token.clone(),
        subscription: subscription.id(),
        pending: caller.pending.clone(),
        transport: caller.transport.clone(),
        listener: None,
    };
    let listener = tokio::spawn(listen_for_reply(
        subscription,
        token.clone(),
        caller.codec.clone(),
        caller.pending.clone(),
    ));
    guard.listener = Some(listener.abort_handle());

    tracing::debug!("Publishing {} on {}", token, call.topic);
    caller
        .publisher
        .send(Message::new(call.topic, Some(inbox), payload))
        .await?;

    let outcome = match tokio::time::timeout(call.timeout, &mut rx).await {
        Ok(received) => received,
        Err(_) => {
            // A reply may win the race; the table decides
            caller
                .pending
                .settle(&token, Err(HemeraError::timeout()), CallState::TimedOut);
            rx.await
        }
    };

    drop(guard);
    outcome.unwrap_or_else(|_| Err(HemeraError::cancelled()))
}

async fn listen_for_reply(
    mut subscription: Subscription,
    token: String,
    codec: Arc<dyn EnvelopeCodec>,
    pending: Arc<PendingCalls>,
) {
    while let Some(message) = subscription.next().await {
        let outcome = match codec.decode(&message.payload) {
            Ok(envelope) => {
                if !envelope.id.is_empty() && envelope.id != token {
                    tracing::debug!("Ignoring reply {} on inbox of {}", envelope.id, token);
                    continue;
                }
                envelope.into_outcome()
            }
            Err(err) => {
                tracing::warn!("Undecodable reply for {}: {}", token, err);
                Err(err)
            }
        };

        if !pending.settle(&token, outcome, CallState::Resolved) {
            tracing::warn!("Late reply for {} discarded", token);
        }
        return;
    }
}
