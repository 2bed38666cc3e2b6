//! # hemera
//!
//! Pattern-matched request/reply RPC over a publish/subscribe transport.
//!
//! Handlers are registered for patterns such as `{topic: "math", cmd: "add"}`.
//! A request is a JSON object; it is published on the subject named by its
//! `topic`, routed to the most specific matching handler on whichever
//! instance registered it, and the reply travels back on a per-call inbox.
//!
//! Every instance subscribed to a topic receives each request on it, and the
//! caller keeps the first reply. All patterns of a topic must therefore be
//! registered on one instance (or on identical replicas): an instance owning
//! only some of them answers `PatternNotFound` for the rest.
//!
//! ## Architecture
//!
//! - **Pattern registry**: stores additions, resolves requests
//! - **Correlation engine**: per-call token, inbox, deadline
//! - **Dispatch engine**: decode, resolve, validate, run handler, reply
//! - **Publisher task**: single owner of the transport's publish side
//!
//! ## Example
//!
//! ```ignore
//! use hemera::{Hemera, Pattern, ReplyContext};
//! use hemera::transport::MemoryTransport;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> hemera::Result<()> {
//!     let hemera = Hemera::builder(MemoryTransport::new()).start().await?;
//!
//!     hemera.add(
//!         Pattern::new().with("topic", "math").with("cmd", "add"),
//!         |args: AddArgs, ctx: ReplyContext| async move {
//!             ctx.reply(&json!({ "result": args.a + args.b })).await
//!         },
//!     )?;
//!
//!     let out = hemera
//!         .act(json!({ "topic": "math", "cmd": "add", "a": 1, "b": 2 }))
//!         .await?;
//!     assert_eq!(out, json!({ "result": 3 }));
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod context;
pub mod error;
pub mod fatal;
pub mod handler;
pub mod pattern;
pub mod plugin;
pub mod transport;

mod correlation;
mod dispatch;
mod hemera;
mod publisher;

pub use config::{Config, DEFAULT_MAX_CONCURRENT_HANDLERS, DEFAULT_TIMEOUT};
pub use context::{current_context, current_meta, spawn_in_scope, CallScope};
pub use correlation::{CallState, PendingCalls};
pub use error::{ErrorKind, HemeraError, Result};
pub use handler::{HandlerResult, MatchPolicy, ReplyContext};
pub use hemera::{Hemera, HemeraBuilder};
pub use pattern::{FieldRule, FieldType, Pattern, Scalar};
pub use plugin::{Plugin, PluginRecord};
pub use publisher::DEFAULT_CHANNEL_CAPACITY;
