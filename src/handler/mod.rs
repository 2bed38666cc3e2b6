//! Handler module - pattern registration and replies.
//!
//! Provides:
//! - [`PatternRegistry`] - maps patterns to handlers
//! - [`ReplyContext`] - allows handlers to reply or fail
//!
//! # Example
//!
//! ```ignore
//! use hemera::handler::{PatternRegistry, ReplyContext};
//! use hemera::pattern::Pattern;
//!
//! let mut registry = PatternRegistry::new();
//!
//! registry.register(
//!     Pattern::new().with("topic", "greet").with("cmd", "hello"),
//!     |name: String, ctx: ReplyContext| async move {
//!         ctx.reply(&format!("hello {name}")).await
//!     },
//! )?;
//! ```

mod context;
mod registry;

pub use context::ReplyContext;
pub use registry::{
    Addition, BoxFuture, Handler, HandlerResult, MatchPolicy, PatternRegistry, TypedHandler,
};
