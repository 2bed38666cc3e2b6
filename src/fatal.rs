//! Fatal/crash policy.
//!
//! Failures outside a handler's reply channel are routed here. With
//! `crash_on_fatal` set, the hook runs; the default hook exits the
//! process. Otherwise the failure is only logged.

use std::sync::Arc;

use crate::error::HemeraError;

/// Callback invoked for fatal failures when `crash_on_fatal` is set.
pub type FatalHook = Arc<dyn Fn(&HemeraError) + Send + Sync>;

/// Hook that terminates the process.
pub fn exit_hook() -> FatalHook {
    Arc::new(|err: &HemeraError| {
        tracing::error!(kind = err.name(), "Terminating after fatal failure: {}", err);
        std::process::exit(1);
    })
}

#[derive(Clone)]
pub struct FatalPolicy {
    crash_on_fatal: bool,
    hook: FatalHook,
}

impl FatalPolicy {
    pub fn new(crash_on_fatal: bool, hook: Option<FatalHook>) -> Self {
        Self {
            crash_on_fatal,
            hook: hook.unwrap_or_else(exit_hook),
        }
    }

    #[inline]
    pub fn crash_on_fatal(&self) -> bool {
        self.crash_on_fatal
    }

    /// Log `err` and, when enabled, invoke the hook.
    pub fn report(&self, err: &HemeraError) {
        tracing::error!(
            kind = err.name(),
            cause = err.cause().map(|c| c.message()).unwrap_or_default(),
            "{}",
            err
        );
        if self.crash_on_fatal {
            (self.hook)(err);
        }
    }
}

impl std::fmt::Debug for FatalPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FatalPolicy")
            .field("crash_on_fatal", &self.crash_on_fatal)
            .finish_non_exhaustive()
    }
}
