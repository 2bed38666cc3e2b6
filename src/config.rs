//! Instance configuration.

use std::time::Duration;

use crate::handler::MatchPolicy;
use crate::publisher::DEFAULT_CHANNEL_CAPACITY;

/// Default deadline for `act`.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(2000);

/// Default maximum concurrent handlers.
pub const DEFAULT_MAX_CONCURRENT_HANDLERS: usize = 256;

/// Settings fixed at build time.
#[derive(Debug, Clone)]
pub struct Config {
    /// Deadline applied to every `act` without a `timeout$` override.
    pub timeout: Duration,
    /// Whether fatal failures invoke the fatal hook.
    pub crash_on_fatal: bool,
    /// Handlers allowed to run at once; further requests wait for a slot.
    pub max_concurrent_handlers: usize,
    /// Outbound publisher channel capacity.
    pub channel_capacity: usize,
    pub match_policy: MatchPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            crash_on_fatal: false,
            max_concurrent_handlers: DEFAULT_MAX_CONCURRENT_HANDLERS,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            match_policy: MatchPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.timeout, Duration::from_millis(2000));
        assert!(!config.crash_on_fatal);
        assert_eq!(config.max_concurrent_handlers, 256);
        assert_eq!(config.channel_capacity, 1024);
        assert_eq!(config.match_policy, MatchPolicy::MostSpecific);
    }
}
