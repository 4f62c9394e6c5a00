//! Routing sentinels and orchestration defaults.

use std::time::Duration;

/// Edge target sentinel meaning "stop here": the edge contributes no
/// successor and the execution drains toward finalization.
pub const END_TARGET: &str = "__end__";

/// Route assigned by a switch when no rule matched and fallback is enabled.
pub const FALLBACK_ROUTE: &str = "__other__";

/// Parent node id recorded on error-handler child executions.
pub const ERROR_HANDLER_NODE: &str = "__error_handler__";

/// Default maximum retry attempts per node.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Base delay for exponential retry backoff.
pub const RETRY_BASE_DELAY: Duration = Duration::from_secs(2);

/// Cap on the retry backoff delay.
pub const RETRY_MAX_DELAY: Duration = Duration::from_secs(120);

/// Age past which a `running` execution is considered a zombie.
pub const ZOMBIE_THRESHOLD: Duration = Duration::from_secs(15 * 60);

/// How long a pending confirmation task stays valid.
pub const CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Persisted error messages are truncated to this many characters.
pub const ERROR_MESSAGE_MAX_LEN: usize = 2000;

/// Output/error previews on events and log rows are capped at this length.
pub const PREVIEW_MAX_LEN: usize = 500;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_are_distinct() {
        assert_ne!(END_TARGET, FALLBACK_ROUTE);
        assert_ne!(END_TARGET, ERROR_HANDLER_NODE);
    }

    #[test]
    fn backoff_bounds_ordered() {
        assert!(RETRY_BASE_DELAY < RETRY_MAX_DELAY);
    }
}
