//! Runtime configuration and tunable limits.
use std::env;

/// Limits applied by a [`ReactiveRuntime`](crate::ReactiveRuntime).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Maximum number of cells dispatching to subscribers at the same time.
    ///
    /// Each cell whose change triggers another cell's change adds one level;
    /// a chain of derived cells `a -> b -> c` written at `a` nests three deep
    /// when `c` has subscribers. Recomputation itself adds no level. Exceeding
    /// the limit fails with `ReentrancyLimit`.
    pub max_context_depth: usize,

    /// Maximum actions executed by a single flush. Anything beyond stays
    /// queued for the next flush.
    pub max_flush_actions: usize,
}

impl RuntimeConfig {
    pub const DEFAULT_MAX_CONTEXT_DEPTH: usize = 64;
    pub const DEFAULT_MAX_FLUSH_ACTIONS: usize = 4096;

    pub const fn new() -> Self {
        Self {
            max_context_depth: Self::DEFAULT_MAX_CONTEXT_DEPTH,
            max_flush_actions: Self::DEFAULT_MAX_FLUSH_ACTIONS,
        }
    }

    pub const fn with_max_context_depth(mut self, depth: usize) -> Self {
        self.max_context_depth = if depth == 0 { 1 } else { depth };
        self
    }

    pub const fn with_max_flush_actions(mut self, actions: usize) -> Self {
        self.max_flush_actions = if actions == 0 { 1 } else { actions };
        self
    }

    /// Construct configuration from process environment variables.
    ///
    /// Environment variables:
    /// - `REACTIVE_MAX_CONTEXT_DEPTH` - Notification nesting limit (default: 64)
    /// - `REACTIVE_MAX_FLUSH_ACTIONS` - Actions per flush (default: 4096)
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(depth) = read_env::<usize>("REACTIVE_MAX_CONTEXT_DEPTH") {
            config.max_context_depth = depth.max(1);
        }

        if let Some(actions) = read_env::<usize>("REACTIVE_MAX_FLUSH_ACTIONS") {
            config.max_flush_actions = actions.max(1);
        }

        config
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn read_env<T>(key: &str) -> Option<T>
where
    T: std::str::FromStr,
{
    env::var(key).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_setters_clamp_to_one() {
        let config = RuntimeConfig::new()
            .with_max_context_depth(0)
            .with_max_flush_actions(0);
        assert_eq!(config.max_context_depth, 1);
        assert_eq!(config.max_flush_actions, 1);
    }

    #[test]
    fn defaults_match_constants() {
        let config = RuntimeConfig::default();
        assert_eq!(
            config.max_context_depth,
            RuntimeConfig::DEFAULT_MAX_CONTEXT_DEPTH
        );
        assert_eq!(
            config.max_flush_actions,
            RuntimeConfig::DEFAULT_MAX_FLUSH_ACTIONS
        );
    }
}
