//! Engine-wide tunables.
//!
//! Grounded in the teacher's `config/env_utils.rs` pattern: typed values
//! are read from environment variables with a fallback default, never
//! panicking on a missing or malformed value.

use std::time::Duration;

/// Read an environment variable and parse it, falling back to `default`
/// when unset or unparsable.
fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Tunables for a single engine instance. Constructed once by the host
/// (CLI/server, out of scope here) and shared read-only across runs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Default concurrency bound for the step scheduler (`N` in the
    /// scheduler's ready-set dispatch). Overridable per run.
    pub max_concurrent_steps: usize,
    /// Default per-step timeout when a step doesn't declare its own.
    pub default_step_timeout: Duration,
    /// Default whole-run timeout.
    pub default_run_timeout: Duration,
    /// Base delay for the retry backoff curve.
    pub retry_backoff_base: Duration,
    /// Multiplier applied to the backoff delay on each retry.
    pub retry_backoff_factor: f64,
    /// Upper bound on the backoff delay.
    pub retry_backoff_cap: Duration,
    /// Symmetric jitter fraction applied to each backoff delay (0.2 = ±20%).
    pub retry_backoff_jitter: f64,
    /// Maximum tool-call loop depth per agent step.
    pub max_tool_call_depth: u32,
    /// Directory used for block script materialization and container
    /// build caches.
    pub cache_dir: std::path::PathBuf,
    /// Grace period given to a child process after a cancellation signal
    /// before it is killed.
    pub cancellation_grace_period: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_steps: 3,
            default_step_timeout: Duration::from_secs(5 * 60),
            default_run_timeout: Duration::from_secs(30 * 60),
            retry_backoff_base: Duration::from_secs(1),
            retry_backoff_factor: 2.0,
            retry_backoff_cap: Duration::from_secs(30),
            retry_backoff_jitter: 0.2,
            max_tool_call_depth: 16,
            cache_dir: std::env::temp_dir().join("lacquer-cache"),
            cancellation_grace_period: Duration::from_secs(5),
        }
    }
}

impl EngineConfig {
    /// Build a config from environment variables, falling back to
    /// [`EngineConfig::default`] for anything unset.
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            max_concurrent_steps: env_or(
                "LACQUER_MAX_CONCURRENT_STEPS",
                default.max_concurrent_steps,
            ),
            default_step_timeout: Duration::from_secs(env_or(
                "LACQUER_STEP_TIMEOUT_SECS",
                default.default_step_timeout.as_secs(),
            )),
            default_run_timeout: Duration::from_secs(env_or(
                "LACQUER_RUN_TIMEOUT_SECS",
                default.default_run_timeout.as_secs(),
            )),
            retry_backoff_base: default.retry_backoff_base,
            retry_backoff_factor: default.retry_backoff_factor,
            retry_backoff_cap: default.retry_backoff_cap,
            retry_backoff_jitter: default.retry_backoff_jitter,
            max_tool_call_depth: env_or(
                "LACQUER_MAX_TOOL_CALL_DEPTH",
                default.max_tool_call_depth,
            ),
            cache_dir: std::env::var("LACQUER_CACHE_DIR")
                .map(std::path::PathBuf::from)
                .unwrap_or(default.cache_dir),
            cancellation_grace_period: default.cancellation_grace_period,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_spec_defaults() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.max_concurrent_steps, 3);
        assert_eq!(cfg.default_step_timeout, Duration::from_secs(300));
        assert_eq!(cfg.default_run_timeout, Duration::from_secs(1800));
        assert_eq!(cfg.max_tool_call_depth, 16);
    }

    #[test]
    fn env_or_falls_back_on_bad_value() {
        std::env::set_var("LACQUER_TEST_BAD_INT", "not-a-number");
        let v: usize = env_or("LACQUER_TEST_BAD_INT", 7);
        assert_eq!(v, 7);
        std::env::remove_var("LACQUER_TEST_BAD_INT");
    }
}
