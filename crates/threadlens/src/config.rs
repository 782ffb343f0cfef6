use std::time::Duration;

/// What a request does when another pass is already running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConcurrencyPolicy {
    /// Join the running pass if it produces what the request needs, otherwise
    /// wait for it and start a new one.
    #[default]
    Share,
    /// Fail with [`DiagnosticError::Busy`](crate::DiagnosticError::Busy).
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Bound on a single thread's stack capture.
    pub sample_timeout: Duration,
    /// Bound on the whole pass. Stacks still outstanding when it expires are
    /// abandoned and the report is marked truncated.
    pub pass_deadline: Duration,
    pub max_sampling_workers: usize,
    /// Reports kept besides the latest one.
    pub history_len: usize,
    pub max_cycles: usize,
    pub concurrency: ConcurrencyPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_timeout: Duration::from_millis(500),
            pass_deadline: Duration::from_secs(5),
            max_sampling_workers: 8,
            history_len: 0,
            max_cycles: threadlens_waitgraph::DEFAULT_MAX_CYCLES,
            concurrency: ConcurrencyPolicy::Share,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {var}={value:?}: {reason}")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
    pub reason: &'static str,
}

pub const SAMPLE_TIMEOUT_ENV: &str = "THREADLENS_SAMPLE_TIMEOUT_MS";
pub const PASS_DEADLINE_ENV: &str = "THREADLENS_PASS_DEADLINE_MS";
pub const SAMPLING_WORKERS_ENV: &str = "THREADLENS_SAMPLING_WORKERS";
pub const HISTORY_ENV: &str = "THREADLENS_HISTORY";
pub const MAX_CYCLES_ENV: &str = "THREADLENS_MAX_CYCLES";
pub const CONCURRENCY_ENV: &str = "THREADLENS_CONCURRENCY";

impl EngineConfig {
    /// Defaults overridden by any `THREADLENS_*` variables that are set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(value) = lookup(SAMPLE_TIMEOUT_ENV) {
            config.sample_timeout = Duration::from_millis(positive(SAMPLE_TIMEOUT_ENV, &value)?);
        }
        if let Some(value) = lookup(PASS_DEADLINE_ENV) {
            config.pass_deadline = Duration::from_millis(positive(PASS_DEADLINE_ENV, &value)?);
        }
        if let Some(value) = lookup(SAMPLING_WORKERS_ENV) {
            config.max_sampling_workers = positive(SAMPLING_WORKERS_ENV, &value)? as usize;
        }
        if let Some(value) = lookup(HISTORY_ENV) {
            config.history_len = unsigned(HISTORY_ENV, &value)? as usize;
        }
        if let Some(value) = lookup(MAX_CYCLES_ENV) {
            config.max_cycles = positive(MAX_CYCLES_ENV, &value)? as usize;
        }
        if let Some(value) = lookup(CONCURRENCY_ENV) {
            config.concurrency = match value.trim().to_ascii_lowercase().as_str() {
                "share" => ConcurrencyPolicy::Share,
                "reject" => ConcurrencyPolicy::Reject,
                _ => {
                    return Err(ConfigError {
                        var: CONCURRENCY_ENV,
                        value,
                        reason: "expected `share` or `reject`",
                    });
                }
            };
        }

        Ok(config)
    }
}

fn unsigned(var: &'static str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse::<u64>().map_err(|_| ConfigError {
        var,
        value: value.to_string(),
        reason: "expected a non-negative integer",
    })
}

fn positive(var: &'static str, value: &str) -> Result<u64, ConfigError> {
    match unsigned(var, value)? {
        0 => Err(ConfigError {
            var,
            value: value.to_string(),
            reason: "must be greater than zero",
        }),
        n => Ok(n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = EngineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.sample_timeout, Duration::from_millis(500));
        assert_eq!(config.pass_deadline, Duration::from_secs(5));
        assert_eq!(config.max_sampling_workers, 8);
        assert_eq!(config.history_len, 0);
        assert_eq!(config.max_cycles, 64);
        assert_eq!(config.concurrency, ConcurrencyPolicy::Share);
    }

    #[test]
    fn overrides_are_applied() {
        let config = EngineConfig::from_lookup(lookup(&[
            (SAMPLE_TIMEOUT_ENV, "50"),
            (PASS_DEADLINE_ENV, "1000"),
            (SAMPLING_WORKERS_ENV, "2"),
            (HISTORY_ENV, "4"),
            (MAX_CYCLES_ENV, "10"),
            (CONCURRENCY_ENV, "Reject"),
        ]))
        .unwrap();
        assert_eq!(config.sample_timeout, Duration::from_millis(50));
        assert_eq!(config.pass_deadline, Duration::from_secs(1));
        assert_eq!(config.max_sampling_workers, 2);
        assert_eq!(config.history_len, 4);
        assert_eq!(config.max_cycles, 10);
        assert_eq!(config.concurrency, ConcurrencyPolicy::Reject);
    }

    #[test]
    fn invalid_values_name_the_variable() {
        let err = EngineConfig::from_lookup(lookup(&[(SAMPLING_WORKERS_ENV, "0")])).unwrap_err();
        assert_eq!(err.var, SAMPLING_WORKERS_ENV);

        let err = EngineConfig::from_lookup(lookup(&[(SAMPLE_TIMEOUT_ENV, "soon")])).unwrap_err();
        assert_eq!(err.var, SAMPLE_TIMEOUT_ENV);
        assert!(err.to_string().contains("THREADLENS_SAMPLE_TIMEOUT_MS"));

        let err = EngineConfig::from_lookup(lookup(&[(CONCURRENCY_ENV, "queue")])).unwrap_err();
        assert_eq!(err.var, CONCURRENCY_ENV);
    }
}
