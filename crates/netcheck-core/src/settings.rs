//! Environment-sourced configuration.
//!
//! Everything is read once at process start and handed to the runner and
//! device constructors as plain values; no component re-reads the
//! environment mid-run. Invalid values log a warning and fall back to the
//! default rather than aborting.

use std::time::Duration;

use tracing::warn;

pub use netcheck_eapi::{ClientLimits, ClientTimeouts};

/// Default global bound on concurrently executing test instances.
pub const DEFAULT_MAX_CONCURRENCY: usize = 10_000;

/// Default soft limit requested for open file descriptors (Unix).
pub const DEFAULT_NOFILE: u64 = 16_384;

/// Default transport timeout applied when no environment variable and no
/// caller-supplied global timeout is set.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Scheduler-level settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerSettings {
    /// Maximum number of test instances in their I/O phase at once,
    /// process-wide for the run.
    pub max_concurrency: usize,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }
}

impl RunnerSettings {
    /// Reads `NETCHECK_MAX_CONCURRENCY`.
    pub fn from_env() -> Self {
        Self {
            max_concurrency: parse_var("NETCHECK_MAX_CONCURRENCY", DEFAULT_MAX_CONCURRENCY),
        }
    }
}

/// Reads the per-device connection-pool limits:
/// `NETCHECK_MAX_CONNECTIONS`, `NETCHECK_MAX_KEEPALIVE_CONNECTIONS`,
/// `NETCHECK_KEEPALIVE_EXPIRY` (seconds).
pub fn limits_from_env() -> ClientLimits {
    let defaults = ClientLimits::default();
    ClientLimits {
        max_connections: parse_var("NETCHECK_MAX_CONNECTIONS", defaults.max_connections),
        max_keepalive_connections: parse_var(
            "NETCHECK_MAX_KEEPALIVE_CONNECTIONS",
            defaults.max_keepalive_connections,
        ),
        keepalive_expiry: parse_secs_var("NETCHECK_KEEPALIVE_EXPIRY", defaults.keepalive_expiry),
    }
}

/// Reads the per-operation transport timeouts:
/// `NETCHECK_{CONNECT,READ,WRITE,POOL}_TIMEOUT` (seconds, `none` disables).
///
/// `default_timeout` is the fallback for any timeout not set by an
/// environment variable, typically a caller-wide global timeout.
pub fn timeouts_from_env(default_timeout: Option<Duration>) -> ClientTimeouts {
    ClientTimeouts {
        connect: parse_timeout_var("NETCHECK_CONNECT_TIMEOUT", default_timeout),
        read: parse_timeout_var("NETCHECK_READ_TIMEOUT", default_timeout),
        write: parse_timeout_var("NETCHECK_WRITE_TIMEOUT", default_timeout),
        pool: parse_timeout_var("NETCHECK_POOL_TIMEOUT", default_timeout),
    }
}

/// Reads `NETCHECK_NOFILE`, the requested soft limit for open file
/// descriptors.
pub(crate) fn nofile_from_env() -> u64 {
    parse_var("NETCHECK_NOFILE", DEFAULT_NOFILE)
}

fn parse_var<T>(name: &str, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Display + Copy,
{
    match std::env::var(name) {
        Err(_) => default,
        Ok(raw) => parse_value(name, &raw, default),
    }
}

fn parse_value<T>(name: &str, raw: &str, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Display + Copy,
{
    raw.parse().unwrap_or_else(|_| {
        warn!("the {name} environment variable value is invalid: '{raw}'; defaulting to {default}");
        default
    })
}

fn parse_secs_var(name: &str, default: Duration) -> Duration {
    match std::env::var(name) {
        Err(_) => default,
        Ok(raw) => parse_secs_value(name, &raw, default),
    }
}

fn parse_secs_value(name: &str, raw: &str, default: Duration) -> Duration {
    match raw.parse::<f64>() {
        Ok(seconds) if seconds >= 0.0 && seconds.is_finite() => Duration::from_secs_f64(seconds),
        _ => {
            warn!(
                "the {name} environment variable value is invalid: '{raw}'; defaulting to {}s",
                default.as_secs_f64()
            );
            default
        }
    }
}

fn parse_timeout_var(name: &str, fallback: Option<Duration>) -> Option<Duration> {
    match std::env::var(name) {
        Err(_) => fallback,
        Ok(raw) => parse_timeout_value(name, &raw, fallback),
    }
}

fn parse_timeout_value(name: &str, raw: &str, fallback: Option<Duration>) -> Option<Duration> {
    if raw.eq_ignore_ascii_case("none") {
        return None;
    }
    match raw.parse::<f64>() {
        Ok(seconds) if seconds >= 0.0 && seconds.is_finite() => Some(Duration::from_secs_f64(seconds)),
        _ => {
            warn!("the {name} environment variable value is invalid: '{raw}'; falling back to the global timeout");
            fallback
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_value_accepts_valid_input() {
        assert_eq!(parse_value("X", "250", DEFAULT_MAX_CONCURRENCY), 250);
    }

    #[test]
    fn test_parse_value_falls_back_on_garbage() {
        assert_eq!(parse_value("X", "a lot", DEFAULT_MAX_CONCURRENCY), DEFAULT_MAX_CONCURRENCY);
    }

    #[test]
    fn test_parse_secs_value() {
        assert_eq!(parse_secs_value("X", "2.5", DEFAULT_TIMEOUT), Duration::from_millis(2500));
        assert_eq!(parse_secs_value("X", "-1", DEFAULT_TIMEOUT), DEFAULT_TIMEOUT);
        assert_eq!(parse_secs_value("X", "soon", DEFAULT_TIMEOUT), DEFAULT_TIMEOUT);
    }

    #[test]
    fn test_parse_timeout_value_none_disables() {
        assert_eq!(parse_timeout_value("X", "none", Some(DEFAULT_TIMEOUT)), None);
        assert_eq!(parse_timeout_value("X", "None", Some(DEFAULT_TIMEOUT)), None);
    }

    #[test]
    fn test_parse_timeout_value_falls_back_on_garbage() {
        assert_eq!(parse_timeout_value("X", "later", Some(DEFAULT_TIMEOUT)), Some(DEFAULT_TIMEOUT));
        assert_eq!(parse_timeout_value("X", "later", None), None);
    }

    #[test]
    fn test_unset_environment_yields_defaults() {
        // These variables are never set in the test environment.
        assert_eq!(RunnerSettings::from_env(), RunnerSettings::default());
        assert_eq!(limits_from_env(), ClientLimits::default());
        assert_eq!(timeouts_from_env(None).connect, None);
    }
}
