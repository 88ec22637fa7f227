//! Run-wide configuration.
//!
//! The deadline is resolved as: explicit command-line value, then the
//! `ASYNC_TEST_TIMEOUT` environment variable, then 5 seconds.

use std::time::Duration;

/// Environment variable read by [`Config::from_env`].
pub const TIMEOUT_ENV: &str = "ASYNC_TEST_TIMEOUT";

/// Deadline used when nothing else is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Fixture supplying the application under test, unless configured otherwise.
pub const DEFAULT_APP_FIXTURE: &str = "app";

/// A command-line option a host should register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionSpec {
    /// Flag name, including the leading dashes.
    pub flag: &'static str,
    /// Rendered default value.
    pub default: &'static str,
    /// Help text.
    pub help: &'static str,
}

/// Options consumed by [`Config::resolve`].
pub const OPTIONS: [OptionSpec; 2] = [
    OptionSpec {
        flag: "--async-test-timeout",
        default: "5",
        help: "timeout in seconds before failing the test",
    },
    OptionSpec {
        flag: "--app-fixture",
        default: DEFAULT_APP_FIXTURE,
        help: "fixture name returning the application under test",
    },
];

/// Configuration shared by every test in a run.
///
/// # Example
///
/// ```rust
/// use looptest::config::Config;
/// use std::time::Duration;
///
/// let config = Config::new()
///     .async_test_timeout(Duration::from_secs(2))
///     .app_fixture("application");
///
/// assert_eq!(config.async_test_timeout, Duration::from_secs(2));
/// assert_eq!(config.app_fixture, "application");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Global deadline for async tests.
    pub async_test_timeout: Duration,
    /// Name of the fixture that returns the application object.
    pub app_fixture: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            async_test_timeout: DEFAULT_TIMEOUT,
            app_fixture: DEFAULT_APP_FIXTURE.to_string(),
        }
    }
}

impl Config {
    /// Create a configuration with hard defaults, ignoring the environment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a configuration from `ASYNC_TEST_TIMEOUT`.
    #[must_use]
    pub fn from_env() -> Self {
        Self::resolve(None, None)
    }

    /// Resolve the configuration from explicit command-line values, falling
    /// back to the environment and then the defaults.
    #[must_use]
    pub fn resolve(cli_timeout: Option<f64>, cli_app_fixture: Option<String>) -> Self {
        let env_timeout = std::env::var(TIMEOUT_ENV).ok();
        let async_test_timeout = cli_timeout
            .and_then(secs_to_duration)
            .or_else(|| env_timeout.as_deref().and_then(parse_timeout))
            .unwrap_or(DEFAULT_TIMEOUT);

        Self {
            async_test_timeout,
            app_fixture: cli_app_fixture.unwrap_or_else(|| DEFAULT_APP_FIXTURE.to_string()),
        }
    }

    /// Set the global deadline.
    #[must_use]
    pub fn async_test_timeout(mut self, timeout: Duration) -> Self {
        self.async_test_timeout = timeout;
        self
    }

    /// Set the application fixture name.
    #[must_use]
    pub fn app_fixture(mut self, name: impl Into<String>) -> Self {
        self.app_fixture = name.into();
        self
    }
}

/// Parse a timeout in seconds, as given on the command line or environment.
#[must_use]
pub fn parse_timeout(raw: &str) -> Option<Duration> {
    raw.trim().parse::<f64>().ok().and_then(secs_to_duration)
}

fn secs_to_duration(secs: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(secs).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timeout() {
        assert_eq!(parse_timeout("2.5"), Some(Duration::from_millis(2500)));
        assert_eq!(parse_timeout(" 1 "), Some(Duration::from_secs(1)));
        assert_eq!(parse_timeout("soon"), None);
        assert_eq!(parse_timeout("-3"), None);
        assert_eq!(parse_timeout("inf"), None);
    }

    #[test]
    fn test_cli_value_wins() {
        let config = Config::resolve(Some(0.25), Some("web_app".to_string()));
        assert_eq!(config.async_test_timeout, Duration::from_millis(250));
        assert_eq!(config.app_fixture, "web_app");
    }

    #[test]
    fn test_environment_between_cli_and_default() {
        std::env::set_var(TIMEOUT_ENV, "7.5");
        assert_eq!(Config::from_env().async_test_timeout, Duration::from_millis(7500));
        assert_eq!(
            Config::resolve(Some(0.5), None).async_test_timeout,
            Duration::from_millis(500)
        );

        std::env::set_var(TIMEOUT_ENV, "not a number");
        assert_eq!(Config::from_env().async_test_timeout, DEFAULT_TIMEOUT);

        std::env::remove_var(TIMEOUT_ENV);
        assert_eq!(Config::from_env().async_test_timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn test_defaults() {
        let config = Config::new();
        assert_eq!(config.async_test_timeout, DEFAULT_TIMEOUT);
        assert_eq!(config.app_fixture, "app");
    }

    #[test]
    fn test_option_specs() {
        assert_eq!(OPTIONS[0].flag, "--async-test-timeout");
        assert_eq!(OPTIONS[1].default, DEFAULT_APP_FIXTURE);
    }
}
