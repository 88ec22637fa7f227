//! The `gen_test` marker.
//!
//! A [`GenTest`] attached to a [`TestItem`](crate::item::TestItem) opts the
//! test into async dispatch.

use std::time::Duration;

/// Name hosts use to look the marker up.
pub const MARKER_NAME: &str = "gen_test";

/// Help line hosts show when listing markers.
pub const MARKER_HELP: &str = "gen_test(timeout = <secs>, run_sync = true): mark the test as asynchronous, \
it will be run using a dedicated event loop";

/// Marks a test as asynchronous.
///
/// # Example
///
/// ```rust
/// use looptest::marker::GenTest;
/// use std::time::Duration;
///
/// let marker = GenTest::new().timeout_secs(0.5).run_sync(false);
/// assert_eq!(marker.timeout, Some(Duration::from_millis(500)));
/// assert!(!marker.run_sync);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenTest {
    /// Overrides the `async_test_timeout` fixture for this test.
    pub timeout: Option<Duration>,
    /// Drive the loop with `run_sync` (`true`) or start it and stop once the
    /// test future settles (`false`).
    pub run_sync: bool,
}

impl Default for GenTest {
    fn default() -> Self {
        Self {
            timeout: None,
            run_sync: true,
        }
    }
}

impl GenTest {
    /// Create a marker with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the deadline for this test.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the deadline in seconds. Negative or non-finite values are ignored.
    #[must_use]
    pub fn timeout_secs(self, secs: f64) -> Self {
        match Duration::try_from_secs_f64(secs) {
            Ok(timeout) => self.timeout(timeout),
            Err(_) => self,
        }
    }

    /// Select the execution mode.
    #[must_use]
    pub fn run_sync(mut self, run_sync: bool) -> Self {
        self.run_sync = run_sync;
        self
    }

    /// Returns the deadline for this test, falling back to `default`.
    #[must_use]
    pub fn deadline_or(&self, default: Duration) -> Duration {
        self.timeout.unwrap_or(default)
    }
}
