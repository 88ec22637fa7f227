//! Running tests end to end.
//!
//! A [`Session`] holds what every test in a run shares: configuration,
//! fixture factories, loop options and the [`SharedLoop`]. [`Session::run`]
//! sets up a test's fixtures, hands it to [`dispatch`], calls unmarked
//! bodies directly, and always runs the finalizers afterwards.
//!
//! # Example
//!
//! ```rust
//! use looptest::config::Config;
//! use looptest::item::TestItem;
//! use looptest::marker::GenTest;
//! use looptest::session::Session;
//! use looptest::signature::Signature;
//! use std::time::Duration;
//!
//! let session = Session::new(Config::new()).fixture("greeting", |_| Ok("hello".to_string()));
//!
//! let item = TestItem::native("test_greeting", Signature::required(["greeting"]), |args| async move {
//!     let greeting = args.get::<String>("greeting").unwrap();
//!     tokio::time::sleep(Duration::from_millis(1)).await;
//!     assert_eq!(greeting, "hello");
//!     Ok(())
//! })
//! .mark(GenTest::new());
//!
//! session.run(&item).unwrap();
//! ```

use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, warn};

use crate::config::Config;
use crate::dispatch::{dispatch, Dispatch};
use crate::error::{Error, Result};
use crate::fixture::{Args, FixtureRegistry, Request};
use crate::io_loop::{LoopOptions, SharedLoop};
use crate::item::{TestBody, TestItem};
use crate::marker::MARKER_NAME;

/// State shared by every test in a run.
#[derive(Debug, Clone)]
pub struct Session {
    config: Config,
    fixtures: FixtureRegistry,
    loop_options: LoopOptions,
    shared_loop: SharedLoop,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl Session {
    /// Creates a session with the built-in fixtures.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            fixtures: FixtureRegistry::with_builtins(),
            loop_options: LoopOptions::default(),
            shared_loop: SharedLoop::new(),
        }
    }

    /// Creates a session configured from the environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(Config::from_env())
    }

    /// Registers a fixture, replacing a built-in of the same name.
    #[must_use]
    pub fn fixture<T, F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        T: 'static,
        F: Fn(&mut Request<'_>) -> Result<T> + 'static,
    {
        self.register(name, factory);
        self
    }

    /// Registers a fixture in place.
    pub fn register<T, F>(&mut self, name: impl Into<String>, factory: F)
    where
        T: 'static,
        F: Fn(&mut Request<'_>) -> Result<T> + 'static,
    {
        self.fixtures.register(name, factory);
    }

    /// Sets the options for every per-test loop.
    #[must_use]
    pub fn with_loop_options(mut self, options: LoopOptions) -> Self {
        self.loop_options = options;
        self
    }

    /// Uses `shared` as the shared loop handle.
    #[must_use]
    pub fn with_shared_loop(mut self, shared: SharedLoop) -> Self {
        self.shared_loop = shared;
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the fixture factories.
    #[must_use]
    pub fn fixtures(&self) -> &FixtureRegistry {
        &self.fixtures
    }

    /// Returns the options for per-test loops.
    #[must_use]
    pub fn loop_options(&self) -> &LoopOptions {
        &self.loop_options
    }

    /// Returns the shared loop handle.
    #[must_use]
    pub fn shared_loop(&self) -> &SharedLoop {
        &self.shared_loop
    }

    /// Runs one test and releases its fixtures.
    ///
    /// A panic from the body is resumed after teardown.
    ///
    /// # Errors
    ///
    /// Returns the test's failure; a teardown failure is returned only when
    /// the test itself passed.
    pub fn run(&self, item: &TestItem) -> Result<()> {
        debug!(test = item.name(), "running test");
        let mut request = Request::new(self, item);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| Self::call(&mut request, item)));
        let teardown = request.finish();

        match (outcome, teardown) {
            (Err(payload), teardown) => {
                if let Err(err) = teardown {
                    warn!(test = item.name(), error = %err, "teardown failed after panic");
                }
                panic::resume_unwind(payload)
            }
            (Ok(Err(err)), teardown) => {
                if let Err(suppressed) = teardown {
                    warn!(test = item.name(), error = %suppressed, "teardown failed after test failure");
                }
                Err(err)
            }
            (Ok(Ok(())), teardown) => teardown,
        }
    }

    fn call(request: &mut Request<'_>, item: &TestItem) -> Result<()> {
        let mut funcargs = Args::new();
        for name in item.fixturenames() {
            let value = request.getfixturevalue(name)?;
            funcargs.insert(name, value);
        }

        match dispatch(item, &funcargs) {
            Dispatch::Completed(outcome) => outcome,
            Dispatch::NotApplicable => match item.body() {
                TestBody::Sync(body) => {
                    let args = funcargs.select(&item.signature().argnames())?;
                    body(args).map_err(Error::from_body)
                }
                TestBody::Native(_) | TestBody::Sequence(_) => Err(Error::setup(format!(
                    "'{}' has an async body but no {MARKER_NAME} marker",
                    item.name()
                ))),
            },
        }
    }
}
