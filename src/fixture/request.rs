//! Per-test fixture resolution.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::io_loop::{LoopOptions, SharedLoop};
use crate::item::TestItem;
use crate::marker::GenTest;
use crate::session::Session;

use super::{downcast, Factory, Value};

type Finalizer = Box<dyn FnOnce() -> Result<()>>;

/// The fixture scope of one running test.
///
/// Each fixture is built at most once per request. Finalizers registered
/// while building fixtures run in reverse order in [`finish`](Self::finish).
pub struct Request<'a> {
    session: &'a Session,
    item: &'a TestItem,
    cache: HashMap<String, Value>,
    resolving: Vec<String>,
    finalizers: Vec<(String, Finalizer)>,
}

impl<'a> Request<'a> {
    pub(crate) fn new(session: &'a Session, item: &'a TestItem) -> Self {
        Self {
            session,
            item,
            cache: HashMap::new(),
            resolving: Vec::new(),
            finalizers: Vec::new(),
        }
    }

    /// Returns the run configuration.
    #[must_use]
    pub fn config(&self) -> &'a Config {
        self.session.config()
    }

    /// Returns the options for new event loops.
    #[must_use]
    pub fn loop_options(&self) -> &'a LoopOptions {
        self.session.loop_options()
    }

    /// Returns the shared loop handle.
    #[must_use]
    pub fn shared_loop(&self) -> &'a SharedLoop {
        self.session.shared_loop()
    }

    /// Returns the test being set up.
    #[must_use]
    pub fn item(&self) -> &'a TestItem {
        self.item
    }

    /// Returns the test's `gen_test` marker, if any.
    #[must_use]
    pub fn marker(&self) -> Option<&'a GenTest> {
        self.item.gen_test()
    }

    fn lookup(&self, name: &str) -> Option<Factory> {
        self.item
            .fixtures()
            .get(name)
            .or_else(|| self.session.fixtures().get(name))
    }

    /// Returns the fixture named `name`, building it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Setup`] if no factory is registered, the fixture
    /// depends on itself, or its factory fails.
    pub fn getfixturevalue(&mut self, name: &str) -> Result<Value> {
        if let Some(cached) = self.cache.get(name) {
            return Ok(Rc::clone(cached));
        }
        if self.resolving.iter().any(|pending| pending == name) {
            return Err(Error::setup(format!(
                "recursive dependency involving fixture '{name}'"
            )));
        }
        let factory = self
            .lookup(name)
            .ok_or_else(|| Error::setup(format!("fixture '{name}' not found")))?;

        self.resolving.push(name.to_string());
        let built = factory(self);
        self.resolving.pop();

        let value = built.map_err(|err| match err {
            Error::Setup(_) => err,
            other => Error::setup(format!("fixture '{name}' failed: {other}")),
        })?;
        debug!(test = self.item.name(), fixture = name, "fixture ready");
        self.cache.insert(name.to_string(), Rc::clone(&value));
        Ok(value)
    }

    /// Returns a clone of the fixture named `name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Setup`] if the fixture cannot be built or has
    /// another type.
    pub fn get<T: Clone + 'static>(&mut self, name: &str) -> Result<T> {
        let value = self.getfixturevalue(name)?;
        downcast(name, &value)
    }

    /// Registers `finalizer` to run when the test finishes.
    pub fn add_finalizer<F>(&mut self, finalizer: F)
    where
        F: FnOnce() -> Result<()> + 'static,
    {
        let owner = self
            .resolving
            .last()
            .cloned()
            .unwrap_or_else(|| self.item.name().to_string());
        self.finalizers.push((owner, Box::new(finalizer)));
    }

    /// Runs every finalizer, last registered first.
    ///
    /// All finalizers run even if some fail.
    ///
    /// # Errors
    ///
    /// Returns the first [`Error::Teardown`]; later failures are logged.
    pub fn finish(mut self) -> Result<()> {
        let mut first_error = None;
        while let Some((owner, finalizer)) = self.finalizers.pop() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(finalizer));
            let failure = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => format!("finalizer of '{owner}' failed: {err}"),
                Err(payload) => format!(
                    "finalizer of '{owner}' panicked: {}",
                    panic_message(payload.as_ref())
                ),
            };
            if first_error.is_none() {
                first_error = Some(Error::teardown(failure));
            } else {
                warn!(test = self.item.name(), "{failure}");
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
