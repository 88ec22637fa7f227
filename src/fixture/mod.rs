//! Fixture values and their registry
//!
//! A fixture is a named value built on demand for one test by a factory
//! registered in a [`FixtureRegistry`]. Factories receive the test's
//! [`Request`], through which they can depend on other fixtures and register
//! finalizers. Finalizers run in reverse registration order, so a fixture is
//! always released before the fixtures it depends on.
//!
//! # Example
//!
//! ```rust
//! use looptest::fixture::{FixtureRegistry, names};
//!
//! let registry = FixtureRegistry::with_builtins();
//! assert!(registry.contains(names::IO_LOOP));
//! assert!(registry.contains(names::ASYNC_TEST_TIMEOUT));
//! ```

mod args;
pub(crate) mod builtin;
mod request;

pub use args::Args;
pub use request::Request;

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::error::{Error, Result};

/// Names of the built-in fixtures.
pub mod names {
    /// The configured global deadline, as a `Duration`.
    pub const ASYNC_TEST_TIMEOUT: &str = "async_test_timeout";
    /// The marker's timeout, else `async_test_timeout`.
    pub const RESOLVED_DEADLINE: &str = "resolved_deadline";
    /// The per-test [`EventLoop`](crate::io_loop::EventLoop).
    pub const IO_LOOP: &str = "io_loop";
    /// A bound, not yet listening socket and its port.
    pub const UNUSED_PORT: &str = "unused_port";
    /// The port number of `unused_port`.
    pub const HTTP_PORT: &str = "http_port";
    /// `http://localhost:<http_port>`.
    pub const BASE_URL: &str = "base_url";
    /// A running HTTP server for the application fixture.
    pub const HTTP_SERVER: &str = "http_server";
    /// An HTTP client on the server's loop.
    pub const HTTP_CLIENT: &str = "http_client";
}

/// A type-erased fixture value.
pub type Value = Rc<dyn Any>;

/// Builds a fixture value for one test.
pub type Factory = Rc<dyn Fn(&mut Request<'_>) -> Result<Value>>;

/// Wraps `value` as a fixture [`Value`].
#[must_use]
pub fn value<T: 'static>(value: T) -> Value {
    Rc::new(value)
}

pub(crate) fn downcast<T: Clone + 'static>(name: &str, value: &Value) -> Result<T> {
    value.downcast_ref::<T>().cloned().ok_or_else(|| {
        Error::setup(format!(
            "fixture '{name}' is not a {}",
            std::any::type_name::<T>()
        ))
    })
}

/// Fixture factories by name.
#[derive(Clone, Default)]
pub struct FixtureRegistry {
    factories: HashMap<String, Factory>,
}

impl FixtureRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in fixtures.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        builtin::register(&mut registry);
        registry
    }

    /// Registers `factory` under `name`, replacing any previous factory.
    pub fn register<T, F>(&mut self, name: impl Into<String>, factory: F)
    where
        T: 'static,
        F: Fn(&mut Request<'_>) -> Result<T> + 'static,
    {
        let factory: Factory = Rc::new(move |request| factory(request).map(value));
        self.factories.insert(name.into(), factory);
    }

    /// Returns the factory registered under `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Factory> {
        self.factories.get(name).cloned()
    }

    /// Returns `true` if `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Returns the number of registered fixtures.
    #[must_use]
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl fmt::Debug for FixtureRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.factories.keys().collect();
        names.sort();
        f.debug_struct("FixtureRegistry").field("names", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_replaces() {
        let mut registry = FixtureRegistry::new();
        assert!(registry.is_empty());

        registry.register("answer", |_| Ok(41_u32));
        registry.register("answer", |_| Ok(42_u32));
        assert_eq!(registry.len(), 1);
        assert!(registry.get("answer").is_some());
        assert!(registry.get("question").is_none());
    }

    #[test]
    fn test_downcast_mismatch_is_setup_error() {
        let stored = value(7_u16);
        assert_eq!(downcast::<u16>("http_port", &stored).unwrap(), 7);
        assert!(downcast::<String>("http_port", &stored).unwrap_err().is_setup());
    }
}
