//! Values handed to a test body.

use std::collections::HashMap;
use std::fmt;

use crate::error::{Error, Result};

use super::{downcast, Value};

/// Resolved fixture values keyed by parameter name.
#[derive(Clone, Default)]
pub struct Args {
    values: HashMap<String, Value>,
}

impl Args {
    /// Creates an empty set of arguments.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a value.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    /// Returns `true` if `name` has a value.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Returns the number of values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if there are no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns a clone of the value named `name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Setup`] if the value is missing or has another type.
    pub fn get<T: Clone + 'static>(&self, name: &str) -> Result<T> {
        let value = self
            .values
            .get(name)
            .ok_or_else(|| Error::setup(format!("missing argument '{name}'")))?;
        downcast(name, value)
    }

    /// Removes the value named `name` and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Setup`] if the value is missing or has another type.
    pub fn take<T: Clone + 'static>(&mut self, name: &str) -> Result<T> {
        let value = self
            .values
            .remove(name)
            .ok_or_else(|| Error::setup(format!("missing argument '{name}'")))?;
        downcast(name, &value)
    }

    /// Returns a new set holding exactly `names`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Setup`] naming the first missing value.
    pub fn select(&self, names: &[&str]) -> Result<Args> {
        let mut selected = Args::new();
        for name in names {
            let value = self
                .values
                .get(*name)
                .ok_or_else(|| Error::setup(format!("fixture '{name}' was not resolved")))?;
            selected.insert(*name, value.clone());
        }
        Ok(selected)
    }
}

impl fmt::Debug for Args {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.values.keys().collect();
        names.sort();
        f.debug_struct("Args").field("names", &names).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::value;

    #[test]
    fn test_get_and_take() {
        let mut args = Args::new();
        args.insert("base_url", value("http://localhost:1".to_string()));

        assert_eq!(args.get::<String>("base_url").unwrap(), "http://localhost:1");
        assert_eq!(args.take::<String>("base_url").unwrap(), "http://localhost:1");
        assert!(args.is_empty());
        assert!(args.take::<String>("base_url").unwrap_err().is_setup());
    }

    #[test]
    fn test_select_subset() {
        let mut args = Args::new();
        args.insert("a", value(1_i32));
        args.insert("b", value(2_i32));
        args.insert("io_loop", value(()));

        let selected = args.select(&["a"]).unwrap();
        assert_eq!(selected.len(), 1);
        assert!(selected.contains("a"));

        assert!(args.select(&["a", "missing"]).unwrap_err().is_setup());
    }
}
