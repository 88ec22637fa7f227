//! The process-wide shared loop, modelled as an explicit handle.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::Result;

use super::EventLoop;

/// A lazily initialized loop shared outside any single test.
///
/// Per-test teardown checks this handle before closing a loop, so a loop
/// that has been installed here is never torn down by a test.
///
/// # Example
///
/// ```rust
/// use looptest::io_loop::{EventLoop, SharedLoop};
///
/// let shared = SharedLoop::new();
/// assert!(!shared.initialized());
///
/// let io_loop = EventLoop::new().unwrap();
/// shared.install(&io_loop);
/// assert!(shared.is_instance(&io_loop));
/// ```
#[derive(Clone, Default, Debug)]
pub struct SharedLoop {
    slot: Rc<RefCell<Option<EventLoop>>>,
}

impl SharedLoop {
    /// Creates an uninitialized shared loop handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` once a loop has been created or installed.
    #[must_use]
    pub fn initialized(&self) -> bool {
        self.slot.borrow().is_some()
    }

    /// Returns the shared loop, creating it on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if a new loop cannot be built.
    pub fn instance(&self) -> Result<EventLoop> {
        if let Some(existing) = self.slot.borrow().as_ref() {
            return Ok(existing.clone());
        }
        let created = EventLoop::new()?;
        *self.slot.borrow_mut() = Some(created.clone());
        Ok(created)
    }

    /// Makes `io_loop` the shared loop.
    pub fn install(&self, io_loop: &EventLoop) {
        *self.slot.borrow_mut() = Some(io_loop.clone());
    }

    /// Forgets the shared loop, returning it.
    pub fn clear(&self) -> Option<EventLoop> {
        self.slot.borrow_mut().take()
    }

    /// Returns `true` if the shared loop is initialized and is `io_loop`.
    #[must_use]
    pub fn is_instance(&self, io_loop: &EventLoop) -> bool {
        self.slot
            .borrow()
            .as_ref()
            .is_some_and(|shared| shared.ptr_eq(io_loop))
    }
}
