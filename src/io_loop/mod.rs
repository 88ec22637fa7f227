//! Per-test event loops
//!
//! Every async test runs on its own [`EventLoop`]. [`acquire`] builds one and
//! installs it as the thread's current loop; [`release`] uninstalls it and
//! closes it, unless it is the loop held by a [`SharedLoop`].
//!
//! # Example
//!
//! ```rust
//! use looptest::io_loop::{self, EventLoop, LoopOptions, SharedLoop};
//!
//! let shared = SharedLoop::new();
//! let io_loop = io_loop::acquire(&LoopOptions::default()).unwrap();
//! assert!(io_loop.is_current());
//!
//! io_loop::release(&io_loop, &shared).unwrap();
//! assert!(io_loop.is_closed());
//! assert!(EventLoop::current().is_none());
//! ```

mod event_loop;
mod shared;

pub use event_loop::{EventLoop, LoopId, LoopOptions, TimeoutHandle};
pub use shared::SharedLoop;

use tracing::debug;

use crate::error::Result;

/// Creates a fresh loop and installs it as the current loop.
///
/// # Errors
///
/// Returns an error if the loop cannot be built.
pub fn acquire(options: &LoopOptions) -> Result<EventLoop> {
    let io_loop = EventLoop::with_options(options.clone())?;
    io_loop.make_current();
    Ok(io_loop)
}

/// Uninstalls `io_loop` and releases its resources.
///
/// The close is skipped when `io_loop` is the shared loop, since other code
/// still depends on it.
///
/// # Errors
///
/// Returns an error if the loop is still running.
pub fn release(io_loop: &EventLoop, shared: &SharedLoop) -> Result<()> {
    EventLoop::clear_current();
    if shared.is_instance(io_loop) {
        debug!(loop_id = %io_loop.id(), "leaving shared event loop open");
        return Ok(());
    }
    io_loop.close()
}
