//! The `EventLoop` implementation.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::runtime::{Builder, Runtime};
use tokio::sync::Notify;
use tokio::task::{AbortHandle, JoinHandle, LocalSet};
use tracing::debug;

use crate::error::{Error, Result};

thread_local! {
    static CURRENT: RefCell<Option<EventLoop>> = const { RefCell::new(None) };
}

/// Unique identifier for an event loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LoopId(u64);

impl LoopId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw ID value.
    #[must_use]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for LoopId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Loop({})", self.0)
    }
}

/// Configuration for a new [`EventLoop`].
#[derive(Debug, Clone)]
pub struct LoopOptions {
    /// Bound futures with `tokio::time::timeout` instead of the loop-timer
    /// fallback in [`crate::timeout::with_timeout`].
    pub native_timeouts: bool,
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self {
            native_timeouts: true,
        }
    }
}

impl LoopOptions {
    /// Create a new default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use the loop-timer fallback for bounded futures.
    #[must_use]
    pub fn fallback_timeouts(mut self) -> Self {
        self.native_timeouts = false;
        self
    }
}

// Stand-in deadline for delays past what `Instant` can represent.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Handle to a callback scheduled with [`EventLoop::add_timeout`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TimeoutHandle(u64);

#[derive(Default)]
struct TimeoutTable {
    next_id: u64,
    pending: HashMap<u64, AbortHandle>,
}

/// A single-threaded event loop owned by one test.
///
/// Wraps a current-thread tokio runtime and a [`LocalSet`], so tasks spawned
/// on it do not need to be `Send`. Clones share the same loop.
///
/// # Example
///
/// ```rust
/// use looptest::io_loop::EventLoop;
/// use std::time::Duration;
///
/// let io_loop = EventLoop::new().unwrap();
/// let value = io_loop
///     .run_sync(async { 40 + 2 }, Some(Duration::from_secs(1)))
///     .unwrap();
/// assert_eq!(value, 42);
///
/// io_loop.close().unwrap();
/// assert!(io_loop.is_closed());
/// ```
#[derive(Clone)]
pub struct EventLoop {
    inner: Rc<LoopInner>,
}

struct LoopInner {
    id: LoopId,
    options: LoopOptions,
    runtime: RefCell<Option<Runtime>>,
    local: RefCell<Option<LocalSet>>,
    running: Cell<bool>,
    stop: Notify,
    timeouts: Rc<RefCell<TimeoutTable>>,
}

/// Clears the running flag even if the driven future panics.
struct RunningGuard<'a>(&'a Cell<bool>);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl EventLoop {
    /// Creates a new event loop with default options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the runtime cannot be built.
    pub fn new() -> Result<Self> {
        Self::with_options(LoopOptions::default())
    }

    /// Creates a new event loop with the given options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the runtime cannot be built.
    pub fn with_options(options: LoopOptions) -> Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let id = LoopId::next();
        debug!(loop_id = %id, native_timeouts = options.native_timeouts, "created event loop");

        Ok(Self {
            inner: Rc::new(LoopInner {
                id,
                options,
                runtime: RefCell::new(Some(runtime)),
                local: RefCell::new(Some(LocalSet::new())),
                running: Cell::new(false),
                stop: Notify::new(),
                timeouts: Rc::new(RefCell::new(TimeoutTable::default())),
            }),
        })
    }

    /// Returns the unique ID of this loop.
    #[must_use]
    pub fn id(&self) -> LoopId {
        self.inner.id
    }

    /// Returns the options this loop was built with.
    #[must_use]
    pub fn options(&self) -> &LoopOptions {
        &self.inner.options
    }

    /// Returns `true` if both handles refer to the same loop.
    #[must_use]
    pub fn ptr_eq(&self, other: &EventLoop) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Returns `true` once [`close`](Self::close) has released the loop.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.runtime.borrow().is_none()
    }

    /// Returns `true` while the loop is being driven.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running.get()
    }

    /// Installs this loop as the thread's current loop.
    pub fn make_current(&self) {
        CURRENT.with(|current| *current.borrow_mut() = Some(self.clone()));
    }

    /// Uninstalls whatever loop is current on this thread.
    pub fn clear_current() {
        let previous = CURRENT.with(|current| current.borrow_mut().take());
        drop(previous);
    }

    /// Returns the thread's current loop, if one is installed.
    #[must_use]
    pub fn current() -> Option<EventLoop> {
        CURRENT.with(|current| current.borrow().clone())
    }

    /// Returns `true` if this loop is the thread's current loop.
    #[must_use]
    pub fn is_current(&self) -> bool {
        CURRENT.with(|current| current.borrow().as_ref().is_some_and(|c| c.ptr_eq(self)))
    }

    fn with_runtime<R>(&self, f: impl FnOnce(&Runtime, &LocalSet) -> R) -> Result<R> {
        let runtime = self.inner.runtime.borrow();
        let local = self.inner.local.borrow();
        match (runtime.as_ref(), local.as_ref()) {
            (Some(runtime), Some(local)) => Ok(f(runtime, local)),
            _ => Err(Error::LoopClosed),
        }
    }

    fn enter_running(&self) -> Result<RunningGuard<'_>> {
        if self.inner.running.replace(true) {
            return Err(Error::LoopRunning);
        }
        Ok(RunningGuard(&self.inner.running))
    }

    /// Runs `f` with this loop's runtime entered, so tokio resources can be
    /// created outside of [`run_sync`](Self::run_sync).
    ///
    /// # Errors
    ///
    /// Returns [`Error::LoopClosed`] if the loop was closed.
    pub fn enter<R>(&self, f: impl FnOnce() -> R) -> Result<R> {
        self.with_runtime(|runtime, _| {
            let _guard = runtime.enter();
            f()
        })
    }

    /// Drives the loop until `future` settles or `timeout` elapses.
    ///
    /// Other tasks spawned on the loop make progress while the future is
    /// pending.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if the deadline elapses first,
    /// [`Error::LoopRunning`] when called from inside the loop, and
    /// [`Error::LoopClosed`] after [`close`](Self::close).
    pub fn run_sync<F: Future>(&self, future: F, timeout: Option<Duration>) -> Result<F::Output> {
        let _running = self.enter_running()?;
        self.with_runtime(|runtime, local| {
            runtime.block_on(local.run_until(async move {
                match timeout {
                    Some(deadline) => tokio::time::timeout(deadline, future)
                        .await
                        .map_err(|_| Error::Timeout(deadline)),
                    None => Ok(future.await),
                }
            }))
        })?
    }

    /// Runs the loop until [`stop`](Self::stop) is called.
    ///
    /// A `stop` issued before `start` makes `start` return as soon as the
    /// already-scheduled work yields.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LoopRunning`] when called from inside the loop, and
    /// [`Error::LoopClosed`] after [`close`](Self::close).
    pub fn start(&self) -> Result<()> {
        let _running = self.enter_running()?;
        debug!(loop_id = %self.inner.id, "starting event loop");
        self.with_runtime(|runtime, local| {
            runtime.block_on(local.run_until(self.inner.stop.notified()));
        })
    }

    /// Asks a running [`start`](Self::start) call to return.
    pub fn stop(&self) {
        self.inner.stop.notify_one();
    }

    /// Spawns a task on this loop.
    ///
    /// The task runs the next time the loop is driven.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LoopClosed`] after [`close`](Self::close).
    pub fn spawn<F>(&self, future: F) -> Result<JoinHandle<F::Output>>
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        self.with_runtime(|_, local| local.spawn_local(future))
    }

    /// Runs `callback` once `delay` has passed, measured from now.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LoopClosed`] after [`close`](Self::close).
    pub fn add_timeout<C>(&self, delay: Duration, callback: C) -> Result<TimeoutHandle>
    where
        C: FnOnce() + 'static,
    {
        let now = tokio::time::Instant::now();
        let deadline = now
            .checked_add(delay)
            .unwrap_or_else(|| now + FAR_FUTURE);
        let id = {
            let mut table = self.inner.timeouts.borrow_mut();
            table.next_id += 1;
            table.next_id
        };

        let table = Rc::clone(&self.inner.timeouts);
        let task = self.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            table.borrow_mut().pending.remove(&id);
            callback();
        })?;

        self.inner
            .timeouts
            .borrow_mut()
            .pending
            .insert(id, task.abort_handle());
        Ok(TimeoutHandle(id))
    }

    /// Cancels a callback scheduled with [`add_timeout`](Self::add_timeout).
    ///
    /// Removing a timeout that already fired is a no-op.
    pub fn remove_timeout(&self, handle: TimeoutHandle) {
        let removed = self.inner.timeouts.borrow_mut().pending.remove(&handle.0);
        if let Some(task) = removed {
            task.abort();
        }
    }

    /// Returns the number of scheduled timeouts that have not fired.
    #[must_use]
    pub fn pending_timeouts(&self) -> usize {
        self.inner.timeouts.borrow().pending.len()
    }

    /// Calls `callback` with the output of `future` once it settles.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LoopClosed`] after [`close`](Self::close).
    pub fn add_future<F, C>(&self, future: F, callback: C) -> Result<()>
    where
        F: Future + 'static,
        C: FnOnce(F::Output) + 'static,
    {
        self.spawn(async move { callback(future.await) })?;
        Ok(())
    }

    /// Closes the loop, dropping every task still scheduled on it.
    ///
    /// Sockets owned by those tasks (accepted connections included) are
    /// closed with them. Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LoopRunning`] when called from inside the loop.
    pub fn close(&self) -> Result<()> {
        if self.inner.running.get() {
            return Err(Error::LoopRunning);
        }
        let local = self
            .inner
            .local
            .try_borrow_mut()
            .map_err(|_| Error::LoopRunning)?
            .take();
        let runtime = self
            .inner
            .runtime
            .try_borrow_mut()
            .map_err(|_| Error::LoopRunning)?
            .take();
        self.inner.timeouts.borrow_mut().pending.clear();

        if let Some(runtime) = runtime {
            {
                let _guard = runtime.enter();
                drop(local);
            }
            runtime.shutdown_background();
            debug!(loop_id = %self.inner.id, "closed event loop");
        }
        Ok(())
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("id", &self.inner.id)
            .field("closed", &self.is_closed())
            .field("pending_timeouts", &self.pending_timeouts())
            .finish()
    }
}

impl Drop for LoopInner {
    fn drop(&mut self) {
        let local = self.local.get_mut().take();
        if let Some(runtime) = self.runtime.get_mut().take() {
            {
                let _guard = runtime.enter();
                drop(local);
            }
            runtime.shutdown_background();
        }
    }
}
