//! Deadlines for in-flight futures.
//!
//! [`bounded`] wraps a future so it resolves to its own output or to
//! [`Error::Timeout`], whichever comes first. Loops built with
//! [`LoopOptions::native_timeouts`](crate::io_loop::LoopOptions) use
//! `tokio::time::timeout`; otherwise [`with_timeout`] builds the same
//! behavior out of the loop's own timer callbacks.
//!
//! # Example
//!
//! ```rust
//! use looptest::io_loop::{EventLoop, LoopOptions};
//! use looptest::timeout::with_timeout;
//! use std::time::Duration;
//!
//! let io_loop = EventLoop::with_options(LoopOptions::new().fallback_timeouts()).unwrap();
//! let slow = async { tokio::time::sleep(Duration::from_secs(5)).await };
//! let bounded = with_timeout(&io_loop, Duration::from_millis(10), slow).unwrap();
//!
//! let result = io_loop.run_sync(bounded, None).unwrap();
//! assert!(result.unwrap_err().is_timeout());
//! assert_eq!(io_loop.pending_timeouts(), 0);
//! ```

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use pin_project::{pin_project, pinned_drop};

use crate::error::{Error, Result};
use crate::io_loop::{EventLoop, TimeoutHandle};

#[derive(Default)]
struct TimerState {
    expired: bool,
    waker: Option<Waker>,
}

/// A future bounded by a timer scheduled on an [`EventLoop`].
///
/// Created by [`with_timeout`]. The timer is removed from the loop as soon
/// as the inner future settles or this future is dropped.
#[pin_project(PinnedDrop)]
pub struct BoundedFuture<F> {
    #[pin]
    inner: F,
    io_loop: EventLoop,
    timer: Option<TimeoutHandle>,
    state: Rc<RefCell<TimerState>>,
    deadline: Duration,
}

#[pinned_drop]
impl<F> PinnedDrop for BoundedFuture<F> {
    fn drop(self: Pin<&mut Self>) {
        let this = self.project();
        if let Some(timer) = this.timer.take() {
            this.io_loop.remove_timeout(timer);
        }
    }
}

impl<F> BoundedFuture<F> {
    /// Returns the deadline this future was bounded with.
    #[must_use]
    pub fn deadline(&self) -> Duration {
        self.deadline
    }
}

impl<F: Future> Future for BoundedFuture<F> {
    type Output = Result<F::Output>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        if let Poll::Ready(output) = this.inner.poll(cx) {
            if let Some(timer) = this.timer.take() {
                this.io_loop.remove_timeout(timer);
            }
            return Poll::Ready(Ok(output));
        }

        let mut state = this.state.borrow_mut();
        if state.expired {
            // The timer removed itself from the loop when it fired.
            this.timer.take();
            return Poll::Ready(Err(Error::Timeout(*this.deadline)));
        }
        state.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

/// Bounds `future` with a one-shot timer on `io_loop`.
///
/// # Errors
///
/// Returns [`Error::LoopClosed`] if the timer cannot be scheduled.
pub fn with_timeout<F: Future>(
    io_loop: &EventLoop,
    deadline: Duration,
    future: F,
) -> Result<BoundedFuture<F>> {
    let state = Rc::new(RefCell::new(TimerState::default()));
    let expiry = Rc::clone(&state);
    let timer = io_loop.add_timeout(deadline, move || {
        let waker = {
            let mut state = expiry.borrow_mut();
            state.expired = true;
            state.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    })?;

    Ok(BoundedFuture {
        inner: future,
        io_loop: io_loop.clone(),
        timer: Some(timer),
        state,
        deadline,
    })
}

/// A future bounded by whichever timeout strategy its loop uses.
#[pin_project(project = BoundedProj)]
pub enum Bounded<F> {
    /// Bounded by `tokio::time::timeout`.
    Native {
        /// The wrapped future.
        #[pin]
        inner: tokio::time::Timeout<F>,
        /// Reported in [`Error::Timeout`].
        deadline: Duration,
    },
    /// Bounded by [`with_timeout`].
    Fallback {
        /// The wrapped future.
        #[pin]
        inner: BoundedFuture<F>,
    },
}

impl<F: Future> Future for Bounded<F> {
    type Output = Result<F::Output>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.project() {
            BoundedProj::Native { inner, deadline } => inner
                .poll(cx)
                .map(|result| result.map_err(|_| Error::Timeout(*deadline))),
            BoundedProj::Fallback { inner } => inner.poll(cx),
        }
    }
}

/// Bounds `future` by `deadline`, starting now.
///
/// # Errors
///
/// Returns [`Error::LoopClosed`] if `io_loop` was closed.
pub fn bounded<F: Future>(io_loop: &EventLoop, deadline: Duration, future: F) -> Result<Bounded<F>> {
    if io_loop.options().native_timeouts {
        let inner = io_loop.enter(|| tokio::time::timeout(deadline, future))?;
        Ok(Bounded::Native { inner, deadline })
    } else {
        Ok(Bounded::Fallback {
            inner: with_timeout(io_loop, deadline, future)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io_loop::LoopOptions;
    use std::time::Instant;

    fn loops() -> Vec<EventLoop> {
        vec![
            EventLoop::with_options(LoopOptions::new()).unwrap(),
            EventLoop::with_options(LoopOptions::new().fallback_timeouts()).unwrap(),
        ]
    }

    #[test]
    fn test_settles_before_deadline() {
        for io_loop in loops() {
            let future = bounded(&io_loop, Duration::from_secs(5), async { "done" }).unwrap();
            let result = io_loop.run_sync(future, None).unwrap();
            assert_eq!(result.unwrap(), "done");
            assert_eq!(io_loop.pending_timeouts(), 0);
        }
    }

    #[test]
    fn test_deadline_elapses_first() {
        for io_loop in loops() {
            let started = Instant::now();
            let slow = async { tokio::time::sleep(Duration::from_secs(1)).await };
            let future = bounded(&io_loop, Duration::from_millis(10), slow).unwrap();

            let result = io_loop.run_sync(future, None).unwrap();
            assert!(matches!(result, Err(Error::Timeout(d)) if d == Duration::from_millis(10)));
            assert!(started.elapsed() < Duration::from_millis(900));
            assert_eq!(io_loop.pending_timeouts(), 0);
        }
    }

    #[test]
    fn test_huge_deadline_settles_in_both_modes() {
        for io_loop in loops() {
            let future = bounded(&io_loop, Duration::from_secs(u64::MAX / 2), async { 1 }).unwrap();
            let result = io_loop.run_sync(future, None).unwrap();
            assert_eq!(result.unwrap(), 1);
            assert_eq!(io_loop.pending_timeouts(), 0);
        }
    }

    #[test]
    fn test_fallback_timer_removed_on_settle() {
        let io_loop = EventLoop::with_options(LoopOptions::new().fallback_timeouts()).unwrap();
        let future = with_timeout(&io_loop, Duration::from_secs(5), async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            1
        })
        .unwrap();
        assert_eq!(future.deadline(), Duration::from_secs(5));
        assert_eq!(io_loop.pending_timeouts(), 1);

        let result = io_loop.run_sync(future, None).unwrap();
        assert_eq!(result.unwrap(), 1);
        assert_eq!(io_loop.pending_timeouts(), 0);
    }

    #[test]
    fn test_fallback_timer_removed_on_drop() {
        let io_loop = EventLoop::with_options(LoopOptions::new().fallback_timeouts()).unwrap();
        let future = with_timeout(&io_loop, Duration::from_secs(5), std::future::pending::<()>()).unwrap();
        assert_eq!(io_loop.pending_timeouts(), 1);

        drop(future);
        assert_eq!(io_loop.pending_timeouts(), 0);
    }

    #[test]
    fn test_body_error_passes_through() {
        for io_loop in loops() {
            let failing = async { Err::<(), &str>("boom") };
            let future = bounded(&io_loop, Duration::from_secs(1), failing).unwrap();
            let result = io_loop.run_sync(future, None).unwrap();
            assert_eq!(result.unwrap(), Err("boom"));
        }
    }
}
