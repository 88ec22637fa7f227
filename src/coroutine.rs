//! Generator-style test bodies.
//!
//! A [`SuspensionSequence`] produces one [`Step`] at a time: it yields
//! futures to wait on and is resumed with each one's result, until it
//! returns. [`drive`] turns such a sequence into an ordinary future.
//!
//! # Example
//!
//! ```rust
//! use looptest::coroutine::{drive, suspend, Resumed, Step};
//! use looptest::io_loop::EventLoop;
//!
//! let mut step = 0;
//! let sequence = move |resumed: Resumed| {
//!     step += 1;
//!     match step {
//!         1 => Step::Yield(suspend(async { 21_u32 })),
//!         _ => {
//!             let value = *resumed.unwrap().downcast::<u32>().unwrap();
//!             assert_eq!(value * 2, 42);
//!             Step::Return(Ok(()))
//!         }
//!     }
//! };
//!
//! let io_loop = EventLoop::new().unwrap();
//! io_loop.run_sync(drive(sequence), None).unwrap().unwrap();
//! ```

use std::any::Any;
use std::future::Future;

use futures::future::{join_all, LocalBoxFuture};
use futures::FutureExt;

use crate::error::BodyError;
use crate::item::BodyResult;

/// What a suspension resolved to, passed back into the sequence.
pub type Resumed = std::result::Result<Box<dyn Any>, BodyError>;

/// A future the sequence waits on.
pub type Suspension = LocalBoxFuture<'static, Resumed>;

/// One step of a generator-style body.
pub enum Step {
    /// Wait for the future, then resume with its result.
    Yield(Suspension),
    /// Wait for every future, then resume with a `Vec<Box<dyn Any>>` of
    /// their values, or the first failure.
    YieldAll(Vec<Suspension>),
    /// The body finished.
    Return(BodyResult),
}

/// A generator-style test body.
pub trait SuspensionSequence {
    /// Advances the body. The first call receives `Ok(Box::new(()))`.
    fn resume(&mut self, resumed: Resumed) -> Step;
}

impl<F> SuspensionSequence for F
where
    F: FnMut(Resumed) -> Step,
{
    fn resume(&mut self, resumed: Resumed) -> Step {
        self(resumed)
    }
}

/// Wraps an infallible future as a [`Suspension`].
pub fn suspend<F>(future: F) -> Suspension
where
    F: Future + 'static,
    F::Output: 'static,
{
    future
        .map(|output| Ok(Box::new(output) as Box<dyn Any>))
        .boxed_local()
}

/// Wraps a fallible future as a [`Suspension`]; its error resumes the
/// sequence as a failure.
pub fn suspend_result<F, T, E>(future: F) -> Suspension
where
    F: Future<Output = std::result::Result<T, E>> + 'static,
    T: 'static,
    E: Into<BodyError>,
{
    future
        .map(|result| {
            result
                .map(|output| Box::new(output) as Box<dyn Any>)
                .map_err(Into::into)
        })
        .boxed_local()
}

/// Runs `sequence` to its return value.
pub fn drive<S>(mut sequence: S) -> LocalBoxFuture<'static, BodyResult>
where
    S: SuspensionSequence + 'static,
{
    async move {
        let mut resumed: Resumed = Ok(Box::new(()));
        loop {
            resumed = match sequence.resume(resumed) {
                Step::Yield(suspension) => suspension.await,
                Step::YieldAll(suspensions) => join_all(suspensions)
                    .await
                    .into_iter()
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map(|values| Box::new(values) as Box<dyn Any>),
                Step::Return(result) => return result,
            };
        }
    }
    .boxed_local()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io_loop::EventLoop;

    struct Countdown {
        remaining: u32,
        seen: Vec<u32>,
    }

    impl SuspensionSequence for Countdown {
        fn resume(&mut self, resumed: Resumed) -> Step {
            if let Ok(value) = resumed.and_then(|v| v.downcast::<u32>().map_err(|_| "not a u32".into())) {
                self.seen.push(*value);
            }
            if self.remaining == 0 {
                assert_eq!(self.seen, vec![3, 2, 1]);
                return Step::Return(Ok(()));
            }
            let next = self.remaining;
            self.remaining -= 1;
            Step::Yield(suspend(async move { next }))
        }
    }

    #[test]
    fn test_sequence_resumed_in_order() {
        let io_loop = EventLoop::new().unwrap();
        let body = drive(Countdown {
            remaining: 3,
            seen: Vec::new(),
        });
        io_loop.run_sync(body, None).unwrap().unwrap();
    }

    #[test]
    fn test_yield_all_collects_values() {
        let io_loop = EventLoop::new().unwrap();
        let mut first = true;
        let body = drive(move |resumed: Resumed| {
            if first {
                first = false;
                return Step::YieldAll(vec![suspend(async { 1_u8 }), suspend(async { 2_u8 })]);
            }
            let values = resumed.unwrap().downcast::<Vec<Box<dyn Any>>>().unwrap();
            let values: Vec<u8> = values.iter().map(|v| *v.downcast_ref::<u8>().unwrap()).collect();
            assert_eq!(values, vec![1, 2]);
            Step::Return(Ok(()))
        });
        io_loop.run_sync(body, None).unwrap().unwrap();
    }

    #[test]
    fn test_failure_resumes_sequence() {
        let io_loop = EventLoop::new().unwrap();
        let mut first = true;
        let body = drive(move |resumed: Resumed| {
            if first {
                first = false;
                return Step::Yield(suspend_result(async { Err::<(), _>("refused") }));
            }
            match resumed {
                Err(err) => Step::Return(Err(format!("caught: {err}").into())),
                Ok(_) => Step::Return(Ok(())),
            }
        });
        let result = io_loop.run_sync(body, None).unwrap();
        assert_eq!(result.unwrap_err().to_string(), "caught: refused");
    }
}
