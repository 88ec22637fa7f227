//! Async test dispatch.
//!
//! [`dispatch`] decides whether a test needs async handling and, if so, runs
//! its body on the test's event loop under the resolved deadline:
//!
//! - `run_sync = true`: drive the loop until the body settles or the
//!   deadline elapses.
//! - `run_sync = false`: bound the body with [`crate::timeout::bounded`],
//!   start the loop, and stop it from a callback once the bounded future
//!   settles. Work scheduled on the loop keeps running until then.
//!
//! A panic in the body is re-raised unchanged in both modes.

use std::cell::RefCell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::time::Duration;

use futures::future::{self, LocalBoxFuture};
use futures::FutureExt;
use tracing::debug;

use crate::coroutine::{self, SuspensionSequence};
use crate::error::{Error, Result};
use crate::fixture::{names, Args};
use crate::io_loop::EventLoop;
use crate::item::{BodyResult, TestBody, TestItem};
use crate::marker::GenTest;
use crate::timeout;

/// Result of offering a test to the dispatcher.
#[derive(Debug)]
pub enum Dispatch {
    /// The test has no `gen_test` marker; the host must call it itself.
    NotApplicable,
    /// The dispatcher ran the test body.
    Completed(Result<()>),
}

impl Dispatch {
    /// Returns `true` if the dispatcher ran the body.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Dispatch::Completed(_))
    }
}

#[derive(Clone, Copy)]
enum Phase {
    Resolving,
    Invoked,
    Completed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Resolving => write!(f, "Resolving"),
            Phase::Invoked => write!(f, "Invoked"),
            Phase::Completed => write!(f, "Completed"),
        }
    }
}

/// Runs `item` if it carries a `gen_test` marker.
///
/// `funcargs` must hold every name in [`TestItem::fixturenames`], which for
/// a marked test includes `io_loop` and `resolved_deadline`.
pub fn dispatch(item: &TestItem, funcargs: &Args) -> Dispatch {
    match item.gen_test() {
        Some(marker) => Dispatch::Completed(run_marked(item, *marker, funcargs)),
        None => Dispatch::NotApplicable,
    }
}

fn run_marked(item: &TestItem, marker: GenTest, funcargs: &Args) -> Result<()> {
    debug!(test = item.name(), phase = %Phase::Resolving);
    let deadline = funcargs.get::<Duration>(names::RESOLVED_DEADLINE)?;
    let io_loop = funcargs.get::<EventLoop>(names::IO_LOOP)?;
    let args = funcargs.select(&item.signature().argnames())?;

    debug!(
        test = item.name(),
        phase = %Phase::Invoked,
        run_sync = marker.run_sync,
        deadline = ?deadline,
        loop_id = %io_loop.id(),
    );
    let body = invoke(item.body(), args);
    let outcome = if marker.run_sync {
        run_to_completion(&io_loop, body, deadline)
    } else {
        run_until_settled(&io_loop, body, deadline)
    };

    let kind = match &outcome {
        Ok(()) => "ok",
        Err(Error::Timeout(_)) => "timeout",
        Err(_) => "error",
    };
    debug!(test = item.name(), phase = %Phase::Completed, outcome = kind);
    outcome
}

/// Adapts any body to a future settling with the body's result.
fn invoke(body: &TestBody, args: Args) -> LocalBoxFuture<'static, BodyResult> {
    match body {
        TestBody::Native(body) => body(args),
        TestBody::Sequence(body) => {
            let mut sequence = body(args);
            coroutine::drive(move |resumed| sequence.resume(resumed))
        }
        TestBody::Sync(body) => {
            let body = Rc::clone(body);
            future::lazy(move |_| body(args)).boxed_local()
        }
    }
}

fn run_to_completion(
    io_loop: &EventLoop,
    body: LocalBoxFuture<'static, BodyResult>,
    deadline: Duration,
) -> Result<()> {
    io_loop
        .run_sync(body, Some(deadline))?
        .map_err(Error::from_body)
}

fn run_until_settled(
    io_loop: &EventLoop,
    body: LocalBoxFuture<'static, BodyResult>,
    deadline: Duration,
) -> Result<()> {
    let bounded = timeout::bounded(io_loop, deadline, AssertUnwindSafe(body).catch_unwind())?;

    let settled = Rc::new(RefCell::new(None));
    let slot = Rc::clone(&settled);
    let stopper = io_loop.clone();
    io_loop.add_future(bounded, move |result| {
        *slot.borrow_mut() = Some(result);
        stopper.stop();
    })?;
    io_loop.start()?;

    let result = settled.borrow_mut().take();
    match result {
        Some(Ok(Ok(body_result))) => body_result.map_err(Error::from_body),
        Some(Ok(Err(payload))) => panic::resume_unwind(payload),
        Some(Err(err)) => Err(err),
        None => Err(Error::Body(
            "event loop stopped before the test future settled".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::time::Instant;

    use super::*;
    use crate::error::BodyError;
    use crate::fixture::value;
    use crate::io_loop::LoopOptions;
    use crate::signature::Signature;

    fn funcargs(io_loop: &EventLoop, deadline: Duration) -> Args {
        let mut args = Args::new();
        args.insert(names::IO_LOOP, value(io_loop.clone()));
        args.insert(names::RESOLVED_DEADLINE, value(deadline));
        args
    }

    fn sleeper(delay: Duration) -> TestItem {
        TestItem::native("test_sleep", Signature::default(), move |_| async move {
            tokio::time::sleep(delay).await;
            Ok(())
        })
    }

    #[test]
    fn test_unmarked_not_applicable() {
        let io_loop = EventLoop::new().unwrap();
        let item = sleeper(Duration::ZERO);
        let outcome = dispatch(&item, &funcargs(&io_loop, Duration::from_secs(1)));
        assert!(matches!(outcome, Dispatch::NotApplicable));
    }

    #[test]
    fn test_both_modes_succeed() {
        for run_sync in [true, false] {
            let io_loop = EventLoop::new().unwrap();
            let item = sleeper(Duration::from_millis(5)).mark(GenTest::new().run_sync(run_sync));
            let outcome = dispatch(&item, &funcargs(&io_loop, Duration::from_secs(5)));
            assert!(matches!(outcome, Dispatch::Completed(Ok(()))), "run_sync = {run_sync}");
        }
    }

    #[test]
    fn test_both_modes_time_out() {
        let options = [LoopOptions::new(), LoopOptions::new().fallback_timeouts()];
        for run_sync in [true, false] {
            for option in &options {
                let io_loop = EventLoop::with_options(option.clone()).unwrap();
                let item = sleeper(Duration::from_secs(1)).mark(GenTest::new().run_sync(run_sync));
                let started = Instant::now();

                let outcome = dispatch(&item, &funcargs(&io_loop, Duration::from_millis(10)));
                assert!(matches!(outcome, Dispatch::Completed(Err(Error::Timeout(_)))));
                assert!(started.elapsed() < Duration::from_millis(900));
                assert_eq!(io_loop.pending_timeouts(), 0);
            }
        }
    }

    #[test]
    fn test_body_error_propagates() {
        for run_sync in [true, false] {
            let io_loop = EventLoop::new().unwrap();
            let item = TestItem::native("test_fail", Signature::default(), |_| async {
                Err::<(), BodyError>("expected 200, got 500".into())
            })
            .mark(GenTest::new().run_sync(run_sync));

            match dispatch(&item, &funcargs(&io_loop, Duration::from_secs(1))) {
                Dispatch::Completed(Err(Error::Body(err))) => {
                    assert_eq!(err.to_string(), "expected 200, got 500");
                }
                other => panic!("unexpected outcome: {other:?}"),
            }
        }
    }

    #[test]
    fn test_only_declared_args_passed() {
        let io_loop = EventLoop::new().unwrap();
        let mut args = funcargs(&io_loop, Duration::from_secs(1));
        args.insert("a", value(3_i32));

        let item = TestItem::native(
            "test_args",
            Signature::function([
                crate::signature::Param::required("a"),
                crate::signature::Param::defaulted("b"),
            ]),
            |args| async move {
                assert_eq!(args.len(), 1);
                assert_eq!(args.get::<i32>("a").unwrap(), 3);
                Ok(())
            },
        )
        .mark(GenTest::new());

        assert!(matches!(dispatch(&item, &args), Dispatch::Completed(Ok(()))));
    }

    #[test]
    fn test_missing_arg_is_setup_error() {
        let io_loop = EventLoop::new().unwrap();
        let item = TestItem::native("test_args", Signature::required(["a"]), |_| async { Ok(()) })
            .mark(GenTest::new());

        let outcome = dispatch(&item, &funcargs(&io_loop, Duration::from_secs(1)));
        assert!(matches!(outcome, Dispatch::Completed(Err(Error::Setup(_)))));
    }

    #[test]
    fn test_sync_and_sequence_bodies_dispatched() {
        let io_loop = EventLoop::new().unwrap();
        let ran = Rc::new(Cell::new(0));

        let counter = Rc::clone(&ran);
        let sync = TestItem::sync("test_sync", Signature::default(), move |_| {
            counter.set(counter.get() + 1);
            Ok(())
        })
        .mark(GenTest::new());
        assert!(matches!(
            dispatch(&sync, &funcargs(&io_loop, Duration::from_secs(1))),
            Dispatch::Completed(Ok(()))
        ));

        let counter = Rc::clone(&ran);
        let sequence = TestItem::sequence("test_gen", Signature::default(), move |_| {
            let counter = Rc::clone(&counter);
            let mut yielded = false;
            move |_: coroutine::Resumed| {
                if yielded {
                    counter.set(counter.get() + 1);
                    return coroutine::Step::Return(Ok(()));
                }
                yielded = true;
                coroutine::Step::Yield(coroutine::suspend(tokio::task::yield_now()))
            }
        })
        .mark(GenTest::new().run_sync(false));
        assert!(matches!(
            dispatch(&sequence, &funcargs(&io_loop, Duration::from_secs(1))),
            Dispatch::Completed(Ok(()))
        ));

        assert_eq!(ran.get(), 2);
    }

    #[test]
    fn test_sync_body_runs_inside_loop() {
        let io_loop = EventLoop::new().unwrap();
        let item = TestItem::sync("test_sync_timer", Signature::default(), |_| {
            let handle = tokio::runtime::Handle::try_current()?;
            drop(handle.spawn(async {}));
            Ok(())
        })
        .mark(GenTest::new());

        let outcome = dispatch(&item, &funcargs(&io_loop, Duration::from_secs(1)));
        assert!(matches!(outcome, Dispatch::Completed(Ok(()))), "{outcome:?}");
    }

    #[test]
    fn test_deferred_callback_not_awaited_without_run_sync() {
        let io_loop = EventLoop::new().unwrap();
        let fired = Rc::new(Cell::new(false));

        let flag = Rc::clone(&fired);
        let item = TestItem::native("test_deferred", Signature::required(["io_loop"]), move |args| {
            let flag = Rc::clone(&flag);
            async move {
                let io_loop = args.get::<EventLoop>("io_loop").unwrap();
                io_loop
                    .add_timeout(Duration::from_secs(1), move || flag.set(true))
                    .unwrap();
                Ok(())
            }
        })
        .mark(GenTest::new().run_sync(false));

        let started = Instant::now();
        let outcome = dispatch(&item, &funcargs(&io_loop, Duration::from_secs(5)));
        assert!(matches!(outcome, Dispatch::Completed(Ok(()))));
        assert!(started.elapsed() < Duration::from_millis(900));
        assert!(!fired.get());
        assert_eq!(io_loop.pending_timeouts(), 1);
    }

    #[test]
    #[should_panic(expected = "assertion inside body")]
    fn test_panic_propagates_without_run_sync() {
        let io_loop = EventLoop::new().unwrap();
        let item = TestItem::native("test_panic", Signature::default(), |_| async {
            panic!("assertion inside body");
        })
        .mark(GenTest::new().run_sync(false));
        let _ = dispatch(&item, &funcargs(&io_loop, Duration::from_secs(1)));
    }
}
