//! Test items.
//!
//! A [`TestItem`] pairs a body with its declared [`Signature`], an optional
//! [`GenTest`] marker, and fixture overrides local to the test.

use std::fmt;
use std::future::Future;
use std::rc::Rc;

use futures::future::LocalBoxFuture;
use futures::FutureExt;

use crate::coroutine::SuspensionSequence;
use crate::error::{BodyError, Result};
use crate::fixture::{names, Args, FixtureRegistry, Request};
use crate::marker::GenTest;
use crate::signature::Signature;

/// What a test body returns.
pub type BodyResult = std::result::Result<(), BodyError>;

/// Converts a test function's return value into a [`BodyResult`].
pub trait IntoBodyResult {
    /// Performs the conversion.
    fn into_body_result(self) -> BodyResult;
}

impl IntoBodyResult for () {
    fn into_body_result(self) -> BodyResult {
        Ok(())
    }
}

impl<E: Into<BodyError>> IntoBodyResult for std::result::Result<(), E> {
    fn into_body_result(self) -> BodyResult {
        self.map_err(Into::into)
    }
}

type SyncBody = Rc<dyn Fn(Args) -> BodyResult>;
type NativeBody = Box<dyn Fn(Args) -> LocalBoxFuture<'static, BodyResult>>;
type SequenceBody = Box<dyn Fn(Args) -> Box<dyn SuspensionSequence>>;

/// The callable part of a test.
pub enum TestBody {
    /// Runs to completion when called.
    Sync(SyncBody),
    /// Returns a future.
    Native(NativeBody),
    /// Returns a generator-style sequence of suspensions.
    Sequence(SequenceBody),
}

impl TestBody {
    /// Returns `true` unless the body is [`TestBody::Sync`].
    #[must_use]
    pub fn is_async(&self) -> bool {
        !matches!(self, TestBody::Sync(_))
    }

    fn kind(&self) -> &'static str {
        match self {
            TestBody::Sync(_) => "sync",
            TestBody::Native(_) => "native",
            TestBody::Sequence(_) => "sequence",
        }
    }
}

/// One test, as seen by the dispatcher.
///
/// # Example
///
/// ```rust
/// use looptest::item::TestItem;
/// use looptest::marker::GenTest;
/// use looptest::signature::Signature;
///
/// let item = TestItem::native("test_ping", Signature::required(["base_url"]), |_args| async {
///     Ok(())
/// })
/// .mark(GenTest::new());
///
/// assert_eq!(item.fixturenames(), vec!["base_url", "io_loop", "resolved_deadline"]);
/// ```
pub struct TestItem {
    name: String,
    signature: Signature,
    body: TestBody,
    marker: Option<GenTest>,
    fixtures: FixtureRegistry,
}

impl TestItem {
    /// Creates an unmarked test.
    #[must_use]
    pub fn new(name: impl Into<String>, signature: Signature, body: TestBody) -> Self {
        Self {
            name: name.into(),
            signature,
            body,
            marker: None,
            fixtures: FixtureRegistry::new(),
        }
    }

    /// Creates a test with a plain function body.
    #[must_use]
    pub fn sync<F>(name: impl Into<String>, signature: Signature, body: F) -> Self
    where
        F: Fn(Args) -> BodyResult + 'static,
    {
        Self::new(name, signature, TestBody::Sync(Rc::new(body)))
    }

    /// Creates a test with an async body.
    #[must_use]
    pub fn native<F, Fut>(name: impl Into<String>, signature: Signature, body: F) -> Self
    where
        F: Fn(Args) -> Fut + 'static,
        Fut: Future<Output = BodyResult> + 'static,
    {
        let body: NativeBody = Box::new(move |args| body(args).boxed_local());
        Self::new(name, signature, TestBody::Native(body))
    }

    /// Creates a test with a generator-style body.
    #[must_use]
    pub fn sequence<F, S>(name: impl Into<String>, signature: Signature, body: F) -> Self
    where
        F: Fn(Args) -> S + 'static,
        S: SuspensionSequence + 'static,
    {
        let body: SequenceBody = Box::new(move |args| Box::new(body(args)));
        Self::new(name, signature, TestBody::Sequence(body))
    }

    /// Attaches a `gen_test` marker.
    #[must_use]
    pub fn mark(mut self, marker: GenTest) -> Self {
        self.marker = Some(marker);
        self
    }

    /// Overrides a fixture for this test only.
    #[must_use]
    pub fn fixture<T, F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        T: 'static,
        F: Fn(&mut Request<'_>) -> Result<T> + 'static,
    {
        self.fixtures.register(name, factory);
        self
    }

    /// Returns the test name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the declared signature.
    #[must_use]
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Returns the body.
    #[must_use]
    pub fn body(&self) -> &TestBody {
        &self.body
    }

    /// Returns the `gen_test` marker, if any.
    #[must_use]
    pub fn gen_test(&self) -> Option<&GenTest> {
        self.marker.as_ref()
    }

    /// Returns the fixture overrides local to this test.
    #[must_use]
    pub fn fixtures(&self) -> &FixtureRegistry {
        &self.fixtures
    }

    /// Fixtures to set up before the test runs.
    ///
    /// A marked test always gets `io_loop` and `resolved_deadline`, after the
    /// names its signature declares.
    #[must_use]
    pub fn fixturenames(&self) -> Vec<&str> {
        let mut fixturenames = self.signature.argnames();
        if self.marker.is_some() {
            for injected in [names::IO_LOOP, names::RESOLVED_DEADLINE] {
                if !fixturenames.contains(&injected) {
                    fixturenames.push(injected);
                }
            }
        }
        fixturenames
    }
}

impl fmt::Debug for TestItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestItem")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .field("body", &self.body.kind())
            .field("marker", &self.marker)
            .field("fixtures", &self.fixtures)
            .finish()
    }
}
