//! # looptest
//!
//! > Async tests on an isolated event loop, with deadlines and HTTP fixtures
//!
//! **looptest** runs each asynchronous test on a fresh single-threaded event
//! loop, bounds it with a deadline, and tears the loop down afterwards. Tests
//! ask for fixtures by naming them as parameters.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use looptest::prelude::*;
//!
//! fn fixtures(session: &mut Session) {
//!     session.register("app", |_| {
//!         Ok(App::new().get("/", |_| async { text(StatusCode::OK, "Hello, world") }))
//!     });
//! }
//!
//! #[looptest::gen_test(timeout = 1.0, fixtures = fixtures)]
//! async fn test_hello(http_client: HttpClient, base_url: String) {
//!     let response = http_client.get(&base_url).await.unwrap();
//!     assert_eq!(response.body().as_ref(), b"Hello, world");
//! }
//! ```
//!
//! ## Features
//!
//! - **Per-test loops** - every test gets its own [`io_loop::EventLoop`]
//! - **Deadlines** - per test via `timeout`, globally via `ASYNC_TEST_TIMEOUT`
//! - **Two execution modes** - `run_sync` or start/stop driving
//! - **Fixtures** - `io_loop`, `unused_port`, `http_port`, `base_url`,
//!   `http_server`, `http_client`

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod coroutine;
pub mod dispatch;
pub mod error;
pub mod fixture;
pub mod io_loop;
pub mod item;
pub mod marker;
#[cfg(feature = "http")]
pub mod net;
pub mod session;
pub mod signature;
pub mod timeout;

/// Prelude for convenient imports
///
/// ```rust
/// use looptest::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{BodyError, Error, Result};
    pub use crate::fixture::{names, Args, Request};
    pub use crate::io_loop::{EventLoop, LoopOptions, SharedLoop};
    pub use crate::item::{BodyResult, TestItem};
    pub use crate::marker::GenTest;
    pub use crate::session::Session;
    pub use crate::signature::{Param, Signature};

    #[cfg(feature = "http")]
    pub use crate::net::{text, App, HttpClient, HttpServer};
    #[cfg(feature = "http")]
    pub use http::StatusCode;
}

// Re-exports
pub use error::{Error, Result};

// Re-export the test macro when macros feature is enabled
#[cfg(feature = "macros")]
pub use looptest_macros::gen_test;
