//! Network fixtures
//!
//! Everything here runs on the test's [`EventLoop`]: the server accepts and
//! the client connects whenever the test drives the loop.
//!
//! | fixture | value | depends on |
//! |---|---|---|
//! | `unused_port` | [`UnusedPort`] | |
//! | `http_port` | `u16` | `unused_port` |
//! | `base_url` | `String` | `http_port` |
//! | `http_server` | [`HttpServer`] | `io_loop`, `unused_port`, the app fixture |
//! | `http_client` | [`HttpClient`] | `http_server` |
//!
//! The app fixture is named by [`Config::app_fixture`](crate::config::Config)
//! (`app` by default) and must return an [`App`].

mod app;
mod client;
mod port;
mod server;

pub use app::{text, App, Handler};
pub use client::HttpClient;
pub use port::{base_url, bind_unused_port, UnusedPort};
pub use server::HttpServer;

use crate::error::Error;
use crate::fixture::{names, FixtureRegistry};
use crate::io_loop::EventLoop;

pub(crate) fn register_fixtures(registry: &mut FixtureRegistry) {
    registry.register(names::UNUSED_PORT, |_| bind_unused_port());

    registry.register(names::HTTP_PORT, |request| {
        Ok(request.get::<UnusedPort>(names::UNUSED_PORT)?.port())
    });

    registry.register(names::BASE_URL, |request| {
        Ok(base_url(request.get::<u16>(names::HTTP_PORT)?))
    });

    registry.register(names::HTTP_SERVER, |request| {
        let io_loop = request.get::<EventLoop>(names::IO_LOOP)?;
        let unused = request.get::<UnusedPort>(names::UNUSED_PORT)?;
        let app_fixture = request.config().app_fixture.clone();
        let app = request.get::<App>(&app_fixture).map_err(|err| match err {
            Error::Setup(reason) => {
                Error::setup(format!("http_server needs an application: {reason}"))
            }
            other => other,
        })?;

        let server = HttpServer::new(app, io_loop.clone());
        server.add_socket(unused.take_listener()?)?;

        let deadline = request.config().async_test_timeout;
        let stopping = server.clone();
        request.add_finalizer(move || {
            stopping.stop();
            io_loop.run_sync(stopping.close_all_connections(), Some(deadline))
        });
        Ok(server)
    });

    registry.register(names::HTTP_CLIENT, |request| {
        let server = request.get::<HttpServer>(names::HTTP_SERVER)?;
        let client = HttpClient::new(server.io_loop().clone());

        let shared = request.shared_loop().clone();
        let closing = client.clone();
        request.add_finalizer(move || {
            if !shared.is_instance(closing.io_loop()) {
                closing.close();
            }
            Ok(())
        });
        Ok(client)
    });
}
