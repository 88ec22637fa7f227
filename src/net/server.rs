//! HTTP/1 server running on a test's event loop.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::net::SocketAddr;
use std::pin::pin;
use std::rc::Rc;

use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Notify};
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::io_loop::EventLoop;

use super::App;

/// Counts open connections and tells them when to shut down.
struct ConnectionTracker {
    active: Cell<usize>,
    idle: Notify,
    shutdown: watch::Sender<bool>,
}

impl ConnectionTracker {
    fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            active: Cell::new(0),
            idle: Notify::new(),
            shutdown,
        }
    }

    fn open(self: &Rc<Self>) -> ConnectionGuard {
        self.active.set(self.active.get() + 1);
        ConnectionGuard(Rc::clone(self))
    }
}

/// Marks a connection closed when dropped, including when its task is
/// aborted.
struct ConnectionGuard(Rc<ConnectionTracker>);

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let remaining = self.0.active.get().saturating_sub(1);
        self.0.active.set(remaining);
        if remaining == 0 {
            self.0.idle.notify_waiters();
        }
    }
}

struct ServerInner {
    app: App,
    io_loop: EventLoop,
    accepting: RefCell<Vec<AbortHandle>>,
    addrs: RefCell<Vec<SocketAddr>>,
    stopped: Cell<bool>,
    tracker: Rc<ConnectionTracker>,
}

/// Serves an [`App`] over HTTP/1 on an [`EventLoop`].
///
/// Sockets are attached with [`add_socket`](Self::add_socket) and accepted
/// whenever the loop is driven.
#[derive(Clone)]
pub struct HttpServer {
    inner: Rc<ServerInner>,
}

impl HttpServer {
    /// Creates a server for `app` bound to `io_loop`.
    #[must_use]
    pub fn new(app: App, io_loop: EventLoop) -> Self {
        Self {
            inner: Rc::new(ServerInner {
                app,
                io_loop,
                accepting: RefCell::new(Vec::new()),
                addrs: RefCell::new(Vec::new()),
                stopped: Cell::new(false),
                tracker: Rc::new(ConnectionTracker::new()),
            }),
        }
    }

    /// Starts accepting connections on `listener`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] after [`stop`](Self::stop), [`Error::Io`] if
    /// the socket cannot be registered with the loop, and
    /// [`Error::LoopClosed`] if the loop was closed.
    pub fn add_socket(&self, listener: std::net::TcpListener) -> Result<SocketAddr> {
        if self.is_stopped() {
            return Err(Error::http("server is stopped"));
        }
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;
        let listener = self.inner.io_loop.enter(|| TcpListener::from_std(listener))??;

        let task = self.inner.io_loop.spawn(accept_loop(
            listener,
            self.inner.app.clone(),
            Rc::clone(&self.inner.tracker),
        ))?;
        self.inner.accepting.borrow_mut().push(task.abort_handle());
        self.inner.addrs.borrow_mut().push(addr);
        debug!(%addr, loop_id = %self.inner.io_loop.id(), "http server listening");
        Ok(addr)
    }

    /// Stops accepting new connections. Open connections are left alone.
    pub fn stop(&self) {
        if self.inner.stopped.replace(true) {
            return;
        }
        for task in self.inner.accepting.borrow_mut().drain(..) {
            task.abort();
        }
        debug!(loop_id = %self.inner.io_loop.id(), "http server stopped");
    }

    /// Shuts down every open connection once its in-flight request is
    /// answered, and waits for them to close.
    pub async fn close_all_connections(&self) {
        let tracker = &self.inner.tracker;
        tracker.shutdown.send_replace(true);
        while tracker.active.get() > 0 {
            let idle = tracker.idle.notified();
            if tracker.active.get() == 0 {
                break;
            }
            idle.await;
        }
    }

    /// Returns `true` after [`stop`](Self::stop).
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.get()
    }

    /// Returns the port of the first attached socket.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        self.inner.addrs.borrow().first().map(SocketAddr::port)
    }

    /// Returns the loop this server runs on.
    #[must_use]
    pub fn io_loop(&self) -> &EventLoop {
        &self.inner.io_loop
    }

    /// Returns the application being served.
    #[must_use]
    pub fn app(&self) -> &App {
        &self.inner.app
    }

    /// Returns the number of open connections.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.inner.tracker.active.get()
    }
}

impl fmt::Debug for HttpServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpServer")
            .field("addrs", &self.inner.addrs.borrow())
            .field("stopped", &self.is_stopped())
            .field("active_connections", &self.active_connections())
            .field("io_loop", &self.inner.io_loop)
            .finish()
    }
}

async fn accept_loop(listener: TcpListener, app: App, tracker: Rc<ConnectionTracker>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!(%peer, "accepted connection");
                let guard = tracker.open();
                tokio::task::spawn_local(serve_connection(stream, app.clone(), guard));
            }
            Err(err) => {
                warn!(error = %err, "failed to accept connection");
                tokio::task::yield_now().await;
            }
        }
    }
}

async fn serve_connection(stream: TcpStream, app: App, guard: ConnectionGuard) {
    let mut shutdown = guard.0.shutdown.subscribe();
    let service = service_fn(move |request: hyper::Request<Incoming>| {
        let app = app.clone();
        async move {
            let (parts, body) = request.into_parts();
            let body = body.collect().await?.to_bytes();
            let response = app.handle(http::Request::from_parts(parts, body)).await;
            Ok::<_, hyper::Error>(response.map(Full::new))
        }
    });

    let mut connection = pin!(http1::Builder::new().serve_connection(TokioIo::new(stream), service));
    if *shutdown.borrow_and_update() {
        connection.as_mut().graceful_shutdown();
    }

    let result = tokio::select! {
        result = connection.as_mut() => result,
        _ = shutdown.changed() => {
            connection.as_mut().graceful_shutdown();
            connection.as_mut().await
        }
    };
    if let Err(err) = result {
        debug!(error = %err, "connection closed with error");
    }
    drop(guard);
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use http::StatusCode;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;
    use crate::net::{bind_unused_port, text};

    fn hello_app() -> App {
        App::new().get("/", |_| async { text(StatusCode::OK, "Hello, world") })
    }

    async fn raw_get(port: u16, keep_alive: bool) -> (TcpStream, String) {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let connection = if keep_alive { "keep-alive" } else { "close" };
        let request = format!("GET / HTTP/1.1\r\nHost: localhost\r\nConnection: {connection}\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();

        let mut buf = Vec::new();
        if keep_alive {
            buf.resize(1024, 0);
            let n = stream.read(&mut buf).await.unwrap();
            buf.truncate(n);
        } else {
            stream.read_to_end(&mut buf).await.unwrap();
        }
        (stream, String::from_utf8_lossy(&buf).into_owned())
    }

    #[test]
    fn test_serves_app_on_loop() {
        let io_loop = EventLoop::new().unwrap();
        let unused = bind_unused_port().unwrap();
        let server = HttpServer::new(hello_app(), io_loop.clone());
        let addr = server.add_socket(unused.take_listener().unwrap()).unwrap();
        assert_eq!(server.port(), Some(addr.port()));

        let (_, response) = io_loop
            .run_sync(raw_get(addr.port(), false), Some(Duration::from_secs(5)))
            .unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");
        assert!(response.ends_with("Hello, world"), "{response}");
    }

    #[test]
    fn test_close_all_connections_waits_for_keep_alive() {
        let io_loop = EventLoop::new().unwrap();
        let unused = bind_unused_port().unwrap();
        let server = HttpServer::new(hello_app(), io_loop.clone());
        let port = server.add_socket(unused.take_listener().unwrap()).unwrap().port();

        let (mut stream, response) = io_loop
            .run_sync(raw_get(port, true), Some(Duration::from_secs(5)))
            .unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert_eq!(server.active_connections(), 1);

        server.stop();
        assert!(server.is_stopped());
        io_loop
            .run_sync(server.close_all_connections(), Some(Duration::from_secs(5)))
            .unwrap();
        assert_eq!(server.active_connections(), 0);

        let mut rest = Vec::new();
        let n = io_loop
            .run_sync(async move { stream.read_to_end(&mut rest).await }, Some(Duration::from_secs(5)))
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn test_stopped_server_rejects_sockets() {
        let io_loop = EventLoop::new().unwrap();
        let server = HttpServer::new(App::new(), io_loop);
        server.stop();

        let unused = bind_unused_port().unwrap();
        let err = server.add_socket(unused.take_listener().unwrap()).unwrap_err();
        assert!(matches!(err, Error::Http(_)));
    }
}
