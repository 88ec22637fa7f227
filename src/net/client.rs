//! HTTP/1 client bound to a test's event loop.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use bytes::Bytes;
use http::header::{HeaderValue, HOST};
use http::{Request, Response, Uri};
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tokio::task::AbortHandle;
use tracing::debug;

use crate::error::{Error, Result};
use crate::io_loop::EventLoop;

fn http_error(err: impl fmt::Display) -> Error {
    Error::http(err.to_string())
}

struct ClientInner {
    io_loop: EventLoop,
    closed: Cell<bool>,
    connections: RefCell<Vec<AbortHandle>>,
}

/// Sends requests over connections driven by an [`EventLoop`].
///
/// Each request opens its own connection. [`close`](Self::close) drops every
/// connection the client opened.
#[derive(Clone)]
pub struct HttpClient {
    inner: Rc<ClientInner>,
}

impl HttpClient {
    /// Creates a client whose connections run on `io_loop`.
    #[must_use]
    pub fn new(io_loop: EventLoop) -> Self {
        Self {
            inner: Rc::new(ClientInner {
                io_loop,
                closed: Cell::new(false),
                connections: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Sends `request` to the absolute URI it carries and collects the
    /// response body.
    ///
    /// Must be awaited on this client's loop.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] if the client is closed, the URI has no host,
    /// or the exchange fails, and [`Error::Io`] if the connection cannot be
    /// opened.
    pub async fn fetch(&self, request: Request<Bytes>) -> Result<Response<Bytes>> {
        if self.is_closed() {
            return Err(Error::http("client is closed"));
        }

        let (mut parts, body) = request.into_parts();
        let uri = parts.uri.clone();
        let authority = uri
            .authority()
            .ok_or_else(|| Error::http(format!("no host in '{uri}'")))?;
        let port = authority.port_u16().unwrap_or(80);

        let stream = TcpStream::connect((authority.host(), port)).await?;
        let (mut sender, connection) = http1::handshake(TokioIo::new(stream))
            .await
            .map_err(http_error)?;
        let task = self.inner.io_loop.spawn(async move {
            if let Err(err) = connection.await {
                debug!(error = %err, "client connection closed with error");
            }
        })?;
        self.inner.connections.borrow_mut().push(task.abort_handle());

        parts.uri = uri
            .path_and_query()
            .map_or("/", |path| path.as_str())
            .parse::<Uri>()
            .map_err(http_error)?;
        if !parts.headers.contains_key(HOST) {
            let host = HeaderValue::from_str(authority.as_str()).map_err(http_error)?;
            parts.headers.insert(HOST, host);
        }

        debug!(method = %parts.method, %uri, "sending request");
        let response = sender
            .send_request(Request::from_parts(parts, Full::new(body)))
            .await
            .map_err(http_error)?;
        let (parts, body) = response.into_parts();
        let body = body.collect().await.map_err(http_error)?.to_bytes();
        Ok(Response::from_parts(parts, body))
    }

    /// Sends a `GET` request for `url`.
    ///
    /// # Errors
    ///
    /// See [`fetch`](Self::fetch).
    pub async fn get(&self, url: &str) -> Result<Response<Bytes>> {
        let request = Request::get(url).body(Bytes::new()).map_err(http_error)?;
        self.fetch(request).await
    }

    /// Closes the client and every connection it opened.
    pub fn close(&self) {
        if self.inner.closed.replace(true) {
            return;
        }
        for connection in self.inner.connections.borrow_mut().drain(..) {
            connection.abort();
        }
        debug!(loop_id = %self.inner.io_loop.id(), "http client closed");
    }

    /// Returns `true` after [`close`](Self::close).
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.get()
    }

    /// Returns the loop this client runs on.
    #[must_use]
    pub fn io_loop(&self) -> &EventLoop {
        &self.inner.io_loop
    }
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient")
            .field("closed", &self.is_closed())
            .field("io_loop", &self.inner.io_loop)
            .finish()
    }
}
