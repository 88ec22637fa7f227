//! Application objects served by [`HttpServer`](super::HttpServer).

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::rc::Rc;

use bytes::Bytes;
use futures::future::LocalBoxFuture;
use futures::FutureExt;
use http::{header, Method, Request, Response, StatusCode};

/// Handles one request.
pub type Handler = Rc<dyn Fn(Request<Bytes>) -> LocalBoxFuture<'static, Response<Bytes>>>;

/// A route table mapping `(method, path)` to a handler.
///
/// Unknown paths get `404 Not Found`; known paths with another method get
/// `405 Method Not Allowed`.
///
/// # Example
///
/// ```rust
/// use looptest::net::{text, App};
/// use http::StatusCode;
///
/// let app = App::new().get("/", |_| async { text(StatusCode::OK, "Hello, world") });
/// assert_eq!(app.len(), 1);
/// ```
#[derive(Clone, Default)]
pub struct App {
    routes: Rc<HashMap<(Method, String), Handler>>,
}

impl App {
    /// Creates an application with no routes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a route, replacing any handler for the same method and path.
    #[must_use]
    pub fn route<F, Fut>(mut self, method: Method, path: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Request<Bytes>) -> Fut + 'static,
        Fut: Future<Output = Response<Bytes>> + 'static,
    {
        let handler: Handler = Rc::new(move |request| handler(request).boxed_local());
        Rc::make_mut(&mut self.routes).insert((method, path.into()), handler);
        self
    }

    /// Adds a `GET` route.
    #[must_use]
    pub fn get<F, Fut>(self, path: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Request<Bytes>) -> Fut + 'static,
        Fut: Future<Output = Response<Bytes>> + 'static,
    {
        self.route(Method::GET, path, handler)
    }

    /// Adds a `POST` route.
    #[must_use]
    pub fn post<F, Fut>(self, path: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Request<Bytes>) -> Fut + 'static,
        Fut: Future<Output = Response<Bytes>> + 'static,
    {
        self.route(Method::POST, path, handler)
    }

    /// Returns the number of routes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns `true` if no routes are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Routes `request` to its handler.
    pub async fn handle(&self, request: Request<Bytes>) -> Response<Bytes> {
        let key = (request.method().clone(), request.uri().path().to_owned());
        if let Some(handler) = self.routes.get(&key) {
            return handler(request).await;
        }

        if self.routes.keys().any(|(_, path)| *path == key.1) {
            text(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed")
        } else {
            text(StatusCode::NOT_FOUND, "Not Found")
        }
    }
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut routes: Vec<String> = self
            .routes
            .keys()
            .map(|(method, path)| format!("{method} {path}"))
            .collect();
        routes.sort();
        f.debug_struct("App").field("routes", &routes).finish()
    }
}

/// Builds a `text/plain` response.
#[must_use]
pub fn text(status: StatusCode, body: impl Into<Bytes>) -> Response<Bytes> {
    let mut response = Response::new(body.into());
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
