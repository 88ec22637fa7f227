//! Ephemeral port allocation.

use std::cell::RefCell;
use std::fmt;
use std::net::{Ipv4Addr, TcpListener};
use std::rc::Rc;

use tracing::debug;

use crate::error::{Error, Result};

/// A socket bound to a free loopback port, waiting for a server to own it.
///
/// Cloning shares the socket; whichever clone calls
/// [`take_listener`](Self::take_listener) first gets it.
#[derive(Clone)]
pub struct UnusedPort {
    listener: Rc<RefCell<Option<TcpListener>>>,
    port: u16,
}

impl UnusedPort {
    /// Returns the port number.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns `true` until the socket has been handed to a server.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.listener.borrow().is_some()
    }

    /// Takes ownership of the socket.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Setup`] if the socket was already taken.
    pub fn take_listener(&self) -> Result<TcpListener> {
        self.listener
            .borrow_mut()
            .take()
            .ok_or_else(|| Error::setup(format!("socket for port {} is already in use", self.port)))
    }
}

impl fmt::Debug for UnusedPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnusedPort")
            .field("port", &self.port)
            .field("available", &self.is_available())
            .finish()
    }
}

/// Binds a non-blocking socket to an OS-assigned port on `127.0.0.1`.
///
/// # Errors
///
/// Returns [`Error::Io`] if the socket cannot be bound.
pub fn bind_unused_port() -> Result<UnusedPort> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
    listener.set_nonblocking(true)?;
    let port = listener.local_addr()?.port();
    debug!(port, "bound unused port");

    Ok(UnusedPort {
        listener: Rc::new(RefCell::new(Some(listener))),
        port,
    })
}

/// Returns `http://localhost:<port>`.
#[must_use]
pub fn base_url(port: u16) -> String {
    format!("http://localhost:{port}")
}
