//! Connection lifecycle callbacks.
//!
//! A server is parameterized by a [`Handler`]: four optional methods
//! invoked from each connection's own receive-loop thread. Every method
//! has a no-op default, so a handler only implements the events it cares
//! about.
//!
//! Methods for a single connection are invoked strictly in order:
//! `on_connect`, then zero or more `on_receive`, then `on_disconnect`.
//! Methods for distinct connections run concurrently on distinct threads,
//! so shared handler state needs its own synchronization.

use crate::conn::Connection;
use std::io;

/// Verdict returned by `on_connect` and `on_receive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep the connection open and continue the receive loop.
    Continue,
    /// Terminate the connection.
    ///
    /// From `on_connect` this rejects the connection outright and
    /// `on_disconnect` is skipped. From `on_receive` it is an orderly
    /// close: `on_disconnect` still fires and `on_error` does not.
    Close,
}

/// Callback table dispatched by each connection's receive loop.
///
/// Handlers are shared across all connections of a server behind an
/// `Arc`, hence the `Send + Sync` bound.
pub trait Handler: Send + Sync + 'static {
    /// Invoked once, before any data is read from the connection.
    fn on_connect(&self, _conn: &Connection) -> Flow {
        Flow::Continue
    }

    /// Invoked for every chunk of bytes a single socket read returns.
    ///
    /// No framing is imposed: `data` is whatever the OS delivered, up to
    /// the configured receive-buffer size. `conn.send()` may be called
    /// from here to reply.
    fn on_receive(&self, _conn: &Connection, _data: &[u8]) -> Flow {
        Flow::Continue
    }

    /// Invoked once, after the last `on_receive`, when the loop ends for
    /// any reason other than an `on_connect` rejection.
    ///
    /// The connection's socket may already be closed; the address
    /// accessors are not reliable from this point on.
    fn on_disconnect(&self, _conn: &Connection) {}

    /// Invoked when a socket read fails with a real error (not EOF and
    /// not a handler-requested close). Terminal for this connection only.
    fn on_error(&self, _conn: &Connection, _err: &io::Error) {}
}

/// Handler with every callback left at its default. Useful for servers
/// that only care about the side effects of accepting connections.
pub struct NoopHandler;

impl Handler for NoopHandler {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flow_equality() {
        assert_eq!(Flow::Continue, Flow::Continue);
        assert_ne!(Flow::Continue, Flow::Close);
    }

    #[test]
    fn test_default_methods_are_noops() {
        // NoopHandler must be usable as a trait object with all defaults.
        let handler: std::sync::Arc<dyn Handler> = std::sync::Arc::new(NoopHandler);
        // Nothing to assert beyond "this compiles and is object-safe";
        // behavior is covered by the server tests.
        let _ = handler;
    }
}
