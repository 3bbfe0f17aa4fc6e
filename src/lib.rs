//! commlink: a minimal thread-per-connection TCP server framework.
//!
//! The core is a connection-oriented server: an accept loop hands each
//! inbound connection to its own thread, which runs a blocking receive
//! loop and dispatches the four lifecycle callbacks of a user-supplied
//! [`Handler`] (`on_connect`, `on_receive`, `on_disconnect`, `on_error`).
//! [`Server::stop`] broadcasts shutdown to every live connection by
//! closing sockets; [`Peer`] is the symmetric synchronous outbound side.
//!
//! No framing is imposed and the transport is TCP over IPv4 only;
//! application protocols layer on top through the callbacks and
//! [`Connection::send`].
//!
//! ```no_run
//! use commlink::{Server, ServerConfig};
//! use commlink::handlers::echo::Echo;
//! use std::sync::Arc;
//!
//! let server = Server::new(ServerConfig::default(), Arc::new(Echo));
//! server.start().expect("bind failed");
//! // ... later
//! server.wait_for_stop();
//! ```

pub mod config;
pub mod conn;
pub mod handler;
pub mod handlers;
pub mod peer;
pub mod server;

pub use conn::Connection;
pub use handler::{Flow, Handler, NoopHandler};
pub use peer::Peer;
pub use server::{Server, ServerConfig};
