//! Per-connection state and the receive loop.
//!
//! Each accepted socket is wrapped in a [`Connection`] and driven by a
//! dedicated thread running [`run_receive_loop`]. The connection owns its
//! socket for its whole life; no other thread reads or writes the stream
//! directly. When the loop ends, the thread posts a finished event to the
//! server's reaper, which removes the registry entry under the lock and
//! drops the last `Arc`. The descriptor is therefore closed exactly once,
//! and never by a thread that still shares it.

use crate::handler::{Flow, Handler};
use bytes::BytesMut;
use slab::Slab;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use tracing::{debug, trace};

/// A single accepted connection.
///
/// Handed to [`Handler`] callbacks by reference; `send` and the address
/// accessors are the only external surface.
pub struct Connection {
    /// Stable registry key, unique among live connections.
    id: usize,
    /// The accepted socket. Reads happen only on the receive-loop thread;
    /// writes go through `send`, which works on a shared reference.
    stream: TcpStream,
    /// Set once the socket has been shut down (by the loop ending or by a
    /// server-wide stop). Gates the accessors and makes shutdown idempotent.
    closed: AtomicBool,
}

impl Connection {
    pub(crate) fn new(id: usize, stream: TcpStream) -> Self {
        Self {
            id,
            stream,
            closed: AtomicBool::new(false),
        }
    }

    /// Registry key for this connection. Stable for its lifetime.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Blocking write of the whole buffer to the peer.
    ///
    /// Returns the OS error on failure (a disconnected peer yields a
    /// broken-pipe error, not a process signal). Does not affect the
    /// receive loop either way.
    pub fn send(&self, data: &[u8]) -> io::Result<()> {
        (&self.stream).write_all(data)
    }

    /// Remote endpoint, or `None` once the socket has been shut down.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        self.stream.peer_addr().ok()
    }

    /// Remote port, or 0 once the socket has been shut down.
    pub fn peer_port(&self) -> u16 {
        self.peer_addr().map(|a| a.port()).unwrap_or(0)
    }

    /// Local endpoint, or `None` once the socket has been shut down.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        self.stream.local_addr().ok()
    }

    /// Shut down both directions of the socket.
    ///
    /// Unblocks a receive loop parked in `read` (it observes EOF).
    /// Idempotent: only the first call touches the socket. The descriptor
    /// itself is released when the last `Arc<Connection>` drops.
    pub(crate) fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.stream.shutdown(Shutdown::Both);
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Event posted by a receive-loop thread when its loop has ended.
pub(crate) enum ConnEvent {
    Finished(usize),
}

/// Body of a connection's receive-loop thread.
///
/// Dispatch order per connection is strict: `on_connect`, then zero or
/// more `on_receive`, then `on_disconnect`. An `on_connect` rejection
/// skips `on_disconnect`. All failures are terminal for this connection
/// only.
pub(crate) fn run_receive_loop(
    conn: Arc<Connection>,
    handler: Arc<dyn Handler>,
    buf_size: usize,
    done: mpsc::Sender<ConnEvent>,
) {
    let peer = conn.peer_addr();

    // A server-wide stop may have shut this socket down between accept
    // and here; once that has happened no callback may begin.
    if conn.is_closed() {
        trace!(id = conn.id, "connection stopped before dispatch");
    } else if handler.on_connect(&conn) == Flow::Close {
        debug!(id = conn.id, peer = ?peer, "connection rejected by handler");
    } else {
        let mut buf = BytesMut::zeroed(buf_size);

        loop {
            let n = match (&conn.stream).read(&mut buf[..]) {
                Ok(0) => {
                    trace!(id = conn.id, "peer closed connection");
                    break;
                }
                Ok(n) => n,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    // A read failing because the server shut the socket
                    // down is part of stop(), not a fault to report.
                    if !conn.is_closed() {
                        debug!(id = conn.id, error = %e, "read failed");
                        handler.on_error(&conn, &e);
                    }
                    break;
                }
            };

            // Data that raced the shutdown broadcast is dropped.
            if conn.is_closed() {
                break;
            }

            if handler.on_receive(&conn, &buf[..n]) == Flow::Close {
                trace!(id = conn.id, "handler requested close");
                break;
            }
        }

        if conn.is_closed() {
            trace!(id = conn.id, "stopped, skipping disconnect dispatch");
        } else {
            handler.on_disconnect(&conn);
        }
    }

    conn.shutdown();
    // The reaper may already be gone if wait_for_stop() finished first.
    let _ = done.send(ConnEvent::Finished(conn.id));
}

/// Registry of live connections using slab allocation.
///
/// Keys are stable for a connection's lifetime and reused afterwards.
/// The server wraps this in a mutex: the accept loop inserts, the reaper
/// removes, and `stop()` iterates to broadcast shutdown.
pub(crate) struct Registry {
    connections: Slab<Arc<Connection>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            connections: Slab::new(),
        }
    }

    /// Insert a connection built from its own key.
    ///
    /// The key is reserved before the connection exists, so a receive
    /// loop can never finish and report a key the registry has not seen.
    pub fn insert_with<F>(&mut self, make: F) -> Arc<Connection>
    where
        F: FnOnce(usize) -> Arc<Connection>,
    {
        let entry = self.connections.vacant_entry();
        let conn = make(entry.key());
        entry.insert(Arc::clone(&conn));
        conn
    }

    /// Remove a connection, returning it if the key was live.
    pub fn remove(&mut self, id: usize) -> Option<Arc<Connection>> {
        self.connections.try_remove(id)
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Iterate over all live connections.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Arc<Connection>)> {
        self.connections.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server_side, _) = listener.accept().unwrap();
        (client, server_side)
    }

    #[test]
    fn test_accessors_before_and_after_shutdown() {
        let (client, server_side) = loopback_pair();
        let conn = Connection::new(0, server_side);

        assert_eq!(
            conn.peer_addr().unwrap(),
            client.local_addr().unwrap()
        );
        assert_ne!(conn.peer_port(), 0);
        assert!(conn.local_addr().is_some());

        conn.shutdown();
        assert!(conn.peer_addr().is_none());
        assert_eq!(conn.peer_port(), 0);
        assert!(conn.local_addr().is_none());

        // Second shutdown must be a no-op, not a panic or double close.
        conn.shutdown();
        assert!(conn.is_closed());
    }

    #[test]
    fn test_send_writes_to_peer() {
        let (mut client, server_side) = loopback_pair();
        let conn = Connection::new(0, server_side);

        conn.send(b"hello").unwrap();
        let mut buf = [0u8; 5];
        client.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn test_registry_insert_remove() {
        let mut registry = Registry::new();

        let (_c1, s1) = loopback_pair();
        let (_c2, s2) = loopback_pair();

        let conn1 = registry.insert_with(|id| Arc::new(Connection::new(id, s1)));
        let conn2 = registry.insert_with(|id| Arc::new(Connection::new(id, s2)));

        assert_ne!(conn1.id(), conn2.id());
        assert_eq!(registry.len(), 2);

        let removed = registry.remove(conn1.id()).unwrap();
        assert_eq!(removed.id(), conn1.id());
        assert_eq!(registry.len(), 1);

        // Removing a dead key is a no-op.
        assert!(registry.remove(conn1.id()).is_none());

        let live: Vec<usize> = registry.iter().map(|(id, _)| id).collect();
        assert_eq!(live, vec![conn2.id()]);
    }

    #[test]
    fn test_registry_reuses_keys() {
        let mut registry = Registry::new();

        let (_c1, s1) = loopback_pair();
        let conn1 = registry.insert_with(|id| Arc::new(Connection::new(id, s1)));
        let id1 = conn1.id();
        registry.remove(id1);

        let (_c2, s2) = loopback_pair();
        let conn2 = registry.insert_with(|id| Arc::new(Connection::new(id, s2)));
        // Slab reuses vacated slots; either way the key is live and unique.
        assert_eq!(registry.len(), 1);
        assert!(registry.iter().any(|(id, _)| id == conn2.id()));
    }
}
