//! Synchronous outbound connector.
//!
//! The client-side counterpart of the server: opens one TCP connection to
//! a remote endpoint and exposes blocking send/read over it. No spawned
//! threads, no buffering, no framing; protocols layered on top own all
//! of that. IPv4 only, matching the server side.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use tracing::debug;

/// A blocking outbound TCP connection.
///
/// Created with a remote host and port; nothing is opened until
/// [`connect`](Peer::connect). Dropping the peer closes the socket.
pub struct Peer {
    host: String,
    port: u16,
    stream: Option<TcpStream>,
}

impl Peer {
    /// Create a peer for the given remote endpoint. Does not connect.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            stream: None,
        }
    }

    /// Resolve the remote endpoint to an IPv4 address and connect.
    ///
    /// Failures (resolution, refusal, unreachable) are returned as the
    /// underlying OS error. Reconnecting an already-connected peer
    /// replaces the old socket.
    pub fn connect(&mut self) -> io::Result<()> {
        let addr = (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .find(SocketAddr::is_ipv4)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    "no IPv4 address for remote host",
                )
            })?;

        let stream = TcpStream::connect(addr)?;
        debug!(remote = %addr, "peer connected");
        self.stream = Some(stream);
        Ok(())
    }

    /// Blocking write of the whole buffer.
    pub fn send(&mut self, data: &[u8]) -> io::Result<()> {
        self.stream()?.write_all(data)
    }

    /// One blocking read into `buf`. Returns the number of bytes read;
    /// 0 means the remote end closed the connection.
    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream()?.read(buf)
    }

    /// Local endpoint of the connected socket, if any.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.stream.as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Remote endpoint of the connected socket, if any.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.stream.as_ref().and_then(|s| s.peer_addr().ok())
    }

    /// Close the connection. Further send/read calls fail until the peer
    /// is connected again. Dropping the peer has the same effect.
    pub fn close(&mut self) {
        self.stream = None;
    }

    fn stream(&mut self) -> io::Result<&mut TcpStream> {
        self.stream.as_mut().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, "peer is not connected")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_send_and_read() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        // Manual echo on the accepted side.
        let echo = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 16];
            let n = stream.read(&mut buf).unwrap();
            stream.write_all(&buf[..n]).unwrap();
        });

        let mut peer = Peer::new("127.0.0.1", port);
        peer.connect().unwrap();
        assert!(peer.local_addr().is_some());
        assert_eq!(peer.peer_addr().unwrap().port(), port);

        peer.send(b"PING").unwrap();
        let mut buf = [0u8; 16];
        let n = peer.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"PING");

        echo.join().unwrap();
    }

    #[test]
    fn test_connect_refused() {
        // Bind then drop to get a port nothing is listening on.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut peer = Peer::new("127.0.0.1", port);
        let err = peer.connect().unwrap_err();
        assert!(err.raw_os_error().is_some());
        assert!(peer.peer_addr().is_none());
    }

    #[test]
    fn test_not_connected() {
        let mut peer = Peer::new("127.0.0.1", 1);
        let err = peer.send(b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);

        let mut buf = [0u8; 4];
        let err = peer.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }

    #[test]
    fn test_read_eof_after_remote_close() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut peer = Peer::new("127.0.0.1", port);
        peer.connect().unwrap();

        let (stream, _) = listener.accept().unwrap();
        drop(stream);

        let mut buf = [0u8; 4];
        assert_eq!(peer.read(&mut buf).unwrap(), 0);

        peer.close();
        assert!(peer.local_addr().is_none());
    }
}
