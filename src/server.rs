//! Connection-oriented TCP server.
//!
//! One thread runs the accept loop, each accepted connection gets its own
//! receive-loop thread, and a reaper thread retires finished connections
//! from the registry. Cancellation works exclusively by shutting sockets
//! down: `stop()` half-closes every live connection (each blocked read
//! observes EOF) and then the listener (the blocked accept fails), so no
//! thread is ever interrupted directly.
//!
//! The model is deliberately blocking thread-per-connection, not an event
//! loop: connection count is bounded only by OS resources plus the
//! configured backlog for not-yet-accepted connections.

use crate::conn::{run_receive_loop, ConnEvent, Connection, Registry};
use crate::handler::Handler;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{Ipv4Addr, Shutdown, SocketAddr, SocketAddrV4, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, trace, warn};

/// Default per-connection receive buffer size.
const DEFAULT_BUFFER_SIZE: usize = 16 * 1024;

/// Default pending-connection backlog.
const DEFAULT_BACKLOG: u32 = 128;

/// Immutable server parameters, fixed at construction.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP port to bind on `0.0.0.0`. Port 0 asks the OS for an
    /// ephemeral port; see [`Server::local_addr`] for the result.
    pub port: u16,
    /// Size of each connection's receive buffer. Also the upper bound on
    /// the chunk handed to a single `on_receive` call.
    pub recv_buffer_size: usize,
    /// Backlog of pending (not yet accepted) connections.
    pub backlog: u32,
    /// Optional name, used for thread names and log events.
    pub name: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 0,
            recv_buffer_size: DEFAULT_BUFFER_SIZE,
            backlog: DEFAULT_BACKLOG,
            name: None,
        }
    }
}

/// A listening server that fans accepted sockets out to per-connection
/// threads driving [`Handler`] callbacks.
///
/// Lifecycle: `new` → [`start`](Server::start) (at most once; a failed
/// start leaves the server inert and startable again) →
/// [`stop`](Server::stop) (idempotent) →
/// [`wait_for_stop`](Server::wait_for_stop).
pub struct Server {
    config: ServerConfig,
    handler: Arc<dyn Handler>,
    registry: Arc<Mutex<Registry>>,
    running: Arc<AtomicBool>,
    started: AtomicBool,
    listener: Mutex<Option<Arc<Socket>>>,
    accept_thread: Mutex<Option<JoinHandle<()>>>,
    reaper_thread: Mutex<Option<JoinHandle<()>>>,
    done_tx: Mutex<Option<mpsc::Sender<ConnEvent>>>,
}

impl Server {
    /// Create a server. Nothing is bound until [`start`](Server::start).
    pub fn new(config: ServerConfig, handler: Arc<dyn Handler>) -> Self {
        Self {
            config,
            handler,
            registry: Arc::new(Mutex::new(Registry::new())),
            running: Arc::new(AtomicBool::new(false)),
            started: AtomicBool::new(false),
            listener: Mutex::new(None),
            accept_thread: Mutex::new(None),
            reaper_thread: Mutex::new(None),
            done_tx: Mutex::new(None),
        }
    }

    fn name(&self) -> &str {
        self.config.name.as_deref().unwrap_or("server")
    }

    /// Bind `0.0.0.0:port`, start listening, and spawn the accept loop.
    ///
    /// Returns as soon as the accept loop is running; it proceeds
    /// concurrently with the caller. Bind and listen failures are
    /// returned synchronously (OS code via `raw_os_error()`) and leave
    /// the server inert, so the caller may fix the cause and try again.
    /// A server that did start successfully cannot be started a second
    /// time.
    pub fn start(&self) -> io::Result<()> {
        if self.started.load(Ordering::Acquire) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "server already started",
            ));
        }

        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
        // The original model set no reuse option; enabling it lets a new
        // instance rebind the port immediately after a previous one shut
        // down, without waiting out TIME_WAIT.
        socket.set_reuse_address(true)?;
        let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, self.config.port);
        socket.bind(&bind_addr.into())?;
        socket.listen(self.config.backlog as i32)?;

        let listener = Arc::new(socket);
        *self.listener.lock().unwrap() = Some(Arc::clone(&listener));

        let (done_tx, done_rx) = mpsc::channel();
        *self.done_tx.lock().unwrap() = Some(done_tx.clone());
        self.running.store(true, Ordering::Release);

        let registry = Arc::clone(&self.registry);
        let reaper = thread::Builder::new()
            .name(format!("{}-reaper", self.name()))
            .spawn(move || reap_finished(done_rx, registry));
        let reaper = match reaper {
            Ok(handle) => handle,
            Err(e) => {
                self.stop();
                return Err(e);
            }
        };
        *self.reaper_thread.lock().unwrap() = Some(reaper);

        let running = Arc::clone(&self.running);
        let registry = Arc::clone(&self.registry);
        let handler = Arc::clone(&self.handler);
        let buf_size = self.config.recv_buffer_size;
        let accept = thread::Builder::new()
            .name(format!("{}-accept", self.name()))
            .spawn(move || accept_loop(listener, running, registry, handler, buf_size, done_tx));
        let accept = match accept {
            Ok(handle) => handle,
            Err(e) => {
                self.wait_for_stop();
                return Err(e);
            }
        };
        *self.accept_thread.lock().unwrap() = Some(accept);

        self.started.store(true, Ordering::Release);
        info!(
            name = self.name(),
            addr = ?self.local_addr(),
            backlog = self.config.backlog,
            "server listening"
        );
        Ok(())
    }

    /// Actual bound address once the server is listening (resolves the
    /// OS-assigned port when the config asked for port 0).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|l| l.local_addr().ok())
            .and_then(|a| a.as_socket())
    }

    /// Number of connections currently tracked in the registry.
    pub fn connection_count(&self) -> usize {
        self.registry.lock().unwrap().len()
    }

    /// Broadcast shutdown to every live connection and the accept loop.
    ///
    /// Clears the running flag, half-closes each registered connection
    /// (its blocked read observes EOF and the receive loop winds down
    /// through `on_disconnect`), then shuts the listener down so the
    /// blocked accept returns. Idempotent; repeated calls never touch a
    /// descriptor twice. Does not wait for the threads to finish; that
    /// is [`wait_for_stop`](Server::wait_for_stop).
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);

        let listener = self.listener.lock().unwrap().take();
        if let Some(listener) = listener {
            {
                let registry = self.registry.lock().unwrap();
                for (id, conn) in registry.iter() {
                    trace!(id, "shutting down connection");
                    conn.shutdown();
                }
            }
            let _ = listener.shutdown(Shutdown::Both);
            info!(name = self.name(), "server stopping");
        }

        // Dropping our sender lets the reaper drain the remaining
        // finished events and exit once every connection thread is done.
        self.done_tx.lock().unwrap().take();
    }

    /// Stop the server and block until the accept loop and the reaper
    /// have fully ended (which in turn means every connection thread has
    /// reported in). Intended for exactly one caller; a second call
    /// returns immediately.
    pub fn wait_for_stop(&self) {
        self.stop();
        if let Some(handle) = self.accept_thread.lock().unwrap().take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.reaper_thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

/// Accept-loop thread body.
///
/// The registry slot is claimed before the connection thread spawns, so
/// a receive loop can never report a key the registry has not seen.
fn accept_loop(
    listener: Arc<Socket>,
    running: Arc<AtomicBool>,
    registry: Arc<Mutex<Registry>>,
    handler: Arc<dyn Handler>,
    buf_size: usize,
    done_tx: mpsc::Sender<ConnEvent>,
) {
    while running.load(Ordering::Acquire) {
        let (sock, addr) = match listener.accept() {
            Ok(pair) => pair,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(ref e) if e.kind() == io::ErrorKind::ConnectionAborted => continue,
            Err(e) => {
                if running.load(Ordering::Acquire) {
                    warn!(error = %e, "accept failed, ending accept loop");
                }
                break;
            }
        };

        let stream: TcpStream = sock.into();
        debug!(peer = ?addr.as_socket(), "accepted connection");

        // Re-check the flag under the registry lock: stop() clears it
        // before taking this lock, so a connection inserted here is
        // guaranteed to be seen by the shutdown broadcast. A socket that
        // raced with stop() is dropped unaccepted.
        let conn = {
            let mut registry = registry.lock().unwrap();
            if !running.load(Ordering::Acquire) {
                break;
            }
            registry.insert_with(|id| Arc::new(Connection::new(id, stream)))
        };

        let loop_conn = Arc::clone(&conn);
        let loop_handler = Arc::clone(&handler);
        let done = done_tx.clone();
        let spawned = thread::Builder::new()
            .name(format!("conn-{}", conn.id()))
            .spawn(move || run_receive_loop(loop_conn, loop_handler, buf_size, done));

        if let Err(e) = spawned {
            error!(id = conn.id(), error = %e, "failed to spawn connection thread");
            conn.shutdown();
            registry.lock().unwrap().remove(conn.id());
        }
    }
    trace!("accept loop ended");
}

/// Reaper-thread body: retire finished connections from the registry.
///
/// Exits once every sender (the server's own, the accept loop's, and one
/// per connection thread) has dropped and the channel is drained.
fn reap_finished(done_rx: mpsc::Receiver<ConnEvent>, registry: Arc<Mutex<Registry>>) {
    while let Ok(event) = done_rx.recv() {
        match event {
            ConnEvent::Finished(id) => {
                if registry.lock().unwrap().remove(id).is_some() {
                    trace!(id, "connection reaped");
                }
            }
        }
    }
    trace!("reaper ended");
}
