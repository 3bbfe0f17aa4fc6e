//! commlink: a minimal thread-per-connection TCP server
//!
//! Demo binary wrapping the library in a runnable server:
//! - Echo handler: reply with every received chunk unchanged
//! - Sink handler: log every received chunk (log-shipping receiver)
//! - Configuration via CLI arguments or TOML file

use commlink::config::{Config, HandlerKind};
use commlink::handlers::{echo::Echo, sink::Sink};
use commlink::{Handler, Server, ServerConfig};
use std::sync::Arc;
use std::thread;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        port = config.port,
        buffer_size = config.buffer_size,
        backlog = config.backlog,
        handler = ?config.handler,
        "Starting commlink server"
    );

    let handler: Arc<dyn Handler> = match config.handler {
        HandlerKind::Echo => Arc::new(Echo),
        HandlerKind::Sink => Arc::new(Sink),
    };

    let server = Server::new(
        ServerConfig {
            port: config.port,
            recv_buffer_size: config.buffer_size,
            backlog: config.backlog,
            name: config.name,
        },
        handler,
    );

    server.start()?;
    info!(addr = ?server.local_addr(), "Serving until killed");

    // The accept loop runs on its own thread; there is nothing else for
    // the main thread to do.
    loop {
        thread::park();
    }
}
