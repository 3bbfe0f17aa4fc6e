//! Sink handler: log received chunks, send nothing back.
//!
//! Stands in for the receiving end of a line-oriented log-shipping
//! protocol: devices push text at the server and expect no reply.

use crate::conn::Connection;
use crate::handler::{Flow, Handler};
use tracing::{debug, info};

/// Logs each received chunk (lossy UTF-8, trailing newline trimmed) at
/// info level, tagged with the sending connection.
pub struct Sink;

impl Handler for Sink {
    fn on_connect(&self, conn: &Connection) -> Flow {
        debug!(id = conn.id(), peer = ?conn.peer_addr(), "sink attached");
        Flow::Continue
    }

    fn on_receive(&self, conn: &Connection, data: &[u8]) -> Flow {
        let text = String::from_utf8_lossy(data);
        info!(id = conn.id(), len = data.len(), payload = %text.trim_end(), "received");
        Flow::Continue
    }

    fn on_disconnect(&self, conn: &Connection) {
        debug!(id = conn.id(), "sink detached");
    }
}
