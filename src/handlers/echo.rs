//! Echo handler: every received chunk is written straight back.

use crate::conn::Connection;
use crate::handler::{Flow, Handler};
use tracing::trace;

/// Replies with the received bytes unchanged. A failed write closes the
/// connection; nothing else ends it from this side.
pub struct Echo;

impl Handler for Echo {
    fn on_receive(&self, conn: &Connection, data: &[u8]) -> Flow {
        trace!(id = conn.id(), len = data.len(), "echoing chunk");
        if conn.send(data).is_err() {
            return Flow::Close;
        }
        Flow::Continue
    }
}
