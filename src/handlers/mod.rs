//! Bundled [`Handler`](crate::handler::Handler) implementations.
//!
//! Application protocols (firmware transfer, log shipping, ...) live
//! outside the core and plug in through the callback table. These two are
//! shipped for the demo binary and as reference implementations:
//! - `echo`: reply with every received chunk unchanged
//! - `sink`: log every received chunk, reply with nothing

pub mod echo;
pub mod sink;
