//! Transport session: one connection, paired reader/writer tasks, and the
//! bounded outbound queue feeding the writer.

pub mod queue;
pub mod session;

pub use queue::OutboundQueue;
pub use session::{InboundHandler, TransportSession};
