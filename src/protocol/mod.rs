//! Wire protocol: typed messages, envelope codec, and handshake.

pub mod codec;
pub mod handshake;
pub mod message;

pub use codec::{read_envelope, write_envelope, ENVELOPE_MAGIC, MAX_PAYLOAD_LEN};
pub use message::{AudioFormat, AudioFrame, ControlMessage, SequencedAudioFrame, WireMessage};
