//! Platform audio device boundary.
//!
//! The engine only ever sees these traits: a pull-based capture source, a
//! push-based render sink, and a provider that opens them for a concrete
//! sample-rate/channel/format triple. The cpal implementation lives in
//! [`device`]; tests substitute their own.

pub mod device;

use crate::error::Result;
use crate::protocol::AudioFormat;

/// Concrete stream parameters derived from the negotiated format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSpec {
    pub sample_rate: u32,
    pub channels: u16,
    pub format: AudioFormat,
}

impl StreamSpec {
    /// Bytes in one capture chunk of the given duration.
    pub fn chunk_bytes(&self, millis: u32) -> usize {
        let frames = (self.sample_rate as usize * millis as usize) / 1000;
        frames * self.channels as usize * self.format.bytes_per_sample()
    }
}

/// Pull-based capture device. `read` blocks until samples are available
/// or the device is closed (returns 0).
pub trait AudioSource: Send {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
}

/// Push-based render device.
pub trait AudioSink: Send {
    fn write(&mut self, buf: &[u8]) -> Result<()>;
}

/// An opened render sink plus whether it is a virtual loopback cable.
pub struct SinkHandle {
    pub sink: Box<dyn AudioSink>,
    /// True when rendering into a loopback cable device (e.g. "CABLE
    /// Input"); silence substitution is skipped in that case.
    pub is_loopback_cable: bool,
}

/// Opens capture and render devices. Injected into the engine so tests and
/// alternative platforms can supply their own implementation.
pub trait DeviceProvider: Send + Sync {
    fn open_source(&self, spec: &StreamSpec) -> Result<Box<dyn AudioSource>>;
    fn open_sink(&self, spec: &StreamSpec) -> Result<SinkHandle>;
}
