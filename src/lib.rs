//! # MicBridge
//!
//! Low-latency audio bridge that turns a phone microphone into a desktop
//! audio source over LAN TCP or a USB loopback (adb forward) link.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────┐          ┌──────────────────────────────┐
//! │        CAPTURE ROLE          │          │         RENDER ROLE          │
//! │  ┌────────────┐              │          │              ┌────────────┐  │
//! │  │ Microphone │              │          │              │ Loopback / │  │
//! │  └─────┬──────┘              │          │              │  Speaker   │  │
//! │        ▼                     │          │              └─────▲──────┘  │
//! │  ┌────────────┐  RMS level   │          │   RMS level  ┌────┴──────┐  │
//! │  │  Capture   │──────────▶   │          │   ◀──────────│ DSP chain │  │
//! │  │   loop     │              │          │              │ amp→VAD→  │  │
//! │  └─────┬──────┘              │          │              │    AGC    │  │
//! │        ▼                     │          │              └────▲──────┘  │
//! │  ┌────────────┐              │          │              ┌────┴──────┐  │
//! │  │ Outbound   │              │   TCP    │              │  Reader   │  │
//! │  │ queue (64) │──▶ writer ───┼──────────┼──▶ envelope ─│   task    │  │
//! │  └────────────┘   task       │  stream  │    decode    └───────────┘  │
//! │        ▲  control (mute)     │          │      control (mute)  │      │
//! │        └─────────────────────┼──────────┼──────────────────────┘      │
//! └──────────────────────────────┘          └──────────────────────────────┘
//! ```
//!
//! Every message on the wire is one envelope: `u32 magic | u32 length |
//! payload`, where the payload is a bincode-encoded [`protocol::WireMessage`].
//! A handshake token exchange precedes the first envelope; a magic mismatch
//! afterwards is recovered by byte-at-a-time resynchronization.

pub mod audio;
pub mod config;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod platform;
pub mod protocol;
pub mod transport;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Default sample rate for capture and render
    pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;

    /// Default channel count (mono microphone)
    pub const DEFAULT_CHANNELS: u16 = 1;

    /// Default TCP port for the render-side listener
    pub const DEFAULT_PORT: u16 = 55_555;

    /// Capture chunk duration in milliseconds
    pub const CAPTURE_CHUNK_MS: u32 = 20;

    /// Outbound queue capacity in messages
    pub const OUTBOUND_QUEUE_CAPACITY: usize = 64;

    /// Inbound audio channel capacity between reader task and render loop
    pub const INBOUND_QUEUE_CAPACITY: usize = 64;

    /// Render device ring capacity in milliseconds of buffered audio
    pub const DEVICE_RING_MS: u32 = 250;
}
