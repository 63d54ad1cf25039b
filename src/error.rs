//! Error types for the audio bridge

use std::io;
use thiserror::Error;

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum Error {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("port {0} is already in use, close the other MicBridge instance or pick another port")]
    BindInUse(u16),

    #[error("audio device error: {0}")]
    Device(String),

    #[error("unsupported connection mode: {0}")]
    UnsupportedMode(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Wire protocol errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("handshake failed: expected {expected:?}, got {got:?}")]
    HandshakeFailed { expected: String, got: String },

    #[error("payload length {0} exceeds ceiling")]
    PayloadTooLarge(u32),

    #[error("payload decode failed: {0}")]
    Decode(String),
}

impl Error {
    /// Whether this error is an ordinary peer disconnect.
    ///
    /// Disconnects drive the state machine back toward `Connecting`/`Idle`
    /// without surfacing a user-visible error.
    pub fn is_normal_disconnect(&self) -> bool {
        match self {
            Error::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::NotConnected
            ),
            _ => false,
        }
    }
}

/// Result type alias for the engine
pub type Result<T> = std::result::Result<T, Error>;
