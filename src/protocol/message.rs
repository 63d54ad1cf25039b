//! Typed messages carried inside wire envelopes.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// PCM sample encoding of an audio frame's raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioFormat {
    /// Unsigned 8-bit samples, 128 is zero
    Pcm8,
    /// Signed 16-bit little-endian samples
    Pcm16,
    /// 32-bit little-endian IEEE floats in [-1.0, 1.0]
    PcmFloat32,
}

impl AudioFormat {
    /// Width of one sample in bytes.
    pub fn bytes_per_sample(self) -> usize {
        match self {
            AudioFormat::Pcm8 => 1,
            AudioFormat::Pcm16 => 2,
            AudioFormat::PcmFloat32 => 4,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            AudioFormat::Pcm8 => "8-bit PCM",
            AudioFormat::Pcm16 => "16-bit PCM",
            AudioFormat::PcmFloat32 => "32-bit Float",
        }
    }
}

/// One capture buffer worth of audio plus the metadata needed to decode it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioFrame {
    /// Raw sample bytes in the tagged format, little-endian
    pub data: Bytes,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Interleaved channel count
    pub channels: u16,
    /// Sample encoding of `data`
    pub format: AudioFormat,
}

/// Audio frame tagged with a per-session sequence number.
///
/// Sequence numbers start at 0 and increase monotonically. They are
/// advisory: gaps are logged, never reordered or dropped on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequencedAudioFrame {
    pub sequence: u32,
    pub frame: AudioFrame,
}

/// Out-of-band control state, sent on session start and on every toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlMessage {
    pub muted: bool,
}

/// Exactly one message per wire envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WireMessage {
    Audio(SequencedAudioFrame),
    Control(ControlMessage),
}

impl WireMessage {
    /// Serialize to the envelope payload encoding.
    pub fn encode(&self) -> Vec<u8> {
        // bincode on a derived enum cannot fail
        bincode::serialize(self).expect("wire message serialization")
    }

    /// Deserialize from an envelope payload.
    pub fn decode(payload: &[u8]) -> Result<Self, crate::error::ProtocolError> {
        bincode::deserialize(payload)
            .map_err(|e| crate::error::ProtocolError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_widths() {
        assert_eq!(AudioFormat::Pcm8.bytes_per_sample(), 1);
        assert_eq!(AudioFormat::Pcm16.bytes_per_sample(), 2);
        assert_eq!(AudioFormat::PcmFloat32.bytes_per_sample(), 4);
    }

    #[test]
    fn audio_roundtrip() {
        let msg = WireMessage::Audio(SequencedAudioFrame {
            sequence: 7,
            frame: AudioFrame {
                data: Bytes::from_static(&[1, 2, 3, 4]),
                sample_rate: 48_000,
                channels: 1,
                format: AudioFormat::Pcm16,
            },
        });

        let decoded = WireMessage::decode(&msg.encode()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn control_roundtrip() {
        let msg = WireMessage::Control(ControlMessage { muted: true });
        let decoded = WireMessage::decode(&msg.encode()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn garbage_payload_rejected() {
        assert!(WireMessage::decode(&[0xFF; 3]).is_err());
    }
}
