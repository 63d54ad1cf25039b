//! Inline signal processing applied to received audio before render.
//!
//! [`ProcessingConfig`] is process-wide shared state: the control surface
//! writes individual fields at any time while the audio loop snapshots them
//! once per buffer. Each field is independently atomic; there is no
//! cross-field transaction and none is needed.

pub mod chain;

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

pub use chain::{AgcState, DspChain, DspStage};

/// Placeholder noise suppression backends. All currently pass audio through
/// untouched; the enum exists so a real backend can be selected without an
/// interface change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoiseSuppressionAlgorithm {
    RnNoise,
    Speex,
    None,
}

impl NoiseSuppressionAlgorithm {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::RnNoise,
            1 => Self::Speex,
            _ => Self::None,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::RnNoise => 0,
            Self::Speex => 1,
            Self::None => 2,
        }
    }
}

/// Plain-value view of the processing parameters.
///
/// Used both as the control-surface update payload and as the per-buffer
/// snapshot read by the audio loop.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProcessingSettings {
    pub enable_noise_suppression: bool,
    pub noise_suppression_algorithm: NoiseSuppressionAlgorithm,
    pub enable_agc: bool,
    /// AGC target peak in the 16-bit sample domain
    pub agc_target_level: i32,
    pub enable_vad: bool,
    /// 0-100, mapped linearly to an RMS threshold of `value * 50`
    pub vad_threshold: u8,
    pub enable_dereverb: bool,
    pub dereverb_level: f32,
    /// Unconditional gain, 0.0-30.0; 1.0 is a no-op
    pub amplification: f32,
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self {
            enable_noise_suppression: false,
            noise_suppression_algorithm: NoiseSuppressionAlgorithm::RnNoise,
            enable_agc: false,
            agc_target_level: 32_000,
            enable_vad: false,
            vad_threshold: 10,
            enable_dereverb: false,
            dereverb_level: 0.5,
            amplification: 1.0,
        }
    }
}

/// Atomic-per-field store shared between the control surface and the audio
/// loop. Tearing across unrelated fields is acceptable; tearing within one
/// field is not, hence atomics rather than a plain struct.
pub struct ProcessingConfig {
    enable_noise_suppression: AtomicBool,
    noise_suppression_algorithm: AtomicU8,
    enable_agc: AtomicBool,
    agc_target_level: AtomicI32,
    enable_vad: AtomicBool,
    vad_threshold: AtomicU8,
    enable_dereverb: AtomicBool,
    dereverb_level_bits: AtomicU32,
    amplification_bits: AtomicU32,
}

impl ProcessingConfig {
    pub fn new(settings: ProcessingSettings) -> Self {
        let config = Self {
            enable_noise_suppression: AtomicBool::new(false),
            noise_suppression_algorithm: AtomicU8::new(0),
            enable_agc: AtomicBool::new(false),
            agc_target_level: AtomicI32::new(0),
            enable_vad: AtomicBool::new(false),
            vad_threshold: AtomicU8::new(0),
            enable_dereverb: AtomicBool::new(false),
            dereverb_level_bits: AtomicU32::new(0),
            amplification_bits: AtomicU32::new(0),
        };
        config.store(settings);
        config
    }

    /// Overwrite every field. Takes effect on the next processed buffer.
    pub fn store(&self, s: ProcessingSettings) {
        self.enable_noise_suppression
            .store(s.enable_noise_suppression, Ordering::Relaxed);
        self.noise_suppression_algorithm
            .store(s.noise_suppression_algorithm.as_u8(), Ordering::Relaxed);
        self.enable_agc.store(s.enable_agc, Ordering::Relaxed);
        self.agc_target_level
            .store(s.agc_target_level, Ordering::Relaxed);
        self.enable_vad.store(s.enable_vad, Ordering::Relaxed);
        self.vad_threshold.store(s.vad_threshold, Ordering::Relaxed);
        self.enable_dereverb
            .store(s.enable_dereverb, Ordering::Relaxed);
        self.dereverb_level_bits
            .store(s.dereverb_level.to_bits(), Ordering::Relaxed);
        self.amplification_bits
            .store(s.amplification.to_bits(), Ordering::Relaxed);
    }

    /// Read every field once. Called by the audio loop per buffer.
    pub fn snapshot(&self) -> ProcessingSettings {
        ProcessingSettings {
            enable_noise_suppression: self.enable_noise_suppression.load(Ordering::Relaxed),
            noise_suppression_algorithm: NoiseSuppressionAlgorithm::from_u8(
                self.noise_suppression_algorithm.load(Ordering::Relaxed),
            ),
            enable_agc: self.enable_agc.load(Ordering::Relaxed),
            agc_target_level: self.agc_target_level.load(Ordering::Relaxed),
            enable_vad: self.enable_vad.load(Ordering::Relaxed),
            vad_threshold: self.vad_threshold.load(Ordering::Relaxed),
            enable_dereverb: self.enable_dereverb.load(Ordering::Relaxed),
            dereverb_level: f32::from_bits(self.dereverb_level_bits.load(Ordering::Relaxed)),
            amplification: f32::from_bits(self.amplification_bits.load(Ordering::Relaxed)),
        }
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self::new(ProcessingSettings::default())
    }
}
