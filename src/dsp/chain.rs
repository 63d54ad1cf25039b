//! Sample-format conversion, level metering, and the receive-side DSP chain.
//!
//! Stage order is fixed: format normalization, amplification, VAD gate,
//! AGC, then the reserved noise-suppression and dereverb hooks. Each stage
//! assumes the 16-bit signed sample domain produced by normalization.

use crate::dsp::ProcessingSettings;
use crate::protocol::AudioFormat;

/// Decode wire bytes into the 16-bit signed working domain.
///
/// Decode rules match [`rms`]: floats clamp into ±32767, unsigned 8-bit
/// samples recenter around 128 and scale by 256.
pub fn decode_to_i16(bytes: &[u8], format: AudioFormat) -> Vec<i16> {
    match format {
        AudioFormat::PcmFloat32 => bytes
            .chunks_exact(4)
            .map(|c| {
                let sample = f32::from_le_bytes([c[0], c[1], c[2], c[3]]);
                (sample * 32_767.0).clamp(-32_768.0, 32_767.0) as i16
            })
            .collect(),
        AudioFormat::Pcm8 => bytes
            .iter()
            .map(|&b| ((b as i16) - 128).saturating_mul(256))
            .collect(),
        AudioFormat::Pcm16 => bytes
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect(),
    }
}

/// Encode 16-bit samples as little-endian wire/render bytes.
pub fn encode_from_i16(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

/// Convert captured float bytes to 16-bit PCM bytes for transport.
pub fn float_bytes_to_i16_bytes(bytes: &[u8]) -> Vec<u8> {
    encode_from_i16(&decode_to_i16(bytes, AudioFormat::PcmFloat32))
}

/// Normalized RMS level in [0, 1], format-aware.
///
/// Float samples are already in the normalized domain; 8-bit samples are
/// recentered by 128 and normalized by 128; 16-bit samples normalize by
/// 32768.
pub fn rms(bytes: &[u8], format: AudioFormat) -> f32 {
    let mut sum = 0.0f64;
    let mut count = 0usize;

    match format {
        AudioFormat::PcmFloat32 => {
            for c in bytes.chunks_exact(4) {
                let s = f32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f64;
                sum += s * s;
                count += 1;
            }
        }
        AudioFormat::Pcm8 => {
            for &b in bytes {
                let s = ((b as i32) - 128) as f64 / 128.0;
                sum += s * s;
                count += 1;
            }
        }
        AudioFormat::Pcm16 => {
            for c in bytes.chunks_exact(2) {
                let s = i16::from_le_bytes([c[0], c[1]]) as f64 / 32_768.0;
                sum += s * s;
                count += 1;
            }
        }
    }

    if count == 0 {
        return 0.0;
    }
    ((sum / count as f64).sqrt() as f32).clamp(0.0, 1.0)
}

/// RMS in the raw 16-bit sample domain, used by the VAD gate.
fn rms_raw(samples: &[i16]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum / samples.len() as f64).sqrt()
}

fn apply_gain(samples: &mut [i16], gain: f32) {
    for s in samples.iter_mut() {
        let amplified = (*s as f32 * gain) as i32;
        *s = amplified.clamp(-32_768, 32_767) as i16;
    }
}

/// Peak envelope tracked across buffers for one connection.
///
/// Fast attack, slow decay: jumps to the instantaneous peak on a rise,
/// bleeds toward it at 0.5% per buffer otherwise.
#[derive(Debug, Clone, Copy, Default)]
pub struct AgcState {
    envelope: f32,
}

impl AgcState {
    /// Floor applied before computing gain, so near-silence is not boosted
    /// toward the target.
    const ENVELOPE_FLOOR: f32 = 100.0;

    pub fn reset(&mut self) {
        self.envelope = 0.0;
    }

    pub fn envelope(&self) -> f32 {
        self.envelope
    }

    fn gain_for(&mut self, samples: &[i16], target_level: i32) -> f32 {
        let peak = samples
            .iter()
            .map(|&s| (s as i32).unsigned_abs())
            .max()
            .unwrap_or(0) as f32;

        if peak > self.envelope {
            self.envelope = peak;
        } else {
            self.envelope = self.envelope * 0.995 + peak * 0.005;
        }

        let safe = self.envelope.max(Self::ENVELOPE_FLOOR);
        (target_level as f32 / safe).clamp(0.1, 30.0)
    }
}

/// Reserved extension point for future DSP stages.
pub trait DspStage: Send {
    fn process(&mut self, samples: &mut [i16], settings: &ProcessingSettings);
}

/// Noise suppression hook. Pass-through for every algorithm today.
pub struct NoiseSuppression;

impl DspStage for NoiseSuppression {
    fn process(&mut self, _samples: &mut [i16], _settings: &ProcessingSettings) {}
}

/// Dereverberation hook. Pass-through.
pub struct Dereverb;

impl DspStage for Dereverb {
    fn process(&mut self, _samples: &mut [i16], _settings: &ProcessingSettings) {}
}

/// The receive-side chain. One instance per connection, so the AGC
/// envelope never leaks across reconnects.
pub struct DspChain {
    agc: AgcState,
    noise: Box<dyn DspStage>,
    dereverb: Box<dyn DspStage>,
}

impl DspChain {
    pub fn new() -> Self {
        Self {
            agc: AgcState::default(),
            noise: Box::new(NoiseSuppression),
            dereverb: Box::new(Dereverb),
        }
    }

    /// Swap in a real noise suppression backend.
    pub fn with_noise_stage(mut self, stage: Box<dyn DspStage>) -> Self {
        self.noise = stage;
        self
    }

    pub fn agc_envelope(&self) -> f32 {
        self.agc.envelope()
    }

    /// Run one frame through the full chain, returning 16-bit LE bytes
    /// ready for the render device.
    pub fn process(
        &mut self,
        bytes: &[u8],
        format: AudioFormat,
        settings: &ProcessingSettings,
    ) -> Vec<u8> {
        let mut samples = decode_to_i16(bytes, format);

        // 1. Amplification, unconditional (factor 1.0 is a no-op).
        if settings.amplification != 1.0 {
            apply_gain(&mut samples, settings.amplification.clamp(0.0, 30.0));
        }

        // 2. VAD gate: below threshold the buffer becomes silence of the
        // same length, preserving stream continuity for the device.
        if settings.enable_vad {
            let threshold = settings.vad_threshold.min(100) as f64 * 50.0;
            if rms_raw(&samples) < threshold {
                samples.fill(0);
                return encode_from_i16(&samples);
            }
        }

        // 3. AGC.
        if settings.enable_agc {
            let gain = self.agc.gain_for(&samples, settings.agc_target_level);
            apply_gain(&mut samples, gain);
        }

        // 4./5. Reserved stages.
        if settings.enable_noise_suppression {
            self.noise.process(&mut samples, settings);
        }
        if settings.enable_dereverb {
            self.dereverb.process(&mut samples, settings);
        }

        encode_from_i16(&samples)
    }
}

impl Default for DspChain {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn settings() -> ProcessingSettings {
        ProcessingSettings::default()
    }

    #[test]
    fn pcm16_decode_is_idempotent() {
        let samples: Vec<i16> = vec![0, 1, -1, 12_000, -12_000, i16::MAX, i16::MIN];
        let bytes = encode_from_i16(&samples);
        assert_eq!(decode_to_i16(&bytes, AudioFormat::Pcm16), samples);
        assert_eq!(encode_from_i16(&decode_to_i16(&bytes, AudioFormat::Pcm16)), bytes);
    }

    #[test]
    fn float_decode_clamps_and_scales() {
        let mut bytes = Vec::new();
        for v in [0.0f32, 0.5, -0.5, 1.0, -1.0, 2.0, -2.0] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        let samples = decode_to_i16(&bytes, AudioFormat::PcmFloat32);
        assert_eq!(samples[0], 0);
        assert_eq!(samples[1], 16_383);
        assert_eq!(samples[2], -16_383);
        assert_eq!(samples[3], 32_767);
        assert_eq!(samples[4], -32_767);
        // Out-of-range floats saturate.
        assert_eq!(samples[5], 32_767);
        assert_eq!(samples[6], -32_768);
    }

    #[test]
    fn pcm8_recenters_around_128() {
        let samples = decode_to_i16(&[128, 255, 0], AudioFormat::Pcm8);
        assert_eq!(samples[0], 0);
        assert_eq!(samples[1], 127 * 256);
        assert_eq!(samples[2], -128 * 256);
    }

    #[test]
    fn rms_of_silence_is_zero() {
        assert_eq!(rms(&[], AudioFormat::Pcm16), 0.0);
        assert_eq!(rms(&encode_from_i16(&[0; 480]), AudioFormat::Pcm16), 0.0);
        assert_eq!(rms(&[128; 480], AudioFormat::Pcm8), 0.0);
    }

    #[test]
    fn rms_full_scale_is_one() {
        let bytes = encode_from_i16(&[i16::MIN; 480]);
        let level = rms(&bytes, AudioFormat::Pcm16);
        assert!((level - 1.0).abs() < 1e-3);
    }

    #[test]
    fn vad_gates_quiet_buffers_to_silence_of_same_length() {
        let mut chain = DspChain::new();
        let mut s = settings();
        s.enable_vad = true;
        s.vad_threshold = 10; // raw RMS threshold of 500

        let quiet = encode_from_i16(&[100i16; 480]);
        let out = chain.process(&quiet, AudioFormat::Pcm16, &s);
        assert_eq!(out.len(), quiet.len());
        assert!(out.iter().all(|&b| b == 0));
    }

    #[test]
    fn vad_passes_loud_buffers_untouched() {
        let mut chain = DspChain::new();
        let mut s = settings();
        s.enable_vad = true;
        s.vad_threshold = 10;

        let loud = encode_from_i16(&[5_000i16; 480]);
        let out = chain.process(&loud, AudioFormat::Pcm16, &s);
        assert_eq!(out, loud);
    }

    #[test]
    fn amplification_clamps_at_i16_range() {
        let mut chain = DspChain::new();
        let mut s = settings();
        s.amplification = 30.0;

        let input = encode_from_i16(&[20_000i16, -20_000]);
        let out = chain.process(&input, AudioFormat::Pcm16, &s);
        let samples = decode_to_i16(&out, AudioFormat::Pcm16);
        assert_eq!(samples, vec![32_767, -32_768]);
    }

    #[test]
    fn agc_converges_toward_target_within_bounds() {
        let mut chain = DspChain::new();
        let mut s = settings();
        s.enable_agc = true;
        s.agc_target_level = 24_000;

        let input = encode_from_i16(&[4_000i16; 480]);
        let mut last_peak = 0i32;
        for _ in 0..200 {
            let out = chain.process(&input, AudioFormat::Pcm16, &s);
            let samples = decode_to_i16(&out, AudioFormat::Pcm16);
            last_peak = samples.iter().map(|&v| (v as i32).abs()).max().unwrap();
            assert!(samples.iter().all(|&v| (-32_768..=32_767).contains(&(v as i32))));
        }
        // Constant 4000-peak input against a 24000 target wants 6x gain.
        assert!((last_peak - 24_000).abs() < 1_200, "peak was {last_peak}");
    }

    #[test]
    fn agc_floors_envelope_for_near_silence() {
        let mut state = AgcState::default();
        let gain = state.gain_for(&[1i16; 16], 32_000);
        // Envelope floored at 100, gain capped at 30.
        assert_eq!(gain, 30.0);
    }

    #[test]
    fn reserved_stages_pass_through() {
        let mut chain = DspChain::new();
        let mut s = settings();
        s.enable_noise_suppression = true;
        s.enable_dereverb = true;

        let input = encode_from_i16(&[1_234i16; 64]);
        assert_eq!(chain.process(&input, AudioFormat::Pcm16, &s), input);
    }

    #[test]
    fn agc_state_resets() {
        let mut state = AgcState::default();
        state.gain_for(&[10_000i16; 32], 32_000);
        assert!(state.envelope() > 0.0);
        state.reset();
        assert_eq!(state.envelope(), 0.0);
    }

    proptest! {
        #[test]
        fn chain_output_is_always_valid_pcm16(
            samples in proptest::collection::vec(any::<i16>(), 1..1024),
            amp in 0.0f32..30.0,
            agc in any::<bool>(),
            vad in any::<bool>(),
        ) {
            let mut chain = DspChain::new();
            let s = ProcessingSettings {
                amplification: amp,
                enable_agc: agc,
                enable_vad: vad,
                ..Default::default()
            };
            let input = encode_from_i16(&samples);
            let out = chain.process(&input, AudioFormat::Pcm16, &s);
            prop_assert_eq!(out.len(), input.len());
        }
    }
}
