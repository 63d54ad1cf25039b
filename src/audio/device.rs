//! cpal-backed device provider.
//!
//! cpal streams are not `Send`, so each opened device runs on a dedicated
//! thread that owns the stream and bridges samples over a channel (capture)
//! or a shared ring (render). Open errors are reported synchronously
//! through a ready channel before the call returns.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::audio::{AudioSink, AudioSource, DeviceProvider, SinkHandle, StreamSpec};
use crate::constants::DEVICE_RING_MS;
use crate::error::{Error, Result};
use crate::protocol::AudioFormat;

/// Output device name fragment identifying a virtual loopback cable.
const LOOPBACK_NAME_FRAGMENT: &str = "cable input";

/// Default provider using the system audio host.
pub struct CpalProvider;

impl DeviceProvider for CpalProvider {
    fn open_source(&self, spec: &StreamSpec) -> Result<Box<dyn AudioSource>> {
        CpalSource::open(*spec).map(|s| Box::new(s) as Box<dyn AudioSource>)
    }

    fn open_sink(&self, spec: &StreamSpec) -> Result<SinkHandle> {
        let (sink, is_loopback_cable) = CpalSink::open(*spec)?;
        Ok(SinkHandle {
            sink: Box::new(sink),
            is_loopback_cable,
        })
    }
}

fn stream_config(spec: &StreamSpec) -> StreamConfig {
    StreamConfig {
        channels: spec.channels,
        sample_rate: SampleRate(spec.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    }
}

/// Capture device: a thread owns the input stream, sample bytes arrive
/// over a bounded channel.
pub struct CpalSource {
    data_rx: Receiver<Vec<u8>>,
    error_rx: Receiver<String>,
    running: Arc<AtomicBool>,
    pending: VecDeque<u8>,
    thread: Option<JoinHandle<()>>,
}

impl CpalSource {
    pub fn open(spec: StreamSpec) -> Result<Self> {
        let (data_tx, data_rx) = bounded::<Vec<u8>>(64);
        let (error_tx, error_rx) = bounded::<String>(16);
        let (ready_tx, ready_rx) = bounded::<std::result::Result<(), String>>(1);
        let running = Arc::new(AtomicBool::new(true));
        let running_thread = running.clone();

        let thread = thread::Builder::new()
            .name("micbridge-capture".into())
            .spawn(move || {
                capture_thread(spec, data_tx, error_tx, ready_tx, running_thread);
            })
            .map_err(|e| Error::Device(e.to_string()))?;

        match ready_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(Ok(())) => Ok(Self {
                data_rx,
                error_rx,
                running,
                pending: VecDeque::new(),
                thread: Some(thread),
            }),
            Ok(Err(msg)) => Err(Error::Device(msg)),
            Err(_) => Err(Error::Device("capture device did not start".into())),
        }
    }

    fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl AudioSource for CpalSource {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if let Ok(msg) = self.error_rx.try_recv() {
            return Err(Error::Device(msg));
        }

        // Block until at least one chunk arrives, then drain what is
        // already buffered without blocking further.
        while self.pending.is_empty() {
            if !self.running.load(Ordering::SeqCst) {
                return Ok(0);
            }
            match self.data_rx.recv_timeout(Duration::from_millis(100)) {
                Ok(chunk) => self.pending.extend(chunk),
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => return Ok(0),
            }
        }
        while self.pending.len() < buf.len() {
            match self.data_rx.try_recv() {
                Ok(chunk) => self.pending.extend(chunk),
                Err(_) => break,
            }
        }

        let n = buf.len().min(self.pending.len());
        for b in buf.iter_mut().take(n) {
            *b = self.pending.pop_front().unwrap_or(0);
        }
        Ok(n)
    }
}

impl Drop for CpalSource {
    fn drop(&mut self) {
        self.close();
    }
}

fn capture_thread(
    spec: StreamSpec,
    data_tx: Sender<Vec<u8>>,
    error_tx: Sender<String>,
    ready_tx: Sender<std::result::Result<(), String>>,
    running: Arc<AtomicBool>,
) {
    let host = cpal::default_host();
    let device = match host.default_input_device() {
        Some(d) => d,
        None => {
            let _ = ready_tx.send(Err("no input device available".into()));
            return;
        }
    };

    let config = stream_config(&spec);
    let err_cb = {
        let error_tx = error_tx.clone();
        move |err: cpal::StreamError| {
            let _ = error_tx.try_send(err.to_string());
        }
    };

    let stream = match spec.format {
        AudioFormat::Pcm16 => device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let mut bytes = Vec::with_capacity(data.len() * 2);
                for s in data {
                    bytes.extend_from_slice(&s.to_le_bytes());
                }
                let _ = data_tx.try_send(bytes);
            },
            err_cb,
            None,
        ),
        AudioFormat::PcmFloat32 => device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let mut bytes = Vec::with_capacity(data.len() * 4);
                for s in data {
                    bytes.extend_from_slice(&s.to_le_bytes());
                }
                let _ = data_tx.try_send(bytes);
            },
            err_cb,
            None,
        ),
        AudioFormat::Pcm8 => device.build_input_stream(
            &config,
            move |data: &[u8], _: &cpal::InputCallbackInfo| {
                let _ = data_tx.try_send(data.to_vec());
            },
            err_cb,
            None,
        ),
    };

    let stream = match stream {
        Ok(s) => s,
        Err(e) => {
            let _ = ready_tx.send(Err(e.to_string()));
            return;
        }
    };
    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(e.to_string()));
        return;
    }
    let _ = ready_tx.send(Ok(()));

    // Keep the thread (and therefore the stream) alive while running.
    while running.load(Ordering::Relaxed) {
        thread::sleep(Duration::from_millis(10));
    }
}

/// Ring capacity for a render stream: [`DEVICE_RING_MS`] worth of the
/// 16-bit samples the output callback consumes, whatever the rate and
/// channel count.
fn ring_capacity(spec: &StreamSpec) -> usize {
    StreamSpec {
        format: AudioFormat::Pcm16,
        ..*spec
    }
    .chunk_bytes(DEVICE_RING_MS)
}

/// Append to the ring, evicting the oldest bytes on overflow. Stale audio
/// is worse than a click at these latencies.
fn ring_push(ring: &mut VecDeque<u8>, capacity: usize, buf: &[u8]) {
    let overflow = (ring.len() + buf.len()).saturating_sub(capacity);
    if overflow > 0 {
        ring.drain(..overflow.min(ring.len()));
    }
    ring.extend(buf);
}

/// Render device: writes land in a shared ring the output callback drains.
pub struct CpalSink {
    ring: Arc<Mutex<VecDeque<u8>>>,
    capacity: usize,
    error_rx: Receiver<String>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl CpalSink {
    pub fn open(spec: StreamSpec) -> Result<(Self, bool)> {
        let capacity = ring_capacity(&spec);
        let ring = Arc::new(Mutex::new(VecDeque::with_capacity(capacity)));
        let (error_tx, error_rx) = bounded::<String>(16);
        let (ready_tx, ready_rx) = bounded::<std::result::Result<bool, String>>(1);
        let running = Arc::new(AtomicBool::new(true));

        let ring_thread = ring.clone();
        let running_thread = running.clone();
        let thread = thread::Builder::new()
            .name("micbridge-render".into())
            .spawn(move || {
                render_thread(spec, ring_thread, error_tx, ready_tx, running_thread);
            })
            .map_err(|e| Error::Device(e.to_string()))?;

        match ready_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(Ok(is_loopback)) => Ok((
                Self {
                    ring,
                    capacity,
                    error_rx,
                    running,
                    thread: Some(thread),
                },
                is_loopback,
            )),
            Ok(Err(msg)) => Err(Error::Device(msg)),
            Err(_) => Err(Error::Device("render device did not start".into())),
        }
    }

    fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl AudioSink for CpalSink {
    fn write(&mut self, buf: &[u8]) -> Result<()> {
        if let Ok(msg) = self.error_rx.try_recv() {
            return Err(Error::Device(msg));
        }

        ring_push(&mut self.ring.lock(), self.capacity, buf);
        Ok(())
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.close();
    }
}

fn render_thread(
    spec: StreamSpec,
    ring: Arc<Mutex<VecDeque<u8>>>,
    error_tx: Sender<String>,
    ready_tx: Sender<std::result::Result<bool, String>>,
    running: Arc<AtomicBool>,
) {
    let host = cpal::default_host();

    // Prefer a virtual loopback cable so the stream can feed a system
    // microphone; fall back to the default output.
    let mut is_loopback = false;
    let device = match host.output_devices() {
        Ok(devices) => {
            let cable = devices.into_iter().find(|d| {
                d.name()
                    .map(|n| n.to_lowercase().contains(LOOPBACK_NAME_FRAGMENT))
                    .unwrap_or(false)
            });
            match cable {
                Some(d) => {
                    is_loopback = true;
                    Some(d)
                }
                None => host.default_output_device(),
            }
        }
        Err(_) => host.default_output_device(),
    };
    let device = match device {
        Some(d) => d,
        None => {
            let _ = ready_tx.send(Err("no output device available".into()));
            return;
        }
    };

    // Render is always 16-bit after the DSP chain.
    let config = stream_config(&StreamSpec {
        format: AudioFormat::Pcm16,
        ..spec
    });

    let stream = device.build_output_stream(
        &config,
        move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
            let mut ring = ring.lock();
            for sample in data.iter_mut() {
                *sample = match (ring.pop_front(), ring.pop_front()) {
                    (Some(lo), Some(hi)) => i16::from_le_bytes([lo, hi]),
                    _ => 0,
                };
            }
        },
        move |err| {
            let _ = error_tx.try_send(err.to_string());
        },
        None,
    );

    let stream = match stream {
        Ok(s) => s,
        Err(e) => {
            let _ = ready_tx.send(Err(e.to_string()));
            return;
        }
    };
    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(e.to_string()));
        return;
    }
    let _ = ready_tx.send(Ok(is_loopback));

    while running.load(Ordering::Relaxed) {
        thread::sleep(Duration::from_millis(10));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(sample_rate: u32, channels: u16) -> StreamSpec {
        StreamSpec {
            sample_rate,
            channels,
            format: AudioFormat::Pcm16,
        }
    }

    #[test]
    fn ring_capacity_scales_with_rate_and_channels() {
        let mono_48k = ring_capacity(&spec(48_000, 1));
        assert_eq!(mono_48k, 24_000);

        // Stereo doubles the byte rate, so the same duration needs twice
        // the bytes; the same holds for doubling the sample rate.
        assert_eq!(ring_capacity(&spec(48_000, 2)), 2 * mono_48k);
        assert_eq!(ring_capacity(&spec(96_000, 1)), 2 * mono_48k);
    }

    #[test]
    fn ring_capacity_ignores_source_format() {
        // The output callback always consumes 16-bit samples.
        let float_spec = StreamSpec {
            format: AudioFormat::PcmFloat32,
            ..spec(48_000, 1)
        };
        assert_eq!(ring_capacity(&float_spec), ring_capacity(&spec(48_000, 1)));
    }

    #[test]
    fn ring_push_evicts_oldest_on_overflow() {
        let mut ring = VecDeque::new();
        ring_push(&mut ring, 4, &[1, 2, 3, 4]);
        assert_eq!(ring, [1, 2, 3, 4]);

        ring_push(&mut ring, 4, &[5, 6]);
        assert_eq!(ring, [3, 4, 5, 6]);

        // A write larger than the whole ring keeps only its tail.
        ring_push(&mut ring, 4, &[7, 8, 9, 10, 11, 12]);
        assert_eq!(ring.len(), 4);
        assert_eq!(ring, [9, 10, 11, 12]);
    }
}
