//! The two session roles: capture-and-send and listen-and-render.
//!
//! Both are plain async functions driven by the session task in
//! [`super::AudioEngine::start`]; device-bound loops run on blocking
//! threads and exit through an alive flag whose guard drops with the role
//! future, so `stop()` (task abort) always releases devices.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::RecvTimeoutError;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use crate::audio::{SinkHandle, StreamSpec};
use crate::constants::{CAPTURE_CHUNK_MS, INBOUND_QUEUE_CAPACITY, OUTBOUND_QUEUE_CAPACITY};
use crate::dsp::chain::{self, DspChain};
use crate::engine::{ConnectionMode, EngineShared, StartParams, StreamState};
use crate::error::{Error, Result};
use crate::platform::IpProtocol;
use crate::protocol::{
    handshake, AudioFormat, AudioFrame, ControlMessage, SequencedAudioFrame,
};
use crate::transport::{InboundHandler, OutboundQueue, TransportSession};

/// Clears the flag when the owning future is dropped, which stops the
/// blocking audio loop and releases its device.
struct AliveGuard(Arc<AtomicBool>);

impl Drop for AliveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Capture side of a live session: remote mute lands here.
struct CaptureHandler {
    mute_tx: watch::Sender<bool>,
}

impl InboundHandler for CaptureHandler {
    fn on_audio(&mut self, frame: SequencedAudioFrame) {
        tracing::trace!(sequence = frame.sequence, "unexpected audio on capture side");
    }

    fn on_control(&mut self, msg: ControlMessage) {
        tracing::info!(muted = msg.muted, "mute set by peer");
        self.mute_tx.send_replace(msg.muted);
    }
}

/// Render side of a live session: audio frames cross to the blocking
/// render loop over a bounded channel; overflow drops the newest frame.
struct RenderHandler {
    audio_tx: crossbeam_channel::Sender<SequencedAudioFrame>,
    mute_tx: watch::Sender<bool>,
    dropped: u64,
}

impl InboundHandler for RenderHandler {
    fn on_audio(&mut self, frame: SequencedAudioFrame) {
        if self.audio_tx.try_send(frame).is_err() {
            self.dropped += 1;
            if self.dropped % 100 == 1 {
                tracing::warn!(dropped = self.dropped, "render loop behind, dropping frames");
            }
        }
    }

    fn on_control(&mut self, msg: ControlMessage) {
        self.mute_tx.send_replace(msg.muted);
    }
}

fn dial_target(params: &StartParams) -> Result<(String, u16)> {
    match params.mode {
        ConnectionMode::WifiTcp => Ok((params.endpoint.clone(), params.port)),
        ConnectionMode::UsbLoopback => Ok(("127.0.0.1".into(), params.port)),
        ConnectionMode::Bluetooth => Err(Error::UnsupportedMode(
            "Bluetooth RFCOMM is not available on this platform".into(),
        )),
    }
}

/// Capture role: dial, handshake, then stream microphone chunks until the
/// connection or the engine stops. A clean close ends the session (client
/// role does not reconnect).
pub(crate) async fn run_capture(shared: Arc<EngineShared>, params: StartParams) -> Result<()> {
    let spec = params.spec();
    let mut source = shared.devices.open_source(&spec)?;

    let (host, port) = dial_target(&params)?;
    let mut stream = TcpStream::connect((host.as_str(), port)).await?;
    stream.set_nodelay(true)?;
    handshake::initiate(&mut stream).await?;

    let outbound = Arc::new(OutboundQueue::new(OUTBOUND_QUEUE_CAPACITY));
    shared.set_live_queue(Some(outbound.clone()));
    let session = TransportSession::spawn(
        stream,
        outbound.clone(),
        CaptureHandler {
            mute_tx: shared.mute_sender(),
        },
    );

    // Announce our current mute state before any audio flows.
    outbound.push_control(ControlMessage {
        muted: shared.is_muted(),
    });
    shared.set_state(StreamState::Streaming);

    let alive = Arc::new(AtomicBool::new(true));
    let _guard = AliveGuard(alive.clone());

    let loop_shared = shared.clone();
    let loop_queue = outbound.clone();
    let capture = tokio::task::spawn_blocking(move || -> Result<()> {
        let mut buf = vec![0u8; spec.chunk_bytes(CAPTURE_CHUNK_MS)];
        let mut sequence: u32 = 0;

        while alive.load(Ordering::SeqCst) {
            let n = source.read(&mut buf)?;
            if n == 0 {
                break;
            }
            let data = &buf[..n];

            loop_shared.publish_level(chain::rms(data, spec.format));
            if loop_shared.is_muted() {
                continue;
            }

            // Float capture is normalized to 16-bit PCM for transport so
            // downstream never branches on the sender's device format.
            let (payload, wire_format) = match spec.format {
                AudioFormat::PcmFloat32 => {
                    (chain::float_bytes_to_i16_bytes(data), AudioFormat::Pcm16)
                }
                other => (data.to_vec(), other),
            };

            loop_queue.push_audio(SequencedAudioFrame {
                sequence,
                frame: AudioFrame {
                    data: Bytes::from(payload),
                    sample_rate: spec.sample_rate,
                    channels: spec.channels,
                    format: wire_format,
                },
            });
            sequence = sequence.wrapping_add(1);
        }
        Ok(())
    });

    tokio::select! {
        r = session.join() => r,
        c = capture => c.unwrap_or(Ok(())),
    }
}

/// Render role: listen, and serve one connection at a time. Per-connection
/// failures never kill the listener; only bind errors end the session.
pub(crate) async fn run_render(shared: Arc<EngineShared>, params: StartParams) -> Result<()> {
    let port = params.port;

    if !shared.firewall.is_port_allowed(port, IpProtocol::Tcp) {
        if let Err(e) = shared.firewall.add_rule(port, IpProtocol::Tcp) {
            // User-actionable, not fatal: the bind may still succeed for
            // local peers.
            shared.set_error(Some(format!(
                "port {port} may be blocked by the firewall ({e}); allow MicBridge and retry"
            )));
        }
    }

    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::AddrInUse => Error::BindInUse(port),
            _ => Error::from(e),
        })?;
    tracing::info!(port, "listening for capture peers");

    loop {
        let (stream, peer) = listener.accept().await?;
        tracing::info!(%peer, "connection accepted");
        shared.set_error(None);

        match serve_connection(&shared, stream).await {
            Ok(()) => tracing::info!(%peer, "peer disconnected"),
            Err(e) if e.is_normal_disconnect() => tracing::info!(%peer, "peer disconnected"),
            Err(Error::Protocol(e)) => tracing::warn!(%peer, "protocol failure: {e}"),
            Err(e) => shared.set_error(Some(format!("connection error: {e}"))),
        }

        shared.set_live_queue(None);
        shared.publish_level(0.0);
        shared.set_state(StreamState::Connecting);
    }
}

/// Serve one accepted connection until it closes or fails.
async fn serve_connection(shared: &Arc<EngineShared>, mut stream: TcpStream) -> Result<()> {
    stream.set_nodelay(true)?;
    handshake::accept(&mut stream).await?;
    shared.set_state(StreamState::Streaming);

    let cable_provisioned = shared.provisioner.ensure_loopback_device();

    let outbound = Arc::new(OutboundQueue::new(OUTBOUND_QUEUE_CAPACITY));
    shared.set_live_queue(Some(outbound.clone()));

    let (audio_tx, audio_rx) = crossbeam_channel::bounded(INBOUND_QUEUE_CAPACITY);
    let session = TransportSession::spawn(
        stream,
        outbound.clone(),
        RenderHandler {
            audio_tx,
            mute_tx: shared.mute_sender(),
            dropped: 0,
        },
    );
    // No announcement here: mute state belongs to the capture side, which
    // declares it right after the handshake. The render side only sends
    // control for deliberate mute toggles, so a fresh connection can never
    // overwrite a pre-set sender mute.

    let alive = Arc::new(AtomicBool::new(true));
    let _guard = AliveGuard(alive.clone());

    let loop_shared = shared.clone();
    let render = tokio::task::spawn_blocking(move || -> Result<()> {
        // Fresh chain per connection: the AGC envelope must not leak
        // across reconnects.
        let mut dsp = DspChain::new();
        let mut sink: Option<SinkHandle> = None;

        while alive.load(Ordering::SeqCst) {
            let frame = match audio_rx.recv_timeout(Duration::from_millis(100)) {
                Ok(f) => f.frame,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };

            if sink.is_none() {
                // Render format is fixed 16-bit; rate and channels come
                // from the first frame's metadata.
                sink = Some(loop_shared.devices.open_sink(&StreamSpec {
                    sample_rate: frame.sample_rate,
                    channels: frame.channels,
                    format: AudioFormat::Pcm16,
                })?);
            }
            let Some(handle) = sink.as_mut() else { break };

            let settings = loop_shared.processing.snapshot();
            let mut processed = dsp.process(&frame.data, frame.format, &settings);
            loop_shared.publish_level(chain::rms(&processed, AudioFormat::Pcm16));

            // Without a cable and without monitoring, feed silence so the
            // device line stays open with nothing audible.
            let into_cable = handle.is_loopback_cable || cable_provisioned;
            if !into_cable && !loop_shared.is_monitoring() {
                processed.fill(0);
            }
            handle.sink.write(&processed)?;
        }
        Ok(())
    });

    tokio::select! {
        r = session.join() => r,
        res = render => res.unwrap_or(Ok(())),
    }
}
