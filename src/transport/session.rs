//! A live connection: paired reader and writer tasks over one stream.
//!
//! The writer drains the outbound queue, encoding one envelope per message
//! and flushing after each. The reader loops on envelope decode and hands
//! typed messages to an [`InboundHandler`]. Whichever task fails or finishes
//! first decides the session outcome; the other is aborted.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::protocol::{self, ControlMessage, SequencedAudioFrame, WireMessage};
use crate::transport::OutboundQueue;

/// Receives inbound messages on the reader task.
///
/// Implementations must not block: the capture role updates a mute flag,
/// the render role hands frames to a bounded channel.
pub trait InboundHandler: Send + 'static {
    fn on_audio(&mut self, frame: SequencedAudioFrame);
    fn on_control(&mut self, msg: ControlMessage);
}

pub struct TransportSession {
    writer: JoinHandle<Result<()>>,
    reader: JoinHandle<Result<()>>,
}

impl TransportSession {
    /// Split the stream and launch the reader/writer pair.
    pub fn spawn<S, H>(stream: S, outbound: Arc<OutboundQueue>, mut handler: H) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
        H: InboundHandler,
    {
        let (mut read_half, mut write_half) = tokio::io::split(stream);

        let writer = tokio::spawn(async move {
            loop {
                let msg = outbound.pop().await;
                protocol::write_envelope(&mut write_half, &msg).await?;
            }
        });

        let reader = tokio::spawn(async move {
            let mut expected_seq: Option<u32> = None;
            loop {
                let payload = protocol::read_envelope(&mut read_half).await?;
                match WireMessage::decode(&payload) {
                    Ok(WireMessage::Audio(frame)) => {
                        if let Some(expected) = expected_seq {
                            if frame.sequence != expected {
                                tracing::debug!(
                                    expected,
                                    got = frame.sequence,
                                    "audio sequence gap"
                                );
                            }
                        }
                        expected_seq = Some(frame.sequence.wrapping_add(1));
                        handler.on_audio(frame);
                    }
                    Ok(WireMessage::Control(msg)) => handler.on_control(msg),
                    // A single corrupt payload must not end the session.
                    Err(e) => tracing::debug!("dropping corrupt payload: {e}"),
                }
            }
        });

        Self { writer, reader }
    }

    /// Wait for the session to end.
    ///
    /// Returns `Ok(())` for clean terminations (peer closed, reset, broken
    /// pipe, or local abort); any other failure is surfaced.
    pub async fn join(mut self) -> Result<()> {
        let first = tokio::select! {
            r = &mut self.reader => r,
            w = &mut self.writer => w,
        };
        self.abort();

        match first {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) if e.is_normal_disconnect() => Ok(()),
            Ok(Err(e)) => Err(e),
            // Aborted by the peer task finishing or by stop().
            Err(join_err) if join_err.is_cancelled() => Ok(()),
            Err(join_err) => Err(Error::Config(format!("session task panicked: {join_err}"))),
        }
    }

    /// Cancel both tasks. Safe to call more than once.
    pub fn abort(&self) {
        self.reader.abort();
        self.writer.abort();
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        self.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::OUTBOUND_QUEUE_CAPACITY;
    use crate::protocol::{AudioFormat, AudioFrame};
    use bytes::Bytes;
    use std::sync::mpsc;

    struct Recorder {
        audio: mpsc::Sender<SequencedAudioFrame>,
        control: mpsc::Sender<ControlMessage>,
    }

    impl InboundHandler for Recorder {
        fn on_audio(&mut self, frame: SequencedAudioFrame) {
            let _ = self.audio.send(frame);
        }
        fn on_control(&mut self, msg: ControlMessage) {
            let _ = self.control.send(msg);
        }
    }

    fn frame(sequence: u32) -> SequencedAudioFrame {
        SequencedAudioFrame {
            sequence,
            frame: AudioFrame {
                data: Bytes::from(vec![0u8; 64]),
                sample_rate: 48_000,
                channels: 1,
                format: AudioFormat::Pcm16,
            },
        }
    }

    struct Sink;
    impl InboundHandler for Sink {
        fn on_audio(&mut self, _: SequencedAudioFrame) {}
        fn on_control(&mut self, _: ControlMessage) {}
    }

    #[tokio::test]
    async fn messages_flow_end_to_end_in_order() {
        let (left, right) = tokio::io::duplex(4096);

        let out_left = Arc::new(OutboundQueue::new(OUTBOUND_QUEUE_CAPACITY));
        let sender = TransportSession::spawn(left, out_left.clone(), Sink);

        let (audio_tx, audio_rx) = mpsc::channel();
        let (control_tx, control_rx) = mpsc::channel();
        let out_right = Arc::new(OutboundQueue::new(OUTBOUND_QUEUE_CAPACITY));
        let receiver = TransportSession::spawn(
            right,
            out_right,
            Recorder { audio: audio_tx, control: control_tx },
        );

        out_left.push_control(ControlMessage { muted: false });
        for seq in 0..10 {
            out_left.push_audio(frame(seq));
        }

        let timeout = std::time::Duration::from_secs(2);
        let ctl = tokio::task::spawn_blocking(move || control_rx.recv_timeout(timeout))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ctl, ControlMessage { muted: false });

        let frames = tokio::task::spawn_blocking(move || {
            (0..10)
                .map(|_| audio_rx.recv_timeout(timeout).unwrap())
                .collect::<Vec<_>>()
        })
        .await
        .unwrap();
        for (i, f) in frames.iter().enumerate() {
            assert_eq!(f.sequence, i as u32);
        }

        sender.abort();
        receiver.abort();
        assert!(sender.join().await.is_ok());
        assert!(receiver.join().await.is_ok());
    }

    #[tokio::test]
    async fn peer_close_is_clean_termination() {
        let (left, right) = tokio::io::duplex(4096);

        let outbound = Arc::new(OutboundQueue::new(4));
        let session = TransportSession::spawn(left, outbound, Sink);

        drop(right);

        assert!(session.join().await.is_ok());
    }
}
