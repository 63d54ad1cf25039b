//! Length-prefixed envelope codec with corruption recovery.
//!
//! Every wire message travels as `u32 magic | u32 length | payload`, header
//! fields big-endian. The reader tolerates a corrupt stream: a magic
//! mismatch triggers a byte-at-a-time scan for the next magic word, and an
//! implausible length is skipped without closing the connection.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::message::WireMessage;

/// Envelope magic word, "MBRG". Written big-endian so the resync
/// accumulator can shift incoming bytes in from the left.
pub const ENVELOPE_MAGIC: u32 = 0x4D42_5247;

/// Hard ceiling on payload length; larger envelopes are discarded.
pub const MAX_PAYLOAD_LEN: u32 = 2 * 1024 * 1024;

/// Encode `msg` and write one complete envelope, flushing afterwards.
pub async fn write_envelope<W>(writer: &mut W, msg: &WireMessage) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let payload = msg.encode();
    writer.write_u32(ENVELOPE_MAGIC).await?;
    writer.write_u32(payload.len() as u32).await?;
    writer.write_all(&payload).await?;
    writer.flush().await
}

/// Read the next well-framed payload from the stream.
///
/// Recovers from framing damage internally: resynchronizes on magic
/// mismatch and skips zero-length or oversized envelopes. Only I/O errors
/// (including EOF) terminate the read. Every iteration is an await point,
/// so dropping the future cancels the loop, resync included.
pub async fn read_envelope<R>(reader: &mut R) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    loop {
        let magic = reader.read_u32().await?;
        if magic != ENVELOPE_MAGIC {
            resync(reader, magic).await?;
        }

        let length = reader.read_u32().await?;
        if length == 0 {
            continue;
        }
        if length > MAX_PAYLOAD_LEN {
            tracing::warn!(length, "discarding envelope above payload ceiling");
            continue;
        }

        let mut payload = vec![0u8; length as usize];
        reader.read_exact(&mut payload).await?;
        return Ok(payload);
    }
}

/// Scan forward one byte at a time until the accumulator matches the magic.
async fn resync<R>(reader: &mut R, seen: u32) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut acc = seen;
    let mut skipped = 0u64;
    loop {
        let byte = reader.read_u8().await?;
        acc = (acc << 8) | byte as u32;
        skipped += 1;
        if acc == ENVELOPE_MAGIC {
            tracing::debug!(skipped, "resynchronized to envelope magic");
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::{
        AudioFormat, AudioFrame, ControlMessage, SequencedAudioFrame, WireMessage,
    };
    use bytes::Bytes;
    use proptest::prelude::*;

    fn audio_msg(sequence: u32, data: Vec<u8>) -> WireMessage {
        WireMessage::Audio(SequencedAudioFrame {
            sequence,
            frame: AudioFrame {
                data: Bytes::from(data),
                sample_rate: 48_000,
                channels: 1,
                format: AudioFormat::Pcm16,
            },
        })
    }

    async fn encode_to_vec(msg: &WireMessage) -> Vec<u8> {
        let mut out = Vec::new();
        write_envelope(&mut out, msg).await.unwrap();
        out
    }

    #[tokio::test]
    async fn roundtrip() {
        let msg = audio_msg(3, vec![9; 32]);
        let bytes = encode_to_vec(&msg).await;

        let mut reader = bytes.as_slice();
        let payload = read_envelope(&mut reader).await.unwrap();
        assert_eq!(WireMessage::decode(&payload).unwrap(), msg);
        assert!(reader.is_empty());
    }

    #[tokio::test]
    async fn header_layout() {
        let msg = WireMessage::Control(ControlMessage { muted: false });
        let bytes = encode_to_vec(&msg).await;

        assert_eq!(&bytes[..4], &ENVELOPE_MAGIC.to_be_bytes());
        let len = u32::from_be_bytes(bytes[4..8].try_into().unwrap());
        assert_eq!(len as usize, bytes.len() - 8);
    }

    #[tokio::test]
    async fn resync_consumes_exactly_garbage_plus_magic() {
        let msg = audio_msg(0, vec![1, 2, 3, 4]);
        let envelope = encode_to_vec(&msg).await;

        // Garbage chosen to never contain the magic word.
        let mut stream = vec![0x11u8, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77];
        stream.extend_from_slice(&envelope);

        let mut reader = stream.as_slice();
        let payload = read_envelope(&mut reader).await.unwrap();
        assert_eq!(WireMessage::decode(&payload).unwrap(), msg);
        assert!(reader.is_empty());
    }

    #[tokio::test]
    async fn bad_magic_then_envelope_yields_one_message() {
        let msg = WireMessage::Control(ControlMessage { muted: true });
        let envelope = encode_to_vec(&msg).await;

        let mut stream = vec![0xDEu8, 0xAD, 0xBE, 0xEF];
        stream.extend_from_slice(&envelope);

        let mut reader = stream.as_slice();
        let payload = read_envelope(&mut reader).await.unwrap();
        assert_eq!(WireMessage::decode(&payload).unwrap(), msg);

        // Exactly one envelope came out; the stream is exhausted.
        assert!(reader.is_empty());
        let eof = read_envelope(&mut reader).await;
        assert_eq!(eof.unwrap_err().kind(), std::io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn oversized_length_is_skipped() {
        let msg = audio_msg(1, vec![7; 8]);
        let envelope = encode_to_vec(&msg).await;

        let mut stream = Vec::new();
        stream.extend_from_slice(&ENVELOPE_MAGIC.to_be_bytes());
        stream.extend_from_slice(&(MAX_PAYLOAD_LEN + 1).to_be_bytes());
        stream.extend_from_slice(&envelope);

        let mut reader = stream.as_slice();
        let payload = read_envelope(&mut reader).await.unwrap();
        assert_eq!(WireMessage::decode(&payload).unwrap(), msg);
    }

    #[tokio::test]
    async fn zero_length_is_skipped() {
        let msg = WireMessage::Control(ControlMessage { muted: false });
        let envelope = encode_to_vec(&msg).await;

        let mut stream = Vec::new();
        stream.extend_from_slice(&ENVELOPE_MAGIC.to_be_bytes());
        stream.extend_from_slice(&0u32.to_be_bytes());
        stream.extend_from_slice(&envelope);

        let mut reader = stream.as_slice();
        let payload = read_envelope(&mut reader).await.unwrap();
        assert_eq!(WireMessage::decode(&payload).unwrap(), msg);
    }

    #[tokio::test]
    async fn envelopes_stay_in_order() {
        let mut stream = Vec::new();
        for seq in 0..5u32 {
            stream.extend_from_slice(&encode_to_vec(&audio_msg(seq, vec![seq as u8; 4])).await);
        }

        let mut reader = stream.as_slice();
        for seq in 0..5u32 {
            let payload = read_envelope(&mut reader).await.unwrap();
            match WireMessage::decode(&payload).unwrap() {
                WireMessage::Audio(f) => assert_eq!(f.sequence, seq),
                other => panic!("unexpected message: {other:?}"),
            }
        }
    }

    proptest! {
        #[test]
        fn roundtrip_arbitrary_payload(data in proptest::collection::vec(any::<u8>(), 0..2048), seq in any::<u32>()) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let msg = audio_msg(seq, data);
                let bytes = encode_to_vec(&msg).await;
                let mut reader = bytes.as_slice();
                let payload = read_envelope(&mut reader).await.unwrap();
                prop_assert_eq!(WireMessage::decode(&payload).unwrap(), msg);
                Ok(())
            })?;
        }
    }
}
