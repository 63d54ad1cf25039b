//! Plaintext handshake token exchange.
//!
//! Before any envelope flows, the dialing side writes a fixed ASCII token
//! and expects a different fixed token back. The tokens are protocol
//! version markers, not secrets; a mismatch is the one place where a
//! protocol-incompatible peer is detected. No recovery is attempted, the
//! caller closes the transport and reconnects.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ProtocolError, Result};

/// Token written by the capture (dialing) side.
pub const CLIENT_TOKEN: &[u8; 12] = b"MicBridgeCk1";

/// Token answered by the render (accepting) side.
pub const SERVER_TOKEN: &[u8; 12] = b"MicBridgeCk2";

/// Dial-side handshake: send our token, validate the peer's answer.
pub async fn initiate<S>(stream: &mut S) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(CLIENT_TOKEN).await?;
    stream.flush().await?;

    let mut answer = [0u8; SERVER_TOKEN.len()];
    stream.read_exact(&mut answer).await?;
    if &answer != SERVER_TOKEN {
        return Err(mismatch(SERVER_TOKEN, &answer));
    }
    Ok(())
}

/// Accept-side handshake: validate the peer's token, answer with ours.
pub async fn accept<S>(stream: &mut S) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut greeting = [0u8; CLIENT_TOKEN.len()];
    stream.read_exact(&mut greeting).await?;
    if &greeting != CLIENT_TOKEN {
        return Err(mismatch(CLIENT_TOKEN, &greeting));
    }

    stream.write_all(SERVER_TOKEN).await?;
    stream.flush().await?;
    Ok(())
}

fn mismatch(expected: &[u8], got: &[u8]) -> crate::Error {
    ProtocolError::HandshakeFailed {
        expected: String::from_utf8_lossy(expected).into_owned(),
        got: String::from_utf8_lossy(got).into_owned(),
    }
    .into()
}
