//! Length-prefixed JSON framing over an async duplex stream.
//!
//! Each frame is a 4-byte big-endian length prefix followed by that many
//! bytes of UTF-8 JSON. There is no magic/version byte — the envelope's
//! `type` field carries that information at the application layer.

use crate::error::{ProtocolError, Result};
use crate::types::Envelope;
use byteorder::{BigEndian, ByteOrder};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Frames larger than this are rejected before the body is read, so a
/// corrupt or hostile length prefix can't force an unbounded allocation.
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Read one length-prefixed JSON frame and decode it as an [`Envelope`].
/// Returns `Err(ProtocolError::ConnectionClosed)` on clean EOF at a frame
/// boundary.
pub async fn read_envelope<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Envelope> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(ProtocolError::ConnectionClosed)
        }
        Err(e) => return Err(ProtocolError::Io(e)),
    }

    let len = BigEndian::read_u32(&len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: len,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;

    let envelope: Envelope = serde_json::from_slice(&body)?;
    Ok(envelope)
}

/// Encode an [`Envelope`] and write it as one length-prefixed frame.
pub async fn write_envelope<W: AsyncWrite + Unpin>(writer: &mut W, envelope: &Envelope) -> Result<()> {
    let body = serde_json::to_vec(envelope)?;
    if body.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: body.len(),
            max: MAX_FRAME_SIZE,
        });
    }

    let mut len_buf = [0u8; 4];
    BigEndian::write_u32(&mut len_buf, body.len() as u32);

    writer.write_all(&len_buf).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::message_type;
    use std::io::Cursor;

    #[tokio::test]
    async fn envelope_roundtrips_through_a_frame() {
        let env = Envelope::new(message_type::PING, serde_json::json!({}));
        let mut buf = Vec::new();
        write_envelope(&mut buf, &env).await.unwrap();

        let mut cursor = Cursor::new(buf);
        let decoded = read_envelope(&mut cursor).await.unwrap();
        assert_eq!(decoded.kind, "ping");
    }

    #[tokio::test]
    async fn clean_eof_at_frame_boundary_is_connection_closed() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        let err = read_envelope(&mut cursor).await.unwrap_err();
        assert!(matches!(err, ProtocolError::ConnectionClosed));
    }

    #[tokio::test]
    async fn oversized_length_prefix_is_rejected_before_reading_body() {
        let mut len_buf = [0u8; 4];
        BigEndian::write_u32(&mut len_buf, (MAX_FRAME_SIZE + 1) as u32);
        let mut cursor = Cursor::new(len_buf.to_vec());
        let err = read_envelope(&mut cursor).await.unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge { .. }));
    }
}
