//! Length-prefixed JSON wire protocol for mesh links.
//!
//! Frame format: [4-byte length (u32 big-endian)][payload]
//! The framing layer is payload-agnostic; messages are encoded as JSON on top.
//! A closed or failing stream reads as end-of-stream, never as an error.

use crate::error::WireError;
use crate::network::message::Message;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Default cap on inbound frame size (64MB). Bounds the allocation a peer can force.
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 64 * 1024 * 1024;

/// Bytes of length prefix ahead of every payload.
pub const FRAME_HEADER_LEN: usize = 4;

/// Prefix `payload` with its big-endian length.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, WireError> {
    let len = u32::try_from(payload.len()).map_err(|_| WireError::FrameTooLarge {
        len: payload.len(),
        max: u32::MAX,
    })?;

    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Read one frame's payload.
/// Returns Ok(None) when the stream ends or fails before a full frame arrives.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_frame_size: u32,
) -> Result<Option<Vec<u8>>, WireError> {
    let mut len_buf = [0u8; FRAME_HEADER_LEN];
    if let Err(e) = reader.read_exact(&mut len_buf).await {
        trace!("Stream ended while reading frame length: {}", e);
        return Ok(None);
    }

    let len = u32::from_be_bytes(len_buf);
    if len > max_frame_size {
        return Err(WireError::FrameTooLarge {
            len: len as usize,
            max: max_frame_size,
        });
    }

    let mut payload = vec![0u8; len as usize];
    if let Err(e) = reader.read_exact(&mut payload).await {
        trace!("Stream ended mid-frame ({} bytes expected): {}", len, e);
        return Ok(None);
    }

    Ok(Some(payload))
}

/// Pre-serialize a Message into a length-prefixed frame (for broadcast efficiency).
pub fn serialize_frame(message: &Message) -> Result<Vec<u8>, WireError> {
    let payload = serde_json::to_vec(message).map_err(WireError::Serialize)?;
    encode_frame(&payload)
}

/// Write an already encoded frame and flush it.
pub async fn write_frame<W: AsyncWrite + Unpin + ?Sized>(
    writer: &mut W,
    frame: &[u8],
) -> Result<(), WireError> {
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Serialize a Message and write it as a length-prefixed frame.
pub async fn write_message<W: AsyncWrite + Unpin + ?Sized>(
    writer: &mut W,
    message: &Message,
) -> Result<(), WireError> {
    let frame = serialize_frame(message)?;
    write_frame(writer, &frame).await
}

/// Read a length-prefixed frame and deserialize it into a Message.
/// Returns Ok(None) on end-of-stream.
pub async fn read_message<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_frame_size: u32,
) -> Result<Option<Message>, WireError> {
    let Some(payload) = read_frame(reader, max_frame_size).await? else {
        return Ok(None);
    };

    let message = serde_json::from_slice(&payload).map_err(WireError::Deserialize)?;
    Ok(Some(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::address::PeerAddress;

    #[tokio::test]
    async fn test_roundtrip() {
        let msg = Message::handshake("alice", 9001, vec![PeerAddress::new("10.0.0.2", 9002)]);

        let mut buf = Vec::new();
        write_message(&mut buf, &msg).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let result = read_message(&mut cursor, DEFAULT_MAX_FRAME_SIZE)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(result, msg);
    }

    #[tokio::test]
    async fn test_frame_lengths_roundtrip() {
        for len in [0usize, 1, 3, 4, 5, 65_535, 65_536, 1_000_000, 5_000_000] {
            let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let frame = encode_frame(&payload).unwrap();
            assert_eq!(frame.len(), len + 4);
            assert_eq!(&frame[..4], &(len as u32).to_be_bytes());

            let mut cursor = std::io::Cursor::new(frame);
            let decoded = read_frame(&mut cursor, DEFAULT_MAX_FRAME_SIZE)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(decoded, payload, "length {}", len);
        }
    }

    #[tokio::test]
    async fn test_consecutive_frames() {
        let mut buf = encode_frame(b"first").unwrap();
        buf.extend(encode_frame(b"").unwrap());
        buf.extend(encode_frame(b"third").unwrap());

        let mut cursor = std::io::Cursor::new(buf);
        let max = DEFAULT_MAX_FRAME_SIZE;
        assert_eq!(read_frame(&mut cursor, max).await.unwrap().unwrap(), b"first");
        assert_eq!(read_frame(&mut cursor, max).await.unwrap().unwrap(), b"");
        assert_eq!(read_frame(&mut cursor, max).await.unwrap().unwrap(), b"third");
        assert!(read_frame(&mut cursor, max).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_eof_returns_none() {
        let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
        let result = read_message(&mut cursor, DEFAULT_MAX_FRAME_SIZE).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_truncated_payload_is_end_of_stream() {
        let mut frame = encode_frame(b"hello world").unwrap();
        frame.truncate(8);

        let mut cursor = std::io::Cursor::new(frame);
        let result = read_frame(&mut cursor, DEFAULT_MAX_FRAME_SIZE).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let len = 1025u32.to_be_bytes();
        let mut cursor = std::io::Cursor::new(len.to_vec());
        let result = read_frame(&mut cursor, 1024).await;
        assert!(matches!(
            result,
            Err(WireError::FrameTooLarge { len: 1025, max: 1024 })
        ));
    }

    #[tokio::test]
    async fn test_garbage_payload_is_error() {
        let frame = encode_frame(b"{not json").unwrap();
        let mut cursor = std::io::Cursor::new(frame);
        let result = read_message(&mut cursor, DEFAULT_MAX_FRAME_SIZE).await;
        assert!(matches!(result, Err(WireError::Deserialize(_))));
    }

    #[tokio::test]
    async fn test_duplex_stream() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let msg = Message::chat("over a pipe");
        let sent = msg.clone();

        let writer = tokio::spawn(async move {
            write_message(&mut a, &sent).await.unwrap();
        });

        let received = read_message(&mut b, DEFAULT_MAX_FRAME_SIZE)
            .await
            .unwrap()
            .unwrap();
        writer.await.unwrap();
        assert_eq!(received, msg);
    }
}
