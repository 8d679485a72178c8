// Copyright 2022-2024 Protocol Labs
// SPDX-License-Identifier: MIT

//! Length-prefixed frame codec: `uint32 big-endian length ‖ payload`.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::MAX_MESSAGE_SIZE;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("message too large: {0}")]
    TooLarge(usize),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FrameError {
    /// True when the peer went away mid-frame.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, FrameError::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
    }
}

/// Read one frame: exactly 4 header bytes, then exactly `len` payload bytes.
/// A length above [`MAX_MESSAGE_SIZE`] is rejected before any payload read.
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    reader.read_exact(&mut header).await?;
    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(FrameError::TooLarge(len));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Write one frame and flush it.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(FrameError::TooLarge(payload.len()));
    }
    writer.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn roundtrip() {
        let mut buf = Vec::new();
        write_frame(&mut buf, br#"{"ok":true}"#).await.unwrap();

        let mut reader: &[u8] = &buf;
        let payload = read_frame(&mut reader).await.unwrap();
        assert_eq!(payload, br#"{"ok":true}"#);
    }

    #[tokio::test]
    async fn max_size_is_inclusive() {
        // A payload of exactly the limit is accepted.
        let mut frame = Vec::with_capacity(MAX_MESSAGE_SIZE + 4);
        frame.extend_from_slice(&(MAX_MESSAGE_SIZE as u32).to_be_bytes());
        frame.resize(MAX_MESSAGE_SIZE + 4, b'x');

        let mut reader: &[u8] = &frame;
        let payload = read_frame(&mut reader).await.unwrap();
        assert_eq!(payload.len(), MAX_MESSAGE_SIZE);

        // One byte over is rejected from the header alone.
        let header = ((MAX_MESSAGE_SIZE + 1) as u32).to_be_bytes();
        let mut reader: &[u8] = &header;
        match read_frame(&mut reader).await {
            Err(FrameError::TooLarge(n)) => assert_eq!(n, MAX_MESSAGE_SIZE + 1),
            other => panic!("expected TooLarge, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn truncated_payload_is_a_disconnect() {
        let mut frame = Vec::new();
        frame.extend_from_slice(&8u32.to_be_bytes());
        frame.extend_from_slice(b"abc");

        let mut reader: &[u8] = &frame;
        let err = read_frame(&mut reader).await.unwrap_err();
        assert!(err.is_disconnect());
    }

    #[tokio::test]
    async fn oversized_write_is_rejected() {
        let payload = vec![0u8; MAX_MESSAGE_SIZE + 1];
        let mut buf = Vec::new();
        let err = write_frame(&mut buf, &payload).await.unwrap_err();
        assert!(matches!(err, FrameError::TooLarge(_)));
        assert!(buf.is_empty());
    }
}
