//! Length-prefixed framing.
//!
//! # Wire Format
//!
//! Each frame is sent as:
//! - `u32 LE`: payload length
//! - `[u8; len]`: UTF-8 JSON encoding of one [`Element`]
//!
//! A length of zero is the close frame: the sender will not write again.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{Element, TransportError};

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX: usize = 4;

/// Default upper bound for a single payload (16 MiB).
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Document(Element),
    Close,
}

/// Serialize a document into a complete frame (prefix included).
pub fn encode_document(doc: &Element) -> Result<Bytes, TransportError> {
    let payload = doc.to_vec()?;
    encode_payload(&payload)
}

/// Prefix an already-serialized payload. Empty payloads are refused: a zero
/// length would be read back as the close frame.
pub fn encode_payload(payload: &[u8]) -> Result<Bytes, TransportError> {
    if payload.is_empty() {
        return Err(TransportError::EmptyPayload);
    }
    let len = u32::try_from(payload.len()).map_err(|_| TransportError::FrameTooLarge {
        len: payload.len(),
        max: u32::MAX as usize,
    })?;
    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX + payload.len());
    buf.put_u32_le(len);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

pub fn close_frame() -> Bytes {
    Bytes::from_static(&[0, 0, 0, 0])
}

/// Reads frames from the inbound half of a stream.
#[derive(Debug)]
pub struct FrameReader<R> {
    reader: R,
    max_frame_len: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self::with_max_frame_len(reader, DEFAULT_MAX_FRAME_LEN)
    }

    pub fn with_max_frame_len(reader: R, max_frame_len: usize) -> Self {
        Self {
            reader,
            max_frame_len,
        }
    }

    /// Read exactly one frame.
    ///
    /// End of stream before the first prefix byte is [`TransportError::Closed`];
    /// end of stream anywhere later is an I/O error.
    pub async fn read_frame(&mut self) -> Result<Frame, TransportError> {
        let mut len_buf = [0u8; LENGTH_PREFIX];
        let mut filled = 0;
        while filled < LENGTH_PREFIX {
            let n = self.reader.read(&mut len_buf[filled..]).await?;
            if n == 0 {
                if filled == 0 {
                    return Err(TransportError::Closed);
                }
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "stream ended inside a frame length prefix",
                )
                .into());
            }
            filled += n;
        }

        let len = u32::from_le_bytes(len_buf) as usize;
        if len == 0 {
            return Ok(Frame::Close);
        }
        if len > self.max_frame_len {
            return Err(TransportError::FrameTooLarge {
                len,
                max: self.max_frame_len,
            });
        }

        let mut payload = vec![0u8; len];
        self.reader.read_exact(&mut payload).await?;
        tracing::trace!(len, "read frame");
        Element::from_slice(&payload).map(Frame::Document)
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

/// Writes complete frames to the outbound half of a stream.
#[derive(Debug)]
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Write one pre-encoded frame and flush it.
    pub async fn write_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        self.writer.write_all(frame).await?;
        self.writer.flush().await?;
        Ok(())
    }

    pub async fn write_document(&mut self, doc: &Element) -> Result<(), TransportError> {
        let frame = encode_document(doc)?;
        self.write_frame(&frame).await
    }

    /// Write the close frame and shut the stream down.
    pub async fn close(&mut self) -> Result<(), TransportError> {
        self.write_frame(&close_frame()).await?;
        self.writer.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_refuses_empty_payload() {
        assert!(matches!(
            encode_payload(&[]),
            Err(TransportError::EmptyPayload)
        ));
    }

    #[test]
    fn prefix_is_little_endian_length() {
        let frame = encode_payload(b"{}").unwrap();
        assert_eq!(&frame[..4], &[2, 0, 0, 0]);
        assert_eq!(&frame[4..], b"{}");
    }

    #[tokio::test]
    async fn zero_length_is_close() {
        let bytes: &[u8] = &[0, 0, 0, 0];
        let mut reader = FrameReader::new(bytes);
        assert_eq!(reader.read_frame().await.unwrap(), Frame::Close);
    }

    #[tokio::test]
    async fn clean_eof_is_closed_but_short_read_is_io() {
        let empty: &[u8] = &[];
        let mut reader = FrameReader::new(empty);
        assert!(matches!(
            reader.read_frame().await,
            Err(TransportError::Closed)
        ));

        let truncated: &[u8] = &[10, 0, 0, 0, b'{'];
        let mut reader = FrameReader::new(truncated);
        assert!(matches!(reader.read_frame().await, Err(TransportError::Io(_))));

        let half_prefix: &[u8] = &[10, 0];
        let mut reader = FrameReader::new(half_prefix);
        assert!(matches!(reader.read_frame().await, Err(TransportError::Io(_))));
    }

    #[tokio::test]
    async fn oversized_frames_are_rejected() {
        let frame = encode_document(&Element::new("Cancel").with_attr("ObjectID", 1)).unwrap();
        let mut reader = FrameReader::with_max_frame_len(&frame[..], 8);
        assert!(matches!(
            reader.read_frame().await,
            Err(TransportError::FrameTooLarge { max: 8, .. })
        ));
    }

    #[tokio::test]
    async fn garbage_payload_is_decode_error() {
        let frame = encode_payload(b"not json").unwrap();
        let mut reader = FrameReader::new(&frame[..]);
        assert!(matches!(
            reader.read_frame().await,
            Err(TransportError::Decode(_))
        ));
    }
}
