//! Frame codec for stream transports
//!
//! Frame format: [MAGIC "FKV1"][LEN u32 LE][PAYLOAD][CRC32 u32 LE]
//!
//! The payload is a bincode-encoded envelope. The CRC covers the payload only.

use crate::common::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const FRAME_MAGIC: [u8; 4] = [0x46, 0x4B, 0x56, 0x31]; // "FKV1"
const HEADER_LEN: usize = 8;
const TRAILER_LEN: usize = 4;

/// Encode a message into a complete frame
pub fn encode_frame<T: Serialize>(message: &T, max_frame_size: usize) -> Result<Vec<u8>> {
    let payload = bincode::serialize(message)?;
    if payload.len() > max_frame_size {
        return Err(Error::FrameTooLarge {
            size: payload.len(),
            max: max_frame_size,
        });
    }

    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len() + TRAILER_LEN);
    frame.extend_from_slice(&FRAME_MAGIC);
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&payload);
    frame.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    Ok(frame)
}

/// Decode one complete frame held in memory
pub fn decode_frame<T: DeserializeOwned>(frame: &[u8], max_frame_size: usize) -> Result<T> {
    if frame.len() < HEADER_LEN + TRAILER_LEN {
        return Err(Error::Protocol(format!("short frame: {} bytes", frame.len())));
    }
    let len = check_header(&frame[..HEADER_LEN], max_frame_size)?;
    if frame.len() != HEADER_LEN + len + TRAILER_LEN {
        return Err(Error::Protocol(format!(
            "frame length mismatch: header says {}, got {}",
            len,
            frame.len() - HEADER_LEN - TRAILER_LEN
        )));
    }

    let payload = &frame[HEADER_LEN..HEADER_LEN + len];
    let mut crc = [0u8; 4];
    crc.copy_from_slice(&frame[HEADER_LEN + len..]);
    verify_crc(payload, u32::from_le_bytes(crc))?;

    Ok(bincode::deserialize(payload)?)
}

/// Write one message as a frame and flush
pub async fn write_frame<W, T>(writer: &mut W, message: &T, max_frame_size: usize) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
    T: Serialize,
{
    let frame = encode_frame(message, max_frame_size)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame. Returns `None` on a clean end of stream before a header.
pub async fn read_frame<R, T>(reader: &mut R, max_frame_size: usize) -> Result<Option<T>>
where
    R: AsyncRead + Unpin + ?Sized,
    T: DeserializeOwned,
{
    let mut header = [0u8; HEADER_LEN];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = check_header(&header, max_frame_size)?;

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    let crc = reader.read_u32_le().await?;
    verify_crc(&payload, crc)?;

    Ok(Some(bincode::deserialize(&payload)?))
}

fn check_header(header: &[u8], max_frame_size: usize) -> Result<usize> {
    if header[..4] != FRAME_MAGIC {
        return Err(Error::Protocol("invalid frame magic".into()));
    }
    let len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
    if len > max_frame_size {
        return Err(Error::FrameTooLarge {
            size: len,
            max: max_frame_size,
        });
    }
    Ok(len)
}

fn verify_crc(payload: &[u8], expected: u32) -> Result<()> {
    let actual = crc32fast::hash(payload);
    if actual != expected {
        return Err(Error::ChecksumMismatch { expected, actual });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Request, RequestFrame, Response, ResponseFrame, Status};

    const MAX: usize = 1024 * 1024;

    #[tokio::test]
    async fn test_stream_frames_in_order() {
        let (mut client, mut server) = tokio::io::duplex(4096);

        let first = RequestFrame {
            id: 1,
            request: Request::Set {
                key: "123".into(),
                value: b"456".to_vec(),
                ttl: Some(5),
            },
        };
        let second = RequestFrame {
            id: 2,
            request: Request::Get { key: "123".into() },
        };
        write_frame(&mut client, &first, MAX).await.unwrap();
        write_frame(&mut client, &second, MAX).await.unwrap();
        drop(client);

        let a: Option<RequestFrame> = read_frame(&mut server, MAX).await.unwrap();
        let b: Option<RequestFrame> = read_frame(&mut server, MAX).await.unwrap();
        let end: Option<RequestFrame> = read_frame(&mut server, MAX).await.unwrap();
        assert_eq!(a, Some(first));
        assert_eq!(b, Some(second));
        assert!(end.is_none());
    }

    #[test]
    fn test_corrupted_payload_is_rejected() {
        let frame = ResponseFrame {
            id: 7,
            response: Response::status(Status::NoSuchKey),
        };
        let mut bytes = encode_frame(&frame, MAX).unwrap();
        bytes[HEADER_LEN] ^= 0xFF;

        let err = decode_frame::<ResponseFrame>(&bytes, MAX).unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_bad_magic_is_rejected() {
        let frame = ResponseFrame {
            id: 1,
            response: Response::ok(),
        };
        let mut bytes = encode_frame(&frame, MAX).unwrap();
        bytes[0] = b'X';
        assert!(matches!(
            decode_frame::<ResponseFrame>(&bytes, MAX),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_oversized_frame() {
        let request = Request::Set {
            key: "k".into(),
            value: vec![0u8; 256],
            ttl: None,
        };
        assert!(matches!(
            encode_frame(&request, 64),
            Err(Error::FrameTooLarge { max: 64, .. })
        ));
    }

    #[tokio::test]
    async fn test_oversized_length_header_is_rejected_before_reading() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&FRAME_MAGIC);
        bytes.extend_from_slice(&(u32::MAX).to_le_bytes());
        let mut reader = &bytes[..];

        let result: Result<Option<RequestFrame>> = read_frame(&mut reader, MAX).await;
        assert!(matches!(result, Err(Error::FrameTooLarge { .. })));
    }
}
