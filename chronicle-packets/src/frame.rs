use crate::{AsyncReadPacket, AsyncWritePacket, Error, VarInt};
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use std::io::{Cursor, Read, Write};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// The max frame length in bytes. Larger frames are rejected.
///
/// The vanilla protocol caps uncompressed packets at 2^21 bytes, so anything beyond
/// that indicates a desynchronized or hostile stream.
pub const MAX_FRAME_LENGTH: VarInt = 1 << 21;

/// A single framed play-state packet as delivered by the server.
///
/// The `raw` field is the exact byte sequence `varint(id) || body` after decompression. It is
/// retained so packets that are never parsed can still be persisted bit-exact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketFrame {
    /// The packet id that was decoded from the frame.
    pub id: VarInt,
    /// The packet body (everything after the packet id).
    pub body: Vec<u8>,
    /// The full frame content (`varint(id) || body`), exactly as received.
    pub raw: Vec<u8>,
}

impl PacketFrame {
    /// Assembles a frame from a packet id and body, re-encoding the id varint.
    pub async fn from_parts(id: VarInt, body: Vec<u8>) -> Result<Self, Error> {
        let mut raw = Vec::with_capacity(body.len() + 2);
        raw.write_varint(id).await?;
        raw.extend_from_slice(&body);
        Ok(Self { id, body, raw })
    }
}

/// Reads a complete frame from the stream.
///
/// With `compression` set, the post-length prefix is interpreted as the uncompressed data length
/// and a non-zero value selects zlib inflation, as negotiated through the login-state
/// SetCompression packet.
pub async fn read_frame<S>(stream: &mut S, compression: Option<VarInt>) -> Result<PacketFrame, Error>
where
    S: AsyncRead + Unpin + Send + Sync,
{
    let length = stream.read_varint().await?;
    if length <= 0 || length > MAX_FRAME_LENGTH {
        return Err(Error::IllegalPacketLength { length });
    }

    let mut payload = vec![0; length as usize];
    stream
        .read_exact(&mut payload)
        .await
        .map_err(|err| match err.kind() {
            std::io::ErrorKind::UnexpectedEof => Error::TruncatedFrame {
                expected: length as usize,
            },
            _ => Error::Io(err),
        })?;

    let mut cursor = Cursor::new(payload);
    let raw = if compression.is_some() {
        let data_length = cursor.read_varint().await?;
        let position = cursor.position() as usize;
        let remainder = &cursor.get_ref()[position..];
        if data_length > 0 {
            if data_length > MAX_FRAME_LENGTH {
                return Err(Error::IllegalPacketLength {
                    length: data_length,
                });
            }
            let mut inflated = Vec::with_capacity(data_length as usize);
            ZlibDecoder::new(remainder)
                .read_to_end(&mut inflated)
                .map_err(|err| Error::DecompressFailed(err.to_string()))?;
            if inflated.len() != data_length as usize {
                return Err(Error::DecompressFailed(format!(
                    "inflated to {} bytes, expected {}",
                    inflated.len(),
                    data_length
                )));
            }
            inflated
        } else {
            remainder.to_vec()
        }
    } else {
        cursor.into_inner()
    };

    let mut raw_cursor = Cursor::new(&raw);
    let id = raw_cursor.read_varint().await?;
    let body = raw[raw_cursor.position() as usize..].to_vec();

    Ok(PacketFrame { id, body, raw })
}

/// Writes a single frame to the stream, compressing past the negotiated threshold.
pub async fn write_frame<S>(
    stream: &mut S,
    compression: Option<VarInt>,
    id: VarInt,
    body: &[u8],
) -> Result<(), Error>
where
    S: AsyncWrite + Unpin + Send + Sync,
{
    let mut content = Vec::with_capacity(body.len() + 2);
    content.write_varint(id).await?;
    content.extend_from_slice(body);

    match compression {
        Some(threshold) if content.len() as VarInt >= threshold => {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&content)?;
            let deflated = encoder.finish()?;

            let mut payload = Vec::with_capacity(deflated.len() + 4);
            payload.write_varint(content.len() as VarInt).await?;
            payload.extend_from_slice(&deflated);

            stream.write_varint(payload.len() as VarInt).await?;
            stream.write_all(&payload).await?;
        }
        Some(_) => {
            let mut payload = Vec::with_capacity(content.len() + 1);
            payload.write_varint(0).await?;
            payload.extend_from_slice(&content);

            stream.write_varint(payload.len() as VarInt).await?;
            stream.write_all(&payload).await?;
        }
        None => {
            stream.write_varint(content.len() as VarInt).await?;
            stream.write_all(&content).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_plain_frame() {
        // frame: length 3, id 0x4E, body [0x01, 0x02]
        let mut stream = Cursor::new(vec![0x03, 0x4E, 0x01, 0x02]);
        let frame = read_frame(&mut stream, None).await.expect("read failed");
        assert_eq!(frame.id, 0x4E);
        assert_eq!(frame.body, vec![0x01, 0x02]);
        assert_eq!(frame.raw, vec![0x4E, 0x01, 0x02]);
    }

    #[tokio::test]
    async fn read_uncompressed_frame_below_threshold() {
        // compressed format with data_length 0: length 4, 0x00 marker, id, body
        let mut stream = Cursor::new(vec![0x04, 0x00, 0x1D, 0x02, 0x00]);
        let frame = read_frame(&mut stream, Some(256)).await.expect("read failed");
        assert_eq!(frame.id, 0x1D);
        assert_eq!(frame.body, vec![0x02, 0x00]);
    }

    #[tokio::test]
    async fn roundtrip_compressed_frame() {
        let body = vec![0x42; 512];
        let mut stream: Cursor<Vec<u8>> = Cursor::new(Vec::new());
        write_frame(&mut stream, Some(64), 0x20, &body)
            .await
            .expect("write failed");

        let mut reader = Cursor::new(stream.into_inner());
        let frame = read_frame(&mut reader, Some(64)).await.expect("read failed");
        assert_eq!(frame.id, 0x20);
        assert_eq!(frame.body, body);
    }

    #[tokio::test]
    async fn roundtrip_plain_frame() {
        let body = vec![0x01, 0x02, 0x03];
        let mut stream: Cursor<Vec<u8>> = Cursor::new(Vec::new());
        write_frame(&mut stream, None, 0x05, &body)
            .await
            .expect("write failed");

        let mut reader = Cursor::new(stream.into_inner());
        let frame = read_frame(&mut reader, None).await.expect("read failed");
        assert_eq!(frame.id, 0x05);
        assert_eq!(frame.body, body);
        assert_eq!(frame.raw, vec![0x05, 0x01, 0x02, 0x03]);
    }

    #[tokio::test]
    async fn oversized_frame_rejected() {
        let mut stream: Cursor<Vec<u8>> = Cursor::new(Vec::new());
        stream
            .write_varint(MAX_FRAME_LENGTH + 1)
            .await
            .expect("write failed");

        let mut reader = Cursor::new(stream.into_inner());
        assert!(matches!(
            read_frame(&mut reader, None).await,
            Err(Error::IllegalPacketLength { .. })
        ));
    }

    #[tokio::test]
    async fn truncated_frame_rejected() {
        let mut stream = Cursor::new(vec![0x05, 0x4E]);
        assert!(matches!(
            read_frame(&mut stream, None).await,
            Err(Error::TruncatedFrame { .. })
        ));
    }
}
