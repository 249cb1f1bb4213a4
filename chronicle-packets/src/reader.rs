use crate::{AsyncReadPacket, Error, ReadPacket, VarInt, VarLong};
use tokio::io::{AsyncRead, AsyncReadExt};
use uuid::Uuid;

/// Reassembles a little-endian base-128 value of at most `max_width` bytes.
///
/// Varints and varlongs only differ in how wide the continuation chain may legally grow, so both
/// readers share this decoder. A continuation bit still set on the last permitted byte means the
/// stream is corrupt (or hostile) and is rejected instead of silently wrapping.
async fn read_var<R>(reader: &mut R, max_width: usize) -> Result<u64, Error>
where
    R: AsyncRead + Unpin + Send + Sync + ?Sized,
{
    let mut value = 0u64;
    for position in 0..max_width {
        let septet = reader.read_u8().await?;
        value |= u64::from(septet & 0x7F) << (7 * position);
        if septet & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(Error::BadVarInt)
}

impl<R: AsyncRead + Unpin + Send + Sync> AsyncReadPacket for R {
    async fn read_packet<T: ReadPacket + Send + Sync>(&mut self) -> Result<T, Error> {
        // the frame starts with its length; anything non-positive cannot hold a packet id
        let length = self.read_varint().await?;
        if length <= 0 {
            return Err(Error::IllegalPacketLength { length });
        }

        // the id must match the requested packet type
        let packet_id = self.read_varint().await?;
        if packet_id != T::ID {
            return Err(Error::IllegalPacketId {
                expected: T::ID,
                actual: packet_id,
            });
        }

        // cap the body reader at the declared frame length
        let mut take = self.take(length as u64);
        T::read_from_buffer(&mut take).await
    }

    async fn read_varint(&mut self) -> Result<VarInt, Error> {
        Ok(read_var(self, 5).await? as u32 as i32)
    }

    async fn read_varlong(&mut self) -> Result<VarLong, Error> {
        Ok(read_var(self, 10).await? as i64)
    }

    async fn read_string(&mut self) -> Result<String, Error> {
        // a string is a length-prefixed byte array that must decode as UTF-8
        String::from_utf8(self.read_bytes().await?).map_err(|_| Error::InvalidEncoding)
    }

    async fn read_bool(&mut self) -> Result<bool, Error> {
        let bool = self.read_u8().await?;
        Ok(bool == 1u8)
    }

    async fn read_uuid(&mut self) -> Result<Uuid, Error> {
        let value = self.read_u128().await?;

        Ok(Uuid::from_u128(value))
    }

    async fn read_bytes(&mut self) -> Result<Vec<u8>, Error> {
        let length = self.read_varint().await? as usize;

        let mut buffer = vec![0; length];
        self.read_exact(&mut buffer).await?;

        Ok(buffer)
    }
}
