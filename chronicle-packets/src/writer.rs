use crate::{AsyncWritePacket, Error, INITIAL_BUFFER_SIZE, VarInt, VarLong, WritePacket};
use std::fmt::Debug;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

/// The widest base-128 encoding we ever produce (a 64-bit value needs ten septets).
const MAX_VAR_WIDTH: usize = 10;

/// Encodes a value into little-endian base-128, seven payload bits per byte with the high bit
/// marking continuation. Varints and varlongs only differ in how the value was widened to `u64`
/// beforehand, so both writers share this encoder.
fn encode_var(mut value: u64, encoded: &mut [u8; MAX_VAR_WIDTH]) -> usize {
    let mut width = 0;
    loop {
        let mut septet = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            septet |= 0x80;
        }
        encoded[width] = septet;
        width += 1;
        if value == 0 {
            return width;
        }
    }
}

impl<W: AsyncWrite + Unpin + Send + Sync> AsyncWritePacket for W {
    async fn write_packet<T: WritePacket + Send + Sync + Debug>(
        &mut self,
        packet: T,
    ) -> Result<(), Error> {
        // the length prefix depends on the serialized size, so the id and fields go into a
        // scratch buffer first
        let mut payload = Vec::with_capacity(INITIAL_BUFFER_SIZE);
        payload.write_varint(T::ID).await?;
        packet.write_to_buffer(&mut payload).await?;

        let mut prefix = [0u8; MAX_VAR_WIDTH];
        let prefix_width = encode_var(payload.len() as u64, &mut prefix);

        // hand the transport one contiguous message
        let mut message = Vec::with_capacity(prefix_width + payload.len());
        message.extend_from_slice(&prefix[..prefix_width]);
        message.extend_from_slice(&payload);
        self.write_all(&message).await?;

        Ok(())
    }

    async fn write_varint(&mut self, value: VarInt) -> Result<(), Error> {
        // widen through u32 so negative values keep their canonical five-byte form
        let mut encoded = [0u8; MAX_VAR_WIDTH];
        let width = encode_var(u64::from(value as u32), &mut encoded);
        self.write_all(&encoded[..width]).await?;

        Ok(())
    }

    async fn write_varlong(&mut self, value: VarLong) -> Result<(), Error> {
        let mut encoded = [0u8; MAX_VAR_WIDTH];
        let width = encode_var(value as u64, &mut encoded);
        self.write_all(&encoded[..width]).await?;

        Ok(())
    }

    async fn write_string(&mut self, string: &str) -> Result<(), Error> {
        // a string is its UTF-8 bytes behind the usual length prefix
        self.write_bytes(string.as_bytes()).await
    }

    async fn write_uuid(&mut self, id: &Uuid) -> Result<(), Error> {
        self.write_u128(id.as_u128()).await?;

        Ok(())
    }

    async fn write_bool(&mut self, bool: bool) -> Result<(), Error> {
        self.write_u8(u8::from(bool)).await?;

        Ok(())
    }

    async fn write_bytes(&mut self, arr: &[u8]) -> Result<(), Error> {
        self.write_varint(arr.len() as VarInt).await?;
        self.write_all(arr).await?;

        Ok(())
    }
}
