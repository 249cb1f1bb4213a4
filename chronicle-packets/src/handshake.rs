use crate::{
    AsyncReadPacket, AsyncWritePacket, Error, Packet, ReadPacket, State, VarInt, WritePacket,
};
#[cfg(test)]
use fake::Dummy;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// The serverbound [`HandshakePacket`].
///
/// [Minecraft Docs](https://minecraft.wiki/w/Java_Edition_protocol#Handshake)
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(test, derive(Dummy))]
pub struct HandshakePacket {
    /// The protocol number the client wants to speak.
    pub protocol_version: VarInt,
    /// The hostname that was used to connect.
    pub server_address: String,
    /// The port that was used to connect.
    pub server_port: u16,
    /// The state the connection should continue with.
    pub next_state: State,
}

impl Packet for HandshakePacket {
    const ID: VarInt = 0x00;
}

impl WritePacket for HandshakePacket {
    async fn write_to_buffer<S>(&self, buffer: &mut S) -> Result<(), Error>
    where
        S: AsyncWrite + Unpin + Send + Sync,
    {
        buffer.write_varint(self.protocol_version).await?;
        buffer.write_string(&self.server_address).await?;
        buffer.write_u16(self.server_port).await?;
        buffer.write_varint(self.next_state.into()).await?;

        Ok(())
    }
}

impl ReadPacket for HandshakePacket {
    async fn read_from_buffer<S>(buffer: &mut S) -> Result<Self, Error>
    where
        S: AsyncRead + Unpin + Send + Sync,
    {
        let protocol_version = buffer.read_varint().await?;
        let server_address = buffer.read_string().await?;
        let server_port = buffer.read_u16().await?;
        let next_state = buffer.read_varint().await?.try_into()?;

        Ok(Self {
            protocol_version,
            server_address,
            server_port,
            next_state,
        })
    }
}
