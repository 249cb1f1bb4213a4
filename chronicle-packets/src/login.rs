use crate::{
    AsyncReadPacket, AsyncWritePacket, Error, Packet, ReadPacket, VarInt, WritePacket,
};
#[cfg(test)]
use fake::Dummy;
use tokio::io::{AsyncRead, AsyncWrite};
use uuid::Uuid;

pub mod clientbound {
    use super::*;

    /// The clientbound [`DisconnectPacket`] of the login state.
    ///
    /// [Minecraft Docs](https://minecraft.wiki/w/Java_Edition_protocol#Disconnect_(login))
    #[derive(Debug, Clone, PartialEq, Eq)]
    #[cfg_attr(test, derive(Dummy))]
    pub struct DisconnectPacket {
        /// The JSON text component containing the reason of the disconnect.
        pub reason: String,
    }

    impl Packet for DisconnectPacket {
        const ID: VarInt = 0x00;
    }

    impl ReadPacket for DisconnectPacket {
        async fn read_from_buffer<S>(buffer: &mut S) -> Result<Self, Error>
        where
            S: AsyncRead + Unpin + Send + Sync,
        {
            let reason = buffer.read_string().await?;

            Ok(Self { reason })
        }
    }

    impl WritePacket for DisconnectPacket {
        async fn write_to_buffer<S>(&self, buffer: &mut S) -> Result<(), Error>
        where
            S: AsyncWrite + Unpin + Send + Sync,
        {
            buffer.write_string(&self.reason).await?;

            Ok(())
        }
    }

    /// The clientbound [`EncryptionRequestPacket`].
    ///
    /// [Minecraft Docs](https://minecraft.wiki/w/Java_Edition_protocol#Encryption_Request)
    #[derive(Debug, Clone, PartialEq, Eq)]
    #[cfg_attr(test, derive(Dummy))]
    pub struct EncryptionRequestPacket {
        /// The server id hashed into the session digest (empty on modern servers).
        pub server_id: String,
        /// The DER-encoded RSA public key of the server.
        pub public_key: Vec<u8>,
        /// The nonce that must be echoed RSA-encrypted.
        pub verify_token: Vec<u8>,
    }

    impl Packet for EncryptionRequestPacket {
        const ID: VarInt = 0x01;
    }

    impl ReadPacket for EncryptionRequestPacket {
        async fn read_from_buffer<S>(buffer: &mut S) -> Result<Self, Error>
        where
            S: AsyncRead + Unpin + Send + Sync,
        {
            let server_id = buffer.read_string().await?;
            let public_key = buffer.read_bytes().await?;
            let verify_token = buffer.read_bytes().await?;

            Ok(Self {
                server_id,
                public_key,
                verify_token,
            })
        }
    }

    impl WritePacket for EncryptionRequestPacket {
        async fn write_to_buffer<S>(&self, buffer: &mut S) -> Result<(), Error>
        where
            S: AsyncWrite + Unpin + Send + Sync,
        {
            buffer.write_string(&self.server_id).await?;
            buffer.write_bytes(&self.public_key).await?;
            buffer.write_bytes(&self.verify_token).await?;

            Ok(())
        }
    }

    /// The clientbound [`LoginSuccessPacket`].
    ///
    /// The user id is a raw 16-byte UUID from 1.16 onwards and a dashed string before that, so
    /// this packet is decoded with the negotiated protocol at hand instead of the plain
    /// [`ReadPacket`] machinery.
    ///
    /// [Minecraft Docs](https://minecraft.wiki/w/Java_Edition_protocol#Login_Success)
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct LoginSuccessPacket {
        pub user_id: Uuid,
        pub user_name: String,
    }

    impl Packet for LoginSuccessPacket {
        const ID: VarInt = 0x02;
    }

    impl LoginSuccessPacket {
        pub async fn read_versioned<S>(buffer: &mut S, protocol: i32) -> Result<Self, Error>
        where
            S: AsyncRead + Unpin + Send + Sync,
        {
            let user_id = if protocol >= 736 {
                buffer.read_uuid().await?
            } else {
                let text = buffer.read_string().await?;
                Uuid::parse_str(&text).map_err(|_| Error::InvalidEncoding)?
            };
            let user_name = buffer.read_string().await?;

            Ok(Self { user_id, user_name })
        }

        pub async fn write_versioned<S>(&self, buffer: &mut S, protocol: i32) -> Result<(), Error>
        where
            S: AsyncWrite + Unpin + Send + Sync,
        {
            if protocol >= 736 {
                buffer.write_uuid(&self.user_id).await?;
            } else {
                buffer.write_string(&self.user_id.hyphenated().to_string()).await?;
            }
            buffer.write_string(&self.user_name).await?;

            Ok(())
        }
    }

    /// The clientbound [`SetCompressionPacket`].
    ///
    /// Enables compression. If compression is enabled, all following packets are encoded in the
    /// compressed packet format. Negative values disable compression again.
    ///
    /// [Minecraft Docs](https://minecraft.wiki/w/Java_Edition_protocol#Set_Compression)
    #[derive(Debug, Clone, PartialEq, Eq)]
    #[cfg_attr(test, derive(Dummy))]
    pub struct SetCompressionPacket {
        /// Packets at or above this size are sent deflated.
        pub threshold: VarInt,
    }

    impl Packet for SetCompressionPacket {
        const ID: VarInt = 0x03;
    }

    impl ReadPacket for SetCompressionPacket {
        async fn read_from_buffer<S>(buffer: &mut S) -> Result<Self, Error>
        where
            S: AsyncRead + Unpin + Send + Sync,
        {
            let threshold = buffer.read_varint().await?;

            Ok(Self { threshold })
        }
    }

    impl WritePacket for SetCompressionPacket {
        async fn write_to_buffer<S>(&self, buffer: &mut S) -> Result<(), Error>
        where
            S: AsyncWrite + Unpin + Send + Sync,
        {
            buffer.write_varint(self.threshold).await?;

            Ok(())
        }
    }
}

pub mod serverbound {
    use super::*;

    /// The serverbound [`LoginStartPacket`].
    ///
    /// [Minecraft Docs](https://minecraft.wiki/w/Java_Edition_protocol#Login_Start)
    #[derive(Debug, Clone, PartialEq, Eq)]
    #[cfg_attr(test, derive(Dummy))]
    pub struct LoginStartPacket {
        /// The name the player wants to log in with.
        pub user_name: String,
    }

    impl Packet for LoginStartPacket {
        const ID: VarInt = 0x00;
    }

    impl WritePacket for LoginStartPacket {
        async fn write_to_buffer<S>(&self, buffer: &mut S) -> Result<(), Error>
        where
            S: AsyncWrite + Unpin + Send + Sync,
        {
            buffer.write_string(&self.user_name).await?;

            Ok(())
        }
    }

    impl ReadPacket for LoginStartPacket {
        async fn read_from_buffer<S>(buffer: &mut S) -> Result<Self, Error>
        where
            S: AsyncRead + Unpin + Send + Sync,
        {
            let user_name = buffer.read_string().await?;

            Ok(Self { user_name })
        }
    }

    /// The serverbound [`EncryptionResponsePacket`].
    ///
    /// [Minecraft Docs](https://minecraft.wiki/w/Java_Edition_protocol#Encryption_Response)
    #[derive(Debug, Clone, PartialEq, Eq)]
    #[cfg_attr(test, derive(Dummy))]
    pub struct EncryptionResponsePacket {
        /// The shared AES secret, RSA-encrypted with the server's public key.
        pub shared_secret: Vec<u8>,
        /// The echoed verify token, RSA-encrypted with the server's public key.
        pub verify_token: Vec<u8>,
    }

    impl Packet for EncryptionResponsePacket {
        const ID: VarInt = 0x01;
    }

    impl WritePacket for EncryptionResponsePacket {
        async fn write_to_buffer<S>(&self, buffer: &mut S) -> Result<(), Error>
        where
            S: AsyncWrite + Unpin + Send + Sync,
        {
            buffer.write_bytes(&self.shared_secret).await?;
            buffer.write_bytes(&self.verify_token).await?;

            Ok(())
        }
    }

    impl ReadPacket for EncryptionResponsePacket {
        async fn read_from_buffer<S>(buffer: &mut S) -> Result<Self, Error>
        where
            S: AsyncRead + Unpin + Send + Sync,
        {
            let shared_secret = buffer.read_bytes().await?;
            let verify_token = buffer.read_bytes().await?;

            Ok(Self {
                shared_secret,
                verify_token,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::assert_packet;
    use std::io::Cursor;

    #[tokio::test]
    async fn write_read_clientbound_disconnect_packet() {
        assert_packet::<clientbound::DisconnectPacket>(0x00).await;
    }

    #[tokio::test]
    async fn write_read_clientbound_encryption_request_packet() {
        assert_packet::<clientbound::EncryptionRequestPacket>(0x01).await;
    }

    #[tokio::test]
    async fn write_read_clientbound_set_compression_packet() {
        assert_packet::<clientbound::SetCompressionPacket>(0x03).await;
    }

    #[tokio::test]
    async fn write_read_serverbound_login_start_packet() {
        assert_packet::<serverbound::LoginStartPacket>(0x00).await;
    }

    #[tokio::test]
    async fn write_read_serverbound_encryption_response_packet() {
        assert_packet::<serverbound::EncryptionResponsePacket>(0x01).await;
    }

    #[tokio::test]
    async fn login_success_uuid_encoding_is_versioned() {
        let packet = clientbound::LoginSuccessPacket {
            user_id: Uuid::from_u128(0x1234_5678_9ABC_DEF0_1234_5678_9ABC_DEF0),
            user_name: "Recorder".to_string(),
        };

        // modern servers send the raw 16 bytes
        let mut modern: Cursor<Vec<u8>> = Cursor::new(Vec::new());
        packet.write_versioned(&mut modern, 754).await.expect("write failed");
        let mut reader = Cursor::new(modern.into_inner());
        let decoded = clientbound::LoginSuccessPacket::read_versioned(&mut reader, 754)
            .await
            .expect("read failed");
        assert_eq!(decoded, packet);

        // legacy servers send a dashed string
        let mut legacy: Cursor<Vec<u8>> = Cursor::new(Vec::new());
        packet.write_versioned(&mut legacy, 340).await.expect("write failed");
        let inner = legacy.into_inner();
        assert_eq!(inner[0], 36, "legacy uuid should be a 36 char string");
        let mut reader = Cursor::new(inner);
        let decoded = clientbound::LoginSuccessPacket::read_versioned(&mut reader, 340)
            .await
            .expect("read failed");
        assert_eq!(decoded, packet);
    }
}
