//! Play-state packet bodies.
//!
//! Unlike the handshake and login states, play packets have version-dependent ids, so these types
//! carry no id constant. The connection resolves ids through [`crate::registry`] and only the
//! packets the recorder inspects are decoded here; everything else stays an anonymous frame. The
//! readers only consume the leading fields they need and leave the remainder of the body untouched.

use crate::{AsyncReadPacket, AsyncWritePacket, Error, VarInt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

/// The clientbound world time packet.
///
/// A negative `time_of_day` freezes the client sun at the absolute value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeUpdatePacket {
    pub world_age: i64,
    pub time_of_day: i64,
}

impl TimeUpdatePacket {
    pub async fn read<S>(buffer: &mut S) -> Result<Self, Error>
    where
        S: AsyncRead + Unpin + Send + Sync,
    {
        let world_age = buffer.read_i64().await?;
        let time_of_day = buffer.read_i64().await?;

        Ok(Self {
            world_age,
            time_of_day,
        })
    }

    pub async fn write<S>(&self, buffer: &mut S) -> Result<(), Error>
    where
        S: AsyncWrite + Unpin + Send + Sync,
    {
        buffer.write_i64(self.world_age).await?;
        buffer.write_i64(self.time_of_day).await?;

        Ok(())
    }
}

/// The leading fields of the clientbound spawn-player packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnPlayerPacket {
    pub entity_id: VarInt,
    pub player_uuid: Uuid,
}

impl SpawnPlayerPacket {
    pub async fn read<S>(buffer: &mut S) -> Result<Self, Error>
    where
        S: AsyncRead + Unpin + Send + Sync,
    {
        let entity_id = buffer.read_varint().await?;
        let player_uuid = buffer.read_uuid().await?;

        Ok(Self {
            entity_id,
            player_uuid,
        })
    }

    pub async fn write<S>(&self, buffer: &mut S) -> Result<(), Error>
    where
        S: AsyncWrite + Unpin + Send + Sync,
    {
        buffer.write_varint(self.entity_id).await?;
        buffer.write_uuid(&self.player_uuid).await?;

        Ok(())
    }
}

/// The leading fields shared by the spawn-object and spawn-living-entity packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnEntityPacket {
    pub entity_id: VarInt,
    pub entity_uuid: Uuid,
    pub type_id: VarInt,
}

impl SpawnEntityPacket {
    /// Reads a spawn-object prefix. The type field narrowed to a single byte before 1.14.
    pub async fn read_object<S>(buffer: &mut S, protocol: i32) -> Result<Self, Error>
    where
        S: AsyncRead + Unpin + Send + Sync,
    {
        let entity_id = buffer.read_varint().await?;
        let entity_uuid = buffer.read_uuid().await?;
        let type_id = if protocol >= 498 {
            buffer.read_varint().await?
        } else {
            VarInt::from(buffer.read_u8().await?)
        };

        Ok(Self {
            entity_id,
            entity_uuid,
            type_id,
        })
    }

    /// Reads a spawn-living-entity prefix. The type field is a varint on every supported version.
    pub async fn read_living<S>(buffer: &mut S) -> Result<Self, Error>
    where
        S: AsyncRead + Unpin + Send + Sync,
    {
        let entity_id = buffer.read_varint().await?;
        let entity_uuid = buffer.read_uuid().await?;
        let type_id = buffer.read_varint().await?;

        Ok(Self {
            entity_id,
            entity_uuid,
            type_id,
        })
    }
}

/// The clientbound destroy-entities packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestroyEntitiesPacket {
    pub entity_ids: Vec<VarInt>,
}

impl DestroyEntitiesPacket {
    pub async fn read<S>(buffer: &mut S) -> Result<Self, Error>
    where
        S: AsyncRead + Unpin + Send + Sync,
    {
        let count = buffer.read_varint().await?;
        let mut entity_ids = Vec::with_capacity(count.max(0) as usize);
        for _ in 0..count {
            entity_ids.push(buffer.read_varint().await?);
        }

        Ok(Self { entity_ids })
    }

    pub async fn write<S>(&self, buffer: &mut S) -> Result<(), Error>
    where
        S: AsyncWrite + Unpin + Send + Sync,
    {
        buffer.write_varint(self.entity_ids.len() as VarInt).await?;
        for entity_id in &self.entity_ids {
            buffer.write_varint(*entity_id).await?;
        }

        Ok(())
    }
}

/// The clientbound change-game-state packet. Reasons 1/2/7/8 are the weather transitions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChangeGameStatePacket {
    pub reason: u8,
    pub value: f32,
}

impl ChangeGameStatePacket {
    pub async fn read<S>(buffer: &mut S) -> Result<Self, Error>
    where
        S: AsyncRead + Unpin + Send + Sync,
    {
        let reason = buffer.read_u8().await?;
        let value = f32::from_bits(buffer.read_u32().await?);

        Ok(Self { reason, value })
    }

    pub async fn write<S>(&self, buffer: &mut S) -> Result<(), Error>
    where
        S: AsyncWrite + Unpin + Send + Sync,
    {
        buffer.write_u8(self.reason).await?;
        buffer.write_u32(self.value.to_bits()).await?;

        Ok(())
    }
}

/// The clientbound player-position-and-look packet.
///
/// Carries the teleport id the client must confirm. 1.17 onwards appends a dismount flag.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerPositionAndLookPacket {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub yaw: f32,
    pub pitch: f32,
    pub flags: u8,
    pub teleport_id: VarInt,
}

impl PlayerPositionAndLookPacket {
    pub async fn read<S>(buffer: &mut S, protocol: i32) -> Result<Self, Error>
    where
        S: AsyncRead + Unpin + Send + Sync,
    {
        let x = f64::from_bits(buffer.read_u64().await?);
        let y = f64::from_bits(buffer.read_u64().await?);
        let z = f64::from_bits(buffer.read_u64().await?);
        let yaw = f32::from_bits(buffer.read_u32().await?);
        let pitch = f32::from_bits(buffer.read_u32().await?);
        let flags = buffer.read_u8().await?;
        let teleport_id = buffer.read_varint().await?;
        if protocol >= 755 {
            let _dismount = buffer.read_u8().await?;
        }

        Ok(Self {
            x,
            y,
            z,
            yaw,
            pitch,
            flags,
            teleport_id,
        })
    }

    pub async fn write<S>(&self, buffer: &mut S, protocol: i32) -> Result<(), Error>
    where
        S: AsyncWrite + Unpin + Send + Sync,
    {
        buffer.write_u64(self.x.to_bits()).await?;
        buffer.write_u64(self.y.to_bits()).await?;
        buffer.write_u64(self.z.to_bits()).await?;
        buffer.write_u32(self.yaw.to_bits()).await?;
        buffer.write_u32(self.pitch.to_bits()).await?;
        buffer.write_u8(self.flags).await?;
        buffer.write_varint(self.teleport_id).await?;
        if protocol >= 755 {
            buffer.write_u8(0).await?;
        }

        Ok(())
    }
}

/// The clientbound chat message. The sender uuid was added in 1.16.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessagePacket {
    pub json: String,
    pub position: u8,
    pub sender: Option<Uuid>,
}

impl ChatMessagePacket {
    pub async fn read<S>(buffer: &mut S, protocol: i32) -> Result<Self, Error>
    where
        S: AsyncRead + Unpin + Send + Sync,
    {
        let json = buffer.read_string().await?;
        let position = buffer.read_u8().await?;
        let sender = if protocol >= 736 {
            Some(buffer.read_uuid().await?)
        } else {
            None
        };

        Ok(Self {
            json,
            position,
            sender,
        })
    }

    pub async fn write<S>(&self, buffer: &mut S, protocol: i32) -> Result<(), Error>
    where
        S: AsyncWrite + Unpin + Send + Sync,
    {
        buffer.write_string(&self.json).await?;
        buffer.write_u8(self.position).await?;
        if protocol >= 736 {
            buffer.write_uuid(&self.sender.unwrap_or(Uuid::nil())).await?;
        }

        Ok(())
    }
}

/// The keep-alive payload. A varint on 1.12, a long from 1.12.2 onwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAlivePacket {
    pub id: i64,
}

impl KeepAlivePacket {
    pub async fn read<S>(buffer: &mut S, protocol: i32) -> Result<Self, Error>
    where
        S: AsyncRead + Unpin + Send + Sync,
    {
        let id = if crate::registry::keep_alive_is_long(protocol) {
            buffer.read_i64().await?
        } else {
            i64::from(buffer.read_varint().await?)
        };

        Ok(Self { id })
    }

    pub async fn write<S>(&self, buffer: &mut S, protocol: i32) -> Result<(), Error>
    where
        S: AsyncWrite + Unpin + Send + Sync,
    {
        if crate::registry::keep_alive_is_long(protocol) {
            buffer.write_i64(self.id).await?;
        } else {
            buffer.write_varint(self.id as VarInt).await?;
        }

        Ok(())
    }
}

/// A single property of a listed player profile (usually `textures`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerProperty {
    pub name: String,
    pub value: String,
    pub signature: Option<String>,
}

/// One action of the clientbound player-list-item packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerListAction {
    Add {
        uuid: Uuid,
        name: String,
        properties: Vec<PlayerProperty>,
        game_mode: VarInt,
        ping: VarInt,
        display_name: Option<String>,
    },
    UpdateGameMode {
        uuid: Uuid,
        game_mode: VarInt,
    },
    UpdateLatency {
        uuid: Uuid,
        ping: VarInt,
    },
    UpdateDisplayName {
        uuid: Uuid,
        display_name: Option<String>,
    },
    Remove {
        uuid: Uuid,
    },
}

/// The clientbound player-list-item packet. Stable across all supported versions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerListItemPacket {
    pub actions: Vec<PlayerListAction>,
}

impl PlayerListItemPacket {
    pub async fn read<S>(buffer: &mut S) -> Result<Self, Error>
    where
        S: AsyncRead + Unpin + Send + Sync,
    {
        let action_id = buffer.read_varint().await?;
        let count = buffer.read_varint().await?;
        let mut actions = Vec::with_capacity(count.max(0) as usize);

        for _ in 0..count {
            let uuid = buffer.read_uuid().await?;
            let action = match action_id {
                0 => {
                    let name = buffer.read_string().await?;
                    let property_count = buffer.read_varint().await?;
                    let mut properties = Vec::with_capacity(property_count.max(0) as usize);
                    for _ in 0..property_count {
                        let name = buffer.read_string().await?;
                        let value = buffer.read_string().await?;
                        let signature = if buffer.read_bool().await? {
                            Some(buffer.read_string().await?)
                        } else {
                            None
                        };
                        properties.push(PlayerProperty {
                            name,
                            value,
                            signature,
                        });
                    }
                    let game_mode = buffer.read_varint().await?;
                    let ping = buffer.read_varint().await?;
                    let display_name = if buffer.read_bool().await? {
                        Some(buffer.read_string().await?)
                    } else {
                        None
                    };
                    PlayerListAction::Add {
                        uuid,
                        name,
                        properties,
                        game_mode,
                        ping,
                        display_name,
                    }
                }
                1 => PlayerListAction::UpdateGameMode {
                    uuid,
                    game_mode: buffer.read_varint().await?,
                },
                2 => PlayerListAction::UpdateLatency {
                    uuid,
                    ping: buffer.read_varint().await?,
                },
                3 => {
                    let display_name = if buffer.read_bool().await? {
                        Some(buffer.read_string().await?)
                    } else {
                        None
                    };
                    PlayerListAction::UpdateDisplayName { uuid, display_name }
                }
                4 => PlayerListAction::Remove { uuid },
                value => {
                    return Err(Error::IllegalEnumValue {
                        kind: "PlayerListAction",
                        value,
                    });
                }
            };
            actions.push(action);
        }

        Ok(Self { actions })
    }

    pub async fn write<S>(&self, buffer: &mut S) -> Result<(), Error>
    where
        S: AsyncWrite + Unpin + Send + Sync,
    {
        let action_id = match self.actions.first() {
            Some(PlayerListAction::Add { .. }) | None => 0,
            Some(PlayerListAction::UpdateGameMode { .. }) => 1,
            Some(PlayerListAction::UpdateLatency { .. }) => 2,
            Some(PlayerListAction::UpdateDisplayName { .. }) => 3,
            Some(PlayerListAction::Remove { .. }) => 4,
        };
        buffer.write_varint(action_id).await?;
        buffer.write_varint(self.actions.len() as VarInt).await?;

        for action in &self.actions {
            match action {
                PlayerListAction::Add {
                    uuid,
                    name,
                    properties,
                    game_mode,
                    ping,
                    display_name,
                } => {
                    buffer.write_uuid(uuid).await?;
                    buffer.write_string(name).await?;
                    buffer.write_varint(properties.len() as VarInt).await?;
                    for property in properties {
                        buffer.write_string(&property.name).await?;
                        buffer.write_string(&property.value).await?;
                        buffer.write_bool(property.signature.is_some()).await?;
                        if let Some(signature) = &property.signature {
                            buffer.write_string(signature).await?;
                        }
                    }
                    buffer.write_varint(*game_mode).await?;
                    buffer.write_varint(*ping).await?;
                    buffer.write_bool(display_name.is_some()).await?;
                    if let Some(display_name) = display_name {
                        buffer.write_string(display_name).await?;
                    }
                }
                PlayerListAction::UpdateGameMode { uuid, game_mode } => {
                    buffer.write_uuid(uuid).await?;
                    buffer.write_varint(*game_mode).await?;
                }
                PlayerListAction::UpdateLatency { uuid, ping } => {
                    buffer.write_uuid(uuid).await?;
                    buffer.write_varint(*ping).await?;
                }
                PlayerListAction::UpdateDisplayName { uuid, display_name } => {
                    buffer.write_uuid(uuid).await?;
                    buffer.write_bool(display_name.is_some()).await?;
                    if let Some(display_name) = display_name {
                        buffer.write_string(display_name).await?;
                    }
                }
                PlayerListAction::Remove { uuid } => {
                    buffer.write_uuid(uuid).await?;
                }
            }
        }

        Ok(())
    }
}

/// Reads the entity id that leads the body of an entity-keyed packet.
pub async fn read_leading_entity_id<S>(buffer: &mut S) -> Result<VarInt, Error>
where
    S: AsyncRead + Unpin + Send + Sync,
{
    buffer.read_varint().await
}

pub mod serverbound {
    use super::*;

    /// Echo of a clientbound teleport id.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TeleportConfirmPacket {
        pub teleport_id: VarInt,
    }

    impl TeleportConfirmPacket {
        pub async fn write<S>(&self, buffer: &mut S) -> Result<(), Error>
        where
            S: AsyncWrite + Unpin + Send + Sync,
        {
            buffer.write_varint(self.teleport_id).await?;

            Ok(())
        }
    }

    /// An outbound chat line.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct ChatMessagePacket {
        pub message: String,
    }

    impl ChatMessagePacket {
        pub async fn write<S>(&self, buffer: &mut S) -> Result<(), Error>
        where
            S: AsyncWrite + Unpin + Send + Sync,
        {
            buffer.write_string(&self.message).await?;

            Ok(())
        }
    }

    /// The client-status action. Action 0 requests a respawn.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ClientStatusPacket {
        pub action_id: VarInt,
    }

    impl ClientStatusPacket {
        pub const RESPAWN: VarInt = 0;

        pub async fn write<S>(&self, buffer: &mut S) -> Result<(), Error>
        where
            S: AsyncWrite + Unpin + Send + Sync,
        {
            buffer.write_varint(self.action_id).await?;

            Ok(())
        }
    }

    /// The position report that marks the player as spawned after a server teleport.
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub struct PositionAndLookPacket {
        pub x: f64,
        pub feet_y: f64,
        pub z: f64,
        pub yaw: f32,
        pub pitch: f32,
        pub on_ground: bool,
    }

    impl PositionAndLookPacket {
        pub async fn write<S>(&self, buffer: &mut S) -> Result<(), Error>
        where
            S: AsyncWrite + Unpin + Send + Sync,
        {
            buffer.write_u64(self.x.to_bits()).await?;
            buffer.write_u64(self.feet_y.to_bits()).await?;
            buffer.write_u64(self.z.to_bits()).await?;
            buffer.write_u32(self.yaw.to_bits()).await?;
            buffer.write_u32(self.pitch.to_bits()).await?;
            buffer.write_bool(self.on_ground).await?;

            Ok(())
        }
    }

    /// Teleports the bot to the targeted player while in spectator mode.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SpectatePacket {
        pub target: Uuid,
    }

    impl SpectatePacket {
        pub async fn write<S>(&self, buffer: &mut S) -> Result<(), Error>
        where
            S: AsyncWrite + Unpin + Send + Sync,
        {
            buffer.write_uuid(&self.target).await?;

            Ok(())
        }
    }

    /// Echo of a clientbound keep-alive payload.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct KeepAlivePacket {
        pub id: i64,
    }

    impl KeepAlivePacket {
        pub async fn write<S>(&self, buffer: &mut S, protocol: i32) -> Result<(), Error>
        where
            S: AsyncWrite + Unpin + Send + Sync,
        {
            super::KeepAlivePacket { id: self.id }.write(buffer, protocol).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn time_update_roundtrip() {
        let packet = TimeUpdatePacket {
            world_age: 123_456,
            time_of_day: -6000,
        };
        let mut buffer: Cursor<Vec<u8>> = Cursor::new(Vec::new());
        packet.write(&mut buffer).await.expect("write failed");
        assert_eq!(buffer.get_ref().len(), 16);

        let mut reader = Cursor::new(buffer.into_inner());
        let decoded = TimeUpdatePacket::read(&mut reader).await.expect("read failed");
        assert_eq!(decoded, packet);
    }

    #[tokio::test]
    async fn spawn_object_type_field_width_is_versioned() {
        let packet = SpawnEntityPacket {
            entity_id: 301,
            entity_uuid: Uuid::from_u128(7),
            type_id: 35,
        };

        // 1.14+ uses a varint type id
        let mut modern: Cursor<Vec<u8>> = Cursor::new(Vec::new());
        modern.write_varint(packet.entity_id).await.expect("write failed");
        modern.write_uuid(&packet.entity_uuid).await.expect("write failed");
        modern.write_varint(packet.type_id).await.expect("write failed");
        let mut reader = Cursor::new(modern.into_inner());
        let decoded = SpawnEntityPacket::read_object(&mut reader, 754)
            .await
            .expect("read failed");
        assert_eq!(decoded, packet);

        // 1.12 used a single byte
        let legacy_packet = SpawnEntityPacket {
            type_id: 2,
            ..packet
        };
        let mut legacy: Cursor<Vec<u8>> = Cursor::new(Vec::new());
        legacy.write_varint(legacy_packet.entity_id).await.expect("write failed");
        legacy.write_uuid(&legacy_packet.entity_uuid).await.expect("write failed");
        legacy.write_u8(legacy_packet.type_id as u8).await.expect("write failed");
        let mut reader = Cursor::new(legacy.into_inner());
        let decoded = SpawnEntityPacket::read_object(&mut reader, 340)
            .await
            .expect("read failed");
        assert_eq!(decoded, legacy_packet);
    }

    #[tokio::test]
    async fn player_position_and_look_roundtrip_with_dismount() {
        let packet = PlayerPositionAndLookPacket {
            x: 1.5,
            y: 64.0,
            z: -7.25,
            yaw: 90.0,
            pitch: -12.5,
            flags: 0,
            teleport_id: 42,
        };

        for protocol in [754, 756] {
            let mut buffer: Cursor<Vec<u8>> = Cursor::new(Vec::new());
            packet.write(&mut buffer, protocol).await.expect("write failed");
            let mut reader = Cursor::new(buffer.into_inner());
            let decoded = PlayerPositionAndLookPacket::read(&mut reader, protocol)
                .await
                .expect("read failed");
            assert_eq!(decoded, packet, "protocol {protocol}");
            assert_eq!(
                reader.position() as usize,
                reader.get_ref().len(),
                "unread bytes for protocol {protocol}"
            );
        }
    }

    #[tokio::test]
    async fn keep_alive_payload_width_is_versioned() {
        let packet = KeepAlivePacket { id: 77 };

        let mut legacy: Cursor<Vec<u8>> = Cursor::new(Vec::new());
        packet.write(&mut legacy, 335).await.expect("write failed");
        assert_eq!(legacy.get_ref().len(), 1, "1.12 keep-alive is a varint");

        let mut modern: Cursor<Vec<u8>> = Cursor::new(Vec::new());
        packet.write(&mut modern, 754).await.expect("write failed");
        assert_eq!(modern.get_ref().len(), 8, "modern keep-alive is a long");

        let mut reader = Cursor::new(modern.into_inner());
        let decoded = KeepAlivePacket::read(&mut reader, 754).await.expect("read failed");
        assert_eq!(decoded, packet);
    }

    #[tokio::test]
    async fn player_list_item_roundtrip() {
        let packet = PlayerListItemPacket {
            actions: vec![PlayerListAction::Add {
                uuid: Uuid::from_u128(11),
                name: "Steve".to_string(),
                properties: vec![PlayerProperty {
                    name: "textures".to_string(),
                    value: "data".to_string(),
                    signature: Some("sig".to_string()),
                }],
                game_mode: 3,
                ping: 20,
                display_name: None,
            }],
        };

        let mut buffer: Cursor<Vec<u8>> = Cursor::new(Vec::new());
        packet.write(&mut buffer).await.expect("write failed");
        let mut reader = Cursor::new(buffer.into_inner());
        let decoded = PlayerListItemPacket::read(&mut reader).await.expect("read failed");
        assert_eq!(decoded, packet);
    }

    #[tokio::test]
    async fn player_list_item_remove_roundtrip() {
        let packet = PlayerListItemPacket {
            actions: vec![
                PlayerListAction::Remove {
                    uuid: Uuid::from_u128(1),
                },
                PlayerListAction::Remove {
                    uuid: Uuid::from_u128(2),
                },
            ],
        };

        let mut buffer: Cursor<Vec<u8>> = Cursor::new(Vec::new());
        packet.write(&mut buffer).await.expect("write failed");
        let mut reader = Cursor::new(buffer.into_inner());
        let decoded = PlayerListItemPacket::read(&mut reader).await.expect("read failed");
        assert_eq!(decoded, packet);
    }

    #[tokio::test]
    async fn chat_message_sender_is_versioned() {
        let packet = ChatMessagePacket {
            json: r#"{"text":"hi"}"#.to_string(),
            position: 0,
            sender: Some(Uuid::from_u128(3)),
        };

        let mut modern: Cursor<Vec<u8>> = Cursor::new(Vec::new());
        packet.write(&mut modern, 754).await.expect("write failed");
        let mut reader = Cursor::new(modern.into_inner());
        let decoded = ChatMessagePacket::read(&mut reader, 754).await.expect("read failed");
        assert_eq!(decoded, packet);

        let mut legacy: Cursor<Vec<u8>> = Cursor::new(Vec::new());
        packet.write(&mut legacy, 340).await.expect("write failed");
        let mut reader = Cursor::new(legacy.into_inner());
        let decoded = ChatMessagePacket::read(&mut reader, 340).await.expect("read failed");
        assert_eq!(decoded.sender, None);
    }
}
