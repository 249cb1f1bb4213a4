//! The stateful filter and rewrite chain applied to every inbound play packet.
//!
//! Inspectors run in a fixed order; each can veto recording or request a body rewrite. The
//! processor also maintains the entity bookkeeping those decisions depend on: which entity ids
//! belong to players (for the AFK detector) and which were spawned as suppressed mobs (whose
//! packets are dropped until the entity is destroyed).

use crate::config::Config;
use crate::recorder::player_list::PlayerList;
use crate::recorder::replay::Position;
use chronicle_packets::frame::PacketFrame;
use chronicle_packets::play::{
    ChangeGameStatePacket, DestroyEntitiesPacket, PlayerListItemPacket,
    PlayerPositionAndLookPacket, SpawnEntityPacket, SpawnPlayerPacket, TimeUpdatePacket,
    read_leading_entity_id,
};
use chronicle_packets::registry::{Clientbound, MobTypeIds, PacketTable};
use chronicle_packets::{AsyncWritePacket, VarInt};
use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use tracing::debug;
use uuid::Uuid;

/// Packets the replay viewer ignores; recording them only bloats the file.
const BAD_PACKETS: &[Clientbound] = &[
    Clientbound::UnlockRecipes,
    Clientbound::Advancements,
    Clientbound::SelectAdvancementTab,
    Clientbound::UpdateHealth,
    Clientbound::OpenWindow,
    Clientbound::CloseWindow,
    Clientbound::SetSlot,
    Clientbound::WindowItems,
    Clientbound::OpenSignEditor,
    Clientbound::Statistics,
    Clientbound::SetExperience,
    Clientbound::Camera,
    Clientbound::PlayerAbilities,
    Clientbound::Title,
    Clientbound::SculkVibrationSignal,
    Clientbound::Disconnect,
];

/// Packets a viewer can live without; dropped when `minimal_packets` shrinks timelapses.
const USELESS_PACKETS: &[Clientbound] = &[
    Clientbound::KeepAlive,
    Clientbound::Statistics,
    Clientbound::ServerDifficulty,
    Clientbound::TabComplete,
    Clientbound::ConfirmTransaction,
    Clientbound::WindowProperty,
    Clientbound::SetCooldown,
    Clientbound::NamedSoundEffect,
    Clientbound::MapData,
    Clientbound::ResourcePackSend,
    Clientbound::DisplayScoreboard,
    Clientbound::ScoreboardObjective,
    Clientbound::Teams,
    Clientbound::UpdateScore,
    Clientbound::SoundEffect,
];

/// What one processed packet asks the recorder to do.
#[derive(Debug, Default)]
pub struct ProcessOutcome {
    /// Whether the packet may be recorded at all.
    pub keep: bool,
    /// A replacement for the raw frame bytes, when an inspector edited a field.
    pub rewritten: Option<Vec<u8>>,
    /// Whether real player movement was observed.
    pub refreshed_movement: bool,
    /// The bot's own position, when the server teleported it.
    pub self_position: Option<Position>,
    /// A player uuid observed through a spawn, for the metadata player list.
    pub spawned_player: Option<Uuid>,
}

/// The inspector chain state for one recording session.
#[derive(Debug, Default)]
pub struct PacketProcessor {
    blocked_entity_ids: HashSet<VarInt>,
    entity_id_to_player_uuid: HashMap<VarInt, Uuid>,
    recorded_time_packet: bool,
    pub player_list: PlayerList,
}

impl PacketProcessor {
    pub fn reset(&mut self) {
        self.blocked_entity_ids.clear();
        self.entity_id_to_player_uuid.clear();
        self.recorded_time_packet = false;
        self.player_list.reset();
    }

    pub fn blocked_entity_ids(&self) -> &HashSet<VarInt> {
        &self.blocked_entity_ids
    }

    pub fn tracked_player_ids(&self) -> &HashMap<VarInt, Uuid> {
        &self.entity_id_to_player_uuid
    }

    /// Runs the inspector chain over one inbound frame.
    pub async fn process(
        &mut self,
        frame: &PacketFrame,
        table: &PacketTable,
        config: &Config,
    ) -> Result<ProcessOutcome, chronicle_packets::Error> {
        let mut outcome = ProcessOutcome {
            keep: true,
            ..ProcessOutcome::default()
        };

        let Some(name) = table.name_of(frame.id) else {
            // unknown packets are recorded untouched
            return Ok(outcome);
        };
        let protocol = table.protocol();

        // drop what the viewer ignores, and more when a minimal recording is wanted
        if BAD_PACKETS.contains(&name)
            || (config.minimal_packets && USELESS_PACKETS.contains(&name))
        {
            outcome.keep = false;
        }

        let mut body = Cursor::new(frame.body.as_slice());
        match name {
            Clientbound::PlayerPositionAndLook => {
                let packet = PlayerPositionAndLookPacket::read(&mut body, protocol).await?;
                outcome.self_position = Some(Position {
                    x: packet.x,
                    y: packet.y,
                    z: packet.z,
                    yaw: packet.yaw,
                    pitch: packet.pitch,
                });
            }
            Clientbound::TimeUpdate => {
                if self.recorded_time_packet {
                    outcome.keep = false;
                } else if config.freezes_daytime() {
                    let packet = TimeUpdatePacket::read(&mut body).await?;
                    debug!(daytime = config.daytime, "freezing recorded world time");
                    // a negative value stops the client sun at the absolute time
                    let rewritten = TimeUpdatePacket {
                        world_age: packet.world_age,
                        time_of_day: -config.daytime,
                    };
                    let mut raw = Vec::with_capacity(frame.raw.len());
                    raw.write_varint(frame.id).await?;
                    rewritten.write(&mut raw).await?;
                    outcome.rewritten = Some(raw);
                    self.recorded_time_packet = true;
                }
            }
            Clientbound::ChangeGameState => {
                if !config.weather {
                    let packet = ChangeGameStatePacket::read(&mut body).await?;
                    if matches!(packet.reason, 1 | 2 | 7 | 8) {
                        outcome.keep = false;
                    }
                }
            }
            Clientbound::SpawnPlayer => {
                let packet = SpawnPlayerPacket::read(&mut body).await?;
                self.entity_id_to_player_uuid
                    .entry(packet.entity_id)
                    .or_insert(packet.player_uuid);
                debug!(entity_id = packet.entity_id, uuid = %packet.player_uuid, "player spawned");
                outcome.spawned_player = Some(packet.player_uuid);
                outcome.refreshed_movement = true;
            }
            Clientbound::SpawnObject | Clientbound::SpawnLivingEntity => {
                let packet = if name == Clientbound::SpawnObject {
                    SpawnEntityPacket::read_object(&mut body, protocol).await?
                } else {
                    SpawnEntityPacket::read_living(&mut body).await?
                };
                if self.should_block(packet.type_id, protocol, config) {
                    debug!(
                        entity_id = packet.entity_id,
                        type_id = packet.type_id,
                        "suppressed entity spawned, blocking its id"
                    );
                    self.blocked_entity_ids.insert(packet.entity_id);
                    outcome.keep = false;
                }
            }
            Clientbound::DestroyEntities => {
                let packet = DestroyEntitiesPacket::read(&mut body).await?;
                for entity_id in packet.entity_ids {
                    self.blocked_entity_ids.remove(&entity_id);
                    self.entity_id_to_player_uuid.remove(&entity_id);
                }
            }
            Clientbound::Respawn => {
                debug!("respawn or dimension change, re-arming the time freeze");
                self.recorded_time_packet = false;
            }
            Clientbound::PlayerListItem => {
                let packet = PlayerListItemPacket::read(&mut body).await?;
                self.player_list.on_packet(&packet);
            }
            name if name.has_leading_entity_id() => {
                let entity_id = read_leading_entity_id(&mut body).await?;
                if let Some(uuid) = self.entity_id_to_player_uuid.get(&entity_id) {
                    if config.afk_ignore_spectator && self.player_list.is_spectator(uuid) {
                        debug!(entity_id, "spectator movement ignored");
                    } else {
                        outcome.refreshed_movement = true;
                    }
                }
                if self.blocked_entity_ids.contains(&entity_id) {
                    outcome.keep = false;
                }
            }
            _ => {}
        }

        Ok(outcome)
    }

    fn should_block(&self, type_id: VarInt, protocol: i32, config: &Config) -> bool {
        (config.remove_items && MobTypeIds::item(protocol) == Some(type_id))
            || (config.remove_bats && MobTypeIds::bat(protocol) == Some(type_id))
            || (config.remove_phantoms && MobTypeIds::phantom(protocol) == Some(type_id))
    }
}

/// Whether a packet must be recorded even while AFK so the replay metadata stays accurate.
pub fn is_important(name: Option<Clientbound>) -> bool {
    name == Some(Clientbound::PlayerListItem)
}
