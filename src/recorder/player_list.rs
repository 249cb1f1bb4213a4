//! The mirrored server player list, fed by player-list-item packets.
//!
//! The recorder needs game modes to exempt spectators from the AFK detector and keeps the full
//! entries so the replay metadata reflects everyone that appeared.

use chronicle_packets::VarInt;
use chronicle_packets::play::{PlayerListAction, PlayerListItemPacket, PlayerProperty};
use std::collections::HashMap;
use tracing::warn;
use uuid::Uuid;

pub const GAME_MODE_SPECTATOR: VarInt = 3;

/// One mirrored player entry.
#[derive(Debug, Clone)]
pub struct PlayerInfo {
    pub name: String,
    pub properties: Vec<PlayerProperty>,
    pub game_mode: VarInt,
    pub ping: VarInt,
    pub display_name: Option<String>,
}

impl PlayerInfo {
    pub fn is_spectator(&self) -> bool {
        self.game_mode == GAME_MODE_SPECTATOR
    }
}

/// The mirrored player list, keyed by profile id.
#[derive(Debug, Default)]
pub struct PlayerList {
    players: HashMap<Uuid, PlayerInfo>,
}

impl PlayerList {
    pub fn reset(&mut self) {
        self.players.clear();
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn game_mode(&self, uuid: &Uuid) -> Option<VarInt> {
        self.players.get(uuid).map(|info| info.game_mode)
    }

    pub fn is_spectator(&self, uuid: &Uuid) -> bool {
        self.players
            .get(uuid)
            .is_some_and(PlayerInfo::is_spectator)
    }

    pub fn get(&self, uuid: &Uuid) -> Option<&PlayerInfo> {
        self.players.get(uuid)
    }

    /// Applies all actions of one player-list-item packet.
    pub fn on_packet(&mut self, packet: &PlayerListItemPacket) {
        for action in &packet.actions {
            match action {
                PlayerListAction::Add {
                    uuid,
                    name,
                    properties,
                    game_mode,
                    ping,
                    display_name,
                } => {
                    self.players.insert(
                        *uuid,
                        PlayerInfo {
                            name: name.clone(),
                            properties: properties.clone(),
                            game_mode: *game_mode,
                            ping: *ping,
                            display_name: display_name.clone(),
                        },
                    );
                }
                PlayerListAction::UpdateGameMode { uuid, game_mode } => {
                    match self.players.get_mut(uuid) {
                        Some(info) => info.game_mode = *game_mode,
                        None => warn!(uuid = %uuid, "game mode update for unknown player"),
                    }
                }
                PlayerListAction::UpdateLatency { uuid, ping } => {
                    match self.players.get_mut(uuid) {
                        Some(info) => info.ping = *ping,
                        None => warn!(uuid = %uuid, "latency update for unknown player"),
                    }
                }
                PlayerListAction::UpdateDisplayName { uuid, display_name } => {
                    match self.players.get_mut(uuid) {
                        Some(info) => info.display_name = display_name.clone(),
                        None => warn!(uuid = %uuid, "display name update for unknown player"),
                    }
                }
                PlayerListAction::Remove { uuid } => {
                    self.players.remove(uuid);
                }
            }
        }
    }
}
