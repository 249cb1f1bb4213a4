//! The config module defines the application configuration. It is based on [config], a layered
//! configuration system for Rust applications (with strong support for 12-factor applications).
//!
//! # Layers
//!
//! The configuration consists of multiple layers. Upper layers overwrite lower layer configurations
//! (e.g. environment variables overwrite the file configuration).
//!
//! ## Layer 1 (Environment variables) \[optional\]
//!
//! Environment variables have the format `CHRONICLE_[field]`, so `CHRONICLE_DAYTIME=6000` freezes
//! the recorded world time regardless of the file contents.
//!
//! ## Layer 2 (Configuration file)
//!
//! A JSON file whose location is configured through the `CONFIG_FILE` environment variable,
//! defaulting to `config.json`. On the very first run the file is generated from the defaults and
//! the process exits so the operator can fill in the account before going live.
//!
//! ## Layer 3 (Default configuration)
//!
//! The default configuration provides default values for all config fields. It is defined on the
//! struct itself.

use config::{ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;

use crate::command::CommandError;

/// The options that may be changed at runtime through the in-game `set` command.
pub const SETTABLE_OPTIONS: &[&str] = &[
    "language",
    "server_name",
    "daytime",
    "weather",
    "with_player_only",
    "remove_items",
    "remove_bats",
    "remove_phantoms",
    "file_size_limit_mb",
    "time_recorded_limit_hour",
];

/// The account variants the bot can authenticate with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    Offline,
    Mojang,
    Microsoft,
}

/// [`Config`] holds all configuration for the application. One shared instance is created on
/// startup; the controller is the only writer afterwards, everything else reads snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// The language of chat and status texts.
    pub language: String,

    /// Whether the target server verifies sessions against the session server.
    pub online_mode: bool,

    /// The account variant used to authenticate.
    pub authenticate_type: AuthType,

    /// The login name (offline mode) or account name (mojang).
    pub username: String,

    /// The account password (mojang only).
    pub password: String,

    /// Whether refreshed tokens should be persisted to disk.
    pub store_token: bool,

    /// The hostname of the server to record.
    pub address: String,

    /// The port of the server to record.
    pub port: u16,

    /// The server name written into the replay metadata.
    pub server_name: String,

    /// The version label used for the handshake, e.g. `1.16.5`.
    pub initial_version: String,

    /// The TCP connect timeout in seconds.
    pub connect_timeout_second: u64,

    /// Recording rolls over once the raw packet file exceeds this many MiB.
    pub file_size_limit_mb: u64,

    /// The in-memory write buffer is flushed past this many MiB.
    pub file_buffer_size_mb: u64,

    /// Recording rolls over once this many hours of non-AFK time were captured.
    pub time_recorded_limit_hour: u64,

    /// Seconds without player movement before the bot counts as AFK.
    pub delay_before_afk_second: u64,

    /// Whether recording pauses while no player is moving nearby.
    pub with_player_only: bool,

    /// Whether packets are still recorded while AFK.
    pub record_packets_when_afk: bool,

    /// Whether spectators are ignored by the AFK movement detector.
    pub afk_ignore_spectator: bool,

    /// Whether the extended drop list is applied to shrink the recording.
    pub minimal_packets: bool,

    /// Freeze the recorded world time to this value; out of [0, 24000) leaves time untouched.
    pub daytime: i64,

    /// Whether weather transitions are recorded.
    pub weather: bool,

    /// Whether dropped item entities are stripped from the recording.
    pub remove_items: bool,

    /// Whether bats are stripped from the recording.
    pub remove_bats: bool,

    /// Whether phantoms are stripped from the recording.
    pub remove_phantoms: bool,

    /// Whether the bot reconnects after an unexpected disconnect.
    pub auto_relogin: bool,

    /// Maximum relogin attempts; negative means unlimited.
    pub auto_relogin_attempts: i32,

    /// Whether outbound chat is throttled below the vanilla spam kick threshold.
    pub chat_spam_protect: bool,

    /// The prefix of in-game commands addressed to the bot.
    pub command_prefix: String,

    /// Chat lines sent once after joining the game.
    pub on_joined_commands: Vec<String>,

    /// Whether the in-game command whitelist is enforced.
    pub enabled: bool,

    /// The player names allowed to issue in-game commands.
    pub whitelist: Vec<String>,

    /// The working directory of the recording currently being captured.
    pub recording_temp_directory: String,

    /// The directory finished replay archives are moved into.
    pub recording_storage_directory: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            language: "en_us".to_string(),
            online_mode: true,
            authenticate_type: AuthType::Offline,
            username: "Recorder".to_string(),
            password: String::new(),
            store_token: true,
            address: "localhost".to_string(),
            port: 25565,
            server_name: "SECRET SERVER".to_string(),
            initial_version: "1.16.5".to_string(),
            connect_timeout_second: 10,
            file_size_limit_mb: 2048,
            file_buffer_size_mb: 8,
            time_recorded_limit_hour: 12,
            delay_before_afk_second: 15,
            with_player_only: false,
            record_packets_when_afk: true,
            afk_ignore_spectator: true,
            minimal_packets: false,
            daytime: -1,
            weather: true,
            remove_items: false,
            remove_bats: true,
            remove_phantoms: true,
            auto_relogin: true,
            auto_relogin_attempts: 5,
            chat_spam_protect: true,
            command_prefix: "!!PCRC".to_string(),
            on_joined_commands: Vec::new(),
            enabled: false,
            whitelist: Vec::new(),
            recording_temp_directory: "temp_recording".to_string(),
            recording_storage_directory: "recordings".to_string(),
        }
    }
}

impl Config {
    /// Creates a new application configuration as described in the [module documentation](crate::config).
    pub fn read(path: &str) -> Result<Self, ConfigError> {
        // the environment prefix for all `Config` fields
        let env_prefix = env::var("ENV_PREFIX").unwrap_or("chronicle".into());

        let s = config::Config::builder()
            .add_source(File::new(path, FileFormat::Json).required(false))
            .add_source(Environment::with_prefix(&env_prefix))
            .build()?;

        s.try_deserialize()
    }

    /// Writes the default configuration so a first-time operator has something to edit.
    pub fn write_default(path: &str) -> std::io::Result<()> {
        let rendered = serde_json::to_string_pretty(&Config::default())
            .expect("default config must serialize");
        std::fs::write(path, rendered)
    }

    pub fn exists(path: &str) -> bool {
        Path::new(path).exists()
    }

    /// Applies one `set` command value, parsing it into the option's native type.
    ///
    /// Only options listed in [`SETTABLE_OPTIONS`] may be changed this way.
    pub fn set_option(&mut self, option: &str, value: &str) -> Result<(), CommandError> {
        if !SETTABLE_OPTIONS.contains(&option) {
            return Err(CommandError::IllegalOption(option.to_string()));
        }

        fn parse_bool(value: &str) -> Result<bool, CommandError> {
            match value {
                "true" | "True" | "TRUE" | "1" => Ok(true),
                "false" | "False" | "FALSE" | "0" => Ok(false),
                _ => Err(CommandError::WrongArguments),
            }
        }

        match option {
            "language" => self.language = value.to_string(),
            "server_name" => self.server_name = value.to_string(),
            "daytime" => self.daytime = value.parse().map_err(|_| CommandError::WrongArguments)?,
            "weather" => self.weather = parse_bool(value)?,
            "with_player_only" => self.with_player_only = parse_bool(value)?,
            "remove_items" => self.remove_items = parse_bool(value)?,
            "remove_bats" => self.remove_bats = parse_bool(value)?,
            "remove_phantoms" => self.remove_phantoms = parse_bool(value)?,
            "file_size_limit_mb" => {
                self.file_size_limit_mb = value.parse().map_err(|_| CommandError::WrongArguments)?;
            }
            "time_recorded_limit_hour" => {
                self.time_recorded_limit_hour =
                    value.parse().map_err(|_| CommandError::WrongArguments)?;
            }
            _ => return Err(CommandError::IllegalOption(option.to_string())),
        }

        Ok(())
    }

    /// Whether the configured daytime should be frozen into the recording.
    pub fn freezes_daytime(&self) -> bool {
        (0..24000).contains(&self.daytime)
    }
}
