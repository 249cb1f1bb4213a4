//! The recording controller: packet admission, AFK accounting, frame framing and rollover.
//!
//! A session exists from play-state entry until its archive lands on disk. Frames are stamped
//! with the recorded time `(now - start_time) - afk_duration`, so AFK gaps are cut out of the
//! replay timeline while the on-wire order of frames is preserved exactly.

pub mod player_list;
pub mod processor;
pub mod replay;

use crate::chat::{ChatDispatcher, ChatPriority};
use crate::config::Config;
use crate::messages::Messages;
use crate::recorder::processor::{PacketProcessor, is_important};
use crate::recorder::replay::{
    BYTES_PER_MB, MetaDataInput, Position, ReplayError, ReplayRecording,
};
use chronicle_packets::frame::PacketFrame;
use chronicle_packets::registry::{PacketTable, ProtocolVersion};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use tracing::{debug, info};

const MILLIS_PER_HOUR: i64 = 60 * 60 * 1000;
const SHOWINFO_INTERVAL_MS: i64 = 5 * 60 * 1000;
const SHOWINFO_PACKET_INTERVAL: u64 = 100_000;

/// The internal error type for all errors related to recording.
#[derive(thiserror::Error, Debug)]
pub enum RecorderError {
    /// A packet body could not be decoded while inspecting it.
    #[error("packet inspection failed: {0}")]
    Codec(#[from] chronicle_packets::Error),

    /// The on-disk recording could not be written.
    #[error(transparent)]
    Replay(#[from] ReplayError),
}

/// The recording lifecycle. Independent from the connection state; saving may outlive the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    Stopped,
    Recording,
    Saving,
}

/// Why the recorder wants the session restarted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rollover {
    FileSize,
    TimeLimit,
}

/// Everything that lives exactly as long as one recording.
#[derive(Debug)]
pub struct Session {
    start_time: i64,
    last_player_movement: i64,
    afk_duration: i64,
    last_packet_time: i64,
    last_afk_flag: Option<bool>,
    player_uuids: Vec<uuid::Uuid>,
    file_buffer: Vec<u8>,
    packet_counter: u64,
    last_showinfo_time: i64,
    last_showinfo_counter: u64,
    file_name: Option<String>,
    pos: Option<Position>,
    replay: ReplayRecording,
    processor: PacketProcessor,
    mc_version: String,
    protocol: i32,
    file_format_version: u32,
}

impl Session {
    fn new(version: &ProtocolVersion, config: &Config, now_ms: i64) -> Result<Self, ReplayError> {
        let replay = ReplayRecording::create(PathBuf::from(&config.recording_temp_directory).as_path())?;
        Ok(Self {
            start_time: now_ms,
            last_player_movement: now_ms,
            afk_duration: 0,
            last_packet_time: now_ms,
            last_afk_flag: None,
            player_uuids: Vec::new(),
            file_buffer: Vec::new(),
            packet_counter: 0,
            last_showinfo_time: 0,
            last_showinfo_counter: 0,
            file_name: None,
            pos: None,
            replay,
            processor: PacketProcessor::default(),
            mc_version: version.name.to_string(),
            protocol: version.protocol,
            file_format_version: version.file_format_version,
        })
    }

    fn time_passed(&self, now_ms: i64) -> i64 {
        now_ms - self.start_time
    }

    fn time_recorded(&self, now_ms: i64) -> i64 {
        self.time_passed(now_ms) - self.afk_duration
    }

    fn has_no_player_movement(&self, config: &Config, now_ms: i64) -> bool {
        now_ms - self.last_player_movement >= (config.delay_before_afk_second as i64) * 1000
    }

    fn is_afking(&self, config: &Config, now_ms: i64) -> bool {
        config.with_player_only && self.has_no_player_movement(config, now_ms)
    }

    fn write(&mut self, config: &Config, data: &[u8]) -> Result<(), ReplayError> {
        self.file_buffer.extend_from_slice(data);
        if self.file_buffer.len() as u64 > config.file_buffer_size_mb * BYTES_PER_MB {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), ReplayError> {
        if self.file_buffer.is_empty() {
            return Ok(());
        }
        self.replay.write_content(&self.file_buffer)?;
        info!(
            flushed = self.file_buffer.len(),
            file_size = self.replay.size(),
            "flushed recording buffer"
        );
        self.file_buffer.clear();
        Ok(())
    }

    /// Flushes, fills in the metadata and packages the archive.
    ///
    /// Consumes the session; run on a blocking task since this compresses the whole recording.
    pub fn finalize(mut self, config: &Config, now_ms: i64) -> Result<Option<PathBuf>, ReplayError> {
        self.flush()?;

        info!(
            recorded = self.time_recorded(now_ms),
            passed = self.time_passed(now_ms),
            packets = self.packet_counter,
            "finalizing recording"
        );

        self.replay.set_meta_data(MetaDataInput {
            server_name: config.server_name.clone(),
            duration_ms: self.time_recorded(now_ms),
            date_ms: now_ms,
            mc_version: self.mc_version.clone(),
            file_format_version: self.file_format_version,
            protocol: self.protocol,
            player_uuids: self
                .player_uuids
                .iter()
                .map(|uuid| uuid.hyphenated().to_string())
                .collect(),
        })?;

        let base_name = self.file_name.clone().unwrap_or_else(|| {
            chrono::Local::now().format("PCRC_%Y_%m_%d_%H_%M_%S").to_string()
        });
        self.replay
            .archive(PathBuf::from(&config.recording_storage_directory).as_path(), &base_name)
    }
}

/// The recording controller. Owned by the lifecycle client, fed by the network task.
pub struct Recorder {
    state: AtomicU8,
    session: tokio::sync::Mutex<Option<Session>>,
    chat: Arc<ChatDispatcher>,
}

impl Recorder {
    pub fn new(chat: Arc<ChatDispatcher>) -> Self {
        Self {
            state: AtomicU8::new(RecordingState::Stopped as u8),
            session: tokio::sync::Mutex::new(None),
            chat,
        }
    }

    pub fn state(&self) -> RecordingState {
        match self.state.load(Ordering::Acquire) {
            x if x == RecordingState::Recording as u8 => RecordingState::Recording,
            x if x == RecordingState::Saving as u8 => RecordingState::Saving,
            _ => RecordingState::Stopped,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.state() == RecordingState::Recording
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == RecordingState::Stopped
    }

    /// Opens a fresh session. Only legal while stopped.
    pub async fn start(
        &self,
        version: &ProtocolVersion,
        config: &Config,
        now_ms: i64,
    ) -> Result<(), ReplayError> {
        let mut session = self.session.lock().await;
        if session.is_some() {
            return Err(ReplayError::AlreadySaved);
        }
        *session = Some(Session::new(version, config, now_ms)?);
        self.state
            .store(RecordingState::Recording as u8, Ordering::Release);
        info!(version = version.name, "recording started");
        Ok(())
    }

    /// Moves the session out for archiving and flips the state to saving.
    ///
    /// Frame production must have stopped before this is called; the returned session is the
    /// only remaining handle on the recording.
    pub async fn begin_saving(&self) -> Option<Session> {
        let mut session = self.session.lock().await;
        let taken = session.take()?;
        self.state
            .store(RecordingState::Saving as u8, Ordering::Release);
        info!("recording stopped, saving");
        Some(taken)
    }

    /// Marks the archive as done (or abandoned).
    pub fn finish_saving(&self) {
        self.state
            .store(RecordingState::Stopped as u8, Ordering::Release);
    }

    /// Feeds one inbound frame through the filter chain and the record decision.
    ///
    /// Returns the rollover request when a size or time limit was crossed.
    pub async fn on_packet(
        &self,
        frame: &PacketFrame,
        table: &PacketTable,
        config: &Config,
        now_ms: i64,
    ) -> Result<Option<Rollover>, RecorderError> {
        if !self.is_recording() {
            return Ok(None);
        }
        let mut guard = self.session.lock().await;
        let Some(session) = guard.as_mut() else {
            return Ok(None);
        };

        let outcome = session.processor.process(frame, table, config).await?;
        if outcome.refreshed_movement {
            session.last_player_movement = now_ms;
        }
        if let Some(position) = outcome.self_position {
            info!(x = position.x, y = position.y, z = position.z, "own position updated");
            session.pos = Some(position);
        }
        if let Some(uuid) = outcome.spawned_player {
            if !session.player_uuids.contains(&uuid) {
                info!(uuid = %uuid, "player added to replay metadata");
                session.player_uuids.push(uuid);
            }
        }

        let messages = Messages::new(&config.language);

        // the AFK timer cuts idle time out of the replay timeline
        if config.with_player_only {
            let no_movement = session.has_no_player_movement(config, now_ms);
            if no_movement {
                session.afk_duration += now_ms - session.last_packet_time;
            }
            if session.last_afk_flag != Some(no_movement) {
                let key = if no_movement {
                    "chat.pause_recording"
                } else {
                    "chat.continue_recording"
                };
                self.chat.enqueue(&messages.format(key, &[]), ChatPriority::Normal);
            }
            session.last_afk_flag = Some(no_movement);
        }
        session.last_packet_time = now_ms;

        if outcome.keep {
            let name = table.name_of(frame.id);
            let afking = session.is_afking(config, now_ms);
            if !afking || is_important(name) || config.record_packets_when_afk {
                let content = outcome.rewritten.as_deref().unwrap_or(&frame.raw);
                let time_recorded = session.time_recorded(now_ms);
                let mut data = Vec::with_capacity(content.len() + 8);
                data.extend_from_slice(&(time_recorded as i32).to_be_bytes());
                data.extend_from_slice(&(content.len() as i32).to_be_bytes());
                data.extend_from_slice(content);
                session.write(config, &data)?;
                session.packet_counter += 1;
            } else {
                debug!(id = frame.id, "packet not recorded while afk");
            }
        }

        // rollover triggers
        let buffered = session.file_buffer.len() as u64;
        if session.replay.size() + buffered > config.file_size_limit_mb * BYTES_PER_MB {
            info!(limit_mb = config.file_size_limit_mb, "recording file size limit reached");
            self.chat.enqueue(
                &messages.format(
                    "chat.reached_file_size_limit",
                    &[&config.file_size_limit_mb.to_string()],
                ),
                ChatPriority::Normal,
            );
            return Ok(Some(Rollover::FileSize));
        }
        let time_limit = (config.time_recorded_limit_hour as i64) * MILLIS_PER_HOUR;
        if session.time_recorded(now_ms) > time_limit {
            info!(limit_hours = config.time_recorded_limit_hour, "recorded time limit reached");
            self.chat.enqueue(
                &messages.format(
                    "chat.reached_time_limit",
                    &[&format_milli(time_limit)],
                ),
                ChatPriority::Normal,
            );
            return Ok(Some(Rollover::TimeLimit));
        }

        // periodic progress line in the log
        let showinfo_slot = session.time_passed(now_ms) / SHOWINFO_INTERVAL_MS;
        if showinfo_slot != session.last_showinfo_time
            || session.packet_counter - session.last_showinfo_counter >= SHOWINFO_PACKET_INTERVAL
        {
            session.last_showinfo_time = showinfo_slot;
            session.last_showinfo_counter = session.packet_counter;
            info!(
                recorded = format_milli(session.time_recorded(now_ms)).as_str(),
                passed = format_milli(session.time_passed(now_ms)).as_str(),
                packets = session.packet_counter,
                "recording progress"
            );
        }

        Ok(None)
    }

    /// The multi-line status answer for the in-game `status` command.
    pub async fn status(&self, config: &Config, now_ms: i64) -> String {
        let messages = Messages::new(&config.language);
        let guard = self.session.lock().await;
        match guard.as_ref() {
            Some(session) => messages.format(
                "chat.command.status",
                &[
                    &self.is_recording().to_string(),
                    &(!session.is_afking(config, now_ms)).to_string(),
                    &format_milli(session.time_recorded(now_ms)),
                    &format_milli(session.time_passed(now_ms)),
                    &session.packet_counter.to_string(),
                    &format!("{:.2}", session.file_buffer.len() as f64 / BYTES_PER_MB as f64),
                    &format!("{:.2}", session.replay.size() as f64 / BYTES_PER_MB as f64),
                    session.file_name.as_deref().unwrap_or("-"),
                ],
            ),
            None => messages.format(
                "chat.command.status",
                &["false", "false", "-", "-", "0", "0", "0", "-"],
            ),
        }
    }

    /// The bot's own last observed position.
    pub async fn position(&self) -> Option<Position> {
        self.session.lock().await.as_ref().and_then(|session| session.pos)
    }

    pub async fn set_file_name(&self, name: &str) {
        if let Some(session) = self.session.lock().await.as_mut() {
            info!(name, "recording file name set");
            session.file_name = Some(name.to_string());
        }
    }

    /// Adds a marker at the current recorded time; `None` when the position is still unknown.
    pub async fn add_marker(&self, name: Option<&str>, now_ms: i64) -> Result<Option<i64>, RecorderError> {
        let mut guard = self.session.lock().await;
        let Some(session) = guard.as_mut() else {
            return Ok(None);
        };
        let Some(position) = session.pos else {
            return Ok(None);
        };
        let time = session.time_recorded(now_ms);
        session.replay.add_marker(time, position, name)?;
        Ok(Some(time))
    }

    /// Deletes the marker with the given one-based index; `None` when out of range.
    pub async fn delete_marker(&self, index: usize) -> Result<Option<i64>, RecorderError> {
        let mut guard = self.session.lock().await;
        let Some(session) = guard.as_mut() else {
            return Ok(None);
        };
        if index == 0 || index > session.replay.markers().len() {
            return Ok(None);
        }
        let marker = session.replay.pop_marker(index - 1)?;
        Ok(Some(marker.real_timestamp()))
    }

    /// Lists `(timestamp, name)` of all markers.
    pub async fn list_markers(&self) -> Vec<(i64, Option<String>)> {
        let guard = self.session.lock().await;
        guard
            .as_ref()
            .map(|session| {
                session
                    .replay
                    .markers()
                    .iter()
                    .map(|marker| {
                        (marker.real_timestamp(), marker.name().map(str::to_string))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Renders milliseconds as `hh:mm:ss`.
pub fn format_milli(millis: i64) -> String {
    let seconds = millis / 1000 % 60;
    let minutes = millis / (1000 * 60) % 60;
    let hours = millis / (1000 * 60 * 60);
    format!("{hours:0>2}:{minutes:0>2}:{seconds:0>2}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chronicle_packets::AsyncWritePacket;
    use chronicle_packets::play::SpawnPlayerPacket;
    use chronicle_packets::registry::{Clientbound, version_by_name};
    use uuid::Uuid;

    fn test_config(dir: &tempfile::TempDir) -> Config {
        Config {
            recording_temp_directory: dir
                .path()
                .join("work")
                .to_string_lossy()
                .into_owned(),
            recording_storage_directory: dir
                .path()
                .join("storage")
                .to_string_lossy()
                .into_owned(),
            ..Config::default()
        }
    }

    fn recorder() -> Recorder {
        Recorder::new(Arc::new(ChatDispatcher::new(true)))
    }

    async fn entity_position_frame(table: &PacketTable, entity_id: i32) -> PacketFrame {
        let mut body = Vec::new();
        body.write_varint(entity_id).await.expect("write failed");
        body.extend_from_slice(&[0, 1, 0, 2, 0, 3, 1]);
        PacketFrame::from_parts(
            table.id_of(Clientbound::EntityPosition).expect("id missing"),
            body,
        )
        .await
        .expect("frame build failed")
    }

    #[tokio::test]
    async fn frames_carry_recorded_time_and_length() {
        let dir = tempfile::tempdir().expect("tempdir failed");
        let config = test_config(&dir);
        let table = PacketTable::new(754).expect("table build failed");
        let version = version_by_name("1.16.5").expect("version missing");
        let recorder = recorder();

        recorder.start(version, &config, 1000).await.expect("start failed");
        let frame = entity_position_frame(&table, 5).await;
        recorder
            .on_packet(&frame, &table, &config, 1400)
            .await
            .expect("packet failed");

        let session = recorder.begin_saving().await.expect("session missing");
        assert_eq!(recorder.state(), RecordingState::Saving);

        let expected_offset: i32 = 400;
        let raw = &session.file_buffer;
        assert_eq!(&raw[0..4], &expected_offset.to_be_bytes());
        assert_eq!(&raw[4..8], &(frame.raw.len() as i32).to_be_bytes());
        assert_eq!(&raw[8..], &frame.raw);
        recorder.finish_saving();
        assert!(recorder.is_stopped());
    }

    #[tokio::test]
    async fn afk_time_is_cut_from_the_timeline() {
        let dir = tempfile::tempdir().expect("tempdir failed");
        let mut config = test_config(&dir);
        config.with_player_only = true;
        config.delay_before_afk_second = 15;
        config.record_packets_when_afk = false;
        let table = PacketTable::new(754).expect("table build failed");
        let version = version_by_name("1.16.5").expect("version missing");
        let recorder = recorder();

        recorder.start(version, &config, 0).await.expect("start failed");

        // a non-player packet arrives long after the AFK threshold
        let frame = entity_position_frame(&table, 5).await;
        recorder
            .on_packet(&frame, &table, &config, 20_000)
            .await
            .expect("packet failed");

        // a player spawn ends the AFK period
        let mut body = Vec::new();
        SpawnPlayerPacket {
            entity_id: 9,
            player_uuid: Uuid::from_u128(3),
        }
        .write(&mut body)
        .await
        .expect("write failed");
        let spawn = PacketFrame::from_parts(
            table.id_of(Clientbound::SpawnPlayer).expect("id missing"),
            body,
        )
        .await
        .expect("frame build failed");
        recorder
            .on_packet(&spawn, &table, &config, 20_050)
            .await
            .expect("packet failed");

        let session = recorder.begin_saving().await.expect("session missing");
        // the 20 s idle gap was charged to afk_duration
        assert_eq!(session.afk_duration, 20_000);
        assert_eq!(session.time_recorded(20_050), 50);
        // pause + continue announcements were queued
        assert_eq!(session.last_afk_flag, Some(false));
    }

    #[tokio::test]
    async fn important_packets_survive_afk() {
        let dir = tempfile::tempdir().expect("tempdir failed");
        let mut config = test_config(&dir);
        config.with_player_only = true;
        config.record_packets_when_afk = false;
        let table = PacketTable::new(754).expect("table build failed");
        let version = version_by_name("1.16.5").expect("version missing");
        let recorder = recorder();

        recorder.start(version, &config, 0).await.expect("start failed");

        // deep into AFK, a movement packet is dropped
        let frame = entity_position_frame(&table, 5).await;
        recorder
            .on_packet(&frame, &table, &config, 60_000)
            .await
            .expect("packet failed");

        // but a player list update is still recorded
        let list_frame = PacketFrame::from_parts(
            table.id_of(Clientbound::PlayerListItem).expect("id missing"),
            vec![0x04, 0x00],
        )
        .await
        .expect("frame build failed");
        recorder
            .on_packet(&list_frame, &table, &config, 61_000)
            .await
            .expect("packet failed");

        let session = recorder.begin_saving().await.expect("session missing");
        assert_eq!(session.packet_counter, 1);
        assert!(session.file_buffer.ends_with(&list_frame.raw));
    }

    #[tokio::test]
    async fn size_limit_requests_a_rollover() {
        let dir = tempfile::tempdir().expect("tempdir failed");
        let mut config = test_config(&dir);
        config.file_size_limit_mb = 1;
        config.file_buffer_size_mb = 1;
        let table = PacketTable::new(754).expect("table build failed");
        let version = version_by_name("1.16.5").expect("version missing");
        let recorder = recorder();

        recorder.start(version, &config, 0).await.expect("start failed");

        let mut rollover = None;
        for i in 0..40 {
            let frame = PacketFrame::from_parts(0x7F, vec![0xAB; 64 * 1024])
                .await
                .expect("frame build failed");
            rollover = recorder
                .on_packet(&frame, &table, &config, 100 + i)
                .await
                .expect("packet failed");
            if rollover.is_some() {
                break;
            }
        }
        assert_eq!(rollover, Some(Rollover::FileSize));
    }

    #[tokio::test]
    async fn finalize_writes_the_archive() {
        let dir = tempfile::tempdir().expect("tempdir failed");
        let config = test_config(&dir);
        let table = PacketTable::new(754).expect("table build failed");
        let version = version_by_name("1.16.5").expect("version missing");
        let recorder = recorder();

        recorder.start(version, &config, 0).await.expect("start failed");
        for i in 0..400i64 {
            let frame = PacketFrame::from_parts(0x7F, vec![0x11; 64])
                .await
                .expect("frame build failed");
            recorder
                .on_packet(&frame, &table, &config, i * 10)
                .await
                .expect("packet failed");
        }
        recorder.set_file_name("captured").await;

        let session = recorder.begin_saving().await.expect("session missing");
        let target = session
            .finalize(&config, 5000)
            .expect("finalize failed")
            .expect("archive skipped");
        recorder.finish_saving();

        assert!(target.ends_with("captured.mcpr"));
        assert!(target.exists());
    }

    #[test]
    fn milli_formatting() {
        assert_eq!(format_milli(0), "00:00:00");
        assert_eq!(format_milli(61_000), "00:01:01");
        assert_eq!(format_milli(3_600_000 + 62_000), "01:01:02");
    }
}
