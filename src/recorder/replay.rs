//! The on-disk replay recording and its final `.mcpr` packaging.
//!
//! While recording, a working directory holds the growing `recording.tmcpr` plus the three JSON
//! side files. Archiving zips everything (with a CRC sidecar) to the target path and removes the
//! working directory, so a partially written archive never appears at the final location.

use flate2::Crc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

pub const BYTES_PER_KB: u64 = 1024;
pub const BYTES_PER_MB: u64 = BYTES_PER_KB * 1024;

/// Recordings below this size are discarded instead of archived.
pub const MINIMUM_LEGAL_FILE_SIZE: u64 = 10 * BYTES_PER_KB;

const RECORDING_FILE: &str = "recording.tmcpr";
const CRC_FILE: &str = "recording.tmcpr.crc32";
const MARKERS_FILE: &str = "markers.json";
const MODS_FILE: &str = "mods.json";
const META_DATA_FILE: &str = "metaData.json";

/// The internal error type for all errors related to the replay files.
#[derive(thiserror::Error, Debug)]
pub enum ReplayError {
    /// Reading or writing one of the replay files failed.
    #[error("replay file io failed: {0}")]
    Io(#[from] std::io::Error),

    /// Composing the archive failed.
    #[error("archive creation failed: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Rendering one of the JSON side files failed.
    #[error("side file encoding failed: {0}")]
    Json(#[from] serde_json::Error),

    /// The recording was already archived (or never started).
    #[error("recording already saved")]
    AlreadySaved,
}

/// A camera position captured for a marker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub yaw: f32,
    pub pitch: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct MarkerPosition {
    x: f64,
    y: f64,
    z: f64,
    yaw: f32,
    pitch: f32,
    roll: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct MarkerValue {
    position: MarkerPosition,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

/// One viewer-visible jump point inside the replay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Marker {
    #[serde(rename = "realTimestamp")]
    real_timestamp: i64,
    value: MarkerValue,
}

impl Marker {
    pub fn real_timestamp(&self) -> i64 {
        self.real_timestamp
    }

    pub fn name(&self) -> Option<&str> {
        self.value.name.as_deref()
    }
}

/// The `metaData.json` contents of a finished recording.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MetaData {
    singleplayer: bool,
    #[serde(rename = "serverName")]
    server_name: String,
    duration: i64,
    date: i64,
    mcversion: String,
    #[serde(rename = "fileFormat")]
    file_format: String,
    #[serde(rename = "fileFormatVersion")]
    file_format_version: u32,
    protocol: i32,
    generator: String,
    #[serde(rename = "selfId")]
    self_id: i32,
    players: Vec<String>,
}

/// Everything the recorder knows about the session when metadata is written.
#[derive(Debug, Clone)]
pub struct MetaDataInput {
    pub server_name: String,
    pub duration_ms: i64,
    pub date_ms: i64,
    pub mc_version: String,
    pub file_format_version: u32,
    pub protocol: i32,
    pub player_uuids: Vec<String>,
}

/// One in-progress recording on disk.
#[derive(Debug)]
pub struct ReplayRecording {
    directory: PathBuf,
    markers: Vec<Marker>,
    meta_data: Option<MetaData>,
    size: u64,
    archived: bool,
}

impl ReplayRecording {
    /// Creates a fresh working directory, discarding leftovers from a crashed run.
    pub fn create(directory: &Path) -> Result<Self, ReplayError> {
        if directory.exists() {
            fs::remove_dir_all(directory)?;
        }
        fs::create_dir_all(directory)?;
        fs::File::create(directory.join(RECORDING_FILE))?;

        let recording = Self {
            directory: directory.to_path_buf(),
            markers: Vec::new(),
            meta_data: None,
            size: 0,
            archived: false,
        };
        recording.write_markers()?;
        recording.write_mods()?;
        recording.write_meta_data()?;
        Ok(recording)
    }

    /// The current size of `recording.tmcpr` in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn markers(&self) -> &[Marker] {
        &self.markers
    }

    /// Appends raw frame bytes to the recording file.
    pub fn write_content(&mut self, content: &[u8]) -> Result<(), ReplayError> {
        let mut file = fs::OpenOptions::new()
            .append(true)
            .open(self.directory.join(RECORDING_FILE))?;
        file.write_all(content)?;
        self.size += content.len() as u64;
        Ok(())
    }

    /// Adds a marker at the given recording timestamp.
    ///
    /// The yaw and pitch are swapped on purpose: the replay viewer reads them the other way
    /// around.
    pub fn add_marker(
        &mut self,
        time_ms: i64,
        position: Position,
        name: Option<&str>,
    ) -> Result<&Marker, ReplayError> {
        self.markers.push(Marker {
            real_timestamp: time_ms,
            value: MarkerValue {
                position: MarkerPosition {
                    x: position.x,
                    y: position.y,
                    z: position.z,
                    yaw: position.pitch,
                    pitch: position.yaw,
                    roll: 0.0,
                },
                name: name.map(str::to_string),
            },
        });
        self.write_markers()?;
        Ok(self.markers.last().expect("marker just pushed"))
    }

    /// Removes the marker at the given zero-based index.
    pub fn pop_marker(&mut self, index: usize) -> Result<Marker, ReplayError> {
        let marker = self.markers.remove(index);
        self.write_markers()?;
        Ok(marker)
    }

    pub fn set_meta_data(&mut self, input: MetaDataInput) -> Result<(), ReplayError> {
        self.meta_data = Some(MetaData {
            singleplayer: false,
            server_name: input.server_name,
            duration: input.duration_ms,
            date: input.date_ms,
            mcversion: input.mc_version,
            file_format: "MCPR".to_string(),
            file_format_version: input.file_format_version,
            protocol: input.protocol,
            generator: "PCRC".to_string(),
            self_id: -1,
            players: input.player_uuids,
        });
        self.write_meta_data()
    }

    fn write_markers(&self) -> Result<(), ReplayError> {
        let rendered = serde_json::to_string(&self.markers)?;
        fs::write(self.directory.join(MARKERS_FILE), rendered)?;
        Ok(())
    }

    fn write_mods(&self) -> Result<(), ReplayError> {
        let rendered = serde_json::to_string(&serde_json::json!({"requiredMods": []}))?;
        fs::write(self.directory.join(MODS_FILE), rendered)?;
        Ok(())
    }

    fn write_meta_data(&self) -> Result<(), ReplayError> {
        let rendered = match &self.meta_data {
            Some(meta_data) => serde_json::to_string(meta_data)?,
            None => "{}".to_string(),
        };
        fs::write(self.directory.join(META_DATA_FILE), rendered)?;
        Ok(())
    }

    /// Packages the recording into `<storage>/<base_name>.mcpr` and removes the working directory.
    ///
    /// Recordings below [`MINIMUM_LEGAL_FILE_SIZE`] are dropped with a warning and `Ok(None)`.
    /// An existing target name gets `_2`, `_3`, … appended rather than overwritten.
    pub fn archive(
        &mut self,
        storage_directory: &Path,
        base_name: &str,
    ) -> Result<Option<PathBuf>, ReplayError> {
        if self.archived {
            return Err(ReplayError::AlreadySaved);
        }

        if self.size < MINIMUM_LEGAL_FILE_SIZE {
            warn!(
                size = self.size,
                minimum = MINIMUM_LEGAL_FILE_SIZE,
                "recording too small, skipping archive"
            );
            self.archived = true;
            fs::remove_dir_all(&self.directory)?;
            return Ok(None);
        }

        fs::create_dir_all(storage_directory)?;
        let target = unique_target(storage_directory, base_name);
        info!(target = %target.display(), "creating replay archive");

        self.write_markers()?;
        self.write_mods()?;
        self.write_meta_data()?;

        let crc = crc32_file(&self.directory.join(RECORDING_FILE))?;
        fs::write(self.directory.join(CRC_FILE), crc.to_string())?;

        let archive = fs::File::create(&target)?;
        let mut writer = ZipWriter::new(archive);
        let options = SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated)
            .large_file(true);
        for entry in [MARKERS_FILE, MODS_FILE, META_DATA_FILE, CRC_FILE, RECORDING_FILE] {
            writer.start_file(entry, options)?;
            let mut source = fs::File::open(self.directory.join(entry))?;
            std::io::copy(&mut source, &mut writer)?;
        }
        writer.finish()?;

        fs::remove_dir_all(&self.directory)?;
        self.archived = true;
        Ok(Some(target))
    }
}

fn unique_target(directory: &Path, base_name: &str) -> PathBuf {
    let mut target = directory.join(format!("{base_name}.mcpr"));
    let mut counter = 2;
    while target.exists() {
        target = directory.join(format!("{base_name}_{counter}.mcpr"));
        counter += 1;
    }
    target
}

/// Streams the CRC32 of a file in 1 MiB chunks.
fn crc32_file(path: &Path) -> Result<u32, ReplayError> {
    let mut file = fs::File::open(path)?;
    let mut crc = Crc::new();
    let mut buffer = vec![0u8; BYTES_PER_MB as usize];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        crc.update(&buffer[..read]);
    }
    Ok(crc.sum())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_zip_entry(archive: &Path, name: &str) -> Vec<u8> {
        let file = fs::File::open(archive).expect("open archive failed");
        let mut zip = zip::ZipArchive::new(file).expect("read archive failed");
        let mut entry = zip.by_name(name).expect("entry missing");
        let mut content = Vec::new();
        entry.read_to_end(&mut content).expect("read entry failed");
        content
    }

    #[test]
    fn archive_contains_the_five_entries_with_matching_crc() {
        let workspace = tempfile::tempdir().expect("tempdir failed");
        let working = workspace.path().join("work");
        let storage = workspace.path().join("storage");

        let mut recording = ReplayRecording::create(&working).expect("create failed");
        let content = vec![0x5A; (MINIMUM_LEGAL_FILE_SIZE + 1) as usize];
        recording.write_content(&content).expect("write failed");
        recording
            .set_meta_data(MetaDataInput {
                server_name: "test".to_string(),
                duration_ms: 1234,
                date_ms: 1_700_000_000_000,
                mc_version: "1.16.5".to_string(),
                file_format_version: 14,
                protocol: 754,
                player_uuids: vec![],
            })
            .expect("meta data failed");

        let target = recording
            .archive(&storage, "capture")
            .expect("archive failed")
            .expect("archive skipped");
        assert!(target.ends_with("capture.mcpr"));
        assert!(!working.exists(), "working directory must be removed");

        let recorded = read_zip_entry(&target, "recording.tmcpr");
        assert_eq!(recorded, content);

        let crc_text = String::from_utf8(read_zip_entry(&target, "recording.tmcpr.crc32"))
            .expect("crc not utf8");
        let mut crc = Crc::new();
        crc.update(&recorded);
        assert_eq!(crc_text, crc.sum().to_string());

        let meta: serde_json::Value =
            serde_json::from_slice(&read_zip_entry(&target, "metaData.json")).expect("bad json");
        assert_eq!(meta["fileFormat"], "MCPR");
        assert_eq!(meta["fileFormatVersion"], 14);
        assert_eq!(meta["protocol"], 754);
        assert_eq!(meta["generator"], "PCRC");
        assert_eq!(meta["selfId"], -1);

        read_zip_entry(&target, "markers.json");
        read_zip_entry(&target, "mods.json");
    }

    #[test]
    fn tiny_recordings_are_skipped() {
        let workspace = tempfile::tempdir().expect("tempdir failed");
        let working = workspace.path().join("work");
        let storage = workspace.path().join("storage");

        let mut recording = ReplayRecording::create(&working).expect("create failed");
        recording.write_content(&[0u8; 16]).expect("write failed");

        let target = recording.archive(&storage, "tiny").expect("archive failed");
        assert!(target.is_none());
        assert!(!working.exists());
        assert!(matches!(
            recording.archive(&storage, "tiny"),
            Err(ReplayError::AlreadySaved)
        ));
    }

    #[test]
    fn colliding_target_names_get_a_counter() {
        let workspace = tempfile::tempdir().expect("tempdir failed");
        let storage = workspace.path().join("storage");
        fs::create_dir_all(&storage).expect("mkdir failed");
        fs::write(storage.join("capture.mcpr"), b"occupied").expect("write failed");
        fs::write(storage.join("capture_2.mcpr"), b"occupied").expect("write failed");

        assert!(unique_target(&storage, "capture").ends_with("capture_3.mcpr"));
    }

    #[test]
    fn marker_swaps_yaw_and_pitch() {
        let workspace = tempfile::tempdir().expect("tempdir failed");
        let working = workspace.path().join("work");

        let mut recording = ReplayRecording::create(&working).expect("create failed");
        recording
            .add_marker(
                1500,
                Position {
                    x: 1.0,
                    y: 64.0,
                    z: -9.0,
                    yaw: 90.0,
                    pitch: -30.0,
                },
                Some("spawn"),
            )
            .expect("marker failed");

        let raw = fs::read_to_string(working.join("markers.json")).expect("read failed");
        let markers: serde_json::Value = serde_json::from_str(&raw).expect("bad json");
        let position = &markers[0]["value"]["position"];
        assert_eq!(position["yaw"], -30.0);
        assert_eq!(position["pitch"], 90.0);
        assert_eq!(position["roll"], 0.0);
        assert_eq!(markers[0]["realTimestamp"], 1500);
        assert_eq!(markers[0]["value"]["name"], "spawn");

        recording.pop_marker(0).expect("pop failed");
        let raw = fs::read_to_string(working.join("markers.json")).expect("read failed");
        assert_eq!(raw, "[]");
    }
}
