//! Device Event Recorder
//!
//! Append-only JSONL writer. Every event is flushed as it is written; the
//! file is rotated once it would grow past the size limit.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;

use super::event::DeviceEvent;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Default maximum file size before rotation (4 MB)
pub const MAX_FILE_SIZE: u64 = 4 * 1024 * 1024;

/// Log directory name under the data dir
pub const LOG_DIR: &str = "events";

const LOG_EXT: &str = "jsonl";

// ============================================================================
// RECORDER
// ============================================================================

pub struct Recorder {
    writer: BufWriter<File>,
    current_file: PathBuf,
    current_size: u64,
    base_dir: PathBuf,
    max_file_size: u64,
    /// Files opened so far; keeps names unique within one second
    file_index: u32,
    events_recorded: u64,
}

impl Recorder {
    /// Create a recorder in `base_dir` with the default rotation size
    pub fn new(base_dir: PathBuf) -> std::io::Result<Self> {
        Self::with_max_size(base_dir, MAX_FILE_SIZE)
    }

    pub fn with_max_size(base_dir: PathBuf, max_file_size: u64) -> std::io::Result<Self> {
        std::fs::create_dir_all(&base_dir)?;
        let (current_file, file) = Self::open_new_file(&base_dir, 0)?;

        Ok(Self {
            writer: BufWriter::new(file),
            current_file,
            current_size: 0,
            base_dir,
            max_file_size,
            file_index: 0,
            events_recorded: 0,
        })
    }

    fn open_new_file(base_dir: &Path, index: u32) -> std::io::Result<(PathBuf, File)> {
        let filename = format!(
            "device_{}_{:03}.{}",
            Utc::now().format("%Y_%m_%d_%H%M%S"),
            index,
            LOG_EXT
        );
        let file_path = base_dir.join(filename);

        let file = OpenOptions::new().create(true).append(true).open(&file_path)?;

        log::info!("Opened event log: {:?}", file_path);
        Ok((file_path, file))
    }

    pub fn record(&mut self, event: &DeviceEvent) -> std::io::Result<()> {
        let line = event.to_jsonl();
        let bytes = line.as_bytes();

        // an empty file always takes the line, however long
        if self.current_size > 0 && self.current_size + bytes.len() as u64 + 1 > self.max_file_size {
            self.rotate()?;
        }

        self.writer.write_all(bytes)?;
        self.writer.write_all(b"\n")?;
        self.current_size += bytes.len() as u64 + 1;
        self.writer.flush()?;

        self.events_recorded += 1;
        Ok(())
    }

    fn rotate(&mut self) -> std::io::Result<()> {
        self.writer.flush()?;

        self.file_index += 1;
        let (new_path, new_file) = Self::open_new_file(&self.base_dir, self.file_index)?;
        self.writer = BufWriter::new(new_file);

        log::info!("Rotated from {:?} to {:?}", self.current_file, new_path);
        self.current_file = new_path;
        self.current_size = 0;

        Ok(())
    }

    pub fn current_file(&self) -> &Path {
        &self.current_file
    }

    pub fn events_recorded(&self) -> u64 {
        self.events_recorded
    }

    pub fn stats(&self) -> RecorderStats {
        RecorderStats {
            events_recorded: self.events_recorded,
            current_file: self.current_file.to_string_lossy().to_string(),
            files_opened: self.file_index + 1,
        }
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RecorderStats {
    pub events_recorded: u64,
    pub current_file: String,
    pub files_opened: u32,
}

// ============================================================================
// QUERY API
// ============================================================================

/// Read every parseable event from a log file; malformed lines are skipped
pub fn read_events(file_path: &Path) -> std::io::Result<Vec<DeviceEvent>> {
    let reader = BufReader::new(File::open(file_path)?);
    let mut events = Vec::new();

    for line in reader.lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<DeviceEvent>(&line) {
            Ok(event) => events.push(event),
            Err(e) => log::debug!("Skipping malformed event line in {:?}: {}", file_path, e),
        }
    }

    Ok(events)
}

/// Log files in `dir`, oldest first
pub fn list_log_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    if dir.is_dir() {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == LOG_EXT) {
                files.push(path);
            }
        }
    }

    // names carry the timestamp and index
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::telemetry::event::EventType;
    use tempfile::TempDir;
    use uuid::Uuid;

    #[test]
    fn test_recorder_creation() {
        let temp_dir = TempDir::new().unwrap();
        let recorder = Recorder::new(temp_dir.path().join(LOG_DIR)).unwrap();
        assert!(recorder.current_file().exists());
        assert_eq!(recorder.events_recorded(), 0);
    }

    #[test]
    fn test_record_and_read_back() {
        let temp_dir = TempDir::new().unwrap();
        let mut recorder = Recorder::new(temp_dir.path().to_path_buf()).unwrap();
        let session = Uuid::new_v4();

        recorder.record(&DeviceEvent::boot(session, "wrist-01", "0.1.0")).unwrap();
        recorder.record(&DeviceEvent::sensor_fault(session, 3, &"timeout")).unwrap();

        let events = read_events(recorder.current_file()).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, EventType::Boot);
        assert_eq!(events[1].event_type, EventType::SensorFault);
        assert_eq!(events[1].tick, Some(3));
        assert!(events.iter().all(|e| e.session_id == session));
    }

    #[test]
    fn test_one_event_per_line() {
        let temp_dir = TempDir::new().unwrap();
        let mut recorder = Recorder::new(temp_dir.path().to_path_buf()).unwrap();
        let session = Uuid::new_v4();

        for tick in 0..3 {
            recorder
                .record(&DeviceEvent::new(session, EventType::InferenceTimeout, "slow").with_tick(tick))
                .unwrap();
        }

        let content = std::fs::read_to_string(recorder.current_file()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        for line in lines {
            assert!(serde_json::from_str::<DeviceEvent>(line).is_ok());
        }
    }

    #[test]
    fn test_rotation_keeps_every_event() {
        let temp_dir = TempDir::new().unwrap();
        let mut recorder = Recorder::with_max_size(temp_dir.path().to_path_buf(), 300).unwrap();
        let session = Uuid::new_v4();
        let first = recorder.current_file().to_path_buf();

        for tick in 0..10 {
            recorder.record(&DeviceEvent::sensor_fault(session, tick, &"nack")).unwrap();
        }
        assert_ne!(recorder.current_file(), first.as_path());

        let files = list_log_files(temp_dir.path()).unwrap();
        assert!(files.len() > 1);
        assert_eq!(files[0], first);

        let ticks: Vec<u64> = files
            .iter()
            .flat_map(|f| read_events(f).unwrap())
            .filter_map(|e| e.tick)
            .collect();
        assert_eq!(ticks, (0..10).collect::<Vec<_>>());
        assert_eq!(recorder.stats().files_opened as usize, files.len());
    }

    #[test]
    fn test_read_skips_malformed_lines() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("mixed.jsonl");
        let good = DeviceEvent::new(Uuid::new_v4(), EventType::Boot, "ok").to_jsonl();
        std::fs::write(&path, format!("{}\nnot json\n\n{}\n", good, good)).unwrap();

        assert_eq!(read_events(&path).unwrap().len(), 2);
    }
}
