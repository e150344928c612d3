//! Recording file manager.
//!
//! Owns the output directory: picks collision free filenames for new
//! recordings and lists the ones already there.

use log::{debug, error, warn};
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use osctape_core::file_format::{self, LoadOptions};
use osctape_core::RecordingSession;

pub const RECORDING_EXTENSION: &str = "csv";

/// Information about a recording file
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingInfo {
    /// Filename (without path)
    pub filename: String,
    #[serde(skip_serializing)]
    pub path: PathBuf,
    /// File size in bytes
    pub size: u64,
    pub event_count: usize,
    /// Timestamp of the last event, in seconds
    pub duration: f64,
    /// Lines that could not be read back
    pub skipped_lines: usize,
    /// File modification time (Unix timestamp ms)
    pub modified_ms: u64,
}

/// Manager for recording files
#[derive(Debug, Clone)]
pub struct RecordingManager {
    base_dir: PathBuf,
}

impl RecordingManager {
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn ensure_dir(&self) -> io::Result<()> {
        fs::create_dir_all(&self.base_dir).inspect_err(|e| {
            error!(
                "Failed to create recordings directory {}: {}",
                self.base_dir.display(),
                e
            )
        })
    }

    /// All `.csv` files in the directory, newest first
    pub fn list_recordings(&self) -> Vec<RecordingInfo> {
        let entries = match fs::read_dir(&self.base_dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Cannot list {}: {}", self.base_dir.display(), e);
                return Vec::new();
            }
        };

        let mut recordings: Vec<RecordingInfo> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path
                        .extension()
                        .is_some_and(|ext| ext == RECORDING_EXTENSION)
            })
            .filter_map(|path| self.get_recording_info(&path))
            .collect();

        recordings.sort_by(|a, b| b.modified_ms.cmp(&a.modified_ms));
        recordings
    }

    /// Read a recording and summarize it
    pub fn get_recording_info(&self, path: &Path) -> Option<RecordingInfo> {
        let filename = path.file_name()?.to_str()?.to_string();

        let metadata = fs::metadata(path).ok()?;
        let modified_ms = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        let report = match file_format::load(path, LoadOptions::default()) {
            Ok(report) => report,
            Err(e) => {
                warn!("Cannot read recording {}: {}", path.display(), e);
                return None;
            }
        };

        Some(RecordingInfo {
            filename,
            path: path.to_path_buf(),
            size: metadata.len(),
            event_count: report.sequence.len(),
            duration: report.sequence.duration(),
            skipped_lines: report.skipped.len(),
            modified_ms,
        })
    }

    /// `{stem}.csv`, or `{stem}_{n}.csv` with the first free `n`
    pub fn generate_filename(&self, stem: &str) -> String {
        let mut name = format!("{}.{}", stem, RECORDING_EXTENSION);
        let mut counter = 1;
        while self.base_dir.join(&name).exists() {
            name = format!("{}_{}.{}", stem, counter, RECORDING_EXTENSION);
            counter += 1;
        }
        name
    }

    /// Full path a session will be saved to
    pub fn path_for(&self, session: &RecordingSession) -> PathBuf {
        self.base_dir
            .join(self.generate_filename(&session.file_stem()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone};
    use osctape_core::TypedValue;
    use std::time::Duration;
    use tempfile::TempDir;

    fn session(dir: &Path) -> RecordingSession {
        let started = Local.with_ymd_and_hms(2026, 10, 19, 14, 3, 22).unwrap();
        RecordingSession::new("agat", started, dir.to_path_buf())
    }

    #[test]
    fn test_generate_filename_counter() {
        let dir = TempDir::new().unwrap();
        let manager = RecordingManager::with_base_dir(dir.path().to_path_buf());

        assert_eq!(manager.generate_filename("agat_261019_140322"), "agat_261019_140322.csv");

        fs::write(dir.path().join("agat_261019_140322.csv"), "").unwrap();
        assert_eq!(manager.generate_filename("agat_261019_140322"), "agat_261019_140322_1.csv");

        fs::write(dir.path().join("agat_261019_140322_1.csv"), "").unwrap();
        assert_eq!(manager.generate_filename("agat_261019_140322"), "agat_261019_140322_2.csv");
    }

    #[test]
    fn test_path_for_session() {
        let dir = TempDir::new().unwrap();
        let manager = RecordingManager::with_base_dir(dir.path().to_path_buf());

        let path = manager.path_for(&session(dir.path()));
        assert_eq!(path, dir.path().join("agat_261019_140322.csv"));
    }

    #[test]
    fn test_list_recordings() {
        let dir = TempDir::new().unwrap();
        let manager = RecordingManager::with_base_dir(dir.path().to_path_buf());

        let mut s = session(dir.path());
        s.append("/a", TypedValue::Integer(1), Duration::ZERO);
        s.append("/b", TypedValue::Float(0.5), Duration::from_millis(1500));
        s.save(manager.path_for(&s), Duration::from_secs(2)).unwrap();
        fs::write(dir.path().join("notes.txt"), "not a recording").unwrap();

        let list = manager.list_recordings();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].filename, "agat_261019_140322.csv");
        assert_eq!(list[0].event_count, 2);
        assert_eq!(list[0].duration, 1.5);
        assert_eq!(list[0].skipped_lines, 0);
    }

    #[test]
    fn test_list_missing_dir() {
        let dir = TempDir::new().unwrap();
        let manager = RecordingManager::with_base_dir(dir.path().join("nope"));
        assert!(manager.list_recordings().is_empty());

        manager.ensure_dir().unwrap();
        assert!(dir.path().join("nope").is_dir());
    }
}
