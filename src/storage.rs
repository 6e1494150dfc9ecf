//! Transcript persistence.
//!
//! A collaborator around the core: saves a [`FinalTranscript`] as plain
//! text or JSON under a configured directory and lists what has been saved.
//! Filenames derive from the session start time, so one session's text and
//! JSON exports share a stem.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ConfabError, Result};
use crate::session::FinalTranscript;

/// JSON export shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptRecord {
    /// Session start date, `YYYY-MM-DD`.
    pub date: String,
    /// Session start time, `HH:MM:SS` (UTC).
    pub time: String,
    /// Session length in seconds.
    pub duration: f64,
    pub transcription: String,
    pub participants: Vec<String>,
    pub summary: String,
}

impl TranscriptRecord {
    fn from_transcript(transcript: &FinalTranscript) -> Self {
        Self {
            date: transcript.started_at.format("%Y-%m-%d").to_string(),
            time: transcript.started_at.format("%H:%M:%S").to_string(),
            duration: transcript.duration.as_secs_f64(),
            transcription: transcript.text(),
            participants: Vec::new(),
            summary: String::new(),
        }
    }
}

pub struct TranscriptStore {
    dir: PathBuf,
}

impl TranscriptStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Save as plain text: header, generation timestamp, separator, one
    /// segment per line. Returns the written path.
    pub fn save_text(&self, transcript: &FinalTranscript) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!("{}.txt", self.stem(transcript)));

        let mut body = String::new();
        body.push_str("Meeting Transcript\n");
        body.push_str(&format!(
            "Generated: {}\n",
            transcript.started_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
        body.push_str(&"-".repeat(40));
        body.push_str("\n\n");
        for segment in &transcript.segments {
            body.push_str(&segment.text);
            body.push('\n');
        }

        fs::write(&path, body)?;
        info!(path = %path.display(), "transcript saved as text");
        Ok(path)
    }

    /// Save as a [`TranscriptRecord`] JSON document. Returns the written
    /// path.
    pub fn save_json(&self, transcript: &FinalTranscript) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!("{}.json", self.stem(transcript)));

        let record = TranscriptRecord::from_transcript(transcript);
        let body = serde_json::to_vec_pretty(&record)
            .map_err(|e| ConfabError::Other(anyhow::Error::new(e)))?;
        fs::write(&path, body)?;
        info!(path = %path.display(), "transcript saved as json");
        Ok(path)
    }

    /// Saved transcript files, most recently modified first. An absent
    /// store directory is an empty listing, not an error.
    pub fn list(&self) -> Result<Vec<PathBuf>> {
        let dir = match fs::read_dir(&self.dir) {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries: Vec<(SystemTime, PathBuf)> = Vec::new();
        for entry in dir {
            let entry = entry?;
            let path = entry.path();
            let is_transcript = path
                .file_name()
                .and_then(|name| name.to_str())
                .map(|name| name.starts_with("transcript_"))
                .unwrap_or(false);
            if !is_transcript {
                continue;
            }
            let modified = entry.metadata()?.modified()?;
            entries.push((modified, path));
        }
        entries.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(entries.into_iter().map(|(_, path)| path).collect())
    }

    fn stem(&self, transcript: &FinalTranscript) -> String {
        transcript
            .started_at
            .format("transcript_%Y%m%d_%H%M%S")
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::{TimeZone, Utc};

    use crate::pipeline::{SegmentOrigin, TranscriptSegment};

    fn transcript() -> FinalTranscript {
        let started_at = Utc.with_ymd_and_hms(2026, 3, 14, 9, 30, 5).unwrap();
        FinalTranscript {
            segments: vec![
                TranscriptSegment {
                    seq: 0,
                    text: "Welcome everyone.".into(),
                    origin: SegmentOrigin::Primary,
                    timestamp: started_at,
                },
                TranscriptSegment {
                    seq: 2,
                    text: "Next item.".into(),
                    origin: SegmentOrigin::Fallback,
                    timestamp: started_at,
                },
            ],
            started_at,
            duration: Duration::from_secs_f64(12.5),
            dropped_frames: 0,
        }
    }

    #[test]
    fn text_export_has_header_and_one_segment_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let store = TranscriptStore::new(dir.path());

        let path = store.save_text(&transcript()).unwrap();
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "transcript_20260314_093005.txt"
        );

        let body = fs::read_to_string(&path).unwrap();
        let mut lines = body.lines();
        assert_eq!(lines.next(), Some("Meeting Transcript"));
        assert_eq!(lines.next(), Some("Generated: 2026-03-14 09:30:05 UTC"));
        assert_eq!(lines.next(), Some("-".repeat(40).as_str()));
        assert_eq!(lines.next(), Some(""));
        assert_eq!(lines.next(), Some("Welcome everyone."));
        assert_eq!(lines.next(), Some("Next item."));
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn json_export_round_trips_the_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = TranscriptStore::new(dir.path());

        let path = store.save_json(&transcript()).unwrap();
        let body = fs::read_to_string(&path).unwrap();
        let record: TranscriptRecord = serde_json::from_str(&body).unwrap();

        assert_eq!(record.date, "2026-03-14");
        assert_eq!(record.time, "09:30:05");
        assert!((record.duration - 12.5).abs() < 1e-9);
        assert_eq!(record.transcription, "Welcome everyone. Next item.");
        assert!(record.participants.is_empty());
        assert!(record.summary.is_empty());
    }

    #[test]
    fn listing_returns_saved_transcripts_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = TranscriptStore::new(dir.path());

        let mut older = transcript();
        older.started_at = Utc.with_ymd_and_hms(2026, 3, 14, 8, 0, 0).unwrap();
        let older_path = store.save_text(&older).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        let newer_path = store.save_text(&transcript()).unwrap();

        // Unrelated files are not listed.
        fs::write(dir.path().join("notes.txt"), "not a transcript").unwrap();

        let listed = store.list().unwrap();
        assert_eq!(listed, vec![newer_path, older_path]);
    }

    #[test]
    fn listing_a_missing_directory_is_empty() {
        let store = TranscriptStore::new("/nonexistent/confab-transcripts");
        assert!(store.list().unwrap().is_empty());
    }
}
