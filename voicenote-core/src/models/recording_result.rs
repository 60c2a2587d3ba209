use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::config::SessionConfig;

/// Result handed to the note-persistence layer once a session closes cleanly.
///
/// Serializable so the caller can record it next to the note; the core never
/// interprets it after returning it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingResult {
    pub session_id: String,
    pub file_path: PathBuf,
    pub duration_secs: f64,
    pub sample_rate: u32,
    pub channel_count: u16,
    pub bitrate_bps: u32,
    pub gain_db: u8,
    pub checksum: String,
    pub created_at: String,
    pub diagnostics: SessionDiagnostics,
}

impl RecordingResult {
    pub fn new(
        session_id: &str,
        config: &SessionConfig,
        file_path: PathBuf,
        checksum: String,
        diagnostics: SessionDiagnostics,
    ) -> Self {
        Self {
            session_id: session_id.to_string(),
            file_path,
            duration_secs: diagnostics.frames_captured as f64 / config.sample_rate as f64,
            sample_rate: config.sample_rate,
            channel_count: config.channel_count,
            bitrate_bps: config.bitrate_bps,
            gain_db: config.gain_db.db(),
            checksum,
            created_at: chrono::Utc::now().to_rfc3339(),
            diagnostics,
        }
    }
}

/// Counters collected by the capture worker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDiagnostics {
    pub blocks_read: u64,
    pub frames_captured: u64,
    pub empty_reads: u64,
    pub encoder_retries: u64,
    pub units_written: u64,
    pub bytes_written: u64,
    pub effects_attached: Vec<String>,
    pub input_mode: String,
}
