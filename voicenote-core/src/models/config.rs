use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::processing::gain::GainLevel;
use crate::processing::mp4_format;

/// Configuration for one recording session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Capture and encode sample rate in Hz (default: 44100).
    pub sample_rate: u32,

    /// Number of interleaved channels (default: 1). Valid values: 1, 2.
    pub channel_count: u16,

    /// Constant encoder bitrate in bits per second (default: 128000).
    pub bitrate_bps: u32,

    /// Linear boost applied to captured PCM before encoding (default: +6 dB).
    pub gain_db: GainLevel,

    /// Where the finished `.m4a` file is placed.
    pub output_path: PathBuf,

    /// Frames requested per capture read (default: 2048).
    pub block_frames: usize,

    /// Attach automatic gain control / noise suppression when the platform offers them.
    pub enable_effects: bool,

    /// Consecutive empty capture reads tolerated before the device counts as stalled.
    pub max_empty_reads: u32,

    /// Bounded "try again" polls per encoder submit and for the end-of-stream drain.
    pub max_encoder_retries: u32,

    /// How long `stop` waits for the worker before detaching it.
    pub stop_timeout_ms: u64,

    /// Maximum recording duration in seconds (None = unlimited).
    pub max_duration_secs: Option<f64>,
}

impl SessionConfig {
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        Self {
            output_path: output_path.into(),
            ..Default::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, String> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| format!("failed to parse session config: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        if mp4_format::sampling_frequency_index(self.sample_rate).is_none() {
            return Err(format!("unsupported sample rate: {}", self.sample_rate));
        }
        if ![1, 2].contains(&self.channel_count) {
            return Err(format!("unsupported channel count: {}", self.channel_count));
        }
        if self.bitrate_bps == 0 {
            return Err("bitrate must be positive".into());
        }
        if self.output_path.as_os_str().is_empty() {
            return Err("output path must not be empty".into());
        }
        if self.block_frames == 0 {
            return Err("block size must be positive".into());
        }
        if let Some(max) = self.max_duration_secs {
            if !(max > 0.0) {
                return Err(format!("invalid maximum duration: {}", max));
            }
        }
        Ok(())
    }

    /// Interleaved samples per capture read.
    pub fn block_samples(&self) -> usize {
        self.block_frames * self.channel_count as usize
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    /// Frame count at which the worker stops on its own, if a maximum is set.
    pub fn max_frames(&self) -> Option<u64> {
        self.max_duration_secs
            .map(|secs| (secs * self.sample_rate as f64).ceil() as u64)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channel_count: 1,
            bitrate_bps: 128_000,
            gain_db: GainLevel::Plus6,
            output_path: PathBuf::from("recording.m4a"),
            block_frames: 2048,
            enable_effects: true,
            max_empty_reads: 50,
            max_encoder_retries: 200,
            stop_timeout_ms: 1000,
            max_duration_secs: None,
        }
    }
}
