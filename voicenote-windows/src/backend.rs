use std::path::Path;

use voicenote_core::models::audio_models::InputMode;
use voicenote_core::models::error::{CaptureError, EncodeError, WriteError};
use voicenote_core::storage::m4a_writer::M4aWriter;
use voicenote_core::traits::backend::CaptureBackend;

use crate::mf_aac_encoder::MfAacEncoder;
use crate::wasapi_capture::WasapiCapture;

/// WASAPI capture, Media Foundation AAC-LC, streaming `.m4a` output.
#[derive(Debug, Clone, Default)]
pub struct WindowsBackend {
    device_id: Option<String>,
}

impl WindowsBackend {
    /// Record from the default endpoint of each input mode's role.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record from one specific endpoint (see `DeviceEnumerator`).
    pub fn with_device(id: impl Into<String>) -> Self {
        Self {
            device_id: Some(id.into()),
        }
    }
}

impl CaptureBackend for WindowsBackend {
    type Source = WasapiCapture;
    type Encoder = MfAacEncoder;
    type Writer = M4aWriter;

    fn open_source(&self, mode: InputMode, sample_rate: u32, channel_count: u16) -> Result<WasapiCapture, CaptureError> {
        WasapiCapture::open(self.device_id.as_deref(), mode, sample_rate, channel_count)
    }

    fn configure_encoder(&self, sample_rate: u32, channel_count: u16, bitrate_bps: u32) -> Result<MfAacEncoder, EncodeError> {
        MfAacEncoder::new(sample_rate, channel_count, bitrate_bps)
    }

    fn open_writer(&self, path: &Path) -> Result<M4aWriter, WriteError> {
        M4aWriter::create(path)
    }
}
