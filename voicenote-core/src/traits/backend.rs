use std::path::Path;

use crate::models::audio_models::InputMode;
use crate::models::error::{CaptureError, EncodeError, WriteError};
use crate::traits::block_encoder::BlockEncoder;
use crate::traits::capture_source::CaptureSource;
use crate::traits::container_writer::ContainerWriter;

/// Factory for the per-session components of one platform.
///
/// Implemented by:
/// - `WindowsBackend` (WASAPI capture, Media Foundation AAC, `M4aWriter`)
/// - scripted backends in the session tests
pub trait CaptureBackend: Send + Sync + 'static {
    type Source: CaptureSource + 'static;
    type Encoder: BlockEncoder + 'static;
    type Writer: ContainerWriter + 'static;

    /// Open the input in one specific mode.
    fn open_source(&self, mode: InputMode, sample_rate: u32, channel_count: u16)
        -> Result<Self::Source, CaptureError>;

    /// Create a running AAC-LC encoder at a constant bitrate.
    fn configure_encoder(&self, sample_rate: u32, channel_count: u16, bitrate_bps: u32)
        -> Result<Self::Encoder, EncodeError>;

    /// Create the destination container.
    fn open_writer(&self, path: &Path) -> Result<Self::Writer, WriteError>;
}

/// Open capture using the first input mode that initializes.
///
/// Tries `InputMode::PRIORITY` in order and fails with
/// `CaptureError::DeviceUnavailable` only when every mode fails.
pub fn open_capture_source<B: CaptureBackend>(
    backend: &B,
    sample_rate: u32,
    channel_count: u16,
) -> Result<(B::Source, InputMode), CaptureError> {
    for mode in InputMode::PRIORITY {
        match backend.open_source(mode, sample_rate, channel_count) {
            Ok(source) => {
                log::info!("capture opened in {} mode", mode.name());
                return Ok((source, mode));
            }
            Err(e) => log::warn!("capture mode {} unavailable: {}", mode.name(), e),
        }
    }
    Err(CaptureError::DeviceUnavailable)
}
