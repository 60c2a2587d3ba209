use std::path::PathBuf;

use crate::models::audio_models::{EncodedUnit, OutputFormat, TrackHandle};
use crate::models::error::WriteError;

/// A finished container file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizedFile {
    pub path: PathBuf,
    pub checksum: String,
    pub units_written: u64,
    pub bytes_written: u64,
}

/// Muxes encoded access units of a single audio track into a container file.
///
/// Opened by a `CaptureBackend` (which creates the destination), then owned by
/// the capture worker thread.
pub trait ContainerWriter: Send {
    /// Register the audio track from the encoder's negotiated format.
    ///
    /// Valid exactly once. A second call yields `WriteError::TrackNotReady`.
    fn add_track(&mut self, format: &OutputFormat) -> Result<TrackHandle, WriteError>;

    /// Append one access unit. Before `add_track`, or with a handle this
    /// writer did not issue, yields `WriteError::TrackNotReady`.
    ///
    /// Timestamps must be non-decreasing; ordering is the caller's job.
    fn write_unit(&mut self, track: TrackHandle, unit: &EncodedUnit) -> Result<(), WriteError>;

    /// Write the trailing index and close the file.
    ///
    /// Returns `Ok(None)` without producing a file when no track was ever
    /// registered, and on every call after the first.
    fn finalize(&mut self) -> Result<Option<FinalizedFile>, WriteError>;

    /// Abandon the output, removing anything written so far. Idempotent, and
    /// a no-op after a successful `finalize`.
    fn discard(&mut self);
}
