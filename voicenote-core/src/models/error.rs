use thiserror::Error;

/// Errors raised by a capture source.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// Every input mode failed to initialize (missing permission, device busy, no device).
    #[error("capture device not available")]
    DeviceUnavailable,

    #[error("capture device stalled after {empty_reads} consecutive empty reads")]
    DeviceStalled { empty_reads: u32 },

    #[error("capture source already released")]
    Released,

    #[error("capture read failed: {0}")]
    ReadFailed(String),
}

/// Errors raised by a block encoder.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("unsupported encoder configuration: {0}")]
    UnsupportedConfig(String),

    #[error("encoder is in the wrong state: {0}")]
    InvalidState(&'static str),

    #[error("encoder did not accept input after {attempts} attempts")]
    InputStalled { attempts: u32 },

    #[error("encoder did not reach end of stream after {polls} polls")]
    DrainTimedOut { polls: u32 },

    #[error("codec failure: {0}")]
    CodecFailure(String),
}

/// Errors raised by a container writer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WriteError {
    #[error("cannot create output file: {0}")]
    CannotCreate(String),

    /// A unit was written before `add_track`, or `add_track` was called twice.
    #[error("track not ready")]
    TrackNotReady,

    #[error("container already finalized")]
    Finalized,

    #[error("container i/o error: {0}")]
    Io(String),
}

/// Errors surfaced to the caller of the session controller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("a session is already active")]
    AlreadyActive,

    #[error("invalid session configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Write(#[from] WriteError),

    /// The session ended before the encoder produced any output.
    #[error("nothing was recorded")]
    NothingRecorded,

    #[error("capture worker panicked")]
    WorkerPanicked,

    #[error("failed to spawn capture worker: {0}")]
    SpawnFailed(String),

    /// A detached session is still writing to the requested output path.
    #[error("output path is still in use by a detached session: {0}")]
    OutputInUse(String),
}

impl SessionError {
    /// Setup errors are reported synchronously by `start` before any worker exists.
    pub fn is_setup_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig(_)
                | Self::Capture(CaptureError::DeviceUnavailable)
                | Self::Encode(EncodeError::UnsupportedConfig(_))
                | Self::Write(WriteError::CannotCreate(_))
                | Self::SpawnFailed(_)
                | Self::OutputInUse(_)
        )
    }
}
