//! # voicenote-core
//!
//! Platform-agnostic voice-note capture engine.
//!
//! Owns the recording lifecycle (start, stop, restart), the per-block gain
//! stage, the encoder handoff with its retry and drain rules, and the M4A
//! container writer. Platform backends (Windows WASAPI + Media Foundation)
//! implement `CaptureBackend` and plug into the generic `SessionController`.
//!
//! ## Architecture
//!
//! ```text
//! voicenote-core (this crate)
//! ├── traits/       ← CaptureBackend, CaptureSource, BlockEncoder, ContainerWriter, SessionDelegate
//! ├── models/       ← SessionError, SessionState, SessionConfig, RecordingResult, EncodedUnit, etc.
//! ├── processing/   ← GainLevel, SampleClock, RingBuffer, level metering, MP4 box generation
//! ├── session/      ← SessionController (generic orchestrator) and its capture worker
//! └── storage/      ← M4aWriter
//! ```

pub mod models;
pub mod processing;
pub mod session;
pub mod storage;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use models::audio_models::{AudioLevels, EncodedUnit, EncoderState, InputMode, OutputFormat, TrackHandle};
pub use models::config::SessionConfig;
pub use models::error::{CaptureError, EncodeError, SessionError, WriteError};
pub use models::recording_result::{RecordingResult, SessionDiagnostics};
pub use models::state::SessionState;
pub use processing::clock::SampleClock;
pub use processing::gain::{apply_gain, GainLevel};
pub use processing::ring_buffer::RingBuffer;
pub use session::controller::{SessionController, SessionHandle};
pub use storage::m4a_writer::M4aWriter;
pub use traits::backend::CaptureBackend;
pub use traits::block_encoder::{BlockEncoder, EncoderEvent, EncoderPoll, SubmitStatus};
pub use traits::capture_source::{AudioEffect, CaptureSource, EffectHandles};
pub use traits::container_writer::{ContainerWriter, FinalizedFile};
pub use traits::session_delegate::SessionDelegate;
