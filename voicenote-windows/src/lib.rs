//! # voicenote-windows
//!
//! Windows backend for the voicenote capture engine.
//!
//! Provides:
//! - `WindowsBackend`: `CaptureBackend` wiring the pieces below to `M4aWriter`
//! - `WasapiCapture`: shared-mode microphone capture with 16-bit PCM conversion,
//!   plus per-stream AGC and noise suppression where the engine offers them
//! - `MfAacEncoder`: AAC-LC through the Media Foundation encoder MFT
//! - `DeviceEnumerator`: capture endpoint listing via MMDevice API
//! - `permissions`: Windows microphone privacy check
//!
//! ## Platform Requirements
//! - Windows 10+ with the Media Foundation AAC encoder (absent on "N" editions
//!   without the Media Feature Pack)
//! - Visual Studio Build Tools 2022 + Windows SDK for linking
//!
//! ## Usage
//! ```ignore
//! use voicenote_core::{SessionConfig, SessionController};
//! use voicenote_windows::WindowsBackend;
//!
//! let mut controller = SessionController::new(WindowsBackend::new());
//! let handle = controller.start(SessionConfig::new("note.m4a"))?;
//! // ...
//! let state = controller.stop(&handle);
//! ```

#[cfg(target_os = "windows")]
mod com;

#[cfg(target_os = "windows")]
pub mod backend;
#[cfg(target_os = "windows")]
pub mod device_enumerator;
#[cfg(target_os = "windows")]
pub mod mf_aac_encoder;
#[cfg(target_os = "windows")]
pub mod permissions;
#[cfg(target_os = "windows")]
mod stream_effects;
#[cfg(target_os = "windows")]
pub mod wasapi_capture;

#[cfg(target_os = "windows")]
pub use backend::WindowsBackend;
#[cfg(target_os = "windows")]
pub use device_enumerator::{DeviceEnumerator, InputDevice, Transport};
#[cfg(target_os = "windows")]
pub use mf_aac_encoder::MfAacEncoder;
#[cfg(target_os = "windows")]
pub use wasapi_capture::WasapiCapture;
