use crate::models::audio_models::AudioLevels;
use crate::models::error::SessionError;
use crate::models::recording_result::RecordingResult;
use crate::models::state::SessionState;

/// Event delegate for session notifications.
///
/// State changes are reported from the thread calling the controller; levels,
/// runtime errors and the finished recording are reported from the capture
/// worker. Implementations should marshal to a UI thread if needed.
pub trait SessionDelegate: Send + Sync {
    fn on_state_changed(&self, state: &SessionState);

    /// Called once per processed block, after gain.
    fn on_levels_updated(&self, _levels: &AudioLevels) {}

    /// Called when the worker hits a runtime fatal error.
    fn on_error(&self, error: &SessionError);

    /// Called when the container has been finalized.
    fn on_recording_finished(&self, result: &RecordingResult);
}
