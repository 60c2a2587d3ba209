use super::error::SessionError;
use super::recording_result::RecordingResult;

/// Session controller state machine.
///
/// State transitions:
/// ```text
/// idle → starting → capturing → stopping → closed
///           ↓           ↓           ↓
///         failed      failed     failed / detached
/// ```
///
/// `Closed`, `Failed` and `Detached` are terminal for the session; the
/// controller accepts a new `start` from any of them.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Idle,
    Starting,
    Capturing { duration_secs: f64 },
    Stopping,
    Closed(Box<RecordingResult>),
    Failed(SessionError),
    /// The worker did not exit within the stop timeout; it still owns its
    /// resources and releases them when it returns.
    Detached,
}

impl SessionState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_capturing(&self) -> bool {
        matches!(self, Self::Capturing { .. })
    }

    /// A session in this state blocks a new `start`.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Starting | Self::Capturing { .. } | Self::Stopping)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed(_) | Self::Failed(_) | Self::Detached)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Capturing { .. } => "capturing",
            Self::Stopping => "stopping",
            Self::Closed(_) => "closed",
            Self::Failed(_) => "failed",
            Self::Detached => "detached",
        }
    }

    pub fn duration(&self) -> Option<f64> {
        match self {
            Self::Capturing { duration_secs } => Some(*duration_secs),
            Self::Closed(result) => Some(result.duration_secs),
            _ => None,
        }
    }
}
