use std::sync::atomic::{AtomicBool, Ordering};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::models::audio_models::AudioLevels;
use crate::models::config::SessionConfig;
use crate::models::error::SessionError;
use crate::models::recording_result::RecordingResult;
use crate::models::state::SessionState;
use crate::traits::backend::CaptureBackend;
use crate::traits::session_delegate::SessionDelegate;

use super::pipeline::Pipeline;
use super::worker::{self, SessionTelemetry, WorkerContext};

const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Identifies one started session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    id: String,
}

impl SessionHandle {
    fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

struct ActiveSession {
    handle: SessionHandle,
    config: SessionConfig,
    stop: Arc<AtomicBool>,
    telemetry: Arc<SessionTelemetry>,
    worker: thread::JoinHandle<Result<RecordingResult, SessionError>>,
}

/// A worker that outlived its stop timeout and still owns its output path.
struct DetachedSession {
    handle: SessionHandle,
    output_path: PathBuf,
    worker: thread::JoinHandle<Result<RecordingResult, SessionError>>,
}

/// Voice-note session controller.
///
/// Generic over the platform via `CaptureBackend`. Each session gets a fresh
/// capture source, encoder and container writer, all moved onto one
/// dedicated worker thread:
///
/// ```text
/// [CaptureSource] → apply_gain → [BlockEncoder] ⇢ drain ⇢ [ContainerWriter]
///                                                           (track added on
///                                                            format change)
/// ```
///
/// The controlling thread never touches those components after the spawn.
/// It only raises the stop flag and joins the worker with a bounded wait.
pub struct SessionController<B: CaptureBackend> {
    backend: B,
    state: SessionState,
    delegate: Option<Arc<dyn SessionDelegate>>,
    active: Option<ActiveSession>,
    detached: Vec<DetachedSession>,
}

impl<B: CaptureBackend> SessionController<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            state: SessionState::Idle,
            delegate: None,
            active: None,
            detached: Vec::new(),
        }
    }

    pub fn set_delegate(&mut self, delegate: Arc<dyn SessionDelegate>) {
        self.delegate = Some(delegate);
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Last state observed by the controller. See `poll_state` to pick up a
    /// worker that ended on its own.
    pub fn state(&self) -> SessionState {
        self.state.clone()
    }

    pub fn active_session(&self) -> Option<&SessionHandle> {
        self.active.as_ref().map(|active| &active.handle)
    }

    /// Seconds of audio handed to the encoder in the active session.
    pub fn elapsed_secs(&self) -> f64 {
        self.active.as_ref().map_or(0.0, |active| {
            active.telemetry.frames.load(Ordering::Relaxed) as f64 / active.config.sample_rate as f64
        })
    }

    pub fn current_levels(&self) -> AudioLevels {
        self.active
            .as_ref()
            .map(|active| *active.telemetry.levels.lock())
            .unwrap_or_default()
    }

    /// Start a new session. Transitions: idle/closed/failed → starting → capturing.
    ///
    /// Opens capture, effects, encoder and writer on the calling thread; any
    /// failure there releases what was already opened and is returned here,
    /// before a worker exists. An output path that a detached session has not
    /// yet finalized is refused with `SessionError::OutputInUse`.
    pub fn start(&mut self, config: SessionConfig) -> Result<SessionHandle, SessionError> {
        self.poll_state();
        if self.state.is_active() {
            return Err(SessionError::AlreadyActive);
        }
        config.validate().map_err(SessionError::InvalidConfig)?;
        self.reap_detached();
        if self.detached.iter().any(|d| d.output_path == config.output_path) {
            return Err(SessionError::OutputInUse(config.output_path.display().to_string()));
        }

        self.set_state(SessionState::Starting);
        match self.spawn_session(config) {
            Ok(handle) => {
                log::info!("session {} capturing", handle.id());
                self.set_state(SessionState::Capturing { duration_secs: 0.0 });
                Ok(handle)
            }
            Err(e) => {
                log::error!("failed to start session: {}", e);
                self.set_state(SessionState::Failed(e.clone()));
                Err(e)
            }
        }
    }

    /// Stop whatever session is active, then start a new one.
    pub fn restart(&mut self, config: SessionConfig) -> Result<SessionHandle, SessionError> {
        if let Some(handle) = self.active_session().cloned() {
            self.stop(&handle);
        }
        self.start(config)
    }

    /// Stop the session and wait for the worker to finalize and release.
    /// Transitions: capturing → stopping → closed / failed / detached.
    ///
    /// Never fails. Returns the terminal state of the session; calling it again
    /// (or with a handle that is no longer active) returns the current state
    /// without side effects.
    pub fn stop(&mut self, handle: &SessionHandle) -> SessionState {
        let Some(active) = self.active.take_if(|active| active.handle == *handle) else {
            log::debug!("stop ignored: session {} is not active", handle.id());
            return self.state.clone();
        };

        self.set_state(SessionState::Stopping);
        active.stop.store(true, Ordering::Release);

        let deadline = Instant::now() + active.config.stop_timeout();
        while !active.worker.is_finished() {
            if Instant::now() >= deadline {
                log::warn!(
                    "session {} worker did not exit within {} ms; detaching, it releases its resources on exit",
                    active.handle.id(),
                    active.config.stop_timeout_ms
                );
                self.detached.push(DetachedSession {
                    handle: active.handle,
                    output_path: active.config.output_path,
                    worker: active.worker,
                });
                self.set_state(SessionState::Detached);
                return self.state.clone();
            }
            thread::sleep(JOIN_POLL_INTERVAL);
        }

        self.finish(active)
    }

    /// Refresh the state: reap a worker that ended on its own and update the
    /// capturing duration.
    pub fn poll_state(&mut self) -> SessionState {
        if let Some(active) = self.active.take_if(|active| active.worker.is_finished()) {
            return self.finish(active);
        }
        if let (Some(active), SessionState::Capturing { duration_secs }) = (&self.active, &mut self.state) {
            *duration_secs = active.telemetry.frames.load(Ordering::Relaxed) as f64 / active.config.sample_rate as f64;
        }
        self.state.clone()
    }

    fn spawn_session(&mut self, config: SessionConfig) -> Result<SessionHandle, SessionError> {
        let pipeline = Pipeline::open(&self.backend, &config)?;

        let handle = SessionHandle::new();
        let stop = Arc::new(AtomicBool::new(false));
        let telemetry = Arc::new(SessionTelemetry::default());
        let ctx = WorkerContext {
            session_id: handle.id().to_string(),
            config: config.clone(),
            stop: Arc::clone(&stop),
            telemetry: Arc::clone(&telemetry),
            delegate: self.delegate.clone(),
        };

        // On spawn failure the closure, and the pipeline in it, is dropped,
        // which releases every component.
        let worker = thread::Builder::new()
            .name("voicenote-capture".into())
            .spawn(move || worker::run(pipeline, ctx))
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;

        self.active = Some(ActiveSession {
            handle: handle.clone(),
            config,
            stop,
            telemetry,
            worker,
        });
        Ok(handle)
    }

    /// Join detached workers that have exited since they were let go.
    fn reap_detached(&mut self) {
        let (finished, running): (Vec<_>, Vec<_>) = std::mem::take(&mut self.detached)
            .into_iter()
            .partition(|d| d.worker.is_finished());
        self.detached = running;

        for session in finished {
            match session.worker.join() {
                Ok(Ok(_)) => log::info!("detached session {} finished", session.handle.id()),
                Ok(Err(e)) => log::warn!("detached session {} failed: {}", session.handle.id(), e),
                Err(_) => log::error!("detached session {} worker panicked", session.handle.id()),
            }
        }
    }

    fn finish(&mut self, active: ActiveSession) -> SessionState {
        let state = match active.worker.join() {
            Ok(Ok(result)) => SessionState::Closed(Box::new(result)),
            Ok(Err(e)) => SessionState::Failed(e),
            Err(_) => {
                log::error!("session {} worker panicked", active.handle.id());
                SessionState::Failed(SessionError::WorkerPanicked)
            }
        };
        self.set_state(state.clone());
        state
    }

    fn set_state(&mut self, new_state: SessionState) {
        log::debug!("session state: {} → {}", self.state.name(), new_state.name());
        self.state = new_state;
        if let Some(ref delegate) = self.delegate {
            delegate.on_state_changed(&self.state);
        }
    }
}

impl<B: CaptureBackend> Drop for SessionController<B> {
    fn drop(&mut self) {
        if let Some(handle) = self.active_session().cloned() {
            log::debug!("controller dropped with session {} active; stopping it", handle.id());
            self.stop(&handle);
        }
    }
}
