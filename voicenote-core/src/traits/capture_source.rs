use crate::models::error::CaptureError;

/// A hardware-backed input channel opened at a fixed sample rate and channel count.
///
/// Created by a `CaptureBackend` and then owned exclusively by the capture
/// worker thread.
pub trait CaptureSource: Send {
    /// Best-effort attach of automatic gain control and noise suppression to
    /// this input's hardware session. Never fails; absent effects are simply
    /// missing from the returned handles.
    fn attach_effects(&mut self) -> EffectHandles {
        EffectHandles::none()
    }

    /// Blocking read of the next contiguous run of interleaved samples into `buffer`.
    ///
    /// Returns the number of samples filled, which may end partway through a
    /// frame; the rest of that frame is expected at the start of the next
    /// read. `Ok(0)` means nothing arrived in time and the caller should
    /// retry; the worker turns a long streak of empty reads into
    /// `CaptureError::DeviceStalled`. After `close` this returns
    /// `CaptureError::Released`.
    fn read_block(&mut self, buffer: &mut [i16]) -> Result<usize, CaptureError>;

    /// Stop the stream and release OS resources. Idempotent.
    fn close(&mut self);
}

/// An optional capture enhancement bound to the input's session.
pub trait AudioEffect: Send {
    fn name(&self) -> &str;

    /// Disable and release the effect. Called at most once.
    fn release(&mut self);
}

/// Effects attached to a capture source. Either slot may be empty.
#[derive(Default)]
pub struct EffectHandles {
    pub gain_control: Option<Box<dyn AudioEffect>>,
    pub noise_suppressor: Option<Box<dyn AudioEffect>>,
}

impl EffectHandles {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.gain_control.is_none() && self.noise_suppressor.is_none()
    }

    pub fn names(&self) -> Vec<String> {
        [&self.gain_control, &self.noise_suppressor]
            .into_iter()
            .flatten()
            .map(|effect| effect.name().to_string())
            .collect()
    }

    /// Release every attached effect. Idempotent.
    pub fn release(&mut self) {
        for slot in [&mut self.gain_control, &mut self.noise_suppressor] {
            if let Some(mut effect) = slot.take() {
                log::debug!("releasing capture effect {}", effect.name());
                effect.release();
            }
        }
    }
}

impl std::fmt::Debug for EffectHandles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectHandles").field("attached", &self.names()).finish()
    }
}
