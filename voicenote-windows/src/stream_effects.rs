//! Per-stream AGC and noise suppression through `IAudioEffectsManager`.
//!
//! Windows 11 22H2 and later list the effects the audio engine applies to a
//! stream and let clients switch the settable ones. Older systems do not
//! expose the interface, which leaves both slots empty.

use windows::core::*;
use windows::Win32::Media::Audio::*;
use windows::Win32::Media::KernelStreaming::{
    AUDIO_EFFECT_TYPE_AUTOMATIC_GAIN_CONTROL, AUDIO_EFFECT_TYPE_NOISE_SUPPRESSION,
};
use windows::Win32::System::Com::CoTaskMemFree;

use voicenote_core::traits::capture_source::{AudioEffect, EffectHandles};

/// Enable AGC and noise suppression on the stream owned by `client`.
pub(crate) fn attach(client: &IAudioClient) -> EffectHandles {
    let manager: IAudioEffectsManager = match unsafe { client.GetService() } {
        Ok(manager) => manager,
        Err(e) => {
            log::debug!("stream effects unavailable: {}", e);
            return EffectHandles::none();
        }
    };
    let available = match unsafe { list_effects(&manager) } {
        Ok(effects) => effects,
        Err(e) => {
            log::debug!("failed to list stream effects: {}", e);
            return EffectHandles::none();
        }
    };

    EffectHandles {
        gain_control: StreamEffect::enable(&manager, &available, AUDIO_EFFECT_TYPE_AUTOMATIC_GAIN_CONTROL, "agc"),
        noise_suppressor: StreamEffect::enable(&manager, &available, AUDIO_EFFECT_TYPE_NOISE_SUPPRESSION, "ns"),
    }
}

/// One effect switched on for this stream; `release` switches it back off.
struct StreamEffect {
    name: &'static str,
    id: GUID,
    manager: IAudioEffectsManager,
}

// SAFETY: The effects manager is an MTA object, and every thread that
// releases effects (the opening thread or the session worker) has joined
// the MTA through the capture source.
unsafe impl Send for StreamEffect {}

impl StreamEffect {
    fn enable(
        manager: &IAudioEffectsManager,
        available: &[AUDIO_EFFECT],
        id: GUID,
        name: &'static str,
    ) -> Option<Box<dyn AudioEffect>> {
        if !is_settable(available, id) {
            log::debug!("stream effect {} not offered", name);
            return None;
        }
        if let Err(e) = unsafe { manager.SetAudioEffectState(id, AUDIO_EFFECT_STATE_ON) } {
            log::warn!("failed to enable stream effect {}: {}", name, e);
            return None;
        }
        Some(Box::new(StreamEffect {
            name,
            id,
            manager: manager.clone(),
        }))
    }
}

impl AudioEffect for StreamEffect {
    fn name(&self) -> &str {
        self.name
    }

    fn release(&mut self) {
        if let Err(e) = unsafe { self.manager.SetAudioEffectState(self.id, AUDIO_EFFECT_STATE_OFF) } {
            log::debug!("failed to disable stream effect {}: {}", self.name, e);
        }
    }
}

fn is_settable(available: &[AUDIO_EFFECT], id: GUID) -> bool {
    available
        .iter()
        .any(|effect| effect.id == id && effect.canSetState.as_bool())
}

/// Copy the engine's effect list out of its CoTaskMem allocation.
unsafe fn list_effects(manager: &IAudioEffectsManager) -> Result<Vec<AUDIO_EFFECT>> {
    let mut effects: *mut AUDIO_EFFECT = std::ptr::null_mut();
    let mut count: u32 = 0;
    manager.GetAudioEffects(&mut effects, &mut count)?;
    if effects.is_null() {
        return Ok(Vec::new());
    }
    let list = std::slice::from_raw_parts(effects, count as usize).to_vec();
    CoTaskMemFree(Some(effects as *const _));
    Ok(list)
}
