//! Windows microphone privacy check.
//!
//! Microphone access for desktop apps is governed by Settings > Privacy >
//! Microphone. There is no consent prompt for unpackaged apps, so the only
//! way to know is to try activating the default capture endpoint.

use windows::core::*;
use windows::Win32::Foundation::E_ACCESSDENIED;
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::*;

use voicenote_core::models::error::CaptureError;

use crate::com::CoUninitializeGuard;

/// Whether a session could open the microphone right now.
///
/// `Ok(false)` when there is no capture endpoint, access is denied in the
/// privacy settings, or another app holds the device exclusively.
pub fn check_microphone_permission() -> std::result::Result<bool, CaptureError> {
    unsafe {
        CoInitializeEx(None, COINIT_MULTITHREADED)
            .ok()
            .map_err(|e| CaptureError::ReadFailed(format!("CoInitializeEx failed: {}", e)))?;
        let _com_guard = CoUninitializeGuard;

        let enumerator: IMMDeviceEnumerator = CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)
            .map_err(|e| CaptureError::ReadFailed(format!("failed to create enumerator: {}", e)))?;

        let Ok(device) = enumerator.GetDefaultAudioEndpoint(eCapture, eConsole) else {
            log::info!("no capture endpoint present");
            return Ok(false);
        };

        match device.Activate::<IAudioClient>(CLSCTX_ALL, None) {
            Ok(_) => Ok(true),
            Err(e) if e.code() == E_ACCESSDENIED || e.code() == AUDCLNT_E_DEVICE_IN_USE => {
                log::info!("microphone blocked: {}", e);
                Ok(false)
            }
            Err(e) => {
                log::warn!("unexpected error checking microphone access: {}", e);
                Ok(true)
            }
        }
    }
}
