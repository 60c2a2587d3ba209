//! Capture endpoint listing via the MMDevice API.
//!
//! Lets the caller pick a microphone by id and spot Bluetooth hands-free
//! endpoints, which cap capture at 8 or 16 kHz.

use windows::Win32::Devices::FunctionDiscovery::*;
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::*;

use voicenote_core::models::error::CaptureError;

use crate::com::ensure_mta;

/// How an input endpoint is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    BuiltIn,
    Usb,
    Bluetooth,
    BluetoothLE,
    Unknown,
}

/// An active capture endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputDevice {
    pub id: String,
    pub name: String,
    pub is_default: bool,
    pub is_default_communications: bool,
    pub transport: Transport,
}

impl InputDevice {
    /// Bluetooth hands-free endpoints run at telephony rates and are a poor
    /// fit for 44.1 kHz voice notes.
    pub fn is_bluetooth_hfp(&self) -> bool {
        let id_lower = self.id.to_lowercase();
        self.transport == Transport::Bluetooth || id_lower.contains("bthenum") || id_lower.contains("bluetooth")
    }
}

pub struct DeviceEnumerator {
    enumerator: IMMDeviceEnumerator,
}

impl DeviceEnumerator {
    pub fn new() -> std::result::Result<Self, CaptureError> {
        ensure_mta().map_err(|e| CaptureError::ReadFailed(format!("CoInitializeEx failed: {}", e)))?;
        unsafe {
            let enumerator: IMMDeviceEnumerator = CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)
                .map_err(|e| CaptureError::ReadFailed(format!("failed to create enumerator: {}", e)))?;
            Ok(Self { enumerator })
        }
    }

    /// List active capture endpoints, defaults first.
    pub fn list_input_devices(&self) -> std::result::Result<Vec<InputDevice>, CaptureError> {
        unsafe {
            let collection = self
                .enumerator
                .EnumAudioEndpoints(eCapture, DEVICE_STATE_ACTIVE)
                .map_err(|e| CaptureError::ReadFailed(format!("EnumAudioEndpoints failed: {}", e)))?;
            let count = collection
                .GetCount()
                .map_err(|e| CaptureError::ReadFailed(format!("GetCount failed: {}", e)))?;

            let default_console = self.default_id(eConsole);
            let default_communications = self.default_id(eCommunications);

            let mut devices = Vec::new();
            for i in 0..count {
                let Ok(device) = collection.Item(i) else { continue };
                let Some(id) = device.GetId().ok().and_then(|id| id.to_string().ok()) else {
                    continue;
                };
                let store = device.OpenPropertyStore(STGM_READ).ok();
                let name = store
                    .as_ref()
                    .and_then(|s| s.GetValue(&PKEY_Device_FriendlyName).ok())
                    .map(|value| value.to_string())
                    .filter(|name| !name.is_empty())
                    .unwrap_or_else(|| format!("Input {}", i));
                let enumerator_name = store
                    .as_ref()
                    .and_then(|s| s.GetValue(&PKEY_Device_EnumeratorName).ok())
                    .map(|value| value.to_string());
                let transport = detect_transport(enumerator_name.as_deref());

                devices.push(InputDevice {
                    is_default: default_console.as_deref() == Some(id.as_str()),
                    is_default_communications: default_communications.as_deref() == Some(id.as_str()),
                    id,
                    name,
                    transport,
                });
            }

            devices.sort_by_key(|d| !(d.is_default || d.is_default_communications));
            Ok(devices)
        }
    }

    fn default_id(&self, role: ERole) -> Option<String> {
        unsafe {
            self.enumerator
                .GetDefaultAudioEndpoint(eCapture, role)
                .ok()
                .and_then(|d| d.GetId().ok())
                .and_then(|id| id.to_string().ok())
        }
    }
}

fn detect_transport(enumerator_name: Option<&str>) -> Transport {
    match enumerator_name {
        Some(name) if name.contains("BTHLEENUM") => Transport::BluetoothLE,
        Some(name) if name.contains("BTHENUM") => Transport::Bluetooth,
        Some(name) if name.contains("USB") => Transport::Usb,
        Some("") | None => Transport::Unknown,
        Some(_) => Transport::BuiltIn,
    }
}
