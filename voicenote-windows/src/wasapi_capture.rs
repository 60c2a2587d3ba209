//! WASAPI microphone capture source.
//!
//! Opens a capture endpoint in shared mode and asks the audio engine to
//! convert to 16-bit PCM at the session's rate and channel count.
//! Packets delivered by the device are parked in a `RingBuffer` until the
//! worker asks for the next block.

use std::thread;
use std::time::{Duration, Instant};

use windows::core::*;
use windows::Win32::Foundation::HANDLE;
use windows::Win32::Media::Audio::*;
use windows::Win32::System::Com::*;
use windows::Win32::System::Threading::*;

use voicenote_core::models::audio_models::InputMode;
use voicenote_core::models::error::CaptureError;
use voicenote_core::processing::ring_buffer::RingBuffer;
use voicenote_core::traits::capture_source::{CaptureSource, EffectHandles};

use crate::com::ensure_mta;
use crate::stream_effects;

/// Shared-mode buffer duration: 100ms in 100-nanosecond units.
const BUFFER_DURATION_HNS: i64 = 1_000_000;

/// Longest a single `read_block` waits for the device.
const READ_TIMEOUT: Duration = Duration::from_millis(200);

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// WASAPI microphone capture.
///
/// In `VoiceCommunication` mode the default communications endpoint is used
/// and the stream is tagged with the communications category, which lets the
/// endpoint's own voice processing run. `attach_effects` additionally
/// switches on the stream's AGC and noise suppression where the audio engine
/// offers them.
pub struct WasapiCapture {
    stream: Option<Stream>,
    pending: RingBuffer,
    mmcss: Option<HANDLE>,
    channels: usize,
    reported_drops: u64,
}

struct Stream {
    client: IAudioClient,
    capture: IAudioCaptureClient,
}

// SAFETY: The COM objects live in the multithreaded apartment; every thread
// that touches them (the opening thread and the session worker) joins the
// MTA first. The source is owned by exactly one thread at a time.
unsafe impl Send for WasapiCapture {}

impl WasapiCapture {
    /// Open and start a capture stream.
    ///
    /// `device_id` selects a specific endpoint; otherwise the default capture
    /// endpoint for the mode's role is used.
    pub fn open(
        device_id: Option<&str>,
        mode: InputMode,
        sample_rate: u32,
        channel_count: u16,
    ) -> std::result::Result<Self, CaptureError> {
        let stream = open_stream(device_id, mode, sample_rate, channel_count).map_err(|e| {
            log::warn!("WASAPI {} open failed: {}", mode.name(), e);
            CaptureError::DeviceUnavailable
        })?;

        let channels = channel_count as usize;
        Ok(Self {
            stream: Some(stream),
            // One second of headroom between reads.
            pending: RingBuffer::new(sample_rate as usize, channel_count),
            mmcss: None,
            channels,
            reported_drops: 0,
        })
    }

    /// Raise the reading thread to MMCSS "Audio" priority, once.
    fn prepare_reader_thread(&mut self) -> std::result::Result<(), CaptureError> {
        if self.mmcss.is_some() {
            return Ok(());
        }
        ensure_mta().map_err(|e| CaptureError::ReadFailed(format!("CoInitializeEx failed: {}", e)))?;
        let mut task_index: u32 = 0;
        match unsafe { AvSetMmThreadCharacteristicsW(w!("Audio"), &mut task_index) } {
            Ok(handle) => self.mmcss = Some(handle),
            Err(e) => {
                log::debug!("MMCSS registration failed: {}", e);
                self.mmcss = Some(HANDLE::default());
            }
        }
        Ok(())
    }
}

impl CaptureSource for WasapiCapture {
    fn attach_effects(&mut self) -> EffectHandles {
        match self.stream.as_ref() {
            Some(stream) => stream_effects::attach(&stream.client),
            None => EffectHandles::none(),
        }
    }

    fn read_block(&mut self, buffer: &mut [i16]) -> std::result::Result<usize, CaptureError> {
        if self.stream.is_none() {
            return Err(CaptureError::Released);
        }
        self.prepare_reader_thread()?;

        let wanted = buffer.len() - buffer.len() % self.channels;
        let deadline = Instant::now() + READ_TIMEOUT;
        loop {
            let stream = self.stream.as_ref().ok_or(CaptureError::Released)?;
            stream.drain_packets(&mut self.pending, self.channels)?;
            if self.pending.len() >= wanted || Instant::now() >= deadline {
                break;
            }
            thread::sleep(POLL_INTERVAL);
        }

        let dropped = self.pending.dropped_frames();
        if dropped > self.reported_drops {
            log::warn!(
                "capture overrun: {} frames dropped ({} frames buffered at most)",
                dropped - self.reported_drops,
                self.pending.capacity_frames()
            );
            self.reported_drops = dropped;
        }
        Ok(self.pending.pop_into(&mut buffer[..wanted]))
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            unsafe {
                let _ = stream.client.Stop();
            }
            log::debug!("WASAPI capture closed");
        }
        self.pending.clear();
        if let Some(handle) = self.mmcss.take().filter(|h| !h.is_invalid()) {
            unsafe {
                let _ = AvRevertMmThreadCharacteristics(handle);
            }
        }
    }
}

impl Drop for WasapiCapture {
    fn drop(&mut self) {
        self.close();
    }
}

impl Stream {
    /// Move every packet the device has ready into `pending`.
    fn drain_packets(&self, pending: &mut RingBuffer, channels: usize) -> std::result::Result<(), CaptureError> {
        unsafe {
            loop {
                let packet_frames = self.capture.GetNextPacketSize().map_err(read_failed)?;
                if packet_frames == 0 {
                    return Ok(());
                }

                let mut data: *mut u8 = std::ptr::null_mut();
                let mut frames: u32 = 0;
                let mut flags: u32 = 0;
                self.capture
                    .GetBuffer(&mut data, &mut frames, &mut flags, None, None)
                    .map_err(read_failed)?;

                let samples = frames as usize * channels;
                if flags & (AUDCLNT_BUFFERFLAGS_SILENT.0 as u32) != 0 || data.is_null() {
                    pending.push(&vec![0i16; samples]);
                } else {
                    // AUTOCONVERTPCM guarantees the requested 16-bit layout.
                    pending.push(std::slice::from_raw_parts(data as *const i16, samples));
                }

                self.capture.ReleaseBuffer(frames).map_err(read_failed)?;
            }
        }
    }
}

fn read_failed(e: Error) -> CaptureError {
    CaptureError::ReadFailed(e.to_string())
}

/// Sequence:
/// 1. Join the MTA
/// 2. Resolve the endpoint (by id, or the default for the mode's role)
/// 3. Activate IAudioClient, tag the stream category
/// 4. Initialize shared with 16-bit PCM conversion
/// 5. Get IAudioCaptureClient, start
fn open_stream(device_id: Option<&str>, mode: InputMode, sample_rate: u32, channel_count: u16) -> Result<Stream> {
    ensure_mta()?;
    unsafe {
        let enumerator: IMMDeviceEnumerator = CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)?;
        let device = match device_id {
            Some(id) => {
                let wide_id: Vec<u16> = id.encode_utf16().chain(std::iter::once(0)).collect();
                enumerator.GetDevice(PCWSTR(wide_id.as_ptr()))?
            }
            None => {
                let role = match mode {
                    InputMode::VoiceCommunication => eCommunications,
                    InputMode::Microphone => eConsole,
                };
                enumerator.GetDefaultAudioEndpoint(eCapture, role)?
            }
        };

        let client: IAudioClient = device.Activate(CLSCTX_ALL, None)?;
        if mode == InputMode::VoiceCommunication {
            set_communications_category(&client);
        }

        let block_align = channel_count * 2;
        let format = WAVEFORMATEX {
            wFormatTag: WAVE_FORMAT_PCM as u16,
            nChannels: channel_count,
            nSamplesPerSec: sample_rate,
            nAvgBytesPerSec: sample_rate * block_align as u32,
            nBlockAlign: block_align,
            wBitsPerSample: 16,
            cbSize: 0,
        };

        client.Initialize(
            AUDCLNT_SHAREMODE_SHARED,
            AUDCLNT_STREAMFLAGS_AUTOCONVERTPCM
                | AUDCLNT_STREAMFLAGS_SRC_DEFAULT_QUALITY
                | AUDCLNT_STREAMFLAGS_NOPERSIST,
            BUFFER_DURATION_HNS,
            0,
            &format,
            None,
        )?;

        let capture: IAudioCaptureClient = client.GetService()?;
        client.Start()?;
        log::info!("WASAPI capture started: {} Hz, {} ch, {}", sample_rate, channel_count, mode.name());
        Ok(Stream { client, capture })
    }
}

/// Best-effort: mark the stream as communications audio so the endpoint
/// applies its voice processing.
unsafe fn set_communications_category(client: &IAudioClient) {
    let properties = AudioClientProperties {
        cbSize: std::mem::size_of::<AudioClientProperties>() as u32,
        bIsOffload: false.into(),
        eCategory: AudioCategory_Communications,
        Options: AUDCLNT_STREAMOPTIONS_NONE,
    };
    let tagged = client
        .cast::<IAudioClient2>()
        .and_then(|client2| client2.SetClientProperties(&properties));
    if let Err(e) = tagged {
        log::debug!("communications category not applied: {}", e);
    }
}
