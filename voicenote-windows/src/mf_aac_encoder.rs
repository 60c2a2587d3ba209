//! AAC-LC encoding through the Media Foundation AAC encoder MFT.
//!
//! The MFT is synchronous: `ProcessInput` refuses data with
//! `MF_E_NOTACCEPTING` until pending output is pulled with `ProcessOutput`,
//! which in turn reports `MF_E_TRANSFORM_NEED_MORE_INPUT` when it has nothing
//! ready. Both map onto the "try again" outcomes of `BlockEncoder`.

use std::mem::ManuallyDrop;

use windows::core::*;
use windows::Win32::Media::MediaFoundation::*;
use windows::Win32::System::Com::*;

use voicenote_core::models::audio_models::{EncodedUnit, EncoderState, OutputFormat};
use voicenote_core::models::error::EncodeError;
use voicenote_core::processing::mp4_format;
use voicenote_core::traits::block_encoder::{BlockEncoder, EncoderPoll, SubmitStatus};

use crate::com::ensure_mta;

/// PCM frames per AAC-LC access unit.
const AAC_FRAME: u32 = 1024;

/// Frames accepted per `submit`.
const INPUT_FRAMES: usize = 4096;

/// Bitrates the Microsoft AAC encoder supports, in bits per second.
const SUPPORTED_BITRATES: [u32; 4] = [96_000, 128_000, 160_000, 192_000];

/// AAC Profile L2 (AAC-LC).
const AAC_LC_PROFILE_LEVEL: u32 = 0x29;

/// Media Foundation AAC-LC encoder at a constant bitrate.
///
/// The output format is surfaced only once the first access unit exists, so
/// a session stopped before any audio was encoded never registers a track.
pub struct MfAacEncoder {
    transform: Option<IMFTransform>,
    state: EncoderState,
    format: OutputFormat,
    format_reported: bool,
    held_unit: Option<EncodedUnit>,
    end_timestamp_us: u64,
    output_buffer_size: u32,
    mf_started: bool,
}

// SAFETY: The MFT is a free-threaded object created in the MTA; the encoder
// is owned by one thread at a time and that thread joins the MTA before use.
unsafe impl Send for MfAacEncoder {}

impl MfAacEncoder {
    pub fn new(sample_rate: u32, channel_count: u16, bitrate_bps: u32) -> std::result::Result<Self, EncodeError> {
        if !matches!(sample_rate, 44100 | 48000) {
            return Err(EncodeError::UnsupportedConfig(format!(
                "AAC encoder supports 44100 or 48000 Hz, got {}",
                sample_rate
            )));
        }
        if !SUPPORTED_BITRATES.contains(&bitrate_bps) {
            return Err(EncodeError::UnsupportedConfig(format!(
                "AAC encoder supports {:?} bps, got {}",
                SUPPORTED_BITRATES, bitrate_bps
            )));
        }
        let codec_config = mp4_format::audio_specific_config(sample_rate, channel_count)
            .ok_or_else(|| EncodeError::UnsupportedConfig(format!("{} Hz, {} ch", sample_rate, channel_count)))?;

        let mut encoder = Self {
            transform: None,
            state: EncoderState::Unconfigured,
            format: OutputFormat {
                sample_rate,
                channel_count,
                bitrate_bps,
                frames_per_unit: AAC_FRAME,
                codec_config: codec_config.to_vec(),
            },
            format_reported: false,
            held_unit: None,
            end_timestamp_us: 0,
            output_buffer_size: 0,
            mf_started: false,
        };

        if let Err(e) = encoder.configure() {
            encoder.release();
            return Err(EncodeError::UnsupportedConfig(format!("AAC encoder setup failed: {}", e)));
        }
        encoder.state = EncoderState::Running;
        log::info!("AAC encoder running: {} Hz, {} ch, {} bps", sample_rate, channel_count, bitrate_bps);
        Ok(encoder)
    }

    /// Sequence:
    /// 1. MFStartup
    /// 2. Create the AAC encoder MFT
    /// 3. Output type (AAC raw, bitrate, profile), then input type (16-bit PCM)
    /// 4. Begin streaming
    fn configure(&mut self) -> Result<()> {
        ensure_mta()?;
        unsafe {
            MFStartup(MF_VERSION, MFSTARTUP_NOSOCKET)?;
            self.mf_started = true;

            let transform: IMFTransform = CoCreateInstance(&CLSID_AACMFTEncoder, None, CLSCTX_INPROC_SERVER)?;
            let OutputFormat {
                sample_rate,
                channel_count,
                bitrate_bps,
                ..
            } = self.format;

            let output_type = MFCreateMediaType()?;
            output_type.SetGUID(&MF_MT_MAJOR_TYPE, &MFMediaType_Audio)?;
            output_type.SetGUID(&MF_MT_SUBTYPE, &MFAudioFormat_AAC)?;
            output_type.SetUINT32(&MF_MT_AUDIO_BITS_PER_SAMPLE, 16)?;
            output_type.SetUINT32(&MF_MT_AUDIO_SAMPLES_PER_SECOND, sample_rate)?;
            output_type.SetUINT32(&MF_MT_AUDIO_NUM_CHANNELS, channel_count as u32)?;
            output_type.SetUINT32(&MF_MT_AUDIO_AVG_BYTES_PER_SECOND, bitrate_bps / 8)?;
            // Raw access units, no ADTS headers.
            output_type.SetUINT32(&MF_MT_AAC_PAYLOAD_TYPE, 0)?;
            output_type.SetUINT32(&MF_MT_AAC_AUDIO_PROFILE_LEVEL_INDICATION, AAC_LC_PROFILE_LEVEL)?;
            transform.SetOutputType(0, &output_type, 0)?;

            let block_align = channel_count as u32 * 2;
            let input_type = MFCreateMediaType()?;
            input_type.SetGUID(&MF_MT_MAJOR_TYPE, &MFMediaType_Audio)?;
            input_type.SetGUID(&MF_MT_SUBTYPE, &MFAudioFormat_PCM)?;
            input_type.SetUINT32(&MF_MT_AUDIO_BITS_PER_SAMPLE, 16)?;
            input_type.SetUINT32(&MF_MT_AUDIO_SAMPLES_PER_SECOND, sample_rate)?;
            input_type.SetUINT32(&MF_MT_AUDIO_NUM_CHANNELS, channel_count as u32)?;
            input_type.SetUINT32(&MF_MT_AUDIO_BLOCK_ALIGNMENT, block_align)?;
            input_type.SetUINT32(&MF_MT_AUDIO_AVG_BYTES_PER_SECOND, sample_rate * block_align)?;
            transform.SetInputType(0, &input_type, 0)?;

            let info = transform.GetOutputStreamInfo(0)?;
            self.output_buffer_size = info.cbSize.max(AAC_FRAME * block_align);

            transform.ProcessMessage(MFT_MESSAGE_NOTIFY_BEGIN_STREAMING, 0)?;
            transform.ProcessMessage(MFT_MESSAGE_NOTIFY_START_OF_STREAM, 0)?;
            self.transform = Some(transform);
        }
        Ok(())
    }

    fn transform(&self) -> std::result::Result<&IMFTransform, EncodeError> {
        self.transform.as_ref().ok_or(EncodeError::InvalidState("encoder released"))
    }

    /// Pull one encoded frame. `Ok(None)` means the MFT needs more input.
    fn process_output(&self) -> std::result::Result<Option<EncodedUnit>, EncodeError> {
        let transform = self.transform()?;
        unsafe {
            let sample = MFCreateSample().map_err(codec_failure)?;
            let buffer = MFCreateMemoryBuffer(self.output_buffer_size).map_err(codec_failure)?;
            sample.AddBuffer(&buffer).map_err(codec_failure)?;

            let mut output = [MFT_OUTPUT_DATA_BUFFER {
                dwStreamID: 0,
                pSample: ManuallyDrop::new(Some(sample.clone())),
                dwStatus: 0,
                pEvents: ManuallyDrop::new(None),
            }];
            let mut status = 0u32;
            let result = transform.ProcessOutput(0, &mut output, &mut status);
            ManuallyDrop::drop(&mut output[0].pSample);
            ManuallyDrop::drop(&mut output[0].pEvents);

            match result {
                Ok(()) => {}
                Err(e) if e.code() == MF_E_TRANSFORM_NEED_MORE_INPUT => return Ok(None),
                Err(e) => return Err(codec_failure(e)),
            }

            let timestamp_us = (sample.GetSampleTime().map_err(codec_failure)?.max(0) / 10) as u64;
            let contiguous = sample.ConvertToContiguousBuffer().map_err(codec_failure)?;
            let mut data_ptr: *mut u8 = std::ptr::null_mut();
            let mut length = 0u32;
            contiguous
                .Lock(&mut data_ptr, None, Some(&mut length as *mut u32))
                .map_err(codec_failure)?;
            let data = if data_ptr.is_null() {
                Vec::new()
            } else {
                std::slice::from_raw_parts(data_ptr, length as usize).to_vec()
            };
            contiguous.Unlock().map_err(codec_failure)?;

            Ok(Some(EncodedUnit::new(data, timestamp_us)))
        }
    }

    fn make_input_sample(&self, samples: &[i16], timestamp_us: u64) -> Result<IMFSample> {
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let frames = samples.len() as u64 / self.format.channel_count as u64;
        unsafe {
            let buffer = MFCreateMemoryBuffer(bytes.len() as u32)?;
            let mut data_ptr: *mut u8 = std::ptr::null_mut();
            buffer.Lock(&mut data_ptr, None, None)?;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), data_ptr, bytes.len());
            buffer.Unlock()?;
            buffer.SetCurrentLength(bytes.len() as u32)?;

            let sample = MFCreateSample()?;
            sample.AddBuffer(&buffer)?;
            // Media Foundation time is in 100-nanosecond units.
            sample.SetSampleTime((timestamp_us * 10) as i64)?;
            sample.SetSampleDuration((frames * 10_000_000 / self.format.sample_rate as u64) as i64)?;
            Ok(sample)
        }
    }
}

impl BlockEncoder for MfAacEncoder {
    fn state(&self) -> EncoderState {
        self.state
    }

    fn input_capacity(&self) -> usize {
        INPUT_FRAMES * self.format.channel_count as usize
    }

    fn submit(
        &mut self,
        samples: &[i16],
        timestamp_us: u64,
        end_of_stream: bool,
    ) -> std::result::Result<SubmitStatus, EncodeError> {
        if self.state != EncoderState::Running {
            return Err(EncodeError::InvalidState("submit outside the running state"));
        }
        let transform = self.transform()?;

        if end_of_stream {
            if !samples.is_empty() {
                return Err(EncodeError::InvalidState("end of stream carries no samples"));
            }
            unsafe {
                transform
                    .ProcessMessage(MFT_MESSAGE_NOTIFY_END_OF_STREAM, 0)
                    .and_then(|()| transform.ProcessMessage(MFT_MESSAGE_COMMAND_DRAIN, 0))
                    .map_err(codec_failure)?;
            }
            self.end_timestamp_us = timestamp_us;
            self.state = EncoderState::Draining;
            log::debug!("AAC encoder draining at {} us", timestamp_us);
            return Ok(SubmitStatus::Accepted);
        }

        if samples.len() > self.input_capacity() {
            return Err(EncodeError::InvalidState("chunk exceeds input capacity"));
        }
        let sample = self.make_input_sample(samples, timestamp_us).map_err(codec_failure)?;
        match unsafe { transform.ProcessInput(0, &sample, 0) } {
            Ok(()) => Ok(SubmitStatus::Accepted),
            Err(e) if e.code() == MF_E_NOTACCEPTING => Ok(SubmitStatus::TryAgain),
            Err(e) => Err(codec_failure(e)),
        }
    }

    fn poll_output(&mut self) -> std::result::Result<EncoderPoll, EncodeError> {
        if let Some(unit) = self.held_unit.take() {
            return Ok(EncoderPoll::Unit(unit));
        }
        match self.state {
            EncoderState::Running | EncoderState::Draining => {}
            EncoderState::Stopped => return Ok(EncoderPoll::TryAgain),
            EncoderState::Unconfigured => return Err(EncodeError::InvalidState("encoder released")),
        }

        match self.process_output()? {
            Some(unit) if unit.data.is_empty() => Ok(EncoderPoll::TryAgain),
            Some(unit) if !self.format_reported => {
                self.format_reported = true;
                self.held_unit = Some(unit);
                Ok(EncoderPoll::FormatChanged(self.format.clone()))
            }
            Some(unit) => Ok(EncoderPoll::Unit(unit)),
            None if self.state == EncoderState::Draining => {
                self.state = EncoderState::Stopped;
                Ok(EncoderPoll::Unit(EncodedUnit::end_of_stream(self.end_timestamp_us)))
            }
            None => Ok(EncoderPoll::TryAgain),
        }
    }

    fn release(&mut self) {
        if let Some(transform) = self.transform.take() {
            unsafe {
                let _ = transform.ProcessMessage(MFT_MESSAGE_NOTIFY_END_STREAMING, 0);
                let _ = transform.ProcessMessage(MFT_MESSAGE_COMMAND_FLUSH, 0);
            }
            log::debug!("AAC encoder released");
        }
        if self.mf_started {
            self.mf_started = false;
            unsafe {
                let _ = MFShutdown();
            }
        }
        self.held_unit = None;
        self.state = EncoderState::Stopped;
    }
}

impl Drop for MfAacEncoder {
    fn drop(&mut self) {
        self.release();
    }
}

fn codec_failure(e: Error) -> EncodeError {
    EncodeError::CodecFailure(e.to_string())
}
