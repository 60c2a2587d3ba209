//! Scripted capture backend for session scenarios.
//!
//! The source paces reads in real time and produces a sine tone (right
//! channel inverted so a channel swap is visible), the encoder
//! packs 1024-frame units with a bounded output queue, and the writer is the
//! real `M4aWriter` wrapped so releases land in a shared journal.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use voicenote_core::processing::mp4_format;
use voicenote_core::*;

const FRAMES_PER_UNIT: u64 = 1024;

/// Ordered log of component releases shared by every fake.
#[derive(Debug, Default, Clone)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn record(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.0.lock().iter().any(|e| e == entry)
    }
}

/// Fault and pacing knobs for one backend.
#[derive(Debug, Clone)]
pub struct Script {
    /// Input modes that fail to open.
    pub failing_modes: Vec<InputMode>,
    pub offer_effects: bool,
    /// Sleep for the duration of each block, like a real device.
    pub real_time: bool,
    /// Amplitude of the generated tone.
    pub amplitude: i16,
    /// After this many blocks every read comes back empty.
    pub go_silent_after: Option<u64>,
    /// Each read blocks this long before returning.
    pub read_delay: Option<Duration>,
    /// The read with this index returns only this many samples.
    pub short_read: Option<(u64, usize)>,
    pub encoder_unsupported: bool,
    pub input_capacity: usize,
    /// Encoded units the encoder can hold before refusing input.
    pub output_queue: usize,
    /// Every submit is first refused this many times.
    pub refuse_each_submit: u32,
    /// Submits after this many accepted ones fail hard.
    pub fail_after_submits: Option<u64>,
    pub writer_fails: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            failing_modes: Vec::new(),
            offer_effects: true,
            real_time: true,
            amplitude: 8000,
            go_silent_after: None,
            read_delay: None,
            short_read: None,
            encoder_unsupported: false,
            input_capacity: 4096,
            output_queue: 64,
            refuse_each_submit: 0,
            fail_after_submits: None,
            writer_fails: false,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct FakeBackend {
    pub script: Script,
    pub journal: Journal,
    /// Every `(timestamp_us, samples)` accepted by any encoder of this backend.
    pub accepted: Arc<Mutex<Vec<(u64, usize)>>>,
    /// Every sample accepted by any encoder of this backend, in order.
    pub received: Arc<Mutex<Vec<i16>>>,
}

impl FakeBackend {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            ..Default::default()
        }
    }
}

impl CaptureBackend for FakeBackend {
    type Source = FakeSource;
    type Encoder = FakeEncoder;
    type Writer = JournalWriter;

    fn open_source(&self, mode: InputMode, sample_rate: u32, channel_count: u16) -> Result<FakeSource, CaptureError> {
        if self.script.failing_modes.contains(&mode) {
            return Err(CaptureError::DeviceUnavailable);
        }
        Ok(FakeSource {
            script: self.script.clone(),
            journal: self.journal.clone(),
            sample_rate,
            channel_count,
            position: 0,
            blocks: 0,
            closed: false,
        })
    }

    fn configure_encoder(&self, sample_rate: u32, channel_count: u16, bitrate_bps: u32) -> Result<FakeEncoder, EncodeError> {
        if self.script.encoder_unsupported {
            return Err(EncodeError::UnsupportedConfig("no AAC encoder".into()));
        }
        Ok(FakeEncoder {
            script: self.script.clone(),
            journal: self.journal.clone(),
            accepted: Arc::clone(&self.accepted),
            received: Arc::clone(&self.received),
            format: OutputFormat {
                sample_rate,
                channel_count,
                bitrate_bps,
                frames_per_unit: FRAMES_PER_UNIT as u32,
                codec_config: mp4_format::audio_specific_config(sample_rate, channel_count)
                    .map(|asc| asc.to_vec())
                    .unwrap_or_default(),
            },
            state: EncoderState::Running,
            pending_frames: 0,
            units_emitted: 0,
            format_reported: false,
            output: VecDeque::new(),
            refusals: 0,
            submits: 0,
        })
    }

    fn open_writer(&self, path: &Path) -> Result<JournalWriter, WriteError> {
        if self.script.writer_fails {
            return Err(WriteError::CannotCreate(format!("read-only: {}", path.display())));
        }
        Ok(JournalWriter {
            inner: M4aWriter::create(path)?,
            journal: self.journal.clone(),
        })
    }
}

pub struct FakeSource {
    script: Script,
    journal: Journal,
    sample_rate: u32,
    channel_count: u16,
    /// Interleaved samples produced so far.
    position: u64,
    blocks: u64,
    closed: bool,
}

impl CaptureSource for FakeSource {
    fn attach_effects(&mut self) -> EffectHandles {
        if !self.script.offer_effects {
            return EffectHandles::none();
        }
        EffectHandles {
            gain_control: Some(Box::new(FakeEffect {
                name: "agc",
                journal: self.journal.clone(),
            })),
            noise_suppressor: Some(Box::new(FakeEffect {
                name: "ns",
                journal: self.journal.clone(),
            })),
        }
    }

    fn read_block(&mut self, buffer: &mut [i16]) -> Result<usize, CaptureError> {
        if self.closed {
            return Err(CaptureError::Released);
        }
        if let Some(delay) = self.script.read_delay {
            thread::sleep(delay);
        }
        if self.script.go_silent_after.is_some_and(|n| self.blocks >= n) {
            thread::sleep(Duration::from_millis(1));
            return Ok(0);
        }

        let filled = match self.script.short_read {
            Some((block, count)) if block == self.blocks => count.min(buffer.len()),
            _ => buffer.len(),
        };
        let samples = tone(
            self.position,
            filled,
            self.sample_rate,
            self.channel_count,
            self.script.amplitude,
        );
        buffer[..filled].copy_from_slice(&samples);
        self.position += filled as u64;
        self.blocks += 1;

        if self.script.real_time {
            let frames = filled / self.channel_count as usize;
            thread::sleep(Duration::from_secs_f64(frames as f64 / self.sample_rate as f64));
        }
        Ok(filled)
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.journal.record("capture");
        }
    }
}

struct FakeEffect {
    name: &'static str,
    journal: Journal,
}

impl AudioEffect for FakeEffect {
    fn name(&self) -> &str {
        self.name
    }

    fn release(&mut self) {
        self.journal.record(self.name);
    }
}

/// Frame-accumulating stand-in for an AAC encoder.
pub struct FakeEncoder {
    script: Script,
    journal: Journal,
    accepted: Arc<Mutex<Vec<(u64, usize)>>>,
    received: Arc<Mutex<Vec<i16>>>,
    format: OutputFormat,
    state: EncoderState,
    pending_frames: u64,
    units_emitted: u64,
    format_reported: bool,
    output: VecDeque<EncodedUnit>,
    refusals: u32,
    submits: u64,
}

impl FakeEncoder {
    fn next_timestamp(&self) -> u64 {
        (self.units_emitted as u128 * FRAMES_PER_UNIT as u128 * 1_000_000 / self.format.sample_rate as u128) as u64
    }

    fn emit_unit(&mut self) {
        let data = vec![(self.units_emitted % 251) as u8; 64];
        self.output.push_back(EncodedUnit::new(data, self.next_timestamp()));
        self.units_emitted += 1;
    }
}

impl BlockEncoder for FakeEncoder {
    fn state(&self) -> EncoderState {
        self.state
    }

    fn input_capacity(&self) -> usize {
        self.script.input_capacity
    }

    fn submit(&mut self, samples: &[i16], timestamp_us: u64, end_of_stream: bool) -> Result<SubmitStatus, EncodeError> {
        if self.state != EncoderState::Running {
            return Err(EncodeError::InvalidState("submit after end of stream"));
        }
        if self.output.len() >= self.script.output_queue || self.refusals < self.script.refuse_each_submit {
            self.refusals += 1;
            return Ok(SubmitStatus::TryAgain);
        }
        self.refusals = 0;

        if end_of_stream {
            assert!(samples.is_empty(), "end of stream carries no samples");
            if self.pending_frames > 0 {
                self.pending_frames = 0;
                self.emit_unit();
            }
            let eos = EncodedUnit::end_of_stream(self.next_timestamp());
            self.output.push_back(eos);
            self.state = EncoderState::Draining;
            return Ok(SubmitStatus::Accepted);
        }

        if self.script.fail_after_submits.is_some_and(|n| self.submits >= n) {
            return Err(EncodeError::CodecFailure("injected".into()));
        }
        assert!(samples.len() <= self.script.input_capacity, "chunk exceeds input capacity");
        self.submits += 1;
        self.accepted.lock().push((timestamp_us, samples.len()));
        self.received.lock().extend_from_slice(samples);

        self.pending_frames += (samples.len() / self.format.channel_count as usize) as u64;
        while self.pending_frames >= FRAMES_PER_UNIT {
            self.pending_frames -= FRAMES_PER_UNIT;
            self.emit_unit();
        }
        Ok(SubmitStatus::Accepted)
    }

    fn poll_output(&mut self) -> Result<EncoderPoll, EncodeError> {
        let Some(front) = self.output.front() else {
            return Ok(EncoderPoll::TryAgain);
        };
        if !self.format_reported && !front.end_of_stream {
            self.format_reported = true;
            return Ok(EncoderPoll::FormatChanged(self.format.clone()));
        }
        let unit = self.output.pop_front().ok_or(EncodeError::InvalidState("empty queue"))?;
        if unit.end_of_stream {
            self.state = EncoderState::Stopped;
        }
        Ok(EncoderPoll::Unit(unit))
    }

    fn release(&mut self) {
        if self.state != EncoderState::Unconfigured {
            self.state = EncoderState::Unconfigured;
            self.journal.record("encoder");
        }
    }
}

pub struct JournalWriter {
    inner: M4aWriter,
    journal: Journal,
}

impl ContainerWriter for JournalWriter {
    fn add_track(&mut self, format: &OutputFormat) -> Result<TrackHandle, WriteError> {
        self.inner.add_track(format)
    }

    fn write_unit(&mut self, track: TrackHandle, unit: &EncodedUnit) -> Result<(), WriteError> {
        self.inner.write_unit(track, unit)
    }

    fn finalize(&mut self) -> Result<Option<FinalizedFile>, WriteError> {
        self.inner.finalize()
    }

    fn discard(&mut self) {
        self.inner.discard();
        self.journal.record("writer");
    }
}

/// Delegate that keeps every notification.
#[derive(Default)]
pub struct RecordingDelegate {
    pub states: Mutex<Vec<&'static str>>,
    pub errors: Mutex<Vec<SessionError>>,
    pub finished: Mutex<Vec<RecordingResult>>,
    pub level_updates: Mutex<u64>,
}

impl SessionDelegate for RecordingDelegate {
    fn on_state_changed(&self, state: &SessionState) {
        self.states.lock().push(state.name());
    }

    fn on_levels_updated(&self, _levels: &AudioLevels) {
        *self.level_updates.lock() += 1;
    }

    fn on_error(&self, error: &SessionError) {
        self.errors.lock().push(error.clone());
    }

    fn on_recording_finished(&self, result: &RecordingResult) {
        self.finished.lock().push(result.clone());
    }
}

/// `count` interleaved tone samples starting at sample index `start`.
pub fn tone(start: u64, count: usize, sample_rate: u32, channel_count: u16, amplitude: i16) -> Vec<i16> {
    let channels = channel_count as u64;
    (start..start + count as u64)
        .map(|index| {
            let t = (index / channels) as f64 / sample_rate as f64;
            let value = ((t * 440.0 * std::f64::consts::TAU).sin() * amplitude as f64) as i16;
            if index % channels == 1 {
                -value
            } else {
                value
            }
        })
        .collect()
}

pub fn temp_output(name: &str) -> PathBuf {
    std::env::temp_dir()
        .join(format!("voicenote_session_{}", uuid::Uuid::new_v4()))
        .join(name)
}

pub fn config(path: &Path) -> SessionConfig {
    SessionConfig {
        block_frames: 441,
        max_empty_reads: 5,
        max_encoder_retries: 20,
        ..SessionConfig::new(path)
    }
}

/// Poll the controller until the worker has ended on its own.
pub fn wait_for_terminal<B: CaptureBackend>(controller: &mut SessionController<B>, limit: Duration) -> SessionState {
    let deadline = std::time::Instant::now() + limit;
    loop {
        let state = controller.poll_state();
        if state.is_terminal() || std::time::Instant::now() >= deadline {
            return state;
        }
        thread::sleep(Duration::from_millis(10));
    }
}

pub fn part_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    path.with_file_name(name)
}

pub fn cleanup(path: &Path) {
    if let Some(dir) = path.parent() {
        let _ = std::fs::remove_dir_all(dir);
    }
}
