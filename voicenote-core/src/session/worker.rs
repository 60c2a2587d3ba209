use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::models::audio_models::{AudioLevels, TrackHandle};
use crate::models::config::SessionConfig;
use crate::models::error::{CaptureError, EncodeError, SessionError, WriteError};
use crate::models::recording_result::{RecordingResult, SessionDiagnostics};
use crate::processing::clock::SampleClock;
use crate::processing::{gain, levels};
use crate::traits::backend::CaptureBackend;
use crate::traits::block_encoder::{BlockEncoder, EncoderEvent, SubmitStatus};
use crate::traits::capture_source::CaptureSource;
use crate::traits::container_writer::{ContainerWriter, FinalizedFile};
use crate::traits::session_delegate::SessionDelegate;

use super::pipeline::Pipeline;

/// Read-only progress published by the worker for the controller thread.
#[derive(Debug, Default)]
pub(crate) struct SessionTelemetry {
    pub(crate) frames: AtomicU64,
    pub(crate) levels: Mutex<AudioLevels>,
}

pub(crate) struct WorkerContext {
    pub(crate) session_id: String,
    pub(crate) config: SessionConfig,
    pub(crate) stop: Arc<AtomicBool>,
    pub(crate) telemetry: Arc<SessionTelemetry>,
    pub(crate) delegate: Option<Arc<dyn SessionDelegate>>,
}

/// Worker thread entry point.
///
/// Runs read → gain → submit → drain → write until the stop flag is set (or
/// the maximum duration is reached), then flushes end-of-stream, finalizes
/// the container and releases every component. On any error the loop is
/// abandoned, the partial output discarded and all components released.
pub(crate) fn run<B: CaptureBackend>(pipeline: Pipeline<B>, ctx: WorkerContext) -> Result<RecordingResult, SessionError> {
    let mut worker = CaptureWorker {
        clock: SampleClock::new(ctx.config.sample_rate, ctx.config.channel_count),
        diagnostics: SessionDiagnostics {
            effects_attached: pipeline.effects.names(),
            input_mode: pipeline.input_mode.map(|m| m.name().to_string()).unwrap_or_default(),
            ..Default::default()
        },
        pipeline,
        ctx,
        track: None,
        last_timestamp_us: None,
        empty_reads: 0,
        partial_frame: Vec::new(),
    };

    let outcome = worker.record();
    worker.pipeline.release();

    let ctx = &worker.ctx;
    match outcome {
        Ok(finished) => {
            let mut diagnostics = worker.diagnostics.clone();
            diagnostics.units_written = finished.units_written;
            diagnostics.bytes_written = finished.bytes_written;
            let result = RecordingResult::new(&ctx.session_id, &ctx.config, finished.path, finished.checksum, diagnostics);
            log::info!(
                "session {} finished: {:.2}s, {} units",
                ctx.session_id,
                result.duration_secs,
                result.diagnostics.units_written
            );
            if let Some(ref delegate) = ctx.delegate {
                delegate.on_recording_finished(&result);
            }
            Ok(result)
        }
        Err(e) => {
            log::error!("session {} failed: {}", ctx.session_id, e);
            if let Some(ref delegate) = ctx.delegate {
                delegate.on_error(&e);
            }
            Err(e)
        }
    }
}

struct CaptureWorker<B: CaptureBackend> {
    pipeline: Pipeline<B>,
    ctx: WorkerContext,
    clock: SampleClock,
    track: Option<TrackHandle>,
    last_timestamp_us: Option<u64>,
    empty_reads: u32,
    /// Samples of a frame the source has only partly delivered.
    partial_frame: Vec<i16>,
    diagnostics: SessionDiagnostics,
}

impl<B: CaptureBackend> CaptureWorker<B> {
    fn record(&mut self) -> Result<FinalizedFile, SessionError> {
        let gain = self.ctx.config.gain_db.linear();
        let max_frames = self.ctx.config.max_frames();
        let mut block = vec![0i16; self.ctx.config.block_samples()];

        // A read already in flight completes before the flag is seen, which
        // bounds stop latency to about one block duration.
        while !self.ctx.stop.load(Ordering::Acquire) {
            if max_frames.is_some_and(|max| self.clock.frames() >= max) {
                log::info!("session {} reached its maximum duration", self.ctx.session_id);
                break;
            }

            let filled = self.read_block(&mut block)?;
            if filled == 0 {
                continue;
            }

            let samples = &mut block[..filled];
            gain::apply_gain(samples, gain);
            self.publish_levels(samples);
            self.submit_samples(samples)?;
        }

        if !self.partial_frame.is_empty() {
            log::debug!(
                "session {}: dropping {} samples of an incomplete frame",
                self.ctx.session_id,
                self.partial_frame.len()
            );
        }
        self.finish_stream()
    }

    /// Read into `block` and return how many samples form whole frames.
    ///
    /// A trailing partial frame is held back and placed at the front of the
    /// next block, so channels stay in place when a source splits a frame.
    fn read_block(&mut self, block: &mut [i16]) -> Result<usize, SessionError> {
        let carried = self.partial_frame.len();
        block[..carried].copy_from_slice(&self.partial_frame);
        self.partial_frame.clear();

        let source = self.pipeline.source.as_mut().ok_or(CaptureError::Released)?;
        let room = block.len() - carried;
        let filled = source.read_block(&mut block[carried..])?.min(room);

        if filled == 0 {
            self.partial_frame.extend_from_slice(&block[..carried]);
            self.empty_reads += 1;
            self.diagnostics.empty_reads += 1;
            if self.empty_reads > self.ctx.config.max_empty_reads {
                return Err(CaptureError::DeviceStalled {
                    empty_reads: self.empty_reads,
                }
                .into());
            }
            return Ok(0);
        }

        self.empty_reads = 0;
        self.diagnostics.blocks_read += 1;
        let channels = self.ctx.config.channel_count as usize;
        let total = carried + filled;
        let whole = total - total % channels;
        self.partial_frame.extend_from_slice(&block[whole..total]);
        Ok(whole)
    }

    fn publish_levels(&self, samples: &[i16]) {
        let levels = levels::measure(samples);
        *self.ctx.telemetry.levels.lock() = levels;
        if let Some(ref delegate) = self.ctx.delegate {
            delegate.on_levels_updated(&levels);
        }
    }

    /// Feed a processed block to the encoder in chunks no larger than its input
    /// capacity, draining ready output after every attempt.
    ///
    /// Each chunk is stamped with the clock value before it; the clock only
    /// advances once the encoder has accepted the chunk, so a retried chunk
    /// keeps its timestamp and no samples are skipped or repeated.
    fn submit_samples(&mut self, samples: &[i16]) -> Result<(), SessionError> {
        let channels = self.ctx.config.channel_count as usize;
        let max_attempts = self.ctx.config.max_encoder_retries;
        let mut offset = 0;
        let mut attempts = 0u32;

        while offset < samples.len() {
            let timestamp_us = self.clock.timestamp_us();
            let encoder = self.encoder()?;
            let capacity = encoder.input_capacity() / channels * channels;
            if capacity == 0 {
                return Err(EncodeError::InvalidState("encoder has no input capacity").into());
            }
            let end = (offset + capacity).min(samples.len());

            let status = encoder.submit(&samples[offset..end], timestamp_us, false)?;
            match status {
                SubmitStatus::Accepted => {
                    self.clock.advance(end - offset);
                    self.ctx.telemetry.frames.store(self.clock.frames(), Ordering::Relaxed);
                    self.diagnostics.frames_captured = self.clock.frames();
                    offset = end;
                    attempts = 0;
                }
                SubmitStatus::TryAgain => {
                    attempts += 1;
                    self.diagnostics.encoder_retries += 1;
                    if attempts > max_attempts {
                        return Err(EncodeError::InputStalled { attempts }.into());
                    }
                    backoff(attempts);
                }
            }

            self.drain_ready()?;
        }
        Ok(())
    }

    /// Move every currently available encoder output into the container.
    ///
    /// Returns true once the end-of-stream unit has been written.
    fn drain_ready(&mut self) -> Result<bool, SessionError> {
        let encoder = self
            .pipeline
            .encoder
            .as_mut()
            .ok_or(EncodeError::InvalidState("encoder released"))?;
        let writer = self.pipeline.writer.as_mut().ok_or(WriteError::Finalized)?;
        let mut end_of_stream = false;

        for event in encoder.drain() {
            match event? {
                EncoderEvent::FormatChanged(format) => {
                    if self.track.is_some() {
                        log::warn!("encoder reported its output format again; keeping the registered track");
                        continue;
                    }
                    let track = writer.add_track(&format)?;
                    log::info!(
                        "output format known: {} Hz, {} ch, {} bps",
                        format.sample_rate,
                        format.channel_count,
                        format.bitrate_bps
                    );
                    self.track = Some(track);
                }
                EncoderEvent::Unit(unit) => {
                    // A bare end-of-stream marker from an encoder that never
                    // produced audio carries nothing to write.
                    if unit.end_of_stream && unit.data.is_empty() && self.track.is_none() {
                        end_of_stream = true;
                        continue;
                    }
                    let track = self.track.ok_or(WriteError::TrackNotReady)?;
                    debug_assert!(
                        self.last_timestamp_us.is_none_or(|last| unit.timestamp_us >= last),
                        "encoder output went backwards: {} after {:?}",
                        unit.timestamp_us,
                        self.last_timestamp_us
                    );
                    self.last_timestamp_us = Some(unit.timestamp_us);
                    writer.write_unit(track, &unit)?;
                    end_of_stream |= unit.end_of_stream;
                }
            }
        }
        Ok(end_of_stream)
    }

    /// Signal end-of-stream, drain the tail and finalize the container.
    fn finish_stream(&mut self) -> Result<FinalizedFile, SessionError> {
        let max_attempts = self.ctx.config.max_encoder_retries;
        log::debug!("session {}: flushing encoder at {} frames", self.ctx.session_id, self.clock.frames());

        let mut attempts = 0u32;
        loop {
            let timestamp_us = self.clock.timestamp_us();
            let status = self.encoder()?.submit(&[], timestamp_us, true)?;
            match status {
                SubmitStatus::Accepted => break,
                SubmitStatus::TryAgain => {
                    attempts += 1;
                    self.diagnostics.encoder_retries += 1;
                    if attempts > max_attempts {
                        return Err(EncodeError::InputStalled { attempts }.into());
                    }
                    self.drain_ready()?;
                    backoff(attempts);
                }
            }
        }

        let mut polls = 0u32;
        while !self.drain_ready()? {
            polls += 1;
            if polls > max_attempts {
                return Err(EncodeError::DrainTimedOut { polls }.into());
            }
            backoff(polls);
        }

        let writer = self.pipeline.writer.as_mut().ok_or(WriteError::Finalized)?;
        writer.finalize()?.ok_or(SessionError::NothingRecorded)
    }

    fn encoder(&mut self) -> Result<&mut B::Encoder, SessionError> {
        self.pipeline
            .encoder
            .as_mut()
            .ok_or(EncodeError::InvalidState("encoder released").into())
    }
}

/// Bounded exponential backoff between "try again" polls: 2, 4, 8, then 16 ms.
fn backoff(attempt: u32) {
    thread::sleep(Duration::from_millis(1 << attempt.clamp(1, 4)));
}
