use std::panic::{self, AssertUnwindSafe};

use crate::models::audio_models::InputMode;
use crate::models::config::SessionConfig;
use crate::models::error::SessionError;
use crate::traits::backend::{open_capture_source, CaptureBackend};
use crate::traits::block_encoder::BlockEncoder;
use crate::traits::capture_source::{CaptureSource, EffectHandles};
use crate::traits::container_writer::ContainerWriter;

/// Every component acquired for one session.
///
/// Components are acquired in order (capture, effects, encoder, writer) and
/// released in that same fixed order by `release`, which also runs on drop.
/// A partially opened pipeline therefore cleans up whatever it holds when a
/// later acquisition fails.
pub(crate) struct Pipeline<B: CaptureBackend> {
    pub(crate) source: Option<B::Source>,
    pub(crate) effects: EffectHandles,
    pub(crate) encoder: Option<B::Encoder>,
    pub(crate) writer: Option<B::Writer>,
    pub(crate) input_mode: Option<InputMode>,
}

impl<B: CaptureBackend> Pipeline<B> {
    pub(crate) fn open(backend: &B, config: &SessionConfig) -> Result<Self, SessionError> {
        let mut pipeline = Self {
            source: None,
            effects: EffectHandles::none(),
            encoder: None,
            writer: None,
            input_mode: None,
        };

        let (source, mode) = open_capture_source(backend, config.sample_rate, config.channel_count)?;
        pipeline.input_mode = Some(mode);
        let source = pipeline.source.insert(source);

        if config.enable_effects {
            pipeline.effects = source.attach_effects();
            if pipeline.effects.is_empty() {
                log::info!("no capture effects available");
            } else {
                log::info!("capture effects attached: {}", pipeline.effects.names().join(", "));
            }
        }

        pipeline.encoder = Some(backend.configure_encoder(
            config.sample_rate,
            config.channel_count,
            config.bitrate_bps,
        )?);
        pipeline.writer = Some(backend.open_writer(&config.output_path)?);

        Ok(pipeline)
    }

    /// Release every held component: capture, effects, encoder, writer.
    ///
    /// Idempotent. The writer's output is discarded unless it was finalized.
    /// A panicking release is logged and does not stop the remaining steps.
    pub(crate) fn release(&mut self) {
        if let Some(mut source) = self.source.take() {
            guarded("capture source", || source.close());
        }
        guarded("capture effects", || self.effects.release());
        if let Some(mut encoder) = self.encoder.take() {
            guarded("encoder", || encoder.release());
        }
        if let Some(mut writer) = self.writer.take() {
            guarded("container writer", || writer.discard());
        }
    }
}

impl<B: CaptureBackend> Drop for Pipeline<B> {
    fn drop(&mut self) {
        self.release();
    }
}

fn guarded(component: &str, release: impl FnOnce()) {
    if panic::catch_unwind(AssertUnwindSafe(release)).is_err() {
        log::warn!("releasing {} panicked; continuing with remaining components", component);
    }
}
