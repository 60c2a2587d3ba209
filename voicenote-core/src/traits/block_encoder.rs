use crate::models::audio_models::{EncodedUnit, EncoderState, OutputFormat};
use crate::models::error::EncodeError;

/// Outcome of handing input to the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitStatus {
    Accepted,
    /// Input buffers are momentarily full. Drain output and submit again.
    TryAgain,
}

/// Outcome of one output poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncoderPoll {
    Unit(EncodedUnit),
    /// The output format is now known. Reported exactly once, before the first unit.
    FormatChanged(OutputFormat),
    /// Nothing ready yet.
    TryAgain,
}

/// Event yielded by [`Drain`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncoderEvent {
    FormatChanged(OutputFormat),
    Unit(EncodedUnit),
}

/// A stateful constant-bitrate AAC-LC encoder with asynchronous buffer handoff.
///
/// Created by a `CaptureBackend` in the `Running` state.
pub trait BlockEncoder: Send {
    fn state(&self) -> EncoderState;

    /// Largest number of interleaved samples accepted by one `submit`.
    fn input_capacity(&self) -> usize;

    /// Hand raw samples stamped with `timestamp_us` to the encoder, waiting at
    /// most a short bounded time for a free input buffer.
    ///
    /// With `end_of_stream` set the payload must be empty; the encoder moves
    /// to `Draining` and rejects any further submit.
    fn submit(&mut self, samples: &[i16], timestamp_us: u64, end_of_stream: bool)
        -> Result<SubmitStatus, EncodeError>;

    /// Poll for one ready output, waiting at most a short bounded time.
    fn poll_output(&mut self) -> Result<EncoderPoll, EncodeError>;

    /// Stop and free the encoder. Idempotent.
    fn release(&mut self);

    /// Lazily pull every output that is ready right now.
    fn drain(&mut self) -> Drain<'_, Self>
    where
        Self: Sized,
    {
        Drain {
            encoder: self,
            done: false,
        }
    }
}

/// Iterator over currently available encoder output.
///
/// Each `next` performs exactly one poll, so a caller that registers the
/// container track inside the loop body on `FormatChanged` is guaranteed the
/// track exists before the following poll can yield a unit. Iteration ends on
/// the first "try again", after an end-of-stream unit, or after an error.
pub struct Drain<'a, E: BlockEncoder> {
    encoder: &'a mut E,
    done: bool,
}

impl<E: BlockEncoder> Iterator for Drain<'_, E> {
    type Item = Result<EncoderEvent, EncodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.encoder.poll_output() {
            Ok(EncoderPoll::TryAgain) => {
                self.done = true;
                None
            }
            Ok(EncoderPoll::FormatChanged(format)) => Some(Ok(EncoderEvent::FormatChanged(format))),
            Ok(EncoderPoll::Unit(unit)) => {
                self.done = unit.end_of_stream;
                Some(Ok(EncoderEvent::Unit(unit)))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
