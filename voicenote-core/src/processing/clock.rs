/// Presentation clock driven by the number of frames handed to the encoder.
///
/// Timestamps are derived from the running frame count, never from wall-clock
/// time, so they are monotonic regardless of scheduling jitter. The value is
/// computed from the total each time rather than accumulated per sample, which
/// keeps it exact at rates like 44100 Hz where a per-sample microsecond step
/// does not divide evenly.
#[derive(Debug, Clone)]
pub struct SampleClock {
    sample_rate: u32,
    channel_count: u16,
    frames: u64,
}

impl SampleClock {
    pub fn new(sample_rate: u32, channel_count: u16) -> Self {
        Self {
            sample_rate,
            channel_count: channel_count.max(1),
            frames: 0,
        }
    }

    /// Timestamp of the next frame to be submitted, in microseconds.
    pub fn timestamp_us(&self) -> u64 {
        frames_to_us(self.frames, self.sample_rate)
    }

    /// Advance by a run of interleaved samples.
    pub fn advance(&mut self, samples: usize) {
        self.frames += (samples / self.channel_count as usize) as u64;
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames as f64 / self.sample_rate as f64
    }
}

/// `frames * 1_000_000 / sample_rate`, without intermediate overflow.
pub fn frames_to_us(frames: u64, sample_rate: u32) -> u64 {
    (frames as u128 * 1_000_000 / sample_rate as u128) as u64
}
