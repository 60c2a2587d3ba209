/// Fixed-capacity queue of interleaved 16-bit frames.
///
/// Capture backends park device packets here until the worker asks for the
/// next block. Space is counted in whole frames so a read or an overflow
/// never splits the channels of one frame. Wrap in a mutex if it is shared
/// between threads.
///
/// Overflow behavior: drops the oldest frames.
#[derive(Debug)]
pub struct RingBuffer {
    samples: Box<[i16]>,
    channels: usize,
    /// Sample index of the oldest queued frame.
    head: usize,
    /// Queued samples.
    len: usize,
    dropped_frames: u64,
}

impl RingBuffer {
    pub fn new(capacity_frames: usize, channels: u16) -> Self {
        let channels = channels.max(1) as usize;
        Self {
            samples: vec![0; capacity_frames.max(1) * channels].into_boxed_slice(),
            channels,
            head: 0,
            len: 0,
            dropped_frames: 0,
        }
    }

    /// Queue interleaved samples. A trailing partial frame is ignored.
    pub fn push(&mut self, samples: &[i16]) {
        let usable = samples.len() - samples.len() % self.channels;
        let mut incoming = &samples[..usable];
        if incoming.is_empty() {
            return;
        }

        let capacity = self.samples.len();
        if incoming.len() > capacity {
            self.dropped_frames += ((incoming.len() - capacity) / self.channels) as u64;
            incoming = &incoming[incoming.len() - capacity..];
        }
        let excess = (self.len + incoming.len()).saturating_sub(capacity);
        if excess > 0 {
            self.head = (self.head + excess) % capacity;
            self.len -= excess;
            self.dropped_frames += (excess / self.channels) as u64;
        }

        let tail = (self.head + self.len) % capacity;
        let first = incoming.len().min(capacity - tail);
        self.samples[tail..tail + first].copy_from_slice(&incoming[..first]);
        self.samples[..incoming.len() - first].copy_from_slice(&incoming[first..]);
        self.len += incoming.len();
    }

    /// Move as many whole frames as fit into `out`; returns samples copied.
    pub fn pop_into(&mut self, out: &mut [i16]) -> usize {
        let capacity = self.samples.len();
        let count = self.len.min(out.len() - out.len() % self.channels);
        let first = count.min(capacity - self.head);
        out[..first].copy_from_slice(&self.samples[self.head..self.head + first]);
        out[first..count].copy_from_slice(&self.samples[..count - first]);
        self.head = (self.head + count) % capacity;
        self.len -= count;
        count
    }

    /// Queued samples (a multiple of the channel count).
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn frames(&self) -> usize {
        self.len / self.channels
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Frames lost to overflow since creation.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }

    pub fn capacity_frames(&self) -> usize {
        self.samples.len() / self.channels
    }
}
