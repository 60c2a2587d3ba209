/// Hardware input modes, tried in `InputMode::PRIORITY` order when opening capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputMode {
    /// Voice-communication-optimized input (platform echo/gain processing).
    VoiceCommunication,
    /// Plain microphone input.
    Microphone,
}

impl InputMode {
    pub const PRIORITY: [InputMode; 2] = [InputMode::VoiceCommunication, InputMode::Microphone];

    pub fn name(&self) -> &'static str {
        match self {
            Self::VoiceCommunication => "voice-communication",
            Self::Microphone => "microphone",
        }
    }
}

/// Block encoder lifecycle.
///
/// ```text
/// unconfigured → running → draining → stopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderState {
    Unconfigured,
    Running,
    Draining,
    Stopped,
}

/// The encoder's negotiated output format, surfaced once before the first unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFormat {
    pub sample_rate: u32,
    pub channel_count: u16,
    pub bitrate_bps: u32,
    /// PCM frames per access unit (1024 for AAC-LC).
    pub frames_per_unit: u32,
    /// MPEG-4 AudioSpecificConfig bytes.
    pub codec_config: Vec<u8>,
}

/// One encoded access unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedUnit {
    pub data: Vec<u8>,
    pub timestamp_us: u64,
    pub end_of_stream: bool,
}

impl EncodedUnit {
    pub fn new(data: Vec<u8>, timestamp_us: u64) -> Self {
        Self {
            data,
            timestamp_us,
            end_of_stream: false,
        }
    }

    /// Empty end-of-stream marker.
    pub fn end_of_stream(timestamp_us: u64) -> Self {
        Self {
            data: Vec::new(),
            timestamp_us,
            end_of_stream: true,
        }
    }
}

/// Identifies the single audio track registered in a container writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackHandle(pub u32);

/// Real-time audio level metering (RMS and peak, 0.0–1.0).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AudioLevels {
    pub rms: f32,
    pub peak: f32,
}
