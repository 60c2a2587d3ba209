pub mod clock;
pub mod gain;
pub mod levels;
pub mod mp4_format;
pub mod ring_buffer;
