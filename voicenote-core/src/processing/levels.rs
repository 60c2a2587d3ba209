use crate::models::audio_models::AudioLevels;

/// RMS and peak of a block of 16-bit samples, normalized to 0.0–1.0.
pub fn measure(samples: &[i16]) -> AudioLevels {
    if samples.is_empty() {
        return AudioLevels::default();
    }
    let scale = 1.0 / 32768.0;
    let mut sum_sq = 0.0f64;
    let mut peak = 0i32;
    for &sample in samples {
        let value = sample as i32;
        sum_sq += (value * value) as f64;
        peak = peak.max(value.abs());
    }
    AudioLevels {
        rms: ((sum_sq / samples.len() as f64).sqrt() * scale) as f32,
        peak: (peak as f64 * scale) as f32,
    }
}
