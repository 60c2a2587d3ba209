//! Linear PCM boost with clamping.
//!
//! Levels above +9 dB audibly squash loud sources once samples start to
//! clamp. That is the accepted cost of making quiet voice notes louder.

use serde::{Deserialize, Serialize};

/// The fixed set of boost levels offered to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum GainLevel {
    Zero,
    #[default]
    Plus6,
    Plus9,
    Plus12,
    Plus18,
}

impl GainLevel {
    pub const ALL: [GainLevel; 5] = [
        GainLevel::Zero,
        GainLevel::Plus6,
        GainLevel::Plus9,
        GainLevel::Plus12,
        GainLevel::Plus18,
    ];

    pub fn db(&self) -> u8 {
        match self {
            Self::Zero => 0,
            Self::Plus6 => 6,
            Self::Plus9 => 9,
            Self::Plus12 => 12,
            Self::Plus18 => 18,
        }
    }

    pub fn linear(&self) -> f32 {
        db_to_linear(self.db() as f32)
    }
}

impl TryFrom<u8> for GainLevel {
    type Error = String;

    fn try_from(db: u8) -> Result<Self, Self::Error> {
        GainLevel::ALL
            .into_iter()
            .find(|level| level.db() == db)
            .ok_or_else(|| format!("unsupported gain level: {} dB", db))
    }
}

impl From<GainLevel> for u8 {
    fn from(level: GainLevel) -> u8 {
        level.db()
    }
}

/// `10^(dB/20)`.
pub fn db_to_linear(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

/// Scale every sample by `gain` in place, clamping to the i16 range so loud
/// input saturates instead of wrapping.
pub fn apply_gain(samples: &mut [i16], gain: f32) {
    if gain == 1.0 {
        return;
    }
    for sample in samples.iter_mut() {
        let scaled = *sample as f32 * gain;
        *sample = scaled.clamp(i16::MIN as f32, i16::MAX as f32) as i16;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn db_to_linear_known_points() {
        assert_relative_eq!(db_to_linear(0.0), 1.0);
        assert_relative_eq!(db_to_linear(6.0), 1.995_262_3, epsilon = 1e-5);
        assert_relative_eq!(db_to_linear(20.0), 10.0, epsilon = 1e-4);
    }

    #[test]
    fn zero_db_is_identity() {
        let original: Vec<i16> = vec![i16::MIN, -12345, -1, 0, 1, 12345, i16::MAX];
        let mut samples = original.clone();
        apply_gain(&mut samples, GainLevel::Zero.linear());
        assert_eq!(samples, original);
    }

    #[test]
    fn every_level_stays_in_range_without_wrapping() {
        for level in GainLevel::ALL {
            let gain = level.linear();
            let mut samples: Vec<i16> = (i16::MIN..=i16::MAX).collect();
            apply_gain(&mut samples, gain);
            for (input, output) in (i16::MIN..=i16::MAX).zip(samples.iter()) {
                // Sign never flips, which is what wraparound would do.
                assert!(input == 0 || output.signum() == input.signum(), "{} dB: {} -> {}", level.db(), input, output);
                assert!((*output as i32).abs() >= (input as i32).abs());
            }
        }
    }

    #[test]
    fn plus_18_db_clamps_near_full_scale() {
        let mut samples = vec![30000, -30000, 32767, -32768, 5000, -5000, 4000, -4000];
        apply_gain(&mut samples, GainLevel::Plus18.linear());
        assert_eq!(samples[0], i16::MAX);
        assert_eq!(samples[1], i16::MIN);
        assert_eq!(samples[2], i16::MAX);
        assert_eq!(samples[3], i16::MIN);
        assert_eq!(samples[4], i16::MAX);
        assert_eq!(samples[5], i16::MIN);
        // 4000 * 10^(18/20) is 31773.8, still inside the range.
        assert_eq!(samples[6], 31773);
        assert_eq!(samples[7], -31773);
    }

    #[test]
    fn moderate_boost_scales_and_truncates() {
        let mut samples = vec![1000, -1000];
        apply_gain(&mut samples, 2.0);
        assert_eq!(samples, vec![2000, -2000]);
    }

    #[test]
    fn gain_level_from_db() {
        assert_eq!(GainLevel::try_from(12), Ok(GainLevel::Plus12));
        assert!(GainLevel::try_from(3).is_err());
        assert_eq!(u8::from(GainLevel::Plus18), 18);
    }
}
