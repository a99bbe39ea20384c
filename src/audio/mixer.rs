//! PCM mixing
//!
//! The mix is the plain average of two interleaved 16-bit buffers, with
//! the division flooring toward negative infinity. Floor (rather than
//! truncation toward zero) matters for negative sample pairs:
//! (-3 + -4) / 2 must be -4, not -3. Averaging two in-range samples
//! cannot leave the i16 range, so no saturation step is needed.

use super::AudioBuffer;
use crate::error::MixError;

/// Average two equal-length PCM buffers sample-by-sample.
///
/// Fails with `LengthMismatch` for unequal lengths; callers mixing a
/// partial clip tail must pre-slice both buffers to the shorter length.
pub fn mix(a: &[i16], b: &[i16]) -> Result<AudioBuffer, MixError> {
    if a.len() != b.len() {
        return Err(MixError::LengthMismatch {
            left: a.len(),
            right: b.len(),
        });
    }

    Ok(a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| ((x as i32 + y as i32).div_euclid(2)) as i16)
        .collect())
}

/// Scale a buffer by a linear gain factor, in place.
///
/// Unity gain is a no-op so the floor-average semantics of `mix` stay
/// bit-exact for sounds with no volume adjustment.
pub fn apply_gain(buf: &mut [i16], gain: f32) {
    if (gain - 1.0).abs() < f32::EPSILON {
        return;
    }
    for sample in buf.iter_mut() {
        let scaled = (*sample as f32 * gain).round();
        *sample = scaled.clamp(i16::MIN as f32, i16::MAX as f32) as i16;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mix_simple_average() {
        let mixed = mix(&[100, 200, 300], &[300, 200, 100]).unwrap();
        assert_eq!(mixed, vec![200, 200, 200]);
    }

    #[test]
    fn test_mix_preserves_length() {
        let a = vec![0i16; 1024];
        let b = vec![1000i16; 1024];
        assert_eq!(mix(&a, &b).unwrap().len(), 1024);
    }

    #[test]
    fn test_mix_floors_negative_results() {
        // floor(-7 / 2) = -4; truncation toward zero would give -3
        let mixed = mix(&[-3], &[-4]).unwrap();
        assert_eq!(mixed, vec![-4]);

        let mixed = mix(&[-1], &[0]).unwrap();
        assert_eq!(mixed, vec![-1]);

        let mixed = mix(&[1], &[0]).unwrap();
        assert_eq!(mixed, vec![0]);
    }

    #[test]
    fn test_mix_extremes_stay_in_range() {
        let mixed = mix(&[i16::MAX, i16::MIN], &[i16::MAX, i16::MIN]).unwrap();
        assert_eq!(mixed, vec![i16::MAX, i16::MIN]);

        // sum is -1, floor(-1 / 2) = -1
        let mixed = mix(&[i16::MAX], &[i16::MIN]).unwrap();
        assert_eq!(mixed, vec![-1]);
    }

    #[test]
    fn test_mix_length_mismatch() {
        let err = mix(&[1, 2, 3], &[1, 2]).unwrap_err();
        assert_eq!(err, MixError::LengthMismatch { left: 3, right: 2 });
    }

    #[test]
    fn test_apply_gain_unity_is_exact() {
        let mut buf = vec![-3, 7, i16::MAX, i16::MIN];
        let original = buf.clone();
        apply_gain(&mut buf, 1.0);
        assert_eq!(buf, original);
    }

    #[test]
    fn test_apply_gain_halves() {
        let mut buf = vec![1000, -1000];
        apply_gain(&mut buf, 0.5);
        assert_eq!(buf, vec![500, -500]);
    }

    #[test]
    fn test_apply_gain_clamps() {
        let mut buf = vec![i16::MAX, i16::MIN];
        apply_gain(&mut buf, 2.0);
        assert_eq!(buf, vec![i16::MAX, i16::MIN]);
    }
}
