//! The four normalization strategies.
//!
//! Each function is total for equal-length inputs and never fails; band
//! count agreement is checked by [`check_bands`] before dispatch.

use crate::error::NormError;
use crate::spectral::{clip, mean, percentile, std_dev};

/// Floor for reference values in the ratio modes.
pub const EPS: f64 = 1e-9;
/// Upper clip of the ratio modes.
pub const RATIO_MAX: f64 = 2.0;
/// Percentile the NONE fallback clips at.
pub const NONE_PERCENTILE: f64 = 99.9;

fn ratio(sample: &[f64], reference: &[f64]) -> Vec<f64> {
    sample
        .iter()
        .zip(reference)
        .map(|(&s, &r)| clip(s / r.max(EPS), 0.0, RATIO_MAX))
        .collect()
}

/// `clip(sample / max(cloth, EPS), 0, 2)`.
pub fn normalize_cloth(sample: &[f64], cloth: &[f64]) -> Vec<f64> {
    ratio(sample, cloth)
}

/// Same contract as [`normalize_cloth`] with the healthy baseline as divisor.
pub fn normalize_baseline(sample: &[f64], baseline: &[f64]) -> Vec<f64> {
    ratio(sample, baseline)
}

/// Z-score, then min-max rescale into `[0, 1]`.
///
/// Statistics cover the finite bands only; a NaN or infinite band stays NaN
/// so the self-check rejects the table. Flat input (std < EPS) gives zeros,
/// a degenerate z-range gives 0.5.
pub fn normalize_zscore(sample: &[f64]) -> Vec<f64> {
    let finite: Vec<f64> = sample.iter().copied().filter(|v| v.is_finite()).collect();
    let keep_finite = |v: f64, out: f64| if v.is_finite() { out } else { f64::NAN };
    if finite.is_empty() {
        return vec![f64::NAN; sample.len()];
    }

    let m = mean(&finite);
    let sd = std_dev(&finite);
    if sd < EPS {
        return sample.iter().map(|&v| keep_finite(v, 0.0)).collect();
    }
    rescale_unit(sample.iter().map(|&v| keep_finite(v, (v - m) / sd)).collect())
}

/// Min-max rescale into `[0, 1]` over the non-NaN entries; a range below
/// EPS maps them to 0.5. NaN entries pass through.
fn rescale_unit(z: Vec<f64>) -> Vec<f64> {
    let (lo, hi) = z
        .iter()
        .filter(|v| !v.is_nan())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let range = hi - lo;
    if range < EPS {
        return z.into_iter().map(|v| if v.is_nan() { v } else { 0.5 }).collect();
    }
    z.into_iter().map(|v| clip((v - lo) / range, 0.0, 1.0)).collect()
}

/// Fallback: `clip(sample, 0, p99.9(sample))`.
///
/// The upper bound never drops below zero so the output is non-negative
/// even for an all-negative spectrum.
pub fn normalize_none(sample: &[f64]) -> Vec<f64> {
    let upper = percentile(sample, NONE_PERCENTILE);
    let upper = if upper.is_nan() { f64::INFINITY } else { upper.max(0.0) };
    sample.iter().map(|&v| clip(v, 0.0, upper)).collect()
}

/// Reject a reference whose band count differs from the sample's.
pub fn check_bands(sample: &[f64], reference: &[f64], what: &str) -> Result<(), NormError> {
    if sample.len() != reference.len() {
        return Err(NormError::BandMismatch {
            sample: sample.len(),
            reference: what.to_string(),
            found: reference.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn in_range(v: &[f64], lo: f64, hi: f64) -> bool {
        v.iter().all(|x| *x >= lo && *x <= hi)
    }

    #[test]
    fn cloth_divides_and_clips() {
        let out = normalize_cloth(&[1.0, 2.0, 3.0], &[2.0, 2.0, 2.0]);
        assert_eq!(out, vec![0.5, 1.0, 1.5]);

        let out = normalize_cloth(&[-1.0, 5.0, 1.0], &[1.0, 1.0, 0.0]);
        assert_eq!(out, vec![0.0, 2.0, 2.0]);
    }

    #[test]
    fn ratio_modes_bounded_over_varied_inputs() {
        let samples = [
            vec![0.0, 1e-12, 1e12, -3.0],
            vec![0.3, 0.6, 0.9, 1.2],
            vec![-1e9, 7.0, 0.5, 1e-3],
        ];
        let refs = [
            vec![0.0, 0.0, 1.0, 1.0],
            vec![-5.0, 1e-15, 0.2, 100.0],
            vec![0.5, 0.5, 0.5, 0.5],
        ];
        for s in &samples {
            for r in &refs {
                assert!(in_range(&normalize_cloth(s, r), 0.0, RATIO_MAX));
                assert!(in_range(&normalize_baseline(s, r), 0.0, RATIO_MAX));
            }
        }
    }

    #[test]
    fn zscore_rescales_into_unit_range() {
        let out = normalize_zscore(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(out.first(), Some(&0.0));
        assert_eq!(out.last(), Some(&1.0));
        assert!(in_range(&out, 0.0, 1.0));

        let out = normalize_zscore(&[-1e6, 3.0, 1e6, 0.1, 42.0]);
        assert!(in_range(&out, 0.0, 1.0));
    }

    #[test]
    fn zscore_flat_input_is_zero() {
        assert_eq!(normalize_zscore(&[0.7; 5]), vec![0.0; 5]);
    }

    #[test]
    fn zscore_degenerate_range_is_half() {
        assert_eq!(rescale_unit(vec![1.5, 1.5, 1.5]), vec![0.5; 3]);
        assert_eq!(normalize_zscore(&[0.0, 1.0]), vec![0.0, 1.0]);
        assert_eq!(normalize_zscore(&[3.0]), vec![0.0]);
    }

    #[test]
    fn zscore_keeps_missing_bands_missing() {
        let out = normalize_zscore(&[0.1, 0.4, f64::NAN, 0.9]);
        assert!(out[2].is_nan());
        assert_eq!(out[0], 0.0);
        assert_eq!(out[3], 1.0);
        assert!(out[1] > 0.0 && out[1] < 1.0);

        let out = normalize_zscore(&[0.5, f64::INFINITY, 0.5]);
        assert_eq!(out[0], 0.0);
        assert!(out[1].is_nan());

        assert!(normalize_zscore(&[f64::NAN; 3]).iter().all(|v| v.is_nan()));
    }

    #[test]
    fn none_clips_at_percentile_and_zero() {
        let sample = [1.0, 2.0, 100.0];
        let out = normalize_none(&sample);
        let p = percentile(&sample, NONE_PERCENTILE);
        assert!(out.iter().all(|v| *v <= p && *v >= 0.0));
        assert_eq!(out[0], 1.0);

        let out = normalize_none(&[-3.0, -2.0, -1.0]);
        assert_eq!(out, vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn band_mismatch_is_reported() {
        let err = check_bands(&[1.0, 2.0], &[1.0], "baseline").unwrap_err();
        assert_eq!(
            err,
            NormError::BandMismatch {
                sample: 2,
                reference: "baseline".into(),
                found: 1
            }
        );
        assert!(check_bands(&[1.0], &[2.0], "cloth").is_ok());
    }
}
