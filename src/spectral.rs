//! Band-wise reductions shared by the reducer, the baseline cache and the normalizer.

use crate::data::model::Cube;

/// Collapse a cube to its mean spectrum over both spatial axes.
///
/// NaN entries are excluded from their band's mean; a band with no finite
/// entries comes out as NaN.
pub fn mean_spectrum(cube: &Cube) -> Vec<f64> {
    let mut sums = vec![0.0; cube.bands];
    let mut counts = vec![0usize; cube.bands];
    for pixel in cube.pixels() {
        for (b, &v) in pixel.iter().enumerate() {
            if !v.is_nan() {
                sums[b] += v;
                counts[b] += 1;
            }
        }
    }
    sums.into_iter()
        .zip(counts)
        .map(|(s, n)| if n == 0 { f64::NAN } else { s / n as f64 })
        .collect()
}

/// NaN-aware band-wise mean across equally long spectra.
pub fn nan_mean_spectra(spectra: &[Vec<f64>]) -> Vec<f64> {
    let bands = spectra.first().map_or(0, Vec::len);
    (0..bands)
        .map(|b| {
            let (sum, n) = spectra
                .iter()
                .filter_map(|s| s.get(b).copied())
                .filter(|v| !v.is_nan())
                .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
            if n == 0 {
                f64::NAN
            } else {
                sum / n as f64
            }
        })
        .collect()
}

/// Arithmetic mean; NaN for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation.
pub fn std_dev(values: &[f64]) -> f64 {
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

/// Percentile `q` in `[0, 100]` with linear interpolation between ranks,
/// computed over the finite values only. NaN when none are finite.
pub fn percentile(values: &[f64], q: f64) -> f64 {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return f64::NAN;
    }
    sorted.sort_by(f64::total_cmp);
    let rank = (q / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Clip into `[lo, hi]`; NaN passes through unchanged.
pub fn clip(v: f64, lo: f64, hi: f64) -> f64 {
    if v.is_nan() {
        v
    } else if v < lo {
        lo
    } else if v > hi {
        hi
    } else {
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_spectrum_skips_nan() {
        let cube = Cube::new(1, 3, 2, vec![1.0, 10.0, f64::NAN, 20.0, 3.0, f64::NAN]).unwrap();
        let spec = mean_spectrum(&cube);
        assert_eq!(spec, vec![2.0, 15.0]);
    }

    #[test]
    fn all_nan_band_is_nan() {
        let cube = Cube::new(1, 2, 2, vec![f64::NAN, 1.0, f64::NAN, 3.0]).unwrap();
        let spec = mean_spectrum(&cube);
        assert!(spec[0].is_nan());
        assert_eq!(spec[1], 2.0);
    }

    #[test]
    fn nan_mean_across_spectra() {
        let out = nan_mean_spectra(&[vec![1.0, f64::NAN], vec![3.0, 4.0]]);
        assert_eq!(out, vec![2.0, 4.0]);
        assert!(nan_mean_spectra(&[]).is_empty());
    }

    #[test]
    fn percentile_interpolates_like_numpy() {
        let v = [1.0, 2.0, 100.0];
        assert_eq!(percentile(&v, 50.0), 2.0);
        assert!((percentile(&v, 99.9) - 99.804).abs() < 1e-9);
        assert_eq!(percentile(&v, 100.0), 100.0);
    }

    #[test]
    fn stats_and_clip() {
        assert_eq!(mean(&[1.0, 2.0, 3.0]), 2.0);
        assert!((std_dev(&[1.0, 3.0]) - 1.0).abs() < 1e-12);
        assert_eq!(clip(-1.0, 0.0, 2.0), 0.0);
        assert_eq!(clip(3.0, 0.0, 2.0), 2.0);
        assert!(clip(f64::NAN, 0.0, 2.0).is_nan());
    }
}
