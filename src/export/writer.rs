use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use serde::Serialize;

use crate::data::model::{SampleRecord, Sensor};
use crate::fsutil::write_atomic;
use crate::norm::mode::{NormMode, Resolution};

/// Leading annotation line of every spectrum table.
pub const MODE_ANNOTATION: &str = "# Normalization mode used:";
pub const SPECTRUM_SUFFIX: &str = "_spectrum.csv";

#[derive(Debug, Serialize)]
struct SpectrumRow<'a> {
    band_idx: usize,
    wavelength_nm: f64,
    refl_norm: f64,
    sensor: Sensor,
    timepoint: &'a str,
    ref_file: &'a str,
    norm_mode_used: NormMode,
}

/// `<out_dir>/<stem>_spectrum.csv`
pub fn spectrum_path(out_dir: &Path, sample: &SampleRecord) -> PathBuf {
    out_dir.join(format!("{}{SPECTRUM_SUFFIX}", sample.stem()))
}

/// Render the annotated spectrum table in memory.
pub fn render_spectrum(
    sample: &SampleRecord,
    wavelengths: &[f64],
    values: &[f64],
    resolution: &Resolution,
) -> Result<Vec<u8>> {
    if wavelengths.len() != values.len() {
        bail!(
            "{} wavelengths for {} normalized bands",
            wavelengths.len(),
            values.len()
        );
    }
    let mode = resolution.effective;
    let reference = resolution.reference.to_string();

    let mut buf = format!("{MODE_ANNOTATION} {mode}\n").into_bytes();
    {
        let mut writer = csv::Writer::from_writer(&mut buf);
        for (i, (wl, v)) in wavelengths.iter().zip(values).enumerate() {
            writer.serialize(SpectrumRow {
                band_idx: i,
                wavelength_nm: *wl,
                refl_norm: *v,
                sensor: sample.sensor,
                timepoint: &sample.timepoint,
                ref_file: &reference,
                norm_mode_used: mode,
            })?;
        }
        writer.flush()?;
    }
    Ok(buf)
}

/// Write one sample's table. Either the whole file lands or nothing does.
pub fn write_spectrum(
    path: &Path,
    sample: &SampleRecord,
    wavelengths: &[f64],
    values: &[f64],
    resolution: &Resolution,
) -> Result<()> {
    let bytes = render_spectrum(sample, wavelengths, values, resolution)?;
    write_atomic(path, &bytes)
}
