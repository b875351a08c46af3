//! Export stage: one normalized spectrum table per leaf sample.
//!
//! Baselines are resolved for every sensor before the sample loop starts
//! and stay fixed for the rest of the run. A failing sample is logged with
//! status ERR and the loop moves on.

pub mod writer;

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::Serialize;

use crate::config::Config;
use crate::data::loader::{load_inventory, CubeLoader};
use crate::data::model::{file_name_of, Inventory, SampleRecord, Sensor};
use crate::fsutil::write_atomic;
use crate::norm::baseline::BaselineCache;
use crate::norm::mode::{NormMode, ReferenceId, Resolution};
use crate::norm::resolver::resolve;
use crate::norm::Normalizer;
use crate::spectral::mean_spectrum;
use crate::trace::{append_trace, format_counts};
use writer::{spectrum_path, write_spectrum};

/// One row of `export_spectra_run.csv`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunLogRow {
    pub status: &'static str,
    pub file: String,
    pub sensor: String,
    pub timepoint: String,
    pub ref_file_used: String,
    pub norm_mode_used: String,
    pub out_path: String,
}

/// What happened to one sample.
#[derive(Debug, Clone)]
pub struct SampleOutcome {
    pub sample: PathBuf,
    pub result: std::result::Result<Exported, String>,
}

#[derive(Debug, Clone)]
pub struct Exported {
    pub resolution: Resolution,
    pub out_path: PathBuf,
}

/// Totals of one export run.
#[derive(Debug, Clone, Default)]
pub struct ExportSummary {
    pub outcomes: Vec<SampleOutcome>,
    pub modes: BTreeMap<NormMode, usize>,
}

impl ExportSummary {
    pub fn written(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.written()
    }

    pub fn degraded(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(&o.result, Ok(e) if e.resolution.degraded))
            .count()
    }
}

/// Run the export stage end to end.
///
/// Missing metadata aborts before any sample is touched; everything after
/// that is per-sample.
pub fn run_export(config: &Config, loader: &dyn CubeLoader) -> Result<ExportSummary> {
    let meta_path = config.metadata_path();
    let inventory = load_inventory(&meta_path)?;
    config.ensure_dirs()?;

    let mut baselines = BaselineCache::new(config);
    baselines.prepare(&inventory, loader)?;
    let available = baselines.available();
    let mut normalizer = Normalizer::new(loader, &baselines);

    let mut summary = ExportSummary::default();
    let mut log_rows = Vec::new();
    // Output names come from file stems; the first sample in table order owns a name.
    let mut claimed: BTreeMap<PathBuf, PathBuf> = BTreeMap::new();

    for sample in inventory.samples() {
        let out_path = spectrum_path(&config.out_dir, sample);
        let result = match claimed.get(&out_path) {
            Some(owner) => Err(anyhow!(
                "output {} is already taken by {}",
                out_path.display(),
                owner.display()
            )),
            None => export_sample(config, &inventory, sample, loader, &mut normalizer, &available, &out_path),
        };
        claimed.entry(out_path).or_insert_with(|| sample.path.clone());
        let row = match &result {
            Ok(exported) => {
                let res = &exported.resolution;
                println!("[OK] {} (mode: {})", sample.path.display(), res.effective);
                if res.degraded {
                    log::warn!(
                        "{}: {} requested, recorded as {}",
                        sample.path.display(),
                        res.requested,
                        res.effective
                    );
                }
                *summary.modes.entry(res.effective).or_default() += 1;
                RunLogRow {
                    status: "OK",
                    file: sample.file_name(),
                    sensor: sample.sensor.to_string(),
                    timepoint: sample.timepoint.clone(),
                    ref_file_used: reference_name(&res.reference),
                    norm_mode_used: res.effective.to_string(),
                    out_path: exported.out_path.display().to_string(),
                }
            }
            Err(e) => {
                println!("[ERR] {}: {e:#}", sample.path.display());
                log::error!("{}: {e:#}", sample.path.display());
                RunLogRow {
                    status: "ERR",
                    file: sample.file_name(),
                    sensor: sample.sensor.to_string(),
                    timepoint: sample.timepoint.clone(),
                    ref_file_used: "-".into(),
                    norm_mode_used: "-".into(),
                    out_path: format!("{e:#}"),
                }
            }
        };
        log_rows.push(row);
        summary.outcomes.push(SampleOutcome {
            sample: sample.path.clone(),
            result: result.map_err(|e| format!("{e:#}")),
        });
    }

    write_run_log(config, &log_rows)?;
    append_trace(
        &config.trace_log_path(),
        "export_spectra",
        &[
            ("written", summary.written().to_string()),
            ("failed", summary.failed().to_string()),
            ("degraded", summary.degraded().to_string()),
            ("modes", format_counts(&summary.modes)),
            ("src", meta_path.display().to_string()),
        ],
    )?;

    println!(
        "[DONE] spectra -> {}, files: {}",
        config.out_dir.display(),
        summary.written()
    );
    Ok(summary)
}

fn export_sample(
    config: &Config,
    inventory: &Inventory,
    sample: &SampleRecord,
    loader: &dyn CubeLoader,
    normalizer: &mut Normalizer<'_>,
    available: &BTreeSet<Sensor>,
    out_path: &Path,
) -> Result<Exported> {
    let loaded = loader
        .load(&sample.path)
        .with_context(|| format!("loading {}", sample.path.display()))?;
    let raw = mean_spectrum(&loaded.cube);

    let plan = resolve(config.norm_mode, sample, inventory, available);
    let normalized = normalizer.apply(&plan, sample.sensor, &raw)?;

    write_spectrum(
        out_path,
        sample,
        &loaded.wavelengths,
        &normalized.values,
        &normalized.resolution,
    )?;

    Ok(Exported {
        resolution: normalized.resolution,
        out_path: out_path.to_path_buf(),
    })
}

/// Cloth references are logged by file name, synthetic tags verbatim.
fn reference_name(reference: &ReferenceId) -> String {
    match reference {
        ReferenceId::Cloth(path) => file_name_of(path),
        other => other.to_string(),
    }
}

fn write_run_log(config: &Config, rows: &[RunLogRow]) -> Result<()> {
    let mut buf = Vec::new();
    {
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(&mut buf);
        writer.write_record([
            "status",
            "file",
            "sensor",
            "timepoint",
            "ref_file_used",
            "norm_mode_used",
            "out_path",
        ])?;
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
    }
    write_atomic(&config.run_log_path(), &buf)
}
