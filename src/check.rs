//! Self-check: re-reads the metadata table and every spectrum table and
//! verifies them against the mode each table declares.
//!
//! ```text
//!  LOAD_METADATA → VALIDATE_METADATA → VALIDATE_OUTPUTS → POLICY_CHECK → REPORT
//!        │                │                   │                 │
//!        └────────────────┴───────────────────┴─────────────────┴──► FAIL
//! ```
//! REPORT runs on both outcomes and appends to the trace log.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::config::Config;
use crate::data::loader::{parse_flag, read_metadata_table, MetadataTable};
use crate::data::model::{file_name_of, Sensor};
use crate::export::writer::SPECTRUM_SUFFIX;
use crate::norm::baseline::any_baseline_file;
use crate::norm::mode::{NormMode, RequestedMode};
use crate::trace::{append_trace, format_counts};

pub const META_REQUIRED_COLUMNS: [&str; 4] = ["sensor", "is_ref", "timepoint", "file_name"];
pub const SPECTRUM_REQUIRED_COLUMNS: [&str; 7] = [
    "band_idx",
    "wavelength_nm",
    "refl_norm",
    "sensor",
    "timepoint",
    "ref_file",
    "norm_mode_used",
];
pub const MIN_SPECTRUM_FILES: usize = 3;
/// Share of ZSCORE files above which an AUTO run is flagged.
pub const ZSCORE_WARN_FRACTION: f64 = 0.25;

// ---------------------------------------------------------------------------
// Failures and stages
// ---------------------------------------------------------------------------

/// A failing self-check condition.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CheckFailure {
    #[error("missing {}. Run the inventory step first", .0.display())]
    MissingMetadata(PathBuf),

    #[error("unreadable {file}: {reason}")]
    Unreadable { file: String, reason: String },

    #[error("metadata table is empty; rerun the inventory with valid raw data")]
    EmptyMetadata,

    #[error("metadata table missing required columns: {0}")]
    MetadataColumns(String),

    #[error("no non-cloth samples found in metadata table")]
    NoSamples,

    #[error("need at least one non-cloth VISNIR and SWIR sample")]
    SensorCoverage,

    #[error("found {0} *_spectrum.csv files, need at least 3")]
    TooFewSpectra(usize),

    #[error("{file} missing columns: {columns}")]
    SpectrumColumns { file: String, columns: String },

    #[error("inconsistent norm_mode_used in {file}: header {header}, rows {rows:?}")]
    ModeMismatch {
        file: String,
        header: String,
        rows: Vec<String>,
    },

    #[error("{file}: '{mode}' is not a recorded normalization mode")]
    UnknownMode { file: String, mode: String },

    #[error("{file} contains NaN, Inf or non-numeric reflectance values")]
    NonFinite { file: String },

    #[error("{file} (mode: {mode}) has reflectance outside [{lo}, {hi}]")]
    OutOfRange {
        file: String,
        mode: NormMode,
        lo: f64,
        hi: f64,
    },

    #[error("norm_mode is CLOTH, but no CLOTH rows produced")]
    NoClothRows,

    #[error("norm_mode is BASELINE, but no baseline_<SENSOR>.csv file was found")]
    NoBaselineFile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckStage {
    LoadMetadata,
    ValidateMetadata,
    ValidateOutputs,
    PolicyCheck,
    Report,
}

impl fmt::Display for CheckStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CheckStage::LoadMetadata => "LOAD_METADATA",
            CheckStage::ValidateMetadata => "VALIDATE_METADATA",
            CheckStage::ValidateOutputs => "VALIDATE_OUTPUTS",
            CheckStage::PolicyCheck => "POLICY_CHECK",
            CheckStage::Report => "REPORT",
        })
    }
}

// ---------------------------------------------------------------------------
// Stats and report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetaStats {
    pub rows: usize,
    /// Non-reference rows per sensor
    pub sensor_counts: BTreeMap<String, usize>,
    /// Non-reference rows per timepoint
    pub timepoint_counts: BTreeMap<String, usize>,
}

/// Figures gathered from one spectrum table.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrumFileStats {
    pub mode: NormMode,
    pub sensor: String,
    pub rows: usize,
    pub mean_refl: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SpectraStats {
    pub files: Vec<PathBuf>,
    pub total_rows: usize,
    pub per_sensor_mean: BTreeMap<String, f64>,
    pub mode_files: BTreeMap<String, usize>,
    pub mode_rows: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CheckStatus {
    Pass,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureInfo {
    pub stage: CheckStage,
    pub message: String,
}

/// Structured outcome of a self-check run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckReport {
    pub status: CheckStatus,
    pub configured_mode: RequestedMode,
    pub meta: Option<MetaStats>,
    pub spectra: Option<SpectraStats>,
    pub warnings: Vec<String>,
    pub failure: Option<FailureInfo>,
}

impl CheckReport {
    pub fn passed(&self) -> bool {
        self.status == CheckStatus::Pass
    }

    /// Process exit code: 0 on PASS, 1 on FAIL.
    pub fn exit_code(&self) -> i32 {
        if self.passed() {
            0
        } else {
            1
        }
    }

    pub fn render(&self) -> String {
        let mut lines = vec![
            "SELF-CHECK REPORT".to_string(),
            format!("status={}", if self.passed() { "PASS" } else { "FAIL" }),
            format!("configured_mode={}", self.configured_mode),
        ];
        if let Some(failure) = &self.failure {
            lines.push(format!("stage={}", failure.stage));
            lines.push(format!("error={}", failure.message));
        }
        if let Some(meta) = &self.meta {
            lines.push(format!("meta_rows={}", meta.rows));
            lines.push(format!("sensors={}", format_counts(&meta.sensor_counts)));
            lines.push(format!("timepoints={}", format_counts(&meta.timepoint_counts)));
        }
        if let Some(spectra) = &self.spectra {
            lines.push(format!("spectra_files={}", spectra.files.len()));
            lines.push(format!("spectra_rows={}", spectra.total_rows));
            lines.push(format!("norm_modes_used={}", format_counts(&spectra.mode_files)));
            let means: Vec<String> = spectra
                .per_sensor_mean
                .iter()
                .map(|(s, m)| format!("'{s}': {m:.4}"))
                .collect();
            lines.push(format!("sensor_mean_refl={{{}}}", means.join(", ")));
        }
        if !self.warnings.is_empty() {
            lines.push(String::new());
            lines.push("WARNINGS:".to_string());
            lines.extend(self.warnings.iter().map(|w| format!("- {w}")));
        }
        lines.join("\n")
    }
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

/// LOAD_METADATA
pub fn load_metadata(config: &Config) -> Result<MetadataTable, CheckFailure> {
    let path = config.metadata_path();
    if !path.exists() {
        return Err(CheckFailure::MissingMetadata(path));
    }
    read_metadata_table(&path).map_err(|e| CheckFailure::Unreadable {
        file: file_name_of(&path),
        reason: format!("{e:#}"),
    })
}

/// VALIDATE_METADATA
pub fn validate_metadata(table: &MetadataTable) -> Result<MetaStats, CheckFailure> {
    if table.rows.is_empty() {
        return Err(CheckFailure::EmptyMetadata);
    }

    let mut missing: Vec<&str> = Vec::new();
    if table.path_column().is_none() {
        missing.push("hdr_path|bil_path");
    }
    missing.extend(META_REQUIRED_COLUMNS.iter().copied().filter(|c| table.column(c).is_none()));
    if !missing.is_empty() {
        return Err(CheckFailure::MetadataColumns(missing.join(", ")));
    }

    let col = |name: &str| table.column(name).unwrap_or_default();
    let (sensor_idx, ref_idx, tp_idx) = (col("sensor"), col("is_ref"), col("timepoint"));

    let mut stats = MetaStats {
        rows: table.rows.len(),
        ..MetaStats::default()
    };
    for row in table
        .rows
        .iter()
        .filter(|r| !parse_flag(r.get(ref_idx).unwrap_or("")))
    {
        let sensor = Sensor::parse(row.get(sensor_idx).unwrap_or(""));
        *stats.sensor_counts.entry(sensor.to_string()).or_default() += 1;
        let tp = row.get(tp_idx).unwrap_or("").trim().to_string();
        *stats.timepoint_counts.entry(tp).or_default() += 1;
    }

    if stats.sensor_counts.is_empty() {
        return Err(CheckFailure::NoSamples);
    }
    let has = |s: Sensor| stats.sensor_counts.get(s.as_str()).copied().unwrap_or(0) > 0;
    if !has(Sensor::VisNir) || !has(Sensor::Swir) {
        return Err(CheckFailure::SensorCoverage);
    }
    Ok(stats)
}

/// Every `*_spectrum.csv` in `out_dir`, sorted.
pub fn spectrum_files(out_dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(out_dir)
        .map(|entries| {
            entries
                .flatten()
                .map(|e| e.path())
                .filter(|p| p.is_file() && file_name_of(p).ends_with(SPECTRUM_SUFFIX))
                .collect()
        })
        .unwrap_or_default();
    files.sort();
    files
}

/// Validate one spectrum table against the mode it declares.
pub fn validate_spectrum_file(path: &Path) -> Result<SpectrumFileStats, CheckFailure> {
    let file = file_name_of(path);
    let unreadable = |reason: String| CheckFailure::Unreadable {
        file: file.clone(),
        reason,
    };

    let text = std::fs::read_to_string(path).map_err(|e| unreadable(e.to_string()))?;
    let first = text.lines().next().unwrap_or("");
    let header_mode = if first.contains("Normalization mode used") {
        first.rsplit(':').next().unwrap_or("").trim().to_string()
    } else {
        "UNKNOWN".to_string()
    };

    let mut reader = csv::ReaderBuilder::new()
        .comment(Some(b'#'))
        .from_reader(text.as_bytes());
    let headers = reader.headers().map_err(|e| unreadable(e.to_string()))?.clone();
    let column = |name: &str| headers.iter().position(|h| h.trim() == name);

    let missing: Vec<&str> = SPECTRUM_REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|c| column(c).is_none())
        .collect();
    if !missing.is_empty() {
        return Err(CheckFailure::SpectrumColumns {
            file,
            columns: missing.join(", "),
        });
    }
    let (refl_idx, sensor_idx, mode_idx) = (
        column("refl_norm").unwrap_or_default(),
        column("sensor").unwrap_or_default(),
        column("norm_mode_used").unwrap_or_default(),
    );

    let records = reader
        .records()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| unreadable(e.to_string()))?;

    let row_modes: BTreeSet<String> = records
        .iter()
        .map(|r| r.get(mode_idx).unwrap_or("").trim().to_string())
        .collect();
    if row_modes.len() != 1 || !row_modes.contains(&header_mode) {
        return Err(CheckFailure::ModeMismatch {
            file,
            header: header_mode,
            rows: row_modes.into_iter().collect(),
        });
    }
    let mode = NormMode::parse(&header_mode).ok_or_else(|| CheckFailure::UnknownMode {
        file: file.clone(),
        mode: header_mode.clone(),
    })?;

    let refl: Vec<f64> = records
        .iter()
        .map(|r| {
            r.get(refl_idx)
                .and_then(|v| v.trim().parse::<f64>().ok())
                .unwrap_or(f64::NAN)
        })
        .collect();
    if refl.iter().any(|v| !v.is_finite()) {
        return Err(CheckFailure::NonFinite { file });
    }
    if let Some((lo, hi)) = mode.bounds() {
        if refl.iter().any(|v| *v < lo || *v > hi) {
            return Err(CheckFailure::OutOfRange { file, mode, lo, hi });
        }
    }

    Ok(SpectrumFileStats {
        mode,
        sensor: records[0].get(sensor_idx).unwrap_or("").trim().to_string(),
        rows: records.len(),
        mean_refl: crate::spectral::mean(&refl),
    })
}

/// VALIDATE_OUTPUTS
pub fn validate_outputs(out_dir: &Path) -> Result<SpectraStats, CheckFailure> {
    let files = spectrum_files(out_dir);
    if files.len() < MIN_SPECTRUM_FILES {
        return Err(CheckFailure::TooFewSpectra(files.len()));
    }

    let mut stats = SpectraStats::default();
    let mut sensor_means: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for path in &files {
        let file = validate_spectrum_file(path)?;
        log::debug!("{} ok: {} rows, mode {}", path.display(), file.rows, file.mode);
        *stats.mode_files.entry(file.mode.to_string()).or_default() += 1;
        *stats.mode_rows.entry(file.mode.to_string()).or_default() += file.rows;
        sensor_means.entry(file.sensor).or_default().push(file.mean_refl);
        stats.total_rows += file.rows;
    }
    stats.per_sensor_mean = sensor_means
        .into_iter()
        .map(|(sensor, means)| (sensor, crate::spectral::mean(&means)))
        .collect();
    stats.files = files;
    Ok(stats)
}

/// POLICY_CHECK: configured mode against what the outputs actually used.
///
/// Returns non-fatal warnings.
pub fn policy_check(config: &Config, spectra: &SpectraStats) -> Result<Vec<String>, CheckFailure> {
    let used = |mode: NormMode| spectra.mode_rows.get(mode.as_str()).copied().unwrap_or(0);
    let mut warnings = Vec::new();

    match config.norm_mode {
        RequestedMode::Cloth if used(NormMode::Cloth) == 0 => return Err(CheckFailure::NoClothRows),
        RequestedMode::Baseline if !any_baseline_file(&config.out_dir) => {
            return Err(CheckFailure::NoBaselineFile)
        }
        RequestedMode::Auto => {
            let total = spectra.files.len();
            let zscore = spectra
                .mode_files
                .get(NormMode::Zscore.as_str())
                .copied()
                .unwrap_or(0);
            if total > 0 {
                let fraction = zscore as f64 / total as f64;
                if fraction > ZSCORE_WARN_FRACTION {
                    warnings.push(format!(
                        "{:.0}% of files used ZSCORE fallback. Check calibration cloth and lighting conditions.",
                        fraction * 100.0
                    ));
                }
            }
        }
        _ => {}
    }
    Ok(warnings)
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// Run every stage, then REPORT (trace line) regardless of outcome.
pub fn run_self_check(config: &Config) -> CheckReport {
    let mut report = CheckReport {
        status: CheckStatus::Pass,
        configured_mode: config.norm_mode,
        meta: None,
        spectra: None,
        warnings: Vec::new(),
        failure: None,
    };

    if let Err((stage, failure)) = run_stages(config, &mut report) {
        log::error!("self-check failed at {stage}: {failure}");
        report.status = CheckStatus::Fail;
        report.failure = Some(FailureInfo {
            stage,
            message: failure.to_string(),
        });
    }
    for w in &report.warnings {
        log::warn!("{w}");
    }

    log::debug!("self-check stage {}", CheckStage::Report);
    let status = if report.passed() { "PASS" } else { "FAIL" };
    let (files, rows, modes) = report.spectra.as_ref().map_or((0, 0, BTreeMap::new()), |s| {
        (s.files.len(), s.total_rows, s.mode_files.clone())
    });
    let trace = append_trace(
        &config.trace_log_path(),
        "self_check",
        &[
            ("status", status.to_string()),
            ("configured_mode", config.norm_mode.to_string()),
            ("meta_rows", report.meta.as_ref().map_or(0, |m| m.rows).to_string()),
            ("spectra_count", files.to_string()),
            ("spectra_rows", rows.to_string()),
            ("modes", format_counts(&modes)),
        ],
    );
    if let Err(e) = trace {
        log::error!("could not append self-check trace: {e:#}");
    }
    report
}

fn run_stages(config: &Config, report: &mut CheckReport) -> Result<(), (CheckStage, CheckFailure)> {
    let at = |stage: CheckStage| {
        log::debug!("self-check stage {stage}");
        move |failure: CheckFailure| (stage, failure)
    };

    let table = load_metadata(config).map_err(at(CheckStage::LoadMetadata))?;
    report.meta = Some(validate_metadata(&table).map_err(at(CheckStage::ValidateMetadata))?);
    let spectra = validate_outputs(&config.out_dir).map_err(at(CheckStage::ValidateOutputs))?;
    let warnings = policy_check(config, &spectra).map_err(at(CheckStage::PolicyCheck));
    report.spectra = Some(spectra);
    report.warnings = warnings?;
    Ok(())
}
