//! Run configuration.
//!
//! One value is built at startup (defaults → optional TOML file → CLI/env
//! overrides) and passed explicitly to every stage.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::norm::mode::RequestedMode;

pub const METADATA_FILE: &str = "hsi_meta.csv";
pub const RUN_LOG_FILE: &str = "export_spectra_run.csv";
pub const TRACE_LOG_FILE: &str = "trace_log.txt";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// AUTO | CLOTH | BASELINE | ZSCORE
    pub norm_mode: RequestedMode,
    /// Timepoint treated as the healthy baseline
    pub baseline_timepoint: String,
    /// Raw `*.hdr` / `*.bil` cubes
    pub data_dir: PathBuf,
    /// Metadata table, baselines and spectrum tables
    pub out_dir: PathBuf,
    /// Run log and trace log
    pub reports_dir: PathBuf,
    /// Recompute a persisted baseline whose contributor digest is stale
    pub refresh_stale_baselines: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            norm_mode: RequestedMode::Auto,
            baseline_timepoint: "D0".to_string(),
            data_dir: PathBuf::from("data/tomato_leaf"),
            out_dir: PathBuf::from("data_processed"),
            reports_dir: PathBuf::from("reports"),
            refresh_stale_baselines: false,
        }
    }
}

impl Config {
    /// Load from a TOML file; absent keys keep their defaults.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::from_str(&text).map_err(|e| {
            ConfigError::InvalidFile {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.out_dir.join(METADATA_FILE)
    }

    pub fn run_log_path(&self) -> PathBuf {
        self.reports_dir.join(RUN_LOG_FILE)
    }

    pub fn trace_log_path(&self) -> PathBuf {
        self.reports_dir.join(TRACE_LOG_FILE)
    }

    /// Create the output and report directories.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.out_dir, &self.reports_dir] {
            std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        }
        Ok(())
    }
}
