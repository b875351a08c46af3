//! Normalization engine: decide a mode per sample, then apply it.
//!
//! ```text
//!   Config.norm_mode ──┐
//!                      ▼
//!   SampleRecord ──► resolver ──► Plan ──► Normalizer ──► Normalized
//!                      ▲                     │   ▲
//!   BaselineCache ─────┘ (availability)      │   └── cloth mean spectra
//!                                            ▼
//!                                 Resolution {requested, effective, degraded}
//! ```

pub mod baseline;
pub mod mode;
pub mod normalize;
pub mod resolver;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use baseline::BaselineCache;
use mode::{NormMode, ReferenceId, Resolution};
use normalize::{check_bands, normalize_baseline, normalize_cloth, normalize_none, normalize_zscore};
use resolver::Plan;

use crate::data::loader::CubeLoader;
use crate::data::model::Sensor;
use crate::error::NormError;
use crate::spectral::mean_spectrum;

/// Normalized spectrum plus how it was produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub values: Vec<f64>,
    pub resolution: Resolution,
}

/// Applies a [`Plan`] to a sample's mean spectrum.
///
/// Cloth mean spectra are cached by path for the life of the normalizer.
pub struct Normalizer<'a> {
    loader: &'a dyn CubeLoader,
    baselines: &'a BaselineCache,
    cloth_spectra: BTreeMap<PathBuf, Vec<f64>>,
}

impl<'a> Normalizer<'a> {
    pub fn new(loader: &'a dyn CubeLoader, baselines: &'a BaselineCache) -> Self {
        Normalizer {
            loader,
            baselines,
            cloth_spectra: BTreeMap::new(),
        }
    }

    /// Execute `plan`, degrading to NONE when its reference data is missing.
    pub fn apply(&mut self, plan: &Plan, sensor: Sensor, sample: &[f64]) -> Result<Normalized, NormError> {
        let executed = match plan.mode {
            NormMode::Cloth => match plan.cloth.as_deref().and_then(|p| self.cloth_spectrum(p)) {
                Some((path, cloth)) => {
                    check_bands(sample, &cloth, "cloth reference")?;
                    Some((normalize_cloth(sample, &cloth), NormMode::Cloth, ReferenceId::Cloth(path)))
                }
                None => None,
            },
            NormMode::Baseline => match self.baselines.get(sensor) {
                Some(b) => {
                    check_bands(sample, &b.values, &format!("{sensor} baseline"))?;
                    Some((
                        normalize_baseline(sample, &b.values),
                        NormMode::Baseline,
                        ReferenceId::Baseline(sensor),
                    ))
                }
                None => None,
            },
            NormMode::Zscore => Some((normalize_zscore(sample), NormMode::Zscore, ReferenceId::Zscore)),
            NormMode::None => Some((normalize_none(sample), NormMode::None, ReferenceId::None)),
        };

        let (values, effective, reference) =
            executed.unwrap_or_else(|| (normalize_none(sample), NormMode::None, ReferenceId::None));

        Ok(Normalized {
            values,
            resolution: Resolution {
                requested: plan.requested,
                effective,
                degraded: effective != plan.mode,
                reference,
            },
        })
    }

    fn cloth_spectrum(&mut self, path: &Path) -> Option<(PathBuf, Vec<f64>)> {
        if let Some(spec) = self.cloth_spectra.get(path) {
            return Some((path.to_path_buf(), spec.clone()));
        }
        match self.loader.load(path) {
            Ok(loaded) => {
                let spec = mean_spectrum(&loaded.cube);
                self.cloth_spectra.insert(path.to_path_buf(), spec.clone());
                Some((path.to_path_buf(), spec))
            }
            Err(e) => {
                log::warn!("Cloth reference {} unavailable: {e:#}", path.display());
                None
            }
        }
    }
}
