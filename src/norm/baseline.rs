//! Per-sensor healthy baseline spectrum, memoized in memory and mirrored to
//! `baseline_<SENSOR>.csv`.
//!
//! An existing file short-circuits recomputation; deleting it is the way to
//! force a rebuild. The file's leading comment records a SHA-256 over the
//! baseline timepoint and contributing paths so stale files can be detected.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::Config;
use crate::data::filter::baseline_contributors;
use crate::data::loader::CubeLoader;
use crate::data::model::{Inventory, SampleRecord, Sensor};
use crate::fsutil::write_atomic;
use crate::spectral::{mean_spectrum, nan_mean_spectra};

const DIGEST_PREFIX: &str = "# contributors_sha256:";

/// Mean healthy spectrum of one sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct BaselineSpectrum {
    pub sensor: Sensor,
    pub wavelengths: Vec<f64>,
    pub values: Vec<f64>,
    /// Contributor digest recorded with the file (absent in hand-written files).
    pub digest: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct BaselineRow {
    band_idx: usize,
    wavelength_nm: f64,
    refl_mean: f64,
}

/// Cache key of a baseline: the sensor plus a digest of what went into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaselineKey {
    pub sensor: Sensor,
    pub digest: String,
}

impl BaselineKey {
    pub fn new(sensor: Sensor, baseline_timepoint: &str, contributors: &[&SampleRecord]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(sensor.as_str().as_bytes());
        hasher.update(b"\n");
        hasher.update(baseline_timepoint.as_bytes());
        hasher.update(b"\n");
        for rec in contributors {
            hasher.update(rec.path.to_string_lossy().as_bytes());
            hasher.update(b"\n");
        }
        BaselineKey {
            sensor,
            digest: format!("{:x}", hasher.finalize()),
        }
    }
}

/// `<dir>/baseline_<SENSOR>.csv`
pub fn baseline_path(dir: &Path, sensor: Sensor) -> PathBuf {
    dir.join(format!("baseline_{sensor}.csv"))
}

/// Whether any `baseline_*.csv` exists in `dir`.
pub fn any_baseline_file(dir: &Path) -> bool {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return false;
    };
    entries.flatten().any(|e| {
        let name = e.file_name();
        let name = name.to_string_lossy();
        name.starts_with("baseline_") && name.ends_with(".csv")
    })
}

pub fn write_baseline(path: &Path, baseline: &BaselineSpectrum) -> Result<()> {
    let mut buf = Vec::new();
    if let Some(digest) = &baseline.digest {
        buf.extend_from_slice(format!("{DIGEST_PREFIX} {digest}\n").as_bytes());
    }
    {
        let mut writer = csv::Writer::from_writer(&mut buf);
        for (i, (wl, v)) in baseline.wavelengths.iter().zip(&baseline.values).enumerate() {
            writer.serialize(BaselineRow {
                band_idx: i,
                wavelength_nm: *wl,
                refl_mean: *v,
            })?;
        }
        writer.flush()?;
    }
    write_atomic(path, &buf)
}

pub fn read_baseline(path: &Path, sensor: Sensor) -> Result<BaselineSpectrum> {
    let file = std::fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut first = String::new();
    BufReader::new(file).read_line(&mut first)?;
    let digest = first
        .trim()
        .strip_prefix(DIGEST_PREFIX)
        .map(|d| d.trim().to_string());

    let mut reader = csv::ReaderBuilder::new()
        .comment(Some(b'#'))
        .from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;

    let mut wavelengths = Vec::new();
    let mut values = Vec::new();
    for (i, row) in reader.deserialize::<BaselineRow>().enumerate() {
        let row = row.with_context(|| format!("{} row {i}", path.display()))?;
        if row.band_idx != i {
            bail!("{}: band_idx {} at row {i}", path.display(), row.band_idx);
        }
        wavelengths.push(row.wavelength_nm);
        values.push(row.refl_mean);
    }
    if values.is_empty() {
        bail!("{}: no baseline rows", path.display());
    }

    Ok(BaselineSpectrum {
        sensor,
        wavelengths,
        values,
        digest,
    })
}

// ---------------------------------------------------------------------------
// BaselineCache
// ---------------------------------------------------------------------------

/// Lazily computed per-sensor baselines for one run.
///
/// Fill it with [`BaselineCache::prepare`] before iterating samples; after
/// that it is only read.
#[derive(Debug)]
pub struct BaselineCache {
    dir: PathBuf,
    baseline_timepoint: String,
    refresh_stale: bool,
    memo: BTreeMap<Sensor, Option<BaselineSpectrum>>,
}

impl BaselineCache {
    pub fn new(config: &Config) -> Self {
        BaselineCache {
            dir: config.out_dir.clone(),
            baseline_timepoint: config.baseline_timepoint.clone(),
            refresh_stale: config.refresh_stale_baselines,
            memo: BTreeMap::new(),
        }
    }

    /// Compute or load the baseline of every sensor that has leaf samples.
    pub fn prepare(&mut self, inventory: &Inventory, loader: &dyn CubeLoader) -> Result<()> {
        for sensor in inventory.sample_sensors() {
            self.ensure(sensor, inventory, loader)?;
        }
        Ok(())
    }

    /// Baseline of `sensor`, computing it at most once per run.
    pub fn ensure(
        &mut self,
        sensor: Sensor,
        inventory: &Inventory,
        loader: &dyn CubeLoader,
    ) -> Result<Option<&BaselineSpectrum>> {
        if !self.memo.contains_key(&sensor) {
            let baseline = self.load_or_compute(sensor, inventory, loader)?;
            self.memo.insert(sensor, baseline);
        }
        Ok(self.get(sensor))
    }

    pub fn get(&self, sensor: Sensor) -> Option<&BaselineSpectrum> {
        self.memo.get(&sensor).and_then(Option::as_ref)
    }

    /// Sensors with a usable baseline.
    pub fn available(&self) -> BTreeSet<Sensor> {
        self.memo
            .iter()
            .filter(|(_, b)| b.is_some())
            .map(|(s, _)| *s)
            .collect()
    }

    fn load_or_compute(
        &self,
        sensor: Sensor,
        inventory: &Inventory,
        loader: &dyn CubeLoader,
    ) -> Result<Option<BaselineSpectrum>> {
        let contributors = baseline_contributors(inventory, sensor, &self.baseline_timepoint);
        let key = BaselineKey::new(sensor, &self.baseline_timepoint, &contributors);
        let path = baseline_path(&self.dir, sensor);

        let cached = if path.exists() {
            match read_baseline(&path, sensor) {
                Ok(cached) => Some(cached),
                Err(e) => {
                    log::warn!("Ignoring unreadable {sensor} baseline, rebuilding: {e:#}");
                    None
                }
            }
        } else {
            None
        };
        if let Some(cached) = cached {
            let stale = cached.digest.as_deref().is_some_and(|d| d != key.digest);
            if !stale {
                log::info!("Using cached {sensor} baseline {}", path.display());
                return Ok(Some(cached));
            }
            if !self.refresh_stale {
                log::warn!(
                    "{} was built from different inputs; delete it to rebuild",
                    path.display()
                );
                return Ok(Some(cached));
            }
            log::info!("Rebuilding stale {sensor} baseline {}", path.display());
        }

        if contributors.is_empty() {
            log::warn!(
                "No {sensor} samples at baseline timepoint '{}'; baseline unavailable",
                self.baseline_timepoint
            );
            return Ok(None);
        }

        let mut wavelengths: Option<Vec<f64>> = None;
        let mut spectra = Vec::with_capacity(contributors.len());
        for rec in &contributors {
            let loaded = match loader.load(&rec.path) {
                Ok(loaded) => loaded,
                Err(e) => {
                    log::warn!("Excluding {} from {sensor} baseline: {e:#}", rec.path.display());
                    continue;
                }
            };
            let bands = wavelengths.get_or_insert_with(|| loaded.wavelengths.clone()).len();
            if loaded.cube.bands != bands {
                log::warn!(
                    "Excluding {} from {sensor} baseline: {} bands, expected {bands}",
                    rec.path.display(),
                    loaded.cube.bands
                );
                continue;
            }
            spectra.push(mean_spectrum(&loaded.cube));
        }

        let wavelengths = match wavelengths {
            Some(wl) if !spectra.is_empty() => wl,
            _ => {
                log::warn!("No {sensor} baseline cube could be loaded; baseline unavailable");
                return Ok(None);
            }
        };

        let baseline = BaselineSpectrum {
            sensor,
            wavelengths,
            values: nan_mean_spectra(&spectra),
            digest: Some(key.digest),
        };
        match write_baseline(&path, &baseline) {
            Ok(()) => log::info!(
                "Wrote {sensor} baseline from {} samples to {}",
                spectra.len(),
                path.display()
            ),
            Err(e) => log::error!("Could not persist {sensor} baseline: {e:#}"),
        }
        Ok(Some(baseline))
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::data::model::{Cube, LoadedCube};

    /// Serves uniform cubes and counts loads.
    struct Uniform {
        cubes: BTreeMap<PathBuf, Vec<f64>>,
        loads: RefCell<usize>,
    }

    impl CubeLoader for Uniform {
        fn load(&self, path: &Path) -> Result<LoadedCube> {
            *self.loads.borrow_mut() += 1;
            let spec = self.cubes.get(path).context("no such cube")?;
            Ok(LoadedCube {
                cube: Cube::uniform(2, 2, spec),
                wavelengths: (0..spec.len()).map(|b| 400.0 + b as f64).collect(),
            })
        }
    }

    fn rec(path: &str, sensor: Sensor, timepoint: &str) -> SampleRecord {
        SampleRecord {
            path: PathBuf::from(path),
            sensor,
            is_reference: false,
            timepoint: timepoint.to_string(),
        }
    }

    fn setup() -> (tempfile::TempDir, Config, Inventory, Uniform) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            out_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        let inv = Inventory::new(vec![
            rec("/d/v1.hdr", Sensor::VisNir, "D0"),
            rec("/d/v2.hdr", Sensor::VisNir, "D0"),
            rec("/d/v3.hdr", Sensor::VisNir, "D3"),
            rec("/d/s1.hdr", Sensor::Swir, "D3"),
        ]);
        let loader = Uniform {
            cubes: [
                (PathBuf::from("/d/v1.hdr"), vec![1.0, 2.0]),
                (PathBuf::from("/d/v2.hdr"), vec![3.0, 4.0]),
                (PathBuf::from("/d/v3.hdr"), vec![9.0, 9.0]),
            ]
            .into(),
            loads: RefCell::new(0),
        };
        (dir, config, inv, loader)
    }

    #[test]
    fn computes_mean_and_persists() {
        let (dir, config, inv, loader) = setup();
        let mut cache = BaselineCache::new(&config);
        cache.prepare(&inv, &loader).unwrap();

        let b = cache.get(Sensor::VisNir).unwrap();
        assert_eq!(b.values, vec![2.0, 3.0]);
        assert!(cache.get(Sensor::Swir).is_none());
        assert_eq!(cache.available(), [Sensor::VisNir].into());

        let on_disk = read_baseline(&baseline_path(dir.path(), Sensor::VisNir), Sensor::VisNir).unwrap();
        assert_eq!(&on_disk, b);
        assert!(!baseline_path(dir.path(), Sensor::Swir).exists());
        assert!(any_baseline_file(dir.path()));
    }

    #[test]
    fn memoized_within_a_run() {
        let (_dir, config, inv, loader) = setup();
        let mut cache = BaselineCache::new(&config);
        cache.ensure(Sensor::VisNir, &inv, &loader).unwrap();
        cache.ensure(Sensor::VisNir, &inv, &loader).unwrap();
        assert_eq!(*loader.loads.borrow(), 2);
    }

    #[test]
    fn existing_file_short_circuits() {
        let (dir, config, inv, loader) = setup();
        let path = baseline_path(dir.path(), Sensor::VisNir);
        std::fs::write(&path, "band_idx,wavelength_nm,refl_mean\n0,400,7.5\n1,401,8.5\n").unwrap();

        let mut cache = BaselineCache::new(&config);
        let b = cache.ensure(Sensor::VisNir, &inv, &loader).unwrap().unwrap();
        assert_eq!(b.values, vec![7.5, 8.5]);
        assert_eq!(*loader.loads.borrow(), 0);
    }

    #[test]
    fn stale_file_is_kept_unless_refresh_requested() {
        let (dir, mut config, inv, loader) = setup();
        let path = baseline_path(dir.path(), Sensor::VisNir);
        std::fs::write(
            &path,
            "# contributors_sha256: deadbeef\nband_idx,wavelength_nm,refl_mean\n0,400,7.5\n1,401,8.5\n",
        )
        .unwrap();

        let mut cache = BaselineCache::new(&config);
        let b = cache.ensure(Sensor::VisNir, &inv, &loader).unwrap().unwrap();
        assert_eq!(b.values, vec![7.5, 8.5]);

        config.refresh_stale_baselines = true;
        let mut cache = BaselineCache::new(&config);
        let b = cache.ensure(Sensor::VisNir, &inv, &loader).unwrap().unwrap();
        assert_eq!(b.values, vec![2.0, 3.0]);
    }

    #[test]
    fn unreadable_file_is_rebuilt() {
        let (dir, config, inv, loader) = setup();
        let path = baseline_path(dir.path(), Sensor::VisNir);
        std::fs::write(&path, "band_idx,wavelength_nm,refl_mean\n0,400,oops\n").unwrap();

        let mut cache = BaselineCache::new(&config);
        let b = cache.ensure(Sensor::VisNir, &inv, &loader).unwrap().unwrap();
        assert_eq!(b.values, vec![2.0, 3.0]);
        assert_eq!(read_baseline(&path, Sensor::VisNir).unwrap().values, vec![2.0, 3.0]);

        std::fs::write(&path, "band_idx,wavelength_nm,refl_mean\n").unwrap();
        assert!(read_baseline(&path, Sensor::VisNir).is_err());
    }

    #[test]
    fn failed_contributor_is_excluded() {
        let (_dir, config, mut inv, loader) = setup();
        inv.records.push(rec("/d/missing.hdr", Sensor::VisNir, "D0"));
        let mut cache = BaselineCache::new(&config);
        let b = cache.ensure(Sensor::VisNir, &inv, &loader).unwrap().unwrap();
        assert_eq!(b.values, vec![2.0, 3.0]);
    }

    #[test]
    fn total_failure_is_absent() {
        let (_dir, config, _inv, loader) = setup();
        let inv = Inventory::new(vec![rec("/d/gone.hdr", Sensor::Swir, "D0")]);
        let mut cache = BaselineCache::new(&config);
        assert!(cache.ensure(Sensor::Swir, &inv, &loader).unwrap().is_none());
        assert!(cache.available().is_empty());
    }

    #[test]
    fn key_depends_on_contributors() {
        let a = rec("/d/a.hdr", Sensor::Swir, "D0");
        let b = rec("/d/b.hdr", Sensor::Swir, "D0");
        let k1 = BaselineKey::new(Sensor::Swir, "D0", &[&a]);
        let k2 = BaselineKey::new(Sensor::Swir, "D0", &[&a, &b]);
        assert_ne!(k1, k2);
        assert_eq!(k1.digest.len(), 64);
        assert_eq!(k1, BaselineKey::new(Sensor::Swir, "D0", &[&a]));
    }
}
