use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Sensor – acquisition modality
// ---------------------------------------------------------------------------

/// Camera modality a cube was captured with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Sensor {
    VisNir,
    Swir,
    Unknown,
}

impl Sensor {
    /// Lenient parse of a metadata cell: case-insensitive, `VIS` is an alias.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "VISNIR" | "VIS" => Sensor::VisNir,
            "SWIR" => Sensor::Swir,
            _ => Sensor::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Sensor::VisNir => "VISNIR",
            Sensor::Swir => "SWIR",
            Sensor::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for Sensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// SampleRecord – one row of the metadata table
// ---------------------------------------------------------------------------

/// One captured cube as described by the inventory table.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleRecord {
    /// Path to the cube header (unique key).
    pub path: PathBuf,
    pub sensor: Sensor,
    /// Calibration-cloth capture rather than a leaf sample.
    pub is_reference: bool,
    pub timepoint: String,
}

impl SampleRecord {
    /// File stem used to name the sample's spectrum output.
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "sample".to_string())
    }

    pub fn file_name(&self) -> String {
        file_name_of(&self.path)
    }
}

pub(crate) fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

// ---------------------------------------------------------------------------
// Inventory – the complete metadata table
// ---------------------------------------------------------------------------

/// All sample records of one run, in table order.
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    pub records: Vec<SampleRecord>,
}

impl Inventory {
    pub fn new(records: Vec<SampleRecord>) -> Self {
        Inventory { records }
    }

    /// Leaf samples (non-reference rows), in table order.
    pub fn samples(&self) -> impl Iterator<Item = &SampleRecord> {
        self.records.iter().filter(|r| !r.is_reference)
    }

    /// Cloth captures, in table order.
    pub fn references(&self) -> impl Iterator<Item = &SampleRecord> {
        self.records.iter().filter(|r| r.is_reference)
    }

    /// Sensors that have at least one leaf sample.
    pub fn sample_sensors(&self) -> BTreeSet<Sensor> {
        self.samples().map(|r| r.sensor).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Cube – decoded hyperspectral image
// ---------------------------------------------------------------------------

/// A 3-axis cube stored row-major as `[height][width][band]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Cube {
    pub height: usize,
    pub width: usize,
    pub bands: usize,
    data: Vec<f64>,
}

impl Cube {
    /// Returns `None` when `data` does not hold exactly `height * width * bands` values.
    pub fn new(height: usize, width: usize, bands: usize, data: Vec<f64>) -> Option<Self> {
        if data.len() != height * width * bands {
            return None;
        }
        Some(Cube {
            height,
            width,
            bands,
            data,
        })
    }

    /// Cube where every pixel carries the same spectrum.
    pub fn uniform(height: usize, width: usize, spectrum: &[f64]) -> Self {
        let mut data = Vec::with_capacity(height * width * spectrum.len());
        for _ in 0..height * width {
            data.extend_from_slice(spectrum);
        }
        Cube {
            height,
            width,
            bands: spectrum.len(),
            data,
        }
    }

    pub fn get(&self, row: usize, col: usize, band: usize) -> f64 {
        self.data[(row * self.width + col) * self.bands + band]
    }

    /// Spectrum of every pixel, one slice of length `bands` each.
    pub fn pixels(&self) -> impl Iterator<Item = &[f64]> {
        // chunks_exact panics on zero, and a zero-band cube has no pixels anyway.
        self.data.chunks_exact(self.bands.max(1))
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }
}

/// Output of a [`CubeLoader`](super::loader::CubeLoader): the cube plus its wavelength axis.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedCube {
    pub cube: Cube,
    /// One entry per band (nm), or band indices when the header had none.
    pub wavelengths: Vec<f64>,
}
