use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::data::model::Sensor;
use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// NormMode – strategy actually applied to a spectrum
// ---------------------------------------------------------------------------

/// Normalization strategy recorded per output row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NormMode {
    Cloth,
    Baseline,
    Zscore,
    None,
}

impl NormMode {
    pub const ALL: [NormMode; 4] = [NormMode::Cloth, NormMode::Baseline, NormMode::Zscore, NormMode::None];

    pub fn as_str(&self) -> &'static str {
        match self {
            NormMode::Cloth => "CLOTH",
            NormMode::Baseline => "BASELINE",
            NormMode::Zscore => "ZSCORE",
            NormMode::None => "NONE",
        }
    }

    /// Exact-match parse of a recorded mode. `AUTO` is not a recorded mode.
    pub fn parse(s: &str) -> Option<Self> {
        NormMode::ALL.into_iter().find(|m| m.as_str() == s.trim())
    }

    /// Closed range every output value must lie in, `None` when unconstrained.
    pub fn bounds(&self) -> Option<(f64, f64)> {
        match self {
            NormMode::Cloth | NormMode::Baseline => Some((0.0, super::normalize::RATIO_MAX)),
            NormMode::Zscore => Some((0.0, 1.0)),
            NormMode::None => None,
        }
    }
}

impl fmt::Display for NormMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// RequestedMode – operator setting
// ---------------------------------------------------------------------------

/// Mode requested by configuration; `Auto` is resolved per sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RequestedMode {
    #[default]
    Auto,
    Cloth,
    Baseline,
    Zscore,
}

impl RequestedMode {
    /// The concrete mode an explicit request names.
    pub fn fixed(&self) -> Option<NormMode> {
        match self {
            RequestedMode::Auto => None,
            RequestedMode::Cloth => Some(NormMode::Cloth),
            RequestedMode::Baseline => Some(NormMode::Baseline),
            RequestedMode::Zscore => Some(NormMode::Zscore),
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.fixed().map_or("AUTO", |m| m.as_str())
    }
}

impl FromStr for RequestedMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AUTO" => Ok(RequestedMode::Auto),
            "CLOTH" => Ok(RequestedMode::Cloth),
            "BASELINE" => Ok(RequestedMode::Baseline),
            "ZSCORE" => Ok(RequestedMode::Zscore),
            _ => Err(ConfigError::UnknownMode(s.to_string())),
        }
    }
}

impl fmt::Display for RequestedMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ReferenceId – provenance written to `ref_file`
// ---------------------------------------------------------------------------

/// What a normalized spectrum was divided by (or the synthetic tag for the self-referenced modes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceId {
    Cloth(PathBuf),
    Baseline(Sensor),
    Zscore,
    None,
}

impl fmt::Display for ReferenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceId::Cloth(path) => write!(f, "{}", path.display()),
            ReferenceId::Baseline(sensor) => write!(f, "BASELINE_{sensor}"),
            ReferenceId::Zscore => f.write_str("ZSCORE"),
            ReferenceId::None => f.write_str("NONE"),
        }
    }
}

// ---------------------------------------------------------------------------
// Resolution – requested vs. effective
// ---------------------------------------------------------------------------

/// Outcome of resolving and executing a mode for one sample.
///
/// `degraded` is set when the effective mode differs from the mode the
/// resolver selected because its reference data was unavailable.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub requested: RequestedMode,
    pub effective: NormMode,
    pub degraded: bool,
    pub reference: ReferenceId,
}
