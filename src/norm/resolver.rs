use std::collections::BTreeSet;
use std::path::PathBuf;

use super::mode::{NormMode, RequestedMode};
use crate::data::filter::pick_reference;
use crate::data::model::{Inventory, SampleRecord, Sensor};

/// Mode selected for one sample before any reference data is loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub requested: RequestedMode,
    /// Never AUTO: resolution is total.
    pub mode: NormMode,
    /// Cloth capture to divide by, when `mode` is CLOTH and one exists.
    pub cloth: Option<PathBuf>,
}

/// Decide the mode for `sample`.
///
/// An explicit request always wins, even when its data is missing; the
/// executor then degrades it. AUTO walks the chain
/// same-timepoint cloth → same-sensor cloth → sensor baseline → ZSCORE.
pub fn resolve(
    requested: RequestedMode,
    sample: &SampleRecord,
    inventory: &Inventory,
    baselines: &BTreeSet<Sensor>,
) -> Plan {
    let find_cloth = || pick_reference(inventory, sample).map(|r| r.path.clone());

    let (mode, cloth) = match requested.fixed() {
        Some(NormMode::Cloth) => (NormMode::Cloth, find_cloth()),
        Some(mode) => (mode, None),
        None => match find_cloth() {
            Some(path) => (NormMode::Cloth, Some(path)),
            None if baselines.contains(&sample.sensor) => (NormMode::Baseline, None),
            None => (NormMode::Zscore, None),
        },
    };

    Plan {
        requested,
        mode,
        cloth,
    }
}
