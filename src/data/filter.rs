use super::model::{Inventory, SampleRecord, Sensor};

// ---------------------------------------------------------------------------
// Row predicates over the inventory
// ---------------------------------------------------------------------------

/// Cloth reference for `sample`.
///
/// Lookup order:
/// * a cloth capture with the same sensor and timepoint
/// * otherwise any cloth capture with the same sensor
///
/// Among equal candidates the smallest path wins, so the choice does not
/// depend on file discovery order.
pub fn pick_reference<'a>(inventory: &'a Inventory, sample: &SampleRecord) -> Option<&'a SampleRecord> {
    let same_sensor = || {
        inventory
            .references()
            .filter(move |r| r.sensor == sample.sensor)
    };
    same_sensor()
        .filter(|r| r.timepoint == sample.timepoint)
        .min_by(|a, b| a.path.cmp(&b.path))
        .or_else(|| same_sensor().min_by(|a, b| a.path.cmp(&b.path)))
}

/// Leaf samples of `sensor` captured at the healthy baseline timepoint, sorted by path.
pub fn baseline_contributors<'a>(
    inventory: &'a Inventory,
    sensor: Sensor,
    baseline_timepoint: &str,
) -> Vec<&'a SampleRecord> {
    let mut rows: Vec<&SampleRecord> = inventory
        .samples()
        .filter(|r| r.sensor == sensor && r.timepoint == baseline_timepoint)
        .collect();
    rows.sort_by(|a, b| a.path.cmp(&b.path));
    rows
}
