use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use walkdir::WalkDir;

use super::model::{file_name_of, Inventory, LoadedCube, SampleRecord, Sensor};
use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// Cube loading seam
// ---------------------------------------------------------------------------

/// Decodes a cube file into a numeric array plus its wavelength axis.
///
/// The ENVI reader in [`super::envi`] is the production implementation;
/// tests substitute an in-memory map.
pub trait CubeLoader {
    fn load(&self, path: &Path) -> Result<LoadedCube>;
}

// ---------------------------------------------------------------------------
// Metadata table
// ---------------------------------------------------------------------------

/// Raw metadata table: header names plus string rows, before typing.
#[derive(Debug, Clone, Default)]
pub struct MetadataTable {
    pub headers: Vec<String>,
    pub rows: Vec<csv::StringRecord>,
}

impl MetadataTable {
    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Index of the cube path column: `hdr_path`, else `bil_path`.
    pub fn path_column(&self) -> Option<usize> {
        self.column("hdr_path").or_else(|| self.column("bil_path"))
    }
}

/// Read the metadata CSV without interpreting any column.
pub fn read_metadata_table(path: &Path) -> Result<MetadataTable> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("opening metadata table {}", path.display()))?;
    let headers: Vec<String> = reader
        .headers()
        .context("reading metadata headers")?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let rows = reader
        .records()
        .enumerate()
        .map(|(row_no, rec)| rec.with_context(|| format!("metadata row {row_no}")))
        .collect::<Result<Vec<_>>>()?;

    Ok(MetadataTable { headers, rows })
}

/// Load the metadata table as typed records.
///
/// A missing file is a configuration error and aborts before any processing.
pub fn load_inventory(path: &Path) -> Result<Inventory> {
    if !path.exists() {
        return Err(ConfigError::MissingInput(path.to_path_buf()).into());
    }
    let table = read_metadata_table(path)?;
    Ok(inventory_from_table(&table)?)
}

/// Type the rows of a metadata table.
pub fn inventory_from_table(table: &MetadataTable) -> std::result::Result<Inventory, ConfigError> {
    let path_idx = table
        .path_column()
        .ok_or_else(|| ConfigError::MissingColumn("hdr_path|bil_path".into()))?;
    let required = |name: &str| {
        table
            .column(name)
            .ok_or_else(|| ConfigError::MissingColumn(name.to_string()))
    };
    let sensor_idx = required("sensor")?;
    let ref_idx = required("is_ref")?;
    let tp_idx = required("timepoint")?;

    let records = table
        .rows
        .iter()
        .map(|row| SampleRecord {
            path: PathBuf::from(row.get(path_idx).unwrap_or("")),
            sensor: Sensor::parse(row.get(sensor_idx).unwrap_or("")),
            is_reference: parse_flag(row.get(ref_idx).unwrap_or("")),
            timepoint: row.get(tp_idx).unwrap_or("").trim().to_string(),
        })
        .collect();

    Ok(Inventory::new(records))
}

/// `is_ref` cells come as `0/1` or `True/False` depending on the writer.
pub fn parse_flag(s: &str) -> bool {
    let s = s.trim();
    s == "1" || s.eq_ignore_ascii_case("true") || s == "1.0"
}

// ---------------------------------------------------------------------------
// Inventory scan – filename conventions → metadata table
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct MetadataRow {
    hdr_path: String,
    bil_path: String,
    sensor: Sensor,
    is_ref: u8,
    timepoint: String,
    file_name: String,
}

/// Discover every `*.hdr` under `data_dir` (sorted) and derive its record from the filename.
pub fn scan_inventory(data_dir: &Path) -> Result<Inventory> {
    if !data_dir.is_dir() {
        return Err(ConfigError::MissingDataDir(data_dir.to_path_buf()).into());
    }

    let mut headers = Vec::new();
    for entry in WalkDir::new(data_dir).follow_links(false) {
        let entry = entry.with_context(|| format!("walking {}", data_dir.display()))?;
        let is_hdr = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("hdr"));
        if entry.file_type().is_file() && is_hdr {
            headers.push(entry.into_path());
        }
    }
    headers.sort();

    if headers.is_empty() {
        log::warn!("No .hdr files discovered under {}", data_dir.display());
    }

    let records = headers
        .into_iter()
        .map(|path| {
            let name = file_name_of(&path);
            SampleRecord {
                sensor: infer_sensor(&name),
                is_reference: name.to_ascii_lowercase().contains("cloth"),
                timepoint: infer_timepoint(&name),
                path,
            }
        })
        .collect();

    Ok(Inventory::new(records))
}

/// `VISNIR` anywhere in the name, otherwise the capture came from the SWIR camera.
pub fn infer_sensor(file_name: &str) -> Sensor {
    if file_name.to_ascii_uppercase().contains("VISNIR") {
        Sensor::VisNir
    } else {
        Sensor::Swir
    }
}

/// `2h` → `2h`; first `D<digits>` → `D<digits>`; anything else is the pre-inoculation capture.
pub fn infer_timepoint(file_name: &str) -> String {
    if file_name.contains("2h") {
        return "2h".to_string();
    }
    let bytes = file_name.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if b != b'D' {
            continue;
        }
        let digits: String = file_name[i + 1..]
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        if !digits.is_empty() {
            return format!("D{digits}");
        }
    }
    "before".to_string()
}

/// Persist an inventory in the metadata-table layout the export stage reads.
pub fn write_inventory(inventory: &Inventory, out_path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(out_path)
        .with_context(|| format!("creating {}", out_path.display()))?;
    for rec in &inventory.records {
        writer.serialize(MetadataRow {
            hdr_path: rec.path.display().to_string(),
            bil_path: rec.path.with_extension("bil").display().to_string(),
            sensor: rec.sensor,
            is_ref: u8::from(rec.is_reference),
            timepoint: rec.timepoint.clone(),
            file_name: rec.file_name(),
        })?;
    }
    writer.flush().context("flushing metadata table")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timepoint_from_filename() {
        assert_eq!(infer_timepoint("leaf_VISNIR_2h_03.hdr"), "2h");
        assert_eq!(infer_timepoint("leaf_SWIR_D12_01.hdr"), "D12");
        assert_eq!(infer_timepoint("Disease_D0_x.hdr"), "D0");
        assert_eq!(infer_timepoint("leaf_SWIR_01.hdr"), "before");
    }

    #[test]
    fn sensor_and_flag_inference() {
        assert_eq!(infer_sensor("a_visnir_D0.hdr"), Sensor::VisNir);
        assert_eq!(infer_sensor("a_D0.hdr"), Sensor::Swir);
        assert!(parse_flag("1"));
        assert!(parse_flag("True"));
        assert!(!parse_flag("0"));
        assert!(!parse_flag("false"));
    }

    #[test]
    fn scan_and_reload_inventory() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("raw");
        std::fs::create_dir_all(raw.join("nested")).unwrap();
        for name in ["b_VISNIR_D0.hdr", "nested/cloth_SWIR_D3.hdr", "notes.txt"] {
            std::fs::write(raw.join(name), "ENVI\n").unwrap();
        }

        let inv = scan_inventory(&raw).unwrap();
        assert_eq!(inv.len(), 2);

        let meta = dir.path().join("hsi_meta.csv");
        write_inventory(&inv, &meta).unwrap();
        let reloaded = load_inventory(&meta).unwrap();
        assert_eq!(reloaded.records, inv.records);

        let cloth = reloaded.references().next().unwrap();
        assert_eq!(cloth.sensor, Sensor::Swir);
        assert_eq!(cloth.timepoint, "D3");
    }

    #[test]
    fn missing_table_is_config_error() {
        let err = load_inventory(Path::new("/nonexistent/hsi_meta.csv")).unwrap_err();
        assert!(err.downcast_ref::<ConfigError>().is_some());
    }

    #[test]
    fn bil_path_column_is_accepted() {
        let table = MetadataTable {
            headers: vec!["bil_path".into(), "sensor".into(), "is_ref".into(), "timepoint".into()],
            rows: vec![csv::StringRecord::from(vec!["/x/a.bil", "swir", "0", "D0"])],
        };
        let inv = inventory_from_table(&table).unwrap();
        assert_eq!(inv.records[0].path, PathBuf::from("/x/a.bil"));
        assert_eq!(inv.records[0].sensor, Sensor::Swir);
    }
}
