//! ENVI header + raw binary cube codec.
//!
//! Supports the three standard interleaves and the numeric ENVI data types.
//! The wavelength list falls back to band indices when it is absent or does
//! not match the band count.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::loader::CubeLoader;
use super::model::{Cube, LoadedCube};
use crate::error::CubeError;

/// Sample layout of the raw file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interleave {
    /// Band interleaved by line: `[line][band][sample]`
    Bil,
    /// Band sequential: `[band][line][sample]`
    Bsq,
    /// Band interleaved by pixel: `[line][sample][band]`
    Bip,
}

impl Interleave {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bil" => Some(Interleave::Bil),
            "bsq" => Some(Interleave::Bsq),
            "bip" => Some(Interleave::Bip),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Interleave::Bil => "bil",
            Interleave::Bsq => "bsq",
            Interleave::Bip => "bip",
        }
    }

    /// Offset (in elements) of `(line, sample, band)` in the raw stream.
    fn offset(&self, line: usize, sample: usize, band: usize, dims: (usize, usize, usize)) -> usize {
        let (lines, samples, bands) = dims;
        match self {
            Interleave::Bil => (line * bands + band) * samples + sample,
            Interleave::Bsq => (band * lines + line) * samples + sample,
            Interleave::Bip => (line * samples + sample) * bands + band,
        }
    }
}

/// Parsed subset of an ENVI `.hdr` file.
#[derive(Debug, Clone, PartialEq)]
pub struct EnviHeader {
    pub samples: usize,
    pub lines: usize,
    pub bands: usize,
    pub header_offset: usize,
    pub data_type: u32,
    pub interleave: Interleave,
    pub big_endian: bool,
    pub wavelengths: Option<Vec<f64>>,
}

impl EnviHeader {
    pub fn parse(path: &Path, text: &str) -> std::result::Result<Self, CubeError> {
        let mut lines = text.lines().skip_while(|l| l.trim().is_empty());
        match lines.next() {
            Some(first) if first.trim_start().starts_with("ENVI") => {}
            _ => return Err(CubeError::NotEnvi(path.to_path_buf())),
        }

        let fields = parse_fields(lines);
        let num = |key: &'static str| -> std::result::Result<usize, CubeError> {
            fields
                .get(key)
                .and_then(|v| v.trim().parse::<usize>().ok())
                .ok_or(CubeError::HeaderKey {
                    path: path.to_path_buf(),
                    key,
                })
        };
        let opt_num = |key: &'static str| fields.get(key).and_then(|v| v.trim().parse::<usize>().ok());

        let interleave_raw = fields.get("interleave").map(String::as_str).unwrap_or("bsq");
        let interleave = Interleave::parse(interleave_raw).ok_or_else(|| CubeError::Interleave {
            path: path.to_path_buf(),
            interleave: interleave_raw.to_string(),
        })?;

        let data_type = num("data type")? as u32;
        if element_size(data_type).is_none() {
            return Err(CubeError::DataType {
                path: path.to_path_buf(),
                code: data_type,
            });
        }

        Ok(EnviHeader {
            samples: num("samples")?,
            lines: num("lines")?,
            bands: num("bands")?,
            header_offset: opt_num("header offset").unwrap_or(0),
            data_type,
            interleave,
            big_endian: opt_num("byte order") == Some(1),
            wavelengths: fields.get("wavelength").and_then(|v| parse_float_list(v)),
        })
    }

    fn dims(&self) -> (usize, usize, usize) {
        (self.lines, self.samples, self.bands)
    }
}

/// Collect `key = value` pairs; `{ ... }` values may span lines.
fn parse_fields<'a>(lines: impl Iterator<Item = &'a str>) -> BTreeMap<String, String> {
    let mut fields = BTreeMap::new();
    let mut pending: Option<(String, String)> = None;

    for line in lines {
        if let Some((key, mut value)) = pending.take() {
            value.push(' ');
            value.push_str(line.trim());
            if value.contains('}') {
                fields.insert(key, value);
            } else {
                pending = Some((key, value));
            }
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim().to_string();
        if value.starts_with('{') && !value.contains('}') {
            pending = Some((key, value));
        } else {
            fields.insert(key, value);
        }
    }
    if let Some((key, value)) = pending {
        fields.insert(key, value);
    }
    fields
}

fn parse_float_list(value: &str) -> Option<Vec<f64>> {
    let inner = value.trim().trim_start_matches('{').trim_end_matches('}');
    inner
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| t.parse::<f64>().ok())
        .collect()
}

fn element_size(data_type: u32) -> Option<usize> {
    match data_type {
        1 => Some(1),
        2 | 12 => Some(2),
        3 | 4 | 13 => Some(4),
        5 | 14 | 15 => Some(8),
        _ => None,
    }
}

fn decode(data_type: u32, big_endian: bool, raw: &[u8]) -> f64 {
    macro_rules! num {
        ($t:ty, $n:expr) => {{
            let mut buf = [0u8; $n];
            buf.copy_from_slice(raw);
            if big_endian {
                <$t>::from_be_bytes(buf) as f64
            } else {
                <$t>::from_le_bytes(buf) as f64
            }
        }};
    }
    match data_type {
        1 => raw[0] as f64,
        2 => num!(i16, 2),
        3 => num!(i32, 4),
        4 => num!(f32, 4),
        5 => num!(f64, 8),
        12 => num!(u16, 2),
        13 => num!(u32, 4),
        14 => num!(i64, 8),
        15 => num!(u64, 8),
        _ => f64::NAN,
    }
}

/// Locate the binary file that belongs to `hdr`.
fn raw_path(hdr: &Path, interleave: Interleave) -> Option<PathBuf> {
    let stripped = hdr.with_extension("");
    let mut candidates = vec![];
    // `cube.bil.hdr` convention
    if stripped.extension().is_some() {
        candidates.push(stripped.clone());
    }
    candidates.push(hdr.with_extension(interleave.extension()));
    candidates.push(hdr.with_extension("img"));
    candidates.push(hdr.with_extension("raw"));
    candidates.push(stripped);
    candidates.into_iter().find(|p| p != hdr && p.is_file())
}

fn header_path(path: &Path) -> PathBuf {
    let is_hdr = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("hdr"));
    if is_hdr {
        path.to_path_buf()
    } else {
        path.with_extension("hdr")
    }
}

/// Read an ENVI cube given either its header or its raw file path.
pub fn read_cube(path: &Path) -> Result<LoadedCube> {
    let hdr = header_path(path);
    let text = std::fs::read_to_string(&hdr)
        .with_context(|| format!("reading ENVI header {}", hdr.display()))?;
    let header = EnviHeader::parse(&hdr, &text)?;

    let size = element_size(header.data_type).unwrap_or(1);
    let too_large = || CubeError::TooLarge(hdr.clone());
    let n = header
        .lines
        .checked_mul(header.samples)
        .and_then(|v| v.checked_mul(header.bands))
        .ok_or_else(too_large)?;
    let expected = n
        .checked_mul(size)
        .and_then(|v| v.checked_add(header.header_offset))
        .ok_or_else(too_large)?;

    let raw_file = raw_path(&hdr, header.interleave).ok_or_else(|| CubeError::MissingRaw(hdr.clone()))?;
    let bytes = std::fs::read(&raw_file)
        .with_context(|| format!("reading raw cube {}", raw_file.display()))?;
    if bytes.len() < expected {
        return Err(CubeError::Truncated {
            path: raw_file,
            expected,
            actual: bytes.len(),
        }
        .into());
    }
    let body = &bytes[header.header_offset..expected];

    let dims = header.dims();
    let mut data = Vec::with_capacity(n);
    for line in 0..header.lines {
        for sample in 0..header.samples {
            for band in 0..header.bands {
                let at = header.interleave.offset(line, sample, band, dims) * size;
                data.push(decode(header.data_type, header.big_endian, &body[at..at + size]));
            }
        }
    }

    let cube = Cube::new(header.lines, header.samples, header.bands, data)
        .context("decoded cube has inconsistent dimensions")?;
    let wavelengths = match header.wavelengths {
        Some(wl) if wl.len() == header.bands => wl,
        _ => (0..header.bands).map(|b| b as f64).collect(),
    };
    Ok(LoadedCube { cube, wavelengths })
}

/// Write a cube as little-endian float32 with the given interleave.
///
/// Returns the raw data path; the header goes to `hdr`.
pub fn write_cube(
    hdr: &Path,
    cube: &Cube,
    wavelengths: Option<&[f64]>,
    interleave: Interleave,
) -> Result<PathBuf> {
    let mut text = String::from("ENVI\n");
    let _ = writeln!(text, "description = {{leaf-spectra cube}}");
    let _ = writeln!(text, "samples = {}", cube.width);
    let _ = writeln!(text, "lines = {}", cube.height);
    let _ = writeln!(text, "bands = {}", cube.bands);
    let _ = writeln!(text, "header offset = 0");
    let _ = writeln!(text, "file type = ENVI Standard");
    let _ = writeln!(text, "data type = 4");
    let _ = writeln!(text, "interleave = {}", interleave.extension());
    let _ = writeln!(text, "byte order = 0");
    if let Some(wl) = wavelengths {
        let list: Vec<String> = wl.iter().map(|w| format!("{w}")).collect();
        let _ = writeln!(text, "wavelength = {{\n {}}}", list.join(",\n "));
    }
    std::fs::write(hdr, text).with_context(|| format!("writing {}", hdr.display()))?;

    let dims = (cube.height, cube.width, cube.bands);
    let len = cube
        .as_slice()
        .len()
        .checked_mul(4)
        .ok_or_else(|| CubeError::TooLarge(hdr.to_path_buf()))?;
    let mut raw = vec![0u8; len];
    for line in 0..cube.height {
        for sample in 0..cube.width {
            for band in 0..cube.bands {
                let at = interleave.offset(line, sample, band, dims) * 4;
                let v = cube.get(line, sample, band) as f32;
                raw[at..at + 4].copy_from_slice(&v.to_le_bytes());
            }
        }
    }
    let raw_file = hdr.with_extension(interleave.extension());
    std::fs::write(&raw_file, raw).with_context(|| format!("writing {}", raw_file.display()))?;
    Ok(raw_file)
}

/// [`CubeLoader`] backed by ENVI files on disk.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnviLoader;

impl CubeLoader for EnviLoader {
    fn load(&self, path: &Path) -> Result<LoadedCube> {
        read_cube(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_cube() -> Cube {
        let data: Vec<f64> = (0..2 * 3 * 4).map(|v| v as f64 * 0.5).collect();
        Cube::new(2, 3, 4, data).unwrap()
    }

    #[test]
    fn write_then_read_every_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let cube = sample_cube();
        let wl = [450.0, 550.0, 650.0, 750.5];
        for il in [Interleave::Bil, Interleave::Bsq, Interleave::Bip] {
            let hdr = dir.path().join(format!("leaf_{}.hdr", il.extension()));
            write_cube(&hdr, &cube, Some(&wl), il).unwrap();
            let loaded = EnviLoader.load(&hdr).unwrap();
            assert_eq!(loaded.cube, cube, "interleave {il:?}");
            assert_eq!(loaded.wavelengths, wl.to_vec());
        }
    }

    #[test]
    fn wavelength_count_mismatch_falls_back_to_indices() {
        let dir = tempfile::tempdir().unwrap();
        let hdr = dir.path().join("leaf.hdr");
        write_cube(&hdr, &sample_cube(), Some(&[400.0, 500.0]), Interleave::Bil).unwrap();
        let loaded = read_cube(&hdr.with_extension("bil")).unwrap();
        assert_eq!(loaded.wavelengths, vec![0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn header_parsing_handles_multiline_lists() {
        let text = "ENVI\nsamples = 2\nlines = 1\nbands = 3\ndata type = 12\n\
                    interleave = BIP\nbyte order = 1\nwavelength = {\n 400.5,\n 410,\n 420 }\n";
        let h = EnviHeader::parse(Path::new("x.hdr"), text).unwrap();
        assert_eq!(h.interleave, Interleave::Bip);
        assert!(h.big_endian);
        assert_eq!(h.header_offset, 0);
        assert_eq!(h.wavelengths, Some(vec![400.5, 410.0, 420.0]));
    }

    #[test]
    fn rejects_non_envi_and_bad_types() {
        assert!(matches!(
            EnviHeader::parse(Path::new("x.hdr"), "samples = 1\n"),
            Err(CubeError::NotEnvi(_))
        ));
        let text = "ENVI\nsamples = 1\nlines = 1\nbands = 1\ndata type = 6\n";
        assert!(matches!(
            EnviHeader::parse(Path::new("x.hdr"), text),
            Err(CubeError::DataType { code: 6, .. })
        ));
    }

    #[test]
    fn truncated_raw_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let hdr = dir.path().join("leaf.hdr");
        write_cube(&hdr, &sample_cube(), None, Interleave::Bsq).unwrap();
        std::fs::write(hdr.with_extension("bsq"), [0u8; 8]).unwrap();
        let err = read_cube(&hdr).unwrap_err();
        assert!(matches!(err.downcast_ref::<CubeError>(), Some(CubeError::Truncated { .. })));
    }

    #[test]
    fn oversized_dimensions_are_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let hdr = dir.path().join("huge.hdr");
        let text = "ENVI\nsamples = 4294967296\nlines = 4294967296\nbands = 2\n\
                    header offset = 0\ndata type = 4\ninterleave = bil\nbyte order = 0\n";
        std::fs::write(&hdr, text).unwrap();
        std::fs::write(hdr.with_extension("bil"), [0u8; 16]).unwrap();

        let err = read_cube(&hdr).unwrap_err();
        assert!(matches!(err.downcast_ref::<CubeError>(), Some(CubeError::TooLarge(_))));
    }
}
