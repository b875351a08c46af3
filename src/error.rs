//! Error taxonomy for the export and self-check stages.

use std::path::PathBuf;

use thiserror::Error;

/// Problems with inputs that must exist before any processing starts.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Metadata table (or another required input) is missing
    #[error("missing input table: {}. Run the inventory step first", .0.display())]
    MissingInput(PathBuf),

    /// Raw data directory is missing
    #[error("data directory not found: {}", .0.display())]
    MissingDataDir(PathBuf),

    /// Configured normalization mode is not recognised
    #[error("unknown normalization mode '{0}' (expected AUTO, CLOTH, BASELINE or ZSCORE)")]
    UnknownMode(String),

    /// Metadata table lacks a column the pipeline needs
    #[error("metadata table missing required column: {0}")]
    MissingColumn(String),

    /// TOML config file could not be parsed
    #[error("invalid config file {}: {reason}", .path.display())]
    InvalidFile { path: PathBuf, reason: String },
}

/// ENVI header / raw data decoding errors.
#[derive(Error, Debug)]
pub enum CubeError {
    #[error("{}: not an ENVI header (missing 'ENVI' magic)", .0.display())]
    NotEnvi(PathBuf),

    #[error("{}: header key '{key}' missing or invalid", .path.display())]
    HeaderKey { path: PathBuf, key: &'static str },

    #[error("{}: unsupported ENVI data type {code}", .path.display())]
    DataType { path: PathBuf, code: u32 },

    #[error("{}: unsupported interleave '{interleave}'", .path.display())]
    Interleave { path: PathBuf, interleave: String },

    #[error("{}: samples x lines x bands overflows the addressable size", .0.display())]
    TooLarge(PathBuf),

    #[error("{}: no raw data file next to header", .0.display())]
    MissingRaw(PathBuf),

    #[error("{}: raw data has {actual} bytes, expected at least {expected}", .path.display())]
    Truncated {
        path: PathBuf,
        expected: usize,
        actual: usize,
    },
}

/// Errors raised while normalizing one sample.
#[derive(Error, Debug, PartialEq)]
pub enum NormError {
    /// Sample and reference spectra disagree on band count
    #[error("band count mismatch: sample has {sample} bands, {reference} has {found}")]
    BandMismatch {
        sample: usize,
        reference: String,
        found: usize,
    },
}
