//! Hyperspectral leaf-cube spectra: per-sample mean reflectance normalized
//! by cloth reference, healthy baseline or z-score, plus a self-check that
//! audits the produced tables.

pub mod check;
pub mod config;
pub mod data;
pub mod error;
pub mod export;
pub mod fsutil;
pub mod norm;
pub mod spectral;
pub mod trace;
