/// Data layer: core types, loading, and row selection.
///
/// Architecture:
/// ```text
///   raw *.hdr / *.bil            hsi_meta.csv
///        │                            │
///        ▼                            ▼
///   ┌──────────┐               ┌──────────┐
///   │   envi    │  decode cube  │  loader   │  parse table → Inventory
///   └──────────┘               └──────────┘
///        │                            │
///        ▼                            ▼
///   ┌──────────────┐           ┌──────────┐
///   │  LoadedCube   │           │  filter   │  cloth reference / baseline rows
///   └──────────────┘           └──────────┘
/// ```

pub mod envi;
pub mod filter;
pub mod loader;
pub mod model;
