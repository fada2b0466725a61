//! Build and launch caches
//!
//! | Format | Backing | Cleared by |
//! |--------|---------|------------|
//! | volume | named volume `pack-<kind>-<hash>` | removing the volume |
//! | bind   | host directory | deleting the directory |
//! | image  | registry image (build cache only, publish only) | removing the local copy |
//!
//! Caches survive failed and cancelled builds; only `--clear-cache`
//! deletes them.

pub mod handle;
pub mod options;

pub use handle::{labels, volume_labels, volume_name, CacheHandle};
pub use options::{CacheFormat, CacheInfo, CacheKind, CacheOptions};
