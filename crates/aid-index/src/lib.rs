#![deny(warnings)]

//! Spatial index and snapshot store for crisis areas and NGOs.
//!
//! [`GeoIndex`] answers bounding-box and radius queries, [`World`] bundles
//! entities, the open-donation ledger and the index into one consistent
//! value, and [`SnapshotCell`] publishes successive worlds without ever
//! exposing a partially applied change.

pub mod grid;
pub mod snapshot;
pub mod world;

pub use grid::{EntityKind, EntityRef, GeoIndex};
pub use snapshot::{Snapshot, SnapshotCell};
pub use world::{BuildReport, Rejected, World};

use serde::{Deserialize, Serialize};

/// Geo-index tuning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Grid cell edge in degrees, in (0, 90].
    pub cell_deg: f64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self { cell_deg: 1.0 }
    }
}

impl IndexConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !self.cell_deg.is_finite() || self.cell_deg <= 0.0 || self.cell_deg > 90.0 {
            return Err(format!("index.cell_deg must be in (0, 90], got {}", self.cell_deg));
        }
        Ok(())
    }
}

/// The published world snapshot type.
pub type WorldSnapshot = Snapshot<World>;
