//! JSON snapshot files.

use std::fs;
use std::path::Path;

use aid_core::{CrisisArea, Donation, Ngo};
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

/// A complete point-in-time copy of storage state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Dataset {
    /// Instant the snapshot describes; used for stock expiry.
    pub as_of: DateTime<Utc>,
    #[serde(default)]
    pub crisis_areas: Vec<CrisisArea>,
    #[serde(default)]
    pub ngos: Vec<Ngo>,
    #[serde(default)]
    pub donations: Vec<Donation>,
}

impl Dataset {
    pub fn from_json_str(s: &str) -> anyhow::Result<Self> {
        serde_json::from_str(s).context("parsing dataset JSON")
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading dataset {}", path.display()))?;
        let ds = Self::from_json_str(&raw)
            .with_context(|| format!("in {}", path.display()))?;
        info!(
            path = %path.display(),
            areas = ds.crisis_areas.len(),
            ngos = ds.ngos.len(),
            donations = ds.donations.len(),
            "dataset loaded"
        );
        Ok(ds)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).with_context(|| format!("writing dataset {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "as_of": "2024-02-01T00:00:00Z",
        "crisis_areas": [{
            "id": "pap",
            "name": "Port-au-Prince Earthquake Zone",
            "position": {"lat": 18.5944, "lng": -72.3074},
            "population": 50000,
            "needs": {"medical": 1000, "water": 5000},
            "current_inventory": {"water": [{"quantity": 1000, "unit": "liters"}]},
            "urgency": 5.0,
            "security": "caution",
            "reachability": "difficult",
            "weather_conditions": "Tropical Storm Warning",
            "road_conditions": "Partially blocked"
        }],
        "ngos": [{
            "id": "red-intl",
            "name": "Red International",
            "location": {"lat": 34.0522, "lng": -118.2437},
            "reach_radius_km": 1000.0,
            "inventory": {"food": [{"quantity": 500, "unit": "kg", "expiry_date": "2024-06-30T00:00:00Z"}]},
            "rating": 4.8,
            "credibility_score": 0.95,
            "response_time_hours": 4.5,
            "specializations": ["medical", "logistics"]
        }]
    }"#;

    #[test]
    fn parses_sample_with_defaults() {
        let ds = Dataset::from_json_str(SAMPLE).unwrap();
        assert_eq!(ds.crisis_areas[0].unmet(aid_core::SupplyCategory::Water), 4000);
        assert!(!ds.ngos[0].is_busy);
        assert!(ds.donations.is_empty());
    }

    #[test]
    fn unknown_security_level_fails_to_parse() {
        let bad = SAMPLE.replace("\"caution\"", "\"hostile\"");
        assert!(Dataset::from_json_str(&bad).is_err());
    }

    #[test]
    fn save_then_load_preserves_entities() {
        let ds = Dataset::from_json_str(SAMPLE).unwrap();
        let path = std::env::temp_dir().join(format!("aid-dataset-{}.json", std::process::id()));
        ds.save(&path).unwrap();
        let back = Dataset::load(&path).unwrap();
        let _ = fs::remove_file(&path);
        assert_eq!(back.as_of, ds.as_of);
        assert_eq!(back.ngos[0].id, ds.ngos[0].id);
        assert_eq!(back.crisis_areas[0].needs, ds.crisis_areas[0].needs);
    }
}
