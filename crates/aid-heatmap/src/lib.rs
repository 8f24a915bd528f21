#![deny(warnings)]

//! Need-intensity heatmaps over map viewports.
//!
//! Each crisis area inside the margin-expanded viewport yields at most one
//! [`HeatmapPoint`]. Results for a viewport snapped to a coarse grid are kept
//! in a [`HeatmapCache`] and invalidated by change events.

pub mod cache;

pub use cache::{CacheKey, CacheStats, HeatmapCache};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use aid_core::{
    AreaId, CrisisArea, GeoPoint, Reachability, SecurityLevel, SupplyCategory, ValidationError,
    Viewport,
};
use aid_index::{EntityKind, World};
use aid_scoring::{ScoreContext, Scorer};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Heatmap tuning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeatmapConfig {
    /// Margin added around a viewport before querying, in km.
    pub margin_km: f64,
    /// Weight of the need ratio in unfiltered intensity.
    pub need_weight: f64,
    /// Weight of normalized urgency in unfiltered intensity.
    pub urgency_weight: f64,
    /// Damping from NGO coverage; 0 disables the coverage query.
    pub coverage_weight: f64,
    /// Number of eligible NGOs at which coverage saturates to 1.
    pub coverage_saturation: f64,
    /// Cap on points returned per viewport.
    pub max_points: usize,
    /// Cached regions are snapped outward to this grid, in degrees.
    pub cache_grid_deg: f64,
    /// Age after which a cached region is recomputed.
    pub cache_ttl_secs: u64,
    /// Oldest regions are evicted past this count.
    pub cache_max_entries: usize,
    /// Rendering hint passed through on layers, in [0, 1].
    pub layer_opacity: f64,
    /// Rendering hint passed through on layers, in metres.
    pub layer_radius_m: f64,
}

impl Default for HeatmapConfig {
    fn default() -> Self {
        Self {
            margin_km: 50.0,
            need_weight: 0.6,
            urgency_weight: 0.4,
            coverage_weight: 0.0,
            coverage_saturation: 3.0,
            max_points: 5000,
            cache_grid_deg: 0.5,
            cache_ttl_secs: 30,
            cache_max_entries: 10_000,
            layer_opacity: 0.6,
            layer_radius_m: 50_000.0,
        }
    }
}

impl HeatmapConfig {
    pub fn validate(&self) -> Result<(), String> {
        let non_negative = [
            ("heatmap.margin_km", self.margin_km),
            ("heatmap.need_weight", self.need_weight),
            ("heatmap.urgency_weight", self.urgency_weight),
            ("heatmap.layer_radius_m", self.layer_radius_m),
        ];
        for (name, v) in non_negative {
            if !v.is_finite() || v < 0.0 {
                return Err(format!("{name} must be finite and >= 0, got {v}"));
            }
        }
        for (name, v) in [
            ("heatmap.coverage_weight", self.coverage_weight),
            ("heatmap.layer_opacity", self.layer_opacity),
        ] {
            if !v.is_finite() || !(0.0..=1.0).contains(&v) {
                return Err(format!("{name} must be in [0, 1], got {v}"));
            }
        }
        if !self.coverage_saturation.is_finite() || self.coverage_saturation <= 0.0 {
            return Err(format!(
                "heatmap.coverage_saturation must be > 0, got {}",
                self.coverage_saturation
            ));
        }
        if !self.cache_grid_deg.is_finite() || self.cache_grid_deg <= 0.0 {
            return Err(format!(
                "heatmap.cache_grid_deg must be > 0, got {}",
                self.cache_grid_deg
            ));
        }
        if self.max_points == 0 {
            return Err("heatmap.max_points must be > 0".into());
        }
        Ok(())
    }
}

/// One rendered intensity sample. Ephemeral.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HeatmapPoint {
    pub area_id: AreaId,
    pub lat: f64,
    pub lng: f64,
    /// Intensity in [0, 1].
    pub intensity: f64,
}

/// Points plus the rendering hints a map layer needs.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HeatmapLayer {
    pub points: Vec<HeatmapPoint>,
    pub opacity: f64,
    pub radius_m: f64,
    pub category: Option<SupplyCategory>,
}

/// Map marker summarising one crisis area.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AreaMarker {
    pub id: AreaId,
    pub name: String,
    pub position: GeoPoint,
    pub urgency: f64,
    pub reachability: Reachability,
    pub security: SecurityLevel,
    pub population: u64,
    pub weather: String,
    pub unmet_needs: BTreeMap<SupplyCategory, u64>,
}

/// Computes heatmaps against a world snapshot, with a shared region cache.
#[derive(Debug)]
pub struct HeatmapAggregator {
    config: HeatmapConfig,
    eligibility: Scorer,
    cache: HeatmapCache,
}

fn by_intensity(a: &HeatmapPoint, b: &HeatmapPoint) -> std::cmp::Ordering {
    b.intensity
        .total_cmp(&a.intensity)
        .then_with(|| a.area_id.cmp(&b.area_id))
}

impl HeatmapAggregator {
    pub fn new(config: HeatmapConfig) -> Self {
        Self::with_scorer(config, Scorer::default())
    }

    /// Aggregator whose coverage count uses `eligibility` to decide which
    /// NGOs can serve an area.
    pub fn with_scorer(config: HeatmapConfig, eligibility: Scorer) -> Self {
        let cache = HeatmapCache::new(
            Duration::from_secs(config.cache_ttl_secs),
            config.cache_max_entries,
        );
        Self {
            config,
            eligibility,
            cache,
        }
    }

    pub fn config(&self) -> &HeatmapConfig {
        &self.config
    }

    pub fn cache(&self) -> &HeatmapCache {
        &self.cache
    }

    /// Viewport widened by the configured margin.
    pub fn expanded(&self, viewport: &Viewport) -> Viewport {
        viewport.expand_km(self.config.margin_km)
    }

    /// Intensity of one area, or `None` when it has nothing to show.
    pub fn intensity(
        &self,
        world: &World,
        area: &CrisisArea,
        category: Option<SupplyCategory>,
    ) -> Option<f64> {
        let base = match category {
            Some(c) => {
                let need = area.need(c);
                if need == 0 {
                    return None;
                }
                (area.unmet(c) as f64 / need.max(1) as f64).clamp(0.0, 1.0)
            }
            None => {
                let need = area.total_need();
                if need == 0 {
                    return None;
                }
                let ratio = area.total_unmet() as f64 / need as f64;
                if ratio <= 0.0 {
                    return None;
                }
                (self.config.need_weight * ratio
                    + self.config.urgency_weight * area.urgency / 5.0)
                    .clamp(0.0, 1.0)
            }
        };
        if base <= 0.0 {
            return None;
        }
        if self.config.coverage_weight > 0.0 {
            let coverage = (self.reaching_ngos(world, area) as f64
                / self.config.coverage_saturation)
                .min(1.0);
            return Some((base * (1.0 - self.config.coverage_weight * coverage)).clamp(0.0, 1.0));
        }
        Some(base)
    }

    /// Number of NGOs eligible to serve `area`.
    fn reaching_ngos(&self, world: &World, area: &CrisisArea) -> usize {
        let ctx = ScoreContext {
            as_of: world.as_of(),
            commitments: world.commitments(),
        };
        world
            .index()
            .query_radius(EntityKind::Ngo, area.position, world.max_reach_km())
            .map(|hits| {
                hits.iter()
                    .filter_map(|(e, _)| e.as_ngo().and_then(|id| world.ngo(id)))
                    .filter(|n| self.eligibility.score(n, area, &ctx).is_eligible())
                    .count()
            })
            .unwrap_or(0)
    }

    /// All points inside `region`, ordered, uncapped.
    fn points_in(
        &self,
        world: &World,
        region: &Viewport,
        category: Option<SupplyCategory>,
    ) -> Result<Vec<HeatmapPoint>, ValidationError> {
        let mut points: Vec<HeatmapPoint> = world
            .areas_in(region)?
            .into_iter()
            .filter_map(|area| {
                self.intensity(world, &area, category)
                    .map(|intensity| HeatmapPoint {
                        area_id: area.id.clone(),
                        lat: area.position.lat,
                        lng: area.position.lng,
                        intensity,
                    })
            })
            .collect();
        points.sort_by(by_intensity);
        Ok(points)
    }

    /// Heatmap for `viewport`, computed fresh.
    pub fn compute(
        &self,
        world: &World,
        viewport: &Viewport,
        category: Option<SupplyCategory>,
    ) -> Result<Vec<HeatmapPoint>, ValidationError> {
        viewport.validate()?;
        let expanded = self.expanded(viewport);
        let mut points = self.points_in(world, &expanded, category)?;
        points.truncate(self.config.max_points);
        Ok(points)
    }

    /// Heatmap for `viewport`, served from the region cache when fresh.
    ///
    /// `version` is the snapshot version `world` was loaded at.
    pub fn compute_cached(
        &self,
        world: &World,
        version: u64,
        viewport: &Viewport,
        category: Option<SupplyCategory>,
    ) -> Result<Vec<HeatmapPoint>, ValidationError> {
        viewport.validate()?;
        let expanded = self.expanded(viewport);
        let (key, region) = CacheKey::snap(&expanded, self.config.cache_grid_deg, category);
        let region_points = match self.cache.get(&key) {
            Some((points, cached_version)) => {
                debug!(version, cached_version, "heatmap cache hit");
                points
            }
            None => {
                let points = Arc::new(self.points_in(world, &region, category)?);
                self.cache.insert(key, region, Arc::clone(&points), version);
                points
            }
        };
        Ok(region_points
            .iter()
            .filter(|p| {
                expanded.contains(GeoPoint {
                    lat: p.lat,
                    lng: p.lng,
                })
            })
            .take(self.config.max_points)
            .cloned()
            .collect())
    }

    /// Wrap points with the configured rendering hints.
    pub fn layer(&self, points: Vec<HeatmapPoint>, category: Option<SupplyCategory>) -> HeatmapLayer {
        HeatmapLayer {
            points,
            opacity: self.config.layer_opacity,
            radius_m: self.config.layer_radius_m,
            category,
        }
    }

    /// Markers for areas inside `viewport`, most urgent first.
    pub fn markers(
        &self,
        world: &World,
        viewport: &Viewport,
    ) -> Result<Vec<AreaMarker>, ValidationError> {
        viewport.validate()?;
        let mut out: Vec<AreaMarker> = world
            .areas_in(viewport)?
            .into_iter()
            .map(|a| AreaMarker {
                id: a.id.clone(),
                name: a.name.clone(),
                position: a.position,
                urgency: a.urgency,
                reachability: a.reachability,
                security: a.security,
                population: a.population,
                weather: a.weather_conditions.clone(),
                unmet_needs: a
                    .needs
                    .keys()
                    .map(|c| (*c, a.unmet(*c)))
                    .filter(|(_, q)| *q > 0)
                    .collect(),
            })
            .collect();
        out.sort_by(|a, b| b.urgency.total_cmp(&a.urgency).then_with(|| a.id.cmp(&b.id)));
        Ok(out)
    }
}

impl Default for HeatmapAggregator {
    fn default() -> Self {
        Self::new(HeatmapConfig::default())
    }
}
