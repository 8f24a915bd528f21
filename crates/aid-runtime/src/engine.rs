//! The engine facade: one published world, many concurrent readers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use aid_core::{
    AreaId, CrisisArea, Donation, DonationId, Ngo, NgoId, SupplyCategory, Viewport,
};
use aid_heatmap::{AreaMarker, CacheStats, HeatmapAggregator, HeatmapLayer, HeatmapPoint};
use aid_index::{BuildReport, SnapshotCell, World, WorldSnapshot};
use aid_match::{AreaRecommendations, Cancellation, MatchCandidate, Matcher};
use aid_scoring::Scorer;
use aid_store::{Dataset, EntitySource};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::change::{area_impact, donation_impact, ngo_impact, EntityChange, Impact, Reach};
use crate::{EngineConfig, EngineError};

/// Counters and sizes for observability.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EngineStats {
    pub version: u64,
    pub as_of: DateTime<Utc>,
    pub areas: usize,
    pub ngos: usize,
    pub donations: usize,
    pub writes: u64,
    /// Reads whose snapshot was superseded before they returned.
    pub stale_reads: u64,
    pub cache: CacheStats,
}

/// Matching and heatmap engine over a copy-on-write world.
///
/// Reads take the current snapshot and never block writers. Writes are
/// serialized, applied to a private copy and published in one swap, after
/// which the affected heatmap cache regions are dropped.
///
/// Example:
///   let engine = Engine::from_dataset(EngineConfig::default(), dataset)?.0;
///   let top = engine.recommend(&AreaId::from("area-00001"), 5)?;
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    scorer: Scorer,
    heatmap: HeatmapAggregator,
    world: SnapshotCell<World>,
    writes: AtomicU64,
    stale_reads: AtomicU64,
}

impl Engine {
    /// Engine over an empty world.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let scorer = Scorer::new(config.scoring.clone())?;
        let heatmap = HeatmapAggregator::with_scorer(config.heatmap.clone(), scorer.clone());
        let world = World::new(Utc::now(), &config.index);
        Ok(Self {
            config,
            scorer,
            heatmap,
            world: SnapshotCell::new(world),
            writes: AtomicU64::new(0),
            stale_reads: AtomicU64::new(0),
        })
    }

    pub fn from_dataset(
        config: EngineConfig,
        dataset: Dataset,
    ) -> Result<(Self, BuildReport), EngineError> {
        let engine = Self::new(config)?;
        let (world, report) = World::build(
            dataset.as_of,
            &engine.config.index,
            dataset.crisis_areas,
            dataset.ngos,
            dataset.donations,
        );
        engine.publish(world, &report);
        Ok((engine, report))
    }

    /// Rebuild the world from `source` and publish it whole.
    pub fn load(
        &self,
        source: &dyn EntitySource,
        as_of: DateTime<Utc>,
    ) -> Result<BuildReport, EngineError> {
        let areas = source.list_crisis_areas().map_err(EngineError::Source)?;
        let ngos = source.list_ngos().map_err(EngineError::Source)?;
        let donations = source.list_donations().map_err(EngineError::Source)?;
        let (world, report) = World::build(as_of, &self.config.index, areas, ngos, donations);
        self.publish(world, &report);
        Ok(report)
    }

    fn publish(&self, world: World, report: &BuildReport) {
        let version = self.world.replace(world);
        self.heatmap.cache().clear();
        for r in &report.rejected {
            warn!(kind = r.kind, id = %r.id, reason = %r.reason, "entity rejected");
        }
        info!(
            version,
            areas = report.areas,
            ngos = report.ngos,
            donations = report.donations,
            rejected = report.rejected.len(),
            "world published"
        );
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn scorer(&self) -> &Scorer {
        &self.scorer
    }

    pub fn heatmap_aggregator(&self) -> &HeatmapAggregator {
        &self.heatmap
    }

    /// The current snapshot; holders keep it alive after newer ones appear.
    pub fn snapshot(&self) -> Arc<WorldSnapshot> {
        self.world.load()
    }

    pub fn version(&self) -> u64 {
        self.world.version()
    }

    /// Returns true and records a stale read when `snap` was superseded.
    fn check_stale(&self, snap: &WorldSnapshot, op: &'static str) -> bool {
        let current = self.world.version();
        if current == snap.version() {
            return false;
        }
        self.stale_reads.fetch_add(1, Ordering::Relaxed);
        warn!(
            target: "aid_runtime::stale",
            op,
            used = snap.version(),
            current,
            "read served from a superseded snapshot"
        );
        true
    }

    pub fn area(&self, id: &AreaId) -> Result<Arc<CrisisArea>, EngineError> {
        self.snapshot()
            .area(id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound {
                kind: "crisis_area",
                id: id.to_string(),
            })
    }

    pub fn ngo(&self, id: &NgoId) -> Result<Arc<Ngo>, EngineError> {
        self.snapshot()
            .ngo(id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound {
                kind: "ngo",
                id: id.to_string(),
            })
    }

    /// Ranked candidates for one area. `top_k = 0` uses the configured default.
    pub fn recommend(
        &self,
        area_id: &AreaId,
        top_k: usize,
    ) -> Result<Vec<MatchCandidate>, EngineError> {
        let snap = self.snapshot();
        let out = Matcher::new(&snap, &self.scorer, self.config.matcher.clone())
            .recommend(area_id, top_k)?;
        self.check_stale(&snap, "recommend");
        Ok(out)
    }

    /// Recommendations for every area with outstanding need, all computed
    /// against one snapshot.
    pub fn recommend_all(
        &self,
        top_k: usize,
        cancel: &Cancellation,
    ) -> Result<Vec<AreaRecommendations>, EngineError> {
        let snap = self.snapshot();
        let out = Matcher::new(&snap, &self.scorer, self.config.matcher.clone())
            .recommend_all(top_k, cancel)?;
        self.check_stale(&snap, "recommend_all");
        info!(version = snap.version(), areas = out.len(), "batch matching finished");
        Ok(out)
    }

    pub fn heatmap(
        &self,
        viewport: &Viewport,
        category: Option<SupplyCategory>,
    ) -> Result<Vec<HeatmapPoint>, EngineError> {
        let snap = self.snapshot();
        let points = self
            .heatmap
            .compute_cached(&snap, snap.version(), viewport, category)?;
        if self.check_stale(&snap, "heatmap") {
            // The cache may now hold a region filled from the old world.
            let cats = category.map(|c| vec![c]);
            self.heatmap
                .cache()
                .invalidate_region(&self.heatmap.expanded(viewport), cats.as_deref());
        }
        Ok(points)
    }

    /// Heatmap points wrapped with rendering hints.
    pub fn heatmap_layer(
        &self,
        viewport: &Viewport,
        category: Option<SupplyCategory>,
    ) -> Result<HeatmapLayer, EngineError> {
        let points = self.heatmap(viewport, category)?;
        Ok(self.heatmap.layer(points, category))
    }

    pub fn markers(&self, viewport: &Viewport) -> Result<Vec<AreaMarker>, EngineError> {
        let snap = self.snapshot();
        let out = self.heatmap.markers(&snap, viewport)?;
        self.check_stale(&snap, "markers");
        Ok(out)
    }

    fn reach(&self) -> Reach {
        Reach {
            margin_km: self.config.heatmap.margin_km,
            coverage_enabled: self.config.heatmap.coverage_weight > 0.0,
        }
    }

    /// Apply one change atomically and drop the heatmap regions it touches.
    pub fn apply(&self, change: EntityChange) -> Result<Impact, EngineError> {
        let label = change.label();
        let reach = self.reach();
        let (mut impact, version) = self.world.update(|w: &mut World| -> Result<Impact, EngineError> {
            let impact = match change {
                EntityChange::UpsertArea(area) => {
                    let id = area.id.clone();
                    let old = w.upsert_area(area)?;
                    let new = w.area(&id).cloned();
                    area_impact(reach, old.as_deref(), new.as_deref())
                }
                EntityChange::RemoveArea(id) => {
                    let old = w.remove_area(&id);
                    area_impact(reach, old.as_deref(), None)
                }
                EntityChange::UpsertNgo(ngo) => {
                    let id = ngo.id.clone();
                    let old = w.upsert_ngo(ngo)?;
                    let new = w.ngo(&id).cloned();
                    ngo_impact(reach, w, old.as_deref(), new.as_deref())
                }
                EntityChange::RemoveNgo(id) => {
                    let old = w.remove_ngo(&id);
                    ngo_impact(reach, w, old.as_deref(), None)
                }
                EntityChange::UpsertDonation(donation) => {
                    let id = donation.id.clone();
                    let old = w.upsert_donation(donation)?;
                    let new = w.donation(&id).cloned();
                    donation_impact(reach, w, old.as_deref(), new.as_deref())
                }
                EntityChange::RemoveDonation(id) => {
                    let old = w.remove_donation(&id);
                    donation_impact(reach, w, old.as_deref(), None)
                }
            };
            Ok(impact)
        })?;
        impact.version = version;
        self.writes.fetch_add(1, Ordering::Relaxed);
        let dropped = self.invalidate(&impact);
        info!(
            change = label,
            version,
            stale_areas = impact.area_ids.len(),
            stale_regions = impact.regions.len(),
            dropped,
            "change applied"
        );
        Ok(impact)
    }

    fn invalidate(&self, impact: &Impact) -> usize {
        let cache = self.heatmap.cache();
        let mut dropped = 0;
        for (point, categories) in &impact.points {
            dropped += cache.invalidate_at(*point, categories.as_deref());
        }
        for envelope in &impact.envelopes {
            dropped += cache.invalidate_region(envelope, None);
        }
        if dropped > 0 {
            debug!(dropped, "heatmap cache regions invalidated");
        }
        dropped
    }

    pub fn upsert_area(&self, area: CrisisArea) -> Result<Impact, EngineError> {
        self.apply(EntityChange::UpsertArea(area))
    }

    pub fn remove_area(&self, id: &AreaId) -> Result<Impact, EngineError> {
        self.apply(EntityChange::RemoveArea(id.clone()))
    }

    pub fn upsert_ngo(&self, ngo: Ngo) -> Result<Impact, EngineError> {
        self.apply(EntityChange::UpsertNgo(ngo))
    }

    pub fn remove_ngo(&self, id: &NgoId) -> Result<Impact, EngineError> {
        self.apply(EntityChange::RemoveNgo(id.clone()))
    }

    pub fn upsert_donation(&self, donation: Donation) -> Result<Impact, EngineError> {
        self.apply(EntityChange::UpsertDonation(donation))
    }

    pub fn remove_donation(&self, id: &DonationId) -> Result<Impact, EngineError> {
        self.apply(EntityChange::RemoveDonation(id.clone()))
    }

    /// Move the evaluation instant used for stock expiry.
    pub fn set_as_of(&self, as_of: DateTime<Utc>) -> u64 {
        let version = match self.world.update(|w: &mut World| -> Result<(), EngineError> {
            w.set_as_of(as_of);
            Ok(())
        }) {
            Ok(((), v)) => v,
            Err(_) => self.world.version(),
        };
        self.heatmap.cache().clear();
        debug!(%as_of, version, "evaluation instant moved");
        version
    }

    pub fn stats(&self) -> EngineStats {
        let snap = self.snapshot();
        EngineStats {
            version: snap.version(),
            as_of: snap.as_of(),
            areas: snap.area_count(),
            ngos: snap.ngo_count(),
            donations: snap.donation_count(),
            writes: self.writes.load(Ordering::Relaxed),
            stale_reads: self.stale_reads.load(Ordering::Relaxed),
            cache: self.heatmap.cache().stats(),
        }
    }
}
