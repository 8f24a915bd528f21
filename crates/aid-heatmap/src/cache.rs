//! Region cache for computed heatmap points.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use aid_core::{GeoPoint, SupplyCategory, Viewport};
use dashmap::DashMap;
use tracing::debug;

use crate::HeatmapPoint;

/// Cache key: a viewport snapped outward to the cache grid plus the filter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    south: i64,
    west: i64,
    north: i64,
    east: i64,
    category: Option<SupplyCategory>,
}

impl CacheKey {
    /// Snap `viewport` outward to multiples of `grid_deg`.
    ///
    /// Returns the key and the snapped region; the region always contains
    /// `viewport`.
    pub fn snap(viewport: &Viewport, grid_deg: f64, category: Option<SupplyCategory>) -> (Self, Viewport) {
        let down = |v: f64| (v / grid_deg).floor() as i64;
        let up = |v: f64| (v / grid_deg).ceil() as i64;
        let mut key = CacheKey {
            south: down(viewport.sw.lat),
            west: down(viewport.sw.lng),
            north: up(viewport.ne.lat),
            east: up(viewport.ne.lng),
            category,
        };
        // A nearly global wrapping box can snap into a non-wrapping sliver.
        if viewport.crosses_antimeridian() && key.west <= key.east {
            key.west = down(-180.0);
            key.east = up(180.0);
        }
        let region = Viewport {
            sw: GeoPoint {
                lat: (key.south as f64 * grid_deg).max(-90.0),
                lng: (key.west as f64 * grid_deg).max(-180.0),
            },
            ne: GeoPoint {
                lat: (key.north as f64 * grid_deg).min(90.0),
                lng: (key.east as f64 * grid_deg).min(180.0),
            },
        };
        (key, region)
    }

    pub fn category(&self) -> Option<SupplyCategory> {
        self.category
    }
}

#[derive(Clone, Debug)]
struct CachedRegion {
    region: Viewport,
    points: Arc<Vec<HeatmapPoint>>,
    version: u64,
    cached_at: Instant,
}

/// Counters exposed for observability.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
}

/// Concurrent TTL cache of heatmap regions.
#[derive(Debug)]
pub struct HeatmapCache {
    entries: DashMap<CacheKey, CachedRegion>,
    ttl: Duration,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
}

impl HeatmapCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            max_entries: max_entries.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    /// Points cached for `key` if the entry is within its TTL.
    pub fn get(&self, key: &CacheKey) -> Option<(Arc<Vec<HeatmapPoint>>, u64)> {
        let fresh = self.entries.get(key).and_then(|e| {
            (e.cached_at.elapsed() <= self.ttl).then(|| (Arc::clone(&e.points), e.version))
        });
        match fresh {
            Some(hit) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(hit)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                self.entries.remove_if(key, |_, e| e.cached_at.elapsed() > self.ttl);
                None
            }
        }
    }

    pub fn insert(&self, key: CacheKey, region: Viewport, points: Arc<Vec<HeatmapPoint>>, version: u64) {
        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_entries {
            self.evict_oldest();
        }
        self.entries.insert(
            key,
            CachedRegion {
                region,
                points,
                version,
                cached_at: Instant::now(),
            },
        );
    }

    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|e| e.value().cached_at)
            .map(|e| *e.key());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }

    fn drop_where<F>(&self, categories: Option<&[SupplyCategory]>, mut hit: F) -> usize
    where
        F: FnMut(&Viewport) -> bool,
    {
        let before = self.entries.len();
        self.entries.retain(|key, entry| {
            let category_hit = match (key.category, categories) {
                (None, _) | (_, None) => true,
                (Some(c), Some(cs)) => cs.contains(&c),
            };
            !(category_hit && hit(&entry.region))
        });
        let dropped = before.saturating_sub(self.entries.len());
        self.invalidations
            .fetch_add(dropped as u64, Ordering::Relaxed);
        dropped
    }

    /// Drop entries whose region contains `point` and whose filter is
    /// unfiltered or one of `categories` (`None` matches every filter).
    pub fn invalidate_at(&self, point: GeoPoint, categories: Option<&[SupplyCategory]>) -> usize {
        let dropped = self.drop_where(categories, |r| r.contains(point));
        debug!(lat = point.lat, lng = point.lng, dropped, "heatmap cache invalidated at point");
        dropped
    }

    /// Drop entries whose region intersects `region`.
    pub fn invalidate_region(&self, region: &Viewport, categories: Option<&[SupplyCategory]>) -> usize {
        let dropped = self.drop_where(categories, |r| intersects(r, region));
        debug!(?region, dropped, "heatmap cache invalidated in region");
        dropped
    }

    pub fn clear(&self) {
        let n = self.entries.len();
        self.entries.clear();
        self.invalidations.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }
}

/// Whether two viewports share at least one point.
pub fn intersects(a: &Viewport, b: &Viewport) -> bool {
    if a.ne.lat < b.sw.lat || b.ne.lat < a.sw.lat {
        return false;
    }
    a.lng_spans().iter().any(|x| {
        b.lng_spans()
            .iter()
            .any(|y| x.west <= y.east && y.west <= x.east)
    })
}
