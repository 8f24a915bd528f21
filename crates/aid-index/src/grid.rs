//! Uniform lat/lng grid over entity positions.

use aid_core::geo::LngSpan;
use aid_core::{haversine_km, AreaId, GeoPoint, NgoId, ValidationError, Viewport};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

/// Which population of entities a query addresses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    CrisisArea,
    Ngo,
}

/// A typed reference to an indexed entity.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum EntityRef {
    Area(AreaId),
    Ngo(NgoId),
}

impl EntityRef {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityRef::Area(_) => EntityKind::CrisisArea,
            EntityRef::Ngo(_) => EntityKind::Ngo,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            EntityRef::Area(id) => id.as_str(),
            EntityRef::Ngo(id) => id.as_str(),
        }
    }

    pub fn as_area(&self) -> Option<&AreaId> {
        match self {
            EntityRef::Area(id) => Some(id),
            EntityRef::Ngo(_) => None,
        }
    }

    pub fn as_ngo(&self) -> Option<&NgoId> {
        match self {
            EntityRef::Ngo(id) => Some(id),
            EntityRef::Area(_) => None,
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRef::Area(id) => write!(f, "area:{id}"),
            EntityRef::Ngo(id) => write!(f, "ngo:{id}"),
        }
    }
}

type Cell = (i32, i32);

#[derive(Clone, Debug, Default)]
struct Layer {
    cells: HashMap<Cell, BTreeMap<EntityRef, GeoPoint>>,
    positions: HashMap<EntityRef, GeoPoint>,
}

/// Spatial index answering bounding-box and radius queries per entity kind.
///
/// Positions are bucketed into square cells of `cell_deg` degrees, so a query
/// only visits the cells overlapping its envelope.
#[derive(Clone, Debug)]
pub struct GeoIndex {
    cell_deg: f64,
    lat_cells: i32,
    lng_cells: i32,
    areas: Layer,
    ngos: Layer,
}

impl GeoIndex {
    /// Create an empty index. `cell_deg` must be in (0, 90]; it is clamped otherwise.
    pub fn new(cell_deg: f64) -> Self {
        let cell_deg = if cell_deg.is_finite() && cell_deg > 0.0 {
            cell_deg.min(90.0)
        } else {
            1.0
        };
        Self {
            cell_deg,
            lat_cells: (180.0 / cell_deg).ceil() as i32,
            lng_cells: (360.0 / cell_deg).ceil() as i32,
            areas: Layer::default(),
            ngos: Layer::default(),
        }
    }

    pub fn cell_deg(&self) -> f64 {
        self.cell_deg
    }

    fn layer(&self, kind: EntityKind) -> &Layer {
        match kind {
            EntityKind::CrisisArea => &self.areas,
            EntityKind::Ngo => &self.ngos,
        }
    }

    fn layer_mut(&mut self, kind: EntityKind) -> &mut Layer {
        match kind {
            EntityKind::CrisisArea => &mut self.areas,
            EntityKind::Ngo => &mut self.ngos,
        }
    }

    fn lat_idx(&self, lat: f64) -> i32 {
        (((lat + 90.0) / self.cell_deg).floor() as i32).clamp(0, self.lat_cells - 1)
    }

    fn lng_idx(&self, lng: f64) -> i32 {
        (((lng + 180.0) / self.cell_deg).floor() as i32).clamp(0, self.lng_cells - 1)
    }

    fn cell_of(&self, p: GeoPoint) -> Cell {
        (self.lat_idx(p.lat), self.lng_idx(p.lng))
    }

    /// Insert or move an entity. Invalid coordinates never reach the index.
    pub fn insert(&mut self, entity: EntityRef, position: GeoPoint) -> Result<(), ValidationError> {
        position.validate()?;
        self.remove(&entity);
        let cell = self.cell_of(position);
        let layer = self.layer_mut(entity.kind());
        layer
            .cells
            .entry(cell)
            .or_default()
            .insert(entity.clone(), position);
        layer.positions.insert(entity, position);
        Ok(())
    }

    /// Remove an entity, returning its last position.
    pub fn remove(&mut self, entity: &EntityRef) -> Option<GeoPoint> {
        let cell_deg = self.cell_deg;
        let lat_cells = self.lat_cells;
        let lng_cells = self.lng_cells;
        let layer = self.layer_mut(entity.kind());
        let old = layer.positions.remove(entity)?;
        let cell = (
            (((old.lat + 90.0) / cell_deg).floor() as i32).clamp(0, lat_cells - 1),
            (((old.lng + 180.0) / cell_deg).floor() as i32).clamp(0, lng_cells - 1),
        );
        if let Some(bucket) = layer.cells.get_mut(&cell) {
            bucket.remove(entity);
            if bucket.is_empty() {
                layer.cells.remove(&cell);
            }
        }
        Some(old)
    }

    pub fn position(&self, entity: &EntityRef) -> Option<GeoPoint> {
        self.layer(entity.kind()).positions.get(entity).copied()
    }

    pub fn len(&self, kind: EntityKind) -> usize {
        self.layer(kind).positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.areas.positions.is_empty() && self.ngos.positions.is_empty()
    }

    /// Visit every entry of `kind` whose cell overlaps `lat` x `span`.
    fn scan<F>(&self, kind: EntityKind, south: f64, north: f64, span: LngSpan, mut visit: F)
    where
        F: FnMut(&EntityRef, GeoPoint),
    {
        let layer = self.layer(kind);
        let (lat0, lat1) = (self.lat_idx(south), self.lat_idx(north));
        let (lng0, lng1) = (self.lng_idx(span.west), self.lng_idx(span.east));
        let window = (lat1 - lat0 + 1) as usize * (lng1 - lng0 + 1) as usize;
        if window > layer.cells.len() {
            for (&(la, ln), bucket) in &layer.cells {
                if (lat0..=lat1).contains(&la) && (lng0..=lng1).contains(&ln) {
                    bucket.iter().for_each(|(e, p)| visit(e, *p));
                }
            }
        } else {
            for la in lat0..=lat1 {
                for ln in lng0..=lng1 {
                    if let Some(bucket) = layer.cells.get(&(la, ln)) {
                        bucket.iter().for_each(|(e, p)| visit(e, *p));
                    }
                }
            }
        }
    }

    fn collect_in(&self, kind: EntityKind, viewport: &Viewport) -> BTreeMap<EntityRef, GeoPoint> {
        let mut out = BTreeMap::new();
        for span in viewport.lng_spans() {
            self.scan(kind, viewport.sw.lat, viewport.ne.lat, span, |e, p| {
                if viewport.contains(p) {
                    out.insert(e.clone(), p);
                }
            });
        }
        out
    }

    /// Entities of `kind` inside the closed rectangle spanned by `sw` and `ne`,
    /// ordered by id. A box with `sw.lng > ne.lng` crosses the antimeridian.
    pub fn query_bbox(
        &self,
        kind: EntityKind,
        sw: GeoPoint,
        ne: GeoPoint,
    ) -> Result<Vec<EntityRef>, ValidationError> {
        let viewport = Viewport::new(sw, ne)?;
        Ok(self.collect_in(kind, &viewport).into_keys().collect())
    }

    /// Like [`GeoIndex::query_bbox`] but also returns positions.
    pub fn query_viewport(
        &self,
        kind: EntityKind,
        viewport: &Viewport,
    ) -> Result<Vec<(EntityRef, GeoPoint)>, ValidationError> {
        viewport.validate()?;
        Ok(self.collect_in(kind, viewport).into_iter().collect())
    }

    /// Entities of `kind` within `radius_km` of `center` by great-circle
    /// distance, nearest first, ties broken by id.
    pub fn query_radius(
        &self,
        kind: EntityKind,
        center: GeoPoint,
        radius_km: f64,
    ) -> Result<Vec<(EntityRef, f64)>, ValidationError> {
        center.validate()?;
        if !radius_km.is_finite() {
            return Err(ValidationError::NonFinite("radius_km"));
        }
        if radius_km < 0.0 {
            return Ok(Vec::new());
        }
        // Pad the envelope so cell rounding never drops a boundary point.
        let envelope = Viewport::around(center, radius_km * 1.01 + 0.01);
        let mut hits: BTreeSet<EntityRef> = BTreeSet::new();
        let mut out: Vec<(EntityRef, f64)> = Vec::new();
        for span in envelope.lng_spans() {
            self.scan(kind, envelope.sw.lat, envelope.ne.lat, span, |e, p| {
                let d = haversine_km(center, p);
                if d <= radius_km && hits.insert(e.clone()) {
                    out.push((e.clone(), d));
                }
            });
        }
        out.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        Ok(out)
    }
}

impl Default for GeoIndex {
    fn default() -> Self {
        Self::new(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn pt(lat: f64, lng: f64) -> GeoPoint {
        GeoPoint { lat, lng }
    }

    fn area(id: &str) -> EntityRef {
        EntityRef::Area(AreaId::from(id))
    }

    fn ngo(id: &str) -> EntityRef {
        EntityRef::Ngo(NgoId::from(id))
    }

    #[test]
    fn insert_rejects_invalid_coordinates() {
        let mut idx = GeoIndex::default();
        assert!(idx.insert(area("a"), pt(100.0, 0.0)).is_err());
        assert!(idx.insert(area("a"), pt(0.0, 200.0)).is_err());
        assert_eq!(idx.len(EntityKind::CrisisArea), 0);
    }

    #[test]
    fn bbox_is_closed_and_kind_scoped() {
        let mut idx = GeoIndex::default();
        idx.insert(area("edge"), pt(10.0, 10.0)).unwrap();
        idx.insert(area("inside"), pt(5.0, 5.0)).unwrap();
        idx.insert(area("outside"), pt(10.1, 5.0)).unwrap();
        idx.insert(ngo("n"), pt(5.0, 5.0)).unwrap();
        let got = idx
            .query_bbox(EntityKind::CrisisArea, pt(0.0, 0.0), pt(10.0, 10.0))
            .unwrap();
        assert_eq!(got, vec![area("edge"), area("inside")]);
        let got = idx
            .query_bbox(EntityKind::Ngo, pt(0.0, 0.0), pt(10.0, 10.0))
            .unwrap();
        assert_eq!(got, vec![ngo("n")]);
    }

    #[test]
    fn bbox_crossing_antimeridian_splits() {
        let mut idx = GeoIndex::new(2.0);
        idx.insert(area("east"), pt(0.0, 179.0)).unwrap();
        idx.insert(area("west"), pt(0.0, -179.0)).unwrap();
        idx.insert(area("far"), pt(0.0, 0.0)).unwrap();
        let got = idx
            .query_bbox(EntityKind::CrisisArea, pt(-5.0, 170.0), pt(5.0, -170.0))
            .unwrap();
        assert_eq!(got, vec![area("east"), area("west")]);
    }

    #[test]
    fn inverted_bbox_is_validation_error() {
        let idx = GeoIndex::default();
        assert!(matches!(
            idx.query_bbox(EntityKind::Ngo, pt(10.0, 0.0), pt(0.0, 10.0)),
            Err(ValidationError::InvertedViewport { .. })
        ));
    }

    #[test]
    fn moving_an_entity_updates_its_cell() {
        let mut idx = GeoIndex::default();
        idx.insert(ngo("n"), pt(0.0, 0.0)).unwrap();
        idx.insert(ngo("n"), pt(40.0, 40.0)).unwrap();
        assert_eq!(idx.len(EntityKind::Ngo), 1);
        assert!(idx
            .query_bbox(EntityKind::Ngo, pt(-1.0, -1.0), pt(1.0, 1.0))
            .unwrap()
            .is_empty());
        assert_eq!(idx.remove(&ngo("n")), Some(pt(40.0, 40.0)));
        assert!(idx.is_empty());
    }

    #[test]
    fn radius_orders_by_distance_then_id() {
        let mut idx = GeoIndex::default();
        idx.insert(ngo("b"), pt(0.0, 0.5)).unwrap();
        idx.insert(ngo("a"), pt(0.0, -0.5)).unwrap();
        idx.insert(ngo("c"), pt(0.0, 0.1)).unwrap();
        idx.insert(ngo("far"), pt(0.0, 3.0)).unwrap();
        let got = idx.query_radius(EntityKind::Ngo, pt(0.0, 0.0), 100.0).unwrap();
        let ids: Vec<&str> = got.iter().map(|(e, _)| e.id()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
        assert!(got.windows(2).all(|w| w[0].1 <= w[1].1));
    }

    #[test]
    fn radius_crosses_antimeridian_and_pole() {
        let mut idx = GeoIndex::default();
        idx.insert(ngo("dateline"), pt(0.0, -179.8)).unwrap();
        idx.insert(ngo("pole"), pt(89.9, 120.0)).unwrap();
        let got = idx.query_radius(EntityKind::Ngo, pt(0.0, 179.8), 50.0).unwrap();
        assert_eq!(got.len(), 1);
        let got = idx.query_radius(EntityKind::Ngo, pt(89.9, -60.0), 30.0).unwrap();
        assert_eq!(got[0].0, ngo("pole"));
    }

    proptest! {
        #[test]
        fn radius_matches_linear_scan(
            pts in proptest::collection::vec((-80.0f64..80.0, -180.0f64..180.0), 1..60),
            clat in -80.0f64..80.0, clng in -180.0f64..180.0, r in 0.0f64..2000.0,
        ) {
            let mut idx = GeoIndex::new(1.5);
            for (i, (la, ln)) in pts.iter().enumerate() {
                idx.insert(ngo(&format!("n{i:03}")), pt(*la, *ln)).unwrap();
            }
            let center = pt(clat, clng);
            let got: BTreeSet<String> = idx
                .query_radius(EntityKind::Ngo, center, r)
                .unwrap()
                .into_iter()
                .map(|(e, _)| e.id().to_string())
                .collect();
            let want: BTreeSet<String> = pts
                .iter()
                .enumerate()
                .filter(|(_, (la, ln))| haversine_km(center, pt(*la, *ln)) <= r)
                .map(|(i, _)| format!("n{i:03}"))
                .collect();
            prop_assert_eq!(got, want);
        }

        #[test]
        fn world_bbox_returns_everything(
            pts in proptest::collection::vec((-90.0f64..=90.0, -180.0f64..=180.0), 0..40),
        ) {
            let mut idx = GeoIndex::default();
            for (i, (la, ln)) in pts.iter().enumerate() {
                idx.insert(area(&format!("a{i:03}")), pt(*la, *ln)).unwrap();
            }
            let got = idx
                .query_bbox(EntityKind::CrisisArea, pt(-90.0, -180.0), pt(90.0, 180.0))
                .unwrap();
            prop_assert_eq!(got.len(), pts.len());
        }
    }
}
