//! The indexed, immutable-once-published view of every entity.

use std::collections::BTreeMap;
use std::sync::Arc;

use aid_core::{
    validate_crisis_area, validate_donation, validate_ngo, AreaId, Commitments, CrisisArea,
    Donation, DonationId, Ngo, NgoId, ValidationError,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::grid::{EntityKind, EntityRef, GeoIndex};
use crate::IndexConfig;

/// One entity refused while building a world.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Rejected {
    pub kind: &'static str,
    pub id: String,
    pub reason: String,
}

/// Outcome of [`World::build`].
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct BuildReport {
    pub areas: usize,
    pub ngos: usize,
    pub donations: usize,
    pub rejected: Vec<Rejected>,
}

/// Entities, open-donation ledger and geo-index, always mutually consistent.
///
/// A `World` is cloned and edited by writers, then published whole through a
/// [`crate::SnapshotCell`]; readers never see a half-applied change.
#[derive(Clone, Debug)]
pub struct World {
    as_of: DateTime<Utc>,
    areas: BTreeMap<AreaId, Arc<CrisisArea>>,
    ngos: BTreeMap<NgoId, Arc<Ngo>>,
    donations: BTreeMap<DonationId, Arc<Donation>>,
    commitments: Commitments,
    index: GeoIndex,
    max_reach_km: f64,
}

impl World {
    pub fn new(as_of: DateTime<Utc>, config: &IndexConfig) -> Self {
        Self {
            as_of,
            areas: BTreeMap::new(),
            ngos: BTreeMap::new(),
            donations: BTreeMap::new(),
            commitments: Commitments::new(),
            index: GeoIndex::new(config.cell_deg),
            max_reach_km: 0.0,
        }
    }

    /// Build a world from raw entity lists, skipping anything invalid.
    pub fn build<A, N, D>(
        as_of: DateTime<Utc>,
        config: &IndexConfig,
        areas: A,
        ngos: N,
        donations: D,
    ) -> (Self, BuildReport)
    where
        A: IntoIterator<Item = CrisisArea>,
        N: IntoIterator<Item = Ngo>,
        D: IntoIterator<Item = Donation>,
    {
        let mut world = Self::new(as_of, config);
        let mut report = BuildReport::default();
        for area in areas {
            let id = area.id.to_string();
            match world.upsert_area(area) {
                Ok(Some(_)) => warn!(area = %id, "duplicate crisis area id; last one wins"),
                Ok(None) => report.areas += 1,
                Err(e) => reject(&mut report, "crisis_area", id, e),
            }
        }
        for ngo in ngos {
            let id = ngo.id.to_string();
            match world.upsert_ngo(ngo) {
                Ok(Some(_)) => warn!(ngo = %id, "duplicate ngo id; last one wins"),
                Ok(None) => report.ngos += 1,
                Err(e) => reject(&mut report, "ngo", id, e),
            }
        }
        for donation in donations {
            let id = donation.id.to_string();
            match world.upsert_donation(donation) {
                Ok(Some(_)) => warn!(donation = %id, "duplicate donation id; last one wins"),
                Ok(None) => report.donations += 1,
                Err(e) => reject(&mut report, "donation", id, e),
            }
        }
        debug!(
            areas = report.areas,
            ngos = report.ngos,
            donations = report.donations,
            rejected = report.rejected.len(),
            "world built"
        );
        (world, report)
    }

    pub fn as_of(&self) -> DateTime<Utc> {
        self.as_of
    }

    pub fn set_as_of(&mut self, as_of: DateTime<Utc>) {
        self.as_of = as_of;
    }

    pub fn area(&self, id: &AreaId) -> Option<&Arc<CrisisArea>> {
        self.areas.get(id)
    }

    pub fn ngo(&self, id: &NgoId) -> Option<&Arc<Ngo>> {
        self.ngos.get(id)
    }

    pub fn donation(&self, id: &DonationId) -> Option<&Arc<Donation>> {
        self.donations.get(id)
    }

    /// Crisis areas in id order.
    pub fn areas(&self) -> impl Iterator<Item = &Arc<CrisisArea>> + '_ {
        self.areas.values()
    }

    /// NGOs in id order.
    pub fn ngos(&self) -> impl Iterator<Item = &Arc<Ngo>> + '_ {
        self.ngos.values()
    }

    pub fn donations(&self) -> impl Iterator<Item = &Arc<Donation>> + '_ {
        self.donations.values()
    }

    pub fn area_count(&self) -> usize {
        self.areas.len()
    }

    pub fn ngo_count(&self) -> usize {
        self.ngos.len()
    }

    pub fn donation_count(&self) -> usize {
        self.donations.len()
    }

    pub fn commitments(&self) -> &Commitments {
        &self.commitments
    }

    pub fn index(&self) -> &GeoIndex {
        &self.index
    }

    /// Largest reach radius over all NGOs, 0 when there are none.
    pub fn max_reach_km(&self) -> f64 {
        self.max_reach_km
    }

    fn recompute_max_reach(&mut self) {
        self.max_reach_km = self
            .ngos
            .values()
            .map(|n| n.reach_radius_km)
            .fold(0.0, f64::max);
    }

    /// Insert or replace a crisis area, returning the previous version.
    pub fn upsert_area(
        &mut self,
        area: CrisisArea,
    ) -> Result<Option<Arc<CrisisArea>>, ValidationError> {
        validate_crisis_area(&area)?;
        self.index
            .insert(EntityRef::Area(area.id.clone()), area.position)?;
        Ok(self.areas.insert(area.id.clone(), Arc::new(area)))
    }

    pub fn remove_area(&mut self, id: &AreaId) -> Option<Arc<CrisisArea>> {
        self.index.remove(&EntityRef::Area(id.clone()));
        self.areas.remove(id)
    }

    /// Insert or replace an NGO, returning the previous version.
    pub fn upsert_ngo(&mut self, ngo: Ngo) -> Result<Option<Arc<Ngo>>, ValidationError> {
        validate_ngo(&ngo)?;
        self.index
            .insert(EntityRef::Ngo(ngo.id.clone()), ngo.location)?;
        let reach = ngo.reach_radius_km;
        let prev = self.ngos.insert(ngo.id.clone(), Arc::new(ngo));
        match &prev {
            Some(old) if old.reach_radius_km >= self.max_reach_km => self.recompute_max_reach(),
            _ => self.max_reach_km = self.max_reach_km.max(reach),
        }
        Ok(prev)
    }

    pub fn remove_ngo(&mut self, id: &NgoId) -> Option<Arc<Ngo>> {
        self.index.remove(&EntityRef::Ngo(id.clone()));
        let prev = self.ngos.remove(id);
        if prev.is_some() {
            self.recompute_max_reach();
        }
        prev
    }

    /// Insert or replace a donation and keep the commitment ledger in step.
    pub fn upsert_donation(
        &mut self,
        donation: Donation,
    ) -> Result<Option<Arc<Donation>>, ValidationError> {
        validate_donation(&donation)?;
        if let Some(old) = self.donations.get(&donation.id) {
            self.commitments.remove(old);
        }
        self.commitments.add(&donation);
        Ok(self
            .donations
            .insert(donation.id.clone(), Arc::new(donation)))
    }

    pub fn remove_donation(&mut self, id: &DonationId) -> Option<Arc<Donation>> {
        let prev = self.donations.remove(id)?;
        self.commitments.remove(&prev);
        Some(prev)
    }

    /// Whether the entity referenced exists in this world.
    pub fn contains(&self, entity: &EntityRef) -> bool {
        match entity {
            EntityRef::Area(id) => self.areas.contains_key(id),
            EntityRef::Ngo(id) => self.ngos.contains_key(id),
        }
    }

    /// Crisis areas inside a viewport, in id order.
    pub fn areas_in(
        &self,
        viewport: &aid_core::Viewport,
    ) -> Result<Vec<Arc<CrisisArea>>, ValidationError> {
        Ok(self
            .index
            .query_viewport(EntityKind::CrisisArea, viewport)?
            .into_iter()
            .filter_map(|(e, _)| e.as_area().and_then(|id| self.areas.get(id)).cloned())
            .collect())
    }
}

fn reject(report: &mut BuildReport, kind: &'static str, id: String, err: ValidationError) {
    warn!(kind, id = %id, error = %err, "rejected entity");
    report.rejected.push(Rejected {
        kind,
        id,
        reason: err.to_string(),
    });
}
