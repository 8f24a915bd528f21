//! Entity changes applied to the engine and what they make stale.

use std::collections::BTreeSet;

use aid_core::{
    AreaId, CrisisArea, Donation, DonationId, GeoPoint, Ngo, NgoId, SupplyCategory, Viewport,
};
use aid_index::{EntityKind, World};
use serde::{Deserialize, Serialize};

/// One write against the engine's world.
#[derive(Clone, Debug)]
pub enum EntityChange {
    UpsertArea(CrisisArea),
    RemoveArea(AreaId),
    UpsertNgo(Ngo),
    RemoveNgo(NgoId),
    UpsertDonation(Donation),
    RemoveDonation(DonationId),
}

impl EntityChange {
    pub fn label(&self) -> &'static str {
        match self {
            EntityChange::UpsertArea(_) => "upsert_area",
            EntityChange::RemoveArea(_) => "remove_area",
            EntityChange::UpsertNgo(_) => "upsert_ngo",
            EntityChange::RemoveNgo(_) => "remove_ngo",
            EntityChange::UpsertDonation(_) => "upsert_donation",
            EntityChange::RemoveDonation(_) => "remove_donation",
        }
    }
}

/// A map region whose heatmap may have changed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StaleRegion {
    pub region: Viewport,
    /// `None` means every category. `Some` lists the category-filtered
    /// maps that changed; the unfiltered map is always included, so an
    /// empty list means only the unfiltered map changed (e.g. urgency).
    pub categories: Option<Vec<SupplyCategory>>,
}

/// Consequences of one applied change.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Impact {
    /// Snapshot version the change was published at.
    pub version: u64,
    pub regions: Vec<StaleRegion>,
    pub area_ids: BTreeSet<AreaId>,
    /// Exact positions whose cached heatmaps must go, with their categories.
    pub(crate) points: Vec<(GeoPoint, Option<Vec<SupplyCategory>>)>,
    /// Envelopes whose cached heatmaps must go regardless of category.
    pub(crate) envelopes: Vec<Viewport>,
}

impl Impact {
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty() && self.area_ids.is_empty()
    }

    fn push_region(&mut self, region: Viewport, categories: Option<Vec<SupplyCategory>>) {
        let stale = StaleRegion { region, categories };
        if !self.regions.contains(&stale) {
            self.regions.push(stale);
        }
    }
}

/// Parameters that decide how far a change reaches.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Reach {
    pub margin_km: f64,
    pub coverage_enabled: bool,
}

/// Categories whose need or held stock differ between two versions of an
/// area. Moving, creating or deleting an area touches all of its categories.
fn touched_categories(old: Option<&CrisisArea>, new: Option<&CrisisArea>) -> Vec<SupplyCategory> {
    let mut out: BTreeSet<SupplyCategory> = BTreeSet::new();
    match (old, new) {
        (Some(a), Some(b)) if a.position == b.position => {
            for c in a.needs.keys().chain(b.needs.keys()) {
                if a.need(*c) != b.need(*c) || a.held(*c) != b.held(*c) {
                    out.insert(*c);
                }
            }
        }
        _ => {
            for a in old.into_iter().chain(new) {
                out.extend(a.needs.keys().copied());
            }
        }
    }
    out.into_iter().collect()
}

fn areas_within(world: &World, center: GeoPoint, radius_km: f64, out: &mut BTreeSet<AreaId>) {
    if let Ok(hits) = world.index().query_radius(EntityKind::CrisisArea, center, radius_km) {
        out.extend(hits.into_iter().filter_map(|(e, _)| e.as_area().cloned()));
    }
}

pub(crate) fn area_impact(
    reach: Reach,
    old: Option<&CrisisArea>,
    new: Option<&CrisisArea>,
) -> Impact {
    let mut impact = Impact::default();
    let categories = touched_categories(old, new);
    for area in old.into_iter().chain(new) {
        impact.area_ids.insert(area.id.clone());
        impact
            .points
            .push((area.position, Some(categories.clone())));
        impact.push_region(
            Viewport::around(area.position, reach.margin_km),
            Some(categories.clone()),
        );
    }
    impact
}

/// An NGO change alters recommendations of every area it reaches and, with
/// coverage damping on, the heatmap over its reach.
pub(crate) fn ngo_impact(
    reach: Reach,
    world: &World,
    old: Option<&Ngo>,
    new: Option<&Ngo>,
) -> Impact {
    let mut impact = Impact::default();
    for ngo in old.into_iter().chain(new) {
        areas_within(world, ngo.location, ngo.reach_radius_km, &mut impact.area_ids);
        if reach.coverage_enabled {
            impact
                .envelopes
                .push(Viewport::around(ngo.location, ngo.reach_radius_km));
            impact.push_region(
                Viewport::around(ngo.location, ngo.reach_radius_km + reach.margin_km),
                None,
            );
        }
    }
    impact
}

/// A donation moves commitments for its area and its NGO's stock. With
/// coverage damping on, the NGO's eligibility changes for every area it
/// reaches, so its whole reach goes stale.
pub(crate) fn donation_impact(
    reach: Reach,
    world: &World,
    old: Option<&Donation>,
    new: Option<&Donation>,
) -> Impact {
    let mut impact = Impact::default();
    for d in old.into_iter().chain(new) {
        impact.area_ids.insert(d.crisis_area_id.clone());
        if let Some(ngo) = world.ngo(&d.ngo_id) {
            areas_within(world, ngo.location, ngo.reach_radius_km, &mut impact.area_ids);
            if reach.coverage_enabled {
                impact
                    .envelopes
                    .push(Viewport::around(ngo.location, ngo.reach_radius_km));
                impact.push_region(
                    Viewport::around(ngo.location, ngo.reach_radius_km + reach.margin_km),
                    None,
                );
            }
        }
        if reach.coverage_enabled {
            if let Some(area) = world.area(&d.crisis_area_id) {
                impact.points.push((area.position, None));
                impact.push_region(Viewport::around(area.position, reach.margin_km), None);
            }
        }
    }
    impact
}

#[cfg(test)]
mod tests {
    use super::*;
    use aid_core::{DonationStatus, Reachability, SecurityLevel, SupplyRecord};
    use aid_index::IndexConfig;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    fn area(id: &str, lat: f64, lng: f64) -> CrisisArea {
        CrisisArea {
            id: AreaId::from(id),
            name: format!("Area {id}"),
            position: GeoPoint { lat, lng },
            population: 1000,
            needs: [(SupplyCategory::Water, 100), (SupplyCategory::Food, 50)]
                .into_iter()
                .collect(),
            current_inventory: Default::default(),
            urgency: 3.0,
            security: SecurityLevel::Safe,
            reachability: Reachability::Easy,
            weather_conditions: "Clear".into(),
            road_conditions: "Open".into(),
            last_donation_received: None,
        }
    }

    const REACH: Reach = Reach {
        margin_km: 50.0,
        coverage_enabled: false,
    };

    #[test]
    fn inventory_change_touches_only_that_category() {
        let old = area("a", 0.0, 0.0);
        let mut new = old.clone();
        new.current_inventory.insert(
            SupplyCategory::Water,
            vec![SupplyRecord::new(40)],
        );
        let impact = area_impact(REACH, Some(&old), Some(&new));
        assert_eq!(impact.regions.len(), 1);
        assert_eq!(
            impact.regions[0].categories,
            Some(vec![SupplyCategory::Water])
        );
        assert!(impact.regions[0].region.contains(old.position));
        assert_eq!(impact.area_ids.len(), 1);
    }

    #[test]
    fn moved_area_marks_both_positions() {
        let old = area("a", 0.0, 0.0);
        let new = area("a", 10.0, 10.0);
        let impact = area_impact(REACH, Some(&old), Some(&new));
        assert_eq!(impact.regions.len(), 2);
        assert_eq!(
            impact.regions[1].categories,
            Some(vec![SupplyCategory::Food, SupplyCategory::Water])
        );
    }

    #[test]
    fn ngo_without_coverage_only_marks_matches() {
        let as_of = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut world = World::new(as_of, &IndexConfig::default());
        world.upsert_area(area("near", 0.5, 0.5)).unwrap();
        world.upsert_area(area("far", 30.0, 30.0)).unwrap();
        let ngo = Ngo {
            id: NgoId::from("n"),
            name: "Near Aid".into(),
            location: GeoPoint { lat: 0.0, lng: 0.0 },
            reach_radius_km: 200.0,
            inventory: Default::default(),
            is_busy: false,
            rating: 4.0,
            credibility_score: 0.9,
            response_time_hours: 6.0,
            specializations: Default::default(),
            total_donations: 0,
            last_donation: None,
        };
        let impact = ngo_impact(REACH, &world, None, Some(&ngo));
        assert!(impact.regions.is_empty());
        assert_eq!(
            impact.area_ids.into_iter().collect::<Vec<_>>(),
            vec![AreaId::from("near")]
        );

        let with_coverage = Reach {
            coverage_enabled: true,
            ..REACH
        };
        let impact = ngo_impact(with_coverage, &world, None, Some(&ngo));
        assert_eq!(impact.regions.len(), 1);
        assert_eq!(impact.regions[0].categories, None);
        assert_eq!(impact.envelopes.len(), 1);
    }

    #[test]
    fn urgency_only_change_touches_unfiltered_map() {
        let old = area("a", 0.0, 0.0);
        let mut new = old.clone();
        new.urgency = 5.0;
        let impact = area_impact(REACH, Some(&old), Some(&new));
        assert_eq!(impact.regions.len(), 1);
        assert_eq!(impact.regions[0].categories, Some(vec![]));
    }

    #[test]
    fn donation_with_coverage_marks_whole_ngo_reach() {
        let as_of = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut world = World::new(as_of, &IndexConfig::default());
        world.upsert_area(area("target", 0.0, 0.0)).unwrap();
        world.upsert_area(area("other", 1.5, 0.0)).unwrap();
        world
            .upsert_ngo(Ngo {
                id: NgoId::from("n"),
                name: "Relay Aid".into(),
                location: GeoPoint { lat: 0.5, lng: 0.0 },
                reach_radius_km: 150.0,
                inventory: Default::default(),
                is_busy: false,
                rating: 4.0,
                credibility_score: 0.9,
                response_time_hours: 6.0,
                specializations: Default::default(),
                total_donations: 0,
                last_donation: None,
            })
            .unwrap();
        let donation = Donation {
            id: DonationId::from("d"),
            ngo_id: NgoId::from("n"),
            crisis_area_id: AreaId::from("target"),
            category: SupplyCategory::Water,
            quantity: 10,
            status: DonationStatus::Pending,
            created_at: as_of,
            in_transit_at: None,
            delivered_at: None,
        };

        let impact = donation_impact(REACH, &world, None, Some(&donation));
        assert!(impact.regions.is_empty());
        assert!(impact.envelopes.is_empty());
        assert_eq!(impact.area_ids.len(), 2);

        let with_coverage = Reach {
            coverage_enabled: true,
            ..REACH
        };
        let impact = donation_impact(with_coverage, &world, None, Some(&donation));
        assert_eq!(impact.envelopes.len(), 1);
        assert!(impact.envelopes[0].contains(GeoPoint { lat: 1.5, lng: 0.0 }));
        assert!(impact.regions.iter().all(|r| r.categories.is_none()));
        assert!(impact
            .regions
            .iter()
            .any(|r| r.region.contains(GeoPoint { lat: 1.5, lng: 0.0 })));
    }

    proptest! {
        #[test]
        fn stale_regions_cover_old_and_new_positions(
            lat0 in -85.0f64..85.0, lng0 in -180.0f64..180.0,
            lat1 in -85.0f64..85.0, lng1 in -180.0f64..180.0,
        ) {
            let old = area("a", lat0, lng0);
            let new = area("a", lat1, lng1);
            let impact = area_impact(REACH, Some(&old), Some(&new));
            prop_assert!(impact.regions.iter().any(|r| r.region.contains(old.position)));
            prop_assert!(impact.regions.iter().any(|r| r.region.contains(new.position)));
            prop_assert_eq!(impact.area_ids.len(), 1);
        }
    }
}
