#![deny(warnings)]

//! Ranked NGO recommendations for crisis areas.
//!
//! Candidates come from a radius query on the geo-index, are scored, and are
//! returned in a total order: score descending, distance ascending, NGO id
//! ascending. Batch mode runs each area independently; an NGO may top the
//! list for several areas at once.

use aid_core::{AreaId, NgoId, SupplyCategory, ValidationError};
use aid_index::{EntityKind, World};
use aid_scoring::{ScoreBreakdown, ScoreContext, Scorer};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Errors produced by the matcher.
#[derive(Debug, Error, PartialEq)]
pub enum MatchError {
    #[error("crisis area not found: {0}")]
    AreaNotFound(AreaId),
    /// Batch run stopped by the caller after `completed` areas.
    #[error("batch matching cancelled after {completed} areas")]
    Cancelled { completed: usize },
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Matcher tuning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Results returned when a caller asks for `top_k = 0`.
    pub default_top_k: usize,
    /// Upper bound on the candidate search radius; `None` uses the largest
    /// NGO reach alone.
    pub max_search_radius_km: Option<f64>,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            default_top_k: 10,
            max_search_radius_km: None,
        }
    }
}

impl MatcherConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.default_top_k == 0 {
            return Err("matcher.default_top_k must be > 0".into());
        }
        if let Some(r) = self.max_search_radius_km {
            if !r.is_finite() || r <= 0.0 {
                return Err(format!("matcher.max_search_radius_km must be > 0, got {r}"));
            }
        }
        Ok(())
    }
}

/// Quantity an NGO could ship now for one category.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Shipment {
    pub category: SupplyCategory,
    pub quantity: u64,
}

/// One ranked recommendation. Ephemeral; never persisted.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MatchCandidate {
    pub ngo_id: NgoId,
    pub crisis_area_id: AreaId,
    pub ngo_name: String,
    pub score: f64,
    pub distance_km: f64,
    pub covered_categories: BTreeSet<SupplyCategory>,
    /// `min(outstanding, available)` per covered category.
    pub shipments: Vec<Shipment>,
    pub breakdown: ScoreBreakdown,
}

/// Recommendations for one area in a batch run.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AreaRecommendations {
    pub crisis_area_id: AreaId,
    pub urgency: f64,
    pub candidates: Vec<MatchCandidate>,
}

/// Cooperative cancellation flag shared between a caller and a batch run.
#[derive(Clone, Debug, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, AtomicOrdering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(AtomicOrdering::SeqCst)
    }
}

/// Ranking order of candidates.
pub fn rank(a: &MatchCandidate, b: &MatchCandidate) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.distance_km.total_cmp(&b.distance_km))
        .then_with(|| a.ngo_id.cmp(&b.ngo_id))
}

/// Read-only matcher over one world snapshot.
pub struct Matcher<'a> {
    world: &'a World,
    scorer: &'a Scorer,
    config: MatcherConfig,
}

impl<'a> Matcher<'a> {
    pub fn new(world: &'a World, scorer: &'a Scorer, config: MatcherConfig) -> Self {
        Self {
            world,
            scorer,
            config,
        }
    }

    fn search_radius(&self) -> f64 {
        let reach = self.world.max_reach_km();
        match self.config.max_search_radius_km {
            Some(cap) => reach.min(cap),
            None => reach,
        }
    }

    fn effective_top_k(&self, top_k: usize) -> usize {
        if top_k == 0 {
            self.config.default_top_k
        } else {
            top_k
        }
    }

    /// Ranked candidates for `area_id`, at most `top_k` of them.
    pub fn recommend(
        &self,
        area_id: &AreaId,
        top_k: usize,
    ) -> Result<Vec<MatchCandidate>, MatchError> {
        let area = self
            .world
            .area(area_id)
            .ok_or_else(|| MatchError::AreaNotFound(area_id.clone()))?;
        let radius = self.search_radius();
        if radius <= 0.0 {
            return Ok(Vec::new());
        }
        let ctx = ScoreContext {
            as_of: self.world.as_of(),
            commitments: self.world.commitments(),
        };
        let nearby = self
            .world
            .index()
            .query_radius(EntityKind::Ngo, area.position, radius)?;
        let examined = nearby.len();

        let mut out: Vec<MatchCandidate> = nearby
            .into_iter()
            .filter_map(|(entity, _)| entity.as_ngo().and_then(|id| self.world.ngo(id)).cloned())
            .filter_map(|ngo| {
                let s = self.scorer.score(&ngo, area, &ctx).eligible()?;
                let shipments = s
                    .covered_categories
                    .iter()
                    .map(|&category| Shipment {
                        category,
                        quantity: area
                            .outstanding(category, ctx.commitments)
                            .min(ngo.available(category, ctx.as_of, ctx.commitments)),
                    })
                    .collect();
                Some(MatchCandidate {
                    ngo_id: ngo.id.clone(),
                    crisis_area_id: area.id.clone(),
                    ngo_name: ngo.name.clone(),
                    score: s.total,
                    distance_km: s.distance_km,
                    covered_categories: s.covered_categories,
                    shipments,
                    breakdown: s.breakdown,
                })
            })
            .collect();
        let eligible = out.len();
        out.sort_by(rank);
        out.truncate(self.effective_top_k(top_k));
        debug!(area = %area_id, radius_km = radius, examined, eligible, returned = out.len(), "recommend");
        Ok(out)
    }

    /// Recommendations for every area with outstanding need, most urgent
    /// first. `cancel` is checked before each area.
    pub fn recommend_all(
        &self,
        top_k: usize,
        cancel: &Cancellation,
    ) -> Result<Vec<AreaRecommendations>, MatchError> {
        let commitments = self.world.commitments();
        let mut areas: Vec<_> = self
            .world
            .areas()
            .filter(|a| a.needs.keys().any(|c| a.outstanding(*c, commitments) > 0))
            .collect();
        areas.sort_by(|a, b| b.urgency.total_cmp(&a.urgency).then_with(|| a.id.cmp(&b.id)));

        let mut out = Vec::with_capacity(areas.len());
        for area in areas {
            if cancel.is_cancelled() {
                debug!(completed = out.len(), "batch matching cancelled");
                return Err(MatchError::Cancelled {
                    completed: out.len(),
                });
            }
            out.push(AreaRecommendations {
                crisis_area_id: area.id.clone(),
                urgency: area.urgency,
                candidates: self.recommend(&area.id, top_k)?,
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aid_core::{
        CrisisArea, Donation, DonationId, DonationStatus, GeoPoint, Ngo, Reachability,
        SecurityLevel, SupplyRecord,
    };
    use aid_index::IndexConfig;
    use aid_scoring::ScoringWeights;
    use chrono::{DateTime, TimeZone, Utc};
    use proptest::prelude::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    fn area(id: &str, lat: f64, lng: f64, urgency: f64) -> CrisisArea {
        CrisisArea {
            id: AreaId::from(id),
            name: format!("Area {id}"),
            position: GeoPoint { lat, lng },
            population: 5000,
            needs: [(SupplyCategory::Water, 200), (SupplyCategory::Food, 100)]
                .into_iter()
                .collect(),
            current_inventory: Default::default(),
            urgency,
            security: SecurityLevel::Safe,
            reachability: Reachability::Easy,
            weather_conditions: String::new(),
            road_conditions: String::new(),
            last_donation_received: None,
        }
    }

    fn ngo(id: &str, lat: f64, lng: f64, reach: f64) -> Ngo {
        Ngo {
            id: NgoId::from(id),
            name: format!("NGO {id}"),
            location: GeoPoint { lat, lng },
            reach_radius_km: reach,
            inventory: [(SupplyCategory::Water, vec![SupplyRecord::new(80)])]
                .into_iter()
                .collect(),
            is_busy: false,
            rating: 4.0,
            credibility_score: 0.8,
            response_time_hours: 10.0,
            specializations: Default::default(),
            total_donations: 3,
            last_donation: None,
        }
    }

    fn world(areas: Vec<CrisisArea>, ngos: Vec<Ngo>, donations: Vec<Donation>) -> World {
        World::build(now(), &IndexConfig::default(), areas, ngos, donations).0
    }

    #[test]
    fn unknown_area_is_not_found() {
        let w = world(vec![], vec![], vec![]);
        let scorer = Scorer::default();
        let m = Matcher::new(&w, &scorer, MatcherConfig::default());
        assert_eq!(
            m.recommend(&AreaId::from("ghost"), 5),
            Err(MatchError::AreaNotFound(AreaId::from("ghost")))
        );
    }

    #[test]
    fn ngo_out_of_reach_is_excluded() {
        // Area ~80 km from an NGO reaching 50 km.
        let w = world(
            vec![area("a1", 0.0, 0.72, 3.0)],
            vec![ngo("n1", 0.0, 0.0, 50.0)],
            vec![],
        );
        let scorer = Scorer::default();
        let m = Matcher::new(&w, &scorer, MatcherConfig::default());
        assert!(m.recommend(&AreaId::from("a1"), 10).unwrap().is_empty());
    }

    #[test]
    fn equal_scores_rank_nearer_first() {
        let w = world(
            vec![area("a1", 0.0, 0.0, 3.0)],
            vec![
                ngo("a-far", 0.0, 5.0 / 111.195, 100.0),
                ngo("z-near", 0.0, -3.0 / 111.195, 100.0),
            ],
            vec![],
        );
        let scorer = Scorer::new(ScoringWeights {
            proximity: 0.0,
            ..Default::default()
        })
        .unwrap();
        let m = Matcher::new(&w, &scorer, MatcherConfig::default());
        let got = m.recommend(&AreaId::from("a1"), 10).unwrap();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].score.to_bits(), got[1].score.to_bits());
        assert_eq!(got[0].ngo_id, NgoId::from("z-near"));
        assert!((got[0].distance_km - 3.0).abs() < 0.01);
    }

    #[test]
    fn shipments_are_bounded_by_outstanding_and_available() {
        let d = Donation {
            id: DonationId::from("d1"),
            ngo_id: NgoId::from("other"),
            crisis_area_id: AreaId::from("a1"),
            category: SupplyCategory::Water,
            quantity: 150,
            status: DonationStatus::InTransit,
            created_at: now(),
            in_transit_at: Some(now()),
            delivered_at: None,
        };
        let w = world(
            vec![area("a1", 0.0, 0.0, 3.0)],
            vec![ngo("n1", 0.0, 0.1, 100.0)],
            vec![d],
        );
        let scorer = Scorer::default();
        let m = Matcher::new(&w, &scorer, MatcherConfig::default());
        let got = m.recommend(&AreaId::from("a1"), 0).unwrap();
        assert_eq!(
            got[0].shipments,
            vec![Shipment {
                category: SupplyCategory::Water,
                quantity: 50
            }]
        );
    }

    #[test]
    fn search_radius_cap_limits_candidates() {
        let w = world(
            vec![area("a1", 0.0, 0.0, 3.0)],
            vec![ngo("n1", 0.0, 1.0, 500.0), ngo("n2", 0.0, 0.1, 500.0)],
            vec![],
        );
        let scorer = Scorer::default();
        let m = Matcher::new(
            &w,
            &scorer,
            MatcherConfig {
                max_search_radius_km: Some(50.0),
                ..Default::default()
            },
        );
        let got = m.recommend(&AreaId::from("a1"), 10).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].ngo_id, NgoId::from("n2"));
    }

    #[test]
    fn batch_orders_by_urgency_and_honours_cancellation() {
        let w = world(
            vec![
                area("calm", 0.0, 0.0, 1.0),
                area("dire", 1.0, 1.0, 5.0),
                area("mid", 2.0, 2.0, 3.0),
            ],
            vec![ngo("n1", 1.0, 1.0, 400.0)],
            vec![],
        );
        let scorer = Scorer::default();
        let m = Matcher::new(&w, &scorer, MatcherConfig::default());
        let all = m.recommend_all(3, &Cancellation::new()).unwrap();
        let order: Vec<&str> = all.iter().map(|r| r.crisis_area_id.as_str()).collect();
        assert_eq!(order, vec!["dire", "mid", "calm"]);

        let cancel = Cancellation::new();
        cancel.cancel();
        assert_eq!(
            m.recommend_all(3, &cancel),
            Err(MatchError::Cancelled { completed: 0 })
        );
    }

    proptest! {
        #[test]
        fn results_are_totally_ordered(
            ngos in proptest::collection::vec((-1.0f64..1.0, -1.0f64..1.0, 50.0f64..400.0, 0.0f64..=1.0), 1..25),
        ) {
            let ngos: Vec<Ngo> = ngos
                .into_iter()
                .enumerate()
                .map(|(i, (lat, lng, reach, cred))| {
                    let mut n = ngo(&format!("n{i:02}"), lat, lng, reach);
                    n.credibility_score = cred;
                    n
                })
                .collect();
            let w = world(vec![area("a1", 0.0, 0.0, 4.0)], ngos, vec![]);
            let scorer = Scorer::default();
            let m = Matcher::new(&w, &scorer, MatcherConfig { default_top_k: 100, ..Default::default() });
            let got = m.recommend(&AreaId::from("a1"), 0).unwrap();
            for pair in got.windows(2) {
                prop_assert_eq!(rank(&pair[0], &pair[1]), Ordering::Less);
                prop_assert!(pair[0].score >= pair[1].score);
            }
        }
    }
}
