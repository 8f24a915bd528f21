#![deny(warnings)]

//! Match scoring between one NGO and one crisis area.
//!
//! Scoring is a pure function of its inputs:
//! - an eligibility gate (busy, out of range, no relevant stock)
//! - coverage, proximity, urgency, reliability and access terms in [0, 1]
//! - a flat specialization bonus
//!
//! The only notion of time is the explicit `as_of` in [`ScoreContext`], used
//! to discard expired stock.

pub mod weights;

pub use weights::{ReachabilityFactors, ScoringWeights, SecurityFactors};

use aid_core::{haversine_km, Commitments, CrisisArea, Ngo, SupplyCategory};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::debug;

/// Errors produced while configuring a scorer.
#[derive(Debug, Error, PartialEq)]
pub enum ScoringError {
    /// Weights must be finite and non-negative.
    #[error("invalid weight {name} = {value}")]
    InvalidWeight { name: &'static str, value: f64 },
    #[error("response time ceiling must be > 0, got {0}")]
    InvalidCeiling(f64),
    /// Factors and shares must lie in [0, 1].
    #[error("invalid factor {name} = {value}")]
    InvalidFactor { name: &'static str, value: f64 },
}

/// Inputs shared by every score computed against one snapshot.
#[derive(Clone, Copy, Debug)]
pub struct ScoreContext<'a> {
    pub as_of: DateTime<Utc>,
    pub commitments: &'a Commitments,
}

/// Individual score terms before weighting.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub coverage: f64,
    pub proximity: f64,
    pub urgency: f64,
    pub reliability: f64,
    pub access: f64,
    pub specialization_bonus: f64,
}

/// Score of an eligible pair.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MatchScore {
    /// Weighted total in [0, 1].
    pub total: f64,
    pub distance_km: f64,
    /// Outstanding categories the NGO can supply now.
    pub covered_categories: BTreeSet<SupplyCategory>,
    pub breakdown: ScoreBreakdown,
}

/// Why a pair was excluded before scoring.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum IneligibleReason {
    Busy,
    OutOfRange { distance_km: f64, reach_km: f64 },
    NoRelevantStock,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum ScoreOutcome {
    Eligible(MatchScore),
    Ineligible(IneligibleReason),
}

impl ScoreOutcome {
    pub fn eligible(self) -> Option<MatchScore> {
        match self {
            ScoreOutcome::Eligible(s) => Some(s),
            ScoreOutcome::Ineligible(_) => None,
        }
    }

    pub fn is_eligible(&self) -> bool {
        matches!(self, ScoreOutcome::Eligible(_))
    }
}

/// Stateless scorer carrying validated weights.
#[derive(Clone, Debug, Default)]
pub struct Scorer {
    weights: ScoringWeights,
}

impl Scorer {
    pub fn new(weights: ScoringWeights) -> Result<Self, ScoringError> {
        weights.validate()?;
        debug!(?weights, "scorer configured");
        Ok(Self { weights })
    }

    pub fn weights(&self) -> &ScoringWeights {
        &self.weights
    }

    /// Score `ngo` serving `area`.
    ///
    /// The gate is checked in order: busy, then distance against the NGO's
    /// reach, then whether any outstanding category has available stock.
    ///
    /// Example:
    /// let ctx = ScoreContext { as_of, commitments: world.commitments() };
    /// if let ScoreOutcome::Eligible(s) = Scorer::default().score(&ngo, &area, &ctx) {
    ///     assert!((0.0..=1.0).contains(&s.total));
    /// }
    pub fn score(&self, ngo: &Ngo, area: &CrisisArea, ctx: &ScoreContext<'_>) -> ScoreOutcome {
        if ngo.is_busy {
            return ScoreOutcome::Ineligible(IneligibleReason::Busy);
        }
        let distance_km = haversine_km(ngo.location, area.position);
        if distance_km > ngo.reach_radius_km {
            return ScoreOutcome::Ineligible(IneligibleReason::OutOfRange {
                distance_km,
                reach_km: ngo.reach_radius_km,
            });
        }

        let mut outstanding_total: u64 = 0;
        let mut covered_total: u64 = 0;
        let mut covered = BTreeSet::new();
        let mut specialized = false;
        for &category in area.needs.keys() {
            let outstanding = area.outstanding(category, ctx.commitments);
            if outstanding == 0 {
                continue;
            }
            outstanding_total = outstanding_total.saturating_add(outstanding);
            specialized |= ngo.specializes_in(category);
            if ngo.available(category, ctx.as_of, ctx.commitments) > 0 {
                covered_total = covered_total.saturating_add(outstanding);
                covered.insert(category);
            }
        }
        if covered.is_empty() {
            return ScoreOutcome::Ineligible(IneligibleReason::NoRelevantStock);
        }

        let w = &self.weights;
        let coverage = covered_total as f64 / outstanding_total as f64;
        let proximity = (1.0 - distance_km / ngo.reach_radius_km).clamp(0.0, 1.0);
        let urgency = (area.urgency / 5.0).clamp(0.0, 1.0);
        let responsiveness = 1.0
            - ngo.response_time_hours.min(w.response_time_ceiling_hours)
                / w.response_time_ceiling_hours;
        let reliability = (w.credibility_share * ngo.credibility_score
            + (1.0 - w.credibility_share) * responsiveness)
            .clamp(0.0, 1.0);
        let weather = if w.is_severe(&area.weather_conditions) || w.is_severe(&area.road_conditions)
        {
            w.severe_weather_factor
        } else {
            1.0
        };
        let access = w.reachability_factors.factor(area.reachability)
            * w.security_factors.factor(area.security)
            * weather;
        let specialization_bonus = if specialized {
            w.specialization_bonus
        } else {
            0.0
        };

        let total = (w.coverage * coverage
            + w.proximity * proximity
            + w.urgency * urgency
            + w.reliability * reliability
            + w.access * access
            + specialization_bonus)
            .clamp(0.0, 1.0);

        ScoreOutcome::Eligible(MatchScore {
            total,
            distance_km,
            covered_categories: covered,
            breakdown: ScoreBreakdown {
                coverage,
                proximity,
                urgency,
                reliability,
                access,
                specialization_bonus,
            },
        })
    }
}
