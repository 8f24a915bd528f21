//! Operator-tunable scoring weights and factors.

use aid_core::{Reachability, SecurityLevel};
use serde::{Deserialize, Serialize};

use crate::ScoringError;

/// Multiplier applied per reachability class.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReachabilityFactors {
    pub easy: f64,
    pub moderate: f64,
    pub difficult: f64,
    pub extreme: f64,
}

impl Default for ReachabilityFactors {
    fn default() -> Self {
        Self {
            easy: 1.0,
            moderate: 0.75,
            difficult: 0.5,
            extreme: 0.25,
        }
    }
}

impl ReachabilityFactors {
    pub fn factor(&self, r: Reachability) -> f64 {
        match r {
            Reachability::Easy => self.easy,
            Reachability::Moderate => self.moderate,
            Reachability::Difficult => self.difficult,
            Reachability::Extreme => self.extreme,
        }
    }

    fn entries(&self) -> [(&'static str, f64); 4] {
        [
            ("reachability.easy", self.easy),
            ("reachability.moderate", self.moderate),
            ("reachability.difficult", self.difficult),
            ("reachability.extreme", self.extreme),
        ]
    }
}

/// Multiplier applied per security level.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityFactors {
    pub safe: f64,
    pub caution: f64,
    pub dangerous: f64,
    pub extreme: f64,
}

impl Default for SecurityFactors {
    fn default() -> Self {
        Self {
            safe: 1.0,
            caution: 0.85,
            dangerous: 0.6,
            extreme: 0.35,
        }
    }
}

impl SecurityFactors {
    pub fn factor(&self, s: SecurityLevel) -> f64 {
        match s {
            SecurityLevel::Safe => self.safe,
            SecurityLevel::Caution => self.caution,
            SecurityLevel::Dangerous => self.dangerous,
            SecurityLevel::Extreme => self.extreme,
        }
    }

    fn entries(&self) -> [(&'static str, f64); 4] {
        [
            ("security.safe", self.safe),
            ("security.caution", self.caution),
            ("security.dangerous", self.dangerous),
            ("security.extreme", self.extreme),
        ]
    }
}

/// Weights of the match score terms.
///
/// `total = clamp(coverage*w_c + proximity*w_p + urgency*w_u
///   + reliability*w_r + access*w_a + bonus, 0, 1)`.
/// The defaults sum to 1.0 before the specialization bonus.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub coverage: f64,
    pub proximity: f64,
    pub urgency: f64,
    pub reliability: f64,
    pub access: f64,
    /// Flat addition when an outstanding category is an NGO specialization.
    pub specialization_bonus: f64,
    /// Response time at or above which the responsiveness term is 0.
    pub response_time_ceiling_hours: f64,
    /// Share of credibility in the reliability blend; the rest is responsiveness.
    pub credibility_share: f64,
    pub reachability_factors: ReachabilityFactors,
    pub security_factors: SecurityFactors,
    /// Access multiplier when weather or road text reports severe conditions.
    pub severe_weather_factor: f64,
    /// Case-insensitive substrings marking severe conditions.
    pub severe_keywords: Vec<String>,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            coverage: 0.35,
            proximity: 0.20,
            urgency: 0.20,
            reliability: 0.15,
            access: 0.10,
            specialization_bonus: 0.05,
            response_time_ceiling_hours: 72.0,
            credibility_share: 0.7,
            reachability_factors: ReachabilityFactors::default(),
            security_factors: SecurityFactors::default(),
            severe_weather_factor: 0.7,
            severe_keywords: [
                "storm",
                "hurricane",
                "cyclone",
                "typhoon",
                "flood",
                "blizzard",
                "blocked",
                "washed out",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

fn check_weight(name: &'static str, value: f64) -> Result<(), ScoringError> {
    if !value.is_finite() || value < 0.0 {
        return Err(ScoringError::InvalidWeight { name, value });
    }
    Ok(())
}

fn check_factor(name: &'static str, value: f64) -> Result<(), ScoringError> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(ScoringError::InvalidFactor { name, value });
    }
    Ok(())
}

impl ScoringWeights {
    /// Reject non-finite or negative weights and out-of-range factors.
    pub fn validate(&self) -> Result<(), ScoringError> {
        check_weight("coverage", self.coverage)?;
        check_weight("proximity", self.proximity)?;
        check_weight("urgency", self.urgency)?;
        check_weight("reliability", self.reliability)?;
        check_weight("access", self.access)?;
        check_weight("specialization_bonus", self.specialization_bonus)?;
        let c = self.response_time_ceiling_hours;
        if !c.is_finite() || c <= 0.0 {
            return Err(ScoringError::InvalidCeiling(c));
        }
        check_factor("credibility_share", self.credibility_share)?;
        check_factor("severe_weather_factor", self.severe_weather_factor)?;
        for (name, v) in self.reachability_factors.entries() {
            check_factor(name, v)?;
        }
        for (name, v) in self.security_factors.entries() {
            check_factor(name, v)?;
        }
        Ok(())
    }

    /// Whether free-text conditions mention a severe keyword.
    pub fn is_severe(&self, text: &str) -> bool {
        if text.is_empty() {
            return false;
        }
        let lower = text.to_lowercase();
        self.severe_keywords
            .iter()
            .filter(|k| !k.is_empty())
            .any(|k| lower.contains(&k.to_lowercase()))
    }
}
