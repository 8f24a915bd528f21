//! Entity models shared by the index, scoring, matching and heatmap crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::geo::GeoPoint;
use crate::ledger::Commitments;
use crate::ValidationError;

/// Identifier of a crisis area.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AreaId(pub String);

/// Identifier of an NGO.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NgoId(pub String);

/// Identifier of a donation.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DonationId(pub String);

macro_rules! id_impls {
    ($($t:ident),*) => {$(
        impl fmt::Display for $t {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
        impl From<&str> for $t {
            fn from(s: &str) -> Self {
                $t(s.to_string())
            }
        }
        impl $t {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }
    )*};
}
id_impls!(AreaId, NgoId, DonationId);

/// Supply categories tracked for needs and inventory.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SupplyCategory {
    Food,
    Water,
    Medical,
    Shelter,
    Clothing,
    Hygiene,
}

impl SupplyCategory {
    pub const ALL: [SupplyCategory; 6] = [
        SupplyCategory::Food,
        SupplyCategory::Water,
        SupplyCategory::Medical,
        SupplyCategory::Shelter,
        SupplyCategory::Clothing,
        SupplyCategory::Hygiene,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SupplyCategory::Food => "food",
            SupplyCategory::Water => "water",
            SupplyCategory::Medical => "medical",
            SupplyCategory::Shelter => "shelter",
            SupplyCategory::Clothing => "clothing",
            SupplyCategory::Hygiene => "hygiene",
        }
    }
}

impl fmt::Display for SupplyCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SupplyCategory {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        SupplyCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == lower)
            .ok_or_else(|| ValidationError::UnknownCategory(s.to_string()))
    }
}

/// Safety of the area for aid workers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityLevel {
    Safe,
    Caution,
    Dangerous,
    Extreme,
}

impl FromStr for SecurityLevel {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "safe" => Ok(SecurityLevel::Safe),
            "caution" => Ok(SecurityLevel::Caution),
            "dangerous" => Ok(SecurityLevel::Dangerous),
            "extreme" => Ok(SecurityLevel::Extreme),
            _ => Err(ValidationError::UnknownSecurityLevel(s.to_string())),
        }
    }
}

/// How hard the area is to reach with supplies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reachability {
    Easy,
    Moderate,
    Difficult,
    Extreme,
}

impl FromStr for Reachability {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "easy" => Ok(Reachability::Easy),
            "moderate" => Ok(Reachability::Moderate),
            "difficult" => Ok(Reachability::Difficult),
            "extreme" => Ok(Reachability::Extreme),
            _ => Err(ValidationError::UnknownReachability(s.to_string())),
        }
    }
}

/// A delivered or stocked batch of one supply category.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SupplyRecord {
    /// Amount in `unit`s.
    pub quantity: u64,
    /// Unit of measure, e.g. "kg" or "liters".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// Records at or past expiry are not usable stock.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<DateTime<Utc>>,
}

impl SupplyRecord {
    pub fn new(quantity: u64) -> Self {
        Self {
            quantity,
            unit: None,
            expiry_date: None,
        }
    }

    pub fn is_usable(&self, as_of: DateTime<Utc>) -> bool {
        self.expiry_date.map_or(true, |exp| exp > as_of)
    }
}

/// Per-category supply records, oldest first.
pub type Inventory = BTreeMap<SupplyCategory, Vec<SupplyRecord>>;

fn total_quantity(records: Option<&Vec<SupplyRecord>>) -> u64 {
    records
        .map(|rs| rs.iter().fold(0u64, |acc, r| acc.saturating_add(r.quantity)))
        .unwrap_or(0)
}

/// Reference to the most recent donation touching an entity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DonationRef {
    pub donation_id: DonationId,
    /// When the donation was delivered.
    pub at: DateTime<Utc>,
}

/// Entities with a fixed position on the map.
pub trait Positioned {
    fn position(&self) -> GeoPoint;
}

/// A location reporting unmet needs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CrisisArea {
    /// Unique area identifier.
    pub id: AreaId,
    /// Display name.
    pub name: String,
    /// Centre of the area.
    pub position: GeoPoint,
    /// People affected.
    pub population: u64,
    /// Required quantity per category.
    #[serde(default)]
    pub needs: BTreeMap<SupplyCategory, u64>,
    /// Supplies already held on site.
    #[serde(default)]
    pub current_inventory: Inventory,
    /// Urgency in [0, 5].
    pub urgency: f64,
    /// Safety for aid workers on site.
    pub security: SecurityLevel,
    /// Difficulty of getting supplies in.
    pub reachability: Reachability,
    /// Free-text weather report, shown on markers.
    #[serde(default)]
    pub weather_conditions: String,
    /// Free-text road report, shown on markers.
    #[serde(default)]
    pub road_conditions: String,
    /// Most recent delivery to this area.
    #[serde(default)]
    pub last_donation_received: Option<DonationRef>,
}

impl CrisisArea {
    /// Quantity of `category` already held by the area.
    pub fn held(&self, category: SupplyCategory) -> u64 {
        total_quantity(self.current_inventory.get(&category))
    }

    pub fn need(&self, category: SupplyCategory) -> u64 {
        self.needs.get(&category).copied().unwrap_or(0)
    }

    /// `max(0, needs[c] - held(c))`.
    pub fn unmet(&self, category: SupplyCategory) -> u64 {
        self.need(category).saturating_sub(self.held(category))
    }

    /// Categories with unmet need, in category order.
    pub fn unmet_categories(&self) -> Vec<SupplyCategory> {
        self.needs
            .keys()
            .copied()
            .filter(|c| self.unmet(*c) > 0)
            .collect()
    }

    /// Unmet need not yet covered by pending or in-transit donations.
    pub fn outstanding(&self, category: SupplyCategory, commitments: &Commitments) -> u64 {
        self.unmet(category)
            .saturating_sub(commitments.inbound(&self.id, category))
    }

    pub fn total_need(&self) -> u64 {
        self.needs.values().fold(0u64, |a, q| a.saturating_add(*q))
    }

    pub fn total_unmet(&self) -> u64 {
        self.needs
            .keys()
            .fold(0u64, |a, c| a.saturating_add(self.unmet(*c)))
    }
}

impl Positioned for CrisisArea {
    fn position(&self) -> GeoPoint {
        self.position
    }
}

/// What an NGO is particularly good at: a supply category or a domain tag.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Specialization {
    Category(SupplyCategory),
    Tag(String),
}

impl From<String> for Specialization {
    fn from(s: String) -> Self {
        match s.parse::<SupplyCategory>() {
            Ok(c) => Specialization::Category(c),
            Err(_) => Specialization::Tag(s),
        }
    }
}

impl From<Specialization> for String {
    fn from(s: Specialization) -> Self {
        match s {
            Specialization::Category(c) => c.as_str().to_string(),
            Specialization::Tag(t) => t,
        }
    }
}

impl From<SupplyCategory> for Specialization {
    fn from(c: SupplyCategory) -> Self {
        Specialization::Category(c)
    }
}

/// An organisation able to ship supplies.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Ngo {
    /// Unique NGO identifier.
    pub id: NgoId,
    /// Display name.
    pub name: String,
    /// Depot shipments leave from.
    pub location: GeoPoint,
    /// Maximum distance served, > 0.
    pub reach_radius_km: f64,
    /// Stock on hand, including expired records.
    #[serde(default)]
    pub inventory: Inventory,
    /// Busy NGOs are never recommended.
    #[serde(default)]
    pub is_busy: bool,
    /// Rating in [0, 5].
    pub rating: f64,
    /// Credibility in [0, 1].
    pub credibility_score: f64,
    /// Typical hours from acceptance to dispatch.
    pub response_time_hours: f64,
    #[serde(default)]
    pub specializations: BTreeSet<Specialization>,
    /// Delivered donations so far.
    #[serde(default)]
    pub total_donations: u64,
    /// Most recent delivered donation.
    #[serde(default)]
    pub last_donation: Option<DonationRef>,
}

impl Ngo {
    /// Usable (non-expired) stock of `category` as of `as_of`.
    pub fn stock(&self, category: SupplyCategory, as_of: DateTime<Utc>) -> u64 {
        self.inventory
            .get(&category)
            .map(|rs| {
                rs.iter()
                    .filter(|r| r.is_usable(as_of))
                    .fold(0u64, |acc, r| acc.saturating_add(r.quantity))
            })
            .unwrap_or(0)
    }

    /// Stock not already promised to pending or in-transit donations.
    pub fn available(
        &self,
        category: SupplyCategory,
        as_of: DateTime<Utc>,
        commitments: &Commitments,
    ) -> u64 {
        self.stock(category, as_of)
            .saturating_sub(commitments.committed(&self.id, category))
    }

    pub fn specializes_in(&self, category: SupplyCategory) -> bool {
        self.specializations
            .contains(&Specialization::Category(category))
    }
}

impl Positioned for Ngo {
    fn position(&self) -> GeoPoint {
        self.location
    }
}

/// Lifecycle state of a donation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DonationStatus {
    Pending,
    InTransit,
    Delivered,
}

impl DonationStatus {
    /// Whether the donated quantity is still in flight.
    pub fn is_open(&self) -> bool {
        !matches!(self, DonationStatus::Delivered)
    }

    fn next(&self) -> Option<DonationStatus> {
        match self {
            DonationStatus::Pending => Some(DonationStatus::InTransit),
            DonationStatus::InTransit => Some(DonationStatus::Delivered),
            DonationStatus::Delivered => None,
        }
    }
}

impl FromStr for DonationStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(DonationStatus::Pending),
            "in_transit" => Ok(DonationStatus::InTransit),
            "delivered" => Ok(DonationStatus::Delivered),
            _ => Err(ValidationError::UnknownDonationStatus(s.to_string())),
        }
    }
}

/// A shipment of one category from an NGO to a crisis area.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Donation {
    /// Unique donation identifier.
    pub id: DonationId,
    /// Shipping NGO.
    pub ngo_id: NgoId,
    /// Receiving area.
    pub crisis_area_id: AreaId,
    /// The single category shipped.
    pub category: SupplyCategory,
    /// Quantity shipped, > 0.
    pub quantity: u64,
    /// Pending and in-transit donations count as commitments.
    pub status: DonationStatus,
    /// When the match was accepted.
    pub created_at: DateTime<Utc>,
    /// Set on the move to in transit.
    #[serde(default)]
    pub in_transit_at: Option<DateTime<Utc>>,
    /// Set on delivery; never before `in_transit_at`.
    #[serde(default)]
    pub delivered_at: Option<DateTime<Utc>>,
}

impl Donation {
    /// Move to the next lifecycle state. Only single forward steps are allowed.
    pub fn advance(&mut self, to: DonationStatus, at: DateTime<Utc>) -> Result<(), ValidationError> {
        if self.status.next() != Some(to) {
            return Err(ValidationError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        let last = self
            .in_transit_at
            .unwrap_or(self.created_at)
            .max(self.created_at);
        if at < last {
            return Err(ValidationError::TimestampRegression);
        }
        match to {
            DonationStatus::InTransit => self.in_transit_at = Some(at),
            DonationStatus::Delivered => self.delivered_at = Some(at),
            DonationStatus::Pending => {}
        }
        self.status = to;
        Ok(())
    }
}
