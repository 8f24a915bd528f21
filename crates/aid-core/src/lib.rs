#![deny(warnings)]

//! Core domain models and invariants for the aid matching engine.
//!
//! This crate defines the serializable crisis-area, NGO and donation types,
//! geographic primitives, and the validation applied at the storage boundary
//! before any entity reaches the geo-index.

pub mod geo;
pub mod ledger;
pub mod model;
pub mod validation;

pub use geo::{haversine_km, GeoPoint, Viewport, EARTH_RADIUS_KM, KM_PER_DEGREE_LAT};
pub use ledger::Commitments;
pub use model::*;
pub use validation::{validate_crisis_area, validate_donation, validate_ngo, validate_supply};

use thiserror::Error;

/// Validation errors for domain invariants.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    /// Latitude must be finite and within [-90, 90].
    #[error("latitude {0} is out of range [-90, 90]")]
    LatitudeOutOfRange(f64),
    /// Longitude must be finite and within [-180, 180].
    #[error("longitude {0} is out of range [-180, 180]")]
    LongitudeOutOfRange(f64),
    /// South-west corner lies north of the north-east corner.
    #[error("inverted viewport: sw.lat {sw_lat} > ne.lat {ne_lat}")]
    InvertedViewport { sw_lat: f64, ne_lat: f64 },
    #[error("unknown supply category: {0}")]
    UnknownCategory(String),
    #[error("unknown security level: {0}")]
    UnknownSecurityLevel(String),
    #[error("unknown reachability: {0}")]
    UnknownReachability(String),
    #[error("unknown donation status: {0}")]
    UnknownDonationStatus(String),
    #[error("unknown unit: {0}")]
    UnknownUnit(String),
    /// Numeric field must be finite.
    #[error("non-finite value for {0}")]
    NonFinite(&'static str),
    #[error("{field} = {value} is out of range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("reach radius must be > 0, got {0}")]
    NonPositiveReach(f64),
    #[error("name must be 2..=100 characters: {0:?}")]
    InvalidName(String),
    #[error("identifier must not be empty")]
    EmptyId,
    #[error("donation quantity must be > 0")]
    ZeroQuantity,
    #[error("invalid donation transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: DonationStatus,
        to: DonationStatus,
    },
    #[error("lifecycle timestamp precedes the previous transition")]
    TimestampRegression,
}
