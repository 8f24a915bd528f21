//! Boundary validation for entities handed in by the storage collaborator.

use crate::model::{CrisisArea, Donation, Ngo, SupplyRecord};
use crate::ValidationError;

/// Units accepted on supply records.
pub const KNOWN_UNITS: [&str; 6] = ["kg", "liters", "pieces", "boxes", "packets", "kits"];

const NAME_MIN: usize = 2;
const NAME_MAX: usize = 100;

fn validate_name(name: &str) -> Result<(), ValidationError> {
    let len = name.trim().chars().count();
    if !(NAME_MIN..=NAME_MAX).contains(&len) {
        return Err(ValidationError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn validate_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NonFinite(field));
    }
    if value < min || value > max {
        return Err(ValidationError::OutOfRange {
            field,
            value,
            min,
            max,
        });
    }
    Ok(())
}

/// Validate a supply record's unit.
pub fn validate_supply(record: &SupplyRecord) -> Result<(), ValidationError> {
    if let Some(unit) = &record.unit {
        let lower = unit.trim().to_ascii_lowercase();
        if !KNOWN_UNITS.contains(&lower.as_str()) {
            return Err(ValidationError::UnknownUnit(unit.clone()));
        }
    }
    Ok(())
}

/// Validate a crisis area before it may enter the index.
pub fn validate_crisis_area(area: &CrisisArea) -> Result<(), ValidationError> {
    if area.id.0.trim().is_empty() {
        return Err(ValidationError::EmptyId);
    }
    validate_name(&area.name)?;
    area.position.validate()?;
    validate_range("urgency", area.urgency, 0.0, 5.0)?;
    for records in area.current_inventory.values() {
        records.iter().try_for_each(validate_supply)?;
    }
    Ok(())
}

/// Validate an NGO before it may enter the index.
pub fn validate_ngo(ngo: &Ngo) -> Result<(), ValidationError> {
    if ngo.id.0.trim().is_empty() {
        return Err(ValidationError::EmptyId);
    }
    validate_name(&ngo.name)?;
    ngo.location.validate()?;
    if !ngo.reach_radius_km.is_finite() {
        return Err(ValidationError::NonFinite("reach_radius_km"));
    }
    if ngo.reach_radius_km <= 0.0 {
        return Err(ValidationError::NonPositiveReach(ngo.reach_radius_km));
    }
    validate_range("credibility_score", ngo.credibility_score, 0.0, 1.0)?;
    validate_range("rating", ngo.rating, 0.0, 5.0)?;
    validate_range("response_time_hours", ngo.response_time_hours, 0.0, f64::MAX)?;
    for records in ngo.inventory.values() {
        records.iter().try_for_each(validate_supply)?;
    }
    Ok(())
}

/// Validate a donation record.
pub fn validate_donation(d: &Donation) -> Result<(), ValidationError> {
    if d.id.0.trim().is_empty() {
        return Err(ValidationError::EmptyId);
    }
    if d.quantity == 0 {
        return Err(ValidationError::ZeroQuantity);
    }
    if let Some(t) = d.in_transit_at {
        if t < d.created_at {
            return Err(ValidationError::TimestampRegression);
        }
    }
    if let Some(t) = d.delivered_at {
        if t < d.in_transit_at.unwrap_or(d.created_at) {
            return Err(ValidationError::TimestampRegression);
        }
    }
    Ok(())
}
