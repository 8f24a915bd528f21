#![deny(warnings)]

//! Storage-side collaborators of the aid engine.
//!
//! The engine never owns authoritative entity state. This crate defines the
//! boundary it reads through ([`EntitySource`]), the change events storage
//! emits ([`ChangeEvent`]), an in-memory reference store, JSON snapshot files,
//! seeded synthetic datasets and a caller-side retry helper.

pub mod dataset;
pub mod memory;
pub mod retry;
pub mod synth;

pub use dataset::Dataset;
pub use memory::{MemoryStore, Skipped};

use aid_core::{AreaId, CrisisArea, Donation, DonationId, Ngo, NgoId, SupplyCategory, ValidationError};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Read access to authoritative entity state.
///
/// `get_*` return `Ok(None)` for ids the store does not know.
pub trait EntitySource: Send + Sync {
    fn list_crisis_areas(&self) -> anyhow::Result<Vec<CrisisArea>>;
    fn list_ngos(&self) -> anyhow::Result<Vec<Ngo>>;
    fn list_donations(&self) -> anyhow::Result<Vec<Donation>>;
    fn get_crisis_area(&self, id: &AreaId) -> anyhow::Result<Option<CrisisArea>>;
    fn get_ngo(&self, id: &NgoId) -> anyhow::Result<Option<Ngo>>;
    fn get_donation(&self, id: &DonationId) -> anyhow::Result<Option<Donation>>;
}

/// Entity family a change refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    CrisisArea,
    Ngo,
    Donation,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Created,
    Updated,
    Deleted,
}

/// `{entity_kind, entity_id, change_type}` notification from storage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub id: String,
    pub change: ChangeType,
}

impl ChangeEvent {
    pub fn area(id: &AreaId, change: ChangeType) -> Self {
        Self {
            kind: ChangeKind::CrisisArea,
            id: id.to_string(),
            change,
        }
    }

    pub fn ngo(id: &NgoId, change: ChangeType) -> Self {
        Self {
            kind: ChangeKind::Ngo,
            id: id.to_string(),
            change,
        }
    }

    pub fn donation(id: &DonationId, change: ChangeType) -> Self {
        Self {
            kind: ChangeKind::Donation,
            id: id.to_string(),
            change,
        }
    }
}

impl fmt::Display for ChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} {:?} {}", self.change, self.kind, self.id)
    }
}

/// Errors raised by the in-memory store's write path.
#[derive(Debug, Error, PartialEq)]
pub enum StoreError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("ngo {ngo} has {available} {category} available, {requested} requested")]
    InsufficientStock {
        ngo: NgoId,
        category: SupplyCategory,
        available: u64,
        requested: u64,
    },
}
