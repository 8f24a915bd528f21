//! Quantities tied up in open donations.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::model::{AreaId, Donation, NgoId, SupplyCategory};

/// Per-NGO stock promised to open donations, and per-area stock inbound.
///
/// Only pending and in-transit donations count: once delivered, the storage
/// layer has already moved the stock into the area's inventory.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Commitments {
    committed: BTreeMap<(NgoId, SupplyCategory), u64>,
    inbound: BTreeMap<(AreaId, SupplyCategory), u64>,
}

impl Commitments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_donations<'a, I>(donations: I) -> Self
    where
        I: IntoIterator<Item = &'a Donation>,
    {
        let mut c = Self::new();
        for d in donations {
            c.add(d);
        }
        c
    }

    pub fn committed(&self, ngo: &NgoId, category: SupplyCategory) -> u64 {
        self.committed
            .get(&(ngo.clone(), category))
            .copied()
            .unwrap_or(0)
    }

    pub fn inbound(&self, area: &AreaId, category: SupplyCategory) -> u64 {
        self.inbound
            .get(&(area.clone(), category))
            .copied()
            .unwrap_or(0)
    }

    /// Account for `donation` if it is still open.
    pub fn add(&mut self, donation: &Donation) {
        if !donation.status.is_open() {
            return;
        }
        let c = self
            .committed
            .entry((donation.ngo_id.clone(), donation.category))
            .or_insert(0);
        *c = c.saturating_add(donation.quantity);
        let i = self
            .inbound
            .entry((donation.crisis_area_id.clone(), donation.category))
            .or_insert(0);
        *i = i.saturating_add(donation.quantity);
    }

    /// Undo a previous `add` of the same donation state.
    pub fn remove(&mut self, donation: &Donation) {
        if !donation.status.is_open() {
            return;
        }
        let ckey = (donation.ngo_id.clone(), donation.category);
        if let Some(c) = self.committed.get_mut(&ckey) {
            *c = c.saturating_sub(donation.quantity);
            if *c == 0 {
                self.committed.remove(&ckey);
            }
        }
        let ikey = (donation.crisis_area_id.clone(), donation.category);
        if let Some(i) = self.inbound.get_mut(&ikey) {
            *i = i.saturating_sub(donation.quantity);
            if *i == 0 {
                self.inbound.remove(&ikey);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.committed.is_empty() && self.inbound.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DonationId, DonationStatus};
    use chrono::{TimeZone, Utc};

    fn donation(id: &str, qty: u64, status: DonationStatus) -> Donation {
        Donation {
            id: DonationId::from(id),
            ngo_id: NgoId::from("n1"),
            crisis_area_id: AreaId::from("a1"),
            category: SupplyCategory::Water,
            quantity: qty,
            status,
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            in_transit_at: None,
            delivered_at: None,
        }
    }

    #[test]
    fn open_donations_are_committed() {
        let ds = [
            donation("d1", 10, DonationStatus::Pending),
            donation("d2", 5, DonationStatus::InTransit),
            donation("d3", 100, DonationStatus::Delivered),
        ];
        let c = Commitments::from_donations(ds.iter());
        assert_eq!(c.committed(&NgoId::from("n1"), SupplyCategory::Water), 15);
        assert_eq!(c.inbound(&AreaId::from("a1"), SupplyCategory::Water), 15);
        assert_eq!(c.committed(&NgoId::from("n1"), SupplyCategory::Food), 0);
    }

    #[test]
    fn remove_reverses_add() {
        let d = donation("d1", 10, DonationStatus::Pending);
        let mut c = Commitments::new();
        c.add(&d);
        c.remove(&d);
        assert!(c.is_empty());
    }
}
