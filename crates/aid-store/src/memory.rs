//! In-memory reference store emitting change events.

use std::collections::BTreeMap;

use aid_core::{
    validate_crisis_area, validate_donation, validate_ngo, AreaId, Commitments, CrisisArea,
    Donation, DonationId, DonationRef, DonationStatus, Ngo, NgoId, SupplyCategory, SupplyRecord,
    ValidationError,
};
use chrono::{DateTime, Utc};
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{ChangeEvent, ChangeType, Dataset, EntitySource, StoreError};

#[derive(Debug, Default)]
struct State {
    areas: BTreeMap<AreaId, CrisisArea>,
    ngos: BTreeMap<NgoId, Ngo>,
    donations: BTreeMap<DonationId, Donation>,
    next_donation: u64,
}

impl State {
    fn area_mut(&mut self, id: &AreaId) -> Result<&mut CrisisArea, StoreError> {
        self.areas.get_mut(id).ok_or_else(|| StoreError::NotFound {
            kind: "crisis_area",
            id: id.to_string(),
        })
    }

    fn ngo_mut(&mut self, id: &NgoId) -> Result<&mut Ngo, StoreError> {
        self.ngos.get_mut(id).ok_or_else(|| StoreError::NotFound {
            kind: "ngo",
            id: id.to_string(),
        })
    }
}

/// Authoritative entity state held in memory.
///
/// Every successful write notifies all subscribers after the state lock is
/// released.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
    subscribers: Mutex<Vec<Sender<ChangeEvent>>>,
}

/// A dataset entity [`MemoryStore::from_dataset`] refused to seed.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Skipped {
    pub kind: &'static str,
    pub id: String,
    pub reason: String,
}

fn skip(out: &mut Vec<Skipped>, kind: &'static str, id: String, err: ValidationError) {
    warn!(kind, id = %id, error = %err, "skipped invalid entity");
    out.push(Skipped {
        kind,
        id,
        reason: err.to_string(),
    });
}

/// Take `quantity` of usable stock from `records`, oldest first.
fn consume(records: &mut Vec<SupplyRecord>, mut quantity: u64, as_of: DateTime<Utc>) -> Option<String> {
    let mut unit = None;
    for r in records.iter_mut().filter(|r| r.is_usable(as_of)) {
        if quantity == 0 {
            break;
        }
        let take = r.quantity.min(quantity);
        r.quantity -= take;
        quantity -= take;
        if unit.is_none() {
            unit = r.unit.clone();
        }
    }
    records.retain(|r| r.quantity > 0);
    unit
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store from a dataset. Invalid entities are skipped with a
    /// warning and returned alongside the store.
    pub fn from_dataset(ds: Dataset) -> (Self, Vec<Skipped>) {
        let mut state = State::default();
        let mut skipped = Vec::new();
        for a in ds.crisis_areas {
            match validate_crisis_area(&a) {
                Ok(()) => {
                    state.areas.insert(a.id.clone(), a);
                }
                Err(e) => skip(&mut skipped, "crisis_area", a.id.to_string(), e),
            }
        }
        for n in ds.ngos {
            match validate_ngo(&n) {
                Ok(()) => {
                    state.ngos.insert(n.id.clone(), n);
                }
                Err(e) => skip(&mut skipped, "ngo", n.id.to_string(), e),
            }
        }
        for d in ds.donations {
            match validate_donation(&d) {
                Ok(()) => {
                    state.donations.insert(d.id.clone(), d);
                }
                Err(e) => skip(&mut skipped, "donation", d.id.to_string(), e),
            }
        }
        state.next_donation = state.donations.len() as u64;
        info!(
            areas = state.areas.len(),
            ngos = state.ngos.len(),
            donations = state.donations.len(),
            skipped = skipped.len(),
            "memory store seeded"
        );
        let store = Self {
            state: RwLock::new(state),
            subscribers: Mutex::new(Vec::new()),
        };
        (store, skipped)
    }

    /// Current contents as a dataset stamped `as_of`.
    pub fn to_dataset(&self, as_of: DateTime<Utc>) -> Dataset {
        let s = self.state.read();
        Dataset {
            as_of,
            crisis_areas: s.areas.values().cloned().collect(),
            ngos: s.ngos.values().cloned().collect(),
            donations: s.donations.values().cloned().collect(),
        }
    }

    /// Receive every change event emitted from now on.
    pub fn subscribe(&self) -> Receiver<ChangeEvent> {
        let (tx, rx) = channel::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    fn emit(&self, events: Vec<ChangeEvent>) {
        let mut subs = self.subscribers.lock();
        for ev in events {
            debug!(event = %ev, "change emitted");
            subs.retain(|tx| tx.send(ev.clone()).is_ok());
        }
    }

    pub fn put_area(&self, area: CrisisArea) -> Result<(), StoreError> {
        validate_crisis_area(&area)?;
        let ev = {
            let mut s = self.state.write();
            let change = if s.areas.contains_key(&area.id) {
                ChangeType::Updated
            } else {
                ChangeType::Created
            };
            let ev = ChangeEvent::area(&area.id, change);
            s.areas.insert(area.id.clone(), area);
            ev
        };
        self.emit(vec![ev]);
        Ok(())
    }

    pub fn put_ngo(&self, ngo: Ngo) -> Result<(), StoreError> {
        validate_ngo(&ngo)?;
        let ev = {
            let mut s = self.state.write();
            let change = if s.ngos.contains_key(&ngo.id) {
                ChangeType::Updated
            } else {
                ChangeType::Created
            };
            let ev = ChangeEvent::ngo(&ngo.id, change);
            s.ngos.insert(ngo.id.clone(), ngo);
            ev
        };
        self.emit(vec![ev]);
        Ok(())
    }

    pub fn remove_area(&self, id: &AreaId) -> Result<CrisisArea, StoreError> {
        let removed = self.state.write().areas.remove(id);
        let area = removed.ok_or_else(|| StoreError::NotFound {
            kind: "crisis_area",
            id: id.to_string(),
        })?;
        self.emit(vec![ChangeEvent::area(id, ChangeType::Deleted)]);
        Ok(area)
    }

    pub fn remove_ngo(&self, id: &NgoId) -> Result<Ngo, StoreError> {
        let removed = self.state.write().ngos.remove(id);
        let ngo = removed.ok_or_else(|| StoreError::NotFound {
            kind: "ngo",
            id: id.to_string(),
        })?;
        self.emit(vec![ChangeEvent::ngo(id, ChangeType::Deleted)]);
        Ok(ngo)
    }

    pub fn set_busy(&self, id: &NgoId, busy: bool) -> Result<(), StoreError> {
        self.state.write().ngo_mut(id)?.is_busy = busy;
        self.emit(vec![ChangeEvent::ngo(id, ChangeType::Updated)]);
        Ok(())
    }

    pub fn set_ngo_inventory(
        &self,
        id: &NgoId,
        category: SupplyCategory,
        records: Vec<SupplyRecord>,
    ) -> Result<(), StoreError> {
        records.iter().try_for_each(aid_core::validate_supply)?;
        {
            let mut s = self.state.write();
            let ngo = s.ngo_mut(id)?;
            if records.is_empty() {
                ngo.inventory.remove(&category);
            } else {
                ngo.inventory.insert(category, records);
            }
        }
        self.emit(vec![ChangeEvent::ngo(id, ChangeType::Updated)]);
        Ok(())
    }

    pub fn set_area_needs(
        &self,
        id: &AreaId,
        category: SupplyCategory,
        quantity: u64,
    ) -> Result<(), StoreError> {
        self.state
            .write()
            .area_mut(id)?
            .needs
            .insert(category, quantity);
        self.emit(vec![ChangeEvent::area(id, ChangeType::Updated)]);
        Ok(())
    }

    /// Record a pending donation, the write path of an accepted match.
    ///
    /// The NGO must have `quantity` of usable stock not already committed to
    /// other open donations.
    pub fn create_donation(
        &self,
        ngo_id: &NgoId,
        area_id: &AreaId,
        category: SupplyCategory,
        quantity: u64,
        at: DateTime<Utc>,
    ) -> Result<DonationId, StoreError> {
        let id = {
            let mut s = self.state.write();
            if !s.areas.contains_key(area_id) {
                return Err(StoreError::NotFound {
                    kind: "crisis_area",
                    id: area_id.to_string(),
                });
            }
            let ngo = s.ngos.get(ngo_id).ok_or_else(|| StoreError::NotFound {
                kind: "ngo",
                id: ngo_id.to_string(),
            })?;
            let commitments = Commitments::from_donations(s.donations.values());
            let available = ngo.available(category, at, &commitments);
            if available < quantity {
                return Err(StoreError::InsufficientStock {
                    ngo: ngo_id.clone(),
                    category,
                    available,
                    requested: quantity,
                });
            }
            let id = loop {
                s.next_donation += 1;
                let candidate = DonationId(format!("don-{:06}", s.next_donation));
                if !s.donations.contains_key(&candidate) {
                    break candidate;
                }
            };
            let donation = Donation {
                id: id.clone(),
                ngo_id: ngo_id.clone(),
                crisis_area_id: area_id.clone(),
                category,
                quantity,
                status: DonationStatus::Pending,
                created_at: at,
                in_transit_at: None,
                delivered_at: None,
            };
            validate_donation(&donation)?;
            s.donations.insert(id.clone(), donation);
            id
        };
        info!(donation = %id, ngo = %ngo_id, area = %area_id, %category, quantity, "donation created");
        self.emit(vec![ChangeEvent::donation(&id, ChangeType::Created)]);
        Ok(id)
    }

    /// Move a donation one lifecycle step forward.
    ///
    /// Delivery moves the stock from the NGO's inventory to the area's,
    /// increments the NGO's donation counter and stamps both last-donation
    /// references.
    pub fn advance_donation(
        &self,
        id: &DonationId,
        to: DonationStatus,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let events = {
            let mut guard = self.state.write();
            let s = &mut *guard;
            let donation = s.donations.get_mut(id).ok_or_else(|| StoreError::NotFound {
                kind: "donation",
                id: id.to_string(),
            })?;
            let mut next = donation.clone();
            next.advance(to, at)?;
            let mut events = vec![ChangeEvent::donation(id, ChangeType::Updated)];
            if to == DonationStatus::Delivered {
                let stamp = DonationRef {
                    donation_id: id.clone(),
                    at,
                };
                let ngo = s.ngos.get_mut(&next.ngo_id).ok_or_else(|| StoreError::NotFound {
                    kind: "ngo",
                    id: next.ngo_id.to_string(),
                })?;
                let held = ngo.stock(next.category, at);
                if held < next.quantity {
                    return Err(StoreError::InsufficientStock {
                        ngo: next.ngo_id.clone(),
                        category: next.category,
                        available: held,
                        requested: next.quantity,
                    });
                }
                let area = s
                    .areas
                    .get_mut(&next.crisis_area_id)
                    .ok_or_else(|| StoreError::NotFound {
                        kind: "crisis_area",
                        id: next.crisis_area_id.to_string(),
                    })?;
                let records = ngo.inventory.entry(next.category).or_default();
                let unit = consume(records, next.quantity, at);
                if records.is_empty() {
                    ngo.inventory.remove(&next.category);
                }
                ngo.total_donations += 1;
                ngo.last_donation = Some(stamp.clone());
                area.current_inventory
                    .entry(next.category)
                    .or_default()
                    .push(SupplyRecord {
                        quantity: next.quantity,
                        unit,
                        expiry_date: None,
                    });
                area.last_donation_received = Some(stamp);
                events.push(ChangeEvent::ngo(&next.ngo_id, ChangeType::Updated));
                events.push(ChangeEvent::area(&next.crisis_area_id, ChangeType::Updated));
            }
            *donation = next;
            events
        };
        info!(donation = %id, status = ?to, "donation advanced");
        self.emit(events);
        Ok(())
    }
}

impl EntitySource for MemoryStore {
    fn list_crisis_areas(&self) -> anyhow::Result<Vec<CrisisArea>> {
        Ok(self.state.read().areas.values().cloned().collect())
    }

    fn list_ngos(&self) -> anyhow::Result<Vec<Ngo>> {
        Ok(self.state.read().ngos.values().cloned().collect())
    }

    fn list_donations(&self) -> anyhow::Result<Vec<Donation>> {
        Ok(self.state.read().donations.values().cloned().collect())
    }

    fn get_crisis_area(&self, id: &AreaId) -> anyhow::Result<Option<CrisisArea>> {
        Ok(self.state.read().areas.get(id).cloned())
    }

    fn get_ngo(&self, id: &NgoId) -> anyhow::Result<Option<Ngo>> {
        Ok(self.state.read().ngos.get(id).cloned())
    }

    fn get_donation(&self, id: &DonationId) -> anyhow::Result<Option<Donation>> {
        Ok(self.state.read().donations.get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChangeKind;
    use aid_core::{GeoPoint, Reachability, SecurityLevel};
    use chrono::TimeZone;

    fn t(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, day, 0, 0, 0).unwrap()
    }

    fn store() -> MemoryStore {
        let s = MemoryStore::new();
        s.put_area(CrisisArea {
            id: AreaId::from("a1"),
            name: "Flooded Valley".into(),
            position: GeoPoint {
                lat: 18.6,
                lng: -72.3,
            },
            population: 1200,
            needs: [(SupplyCategory::Water, 500)].into_iter().collect(),
            current_inventory: Default::default(),
            urgency: 4.0,
            security: SecurityLevel::Caution,
            reachability: Reachability::Difficult,
            weather_conditions: "Flooding".into(),
            road_conditions: "Washed out".into(),
            last_donation_received: None,
        })
        .unwrap();
        s.put_ngo(Ngo {
            id: NgoId::from("n1"),
            name: "Water Relief".into(),
            location: GeoPoint {
                lat: 18.5,
                lng: -72.0,
            },
            reach_radius_km: 300.0,
            inventory: [(
                SupplyCategory::Water,
                vec![
                    SupplyRecord {
                        quantity: 100,
                        unit: Some("liters".into()),
                        expiry_date: None,
                    },
                    SupplyRecord {
                        quantity: 300,
                        unit: Some("liters".into()),
                        expiry_date: None,
                    },
                ],
            )]
            .into_iter()
            .collect(),
            is_busy: false,
            rating: 4.2,
            credibility_score: 0.9,
            response_time_hours: 8.0,
            specializations: Default::default(),
            total_donations: 0,
            last_donation: None,
        })
        .unwrap();
        s
    }

    #[test]
    fn writes_emit_events() {
        let s = store();
        let rx = s.subscribe();
        s.set_busy(&NgoId::from("n1"), true).unwrap();
        s.remove_area(&AreaId::from("a1")).unwrap();
        let got: Vec<ChangeEvent> = rx.try_iter().collect();
        assert_eq!(
            got,
            vec![
                ChangeEvent::ngo(&NgoId::from("n1"), ChangeType::Updated),
                ChangeEvent::area(&AreaId::from("a1"), ChangeType::Deleted),
            ]
        );
        assert!(matches!(
            s.set_busy(&NgoId::from("ghost"), true),
            Err(StoreError::NotFound { kind: "ngo", .. })
        ));
    }

    #[test]
    fn donation_cannot_exceed_available_stock() {
        let s = store();
        let (n, a) = (NgoId::from("n1"), AreaId::from("a1"));
        s.create_donation(&n, &a, SupplyCategory::Water, 350, t(1))
            .unwrap();
        let err = s
            .create_donation(&n, &a, SupplyCategory::Water, 100, t(1))
            .unwrap_err();
        assert_eq!(
            err,
            StoreError::InsufficientStock {
                ngo: n,
                category: SupplyCategory::Water,
                available: 50,
                requested: 100,
            }
        );
    }

    #[test]
    fn delivery_moves_stock_and_stamps_references() {
        let s = store();
        let rx = s.subscribe();
        let (n, a) = (NgoId::from("n1"), AreaId::from("a1"));
        let id = s
            .create_donation(&n, &a, SupplyCategory::Water, 150, t(1))
            .unwrap();
        assert!(s.advance_donation(&id, DonationStatus::Delivered, t(2)).is_err());
        s.advance_donation(&id, DonationStatus::InTransit, t(2))
            .unwrap();
        s.advance_donation(&id, DonationStatus::Delivered, t(3))
            .unwrap();

        let ngo = s.get_ngo(&n).unwrap().unwrap();
        assert_eq!(ngo.stock(SupplyCategory::Water, t(3)), 250);
        assert_eq!(ngo.total_donations, 1);
        assert_eq!(ngo.last_donation.as_ref().map(|r| &r.donation_id), Some(&id));

        let area = s.get_crisis_area(&a).unwrap().unwrap();
        assert_eq!(area.unmet(SupplyCategory::Water), 350);
        assert_eq!(
            area.current_inventory[&SupplyCategory::Water][0].unit.as_deref(),
            Some("liters")
        );
        assert_eq!(area.last_donation_received.map(|r| r.at), Some(t(3)));

        let kinds: Vec<ChangeKind> = rx.try_iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ChangeKind::Donation,
                ChangeKind::Donation,
                ChangeKind::Donation,
                ChangeKind::Ngo,
                ChangeKind::CrisisArea,
            ]
        );
    }

    #[test]
    fn seeding_skips_invalid_entities() {
        let mut ds = store().to_dataset(t(1));
        let mut bad = ds.crisis_areas[0].clone();
        bad.id = AreaId::from("a2");
        bad.urgency = 7.5;
        ds.crisis_areas.push(bad);
        let (s, skipped) = MemoryStore::from_dataset(ds);
        assert_eq!(skipped.len(), 1);
        assert_eq!((skipped[0].kind, skipped[0].id.as_str()), ("crisis_area", "a2"));
        assert_eq!(s.list_crisis_areas().unwrap().len(), 1);
        assert_eq!(s.list_ngos().unwrap().len(), 1);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let s = store();
        drop(s.subscribe());
        let rx = s.subscribe();
        s.set_area_needs(&AreaId::from("a1"), SupplyCategory::Food, 10)
            .unwrap();
        assert_eq!(rx.try_iter().count(), 1);
        assert_eq!(s.subscribers.lock().len(), 1);
    }
}
