use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use aid_core::{
    AreaId, CrisisArea, DonationStatus, GeoPoint, Ngo, NgoId, Reachability, SecurityLevel,
    Specialization, SupplyCategory, SupplyRecord, Viewport,
};
use aid_runtime::{ChangeEvent, ChangeFeedDispatcher, Engine, EngineConfig, Notification};
use aid_store::{Dataset, EntitySource, MemoryStore};
use chrono::{DateTime, Duration, TimeZone, Utc};
use crossbeam::channel::Receiver;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 2, 1, 8, 0, 0).unwrap()
}

fn haiti() -> CrisisArea {
    CrisisArea {
        id: AreaId::from("pap"),
        name: "Port-au-Prince".into(),
        position: GeoPoint {
            lat: 18.5944,
            lng: -72.3074,
        },
        population: 50_000,
        needs: BTreeMap::from([(SupplyCategory::Water, 5000), (SupplyCategory::Medical, 1000)]),
        current_inventory: BTreeMap::new(),
        urgency: 5.0,
        security: SecurityLevel::Caution,
        reachability: Reachability::Moderate,
        weather_conditions: "Clear".into(),
        road_conditions: "Open".into(),
        last_donation_received: None,
    }
}

fn far_area() -> CrisisArea {
    CrisisArea {
        id: AreaId::from("far"),
        name: "Far Zone".into(),
        position: GeoPoint {
            lat: 60.0,
            lng: 10.0,
        },
        urgency: 2.0,
        ..haiti()
    }
}

fn ngo(id: &str, lng: f64, water: u64) -> Ngo {
    Ngo {
        id: NgoId::from(id),
        name: format!("Aid {id}"),
        location: GeoPoint { lat: 18.6, lng },
        reach_radius_km: 150.0,
        inventory: BTreeMap::from([(
            SupplyCategory::Water,
            vec![SupplyRecord {
                quantity: water,
                unit: Some("liters".into()),
                expiry_date: None,
            }],
        )]),
        is_busy: false,
        rating: 4.5,
        credibility_score: 0.9,
        response_time_hours: 4.0,
        specializations: BTreeSet::from([Specialization::Category(SupplyCategory::Water)]),
        total_donations: 0,
        last_donation: None,
    }
}

struct Fixture {
    store: Arc<MemoryStore>,
    dispatcher: ChangeFeedDispatcher,
}

impl Fixture {
    fn new() -> Self {
        let ds = Dataset {
            as_of: t0(),
            crisis_areas: vec![haiti(), far_area()],
            ngos: vec![ngo("near", -72.2, 800), ngo("second", -72.8, 300)],
            donations: vec![],
        };
        let (store, skipped) = MemoryStore::from_dataset(ds);
        assert!(skipped.is_empty());
        let store = Arc::new(store);
        let engine = Engine::new(EngineConfig::default()).unwrap();
        engine.load(&*store, t0()).unwrap();
        let engine = Arc::new(engine);
        let dispatcher = ChangeFeedDispatcher::new(engine, store.clone());
        Self { store, dispatcher }
    }

    fn engine(&self) -> &Engine {
        self.dispatcher.engine()
    }

    /// Dispatch everything the store emitted since `feed` was created.
    fn pump(&self, feed: &Receiver<ChangeEvent>) -> Vec<Notification> {
        feed.try_iter()
            .flat_map(|ev| self.dispatcher.dispatch(&ev).unwrap())
            .collect()
    }
}

fn top_ids(engine: &Engine) -> Vec<String> {
    engine
        .recommend(&AreaId::from("pap"), 5)
        .unwrap()
        .into_iter()
        .map(|c| c.ngo_id.to_string())
        .collect()
}

#[test]
fn donation_lifecycle_moves_stock_and_recommendations() {
    let fx = Fixture::new();
    let feed = fx.store.subscribe();
    assert_eq!(top_ids(fx.engine()), vec!["near", "second"]);

    // Accepting a match commits all of near's water.
    let id = fx
        .store
        .create_donation(
            &NgoId::from("near"),
            &AreaId::from("pap"),
            SupplyCategory::Water,
            800,
            t0(),
        )
        .unwrap();
    let notes = fx.pump(&feed);
    assert!(notes.iter().any(|n| matches!(
        n,
        Notification::MatchesStale { area_ids } if area_ids.contains(&AreaId::from("pap"))
    )));
    assert_eq!(top_ids(fx.engine()), vec!["second"]);
    let pap = fx.engine().area(&AreaId::from("pap")).unwrap();
    let snap = fx.engine().snapshot();
    assert_eq!(pap.outstanding(SupplyCategory::Water, snap.commitments()), 4200);

    fx.store
        .advance_donation(&id, DonationStatus::InTransit, t0() + Duration::hours(2))
        .unwrap();
    fx.pump(&feed);
    assert_eq!(
        fx.engine().snapshot().donation(&id).unwrap().status,
        DonationStatus::InTransit
    );

    fx.store
        .advance_donation(&id, DonationStatus::Delivered, t0() + Duration::hours(9))
        .unwrap();
    let notes = fx.pump(&feed);
    assert!(notes
        .iter()
        .any(|n| matches!(n, Notification::HeatmapStale { .. })));

    let snap = fx.engine().snapshot();
    let pap = snap.area(&AreaId::from("pap")).unwrap();
    assert_eq!(pap.held(SupplyCategory::Water), 800);
    assert_eq!(pap.unmet(SupplyCategory::Water), 4200);
    assert!(snap.commitments().is_empty());
    let near = snap.ngo(&NgoId::from("near")).unwrap();
    assert_eq!(near.stock(SupplyCategory::Water, snap.as_of()), 0);
    assert_eq!(near.total_donations, 1);
    // Engine state mirrors storage after replay.
    assert_eq!(
        fx.store.get_crisis_area(&AreaId::from("pap")).unwrap().unwrap().held(SupplyCategory::Water),
        800
    );
}

#[test]
fn change_events_drop_only_overlapping_cache_regions() {
    let fx = Fixture::new();
    let feed = fx.store.subscribe();
    let caribbean = Viewport {
        sw: GeoPoint {
            lat: 17.0,
            lng: -75.0,
        },
        ne: GeoPoint {
            lat: 20.0,
            lng: -70.0,
        },
    };
    let first = fx.engine().heatmap(&caribbean, None).unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(fx.engine().stats().cache.entries, 1);

    fx.store
        .set_area_needs(&AreaId::from("far"), SupplyCategory::Food, 100)
        .unwrap();
    fx.pump(&feed);
    assert_eq!(fx.engine().stats().cache.entries, 1);

    let mut supplied = haiti();
    supplied
        .current_inventory
        .insert(SupplyCategory::Water, vec![SupplyRecord::new(2500)]);
    fx.store.put_area(supplied).unwrap();
    let notes = fx.pump(&feed);
    assert_eq!(fx.engine().stats().cache.entries, 0);
    match &notes[0] {
        Notification::HeatmapStale { region, categories } => {
            assert!(region.contains(haiti().position));
            assert_eq!(categories.as_deref(), Some(&[SupplyCategory::Water][..]));
        }
        other => panic!("expected a heatmap notification, got {other:?}"),
    }

    let second = fx.engine().heatmap(&caribbean, None).unwrap();
    assert!(second[0].intensity < first[0].intensity);
}

#[test]
fn removed_ngo_disappears_from_recommendations() {
    let fx = Fixture::new();
    let rx = fx.dispatcher.subscribe();
    let feed = fx.store.subscribe();
    fx.store.remove_ngo(&NgoId::from("near")).unwrap();
    fx.pump(&feed);
    assert_eq!(top_ids(fx.engine()), vec!["second"]);
    assert_eq!(
        rx.try_recv().unwrap(),
        Notification::MatchesStale {
            area_ids: BTreeSet::from([AreaId::from("pap")])
        }
    );
}
