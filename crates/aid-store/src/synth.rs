//! Seeded synthetic datasets for demos, benches and tests.

use std::collections::BTreeSet;

use aid_core::geo::wrap_lng;
use aid_core::{
    AreaId, CrisisArea, Donation, DonationId, DonationStatus, GeoPoint, Inventory, Ngo, NgoId,
    Reachability, SecurityLevel, Specialization, SupplyCategory, SupplyRecord, Viewport,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::Dataset;

const WEATHER: [&str; 6] = [
    "Clear",
    "Overcast",
    "Heavy Rain",
    "Tropical Storm Warning",
    "Flooding",
    "Heatwave",
];

const ROADS: [&str; 4] = ["Open", "Congested", "Partially blocked", "Washed out"];

const NGO_PREFIXES: [&str; 8] = [
    "Red", "Blue", "Global", "Field", "Rapid", "United", "Harbor", "Mountain",
];

const NGO_SUFFIXES: [&str; 5] = ["Relief", "Aid", "Response", "Care", "Logistics"];

const TAGS: [&str; 4] = ["search-and-rescue", "logistics", "field-hospital", "water-purification"];

fn unit_for(c: SupplyCategory) -> &'static str {
    match c {
        SupplyCategory::Food => "kg",
        SupplyCategory::Water => "liters",
        SupplyCategory::Medical => "boxes",
        SupplyCategory::Shelter => "pieces",
        SupplyCategory::Clothing => "pieces",
        SupplyCategory::Hygiene => "kits",
    }
}

fn point_in(rng: &mut ChaCha8Rng, region: &Viewport) -> GeoPoint {
    let lat = rng.gen_range(region.sw.lat..=region.ne.lat);
    let lng = wrap_lng(region.sw.lng + rng.gen_range(0.0..=region.lng_width()));
    GeoPoint {
        lat: (lat * 1e4).round() / 1e4,
        lng: (lng * 1e4).round() / 1e4,
    }
}

fn categories(rng: &mut ChaCha8Rng, min: usize, max: usize) -> Vec<SupplyCategory> {
    let n = rng.gen_range(min..=max);
    let mut all = SupplyCategory::ALL.to_vec();
    all.shuffle(rng);
    all.truncate(n);
    all.sort();
    all
}

/// Fixed reference instant for generated data.
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0)
        .single()
        .unwrap_or_default()
}

/// Generate `n_areas` crisis areas and `n_ngos` NGOs inside `region`.
///
/// The same seed always yields the same dataset. Roughly one NGO in ten is
/// busy, some stock is already expired at [`epoch`], and a handful of open
/// donations commit part of the NGOs' stock.
pub fn generate(seed: u64, n_areas: usize, n_ngos: usize, region: Viewport) -> Dataset {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let as_of = epoch();

    let crisis_areas: Vec<CrisisArea> = (0..n_areas)
        .map(|i| {
            let needs = categories(&mut rng, 1, 4)
                .into_iter()
                .map(|c| (c, rng.gen_range(1..=50u64) * 100))
                .collect::<std::collections::BTreeMap<_, _>>();
            let mut current_inventory = Inventory::new();
            for (&c, &need) in &needs {
                if rng.gen_bool(0.5) {
                    current_inventory.insert(
                        c,
                        vec![SupplyRecord {
                            quantity: rng.gen_range(0..=need),
                            unit: Some(unit_for(c).to_string()),
                            expiry_date: None,
                        }],
                    );
                }
            }
            CrisisArea {
                id: AreaId(format!("area-{i:05}")),
                name: format!("Crisis Zone {i}"),
                position: point_in(&mut rng, &region),
                population: rng.gen_range(500..200_000),
                needs,
                current_inventory,
                urgency: (rng.gen_range(0.0..=5.0f64) * 10.0).round() / 10.0,
                security: *[
                    SecurityLevel::Safe,
                    SecurityLevel::Caution,
                    SecurityLevel::Dangerous,
                    SecurityLevel::Extreme,
                ]
                .choose(&mut rng)
                .unwrap_or(&SecurityLevel::Safe),
                reachability: *[
                    Reachability::Easy,
                    Reachability::Moderate,
                    Reachability::Difficult,
                    Reachability::Extreme,
                ]
                .choose(&mut rng)
                .unwrap_or(&Reachability::Easy),
                weather_conditions: WEATHER.choose(&mut rng).unwrap_or(&"Clear").to_string(),
                road_conditions: ROADS.choose(&mut rng).unwrap_or(&"Open").to_string(),
                last_donation_received: None,
            }
        })
        .collect();

    let ngos: Vec<Ngo> = (0..n_ngos)
        .map(|i| {
            let stocked = categories(&mut rng, 1, 4);
            let inventory: Inventory = stocked
                .iter()
                .map(|&c| {
                    let records = (0..rng.gen_range(1..=3))
                        .map(|_| SupplyRecord {
                            quantity: rng.gen_range(10..=2000),
                            unit: Some(unit_for(c).to_string()),
                            expiry_date: match rng.gen_range(0..4) {
                                0 => Some(as_of - Duration::days(rng.gen_range(1..90))),
                                1 => None,
                                _ => Some(as_of + Duration::days(rng.gen_range(30..720))),
                            },
                        })
                        .collect();
                    (c, records)
                })
                .collect();
            let mut specializations: BTreeSet<Specialization> = stocked
                .iter()
                .take(rng.gen_range(0..=2))
                .map(|&c| Specialization::Category(c))
                .collect();
            if rng.gen_bool(0.3) {
                if let Some(tag) = TAGS.choose(&mut rng) {
                    specializations.insert(Specialization::Tag(tag.to_string()));
                }
            }
            let prefix = NGO_PREFIXES.choose(&mut rng).unwrap_or(&"Global");
            let suffix = NGO_SUFFIXES.choose(&mut rng).unwrap_or(&"Aid");
            Ngo {
                id: NgoId(format!("ngo-{i:05}")),
                name: format!("{prefix} {suffix} {i}"),
                location: point_in(&mut rng, &region),
                reach_radius_km: rng.gen_range(50..=800) as f64,
                inventory,
                is_busy: rng.gen_bool(0.1),
                rating: (rng.gen_range(2.0..=5.0f64) * 10.0).round() / 10.0,
                credibility_score: (rng.gen_range(0.4..=1.0f64) * 100.0).round() / 100.0,
                response_time_hours: (rng.gen_range(1.0..=96.0f64) * 2.0).round() / 2.0,
                specializations,
                total_donations: rng.gen_range(0..300),
                last_donation: None,
            }
        })
        .collect();

    let mut donations = Vec::new();
    if !crisis_areas.is_empty() {
        for (i, ngo) in ngos.iter().enumerate().filter(|(i, _)| i % 7 == 0) {
            let Some((&category, _)) = ngo.inventory.iter().next() else {
                continue;
            };
            let stock = ngo.stock(category, as_of);
            if stock == 0 {
                continue;
            }
            let area = &crisis_areas[rng.gen_range(0..crisis_areas.len())];
            let created_at = as_of - Duration::hours(rng.gen_range(1..72));
            let in_transit = rng.gen_bool(0.5);
            donations.push(Donation {
                id: DonationId(format!("seed-don-{i:05}")),
                ngo_id: ngo.id.clone(),
                crisis_area_id: area.id.clone(),
                category,
                quantity: rng.gen_range(1..=stock.min(200)),
                status: if in_transit {
                    DonationStatus::InTransit
                } else {
                    DonationStatus::Pending
                },
                created_at,
                in_transit_at: in_transit.then(|| created_at + Duration::hours(1)),
                delivered_at: None,
            });
        }
    }

    Dataset {
        as_of,
        crisis_areas,
        ngos,
        donations,
    }
}
