use aid_core::{GeoPoint, Viewport};
use aid_index::{IndexConfig, World};
use aid_match::{Cancellation, Matcher, MatcherConfig};
use aid_scoring::Scorer;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn build_world(n_areas: usize, n_ngos: usize) -> World {
    let region = Viewport {
        sw: GeoPoint {
            lat: -10.0,
            lng: 20.0,
        },
        ne: GeoPoint {
            lat: 10.0,
            lng: 45.0,
        },
    };
    let ds = aid_store::synth::generate(42, n_areas, n_ngos, region);
    World::build(
        ds.as_of,
        &IndexConfig::default(),
        ds.crisis_areas,
        ds.ngos,
        ds.donations,
    )
    .0
}

fn bench_recommend(c: &mut Criterion) {
    let world = build_world(500, 2000);
    let scorer = Scorer::default();
    let first = world.areas().next().map(|a| a.id.clone());
    c.bench_function("recommend 1 area / 2000 ngos", |b| {
        let m = Matcher::new(&world, &scorer, MatcherConfig::default());
        b.iter(|| {
            if let Some(id) = &first {
                let _ = black_box(m.recommend(id, 10));
            }
        })
    });
    c.bench_function("recommend_all 500 areas / 2000 ngos", |b| {
        let m = Matcher::new(&world, &scorer, MatcherConfig::default());
        let cancel = Cancellation::new();
        b.iter(|| {
            let _ = black_box(m.recommend_all(10, &cancel));
        })
    });
}

criterion_group!(benches, bench_recommend);
criterion_main!(benches);
