#![deny(warnings)]

//! Headless CLI: load a snapshot (or generate one), then print
//! recommendations, heatmaps or a replayed donation lifecycle as JSON.

use std::path::PathBuf;
use std::sync::Arc;

use aid_core::{AreaId, DonationStatus, GeoPoint, SupplyCategory, Viewport};
use aid_runtime::{Cancellation, ChangeFeedDispatcher, Engine, EngineConfig, Notification};
use aid_store::{synth, Dataset, MemoryStore};
use anyhow::{anyhow, bail, Context, Result};
use chrono::Duration;
use serde::Serialize;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: aidmatch <recommend|batch|heatmap|markers|replay|stats> \
[--snapshot FILE | --seed N --areas N --ngos N] [--config FILE] [--area ID] [--top K] \
[--sw LAT,LNG --ne LAT,LNG] [--category C]";

#[derive(Debug)]
struct Args {
    command: String,
    snapshot: Option<PathBuf>,
    seed: u64,
    areas: usize,
    ngos: usize,
    config: Option<PathBuf>,
    area: Option<String>,
    top: usize,
    sw: Option<GeoPoint>,
    ne: Option<GeoPoint>,
    category: Option<SupplyCategory>,
}

fn parse_point(s: &str) -> Result<GeoPoint> {
    let (lat, lng) = s
        .split_once(',')
        .ok_or_else(|| anyhow!("expected LAT,LNG, got {s:?}"))?;
    let p = GeoPoint::new(lat.trim().parse()?, lng.trim().parse()?)?;
    Ok(p)
}

fn value(it: &mut impl Iterator<Item = String>, flag: &str) -> Result<String> {
    it.next().ok_or_else(|| anyhow!("{flag} needs a value"))
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        command: String::new(),
        snapshot: None,
        seed: 42,
        areas: 200,
        ngos: 500,
        config: None,
        area: None,
        top: 0,
        sw: None,
        ne: None,
        category: None,
    };
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--snapshot" => args.snapshot = Some(value(&mut it, &arg)?.into()),
            "--seed" => args.seed = value(&mut it, &arg)?.parse()?,
            "--areas" => args.areas = value(&mut it, &arg)?.parse()?,
            "--ngos" => args.ngos = value(&mut it, &arg)?.parse()?,
            "--config" => args.config = Some(value(&mut it, &arg)?.into()),
            "--area" => args.area = Some(value(&mut it, &arg)?),
            "--top" => args.top = value(&mut it, &arg)?.parse()?,
            "--sw" => args.sw = Some(parse_point(&value(&mut it, &arg)?)?),
            "--ne" => args.ne = Some(parse_point(&value(&mut it, &arg)?)?),
            "--category" => args.category = Some(value(&mut it, &arg)?.parse()?),
            "-h" | "--help" => bail!(USAGE),
            flag if flag.starts_with("--") => bail!("unknown flag {flag}\n{USAGE}"),
            cmd if args.command.is_empty() => args.command = cmd.to_string(),
            extra => bail!("unexpected argument {extra:?}\n{USAGE}"),
        }
    }
    if args.command.is_empty() {
        bail!(USAGE);
    }
    Ok(args)
}

/// Region synthetic datasets are generated in.
fn default_region() -> Viewport {
    Viewport {
        sw: GeoPoint {
            lat: 10.0,
            lng: -90.0,
        },
        ne: GeoPoint {
            lat: 30.0,
            lng: -60.0,
        },
    }
}

impl Args {
    fn dataset(&self) -> Result<Dataset> {
        match &self.snapshot {
            Some(path) => Dataset::load(path),
            None => Ok(synth::generate(
                self.seed,
                self.areas,
                self.ngos,
                default_region(),
            )),
        }
    }

    fn engine_config(&self) -> Result<EngineConfig> {
        match &self.config {
            Some(path) => Ok(EngineConfig::load(path)?),
            None => Ok(EngineConfig::default()),
        }
    }

    fn viewport(&self) -> Result<Viewport> {
        match (self.sw, self.ne) {
            (Some(sw), Some(ne)) => Ok(Viewport::new(sw, ne)?),
            (None, None) if self.snapshot.is_none() => Ok(default_region()),
            (None, None) => Ok(Viewport::world()),
            _ => bail!("--sw and --ne must be given together"),
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// The requested area, or the most urgent one with outstanding need.
fn target_area(engine: &Engine, requested: Option<&str>) -> Result<AreaId> {
    if let Some(id) = requested {
        return Ok(AreaId::from(id));
    }
    let snap = engine.snapshot();
    snap.areas()
        .filter(|a| {
            a.needs
                .keys()
                .any(|c| a.outstanding(*c, snap.commitments()) > 0)
        })
        .max_by(|a, b| a.urgency.total_cmp(&b.urgency).then_with(|| b.id.cmp(&a.id)))
        .map(|a| a.id.clone())
        .ok_or_else(|| anyhow!("no crisis area with outstanding need"))
}

#[derive(Serialize)]
struct ReplayReport {
    area: AreaId,
    ngo: String,
    category: SupplyCategory,
    quantity: u64,
    donation: String,
    notifications: Vec<Notification>,
    stats: aid_runtime::EngineStats,
}

/// Seed a store, rebuild the engine from it, then accept the best match for
/// one area and walk the donation through pending, in transit and delivered,
/// dispatching every change event.
fn replay(args: &Args, dataset: Dataset, config: EngineConfig) -> Result<()> {
    let as_of = dataset.as_of;
    let (store, skipped) = MemoryStore::from_dataset(dataset);
    if !skipped.is_empty() {
        info!(skipped = skipped.len(), "some entities were not seeded");
    }
    let store = Arc::new(store);
    let engine = Engine::new(config)?;
    engine.load(&*store, as_of)?;
    let engine = Arc::new(engine);
    let dispatcher = ChangeFeedDispatcher::new(Arc::clone(&engine), store.clone());
    let notes = dispatcher.subscribe();
    let feed = store.subscribe();

    let area = target_area(&engine, args.area.as_deref())?;
    let best = engine
        .recommend(&area, 1)?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("no eligible NGO for {area}"))?;
    let shipment = best
        .shipments
        .iter()
        .find(|s| s.quantity > 0)
        .ok_or_else(|| anyhow!("best match for {area} ships nothing"))?;
    info!(%area, ngo = %best.ngo_id, category = %shipment.category, quantity = shipment.quantity, "accepting match");

    let donation = store.create_donation(
        &best.ngo_id,
        &area,
        shipment.category,
        shipment.quantity,
        as_of,
    )?;
    store.advance_donation(&donation, DonationStatus::InTransit, as_of + Duration::hours(2))?;
    store.advance_donation(&donation, DonationStatus::Delivered, as_of + Duration::hours(12))?;

    for event in feed.try_iter() {
        dispatcher
            .dispatch(&event)
            .with_context(|| format!("dispatching {event}"))?;
    }

    print_json(&ReplayReport {
        area,
        ngo: best.ngo_id.to_string(),
        category: shipment.category,
        quantity: shipment.quantity,
        donation: donation.to_string(),
        notifications: notes.try_iter().collect(),
        stats: engine.stats(),
    })
}

fn main() -> Result<()> {
    // Logging setup
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_max_level(Level::INFO)
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args()?;
    info!(command = %args.command, snapshot = ?args.snapshot, seed = args.seed, "starting CLI");

    let dataset = args.dataset()?;
    let config = args.engine_config()?;
    if args.command == "replay" {
        return replay(&args, dataset, config);
    }

    let (engine, report) = Engine::from_dataset(config, dataset)?;
    if !report.rejected.is_empty() {
        info!(rejected = report.rejected.len(), "some entities were skipped");
    }

    match args.command.as_str() {
        "recommend" => {
            let area = target_area(&engine, args.area.as_deref())?;
            print_json(&engine.recommend(&area, args.top)?)
        }
        "batch" => print_json(&engine.recommend_all(args.top, &Cancellation::new())?),
        "heatmap" => print_json(&engine.heatmap_layer(&args.viewport()?, args.category)?),
        "markers" => print_json(&engine.markers(&args.viewport()?)?),
        "stats" => print_json(&engine.stats()),
        other => bail!("unknown command {other:?}\n{USAGE}"),
    }
}
