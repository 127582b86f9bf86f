#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Command-line entry point for the care-map pipeline.
//!
//! Wires the one reusable loading pipeline to the resolver and the
//! ingestion client — both center kinds go through the same code
//! paths. Logging is driven by `RUST_LOG` via `pretty_env_logger`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use care_map_cache::GeocodeCache;
use care_map_center_models::{Center, CenterKind, GeocodeTask};
use care_map_geocoder::HttpGeocodeService;
use care_map_ingest::{IngestClient, IngestConfig};
use care_map_resolve::{
    CancelToken, CenterStore, CoordinateResolver, MemoryStore, Scheduler, SchedulerConfig,
};
use care_map_source::load_centers;
use clap::{Parser, Subcommand};

/// Locate service centers from public datasets and resolve map
/// coordinates for them.
#[derive(Parser)]
#[command(name = "care-map", version, about)]
struct Cli {
    /// Path to the persistent geocode cache blob.
    #[arg(long, default_value = "geocode-cache.json", global = true)]
    cache: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load, normalize, and deduplicate every dataset of one kind.
    Load {
        /// Base URL of the dataset catalog.
        #[arg(long)]
        base_url: String,
        /// Which dataset family to load (counseling | child_care).
        #[arg(long)]
        kind: CenterKind,
        /// Write the normalized entities to this JSON file.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Load one kind, then resolve coordinates for every entity that
    /// has an address but no coordinates.
    Resolve {
        /// Base URL of the dataset catalog.
        #[arg(long)]
        base_url: String,
        /// Which dataset family to load (counseling | child_care).
        #[arg(long)]
        kind: CenterKind,
        /// Structured address-geocoding endpoint.
        #[arg(long)]
        address_url: String,
        /// Free-text place-search endpoint.
        #[arg(long)]
        places_url: String,
        /// Worker count (capped low; geocoding backends rate-limit).
        #[arg(long, default_value_t = 3)]
        concurrency: usize,
        /// Write the resolved entities to this JSON file.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Stream-ingest arbitrary external JSON feeds into map markers.
    Ingest {
        /// Fan-out stream endpoint.
        #[arg(long)]
        endpoint: String,
        /// Structured address-geocoding endpoint (for the fallback
        /// queue).
        #[arg(long)]
        address_url: String,
        /// Free-text place-search endpoint (for the fallback queue).
        #[arg(long)]
        places_url: String,
        /// Target URLs to ingest.
        urls: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Load {
            base_url,
            kind,
            out,
        } => load(&base_url, kind, out.as_deref()).await,
        Command::Resolve {
            base_url,
            kind,
            address_url,
            places_url,
            concurrency,
            out,
        } => {
            resolve(
                &base_url,
                kind,
                &cli.cache,
                address_url,
                places_url,
                concurrency,
                out.as_deref(),
            )
            .await
        }
        Command::Ingest {
            endpoint,
            address_url,
            places_url,
            urls,
        } => ingest(&endpoint, &cli.cache, address_url, places_url, urls).await,
    }
}

async fn load(
    base_url: &str,
    kind: CenterKind,
    out: Option<&std::path::Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let client = reqwest::Client::new();
    let outcome = load_centers(&client, base_url, kind).await?;

    println!(
        "{} entities from {} datasets ({} failed, {}/{} records discarded)",
        outcome.centers.len(),
        outcome.datasets_loaded,
        outcome.datasets_failed,
        outcome.records_discarded,
        outcome.records_seen,
    );
    print_coverage(&outcome.centers);

    if let Some(path) = out {
        write_centers(path, &outcome.centers)?;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn resolve(
    base_url: &str,
    kind: CenterKind,
    cache_path: &std::path::Path,
    address_url: String,
    places_url: String,
    concurrency: usize,
    out: Option<&std::path::Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let client = reqwest::Client::new();
    let outcome = load_centers(&client, base_url, kind).await?;

    let cache = Arc::new(GeocodeCache::load(cache_path));
    let flusher = cache.spawn_flusher(Duration::from_secs(2));

    let service = Arc::new(HttpGeocodeService::new(
        client.clone(),
        address_url,
        places_url,
    ));
    let resolver = Arc::new(CoordinateResolver::new(
        Arc::clone(&cache),
        Arc::clone(&service) as Arc<dyn care_map_geocoder::AddressGeocoder>,
        service as Arc<dyn care_map_geocoder::PlaceSearcher>,
    ));

    let tasks: Vec<GeocodeTask> = outcome
        .centers
        .iter()
        .filter(|c| !c.has_coordinates() && !c.address.is_empty())
        .map(|c| GeocodeTask {
            entity_id: c.id.clone(),
            address: c.address.clone(),
            title: c.name.clone(),
            dataset_tag: c.id.split('-').next().unwrap_or_default().to_string(),
        })
        .collect();
    println!(
        "{} of {} entities need geocoding",
        tasks.len(),
        outcome.centers.len()
    );

    let store = Arc::new(MemoryStore::new(outcome.centers));
    let scheduler = Scheduler::new(resolver);
    let config = SchedulerConfig {
        concurrency,
        ..SchedulerConfig::default()
    };
    let report = scheduler
        .run(
            tasks,
            Arc::clone(&store) as Arc<dyn CenterStore>,
            &config,
            &CancelToken::new(),
        )
        .await;

    println!(
        "resolved {} / unresolved {} / skipped {}",
        report.resolved, report.unresolved, report.skipped
    );

    let centers = store.snapshot();
    print_coverage(&centers);

    let located: Vec<&Center> = centers.iter().filter(|c| c.has_coordinates()).collect();
    let clusters = care_map_map::cluster_markers(&located, 0.1);
    println!("{} marker clusters at 0.1° cells", clusters.len());

    flusher.shutdown().await;

    if let Some(path) = out {
        write_centers(path, &centers)?;
    }
    Ok(())
}

async fn ingest(
    endpoint: &str,
    cache_path: &std::path::Path,
    address_url: String,
    places_url: String,
    urls: Vec<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    if urls.is_empty() {
        return Err("no URLs given".into());
    }

    let client = reqwest::Client::new();
    let cache = Arc::new(GeocodeCache::load(cache_path));
    let flusher = cache.spawn_flusher(Duration::from_secs(2));

    let service = Arc::new(HttpGeocodeService::new(
        client.clone(),
        address_url,
        places_url,
    ));
    let resolver = Arc::new(CoordinateResolver::new(
        Arc::clone(&cache),
        Arc::clone(&service) as Arc<dyn care_map_geocoder::AddressGeocoder>,
        service as Arc<dyn care_map_geocoder::PlaceSearcher>,
    ));

    let ingest_client = IngestClient::new(client, endpoint.to_string(), resolver);
    let outcome = ingest_client
        .ingest(&urls, &IngestConfig::default(), &CancelToken::new())
        .await?;

    println!(
        "{} markers from {} urls ({} geocode fallbacks, {} keyword fallbacks)",
        outcome.markers.len(),
        urls.len(),
        outcome.geocode_tasks,
        outcome.keyword_tasks,
    );
    for marker in &outcome.markers {
        println!("  {:.5},{:.5}  {}", marker.lat, marker.lng, marker.title);
    }
    for error in &outcome.errors {
        log::warn!("stream: {error}");
    }
    flusher.shutdown().await;
    Ok(())
}

fn print_coverage(centers: &[Center]) {
    let located = centers.iter().filter(|c| c.has_coordinates()).count();
    #[allow(clippy::cast_precision_loss)]
    let percent = if centers.is_empty() {
        0.0
    } else {
        located as f64 / centers.len() as f64 * 100.0
    };
    println!(
        "coordinate coverage: {located}/{} ({percent:.1}%)",
        centers.len()
    );
}

fn write_centers(
    path: &std::path::Path,
    centers: &[Center],
) -> Result<(), Box<dyn std::error::Error>> {
    std::fs::write(path, serde_json::to_string_pretty(centers)?)?;
    println!("wrote {} entities to {}", centers.len(), path.display());
    Ok(())
}
