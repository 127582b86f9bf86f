#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Streaming ingestion client for arbitrary external JSON feeds.
//!
//! One POST carries the target URLs and a concurrency hint; the server
//! fans out and answers with a live event stream (see [`frames`]). For
//! each per-URL result the client escalates through three strategies:
//! direct marker extraction, geocode-task extraction, and a last-resort
//! keyword search seeded from the URL host or declared title. The two
//! fallback queues drain concurrently with stream consumption using the
//! same worker-pool discipline as the background scheduler, and only
//! finish after the stream reports completion — bounded by a timeout so
//! a stalled queue cannot hang ingestion indefinitely.
//!
//! No failure here crashes anything: transport errors, error frames,
//! and truncated streams all degrade to "fewer markers than expected"
//! plus a surfaced message, and markers received before a failure stay
//! valid.

pub mod frames;
pub mod points;

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use care_map_center_models::{GeocodeTask, StreamMarkerPoint};
use care_map_resolve::{CancelToken, CoordinateResolver};
use futures::StreamExt as _;
use tokio::sync::mpsc;

use crate::frames::{Frame, FrameDecoder};

/// Worker cap per fallback queue, matching the scheduler's discipline.
const MAX_WORKERS: usize = 3;

/// Errors from issuing the ingestion request itself. Everything after
/// the stream opens degrades into [`IngestOutcome::errors`] instead.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// The fan-out request could not be sent.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Tuning knobs for one ingestion run.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Concurrency hint forwarded to the server, also the fallback
    /// worker count (clamped to [`MAX_WORKERS`]).
    pub concurrency: usize,
    /// Fixed pause a fallback worker takes after each network call.
    pub pacing: Duration,
    /// Ceiling on draining the fallback queues after the stream ends.
    pub drain_timeout: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            concurrency: MAX_WORKERS,
            pacing: Duration::from_millis(120),
            drain_timeout: Duration::from_secs(20),
        }
    }
}

/// Result of one ingestion run.
#[derive(Debug)]
pub struct IngestOutcome {
    /// Deduplicated markers, direct and fallback-resolved.
    pub markers: Vec<StreamMarkerPoint>,
    /// Surfaced stream problems (error frames, transport failures,
    /// truncation, drain timeout). Markers stay valid regardless.
    pub errors: Vec<String>,
    /// Whether the terminal `done` frame arrived.
    pub completed: bool,
    /// Geocode tasks enqueued onto the address fallback queue.
    pub geocode_tasks: usize,
    /// Keyword searches enqueued onto the last-resort queue.
    pub keyword_tasks: usize,
}

/// A last-resort keyword lookup for a URL that yielded nothing.
#[derive(Debug, Clone)]
struct KeywordTask {
    query: String,
    url: String,
}

/// Marker accumulator shared between the stream loop and the fallback
/// workers. Dedupes by the rounded-coordinate + title key within the
/// run.
#[derive(Default)]
struct MarkerSink {
    inner: Mutex<(Vec<StreamMarkerPoint>, HashSet<String>)>,
}

impl MarkerSink {
    fn push(&self, marker: StreamMarkerPoint) {
        let mut inner = lock(&self.inner);
        if inner.1.insert(marker.dedup_key()) {
            inner.0.push(marker);
        }
    }

    fn take(&self) -> Vec<StreamMarkerPoint> {
        std::mem::take(&mut lock(&self.inner).0)
    }
}

/// Streaming ingestion client bound to one fan-out endpoint.
pub struct IngestClient {
    client: reqwest::Client,
    endpoint: String,
    resolver: Arc<CoordinateResolver>,
}

impl IngestClient {
    /// Creates a client. The resolver is shared with the background
    /// scheduler so stream fallbacks reuse the same geocode cache and
    /// miss ledger.
    #[must_use]
    pub const fn new(
        client: reqwest::Client,
        endpoint: String,
        resolver: Arc<CoordinateResolver>,
    ) -> Self {
        Self {
            client,
            endpoint,
            resolver,
        }
    }

    /// Ingests the given URLs.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError`] only if the fan-out request itself
    /// cannot be issued; all later failures surface through
    /// [`IngestOutcome::errors`].
    pub async fn ingest(
        &self,
        urls: &[String],
        config: &IngestConfig,
        cancel: &CancelToken,
    ) -> Result<IngestOutcome, IngestError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({
                "urls": urls,
                "concurrency": config.concurrency,
            }))
            .send()
            .await?
            .error_for_status()?;

        let stream = response.bytes_stream();
        Ok(run_stream(stream, Arc::clone(&self.resolver), config, cancel).await)
    }
}

/// Consumes an ingestion event stream, escalating each per-URL result
/// through direct extraction → geocode fallback → keyword fallback.
///
/// Generic over the chunk stream so tests can feed scripted chunks.
#[allow(clippy::too_many_lines)]
pub async fn run_stream<S, B, E>(
    mut stream: S,
    resolver: Arc<CoordinateResolver>,
    config: &IngestConfig,
    cancel: &CancelToken,
) -> IngestOutcome
where
    S: futures::Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let sink = Arc::new(MarkerSink::default());
    let stop = CancelToken::new();

    let (geo_tx, geo_rx) = mpsc::unbounded_channel::<GeocodeTask>();
    let (kw_tx, kw_rx) = mpsc::unbounded_channel::<KeywordTask>();
    let geo_rx = Arc::new(tokio::sync::Mutex::new(geo_rx));
    let kw_rx = Arc::new(tokio::sync::Mutex::new(kw_rx));

    let workers = config.concurrency.clamp(1, MAX_WORKERS);
    let mut pool = tokio::task::JoinSet::new();
    for _ in 0..workers {
        pool.spawn(geocode_worker(
            Arc::clone(&geo_rx),
            Arc::clone(&resolver),
            Arc::clone(&sink),
            config.pacing,
            cancel.clone(),
            stop.clone(),
        ));
        pool.spawn(keyword_worker(
            Arc::clone(&kw_rx),
            Arc::clone(&resolver),
            Arc::clone(&sink),
            config.pacing,
            cancel.clone(),
            stop.clone(),
        ));
    }

    let mut decoder = FrameDecoder::new();
    let mut errors = Vec::new();
    let mut completed = false;
    let mut geocode_tasks = 0_usize;
    let mut keyword_tasks = 0_usize;
    let mut task_counter = 0_usize;

    'stream: while let Some(chunk) = stream.next().await {
        if cancel.is_cancelled() {
            break;
        }

        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                errors.push(format!("stream transport error: {e}"));
                break;
            }
        };

        for frame in decoder.push(chunk.as_ref()) {
            match frame {
                Frame::Done => {
                    completed = true;
                    break 'stream;
                }
                Frame::Error { message } => {
                    log::warn!("Ingestion stream error frame: {message}");
                    errors.push(message);
                }
                Frame::Result(result) => {
                    let mut handled = false;

                    if result.ok
                        && let Some(json) = &result.json
                    {
                        let direct = points::extract_markers(json, &result.url);
                        if direct.is_empty() {
                            let tasks =
                                points::extract_geocode_tasks(json, &result.url, &mut task_counter);
                            if !tasks.is_empty() {
                                geocode_tasks += tasks.len();
                                handled = true;
                                for task in tasks {
                                    let _ = geo_tx.send(task);
                                }
                            }
                        } else {
                            handled = true;
                            for marker in direct {
                                sink.push(marker);
                            }
                        }
                    }

                    if !handled {
                        keyword_tasks += 1;
                        let _ = kw_tx.send(KeywordTask {
                            query: points::keyword_seed(&result.url, result.title.as_deref()),
                            url: result.url,
                        });
                    }
                }
            }
        }
    }

    if !completed && !cancel.is_cancelled() {
        let detail = if decoder.has_partial() {
            " (partial frame discarded)"
        } else {
            ""
        };
        errors.push(format!("stream ended without done frame{detail}"));
    }

    // Close the queues; workers exit once they drain.
    drop(geo_tx);
    drop(kw_tx);

    let drained = tokio::time::timeout(config.drain_timeout, async {
        while pool.join_next().await.is_some() {}
    })
    .await
    .is_ok();

    if !drained {
        stop.cancel();
        pool.abort_all();
        errors.push("fallback queues did not drain within timeout".to_string());
    }

    IngestOutcome {
        markers: sink.take(),
        errors,
        completed,
        geocode_tasks,
        keyword_tasks,
    }
}

/// Address-geocode fallback worker: resolves stream rows that carried
/// an address but no coordinates.
async fn geocode_worker(
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<GeocodeTask>>>,
    resolver: Arc<CoordinateResolver>,
    sink: Arc<MarkerSink>,
    pacing: Duration,
    cancel: CancelToken,
    stop: CancelToken,
) {
    loop {
        if cancel.is_cancelled() || stop.is_cancelled() {
            break;
        }
        let task = { rx.lock().await.recv().await };
        let Some(task) = task else { break };

        let resolution = resolver.resolve(&task.title, &task.address, None).await;
        if let Some(coord) = resolution.coordinate() {
            sink.push(StreamMarkerPoint {
                lat: coord.lat,
                lng: coord.lng,
                title: task.title,
                url: None,
            });
        }
        if resolution.used_network() {
            tokio::time::sleep(pacing).await;
        }
    }
}

/// Keyword fallback worker: last-resort place search for URLs that
/// yielded neither markers nor geocode tasks.
async fn keyword_worker(
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<KeywordTask>>>,
    resolver: Arc<CoordinateResolver>,
    sink: Arc<MarkerSink>,
    pacing: Duration,
    cancel: CancelToken,
    stop: CancelToken,
) {
    loop {
        if cancel.is_cancelled() || stop.is_cancelled() {
            break;
        }
        let task = { rx.lock().await.recv().await };
        let Some(task) = task else { break };

        // An empty address routes the chain straight to keyword search.
        let resolution = resolver.resolve(&task.query, "", None).await;
        if let Some(coord) = resolution.coordinate() {
            sink.push(StreamMarkerPoint {
                lat: coord.lat,
                lng: coord.lng,
                title: task.query,
                url: Some(task.url),
            });
        }
        if resolution.used_network() {
            tokio::time::sleep(pacing).await;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use care_map_cache::GeocodeCache;
    use care_map_geocoder::{AddressGeocoder, GeocodeError, GeocodedPoint, PlaceSearcher};

    use super::*;

    struct CountingGeocoder {
        calls: AtomicUsize,
        answer: Option<GeocodedPoint>,
    }

    #[async_trait]
    impl AddressGeocoder for CountingGeocoder {
        async fn geocode_address(
            &self,
            _address: &str,
        ) -> Result<Option<GeocodedPoint>, GeocodeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.answer.clone())
        }
    }

    struct CountingSearcher {
        calls: AtomicUsize,
        answer: Option<GeocodedPoint>,
    }

    #[async_trait]
    impl PlaceSearcher for CountingSearcher {
        async fn search_place(
            &self,
            _query: &str,
        ) -> Result<Option<GeocodedPoint>, GeocodeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.answer.clone())
        }
    }

    fn resolver(
        geocoder: Arc<CountingGeocoder>,
        searcher: Arc<CountingSearcher>,
    ) -> Arc<CoordinateResolver> {
        let cache = Arc::new(GeocodeCache::empty(Path::new(
            "/tmp/care-map-ingest-unused.json",
        )));
        Arc::new(
            CoordinateResolver::new(cache, geocoder, searcher)
                .with_retry_pause(Duration::ZERO),
        )
    }

    fn fast_config() -> IngestConfig {
        IngestConfig {
            concurrency: 3,
            pacing: Duration::ZERO,
            drain_timeout: Duration::from_secs(5),
        }
    }

    fn chunks<S: AsRef<str>>(frames: &[S]) -> Vec<Result<Vec<u8>, String>> {
        frames
            .iter()
            .map(|f| Ok(f.as_ref().as_bytes().to_vec()))
            .collect()
    }

    /// The canonical three-result scenario: one success with two
    /// coordinate rows, one success with a single address-only row,
    /// one failed URL, then `done`.
    fn scripted_stream() -> Vec<Result<Vec<u8>, String>> {
        let coord_payload = serde_json::json!({
            "url": "https://coords.example/feed",
            "ok": true,
            "json": [
                {"name": "A센터", "lat": 37.51, "lng": 127.01},
                {"name": "B센터", "lat": 37.52, "lng": 127.02}
            ]
        });
        let address_payload = serde_json::json!({
            "url": "https://address.example/feed",
            "ok": true,
            "json": [{"name": "C센터", "주소": "서울 강서구 3"}]
        });
        let failed_payload = serde_json::json!({
            "url": "https://broken.example/feed",
            "ok": false,
            "title": "깨진 피드"
        });

        chunks(&[
            format!("event: result\ndata: {coord_payload}\n\n"),
            format!("event: result\ndata: {address_payload}\n\n"),
            format!("event: result\ndata: {failed_payload}\n\nevent: done\n\n"),
        ])
    }

    #[tokio::test]
    async fn escalates_each_result_to_the_right_queue() {
        let geocoder = Arc::new(CountingGeocoder {
            calls: AtomicUsize::new(0),
            answer: None,
        });
        let searcher = Arc::new(CountingSearcher {
            calls: AtomicUsize::new(0),
            answer: None,
        });
        let r = resolver(Arc::clone(&geocoder), Arc::clone(&searcher));

        let outcome = tokio::time::timeout(
            Duration::from_secs(10),
            run_stream(
                futures::stream::iter(scripted_stream()),
                r,
                &fast_config(),
                &CancelToken::new(),
            ),
        )
        .await
        .expect("ingestion must finish within a bounded timeout");

        assert!(outcome.completed);
        // Exactly the two coordinate rows became direct markers (the
        // fallback mocks answered nothing).
        assert_eq!(outcome.markers.len(), 2);
        assert_eq!(outcome.geocode_tasks, 1);
        assert_eq!(outcome.keyword_tasks, 1);
        assert!(outcome.errors.is_empty());
    }

    #[tokio::test]
    async fn fallback_queues_contribute_markers_when_services_answer() {
        let geocoder = Arc::new(CountingGeocoder {
            calls: AtomicUsize::new(0),
            answer: Some(GeocodedPoint {
                lat: 37.53,
                lng: 127.03,
                label: None,
            }),
        });
        let searcher = Arc::new(CountingSearcher {
            calls: AtomicUsize::new(0),
            answer: Some(GeocodedPoint {
                lat: 37.54,
                lng: 127.04,
                label: None,
            }),
        });
        let r = resolver(Arc::clone(&geocoder), Arc::clone(&searcher));

        let outcome = run_stream(
            futures::stream::iter(scripted_stream()),
            r,
            &fast_config(),
            &CancelToken::new(),
        )
        .await;

        // 2 direct + 1 geocoded address row + 1 keyword hit.
        assert_eq!(outcome.markers.len(), 4);
        assert!(geocoder.calls.load(Ordering::SeqCst) >= 1);
        assert!(searcher.calls.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn truncated_stream_is_reported_but_markers_survive() {
        let coord_payload = serde_json::json!({
            "url": "https://coords.example/feed",
            "ok": true,
            "json": [{"name": "A센터", "lat": 37.51, "lng": 127.01}]
        });
        let stream = chunks(&[format!("event: result\ndata: {coord_payload}\n\n")]);

        let geocoder = Arc::new(CountingGeocoder {
            calls: AtomicUsize::new(0),
            answer: None,
        });
        let searcher = Arc::new(CountingSearcher {
            calls: AtomicUsize::new(0),
            answer: None,
        });
        let outcome = run_stream(
            futures::stream::iter(stream),
            resolver(geocoder, searcher),
            &fast_config(),
            &CancelToken::new(),
        )
        .await;

        assert!(!outcome.completed);
        assert_eq!(outcome.markers.len(), 1);
        assert!(
            outcome
                .errors
                .iter()
                .any(|e| e.contains("without done frame"))
        );
    }

    #[tokio::test]
    async fn error_frames_surface_while_earlier_markers_remain() {
        let coord_payload = serde_json::json!({
            "url": "https://coords.example/feed",
            "ok": true,
            "json": [{"name": "A센터", "lat": 37.51, "lng": 127.01}]
        });
        let stream = chunks(&[
            format!("event: result\ndata: {coord_payload}\n\n"),
            "event: error\ndata: {\"error\":\"upstream exploded\"}\n\nevent: done\n\n".to_string(),
        ]);

        let geocoder = Arc::new(CountingGeocoder {
            calls: AtomicUsize::new(0),
            answer: None,
        });
        let searcher = Arc::new(CountingSearcher {
            calls: AtomicUsize::new(0),
            answer: None,
        });
        let outcome = run_stream(
            futures::stream::iter(stream),
            resolver(geocoder, searcher),
            &fast_config(),
            &CancelToken::new(),
        )
        .await;

        assert!(outcome.completed);
        assert_eq!(outcome.markers.len(), 1);
        assert_eq!(outcome.errors, vec!["upstream exploded".to_string()]);
    }

    #[tokio::test]
    async fn transport_error_degrades_to_a_message() {
        let coord_payload = serde_json::json!({
            "url": "https://coords.example/feed",
            "ok": true,
            "json": [{"name": "A센터", "lat": 37.51, "lng": 127.01}]
        });
        let stream: Vec<Result<Vec<u8>, String>> = vec![
            Ok(format!("event: result\ndata: {coord_payload}\n\n").into_bytes()),
            Err("connection reset".to_string()),
        ];

        let geocoder = Arc::new(CountingGeocoder {
            calls: AtomicUsize::new(0),
            answer: None,
        });
        let searcher = Arc::new(CountingSearcher {
            calls: AtomicUsize::new(0),
            answer: None,
        });
        let outcome = run_stream(
            futures::stream::iter(stream),
            resolver(geocoder, searcher),
            &fast_config(),
            &CancelToken::new(),
        )
        .await;

        assert!(!outcome.completed);
        assert_eq!(outcome.markers.len(), 1);
        assert!(outcome.errors.iter().any(|e| e.contains("connection reset")));
    }

    #[tokio::test]
    async fn duplicate_stream_points_are_deduplicated() {
        let payload = serde_json::json!({
            "url": "https://dup.example/feed",
            "ok": true,
            "json": [
                {"name": "같은곳", "lat": 37.510_001, "lng": 127.010_001},
                {"name": "같은곳", "lat": 37.510_002, "lng": 127.010_003}
            ]
        });
        let stream = chunks(&[format!("event: result\ndata: {payload}\n\nevent: done\n\n")]);

        let geocoder = Arc::new(CountingGeocoder {
            calls: AtomicUsize::new(0),
            answer: None,
        });
        let searcher = Arc::new(CountingSearcher {
            calls: AtomicUsize::new(0),
            answer: None,
        });
        let outcome = run_stream(
            futures::stream::iter(stream),
            resolver(geocoder, searcher),
            &fast_config(),
            &CancelToken::new(),
        )
        .await;

        assert_eq!(outcome.markers.len(), 1);
    }
}
