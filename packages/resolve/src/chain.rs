//! The per-entity coordinate fallback chain.
//!
//! State machine with terminal states Resolved / Unresolved:
//!
//! ```text
//! HasCoordinates ──────────────────────────────▶ AlreadyResolved
//! NoCoordinates ─▶ CacheLookup ──hit───────────▶ CacheHit
//!                    │ miss
//!                    ▼
//!                  AddressGeocode ──success────▶ Geocoded (cache write)
//!                    │ fail → pause, retry once
//!                    ▼
//!                  KeywordSearch "{name} {address}"
//!                    │ fail → retry with name alone
//!                    ├─ success ───────────────▶ Geocoded (cache write)
//!                    ▼
//!                  Unresolved (enters the miss ledger)
//! ```
//!
//! The miss ledger is in-memory only: an unresolvable address is not
//! retried forever within a session, but gets one more chance next
//! session. Service errors degrade to misses — the chain itself never
//! fails.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use care_map_cache::GeocodeCache;
use care_map_center_models::{Coordinate, identity_key};
use care_map_geocoder::{AddressGeocoder, GeocodedPoint, PlaceSearcher};

/// Pause before the single retry of a failed address geocode.
const DEFAULT_RETRY_PAUSE: Duration = Duration::from_millis(300);

/// Outcome of one trip through the fallback chain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resolution {
    /// The entity already had coordinates; nothing was done.
    AlreadyResolved,
    /// The cache answered; no network call was made.
    CacheHit(Coordinate),
    /// A geocoding service answered; written through to the cache.
    Geocoded(Coordinate),
    /// Every strategy missed; the key entered the miss ledger.
    Unresolved,
    /// The miss ledger short-circuited the chain; no network call.
    KnownMiss,
}

impl Resolution {
    /// The resolved coordinate, if any.
    #[must_use]
    pub const fn coordinate(&self) -> Option<Coordinate> {
        match self {
            Self::CacheHit(c) | Self::Geocoded(c) => Some(*c),
            _ => None,
        }
    }

    /// `true` when this outcome involved at least one network call and
    /// the caller should pace before its next task.
    #[must_use]
    pub const fn used_network(&self) -> bool {
        matches!(self, Self::Geocoded(_) | Self::Unresolved)
    }
}

/// Runs the fallback chain for one entity at a time.
///
/// Shared between the background scheduler and the streaming-ingestion
/// fallback queues; the cache and the miss ledger are the only state.
pub struct CoordinateResolver {
    cache: Arc<GeocodeCache>,
    geocoder: Arc<dyn AddressGeocoder>,
    searcher: Arc<dyn PlaceSearcher>,
    misses: Mutex<HashSet<String>>,
    retry_pause: Duration,
}

impl CoordinateResolver {
    /// Creates a resolver over the given cache and service clients.
    #[must_use]
    pub fn new(
        cache: Arc<GeocodeCache>,
        geocoder: Arc<dyn AddressGeocoder>,
        searcher: Arc<dyn PlaceSearcher>,
    ) -> Self {
        Self {
            cache,
            geocoder,
            searcher,
            misses: Mutex::new(HashSet::new()),
            retry_pause: DEFAULT_RETRY_PAUSE,
        }
    }

    /// Overrides the retry pause (tests use [`Duration::ZERO`]).
    #[must_use]
    pub const fn with_retry_pause(mut self, pause: Duration) -> Self {
        self.retry_pause = pause;
        self
    }

    /// Resolves one entity. `current` short-circuits the whole chain —
    /// already-resolved entities cost zero network calls.
    pub async fn resolve(
        &self,
        name: &str,
        address: &str,
        current: Option<Coordinate>,
    ) -> Resolution {
        if current.is_some() {
            return Resolution::AlreadyResolved;
        }

        let key = identity_key(name, address);

        if self.lock_misses().contains(&key) {
            return Resolution::KnownMiss;
        }

        if let Some(coord) = self.cache.get(name, address) {
            return Resolution::CacheHit(coord);
        }

        if let Some(coord) = self.address_geocode(address).await {
            self.cache.insert(name, address, coord);
            return Resolution::Geocoded(coord);
        }

        if let Some(coord) = self.keyword_search(name, address).await {
            self.cache.insert(name, address, coord);
            return Resolution::Geocoded(coord);
        }

        self.lock_misses().insert(key);
        Resolution::Unresolved
    }

    /// Structured address lookup, one retry after a short pause.
    async fn address_geocode(&self, address: &str) -> Option<Coordinate> {
        if address.trim().is_empty() {
            return None;
        }

        for attempt in 0..2 {
            if attempt > 0 {
                tokio::time::sleep(self.retry_pause).await;
            }
            match self.geocoder.geocode_address(address).await {
                Ok(Some(point)) => {
                    if let Some(coord) = valid_coordinate(&point) {
                        return Some(coord);
                    }
                    log::debug!("Address geocode returned invalid point for '{address}'");
                }
                Ok(None) => log::debug!("Address geocode miss for '{address}'"),
                Err(e) => log::debug!("Address geocode error for '{address}': {e}"),
            }
        }
        None
    }

    /// Keyword search: `"{name} {address}"` first, then the name alone.
    async fn keyword_search(&self, name: &str, address: &str) -> Option<Coordinate> {
        let combined = if address.trim().is_empty() {
            name.to_string()
        } else {
            format!("{name} {address}")
        };

        let mut queries = vec![combined];
        if queries[0] != name && !name.trim().is_empty() {
            queries.push(name.to_string());
        }

        for query in queries {
            match self.searcher.search_place(&query).await {
                Ok(Some(point)) => {
                    if let Some(coord) = valid_coordinate(&point) {
                        return Some(coord);
                    }
                    log::debug!("Keyword search returned invalid point for '{query}'");
                }
                Ok(None) => log::debug!("Keyword search miss for '{query}'"),
                Err(e) => log::debug!("Keyword search error for '{query}': {e}"),
            }
        }
        None
    }

    fn lock_misses(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.misses
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Range-checks a service result before trusting it.
fn valid_coordinate(point: &GeocodedPoint) -> Option<Coordinate> {
    Coordinate::is_valid(point.lat, point.lng).then_some(Coordinate {
        lat: point.lat,
        lng: point.lng,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use care_map_geocoder::GeocodeError;

    use super::*;

    /// Scripted address geocoder: pops one response per call.
    struct ScriptedGeocoder {
        responses: Mutex<VecDeque<Option<GeocodedPoint>>>,
        calls: AtomicUsize,
    }

    impl ScriptedGeocoder {
        fn new(responses: Vec<Option<GeocodedPoint>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AddressGeocoder for ScriptedGeocoder {
        async fn geocode_address(
            &self,
            _address: &str,
        ) -> Result<Option<GeocodedPoint>, GeocodeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.responses.lock().unwrap().pop_front().flatten())
        }
    }

    /// Scripted place searcher that records its queries.
    struct ScriptedSearcher {
        responses: Mutex<VecDeque<Option<GeocodedPoint>>>,
        queries: Mutex<Vec<String>>,
    }

    impl ScriptedSearcher {
        fn new(responses: Vec<Option<GeocodedPoint>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                queries: Mutex::new(Vec::new()),
            }
        }

        fn queries(&self) -> Vec<String> {
            self.queries.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PlaceSearcher for ScriptedSearcher {
        async fn search_place(
            &self,
            query: &str,
        ) -> Result<Option<GeocodedPoint>, GeocodeError> {
            self.queries.lock().unwrap().push(query.to_string());
            Ok(self.responses.lock().unwrap().pop_front().flatten())
        }
    }

    fn point(lat: f64, lng: f64) -> GeocodedPoint {
        GeocodedPoint {
            lat,
            lng,
            label: None,
        }
    }

    fn cache() -> Arc<GeocodeCache> {
        Arc::new(GeocodeCache::empty(Path::new("/tmp/care-map-unused.json")))
    }

    fn resolver(
        geocoder: Arc<ScriptedGeocoder>,
        searcher: Arc<ScriptedSearcher>,
        cache: Arc<GeocodeCache>,
    ) -> CoordinateResolver {
        CoordinateResolver::new(cache, geocoder, searcher).with_retry_pause(Duration::ZERO)
    }

    #[tokio::test]
    async fn already_resolved_entity_makes_zero_network_calls() {
        let geocoder = Arc::new(ScriptedGeocoder::new(vec![]));
        let searcher = Arc::new(ScriptedSearcher::new(vec![]));
        let r = resolver(Arc::clone(&geocoder), Arc::clone(&searcher), cache());

        let out = r
            .resolve(
                "센터",
                "주소",
                Some(Coordinate {
                    lat: 37.5,
                    lng: 127.0,
                }),
            )
            .await;

        assert_eq!(out, Resolution::AlreadyResolved);
        assert_eq!(geocoder.calls(), 0);
        assert!(searcher.queries().is_empty());
    }

    #[tokio::test]
    async fn cache_hit_makes_zero_network_calls() {
        let shared = cache();
        shared.insert(
            "센터",
            "주소",
            Coordinate {
                lat: 35.0,
                lng: 128.0,
            },
        );
        let geocoder = Arc::new(ScriptedGeocoder::new(vec![]));
        let searcher = Arc::new(ScriptedSearcher::new(vec![]));
        let r = resolver(Arc::clone(&geocoder), Arc::clone(&searcher), shared);

        let out = r.resolve("센터", "주소", None).await;
        assert!(matches!(out, Resolution::CacheHit(_)));
        assert_eq!(geocoder.calls(), 0);
    }

    #[tokio::test]
    async fn successful_geocode_writes_through_to_cache() {
        let shared = cache();
        let geocoder = Arc::new(ScriptedGeocoder::new(vec![Some(point(37.5, 127.0))]));
        let searcher = Arc::new(ScriptedSearcher::new(vec![]));
        let r = resolver(Arc::clone(&geocoder), searcher, Arc::clone(&shared));

        let out = r.resolve("새 센터", "서울 중구 1", None).await;
        assert!(matches!(out, Resolution::Geocoded(_)));
        assert!(shared.get("새 센터", "서울 중구 1").is_some());
    }

    #[tokio::test]
    async fn retries_address_geocode_once_on_transient_miss() {
        let geocoder = Arc::new(ScriptedGeocoder::new(vec![None, Some(point(36.0, 127.5))]));
        let searcher = Arc::new(ScriptedSearcher::new(vec![]));
        let r = resolver(Arc::clone(&geocoder), Arc::clone(&searcher), cache());

        let out = r.resolve("재시도 센터", "대전 2", None).await;
        assert!(matches!(out, Resolution::Geocoded(_)));
        assert_eq!(geocoder.calls(), 2);
        assert!(searcher.queries().is_empty());
    }

    #[tokio::test]
    async fn falls_back_to_keyword_search_with_name_then_alone() {
        let geocoder = Arc::new(ScriptedGeocoder::new(vec![None, None]));
        let searcher = Arc::new(ScriptedSearcher::new(vec![None, Some(point(35.1, 129.0))]));
        let r = resolver(geocoder, Arc::clone(&searcher), cache());

        let out = r.resolve("바다상담센터", "부산 해운대 3", None).await;
        assert!(matches!(out, Resolution::Geocoded(_)));
        assert_eq!(
            searcher.queries(),
            vec![
                "바다상담센터 부산 해운대 3".to_string(),
                "바다상담센터".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn exhaustion_enters_the_miss_ledger() {
        let geocoder = Arc::new(ScriptedGeocoder::new(vec![None, None, None, None]));
        let searcher = Arc::new(ScriptedSearcher::new(vec![None, None, None, None]));
        let r = resolver(Arc::clone(&geocoder), Arc::clone(&searcher), cache());

        let first = r.resolve("미지 센터", "없는 주소 4", None).await;
        assert_eq!(first, Resolution::Unresolved);
        let calls_after_first = geocoder.calls();

        // Second attempt in the same session short-circuits.
        let second = r.resolve("미지 센터", "없는 주소 4", None).await;
        assert_eq!(second, Resolution::KnownMiss);
        assert_eq!(geocoder.calls(), calls_after_first);
    }

    #[tokio::test]
    async fn out_of_range_service_results_are_rejected() {
        let geocoder = Arc::new(ScriptedGeocoder::new(vec![
            Some(point(999.0, 127.0)),
            Some(point(999.0, 127.0)),
        ]));
        let searcher = Arc::new(ScriptedSearcher::new(vec![None, None]));
        let r = resolver(geocoder, searcher, cache());

        let out = r.resolve("이상값 센터", "주소 5", None).await;
        assert_eq!(out, Resolution::Unresolved);
    }
}
