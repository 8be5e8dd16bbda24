// Request orchestration: validate, key, consult the cache, call the provider
// on a miss, then filter and sort into the response envelope

use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::{
    cache::CacheStore,
    cache_key::build_key,
    config::SearchConfig,
    currency::convert_offers,
    error::SearchError,
    filter::filter_offers,
    model::{FlushConfirmation, NormalizedFlightOffer, ProviderKind, SearchRequest, SearchResponse},
    providers::FlightProvider,
};

pub type CachedOffers = Vec<NormalizedFlightOffer>;

type FetchResult = Result<CachedOffers, SearchError>;
type SharedFetch = Shared<BoxFuture<'static, FetchResult>>;

// Lifecycle of one search, reported through `tracing`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchState {
    Received,
    KeyBuilt,
    CacheHit,
    CacheMiss,
    ProviderCalled,
    Normalized,
    CacheWritten,
    Filtered,
    Responded,
    Failed,
}

impl fmt::Display for SearchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

struct Inner {
    cache: Arc<dyn CacheStore<CachedOffers>>,
    providers: HashMap<ProviderKind, Arc<dyn FlightProvider>>,
    config: SearchConfig,
    // key -> (generation, pending upstream call)
    in_flight: Mutex<HashMap<String, (u64, SharedFetch)>>,
    generation: AtomicU64,
}

/// Entry point for flight searches.
///
/// Owns the injected cache and the registered provider adapters. Cloning is
/// cheap and every clone shares the same cache and in-flight table.
#[derive(Clone)]
pub struct SearchOrchestrator {
    inner: Arc<Inner>,
}

/// Collects the cache, config and provider adapters for a
/// [`SearchOrchestrator`]. Providers can only be registered here, before the
/// orchestrator exists and can be shared.
pub struct SearchOrchestratorBuilder {
    cache: Arc<dyn CacheStore<CachedOffers>>,
    config: SearchConfig,
    providers: HashMap<ProviderKind, Arc<dyn FlightProvider>>,
}

impl SearchOrchestratorBuilder {
    // A later provider of the same kind replaces the earlier one
    pub fn provider(mut self, provider: Arc<dyn FlightProvider>) -> Self {
        self.providers.insert(provider.kind(), provider);
        self
    }

    pub fn build(self) -> SearchOrchestrator {
        SearchOrchestrator {
            inner: Arc::new(Inner {
                cache: self.cache,
                providers: self.providers,
                config: self.config,
                in_flight: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
            }),
        }
    }
}

impl SearchOrchestrator {
    pub fn builder(
        cache: Arc<dyn CacheStore<CachedOffers>>,
        config: SearchConfig,
    ) -> SearchOrchestratorBuilder {
        SearchOrchestratorBuilder {
            cache,
            config,
            providers: HashMap::new(),
        }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.inner.config
    }

    pub async fn search(
        &self,
        provider: ProviderKind,
        request: SearchRequest,
    ) -> Result<SearchResponse, SearchError> {
        debug!(%provider, state = %SearchState::Received);

        let result = self.run(provider, request).await;
        match &result {
            Ok(response) => debug!(
                %provider,
                state = %SearchState::Responded,
                from_cache = response.from_cache,
                offers = response.data.len()
            ),
            Err(err) => warn!(%provider, state = %SearchState::Failed, error = %err),
        }
        result
    }

    async fn run(
        &self,
        provider: ProviderKind,
        request: SearchRequest,
    ) -> Result<SearchResponse, SearchError> {
        let request = request.normalized()?;
        let adapter = self
            .inner
            .providers
            .get(&provider)
            .cloned()
            .ok_or_else(|| SearchError::validation(format!("no {provider} provider configured")))?;

        let currency = self.inner.config.currency.clone();
        let key = build_key(provider, &request, &currency);
        debug!(%provider, %key, state = %SearchState::KeyBuilt);

        let (offers, from_cache, upstream_count) = match self.inner.cached(&key) {
            Some(offers) => {
                info!(%provider, %key, offers = offers.len(), state = %SearchState::CacheHit);
                (offers, true, None)
            }
            None => {
                info!(%provider, %key, state = %SearchState::CacheMiss);
                let offers = self.fetch(adapter, key, request.clone()).await?;
                let count = offers.len();
                (offers, false, Some(count))
            }
        };

        let data = filter_offers(offers, &request.filters);
        debug!(%provider, offers = data.len(), state = %SearchState::Filtered);

        Ok(SearchResponse {
            data,
            from_cache,
            flight_data_length: upstream_count,
            round_trip: request.round_trip,
            currency,
        })
    }

    async fn fetch(
        &self,
        adapter: Arc<dyn FlightProvider>,
        key: String,
        request: SearchRequest,
    ) -> FetchResult {
        if !self.inner.config.coalesce_requests {
            return self.inner.clone().fetch_and_store(adapter, key, request).await;
        }

        let (generation, pending) = {
            let mut in_flight = self.inner.in_flight.lock();
            match in_flight.get(&key) {
                Some((generation, pending)) => {
                    debug!(%key, "joining in-flight upstream call");
                    (*generation, pending.clone())
                }
                None => {
                    let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
                    let pending = self
                        .inner
                        .clone()
                        .fetch_and_store(adapter, key.clone(), request)
                        .boxed()
                        .shared();
                    in_flight.insert(key.clone(), (generation, pending.clone()));
                    (generation, pending)
                }
            }
        };

        let result = pending.await;

        let mut in_flight = self.inner.in_flight.lock();
        if matches!(in_flight.get(&key), Some((g, _)) if *g == generation) {
            in_flight.remove(&key);
        }

        result
    }

    /// Drops every cached search result.
    pub fn flush_cache(&self) -> Result<FlushConfirmation, SearchError> {
        let flushed = self.inner.cache.flush_all()?;
        info!(flushed, "cache flushed");
        Ok(FlushConfirmation {
            message: "Cache flushed successfully".to_string(),
            flushed,
        })
    }
}

impl Inner {
    // Store failures count as a miss
    fn cached(&self, key: &str) -> Option<CachedOffers> {
        match self.cache.get(key) {
            Ok(hit) => hit,
            Err(err) => {
                warn!(%key, error = %err, "cache lookup failed, calling provider directly");
                None
            }
        }
    }

    async fn fetch_and_store(
        self: Arc<Self>,
        adapter: Arc<dyn FlightProvider>,
        key: String,
        request: SearchRequest,
    ) -> FetchResult {
        let provider = adapter.kind();
        let timeout = self.config.provider_timeout;
        debug!(%provider, %key, state = %SearchState::ProviderCalled);

        let call = async {
            match request.continuation_token.as_deref() {
                Some(token) => adapter.search_return(&request, token).await,
                None => adapter.search(&request).await,
            }
        };

        let offers = match tokio::time::timeout(timeout, call).await {
            Ok(result) => result?,
            Err(_) => return Err(timeout_error(provider, timeout)),
        };

        let offers = convert_offers(
            provider,
            offers,
            &self.config.currency,
            &self.config.exchange_rates,
        )?;
        debug!(%provider, offers = offers.len(), state = %SearchState::Normalized);

        match self
            .cache
            .set(&key, offers.clone(), Some(self.config.cache_ttl))
        {
            Ok(()) => debug!(%provider, %key, state = %SearchState::CacheWritten),
            Err(err) => warn!(%key, error = %err, "cache write failed, serving uncached result"),
        }

        Ok(offers)
    }
}

fn timeout_error(provider: ProviderKind, after: Duration) -> SearchError {
    SearchError::Timeout {
        provider,
        after_ms: u64::try_from(after.as_millis()).unwrap_or(u64::MAX),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cache::TtlCache,
        error::CacheError,
        model::{Direction, SearchFilters},
        providers::mock_provider::MockProvider,
    };
    use tokio_test::{assert_err, assert_ok};

    fn offer(kind: ProviderKind, price: f64, carriers: &[&str]) -> NormalizedFlightOffer {
        MockProvider::offer(kind, price, Direction::Outbound, "JFK", "LHR", carriers)
    }

    fn setup(
        provider: Arc<MockProvider>,
        config: SearchConfig,
    ) -> (SearchOrchestrator, Arc<TtlCache<CachedOffers>>) {
        let cache = Arc::new(TtlCache::default());
        let orchestrator = SearchOrchestrator::builder(cache.clone(), config)
            .provider(provider)
            .build();
        (orchestrator, cache)
    }

    struct UnavailableCache;

    impl CacheStore<CachedOffers> for UnavailableCache {
        fn get(&self, _key: &str) -> Result<Option<CachedOffers>, CacheError> {
            Err(CacheError::Unavailable("connection refused".to_string()))
        }

        fn set(
            &self,
            _key: &str,
            _value: CachedOffers,
            _ttl: Option<Duration>,
        ) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("connection refused".to_string()))
        }

        fn flush_all(&self) -> Result<usize, CacheError> {
            Err(CacheError::Unavailable("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let provider = Arc::new(MockProvider::with_offers(
            ProviderKind::Structured,
            vec![
                offer(ProviderKind::Structured, 700.0, &["BA"]),
                offer(ProviderKind::Structured, 450.0, &["AA"]),
            ],
        ));
        let (orchestrator, cache) = setup(provider.clone(), SearchConfig::default());
        let request = SearchRequest::one_way("JFK", "LHR", "2025-06-01");

        let first = assert_ok!(
            orchestrator
                .search(ProviderKind::Structured, request.clone())
                .await
        );
        assert!(!first.from_cache);
        assert_eq!(first.flight_data_length, Some(2));
        assert_eq!(first.currency, "USD");
        assert!(!first.round_trip);
        assert_eq!(first.data[0].price.total, 450.0);
        assert_eq!(provider.search_calls(), 1);
        assert!(cache
            .get("structured:JFK:LHR:2025-06-01:-:ow:USD")
            .unwrap()
            .is_some());

        let second = assert_ok!(orchestrator.search(ProviderKind::Structured, request).await);
        assert!(second.from_cache);
        assert_eq!(second.flight_data_length, None);
        assert_eq!(second.data, first.data);
        assert_eq!(provider.search_calls(), 1);
    }

    #[tokio::test]
    async fn test_filters_apply_to_cached_results_too() {
        let provider = Arc::new(MockProvider::with_offers(
            ProviderKind::Structured,
            vec![
                offer(ProviderKind::Structured, 300.0, &["EI", "EI"]),
                offer(ProviderKind::Structured, 500.0, &["BA"]),
            ],
        ));
        let (orchestrator, _) = setup(provider.clone(), SearchConfig::default());

        let mut request = SearchRequest::one_way("JFK", "LHR", "2025-06-01");
        assert_ok!(
            orchestrator
                .search(ProviderKind::Structured, request.clone())
                .await
        );

        request.filters = SearchFilters {
            max_stops: Some(0),
            ..Default::default()
        };
        let filtered = assert_ok!(orchestrator.search(ProviderKind::Structured, request).await);

        assert!(filtered.from_cache);
        assert_eq!(filtered.data.len(), 1);
        assert_eq!(filtered.data[0].itineraries[0].segments.len(), 1);
        assert_eq!(provider.search_calls(), 1);
    }

    #[tokio::test]
    async fn test_upstream_error_is_not_cached() {
        let provider = Arc::new(MockProvider::new(ProviderKind::Structured));
        provider.fail_next_requests(1, "INVALID DATE");
        let (orchestrator, cache) = setup(provider.clone(), SearchConfig::default());
        let request = SearchRequest::one_way("JFK", "LHR", "2025-06-01");

        let err = assert_err!(
            orchestrator
                .search(ProviderKind::Structured, request.clone())
                .await
        );
        assert_eq!(
            err,
            SearchError::upstream(ProviderKind::Structured, "INVALID DATE")
        );
        assert!(cache.is_empty());

        // The next call goes upstream again
        let response = assert_ok!(orchestrator.search(ProviderKind::Structured, request).await);
        assert!(!response.from_cache);
        assert_eq!(provider.search_calls(), 2);
    }

    #[tokio::test]
    async fn test_validation_fails_before_provider_call() {
        let provider = Arc::new(MockProvider::new(ProviderKind::Structured));
        let (orchestrator, _) = setup(provider.clone(), SearchConfig::default());

        let err = assert_err!(
            orchestrator
                .search(
                    ProviderKind::Structured,
                    SearchRequest::one_way("JFK", "", "2025-06-01")
                )
                .await
        );
        assert!(matches!(err, SearchError::Validation(_)));
        assert_eq!(provider.search_calls(), 0);
    }

    #[tokio::test]
    async fn test_unregistered_provider() {
        let provider = Arc::new(MockProvider::new(ProviderKind::Structured));
        let (orchestrator, _) = setup(provider, SearchConfig::default());

        let err = assert_err!(
            orchestrator
                .search(
                    ProviderKind::Scraped,
                    SearchRequest::one_way("JFK", "LHR", "2025-06-01")
                )
                .await
        );
        assert!(matches!(err, SearchError::Validation(_)));
    }

    #[tokio::test]
    async fn test_builder_registers_every_provider_kind() {
        let structured = Arc::new(MockProvider::with_offers(
            ProviderKind::Structured,
            vec![offer(ProviderKind::Structured, 300.0, &["BA"])],
        ));
        let stale_scraped = Arc::new(MockProvider::with_offers(
            ProviderKind::Scraped,
            vec![offer(ProviderKind::Scraped, 999.0, &["VS"])],
        ));
        let scraped = Arc::new(MockProvider::with_offers(
            ProviderKind::Scraped,
            vec![offer(ProviderKind::Scraped, 250.0, &["AA"])],
        ));

        let orchestrator = SearchOrchestrator::builder(
            Arc::new(TtlCache::default()),
            SearchConfig::default(),
        )
        .provider(structured.clone())
        .provider(stale_scraped.clone())
        .provider(scraped.clone())
        .build();
        let request = SearchRequest::one_way("JFK", "LHR", "2025-06-01");

        let from_structured = assert_ok!(
            orchestrator
                .search(ProviderKind::Structured, request.clone())
                .await
        );
        let from_scraped = assert_ok!(orchestrator.search(ProviderKind::Scraped, request).await);

        assert_eq!(from_structured.data[0].price.total, 300.0);
        assert_eq!(from_scraped.data[0].price.total, 250.0);
        assert_eq!(structured.search_calls(), 1);
        assert_eq!(scraped.search_calls(), 1);
        assert_eq!(stale_scraped.search_calls(), 0);
    }

    #[test]
    fn test_timeout_error_saturates_instead_of_truncating() {
        assert_eq!(
            timeout_error(ProviderKind::Structured, Duration::from_millis(1500)),
            SearchError::Timeout {
                provider: ProviderKind::Structured,
                after_ms: 1500
            }
        );
        assert_eq!(
            timeout_error(ProviderKind::Scraped, Duration::MAX),
            SearchError::Timeout {
                provider: ProviderKind::Scraped,
                after_ms: u64::MAX
            }
        );
    }

    #[tokio::test]
    async fn test_two_phase_round_trip() {
        let mut outbound_a = offer(ProviderKind::Scraped, 540.0, &["AA"]);
        outbound_a.continuation_token = Some("tok-aa".to_string());
        let mut outbound_b = offer(ProviderKind::Scraped, 430.0, &["EI", "EI"]);
        outbound_b.continuation_token = Some("tok-ei".to_string());

        let provider = Arc::new(MockProvider::with_offers(
            ProviderKind::Scraped,
            vec![outbound_a, outbound_b],
        ));
        provider.add_return_offers(
            "tok-aa",
            vec![MockProvider::offer(
                ProviderKind::Scraped,
                980.0,
                Direction::Inbound,
                "LHR",
                "JFK",
                &["AA"],
            )],
        );
        provider.add_return_offers(
            "tok-ei",
            vec![MockProvider::offer(
                ProviderKind::Scraped,
                760.0,
                Direction::Inbound,
                "LHR",
                "JFK",
                &["EI"],
            )],
        );
        let (orchestrator, cache) = setup(provider.clone(), SearchConfig::default());

        let request = SearchRequest::round_trip("JFK", "LHR", "2025-06-01", "2025-06-08");
        let phase_one = assert_ok!(
            orchestrator
                .search(ProviderKind::Scraped, request.clone())
                .await
        );
        assert!(phase_one.round_trip);
        assert_eq!(phase_one.data.len(), 2);
        assert!(phase_one.data.iter().all(|o| o.continuation_token.is_some()));

        let chosen = phase_one.data[0].continuation_token.clone().unwrap();
        assert_eq!(chosen, "tok-ei");

        let mut phase_two_request = request.clone();
        phase_two_request.continuation_token = Some(chosen);
        let phase_two = assert_ok!(
            orchestrator
                .search(ProviderKind::Scraped, phase_two_request.clone())
                .await
        );
        assert_eq!(phase_two.data.len(), 1);
        assert_eq!(phase_two.data[0].itineraries[0].direction, Direction::Inbound);
        assert_eq!(phase_two.data[0].itineraries[0].segments[0].carrier_code, "EI");
        assert_eq!(provider.return_calls(), 1);

        assert!(cache
            .get("scraped:JFK:LHR:2025-06-01:2025-06-08:rt:USD:token=tok-ei")
            .unwrap()
            .is_some());

        let again = assert_ok!(
            orchestrator
                .search(ProviderKind::Scraped, phase_two_request)
                .await
        );
        assert!(again.from_cache);
        assert_eq!(provider.return_calls(), 1);
        assert_eq!(provider.search_calls(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_cache_degrades_to_provider_call() {
        let provider = Arc::new(MockProvider::with_offers(
            ProviderKind::Structured,
            vec![offer(ProviderKind::Structured, 200.0, &["BA"])],
        ));
        let orchestrator = SearchOrchestrator::builder(Arc::new(UnavailableCache), SearchConfig::default())
            .provider(provider.clone())
            .build();
        let request = SearchRequest::one_way("JFK", "LHR", "2025-06-01");

        for _ in 0..2 {
            let response = assert_ok!(
                orchestrator
                    .search(ProviderKind::Structured, request.clone())
                    .await
            );
            assert!(!response.from_cache);
            assert_eq!(response.data.len(), 1);
        }
        assert_eq!(provider.search_calls(), 2);

        assert!(matches!(
            orchestrator.flush_cache(),
            Err(SearchError::Cache(_))
        ));
    }

    #[tokio::test]
    async fn test_provider_timeout() {
        let provider = Arc::new(MockProvider::with_offers(
            ProviderKind::Scraped,
            vec![offer(ProviderKind::Scraped, 200.0, &["BA"])],
        ));
        provider.set_delay(500);
        let config = SearchConfig {
            provider_timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let (orchestrator, cache) = setup(provider, config);

        let err = assert_err!(
            orchestrator
                .search(
                    ProviderKind::Scraped,
                    SearchRequest::one_way("JFK", "LHR", "2025-06-01")
                )
                .await
        );
        assert_eq!(
            err,
            SearchError::Timeout {
                provider: ProviderKind::Scraped,
                after_ms: 50
            }
        );
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_prices_converted_before_caching() {
        let mut eur_offer = offer(ProviderKind::Structured, 100.0, &["AF"]);
        eur_offer.price.currency = "EUR".to_string();
        let provider = Arc::new(MockProvider::with_offers(
            ProviderKind::Structured,
            vec![eur_offer],
        ));
        let config = SearchConfig {
            exchange_rates: HashMap::from([("EUR".to_string(), 1.08)]),
            ..Default::default()
        };
        let (orchestrator, cache) = setup(provider, config);

        let response = assert_ok!(
            orchestrator
                .search(
                    ProviderKind::Structured,
                    SearchRequest::one_way("CDG", "JFK", "2025-06-01")
                )
                .await
        );
        assert_eq!(response.data[0].price.currency, "USD");
        assert_eq!(response.data[0].price.total, 108.0);

        let cached = cache
            .get("structured:CDG:JFK:2025-06-01:-:ow:USD")
            .unwrap()
            .unwrap();
        assert_eq!(cached[0].price.currency, "USD");
    }

    #[tokio::test]
    async fn test_concurrent_misses_coalesce() {
        let provider = Arc::new(MockProvider::with_offers(
            ProviderKind::Structured,
            vec![offer(ProviderKind::Structured, 200.0, &["BA"])],
        ));
        provider.set_delay(100);
        let (orchestrator, _) = setup(provider.clone(), SearchConfig::default());
        let request = SearchRequest::one_way("JFK", "LHR", "2025-06-01");

        let searches = (0..5).map(|_| {
            let orchestrator = orchestrator.clone();
            let request = request.clone();
            tokio::spawn(async move { orchestrator.search(ProviderKind::Structured, request).await })
        });
        let results = futures::future::join_all(searches).await;

        for result in results {
            let response = assert_ok!(result.unwrap());
            assert!(!response.from_cache);
            assert_eq!(response.data.len(), 1);
        }
        assert_eq!(provider.search_calls(), 1);
        assert!(orchestrator.inner.in_flight.lock().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_misses_without_coalescing_call_upstream_each() {
        let provider = Arc::new(MockProvider::with_offers(
            ProviderKind::Structured,
            vec![offer(ProviderKind::Structured, 200.0, &["BA"])],
        ));
        provider.set_delay(100);
        let config = SearchConfig {
            coalesce_requests: false,
            ..Default::default()
        };
        let (orchestrator, _) = setup(provider.clone(), config);
        let request = SearchRequest::one_way("JFK", "LHR", "2025-06-01");

        let searches = (0..3).map(|_| orchestrator.search(ProviderKind::Structured, request.clone()));
        for result in futures::future::join_all(searches).await {
            assert_ok!(result);
        }
        assert_eq!(provider.search_calls(), 3);
    }

    #[tokio::test]
    async fn test_flush_cache() {
        let provider = Arc::new(MockProvider::with_offers(
            ProviderKind::Structured,
            vec![offer(ProviderKind::Structured, 200.0, &["BA"])],
        ));
        let (orchestrator, _) = setup(provider.clone(), SearchConfig::default());
        let request = SearchRequest::one_way("JFK", "LHR", "2025-06-01");

        assert_ok!(
            orchestrator
                .search(ProviderKind::Structured, request.clone())
                .await
        );

        let confirmation = assert_ok!(orchestrator.flush_cache());
        assert_eq!(confirmation.flushed, 1);
        assert_eq!(assert_ok!(orchestrator.flush_cache()).flushed, 0);

        let response = assert_ok!(orchestrator.search(ProviderKind::Structured, request).await);
        assert!(!response.from_cache);
        assert_eq!(provider.search_calls(), 2);
    }
}
