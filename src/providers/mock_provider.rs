// In-process provider for tests and benchmarks: canned offers, injected
// failures and artificial latency

use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::FlightProvider;
use crate::{
    error::SearchError,
    model::{
        Direction, Endpoint, Itinerary, NormalizedFlightOffer, Price, ProviderKind, SearchRequest,
        Segment,
    },
};

pub struct MockProvider {
    kind: ProviderKind,
    search_calls: AtomicUsize,
    return_calls: AtomicUsize,
    offers: Mutex<Vec<NormalizedFlightOffer>>,
    return_offers: Mutex<HashMap<String, Vec<NormalizedFlightOffer>>>,
    fail_next_requests: AtomicUsize,
    failure_message: Mutex<String>,
    delay_ms: AtomicUsize,
    jitter: AtomicBool,
}

impl MockProvider {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            search_calls: AtomicUsize::new(0),
            return_calls: AtomicUsize::new(0),
            offers: Mutex::new(Vec::new()),
            return_offers: Mutex::new(HashMap::new()),
            fail_next_requests: AtomicUsize::new(0),
            failure_message: Mutex::new("Internal Server Error".to_string()),
            delay_ms: AtomicUsize::new(0),
            jitter: AtomicBool::new(false),
        }
    }

    pub fn with_offers(kind: ProviderKind, offers: Vec<NormalizedFlightOffer>) -> Self {
        let provider = Self::new(kind);
        provider.set_offers(offers);
        provider
    }

    pub fn set_offers(&self, offers: Vec<NormalizedFlightOffer>) {
        *self.offers.lock() = offers;
    }

    // Return options served for a given continuation token
    pub fn add_return_offers(&self, token: &str, offers: Vec<NormalizedFlightOffer>) {
        self.return_offers.lock().insert(token.to_string(), offers);
    }

    pub fn fail_next_requests(&self, count: usize, message: &str) {
        *self.failure_message.lock() = message.to_string();
        self.fail_next_requests.store(count, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay_ms: usize) {
        self.delay_ms.store(delay_ms, Ordering::SeqCst);
    }

    // Adds up to 50% random extra latency on top of the delay
    pub fn set_jitter(&self, enabled: bool) {
        self.jitter.store(enabled, Ordering::SeqCst);
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn return_calls(&self) -> usize {
        self.return_calls.load(Ordering::SeqCst)
    }

    async fn simulate(&self) -> Result<(), SearchError> {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            let jitter = if self.jitter.load(Ordering::SeqCst) {
                rand::random::<usize>() % (delay / 2 + 1)
            } else {
                0
            };
            tokio::time::sleep(Duration::from_millis((delay + jitter) as u64)).await;
        }

        let failed = self
            .fail_next_requests
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            let message = self.failure_message.lock().clone();
            return Err(SearchError::upstream(self.kind, message));
        }

        Ok(())
    }

    /// Single-itinerary offer with one segment per carrier in `carriers`,
    /// hopping through made-up airports between `from` and `to`.
    pub fn offer(
        kind: ProviderKind,
        price: f64,
        direction: Direction,
        from: &str,
        to: &str,
        carriers: &[&str],
    ) -> NormalizedFlightOffer {
        let hops = carriers.len();
        let segments = carriers
            .iter()
            .enumerate()
            .map(|(i, carrier)| {
                let dep = if i == 0 { from.to_string() } else { format!("X{i:02}") };
                let arr = if i + 1 == hops {
                    to.to_string()
                } else {
                    format!("X{:02}", i + 1)
                };
                Segment {
                    carrier_code: carrier.to_string(),
                    flight_number: format!("{}", 100 + i),
                    departure: Endpoint {
                        airport: dep,
                        time: format!("2025-06-01T{:02}:00", 8 + 2 * i),
                    },
                    arrival: Endpoint {
                        airport: arr,
                        time: format!("2025-06-01T{:02}:30", 9 + 2 * i),
                    },
                }
            })
            .collect();

        NormalizedFlightOffer {
            price: Price {
                total: price,
                currency: "USD".to_string(),
            },
            itineraries: vec![Itinerary {
                direction,
                segments,
            }],
            source: kind,
            continuation_token: None,
        }
    }
}

#[async_trait]
impl FlightProvider for MockProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn search(
        &self,
        _request: &SearchRequest,
    ) -> Result<Vec<NormalizedFlightOffer>, SearchError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate().await?;
        Ok(self.offers.lock().clone())
    }

    async fn search_return(
        &self,
        _request: &SearchRequest,
        continuation_token: &str,
    ) -> Result<Vec<NormalizedFlightOffer>, SearchError> {
        self.return_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate().await?;

        self.return_offers
            .lock()
            .get(continuation_token)
            .cloned()
            .ok_or_else(|| {
                SearchError::upstream(
                    self.kind,
                    format!("unknown departure token {continuation_token}"),
                )
            })
    }
}
