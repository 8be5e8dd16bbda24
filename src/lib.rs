// Caching and result-normalization core for a flight-search proxy

pub mod cache;
pub mod cache_key;
pub mod config;
pub mod currency;
pub mod error;
pub mod filter;
pub mod model;
pub mod orchestrator;
pub mod providers;

// Re-export key types for convenience
pub use cache::{CacheConfig, CacheStats, CacheStore, TtlCache};
pub use cache_key::build_key;
pub use config::{ScrapedProviderConfig, SearchConfig, StructuredProviderConfig};
pub use error::{CacheError, ConfigError, ErrorBody, SearchError};
pub use filter::filter_offers;
pub use model::{
    FlushConfirmation, NormalizedFlightOffer, ProviderKind, SearchFilters, SearchRequest,
    SearchResponse,
};
pub use orchestrator::{CachedOffers, SearchOrchestrator, SearchOrchestratorBuilder, SearchState};
pub use providers::{FlightProvider, ScrapedFareProvider, StructuredFareProvider};
