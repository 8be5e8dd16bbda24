// Upstream flight-data providers behind a single async interface

pub mod mock_provider;
pub mod scraped;
pub mod structured;

use async_trait::async_trait;
use bytes::Bytes;

use crate::{
    error::SearchError,
    model::{NormalizedFlightOffer, ProviderKind, SearchRequest},
};

pub use scraped::ScrapedFareProvider;
pub use structured::StructuredFareProvider;

/// A remote flight-data source that answers with normalized offers.
///
/// Implementations make exactly one upstream attempt per call and report any
/// failure as [`SearchError::Upstream`].
#[async_trait]
pub trait FlightProvider: Send + Sync + 'static {
    fn kind(&self) -> ProviderKind;

    // Outbound search, or the full round trip for single-phase providers
    async fn search(
        &self,
        request: &SearchRequest,
    ) -> Result<Vec<NormalizedFlightOffer>, SearchError>;

    // Second phase of a two-phase round trip
    async fn search_return(
        &self,
        _request: &SearchRequest,
        _continuation_token: &str,
    ) -> Result<Vec<NormalizedFlightOffer>, SearchError> {
        Err(SearchError::validation(format!(
            "{} provider does not support continuation tokens",
            self.kind()
        )))
    }
}

// Reads the body and turns non-2xx answers into upstream errors
pub(crate) async fn read_body(
    provider: ProviderKind,
    response: reqwest::Response,
    error_message: fn(&[u8]) -> Option<String>,
) -> Result<Bytes, SearchError> {
    let status = response.status();
    let body = response
        .bytes()
        .await
        .map_err(|e| SearchError::upstream(provider, e.to_string()))?;

    if !status.is_success() {
        let message = error_message(&body).unwrap_or_else(|| format!("HTTP {status}"));
        tracing::warn!(%provider, %status, %message, "upstream returned an error status");
        return Err(SearchError::upstream(provider, message));
    }

    Ok(body)
}

pub(crate) fn transport_error(provider: ProviderKind, err: reqwest::Error) -> SearchError {
    SearchError::upstream(provider, err.to_string())
}
