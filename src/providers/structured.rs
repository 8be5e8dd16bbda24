// Structured fare-search provider: OAuth2 client credentials plus an
// itemized flight-offers endpoint

use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Client;
use serde::Deserialize;

use super::{read_body, transport_error, FlightProvider};
use crate::{
    config::StructuredProviderConfig,
    error::SearchError,
    model::{
        Direction, Endpoint, Itinerary, NormalizedFlightOffer, Price, ProviderKind, SearchRequest,
        Segment,
    },
};

const KIND: ProviderKind = ProviderKind::Structured;
const TOKEN_PATH: &str = "/v1/security/oauth2/token";
const OFFERS_PATH: &str = "/v2/shopping/flight-offers";
// Refresh this long before the upstream expiry
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(30);

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Clone)]
struct AccessToken {
    value: String,
    expires_at: Instant,
}

#[derive(Deserialize)]
struct OffersResponse {
    #[serde(default)]
    data: Vec<RawOffer>,
    #[serde(default)]
    errors: Vec<RawError>,
}

#[derive(Deserialize)]
struct RawError {
    title: Option<String>,
    detail: Option<String>,
}

#[derive(Deserialize)]
struct RawOffer {
    price: RawPrice,
    itineraries: Vec<RawItinerary>,
}

#[derive(Deserialize)]
struct RawPrice {
    total: String,
    currency: String,
}

#[derive(Deserialize)]
struct RawItinerary {
    segments: Vec<RawSegment>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSegment {
    carrier_code: String,
    number: String,
    departure: RawEndpoint,
    arrival: RawEndpoint,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEndpoint {
    iata_code: String,
    at: String,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    errors: Vec<RawError>,
    error_description: Option<String>,
}

fn first_error(errors: &[RawError]) -> Option<String> {
    errors
        .iter()
        .find_map(|e| e.detail.clone().or_else(|| e.title.clone()))
}

fn error_message(body: &[u8]) -> Option<String> {
    let envelope: ErrorEnvelope = serde_json::from_slice(body).ok()?;
    first_error(&envelope.errors).or(envelope.error_description)
}

/// Maps a flight-offers payload onto normalized offers.
///
/// The first itinerary is outbound, a second one inbound. An `errors` array
/// fails the call even on a 2xx answer.
pub fn parse_offers(body: &[u8]) -> Result<Vec<NormalizedFlightOffer>, SearchError> {
    let response: OffersResponse = serde_json::from_slice(body)
        .map_err(|e| SearchError::upstream(KIND, format!("malformed payload: {e}")))?;

    if let Some(message) = first_error(&response.errors) {
        return Err(SearchError::upstream(KIND, message));
    }

    response
        .data
        .into_iter()
        .map(|offer| {
            let total = offer.price.total.trim().parse::<f64>().map_err(|_| {
                SearchError::upstream(
                    KIND,
                    format!("malformed price total {:?}", offer.price.total),
                )
            })?;

            let itineraries = offer
                .itineraries
                .into_iter()
                .enumerate()
                .map(|(i, itinerary)| Itinerary {
                    direction: if i == 0 {
                        Direction::Outbound
                    } else {
                        Direction::Inbound
                    },
                    segments: itinerary.segments.into_iter().map(segment).collect(),
                })
                .collect();

            Ok(NormalizedFlightOffer {
                price: Price {
                    total,
                    currency: offer.price.currency,
                },
                itineraries,
                source: KIND,
                continuation_token: None,
            })
        })
        .collect()
}

fn segment(raw: RawSegment) -> Segment {
    Segment {
        carrier_code: raw.carrier_code,
        flight_number: raw.number,
        departure: Endpoint {
            airport: raw.departure.iata_code,
            time: raw.departure.at,
        },
        arrival: Endpoint {
            airport: raw.arrival.iata_code,
            time: raw.arrival.at,
        },
    }
}

pub struct StructuredFareProvider {
    client: Client,
    config: StructuredProviderConfig,
    currency: String,
    token: RwLock<Option<AccessToken>>,
}

impl StructuredFareProvider {
    pub fn new(config: StructuredProviderConfig, currency: &str) -> Self {
        Self::with_client(Client::new(), config, currency)
    }

    pub fn with_client(client: Client, config: StructuredProviderConfig, currency: &str) -> Self {
        Self {
            client,
            config,
            currency: currency.to_ascii_uppercase(),
            token: RwLock::new(None),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn access_token(&self) -> Result<String, SearchError> {
        if let Some(token) = self.token.read().as_ref() {
            if token.expires_at > Instant::now() + TOKEN_EXPIRY_MARGIN {
                return Ok(token.value.clone());
            }
        }

        tracing::debug!(provider = %KIND, "requesting access token");
        let response = self
            .client
            .post(self.url(TOKEN_PATH))
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| transport_error(KIND, e))?;

        let body = read_body(KIND, response, error_message).await?;
        let token: TokenResponse = serde_json::from_slice(&body)
            .map_err(|e| SearchError::upstream(KIND, format!("malformed token payload: {e}")))?;

        let expires_at = Instant::now()
            .checked_add(Duration::from_secs(token.expires_in))
            .ok_or_else(|| {
                SearchError::upstream(KIND, "malformed token payload: expires_in out of range")
            })?;

        let access = AccessToken {
            value: token.access_token,
            expires_at,
        };
        let value = access.value.clone();
        *self.token.write() = Some(access);
        Ok(value)
    }

    fn query(&self, request: &SearchRequest) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("originLocationCode", request.origin.clone()),
            ("destinationLocationCode", request.destination.clone()),
            ("departureDate", request.departure_date.clone()),
            ("adults", request.adults.to_string()),
            ("currencyCode", self.currency.clone()),
            ("max", self.config.max_results.to_string()),
        ];
        if request.round_trip {
            if let Some(ret) = &request.return_date {
                query.push(("returnDate", ret.clone()));
            }
        }
        query
    }
}

#[async_trait]
impl FlightProvider for StructuredFareProvider {
    fn kind(&self) -> ProviderKind {
        KIND
    }

    async fn search(
        &self,
        request: &SearchRequest,
    ) -> Result<Vec<NormalizedFlightOffer>, SearchError> {
        let token = self.access_token().await?;

        let response = self
            .client
            .get(self.url(OFFERS_PATH))
            .bearer_auth(token)
            .query(&self.query(request))
            .send()
            .await
            .map_err(|e| transport_error(KIND, e))?;

        let body = read_body(KIND, response, error_message).await?;
        parse_offers(&body)
    }
}
