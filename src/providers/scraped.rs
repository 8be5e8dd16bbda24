// Search-engine style flight provider. Round trips take two calls: the first
// lists outbound options with a departure token each, the second echoes one
// token back and lists the matching return options.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::{read_body, transport_error, FlightProvider};
use crate::{
    config::ScrapedProviderConfig,
    error::SearchError,
    model::{
        Direction, Endpoint, Itinerary, NormalizedFlightOffer, Price, ProviderKind, SearchRequest,
        Segment,
    },
};

const KIND: ProviderKind = ProviderKind::Scraped;
const SEARCH_PATH: &str = "/search.json";
const ENGINE: &str = "google_flights";
const TYPE_ROUND_TRIP: &str = "1";
const TYPE_ONE_WAY: &str = "2";

#[derive(Deserialize)]
struct ScrapedResponse {
    #[serde(default)]
    best_flights: Vec<RawOption>,
    #[serde(default)]
    other_flights: Vec<RawOption>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct RawOption {
    flights: Vec<RawFlight>,
    price: Option<f64>,
    departure_token: Option<String>,
}

#[derive(Deserialize)]
struct RawFlight {
    departure_airport: RawAirport,
    arrival_airport: RawAirport,
    flight_number: String,
}

#[derive(Deserialize)]
struct RawAirport {
    id: String,
    time: String,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: Option<String>,
}

fn error_message(body: &[u8]) -> Option<String> {
    serde_json::from_slice::<ErrorEnvelope>(body).ok()?.error
}

// "BA 117" -> ("BA", "117")
fn split_flight_number(raw: &str) -> (String, String) {
    let raw = raw.trim();
    match raw.split_once(' ') {
        Some((carrier, number)) => (carrier.to_string(), number.trim().to_string()),
        None if raw.len() > 2 && raw.is_char_boundary(2) => {
            (raw[..2].to_string(), raw[2..].to_string())
        }
        None => (raw.to_string(), String::new()),
    }
}

/// Normalizes a search payload from either phase.
///
/// Best and other flights are merged in that order. Options without a price
/// cannot be booked and are skipped; each remaining option becomes an offer
/// with a single itinerary in `direction`.
pub fn parse_options(
    body: &[u8],
    direction: Direction,
    currency: &str,
) -> Result<Vec<NormalizedFlightOffer>, SearchError> {
    let response: ScrapedResponse = serde_json::from_slice(body)
        .map_err(|e| SearchError::upstream(KIND, format!("malformed payload: {e}")))?;

    if let Some(message) = response.error {
        return Err(SearchError::upstream(KIND, message));
    }

    let offers = response
        .best_flights
        .into_iter()
        .chain(response.other_flights)
        .filter_map(|option| {
            let total = option.price?;
            let segments = option
                .flights
                .into_iter()
                .map(|flight| {
                    let (carrier_code, flight_number) = split_flight_number(&flight.flight_number);
                    Segment {
                        carrier_code,
                        flight_number,
                        departure: Endpoint {
                            airport: flight.departure_airport.id,
                            time: flight.departure_airport.time,
                        },
                        arrival: Endpoint {
                            airport: flight.arrival_airport.id,
                            time: flight.arrival_airport.time,
                        },
                    }
                })
                .collect();

            Some(NormalizedFlightOffer {
                price: Price {
                    total,
                    currency: currency.to_string(),
                },
                itineraries: vec![Itinerary {
                    direction,
                    segments,
                }],
                source: KIND,
                continuation_token: option.departure_token,
            })
        })
        .collect();

    Ok(offers)
}

pub struct ScrapedFareProvider {
    client: Client,
    config: ScrapedProviderConfig,
    currency: String,
}

impl ScrapedFareProvider {
    pub fn new(config: ScrapedProviderConfig, currency: &str) -> Self {
        Self::with_client(Client::new(), config, currency)
    }

    pub fn with_client(client: Client, config: ScrapedProviderConfig, currency: &str) -> Self {
        Self {
            client,
            config,
            currency: currency.to_ascii_uppercase(),
        }
    }

    fn query(
        &self,
        request: &SearchRequest,
        departure_token: Option<&str>,
    ) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("engine", ENGINE.to_string()),
            ("departure_id", request.origin.clone()),
            ("arrival_id", request.destination.clone()),
            ("outbound_date", request.departure_date.clone()),
            ("currency", self.currency.clone()),
            ("adults", request.adults.to_string()),
            ("api_key", self.config.api_key.clone()),
        ];

        match (request.round_trip, &request.return_date) {
            (true, Some(ret)) => {
                query.push(("type", TYPE_ROUND_TRIP.to_string()));
                query.push(("return_date", ret.clone()));
            }
            _ => query.push(("type", TYPE_ONE_WAY.to_string())),
        }

        if let Some(token) = departure_token {
            query.push(("departure_token", token.to_string()));
        }
        query
    }

    async fn fetch(
        &self,
        request: &SearchRequest,
        departure_token: Option<&str>,
        direction: Direction,
    ) -> Result<Vec<NormalizedFlightOffer>, SearchError> {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), SEARCH_PATH);
        let response = self
            .client
            .get(url)
            .query(&self.query(request, departure_token))
            .send()
            .await
            .map_err(|e| transport_error(KIND, e))?;

        let body = read_body(KIND, response, error_message).await?;
        parse_options(&body, direction, &self.currency)
    }
}

#[async_trait]
impl FlightProvider for ScrapedFareProvider {
    fn kind(&self) -> ProviderKind {
        KIND
    }

    async fn search(
        &self,
        request: &SearchRequest,
    ) -> Result<Vec<NormalizedFlightOffer>, SearchError> {
        self.fetch(request, None, Direction::Outbound).await
    }

    async fn search_return(
        &self,
        request: &SearchRequest,
        continuation_token: &str,
    ) -> Result<Vec<NormalizedFlightOffer>, SearchError> {
        if !request.round_trip {
            return Err(SearchError::validation(
                "continuation tokens only apply to round trips",
            ));
        }
        self.fetch(request, Some(continuation_token), Direction::Inbound)
            .await
    }
}
