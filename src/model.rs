// Request, offer and response types shared by every component

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::SearchError;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

// Upstream flight-data source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    // Structured fare-search API returning itemized offers
    Structured,
    // Search-engine style API with a two-phase round-trip protocol
    Scraped,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Structured => "structured",
            ProviderKind::Scraped => "scraped",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchFilters {
    pub max_price: Option<f64>,
    pub max_stops: Option<usize>,
    pub airlines: Option<Vec<String>>,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        self.max_price.is_none()
            && self.max_stops.is_none()
            && self.airlines.as_ref().map_or(true, |a| a.is_empty())
    }
}

fn default_adults() -> u32 {
    1
}

// Inbound search parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub origin: String,
    pub destination: String,
    pub departure_date: String,
    #[serde(default)]
    pub return_date: Option<String>,
    #[serde(default)]
    pub round_trip: bool,
    #[serde(default = "default_adults")]
    pub adults: u32,
    #[serde(default)]
    pub continuation_token: Option<String>,
    #[serde(flatten)]
    pub filters: SearchFilters,
}

impl SearchRequest {
    pub fn one_way(origin: &str, destination: &str, departure_date: &str) -> Self {
        Self {
            origin: origin.to_string(),
            destination: destination.to_string(),
            departure_date: departure_date.to_string(),
            return_date: None,
            round_trip: false,
            adults: 1,
            continuation_token: None,
            filters: SearchFilters::default(),
        }
    }

    pub fn round_trip(
        origin: &str,
        destination: &str,
        departure_date: &str,
        return_date: &str,
    ) -> Self {
        Self {
            return_date: Some(return_date.to_string()),
            round_trip: true,
            ..Self::one_way(origin, destination, departure_date)
        }
    }

    /// Checks the required fields and returns a copy with airport codes
    /// upper-cased, blank optionals cleared and the return date dropped from
    /// one-way searches.
    ///
    /// Dates must be `YYYY-MM-DD`; a round trip needs a return date that is
    /// not before the departure date.
    pub fn normalized(&self) -> Result<SearchRequest, SearchError> {
        let origin = normalize_airport("origin", &self.origin)?;
        let destination = normalize_airport("destination", &self.destination)?;

        if self.departure_date.trim().is_empty() {
            return Err(SearchError::validation("departureDate is required"));
        }
        let departure = parse_date("departureDate", &self.departure_date)?;

        let mut return_date = match self.return_date.as_deref().map(str::trim) {
            Some(date) if !date.is_empty() => Some(date.to_string()),
            _ => None,
        };

        if self.round_trip {
            let Some(ret) = return_date.as_deref() else {
                return Err(SearchError::validation(
                    "returnDate is required for round trips",
                ));
            };
            if parse_date("returnDate", ret)? < departure {
                return Err(SearchError::validation(
                    "returnDate must not be before departureDate",
                ));
            }
        } else if let Some(ret) = return_date.take() {
            // One-way searches never send it upstream
            parse_date("returnDate", &ret)?;
        }

        if self.adults == 0 {
            return Err(SearchError::validation("adults must be at least 1"));
        }

        let continuation_token = self
            .continuation_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);

        Ok(SearchRequest {
            origin,
            destination,
            departure_date: self.departure_date.trim().to_string(),
            return_date,
            round_trip: self.round_trip,
            adults: self.adults,
            continuation_token,
            filters: self.filters.clone(),
        })
    }
}

fn normalize_airport(field: &str, code: &str) -> Result<String, SearchError> {
    let code = code.trim();
    if code.is_empty() {
        return Err(SearchError::validation(format!("{field} is required")));
    }
    if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(SearchError::validation(format!(
            "{field} must be a three-letter airport code, got {code:?}"
        )));
    }
    Ok(code.to_ascii_uppercase())
}

fn parse_date(field: &str, value: &str) -> Result<NaiveDate, SearchError> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT).map_err(|_| {
        SearchError::validation(format!("{field} must be a YYYY-MM-DD date, got {value:?}"))
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Price {
    pub total: f64,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub airport: String,
    pub time: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub carrier_code: String,
    pub flight_number: String,
    pub departure: Endpoint,
    pub arrival: Endpoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Outbound,
    Inbound,
}

// Segments in travel order for one direction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Itinerary {
    pub direction: Direction,
    pub segments: Vec<Segment>,
}

impl Itinerary {
    pub fn stops(&self) -> usize {
        self.segments.len().saturating_sub(1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedFlightOffer {
    pub price: Price,
    pub itineraries: Vec<Itinerary>,
    pub source: ProviderKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continuation_token: Option<String>,
}

// Successful search envelope
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub data: Vec<NormalizedFlightOffer>,
    pub from_cache: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flight_data_length: Option<usize>,
    pub round_trip: bool,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlushConfirmation {
    pub message: String,
    pub flushed: usize,
}
