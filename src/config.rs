// Configuration consumed by the search core

use std::{collections::HashMap, env, str::FromStr, time::Duration};

use crate::{cache::DEFAULT_TTL, error::ConfigError};

#[derive(Debug, Clone)]
pub struct SearchConfig {
    // Currency every cached price is expressed in
    pub currency: String,
    pub cache_ttl: Duration,
    pub provider_timeout: Duration,
    // Share one upstream call between concurrent identical misses
    pub coalesce_requests: bool,
    // Units of `currency` bought by one unit of the keyed currency
    pub exchange_rates: HashMap<String, f64>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            currency: "USD".to_string(),
            cache_ttl: DEFAULT_TTL,
            provider_timeout: Duration::from_secs(30),
            coalesce_requests: true,
            exchange_rates: HashMap::new(),
        }
    }
}

impl SearchConfig {
    /// Reads `FLIGHT_*` variables, loading a `.env` file first if there is one.
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        Ok(Self {
            currency: optional_var("FLIGHT_CURRENCY")
                .map(|c| c.to_ascii_uppercase())
                .unwrap_or(defaults.currency),
            cache_ttl: parsed_var::<u64>("FLIGHT_CACHE_TTL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.cache_ttl),
            provider_timeout: parsed_var::<u64>("FLIGHT_PROVIDER_TIMEOUT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.provider_timeout),
            coalesce_requests: parsed_var::<bool>("FLIGHT_COALESCE_REQUESTS")?
                .unwrap_or(defaults.coalesce_requests),
            exchange_rates: match optional_var("FLIGHT_EXCHANGE_RATES") {
                Some(raw) => parse_rates(&raw)?,
                None => defaults.exchange_rates,
            },
        })
    }
}

#[derive(Debug, Clone)]
pub struct StructuredProviderConfig {
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub max_results: u32,
}

impl Default for StructuredProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://test.api.amadeus.com".to_string(),
            client_id: String::new(),
            client_secret: String::new(),
            max_results: 50,
        }
    }
}

impl StructuredProviderConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        Ok(Self {
            base_url: optional_var("STRUCTURED_API_BASE_URL").unwrap_or(defaults.base_url),
            client_id: required_var("STRUCTURED_API_CLIENT_ID")?,
            client_secret: required_var("STRUCTURED_API_CLIENT_SECRET")?,
            max_results: parsed_var::<u32>("STRUCTURED_API_MAX_RESULTS")?
                .unwrap_or(defaults.max_results),
        })
    }
}

#[derive(Debug, Clone)]
pub struct ScrapedProviderConfig {
    pub base_url: String,
    pub api_key: String,
}

impl Default for ScrapedProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://serpapi.com".to_string(),
            api_key: String::new(),
        }
    }
}

impl ScrapedProviderConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        Ok(Self {
            base_url: optional_var("SCRAPED_API_BASE_URL")
                .unwrap_or_else(|| Self::default().base_url),
            api_key: required_var("SCRAPED_API_KEY")?,
        })
    }
}

fn optional_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn required_var(key: &str) -> Result<String, ConfigError> {
    optional_var(key).ok_or_else(|| ConfigError::Missing(key.to_string()))
}

fn parsed_var<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    optional_var(key)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|_| ConfigError::Invalid {
                key: key.to_string(),
                value: raw.clone(),
            })
        })
        .transpose()
}

// "EUR=1.08,GBP=1.27"
pub fn parse_rates(raw: &str) -> Result<HashMap<String, f64>, ConfigError> {
    let invalid = || ConfigError::Invalid {
        key: "FLIGHT_EXCHANGE_RATES".to_string(),
        value: raw.to_string(),
    };

    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (code, rate) = pair.split_once('=').ok_or_else(invalid)?;
            let rate: f64 = rate.trim().parse().map_err(|_| invalid())?;
            if !rate.is_finite() || rate <= 0.0 {
                return Err(invalid());
            }
            Ok((code.trim().to_ascii_uppercase(), rate))
        })
        .collect()
}
