//! Flight price lookup providers
//!
//! A provider answers one question: which destinations are reachable from an
//! origin within a budget, and for how much. The live implementation talks to
//! the Skyscanner indicative-search API; the static implementation serves
//! deterministic fares derived from the embedded airport table so the rest of
//! the system works offline.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::airports::all_airports;
use crate::types::{Itinerary, TravelWindow};

/// Maximum number of retries for transient errors
const MAX_RETRIES: u32 = 3;

/// Initial backoff delay for retries
const INITIAL_BACKOFF_MS: u64 = 500;

/// Check if an HTTP status code is retryable
fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
}

/// Errors that can occur during flight lookups
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("API error {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Unknown provider: '{0}'. Supported: skyscanner, static")]
    UnknownProvider(String),
}

impl ProviderError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::ApiError { status, .. } => is_retryable_status(*status),
            ProviderError::Network(_) => true,
            ProviderError::InvalidResponse(_) => false,
            ProviderError::UnknownProvider(_) => false,
        }
    }
}

/// Flight provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Provider name ("skyscanner" or "static")
    pub provider: String,

    /// Environment variable containing the API key
    #[serde(rename = "api-key-env")]
    pub api_key_env: String,

    /// API base URL
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Market country code for searches
    pub market: String,

    /// Locale for result names
    pub locale: String,

    /// Currency for prices
    pub currency: String,

    /// Request timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider: "static".to_string(),
            api_key_env: "SKYSCANNER_API_KEY".to_string(),
            base_url: "https://partners.api.skyscanner.net".to_string(),
            market: "ES".to_string(),
            locale: "en-GB".to_string(),
            currency: "EUR".to_string(),
            timeout_ms: 30_000,
        }
    }
}

/// Budget-bounded destination search
///
/// Returns every destination reachable from `origin` within `max_budget`,
/// cheapest first. Implementations must not return fares above the budget.
#[async_trait]
pub trait FlightProvider: Send + Sync {
    async fn search(
        &self,
        origin: &str,
        window: &TravelWindow,
        max_budget: u32,
    ) -> Result<Vec<Itinerary>, ProviderError>;
}

impl std::fmt::Debug for dyn FlightProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn FlightProvider")
    }
}

/// Create a flight provider based on the name in config
pub fn create_provider(config: &ProviderConfig) -> Result<Arc<dyn FlightProvider>, ProviderError> {
    debug!(provider = %config.provider, "create_provider: called");
    match config.provider.as_str() {
        "skyscanner" => Ok(Arc::new(SkyscannerClient::from_config(config)?)),
        "static" => Ok(Arc::new(StaticProvider::new())),
        other => Err(ProviderError::UnknownProvider(other.to_string())),
    }
}

// === Skyscanner ===

/// Skyscanner indicative-search API client
pub struct SkyscannerClient {
    api_key: String,
    base_url: String,
    market: String,
    locale: String,
    currency: String,
    http: Client,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    content: Option<SearchContent>,
}

#[derive(Debug, Deserialize)]
struct SearchContent {
    results: Option<SearchResults>,
}

#[derive(Debug, Deserialize)]
struct SearchResults {
    #[serde(default)]
    quotes: HashMap<String, Quote>,
    #[serde(default)]
    carriers: HashMap<String, Carrier>,
    #[serde(default)]
    places: HashMap<String, Place>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Quote {
    min_price: QuotePrice,
    is_direct: bool,
    outbound_leg: QuoteLeg,
}

#[derive(Debug, Deserialize)]
struct QuotePrice {
    amount: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteLeg {
    destination_place_id: String,
    marketing_carrier_id: String,
}

#[derive(Debug, Deserialize)]
struct Carrier {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Place {
    name: String,
    iata: Option<String>,
}

impl SkyscannerClient {
    /// Create a new client from configuration
    ///
    /// Reads the API key from the environment variable named in config.
    pub fn from_config(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            ProviderError::InvalidResponse(format!(
                "API key not found. Set the {} environment variable.",
                config.api_key_env
            ))
        })?;

        let http = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(ProviderError::Network)?;

        Ok(Self {
            api_key,
            base_url: config.base_url.clone(),
            market: config.market.clone(),
            locale: config.locale.clone(),
            currency: config.currency.clone(),
            http,
        })
    }

    /// Build the indicative-search request body
    fn build_request_body(&self, origin: &str, window: &TravelWindow) -> serde_json::Value {
        use chrono::Datelike;

        let depart = window.departure_date;
        serde_json::json!({
            "query": {
                "market": self.market,
                "locale": self.locale,
                "currency": self.currency,
                "queryLegs": [
                    {
                        "originPlace": { "queryPlace": { "iata": origin } },
                        "destinationPlace": { "anywhere": true },
                        "fixedDate": {
                            "year": depart.year(),
                            "month": depart.month(),
                            "day": depart.day(),
                        },
                    }
                ],
            }
        })
    }

    /// Convert a parsed API response into itineraries, bounded by budget
    fn collect_itineraries(results: SearchResults, max_budget: u32) -> Vec<Itinerary> {
        let mut itineraries = Vec::new();

        for quote in results.quotes.values() {
            let Some(place) = results.places.get(&quote.outbound_leg.destination_place_id) else {
                continue;
            };
            let Some(iata) = place.iata.as_deref() else {
                continue;
            };
            let Ok(price) = quote.min_price.amount.parse::<u32>() else {
                continue;
            };
            if price > max_budget {
                continue;
            }

            let airline = results
                .carriers
                .get(&quote.outbound_leg.marketing_carrier_id)
                .map(|c| c.name.clone())
                .unwrap_or_else(|| "Unknown".to_string());

            itineraries.push(Itinerary {
                destination_code: iata.to_string(),
                destination_name: place.name.clone(),
                price,
                is_direct: quote.is_direct,
                airline,
            });
        }

        itineraries.sort_by(|a, b| a.price.cmp(&b.price).then(a.destination_code.cmp(&b.destination_code)));
        itineraries
    }

    async fn search_once(&self, origin: &str, window: &TravelWindow) -> Result<SearchResponse, ProviderError> {
        let url = format!("{}/apiservices/v3/flights/indicative/search", self.base_url);
        let response = self
            .http
            .post(&url)
            .header("x-api-key", &self.api_key)
            .json(&self.build_request_body(origin, window))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<SearchResponse>()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl FlightProvider for SkyscannerClient {
    async fn search(
        &self,
        origin: &str,
        window: &TravelWindow,
        max_budget: u32,
    ) -> Result<Vec<Itinerary>, ProviderError> {
        debug!(%origin, %window, max_budget, "SkyscannerClient::search: called");

        let mut attempt = 0;
        let response = loop {
            match self.search_once(origin, window).await {
                Ok(response) => break response,
                Err(e) if e.is_retryable() && attempt < MAX_RETRIES => {
                    let backoff = Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt));
                    warn!(%origin, error = %e, ?backoff, "search failed, retrying");
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        };

        let results = response
            .content
            .and_then(|c| c.results)
            .unwrap_or_else(|| SearchResults {
                quotes: HashMap::new(),
                carriers: HashMap::new(),
                places: HashMap::new(),
            });

        let itineraries = Self::collect_itineraries(results, max_budget);
        debug!(%origin, count = itineraries.len(), "SkyscannerClient::search: done");
        Ok(itineraries)
    }
}

// === Static ===

/// Offline provider with deterministic fares derived from the airport table
///
/// The fare for a route depends only on the route string, so repeated runs
/// (and tests) see identical prices.
pub struct StaticProvider;

impl StaticProvider {
    pub fn new() -> Self {
        Self
    }

    /// Stable pseudo-fare for a route, in 60..=580 euros
    fn route_seed(origin: &str, dest: &str) -> u32 {
        let mut h: u32 = 2166136261;
        for byte in origin.bytes().chain(dest.bytes()) {
            h ^= byte as u32;
            h = h.wrapping_mul(16777619);
        }
        h
    }
}

impl Default for StaticProvider {
    fn default() -> Self {
        Self::new()
    }
}

const STATIC_AIRLINES: [&str; 6] = [
    "Vueling",
    "Ryanair",
    "Iberia",
    "TAP Air Portugal",
    "Lufthansa",
    "easyJet",
];

#[async_trait]
impl FlightProvider for StaticProvider {
    async fn search(
        &self,
        origin: &str,
        _window: &TravelWindow,
        max_budget: u32,
    ) -> Result<Vec<Itinerary>, ProviderError> {
        let origin = origin.to_uppercase();
        let mut itineraries: Vec<Itinerary> = all_airports()
            .iter()
            .filter(|a| a.iata != origin)
            .filter_map(|a| {
                let seed = Self::route_seed(&origin, &a.iata);
                let price = 60 + seed % 521;
                if price > max_budget {
                    return None;
                }
                Some(Itinerary {
                    destination_code: a.iata.clone(),
                    destination_name: a.name.clone(),
                    price,
                    is_direct: seed % 3 != 0,
                    airline: STATIC_AIRLINES[(seed % 6) as usize].to_string(),
                })
            })
            .collect();

        itineraries.sort_by(|a, b| a.price.cmp(&b.price).then(a.destination_code.cmp(&b.destination_code)));
        debug!(%origin, max_budget, count = itineraries.len(), "StaticProvider::search: done");
        Ok(itineraries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn window() -> TravelWindow {
        TravelWindow::new(
            NaiveDate::from_ymd_opt(2025, 7, 15).unwrap(),
            NaiveDate::from_ymd_opt(2025, 7, 22).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_static_provider_is_deterministic() {
        let provider = StaticProvider::new();
        let first = provider.search("BCN", &window(), 500).await.unwrap();
        let second = provider.search("BCN", &window(), 500).await.unwrap();
        assert_eq!(first, second);
        assert!(!first.is_empty());
    }

    #[tokio::test]
    async fn test_static_provider_respects_budget() {
        let provider = StaticProvider::new();
        let results = provider.search("BCN", &window(), 200).await.unwrap();
        assert!(results.iter().all(|i| i.price <= 200));
    }

    #[tokio::test]
    async fn test_static_provider_sorts_cheapest_first() {
        let provider = StaticProvider::new();
        let results = provider.search("MAD", &window(), 600).await.unwrap();
        for pair in results.windows(2) {
            assert!(pair[0].price <= pair[1].price);
        }
    }

    #[tokio::test]
    async fn test_static_provider_excludes_origin() {
        let provider = StaticProvider::new();
        let results = provider.search("LIS", &window(), 600).await.unwrap();
        assert!(results.iter().all(|i| i.destination_code != "LIS"));
    }

    #[test]
    fn test_create_provider_static() {
        let config = ProviderConfig::default();
        assert!(create_provider(&config).is_ok());
    }

    #[test]
    fn test_create_provider_unknown() {
        let config = ProviderConfig {
            provider: "teleport".to_string(),
            ..Default::default()
        };
        let err = create_provider(&config).unwrap_err();
        assert!(matches!(err, ProviderError::UnknownProvider(_)));
    }

    #[test]
    #[serial_test::serial]
    fn test_skyscanner_requires_api_key() {
        let config = ProviderConfig {
            provider: "skyscanner".to_string(),
            api_key_env: "TRIPMATCH_TEST_MISSING_KEY".to_string(),
            ..Default::default()
        };
        unsafe { std::env::remove_var("TRIPMATCH_TEST_MISSING_KEY") };
        assert!(create_provider(&config).is_err());

        unsafe { std::env::set_var("TRIPMATCH_TEST_MISSING_KEY", "test-key") };
        assert!(create_provider(&config).is_ok());
        unsafe { std::env::remove_var("TRIPMATCH_TEST_MISSING_KEY") };
    }

    #[test]
    fn test_collect_itineraries_skips_malformed_quotes() {
        let mut quotes = HashMap::new();
        quotes.insert(
            "good".to_string(),
            Quote {
                min_price: QuotePrice {
                    amount: "180".to_string(),
                },
                is_direct: true,
                outbound_leg: QuoteLeg {
                    destination_place_id: "p1".to_string(),
                    marketing_carrier_id: "c1".to_string(),
                },
            },
        );
        quotes.insert(
            "bad-price".to_string(),
            Quote {
                min_price: QuotePrice {
                    amount: "not-a-number".to_string(),
                },
                is_direct: false,
                outbound_leg: QuoteLeg {
                    destination_place_id: "p1".to_string(),
                    marketing_carrier_id: "c1".to_string(),
                },
            },
        );
        quotes.insert(
            "unknown-place".to_string(),
            Quote {
                min_price: QuotePrice {
                    amount: "120".to_string(),
                },
                is_direct: false,
                outbound_leg: QuoteLeg {
                    destination_place_id: "nope".to_string(),
                    marketing_carrier_id: "c1".to_string(),
                },
            },
        );

        let mut places = HashMap::new();
        places.insert(
            "p1".to_string(),
            Place {
                name: "Lisbon".to_string(),
                iata: Some("LIS".to_string()),
            },
        );
        let mut carriers = HashMap::new();
        carriers.insert(
            "c1".to_string(),
            Carrier {
                name: "TAP Air Portugal".to_string(),
            },
        );

        let results = SkyscannerClient::collect_itineraries(
            SearchResults {
                quotes,
                carriers,
                places,
            },
            500,
        );

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].destination_code, "LIS");
        assert_eq!(results[0].price, 180);
        assert_eq!(results[0].airline, "TAP Air Portugal");
    }
}
