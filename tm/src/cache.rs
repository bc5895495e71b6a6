//! Per-run itinerary memoization
//!
//! Members sharing an origin would otherwise trigger identical provider
//! calls; the cache collapses them. Lookup failures degrade to the last
//! cached value for the key, or an empty list - never an error.

use std::collections::HashMap;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::provider::ProviderError;
use crate::types::{Itinerary, TravelWindow};

/// Cache key: one provider search is identified by these three inputs
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub origin: String,
    pub window: TravelWindow,
    pub budget_ceiling: u32,
}

impl CacheKey {
    pub fn new(origin: impl Into<String>, window: TravelWindow, budget_ceiling: u32) -> Self {
        Self {
            origin: origin.into(),
            window,
            budget_ceiling,
        }
    }
}

/// Memoizes provider lookups for the lifetime of one session
///
/// Safe for concurrent `get_or_fetch` calls: fetches run outside the lock, so
/// two callers racing on the same uncached key may both fetch, but the map
/// holds a single entry per key (last write wins).
#[derive(Debug, Default)]
pub struct ItineraryCache {
    entries: Mutex<HashMap<CacheKey, Vec<Itinerary>>>,
}

impl ItineraryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached value for `key`, or run `fetch` and store the result
    ///
    /// A successful fetch is stored even when empty. A failed fetch returns
    /// the previously cached value if one exists, otherwise an empty list.
    pub async fn get_or_fetch<F>(&self, key: CacheKey, fetch: F) -> Vec<Itinerary>
    where
        F: Future<Output = Result<Vec<Itinerary>, ProviderError>>,
    {
        if let Some(hit) = self.entries.lock().await.get(&key) {
            debug!(origin = %key.origin, count = hit.len(), "ItineraryCache: hit");
            return hit.clone();
        }

        match fetch.await {
            Ok(itineraries) => {
                debug!(origin = %key.origin, count = itineraries.len(), "ItineraryCache: stored");
                self.entries.lock().await.insert(key, itineraries.clone());
                itineraries
            }
            Err(e) => {
                warn!(origin = %key.origin, error = %e, "itinerary lookup failed, serving cached value");
                self.entries.lock().await.get(&key).cloned().unwrap_or_default()
            }
        }
    }

    /// Number of cached searches
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}
