//! TripMatch - group destination matching engine
//!
//! Given a group of travellers with different origin airports, budgets, and
//! trip-style preferences, TripMatch finds the destinations every member can
//! reach within budget and ranks them by how well they fit the group.
//!
//! # Core Concepts
//!
//! - **Origin partitions**: members sharing a departure airport are searched
//!   once, bounded by the lowest budget in the partition
//! - **All-or-nothing coverage**: a destination survives only if every origin
//!   partition can reach it
//! - **Weighted scoring**: 70% preference fit, 30% cost efficiency
//!
//! # Modules
//!
//! - [`types`] - itineraries, preference attributes, match results
//! - [`airports`] - embedded airport attribute table
//! - [`provider`] - flight price lookup trait and implementations
//! - [`cache`] - per-run itinerary memoization
//! - [`matcher`] - the matching engine itself

pub mod airports;
pub mod cache;
pub mod matcher;
pub mod provider;
pub mod types;

pub use airports::{AirportInfo, airport_by_iata, all_airports};
pub use cache::{CacheKey, ItineraryCache};
pub use matcher::find_best_destinations;
pub use provider::{FlightProvider, ProviderConfig, ProviderError, SkyscannerClient, StaticProvider, create_provider};
pub use types::{
    Attribute, AttributeDetail, AttributeFlags, GroupQuery, Itinerary, MatchResult, MemberFlight, MemberProfile,
    TravelWindow,
};
