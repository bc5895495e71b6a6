//! Embedded airport attribute table
//!
//! Destinations are scored against this table. Entries carry the same eleven
//! boolean attributes as member preferences. The table is compiled into the
//! binary; destinations the providers return that are not listed here are
//! simply not scoreable and get dropped by the matcher.

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::types::AttributeFlags;

/// One airport with its trip-style attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AirportInfo {
    pub iata: String,
    pub name: String,
    pub country: String,
    #[serde(flatten)]
    pub attributes: AttributeFlags,
}

impl AirportInfo {
    /// "Name (IATA)" - the destination key format used throughout
    pub fn key(&self) -> String {
        format!("{} ({})", self.name, self.iata)
    }
}

static AIRPORTS: OnceLock<Vec<AirportInfo>> = OnceLock::new();

/// The full embedded table
pub fn all_airports() -> &'static [AirportInfo] {
    AIRPORTS.get_or_init(|| {
        serde_json::from_str(include_str!("airports.json")).expect("embedded airports.json must parse")
    })
}

/// Look up an airport by IATA code (case-insensitive)
pub fn airport_by_iata(iata: &str) -> Option<&'static AirportInfo> {
    all_airports().iter().find(|a| a.iata.eq_ignore_ascii_case(iata))
}
