//! Core types for destination matching
//!
//! The eleven trip-style attributes are shared vocabulary between member
//! preferences and destination capabilities: a member *wants* an attribute,
//! a destination *has* it.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// The fixed set of trip-style attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Attribute {
    Relax,
    Adventure,
    Cold,
    Hot,
    Beach,
    Mountain,
    ModernCity,
    Historic,
    Nightlife,
    QuietEvenings,
    GoodFood,
}

impl Attribute {
    /// All attributes, in a fixed order
    pub const ALL: [Attribute; 11] = [
        Attribute::Relax,
        Attribute::Adventure,
        Attribute::Cold,
        Attribute::Hot,
        Attribute::Beach,
        Attribute::Mountain,
        Attribute::ModernCity,
        Attribute::Historic,
        Attribute::Nightlife,
        Attribute::QuietEvenings,
        Attribute::GoodFood,
    ];

    /// Display name, also used as the JSON key in the airport table
    pub fn name(&self) -> &'static str {
        match self {
            Attribute::Relax => "Relax",
            Attribute::Adventure => "Adventure",
            Attribute::Cold => "Cold",
            Attribute::Hot => "Hot",
            Attribute::Beach => "Beach",
            Attribute::Mountain => "Mountain",
            Attribute::ModernCity => "Modern City",
            Attribute::Historic => "Historic",
            Attribute::Nightlife => "Nightlife",
            Attribute::QuietEvenings => "Quiet evenings",
            Attribute::GoodFood => "Good food",
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One boolean per attribute
///
/// Used both for what a member wants and for what a destination offers.
/// The JSON field names match the attribute display names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributeFlags {
    #[serde(rename = "Relax")]
    pub relax: bool,
    #[serde(rename = "Adventure")]
    pub adventure: bool,
    #[serde(rename = "Cold")]
    pub cold: bool,
    #[serde(rename = "Hot")]
    pub hot: bool,
    #[serde(rename = "Beach")]
    pub beach: bool,
    #[serde(rename = "Mountain")]
    pub mountain: bool,
    #[serde(rename = "Modern City")]
    pub modern_city: bool,
    #[serde(rename = "Historic")]
    pub historic: bool,
    #[serde(rename = "Nightlife")]
    pub nightlife: bool,
    #[serde(rename = "Quiet evenings")]
    pub quiet_evenings: bool,
    #[serde(rename = "Good food")]
    pub good_food: bool,
}

impl AttributeFlags {
    /// Whether the given attribute is set
    pub fn has(&self, attr: Attribute) -> bool {
        match attr {
            Attribute::Relax => self.relax,
            Attribute::Adventure => self.adventure,
            Attribute::Cold => self.cold,
            Attribute::Hot => self.hot,
            Attribute::Beach => self.beach,
            Attribute::Mountain => self.mountain,
            Attribute::ModernCity => self.modern_city,
            Attribute::Historic => self.historic,
            Attribute::Nightlife => self.nightlife,
            Attribute::QuietEvenings => self.quiet_evenings,
            Attribute::GoodFood => self.good_food,
        }
    }

    /// Set or clear the given attribute
    pub fn set(&mut self, attr: Attribute, value: bool) {
        match attr {
            Attribute::Relax => self.relax = value,
            Attribute::Adventure => self.adventure = value,
            Attribute::Cold => self.cold = value,
            Attribute::Hot => self.hot = value,
            Attribute::Beach => self.beach = value,
            Attribute::Mountain => self.mountain = value,
            Attribute::ModernCity => self.modern_city = value,
            Attribute::Historic => self.historic = value,
            Attribute::Nightlife => self.nightlife = value,
            Attribute::QuietEvenings => self.quiet_evenings = value,
            Attribute::GoodFood => self.good_food = value,
        }
    }

    /// Build flags from a list of attributes
    pub fn from_attrs(attrs: impl IntoIterator<Item = Attribute>) -> Self {
        let mut flags = Self::default();
        for attr in attrs {
            flags.set(attr, true);
        }
        flags
    }

    /// Attributes currently set, in fixed order
    pub fn wanted(&self) -> Vec<Attribute> {
        Attribute::ALL.into_iter().filter(|a| self.has(*a)).collect()
    }

    /// Whether any attribute is set
    pub fn any(&self) -> bool {
        Attribute::ALL.into_iter().any(|a| self.has(a))
    }
}

/// Departure and return dates for a search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TravelWindow {
    pub departure_date: NaiveDate,
    pub return_date: NaiveDate,
}

impl TravelWindow {
    pub fn new(departure_date: NaiveDate, return_date: NaiveDate) -> Self {
        Self {
            departure_date,
            return_date,
        }
    }
}

impl fmt::Display for TravelWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.departure_date, self.return_date)
    }
}

/// A round-trip fare to one destination, as returned by a provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Itinerary {
    /// IATA code of the destination airport
    pub destination_code: String,
    pub destination_name: String,
    /// Round-trip price in whole euros
    pub price: u32,
    pub is_direct: bool,
    pub airline: String,
}

/// One member's scoring input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberProfile {
    pub name: String,
    /// IATA code of the origin airport
    pub origin_airport: String,
    /// Budget in whole euros
    pub budget: u32,
    #[serde(flatten)]
    pub preferences: AttributeFlags,
}

/// A full group query: who is travelling, from where, and when
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupQuery {
    pub code: String,
    pub window: TravelWindow,
    pub members: Vec<MemberProfile>,
}

/// One member's flight for a candidate destination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberFlight {
    pub origin: String,
    pub airline: String,
    pub price: u32,
    pub is_direct: bool,
}

/// Per-attribute breakdown of who matched and who did not
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeDetail {
    /// Fraction of the whole group satisfied on this attribute
    pub score: f64,
    /// Members who wanted it and got it
    pub matches: Vec<String>,
    /// Members who wanted it and did not get it
    pub mismatches: Vec<String>,
}

/// A scored candidate destination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    /// "Name (IATA)", e.g. "Lisbon (LIS)"
    pub destination_key: String,
    /// Sum of every member's round-trip price, in euros
    pub total_group_cost: u32,
    pub match_score: f64,
    pub cost_score: f64,
    pub final_score: f64,
    /// Keyed by member display name
    pub per_member_flights: BTreeMap<String, MemberFlight>,
    /// Keyed by attribute display name
    pub per_attribute_detail: BTreeMap<String, AttributeDetail>,
}
