//! TripMatch CLI
//!
//! Standalone entry points for the matching engine: search one origin's
//! fares, or run a full group match from the command line.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use colored::Colorize;
use eyre::{Context, Result, eyre};

use tripmatch::{
    Attribute, AttributeFlags, FlightProvider, GroupQuery, ItineraryCache, MemberProfile, ProviderConfig,
    TravelWindow, create_provider, find_best_destinations,
};

/// TripMatch - group destination matching engine
#[derive(Parser)]
#[command(name = "tm", about = "Find destinations a whole travel group can afford", version)]
struct Cli {
    /// Provider to use (static, skyscanner)
    #[arg(short, long, global = true, default_value = "static")]
    provider: String,

    /// Departure date (YYYY-MM-DD, default: 30 days out)
    #[arg(long, global = true)]
    depart: Option<NaiveDate>,

    /// Return date (YYYY-MM-DD, default: depart + 7 days)
    #[arg(long, global = true)]
    r#return: Option<NaiveDate>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List destinations reachable from one origin within a budget
    Search {
        /// Origin airport IATA code
        origin: String,

        /// Budget in whole euros
        budget: u32,
    },

    /// Rank destinations for a whole group
    ///
    /// Members are NAME:ORIGIN:BUDGET[:ATTR,ATTR,...], e.g.
    /// "Maria:BCN:500:Beach,Hot"
    Match {
        /// One or more member specs
        #[arg(required = true)]
        members: Vec<String>,
    },
}

fn parse_member(spec: &str) -> Result<MemberProfile> {
    let parts: Vec<&str> = spec.split(':').collect();
    if parts.len() < 3 || parts.len() > 4 {
        return Err(eyre!("Bad member spec '{spec}'. Expected NAME:ORIGIN:BUDGET[:ATTRS]"));
    }

    let budget: u32 = parts[2]
        .parse()
        .context(format!("Bad budget in member spec '{spec}'"))?;

    let mut preferences = AttributeFlags::default();
    if let Some(attrs) = parts.get(3) {
        for raw in attrs.split(',').filter(|s| !s.is_empty()) {
            let attr = Attribute::ALL
                .into_iter()
                .find(|a| a.name().eq_ignore_ascii_case(raw.trim()))
                .ok_or_else(|| eyre!("Unknown attribute '{raw}' in member spec '{spec}'"))?;
            preferences.set(attr, true);
        }
    }

    Ok(MemberProfile {
        name: parts[0].to_string(),
        origin_airport: parts[1].to_uppercase(),
        budget,
        preferences,
    })
}

fn resolve_window(depart: Option<NaiveDate>, ret: Option<NaiveDate>) -> TravelWindow {
    let depart = depart.unwrap_or_else(|| Utc::now().date_naive() + Duration::days(30));
    let ret = ret.unwrap_or(depart + Duration::days(7));
    TravelWindow::new(depart, ret)
}

fn build_provider(name: &str) -> Result<Arc<dyn FlightProvider>> {
    let config = ProviderConfig {
        provider: name.to_string(),
        ..Default::default()
    };
    create_provider(&config).map_err(|e| eyre!(e))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let window = resolve_window(cli.depart, cli.r#return);
    let provider = build_provider(&cli.provider)?;

    match cli.command {
        Command::Search { origin, budget } => cmd_search(provider, &origin.to_uppercase(), &window, budget).await,
        Command::Match { members } => cmd_match(provider, &window, &members).await,
    }
}

async fn cmd_search(
    provider: Arc<dyn FlightProvider>,
    origin: &str,
    window: &TravelWindow,
    budget: u32,
) -> Result<()> {
    println!("Destinations from {} within €{} ({})", origin.bold(), budget, window);
    println!();

    let itineraries = provider
        .search(origin, window, budget)
        .await
        .context("Flight search failed")?;

    if itineraries.is_empty() {
        println!("No destinations found within budget.");
        return Ok(());
    }

    for itinerary in itineraries {
        let stops = if itinerary.is_direct { "direct" } else { "with stops" };
        println!(
            "{} ({}): {} - {} ({})",
            itinerary.destination_name.bold(),
            itinerary.destination_code,
            format!("€{}", itinerary.price).green(),
            itinerary.airline,
            stops
        );
    }

    Ok(())
}

async fn cmd_match(provider: Arc<dyn FlightProvider>, window: &TravelWindow, specs: &[String]) -> Result<()> {
    let members = specs
        .iter()
        .map(|s| parse_member(s))
        .collect::<Result<Vec<_>>>()?;

    println!("Finding matching destinations for {} members ({})", members.len(), window);
    for member in &members {
        let wanted: Vec<&str> = member.preferences.wanted().iter().map(|a| a.name()).collect();
        println!(
            "  {} (from {}, budget €{}): {}",
            member.name.bold(),
            member.origin_airport,
            member.budget,
            if wanted.is_empty() { "no preferences".to_string() } else { wanted.join(", ") }
        );
    }
    println!();

    let group = GroupQuery {
        code: "CLI".to_string(),
        window: *window,
        members,
    };
    let cache = ItineraryCache::new();
    let results = find_best_destinations(&group, provider, &cache).await;

    if results.is_empty() {
        println!("{}", "No destinations found that match all member requirements.".red());
        return Ok(());
    }

    for (rank, result) in results.iter().enumerate() {
        println!("{}. {}", rank + 1, result.destination_key.bold());
        println!("   Overall score:    {:.1}%", result.final_score * 100.0);
        println!("   Preference match: {:.1}%", result.match_score * 100.0);
        println!("   Cost efficiency:  {:.1}%", result.cost_score * 100.0);
        println!("   Total group cost: €{}", result.total_group_cost);

        if !result.per_attribute_detail.is_empty() {
            println!("   Matching attributes:");
            for (attr, detail) in &result.per_attribute_detail {
                println!("     - {} ({:.0}%)", attr, detail.score * 100.0);
                if !detail.matches.is_empty() {
                    println!("       Matches: {}", detail.matches.join(", ").green());
                }
                if !detail.mismatches.is_empty() {
                    println!("       Mismatches: {}", detail.mismatches.join(", ").red());
                }
            }
        }

        println!("   Flights:");
        for (name, flight) in &result.per_member_flights {
            let stops = if flight.is_direct { "direct" } else { "with stops" };
            println!(
                "     {} ({} -> {}): {} - €{} ({})",
                name, flight.origin, result.destination_key, flight.airline, flight.price, stops
            );
        }
        println!("   {}", "-".repeat(35));
    }

    summarize(&results);
    Ok(())
}

fn summarize(results: &[tripmatch::MatchResult]) {
    let mut by_country: BTreeMap<&str, usize> = BTreeMap::new();
    for result in results {
        let iata = result
            .destination_key
            .rsplit('(')
            .next()
            .map(|s| s.trim_end_matches(')'))
            .unwrap_or_default();
        if let Some(airport) = tripmatch::airport_by_iata(iata) {
            *by_country.entry(airport.country.as_str()).or_default() += 1;
        }
    }
    let countries: Vec<String> = by_country.iter().map(|(c, n)| format!("{c} ({n})")).collect();
    println!("{} candidates across: {}", results.len(), countries.join(", "));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_member_full_spec() {
        let member = parse_member("Maria:bcn:500:Beach,Hot").unwrap();
        assert_eq!(member.name, "Maria");
        assert_eq!(member.origin_airport, "BCN");
        assert_eq!(member.budget, 500);
        assert!(member.preferences.beach);
        assert!(member.preferences.hot);
        assert!(!member.preferences.cold);
    }

    #[test]
    fn test_parse_member_without_attributes() {
        let member = parse_member("Alex:MAD:600").unwrap();
        assert!(!member.preferences.any());
    }

    #[test]
    fn test_parse_member_multiword_attribute() {
        let member = parse_member("Eva:LIS:400:Good food,Quiet evenings").unwrap();
        assert!(member.preferences.good_food);
        assert!(member.preferences.quiet_evenings);
    }

    #[test]
    fn test_parse_member_rejects_garbage() {
        assert!(parse_member("no-colons").is_err());
        assert!(parse_member("A:BCN:not-a-number").is_err());
        assert!(parse_member("A:BCN:500:Teleportation").is_err());
    }

    #[test]
    fn test_resolve_window_defaults_to_week_trip() {
        let depart = NaiveDate::from_ymd_opt(2025, 7, 15).unwrap();
        let window = resolve_window(Some(depart), None);
        assert_eq!(window.return_date, NaiveDate::from_ymd_opt(2025, 7, 22).unwrap());
    }

    #[test]
    fn test_cli_parses_match_command() {
        let cli = Cli::parse_from(["tm", "match", "Maria:BCN:500:Beach", "Alex:MAD:600:Beach"]);
        match cli.command {
            Command::Match { members } => assert_eq!(members.len(), 2),
            _ => panic!("Expected Match command"),
        }
    }
}
