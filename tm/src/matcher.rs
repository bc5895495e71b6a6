//! The destination matching engine
//!
//! Pure computation over (group, itinerary data): partition members by
//! origin, search once per origin bounded by the partition's lowest budget,
//! keep only destinations every origin can reach, then score what is left.
//! One bad destination never aborts the run - it is skipped.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::airports::airport_by_iata;
use crate::cache::{CacheKey, ItineraryCache};
use crate::provider::FlightProvider;
use crate::types::{Attribute, AttributeDetail, GroupQuery, Itinerary, MatchResult, MemberFlight};

/// Weight of the preference fit in the final score
const MATCH_WEIGHT: f64 = 0.7;

/// Weight of the cost efficiency in the final score
const COST_WEIGHT: f64 = 0.3;

/// Rank every destination the whole group can reach, best first
///
/// Returns an empty list when the group is empty or no destination is
/// reachable from every origin. Lookup failures for individual origins
/// degrade to empty partitions rather than failing the run.
pub async fn find_best_destinations(
    group: &GroupQuery,
    provider: Arc<dyn FlightProvider>,
    cache: &ItineraryCache,
) -> Vec<MatchResult> {
    if group.members.is_empty() {
        debug!(code = %group.code, "find_best_destinations: empty group");
        return Vec::new();
    }

    // Partition by origin; the lowest budget in a partition bounds its search
    let mut partitions: BTreeMap<String, u32> = BTreeMap::new();
    for member in &group.members {
        partitions
            .entry(member.origin_airport.clone())
            .and_modify(|budget| *budget = (*budget).min(member.budget))
            .or_insert(member.budget);
    }

    debug!(
        code = %group.code,
        members = group.members.len(),
        origins = partitions.len(),
        "find_best_destinations: searching"
    );

    // One concurrent search per origin, through the cache
    let searches = partitions.iter().map(|(origin, &ceiling)| {
        let provider = Arc::clone(&provider);
        let origin = origin.clone();
        let window = group.window;
        async move {
            let key = CacheKey::new(origin.clone(), window, ceiling);
            let itineraries = cache
                .get_or_fetch(key, provider.search(&origin, &window, ceiling))
                .await;
            (origin, ceiling, itineraries)
        }
    });

    // origin -> destination code -> cheapest itinerary within the ceiling
    let mut fares: BTreeMap<String, BTreeMap<String, Itinerary>> = BTreeMap::new();
    for (origin, ceiling, itineraries) in join_all(searches).await {
        let per_destination = fares.entry(origin).or_default();
        for itinerary in itineraries {
            if itinerary.price > ceiling {
                continue;
            }
            match per_destination.get(&itinerary.destination_code) {
                Some(existing) if existing.price <= itinerary.price => {}
                _ => {
                    per_destination.insert(itinerary.destination_code.clone(), itinerary);
                }
            }
        }
    }

    // All-or-nothing coverage: every origin must reach the destination
    let Some(first_origin) = fares.values().next() else {
        return Vec::new();
    };
    let candidates: Vec<String> = first_origin
        .keys()
        .filter(|code| fares.values().all(|m| m.contains_key(*code)))
        .cloned()
        .collect();

    debug!(code = %group.code, candidates = candidates.len(), "find_best_destinations: scoring");

    let mut results: Vec<MatchResult> = candidates
        .iter()
        .filter_map(|code| score_destination(code, &fares, group))
        .collect();

    results.sort_by(|a, b| {
        b.final_score
            .partial_cmp(&a.final_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.destination_key.cmp(&b.destination_key))
    });

    info!(
        code = %group.code,
        ranked = results.len(),
        best = results.first().map(|r| r.destination_key.as_str()).unwrap_or("none"),
        "find_best_destinations: done"
    );
    results
}

/// Score a single candidate destination, or skip it
///
/// Returns `None` when the destination cannot be scored: unknown airport,
/// a missing fare for some member, or a degenerate budget.
fn score_destination(
    code: &str,
    fares: &BTreeMap<String, BTreeMap<String, Itinerary>>,
    group: &GroupQuery,
) -> Option<MatchResult> {
    let Some(airport) = airport_by_iata(code) else {
        warn!(%code, "score_destination: destination not in attribute table, skipping");
        return None;
    };

    // Every member's fare comes from their origin partition
    let mut per_member_flights = BTreeMap::new();
    let mut total_group_cost: u32 = 0;
    for member in &group.members {
        let itinerary = fares.get(&member.origin_airport)?.get(code)?;
        total_group_cost += itinerary.price;
        per_member_flights.insert(
            member.name.clone(),
            MemberFlight {
                origin: member.origin_airport.clone(),
                airline: itinerary.airline.clone(),
                price: itinerary.price,
                is_direct: itinerary.is_direct,
            },
        );
    }

    let member_count = group.members.len();
    let budget_sum: u64 = group.members.iter().map(|m| m.budget as u64).sum();
    if budget_sum == 0 {
        warn!(%code, "score_destination: zero group budget, skipping");
        return None;
    }

    // Preference fit: per attribute anyone wanted, the fraction of the whole
    // group for whom wants -> has holds; averaged over the wanted attributes.
    let mut per_attribute_detail = BTreeMap::new();
    let mut score_sum = 0.0;
    let mut scored_attributes = 0usize;
    for attr in Attribute::ALL {
        let wanting: Vec<&str> = group
            .members
            .iter()
            .filter(|m| m.preferences.has(attr))
            .map(|m| m.name.as_str())
            .collect();
        if wanting.is_empty() {
            continue;
        }

        let destination_has = airport.attributes.has(attr);
        let satisfied = group
            .members
            .iter()
            .filter(|m| !m.preferences.has(attr) || destination_has)
            .count();
        let attr_score = satisfied as f64 / member_count as f64;

        let (matches, mismatches) = if destination_has {
            (wanting.iter().map(|n| n.to_string()).collect(), Vec::new())
        } else {
            (Vec::new(), wanting.iter().map(|n| n.to_string()).collect())
        };

        per_attribute_detail.insert(
            attr.name().to_string(),
            AttributeDetail {
                score: attr_score,
                matches,
                mismatches,
            },
        );
        score_sum += attr_score;
        scored_attributes += 1;
    }
    let match_score = if scored_attributes > 0 {
        score_sum / scored_attributes as f64
    } else {
        0.0
    };

    // Cost efficiency: rewards staying under the average budget, goes
    // negative past it (not clamped).
    let avg_cost = total_group_cost as f64 / member_count as f64;
    let avg_budget = budget_sum as f64 / member_count as f64;
    let cost_score = COST_WEIGHT * (1.0 - avg_cost / avg_budget);

    let final_score = MATCH_WEIGHT * match_score + COST_WEIGHT * cost_score;

    Some(MatchResult {
        destination_key: airport.key(),
        total_group_cost,
        match_score,
        cost_score,
        final_score,
        per_member_flights,
        per_attribute_detail,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderError;
    use crate::types::{AttributeFlags, MemberProfile, TravelWindow};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::collections::HashMap;

    /// Provider answering from a fixed per-origin table; unknown origins fail
    struct ScriptedProvider {
        routes: HashMap<String, Vec<Itinerary>>,
    }

    impl ScriptedProvider {
        fn new(routes: &[(&str, &[(&str, &str, u32)])]) -> Self {
            let routes = routes
                .iter()
                .map(|(origin, fares)| {
                    let itineraries = fares
                        .iter()
                        .map(|(code, name, price)| Itinerary {
                            destination_code: code.to_string(),
                            destination_name: name.to_string(),
                            price: *price,
                            is_direct: true,
                            airline: "Vueling".to_string(),
                        })
                        .collect();
                    (origin.to_string(), itineraries)
                })
                .collect();
            Self { routes }
        }
    }

    #[async_trait]
    impl FlightProvider for ScriptedProvider {
        async fn search(
            &self,
            origin: &str,
            _window: &TravelWindow,
            max_budget: u32,
        ) -> Result<Vec<Itinerary>, ProviderError> {
            match self.routes.get(origin) {
                Some(itineraries) => Ok(itineraries
                    .iter()
                    .filter(|i| i.price <= max_budget)
                    .cloned()
                    .collect()),
                None => Err(ProviderError::ApiError {
                    status: 503,
                    message: format!("no route table for {origin}"),
                }),
            }
        }
    }

    fn window() -> TravelWindow {
        TravelWindow::new(
            NaiveDate::from_ymd_opt(2025, 7, 15).unwrap(),
            NaiveDate::from_ymd_opt(2025, 7, 22).unwrap(),
        )
    }

    fn member(name: &str, origin: &str, budget: u32, wants: &[Attribute]) -> MemberProfile {
        MemberProfile {
            name: name.to_string(),
            origin_airport: origin.to_string(),
            budget,
            preferences: AttributeFlags::from_attrs(wants.iter().copied()),
        }
    }

    fn group(members: Vec<MemberProfile>) -> GroupQuery {
        GroupQuery {
            code: "TEST01".to_string(),
            window: window(),
            members,
        }
    }

    #[tokio::test]
    async fn test_only_mutually_reachable_destination_survives() {
        let provider = Arc::new(ScriptedProvider::new(&[
            ("BCN", &[("LIS", "Lisbon", 180), ("PRG", "Prague", 120)]),
            ("MAD", &[("LIS", "Lisbon", 200), ("VIE", "Vienna", 150)]),
        ]));
        let cache = ItineraryCache::new();
        let group = group(vec![
            member("Maria", "BCN", 500, &[Attribute::Beach]),
            member("Alex", "MAD", 600, &[Attribute::Beach]),
        ]);

        let results = find_best_destinations(&group, provider, &cache).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].destination_key, "Lisbon (LIS)");
        // Beach is the only requested attribute and Lisbon has it
        assert_eq!(results[0].match_score, 1.0);
        assert_eq!(results[0].per_attribute_detail.len(), 1);
    }

    #[tokio::test]
    async fn test_lisbon_scenario_scores_above_point_seven() {
        // Members A (BCN, 500, Beach+Hot) and B (MAD, 600, Beach+Hot);
        // Lisbon reachable from both within budget and flagged Beach, Hot.
        let provider = Arc::new(ScriptedProvider::new(&[
            ("BCN", &[("LIS", "Lisbon", 180)]),
            ("MAD", &[("LIS", "Lisbon", 200)]),
        ]));
        let cache = ItineraryCache::new();
        let group = group(vec![
            member("A", "BCN", 500, &[Attribute::Beach, Attribute::Hot]),
            member("B", "MAD", 600, &[Attribute::Beach, Attribute::Hot]),
        ]);

        let results = find_best_destinations(&group, provider, &cache).await;
        assert_eq!(results.len(), 1);
        let best = &results[0];
        assert_eq!(best.match_score, 1.0);
        assert!(best.final_score > 0.7, "final_score = {}", best.final_score);
        assert_eq!(best.total_group_cost, 380);
        assert_eq!(best.per_member_flights["A"].price, 180);
        assert_eq!(best.per_member_flights["B"].price, 200);
    }

    #[tokio::test]
    async fn test_cost_score_zero_when_cost_equals_budget() {
        // Total cost 500 + 600 = 1100 = sum of budgets -> avg cost == avg budget
        let provider = Arc::new(ScriptedProvider::new(&[
            ("BCN", &[("LIS", "Lisbon", 500)]),
            ("MAD", &[("LIS", "Lisbon", 600)]),
        ]));
        let cache = ItineraryCache::new();
        let group = group(vec![
            member("A", "BCN", 500, &[Attribute::Beach]),
            member("B", "MAD", 600, &[Attribute::Beach]),
        ]);

        let results = find_best_destinations(&group, provider, &cache).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].cost_score, 0.0);
    }

    #[test]
    fn test_cost_score_goes_negative_over_budget_without_clamping() {
        // Budget-bounded lookups keep fares under every ceiling, so the
        // negative branch is only reachable on malformed fare data; the
        // score must pass it through unclamped rather than floor at zero.
        let mut per_destination = BTreeMap::new();
        per_destination.insert(
            "PRG".to_string(),
            Itinerary {
                destination_code: "PRG".to_string(),
                destination_name: "Prague".to_string(),
                price: 700,
                is_direct: true,
                airline: "Vueling".to_string(),
            },
        );
        let mut fares = BTreeMap::new();
        fares.insert("BCN".to_string(), per_destination);

        let group = group(vec![member("A", "BCN", 500, &[Attribute::Historic])]);
        let result = score_destination("PRG", &fares, &group).unwrap();
        assert!(result.cost_score < 0.0);
        assert_eq!(result.cost_score, 0.3 * (1.0 - 700.0 / 500.0));
    }

    #[tokio::test]
    async fn test_partition_uses_minimum_budget() {
        // Two BCN members with budgets 200 and 500: the 250-euro fare must
        // not be offered even though one member could afford it.
        let provider = Arc::new(ScriptedProvider::new(&[(
            "BCN",
            &[("LIS", "Lisbon", 250), ("PRG", "Prague", 150)],
        )]));
        let cache = ItineraryCache::new();
        let group = group(vec![
            member("Cheap", "BCN", 200, &[Attribute::Historic]),
            member("Flush", "BCN", 500, &[Attribute::Historic]),
        ]);

        let results = find_best_destinations(&group, provider.clone(), &cache).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].destination_key, "Prague (PRG)");
        // One shared origin means one cached search
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_one_origin_failure_does_not_abort_others() {
        // ORD has no route table -> provider error -> empty partition.
        // The run completes; all-or-nothing coverage then yields no results.
        let provider = Arc::new(ScriptedProvider::new(&[("BCN", &[("LIS", "Lisbon", 180)])]));
        let cache = ItineraryCache::new();
        let group = group(vec![
            member("A", "BCN", 500, &[Attribute::Beach]),
            member("B", "ORD", 600, &[Attribute::Beach]),
        ]);

        let results = find_best_destinations(&group, provider, &cache).await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_destination_is_skipped_not_fatal() {
        // ZZZ is not in the airport table; Lisbon still ranks
        let provider = Arc::new(ScriptedProvider::new(&[
            ("BCN", &[("LIS", "Lisbon", 180), ("ZZZ", "Nowhere", 90)]),
            ("MAD", &[("LIS", "Lisbon", 200), ("ZZZ", "Nowhere", 90)]),
        ]));
        let cache = ItineraryCache::new();
        let group = group(vec![
            member("A", "BCN", 500, &[Attribute::Beach]),
            member("B", "MAD", 600, &[Attribute::Beach]),
        ]);

        let results = find_best_destinations(&group, provider, &cache).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].destination_key, "Lisbon (LIS)");
    }

    #[tokio::test]
    async fn test_vacuous_satisfaction_counts_whole_group() {
        // Only A wants Nightlife and Prague lacks it: the attribute score is
        // the fraction of the whole group satisfied, i.e. 2/3.
        let provider = Arc::new(ScriptedProvider::new(&[(
            "BCN",
            &[("PRG", "Prague", 150)],
        )]));
        let cache = ItineraryCache::new();
        let group = group(vec![
            member("A", "BCN", 500, &[Attribute::Mountain]),
            member("B", "BCN", 500, &[]),
            member("C", "BCN", 500, &[]),
        ]);

        let results = find_best_destinations(&group, provider, &cache).await;
        assert_eq!(results.len(), 1);
        let detail = &results[0].per_attribute_detail["Mountain"];
        assert!((detail.score - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(detail.mismatches, vec!["A".to_string()]);
        assert!(detail.matches.is_empty());
        assert!((results[0].match_score - 2.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_attributes_nobody_wanted_are_excluded() {
        let provider = Arc::new(ScriptedProvider::new(&[("BCN", &[("LIS", "Lisbon", 180)])]));
        let cache = ItineraryCache::new();
        let group = group(vec![member("A", "BCN", 500, &[Attribute::Beach])]);

        let results = find_best_destinations(&group, provider, &cache).await;
        assert_eq!(results[0].per_attribute_detail.len(), 1);
        assert!(results[0].per_attribute_detail.contains_key("Beach"));
    }

    #[tokio::test]
    async fn test_no_preferences_at_all_scores_zero_match() {
        let provider = Arc::new(ScriptedProvider::new(&[("BCN", &[("LIS", "Lisbon", 180)])]));
        let cache = ItineraryCache::new();
        let group = group(vec![member("A", "BCN", 500, &[])]);

        let results = find_best_destinations(&group, provider, &cache).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].match_score, 0.0);
        assert!(results[0].per_attribute_detail.is_empty());
    }

    #[tokio::test]
    async fn test_equal_scores_break_ties_lexically() {
        // Dubrovnik and Split carry identical attribute sets here (Hot,
        // Beach, Historic differ only on Relax/Nightlife which nobody
        // wants) and identical fares -> identical scores.
        let provider = Arc::new(ScriptedProvider::new(&[(
            "BCN",
            &[("SPU", "Split", 150), ("DBV", "Dubrovnik", 150)],
        )]));
        let cache = ItineraryCache::new();
        let group = group(vec![member("A", "BCN", 500, &[Attribute::Beach])]);

        let results = find_best_destinations(&group, provider, &cache).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].final_score, results[1].final_score);
        assert_eq!(results[0].destination_key, "Dubrovnik (DBV)");
        assert_eq!(results[1].destination_key, "Split (SPU)");
    }

    #[tokio::test]
    async fn test_empty_group_returns_nothing() {
        let provider = Arc::new(ScriptedProvider::new(&[]));
        let cache = ItineraryCache::new();
        let results = find_best_destinations(&group(vec![]), provider, &cache).await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_ranked_best_first() {
        // Lisbon fits both preferences, Prague neither -> Lisbon first
        let provider = Arc::new(ScriptedProvider::new(&[(
            "BCN",
            &[("LIS", "Lisbon", 180), ("PRG", "Prague", 180)],
        )]));
        let cache = ItineraryCache::new();
        let group = group(vec![member("A", "BCN", 500, &[Attribute::Beach, Attribute::Hot])]);

        let results = find_best_destinations(&group, provider, &cache).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].destination_key, "Lisbon (LIS)");
        assert!(results[0].final_score > results[1].final_score);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn arb_flags() -> impl Strategy<Value = AttributeFlags> {
            proptest::collection::vec(any::<bool>(), 11).prop_map(|bits| {
                let mut flags = AttributeFlags::default();
                for (attr, bit) in Attribute::ALL.into_iter().zip(bits) {
                    flags.set(attr, bit);
                }
                flags
            })
        }

        proptest! {
            #[test]
            fn match_score_stays_in_unit_interval(
                prefs in proptest::collection::vec(arb_flags(), 1..6),
                budget in 100u32..1000,
                price in 1u32..100,
            ) {
                let members: Vec<MemberProfile> = prefs
                    .into_iter()
                    .enumerate()
                    .map(|(i, preferences)| MemberProfile {
                        name: format!("m{i}"),
                        origin_airport: "BCN".to_string(),
                        budget,
                        preferences,
                    })
                    .collect();
                let group = GroupQuery {
                    code: "PROP01".to_string(),
                    window: TravelWindow::new(
                        chrono::NaiveDate::from_ymd_opt(2025, 7, 15).unwrap(),
                        chrono::NaiveDate::from_ymd_opt(2025, 7, 22).unwrap(),
                    ),
                    members,
                };

                let mut fares = BTreeMap::new();
                let mut per_destination = BTreeMap::new();
                per_destination.insert(
                    "LIS".to_string(),
                    Itinerary {
                        destination_code: "LIS".to_string(),
                        destination_name: "Lisbon".to_string(),
                        price,
                        is_direct: true,
                        airline: "TAP Air Portugal".to_string(),
                    },
                );
                fares.insert("BCN".to_string(), per_destination);

                let result = score_destination("LIS", &fares, &group).unwrap();
                prop_assert!((0.0..=1.0).contains(&result.match_score));
                prop_assert!(result.cost_score <= COST_WEIGHT);
                for detail in result.per_attribute_detail.values() {
                    prop_assert!((0.0..=1.0).contains(&detail.score));
                }
            }
        }
    }
}
