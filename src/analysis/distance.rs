//! Geographic link distance rankings.
//!
//! Two "longest link" views:
//! - direct links: one entry per node pair, great-circle distance between
//!   the two nodes' latest known positions
//! - indirect paths: one exemplar traceroute per (origin, destination),
//!   distance summed hop by hop along its forward route
//!
//! Both are sorted by distance (unknown distances last), ties going to the
//! most recently observed entry, and are capped and time-boxed.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::link_stats::aggregate_links;
use super::locations::LocationSource;
use super::query::{AnalysisQuery, QueryBudget};
use super::types::*;

/// Mean Earth radius used for haversine distances
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance between two points in degrees
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    // Rounding can push `a` just past 1.0 near antipodes
    let a = ((d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2))
        .clamp(0.0, 1.0);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_KM * c
}

/// Distance between two nodes' latest positions, if both are known
pub fn node_distance_km(
    locations: &impl LocationSource,
    a: NodeId,
    b: NodeId,
) -> Option<f64> {
    let la = locations.location_of(a, None)?;
    let lb = locations.location_of(b, None)?;
    Some(haversine_km(la.latitude, la.longitude, lb.latitude, lb.longitude))
}

/// One row of the direct-link ranking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectLinkEntry {
    pub node_a: NodeId,
    pub node_b: NodeId,
    pub distance_km: Option<f64>,
    pub avg_snr: Option<f64>,
    pub sample_count: usize,
    pub classification: LinkClassification,
    pub last_seen: Timestamp,
}

/// One row of the indirect-path ranking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndirectPathEntry {
    pub from_node: NodeId,
    pub to_node: NodeId,
    pub route: Vec<NodeId>,
    pub total_distance_km: Option<f64>,
    pub hop_count: usize,
    pub avg_snr: Option<f64>,
    pub is_complete: bool,
    pub packet_id: Option<u32>,
    pub observed_at: Timestamp,
}

/// A ranked, capped result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedLinks<T> {
    pub entries: Vec<T>,
    /// Candidates examined before filtering and capping
    pub considered: usize,
    /// The time budget ran out before every candidate was examined
    pub truncated: bool,
}

/// Distance descending with unknown distances last, then most recent first
fn rank_order(da: Option<f64>, ta: Timestamp, db: Option<f64>, tb: Timestamp) -> Ordering {
    let by_distance = match (da, db) {
        (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_distance.then_with(|| tb.partial_cmp(&ta).unwrap_or(Ordering::Equal))
}

/// Rank link aggregates by the distance between their endpoints
pub fn rank_direct_links(
    aggregates: &[LinkAggregate],
    locations: &impl LocationSource,
    query: &AnalysisQuery,
    default_cap: usize,
    budget: &QueryBudget,
) -> RankedLinks<DirectLinkEntry> {
    let mut entries = Vec::new();
    let mut considered = 0;
    let mut truncated = false;

    for link in aggregates {
        if budget.is_exhausted() {
            truncated = true;
            log::warn!(
                "Direct link ranking hit its time budget after {} of {} links",
                considered,
                aggregates.len()
            );
            break;
        }
        considered += 1;

        if !query.matches_link(link.node_a, link.node_b) || !query.passes_snr(link.avg_snr) {
            continue;
        }
        let distance_km = node_distance_km(locations, link.node_a, link.node_b);
        if !query.passes_distance(distance_km) {
            continue;
        }

        entries.push(DirectLinkEntry {
            node_a: link.node_a,
            node_b: link.node_b,
            distance_km,
            avg_snr: link.avg_snr,
            sample_count: link.sample_count,
            classification: link.classification,
            last_seen: link.last_seen,
        });
    }

    entries.sort_by(|a, b| rank_order(a.distance_km, a.last_seen, b.distance_km, b.last_seen));
    entries.truncate(query.limit_or(default_cap));

    RankedLinks {
        entries,
        considered,
        truncated,
    }
}

/// Direct-link ranking straight from traceroutes, honouring the query's
/// time range and gateway filter before aggregation
pub fn longest_direct_links(
    records: &[TracerouteRecord],
    locations: &impl LocationSource,
    query: &AnalysisQuery,
    default_cap: usize,
    budget: &QueryBudget,
) -> RankedLinks<DirectLinkEntry> {
    let selected: Vec<TracerouteRecord> = records
        .iter()
        .filter(|r| query.matches_time(r.timestamp))
        .filter(|r| query.gateway.as_ref().map_or(true, |g| &r.gateway_id == g))
        .cloned()
        .collect();
    let aggregates = aggregate_links(&selected);
    rank_direct_links(&aggregates, locations, query, default_cap, budget)
}

/// Pick one exemplar per (origin, destination): complete routes beat
/// incomplete ones, then the most recent wins
fn select_exemplars<'a>(
    records: &'a [TracerouteRecord],
    query: &AnalysisQuery,
) -> Vec<&'a TracerouteRecord> {
    let mut best: HashMap<(NodeId, NodeId), &TracerouteRecord> = HashMap::new();

    for record in records {
        if record.hop_count() < 2 || !query.matches_route(record) {
            continue;
        }
        let key = (record.origin, record.destination);
        match best.get(&key) {
            Some(current)
                if (current.is_complete, current.timestamp)
                    .partial_cmp(&(record.is_complete, record.timestamp))
                    != Some(Ordering::Less) => {}
            _ => {
                best.insert(key, record);
            }
        }
    }

    let mut exemplars: Vec<&TracerouteRecord> = best.into_values().collect();
    exemplars.sort_by_key(|r| (r.origin, r.destination));
    exemplars
}

/// Sum of hop distances along a route; unknown if any position is missing
fn route_distance_km(route: &[NodeId], locations: &impl LocationSource) -> Option<f64> {
    route
        .windows(2)
        .map(|pair| node_distance_km(locations, pair[0], pair[1]))
        .sum()
}

/// Rank multi-hop routes by total distance
pub fn rank_indirect_paths(
    records: &[TracerouteRecord],
    locations: &impl LocationSource,
    query: &AnalysisQuery,
    default_cap: usize,
    budget: &QueryBudget,
) -> RankedLinks<IndirectPathEntry> {
    let exemplars = select_exemplars(records, query);
    let mut entries = Vec::new();
    let mut considered = 0;
    let mut truncated = false;

    for record in &exemplars {
        if budget.is_exhausted() {
            truncated = true;
            log::warn!(
                "Indirect path ranking hit its time budget after {} of {} routes",
                considered,
                exemplars.len()
            );
            break;
        }
        considered += 1;

        let route = record.forward_route();
        let total_distance_km = route_distance_km(&route, locations);
        let snrs: Vec<f64> = record.forward.iter().filter_map(|h| h.snr).collect();
        let avg_snr = crate::utils::stats::mean(&snrs);

        if !query.passes_distance(total_distance_km) || !query.passes_snr(avg_snr) {
            continue;
        }

        entries.push(IndirectPathEntry {
            from_node: record.origin,
            to_node: record.destination,
            hop_count: record.hop_count(),
            route,
            total_distance_km,
            avg_snr,
            is_complete: record.is_complete,
            packet_id: record.packet_id,
            observed_at: record.timestamp,
        });
    }

    entries.sort_by(|a, b| {
        rank_order(
            a.total_distance_km,
            a.observed_at,
            b.total_distance_km,
            b.observed_at,
        )
    });
    entries.truncate(query.limit_or(default_cap));

    RankedLinks {
        entries,
        considered,
        truncated,
    }
}
