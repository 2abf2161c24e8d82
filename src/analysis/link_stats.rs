//! Per-link signal statistics.
//!
//! Folds every hop of every decoded traceroute into one aggregate per
//! unordered node pair. The pair is canonicalized with the smaller node id
//! first, so A→B and B→A samples land in the same aggregate while the
//! orientation of each sample is still counted.

use std::collections::BTreeMap;

use rayon::prelude::*;

use super::query::AnalysisQuery;
use super::types::*;

/// Running statistics for one node pair
#[derive(Debug, Clone)]
struct LinkAccumulator {
    sample_count: usize,
    snr_count: usize,
    snr_sum: f64,
    min_snr: Option<f64>,
    max_snr: Option<f64>,
    directions: DirectionHistogram,
    a_to_b: usize,
    b_to_a: usize,
    first_seen: Timestamp,
    last_seen: Timestamp,
}

impl LinkAccumulator {
    fn new(ts: Timestamp) -> Self {
        Self {
            sample_count: 0,
            snr_count: 0,
            snr_sum: 0.0,
            min_snr: None,
            max_snr: None,
            directions: DirectionHistogram::default(),
            a_to_b: 0,
            b_to_a: 0,
            first_seen: ts,
            last_seen: ts,
        }
    }

    fn add_snr(&mut self, snr: f64) {
        self.snr_count += 1;
        self.snr_sum += snr;
        self.min_snr = Some(self.min_snr.map_or(snr, |m| m.min(snr)));
        self.max_snr = Some(self.max_snr.map_or(snr, |m| m.max(snr)));
    }

    fn merge(&mut self, other: LinkAccumulator) {
        self.sample_count += other.sample_count;
        self.snr_count += other.snr_count;
        self.snr_sum += other.snr_sum;
        self.min_snr = min_opt(self.min_snr, other.min_snr);
        self.max_snr = max_opt(self.max_snr, other.max_snr);
        self.directions.forward += other.directions.forward;
        self.directions.return_leg += other.directions.return_leg;
        self.a_to_b += other.a_to_b;
        self.b_to_a += other.b_to_a;
        self.first_seen = self.first_seen.min(other.first_seen);
        self.last_seen = self.last_seen.max(other.last_seen);
    }

    fn finish(&self, node_a: NodeId, node_b: NodeId) -> LinkAggregate {
        let avg_snr = if self.snr_count > 0 {
            Some(self.snr_sum / self.snr_count as f64)
        } else {
            None
        };
        let classification = if self.a_to_b > 0 && self.b_to_a > 0 {
            LinkClassification::Bidirectional
        } else {
            LinkClassification::Unidirectional
        };
        LinkAggregate {
            node_a,
            node_b,
            sample_count: self.sample_count,
            snr_sample_count: self.snr_count,
            avg_snr,
            min_snr: self.min_snr,
            max_snr: self.max_snr,
            directions: self.directions,
            a_to_b: self.a_to_b,
            b_to_a: self.b_to_a,
            first_seen: self.first_seen,
            last_seen: self.last_seen,
            classification,
        }
    }
}

fn min_opt(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.min(y)),
        (x, None) => x,
        (None, y) => y,
    }
}

fn max_opt(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (x, None) => x,
        (None, y) => y,
    }
}

/// Canonical key of an unordered pair: smaller id first
pub fn link_key(x: NodeId, y: NodeId) -> (NodeId, NodeId) {
    if x <= y {
        (x, y)
    } else {
        (y, x)
    }
}

/// Accumulates hop observations into link aggregates
#[derive(Debug, Clone, Default)]
pub struct LinkStatsAggregator {
    links: BTreeMap<(NodeId, NodeId), LinkAccumulator>,
    hops_seen: usize,
}

impl LinkStatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one hop observed at `ts`
    pub fn observe(&mut self, hop: &HopObservation, ts: Timestamp) {
        // A node cannot hear itself
        if hop.from_node == hop.to_node {
            return;
        }
        let key = link_key(hop.from_node, hop.to_node);
        let acc = self
            .links
            .entry(key)
            .or_insert_with(|| LinkAccumulator::new(ts));

        acc.sample_count += 1;
        acc.first_seen = acc.first_seen.min(ts);
        acc.last_seen = acc.last_seen.max(ts);
        acc.directions.record(hop.direction);
        if hop.from_node == key.0 {
            acc.a_to_b += 1;
        } else {
            acc.b_to_a += 1;
        }
        if let Some(snr) = hop.snr {
            acc.add_snr(snr);
        }
        self.hops_seen += 1;
    }

    /// Fold every hop of a record, both legs
    pub fn observe_record(&mut self, record: &TracerouteRecord) {
        for hop in record.all_hops() {
            self.observe(hop, record.timestamp);
        }
    }

    /// Combine two partial aggregations
    pub fn merge(mut self, other: LinkStatsAggregator) -> Self {
        self.hops_seen += other.hops_seen;
        for (key, acc) in other.links {
            match self.links.get_mut(&key) {
                Some(existing) => existing.merge(acc),
                None => {
                    self.links.insert(key, acc);
                }
            }
        }
        self
    }

    pub fn hops_seen(&self) -> usize {
        self.hops_seen
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Aggregate for a pair, in either order
    pub fn get(&self, x: NodeId, y: NodeId) -> Option<LinkAggregate> {
        let key = link_key(x, y);
        self.links.get(&key).map(|acc| acc.finish(key.0, key.1))
    }

    /// All aggregates, ordered by node pair
    pub fn finish(&self) -> Vec<LinkAggregate> {
        self.links
            .iter()
            .map(|((a, b), acc)| acc.finish(*a, *b))
            .collect()
    }
}

/// Aggregate every hop of the given records in parallel.
///
/// Result is ordered by node pair and does not depend on record order.
pub fn aggregate_links(records: &[TracerouteRecord]) -> Vec<LinkAggregate> {
    let aggregator = records
        .par_iter()
        .fold(LinkStatsAggregator::new, |mut agg, record| {
            agg.observe_record(record);
            agg
        })
        .reduce(LinkStatsAggregator::new, LinkStatsAggregator::merge);

    log::debug!(
        "Aggregated {} hops from {} traceroutes into {} links",
        aggregator.hops_seen(),
        records.len(),
        aggregator.link_count()
    );
    aggregator.finish()
}

/// Link view for the hop analysis page: records filtered by time and
/// gateway, links filtered by node and SNR, busiest links first, capped.
pub fn link_view(
    records: &[TracerouteRecord],
    query: &AnalysisQuery,
    default_cap: usize,
) -> Vec<LinkAggregate> {
    let selected: Vec<TracerouteRecord> = records
        .iter()
        .filter(|r| query.matches_time(r.timestamp))
        .filter(|r| query.gateway.as_ref().map_or(true, |g| &r.gateway_id == g))
        .cloned()
        .collect();

    let mut links: Vec<LinkAggregate> = aggregate_links(&selected)
        .into_iter()
        .filter(|l| query.matches_link(l.node_a, l.node_b))
        .filter(|l| query.passes_snr(l.avg_snr))
        .collect();

    links.sort_by(|a, b| {
        b.sample_count.cmp(&a.sample_count).then_with(|| {
            b.last_seen
                .partial_cmp(&a.last_seen)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
    });
    links.truncate(query.limit_or(default_cap));
    links
}
