//! Query parameters shared by every analytic operation.
//!
//! All filters are optional and combine with AND.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::types::*;

/// Half-open time range `[start, end)`; either bound may be open
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Option<Timestamp>,
    pub end: Option<Timestamp>,
}

impl TimeRange {
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    pub fn since(start: Timestamp) -> Self {
        Self {
            start: Some(start),
            end: None,
        }
    }

    /// Check if a timestamp falls within this range
    pub fn contains(&self, ts: Timestamp) -> bool {
        self.start.map_or(true, |s| ts >= s) && self.end.map_or(true, |e| ts < e)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisQuery {
    pub time_range: Option<TimeRange>,
    pub from_node: Option<NodeId>,
    pub to_node: Option<NodeId>,
    pub gateway: Option<GatewayId>,
    pub min_distance_km: Option<f64>,
    pub min_snr: Option<f64>,
    pub max_results: Option<usize>,
}

impl AnalysisQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn time_range(mut self, range: TimeRange) -> Self {
        self.time_range = Some(range);
        self
    }

    pub fn from_node(mut self, node: NodeId) -> Self {
        self.from_node = Some(node);
        self
    }

    pub fn to_node(mut self, node: NodeId) -> Self {
        self.to_node = Some(node);
        self
    }

    pub fn gateway(mut self, gateway: GatewayId) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn min_distance_km(mut self, km: f64) -> Self {
        self.min_distance_km = Some(km);
        self
    }

    pub fn min_snr(mut self, snr: f64) -> Self {
        self.min_snr = Some(snr);
        self
    }

    pub fn max_results(mut self, cap: usize) -> Self {
        self.max_results = Some(cap);
        self
    }

    /// Result cap, falling back to the configured default
    pub fn limit_or(&self, default: usize) -> usize {
        self.max_results.unwrap_or(default)
    }

    pub fn matches_time(&self, ts: Timestamp) -> bool {
        self.time_range.map_or(true, |r| r.contains(ts))
    }

    /// Time, sender, destination and gateway filters against one capture
    pub fn matches_capture(&self, capture: &PacketCapture) -> bool {
        self.matches_time(capture.timestamp)
            && self.from_node.map_or(true, |n| capture.from_node == n)
            && self.to_node.map_or(true, |n| capture.to_node == n)
            && self.gateway.as_ref().map_or(true, |g| &capture.gateway_id == g)
    }

    /// Endpoint filters against a traceroute's origin and destination
    pub fn matches_route(&self, record: &TracerouteRecord) -> bool {
        self.matches_time(record.timestamp)
            && self.from_node.map_or(true, |n| record.origin == n)
            && self.to_node.map_or(true, |n| record.destination == n)
            && self.gateway.as_ref().map_or(true, |g| &record.gateway_id == g)
    }

    /// Node filters against an unordered link: each named node must be an endpoint
    pub fn matches_link(&self, a: NodeId, b: NodeId) -> bool {
        let has = |n: NodeId| a == n || b == n;
        self.from_node.map_or(true, has) && self.to_node.map_or(true, has)
    }

    /// Distance threshold; an unknown distance never passes a set threshold
    pub fn passes_distance(&self, distance_km: Option<f64>) -> bool {
        match self.min_distance_km {
            None => true,
            Some(min) => distance_km.map_or(false, |d| d >= min),
        }
    }

    /// SNR threshold; an unknown SNR never passes a set threshold
    pub fn passes_snr(&self, snr: Option<f64>) -> bool {
        match self.min_snr {
            None => true,
            Some(min) => snr.map_or(false, |s| s >= min),
        }
    }
}

/// Time box for long-running full-history scans
#[derive(Debug, Clone, Copy)]
pub struct QueryBudget {
    deadline: Option<Instant>,
}

impl QueryBudget {
    pub fn new(limit: Duration) -> Self {
        Self {
            deadline: Instant::now().checked_add(limit),
        }
    }

    pub fn unlimited() -> Self {
        Self { deadline: None }
    }

    pub fn is_exhausted(&self) -> bool {
        self.deadline.map_or(false, |d| Instant::now() >= d)
    }
}

impl Default for QueryBudget {
    fn default() -> Self {
        Self::unlimited()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_range_contains() {
        let range = TimeRange::new(100.0, 200.0);
        assert!(!range.contains(99.9));
        assert!(range.contains(100.0));
        assert!(range.contains(150.0));
        assert!(!range.contains(200.0)); // End is exclusive

        let open = TimeRange::since(50.0);
        assert!(open.contains(1e12));
        assert!(!open.contains(49.0));
    }

    #[test]
    fn test_thresholds_reject_unknown_values() {
        let query = AnalysisQuery::new().min_distance_km(10.0).min_snr(-5.0);
        assert!(query.passes_distance(Some(10.0)));
        assert!(!query.passes_distance(Some(9.9)));
        assert!(!query.passes_distance(None));
        assert!(query.passes_snr(Some(-5.0)));
        assert!(!query.passes_snr(None));

        let open = AnalysisQuery::new();
        assert!(open.passes_distance(None));
        assert!(open.passes_snr(None));
    }

    #[test]
    fn test_matches_link_is_unordered() {
        let query = AnalysisQuery::new().from_node(NodeId(2)).to_node(NodeId(1));
        assert!(query.matches_link(NodeId(1), NodeId(2)));
        assert!(!query.matches_link(NodeId(1), NodeId(3)));
    }

    #[test]
    fn test_zero_budget_is_exhausted() {
        assert!(QueryBudget::new(Duration::ZERO).is_exhausted());
        assert!(!QueryBudget::unlimited().is_exhausted());
    }
}
