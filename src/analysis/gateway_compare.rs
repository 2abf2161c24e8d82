//! Gateway signal comparison.
//!
//! Compares what two gateways measured for the packets both of them heard.
//! A packet only counts when both receptions carry the same hop_limit: a
//! different value means one gateway heard a rebroadcast from another
//! node, and its signal says nothing about the original sender's link.
//! Deltas are always gateway2 − gateway1.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::AnalysisError;
use super::query::{AnalysisQuery, QueryBudget};
use super::types::*;
use crate::utils::stats::{mean, median, percentile};
use crate::utils::time::format_timestamp;

/// One packet heard by both gateways
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommonPacket {
    pub packet_id: Option<u32>,
    pub from_node: NodeId,
    pub timestamp: Timestamp,
    pub hop_limit: u8,
    pub rssi1: Option<i32>,
    pub rssi2: Option<i32>,
    pub snr1: Option<f64>,
    pub snr2: Option<f64>,
    pub rssi_delta: Option<i64>,
    pub snr_delta: Option<f64>,
}

/// Average signal one gateway measured over the common packets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewaySignalSummary {
    pub gateway_id: GatewayId,
    pub avg_rssi: Option<f64>,
    pub avg_snr: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonSummary {
    pub common_packets: usize,
    /// Heard by both, dropped for differing hop_limit
    pub excluded_hop_mismatch: usize,
    pub avg_rssi_delta: Option<f64>,
    pub avg_snr_delta: Option<f64>,
    pub median_snr_delta: Option<f64>,
    pub p90_snr_delta: Option<f64>,
    pub gateway1: GatewaySignalSummary,
    pub gateway2: GatewaySignalSummary,
}

/// Paired chart point, time ordered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub timestamp: Timestamp,
    pub rssi1: Option<i32>,
    pub rssi2: Option<i32>,
    pub snr1: Option<f64>,
    pub snr2: Option<f64>,
}

/// Fixed-width time bin of average deltas
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonBin {
    pub bin_start: Timestamp,
    pub label: String,
    pub count: usize,
    pub avg_rssi_delta: Option<f64>,
    pub avg_snr_delta: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayComparison {
    pub summary: ComparisonSummary,
    pub series: Vec<SeriesPoint>,
    pub bins: Vec<ComparisonBin>,
    /// Most recent first, capped
    pub packets: Vec<CommonPacket>,
    pub truncated: bool,
}

fn validate_pair(gateway1: &GatewayId, gateway2: &GatewayId) -> Result<(), AnalysisError> {
    if gateway1.as_str().trim().is_empty() || gateway2.as_str().trim().is_empty() {
        return Err(AnalysisError::invalid_comparison("both gateway ids are required"));
    }
    if gateway1 == gateway2 {
        return Err(AnalysisError::invalid_comparison(format!(
            "cannot compare gateway {} with itself",
            gateway1
        )));
    }
    Ok(())
}

/// Compare two gateways over the correlated packets both of them heard.
///
/// The query's time range and `from_node` filter select packets; its
/// `max_results` caps the packet table.
pub fn compare_gateways(
    packets: &[CanonicalPacket],
    gateway1: &GatewayId,
    gateway2: &GatewayId,
    query: &AnalysisQuery,
    bin_width: Duration,
    default_cap: usize,
    budget: &QueryBudget,
) -> Result<GatewayComparison, AnalysisError> {
    validate_pair(gateway1, gateway2)?;

    let mut common: Vec<CommonPacket> = Vec::new();
    let mut excluded_hop_mismatch = 0;
    let mut truncated = false;

    for packet in packets {
        if budget.is_exhausted() {
            truncated = true;
            log::warn!(
                "Gateway comparison {} vs {} hit its time budget after {} common packets",
                gateway1,
                gateway2,
                common.len()
            );
            break;
        }

        let primary = &packet.primary;
        if !query.matches_time(primary.timestamp)
            || query.from_node.map_or(false, |n| primary.from_node != n)
        {
            continue;
        }

        let (Some(r1), Some(r2)) = (packet.reception_for(gateway1), packet.reception_for(gateway2))
        else {
            continue;
        };
        if r1.hop_limit != r2.hop_limit {
            excluded_hop_mismatch += 1;
            continue;
        }

        common.push(CommonPacket {
            packet_id: primary.packet_id,
            from_node: primary.from_node,
            timestamp: primary.timestamp,
            hop_limit: r1.hop_limit,
            rssi1: r1.rssi,
            rssi2: r2.rssi,
            snr1: r1.snr,
            snr2: r2.snr,
            rssi_delta: r1.rssi.zip(r2.rssi).map(|(a, b)| i64::from(b) - i64::from(a)),
            snr_delta: r1.snr.zip(r2.snr).map(|(a, b)| b - a),
        });
    }

    common.sort_by(|a, b| {
        a.timestamp
            .partial_cmp(&b.timestamp)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    log::info!(
        "{} packets heard by both {} and {} ({} excluded for hop_limit mismatch)",
        common.len(),
        gateway1,
        gateway2,
        excluded_hop_mismatch
    );

    let summary = summarize(&common, gateway1, gateway2, excluded_hop_mismatch);
    let series = common
        .iter()
        .map(|p| SeriesPoint {
            timestamp: p.timestamp,
            rssi1: p.rssi1,
            rssi2: p.rssi2,
            snr1: p.snr1,
            snr2: p.snr2,
        })
        .collect();
    let bins = bin_deltas(&common, bin_width);

    let cap = query.limit_or(default_cap);
    let packets_table: Vec<CommonPacket> = common.iter().rev().take(cap).cloned().collect();

    Ok(GatewayComparison {
        summary,
        series,
        bins,
        packets: packets_table,
        truncated,
    })
}

fn summarize(
    common: &[CommonPacket],
    gateway1: &GatewayId,
    gateway2: &GatewayId,
    excluded_hop_mismatch: usize,
) -> ComparisonSummary {
    let rssi_deltas: Vec<f64> = common.iter().filter_map(|p| p.rssi_delta).map(|d| d as f64).collect();
    let snr_deltas: Vec<f64> = common.iter().filter_map(|p| p.snr_delta).collect();

    let side = |gateway: &GatewayId, rssi: fn(&CommonPacket) -> Option<i32>, snr: fn(&CommonPacket) -> Option<f64>| {
        let rssis: Vec<f64> = common.iter().filter_map(rssi).map(f64::from).collect();
        let snrs: Vec<f64> = common.iter().filter_map(snr).collect();
        GatewaySignalSummary {
            gateway_id: gateway.clone(),
            avg_rssi: mean(&rssis),
            avg_snr: mean(&snrs),
        }
    };

    ComparisonSummary {
        common_packets: common.len(),
        excluded_hop_mismatch,
        avg_rssi_delta: mean(&rssi_deltas),
        avg_snr_delta: mean(&snr_deltas),
        median_snr_delta: median(&snr_deltas),
        p90_snr_delta: percentile(&snr_deltas, 90.0),
        gateway1: side(gateway1, |p| p.rssi1, |p| p.snr1),
        gateway2: side(gateway2, |p| p.rssi2, |p| p.snr2),
    }
}

/// Average deltas per fixed-width bin; `common` must be time ordered
fn bin_deltas(common: &[CommonPacket], bin_width: Duration) -> Vec<ComparisonBin> {
    let width = bin_width.as_secs_f64();
    if width <= 0.0 {
        return Vec::new();
    }

    let mut bins: BTreeMap<i64, (Vec<f64>, Vec<f64>)> = BTreeMap::new();
    for packet in common {
        let index = (packet.timestamp / width).floor() as i64;
        let (rssi, snr) = bins.entry(index).or_default();
        if let Some(d) = packet.rssi_delta {
            rssi.push(d as f64);
        }
        if let Some(d) = packet.snr_delta {
            snr.push(d);
        }
    }

    bins.into_iter()
        .map(|(index, (rssi, snr))| {
            let bin_start = index as f64 * width;
            ComparisonBin {
                bin_start,
                label: format_timestamp(bin_start),
                count: rssi.len().max(snr.len()),
                avg_rssi_delta: mean(&rssi),
                avg_snr_delta: mean(&snr),
            }
        })
        .collect()
}
