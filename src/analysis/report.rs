//! Report generation for mesh analysis views.
//!
//! Every view can be written as pretty JSON or rendered as an 80-column
//! text report.

use std::fs;
use std::path::Path;

use color_eyre::eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use super::correlator::CorrelatorStats;
use super::distance::{DirectLinkEntry, IndirectPathEntry, RankedLinks};
use super::gateway_compare::GatewayComparison;
use super::traceroute::DecodedBatch;
use super::types::*;
use crate::utils::time::format_timestamp;

/// Generate JSON report
pub fn generate_json_report<T: Serialize + ?Sized>(report: &T, output_path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(report)
        .context("Failed to serialize report to JSON")?;

    fs::write(output_path, json)
        .with_context(|| format!("Failed to write JSON report to {}", output_path.display()))?;

    log::info!("JSON report written to {}", output_path.display());
    Ok(())
}

/// Generate human-readable text report from rendered lines
pub fn generate_text_report(lines: &[String], output_path: &Path) -> Result<()> {
    let content = lines.join("\n");
    fs::write(output_path, content)
        .with_context(|| format!("Failed to write text report to {}", output_path.display()))?;

    log::info!("Text report written to {}", output_path.display());
    Ok(())
}

fn header(lines: &mut Vec<String>, title: &str) {
    lines.push("=".repeat(80));
    lines.push(format!("{:^80}", title));
    lines.push("=".repeat(80));
    lines.push(String::new());
}

fn footer(lines: &mut Vec<String>) {
    lines.push("=".repeat(80));
}

fn db(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{:.2} dB", v))
}

fn km(value: Option<f64>) -> String {
    value.map_or_else(|| "unknown".to_string(), |v| format!("{:.1} km", v))
}

fn dbm(value: Option<i32>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{} dBm", v))
}

/// Correlated packets with their receptions
pub fn render_packets(packets: &[CanonicalPacket], directory: &NodeDirectory) -> Vec<String> {
    let mut lines = Vec::new();
    header(&mut lines, "CORRELATED PACKETS");

    for packet in packets {
        let p = &packet.primary;
        let id = p.packet_id.map_or_else(|| "-".to_string(), |id| id.to_string());
        lines.push(format!(
            "[{}] packet {} from {} to {} ({}) via {} gateway(s), {}{}",
            format_timestamp(p.timestamp),
            id,
            directory.display_name(p.from_node),
            p.to_node,
            p.port,
            packet.gateway_count(),
            packet.method,
            if packet.ambiguous { ", ambiguous" } else { "" }
        ));
        lines.push(format!(
            "    {:<14} {:>9} {:>10} hops={} (primary)",
            p.gateway_id,
            dbm(p.rssi),
            db(p.snr),
            p.hops_taken()
        ));
        for other in &packet.other_receptions {
            let c = &other.capture;
            lines.push(format!(
                "    {:<14} {:>9} {:>10} hops={} {:+.3}s",
                c.gateway_id,
                dbm(c.rssi),
                db(c.snr),
                c.hops_taken(),
                other.offset_secs
            ));
        }
    }
    lines.push(String::new());
    footer(&mut lines);
    lines
}

/// Decoded traceroutes and decode failures
pub fn render_traceroutes(batch: &DecodedBatch) -> Vec<String> {
    let mut lines = Vec::new();
    header(&mut lines, "TRACEROUTES");

    lines.push(format!(
        "Decoded: {}  Incomplete: {}  Hop anomalies: {}  Failed: {}",
        batch.records.len(),
        batch.incomplete(),
        batch.anomalies(),
        batch.failures.len()
    ));
    lines.push(String::new());

    for record in &batch.records {
        lines.push(format!(
            "[{}] {} -> {} via {}{}",
            format_timestamp(record.timestamp),
            record.origin,
            record.destination,
            record.gateway_id,
            if record.is_complete { "" } else { " (incomplete)" }
        ));
        lines.push(format!("    towards: {}", record.route_summary()));
        if let Some(back) = record.return_summary() {
            lines.push(format!("    back:    {}", back));
        }
    }

    if !batch.failures.is_empty() {
        lines.push(String::new());
        lines.push("Decode failures:".to_string());
        for failure in &batch.failures {
            lines.push(format!(
                "  [{}] {} via {}: {}",
                format_timestamp(failure.timestamp),
                failure.from_node,
                failure.gateway_id,
                failure.error
            ));
        }
    }
    lines.push(String::new());
    footer(&mut lines);
    lines
}

/// Per-link statistics table
pub fn render_links(links: &[LinkAggregate], directory: &NodeDirectory) -> Vec<String> {
    let mut lines = Vec::new();
    header(&mut lines, "LINK STATISTICS");

    lines.push(format!(
        "{:<24} {:<24} {:>7} {:>10} {:>10} {:>10}  {}",
        "Node A", "Node B", "Samples", "Avg SNR", "Min SNR", "Max SNR", "Class"
    ));
    for link in links {
        lines.push(format!(
            "{:<24} {:<24} {:>7} {:>10} {:>10} {:>10}  {}",
            directory.display_name(link.node_a),
            directory.display_name(link.node_b),
            link.sample_count,
            db(link.avg_snr),
            db(link.min_snr),
            db(link.max_snr),
            link.classification
        ));
    }
    lines.push(String::new());
    footer(&mut lines);
    lines
}

fn truncation_note(lines: &mut Vec<String>, considered: usize, truncated: bool) {
    lines.push(format!("Candidates considered: {}", considered));
    if truncated {
        lines.push("NOTE: time budget exhausted, results are partial".to_string());
    }
    lines.push(String::new());
}

/// Longest direct RF links
pub fn render_direct_links(
    ranked: &RankedLinks<DirectLinkEntry>,
    directory: &NodeDirectory,
) -> Vec<String> {
    let mut lines = Vec::new();
    header(&mut lines, "LONGEST DIRECT LINKS");
    truncation_note(&mut lines, ranked.considered, ranked.truncated);

    for (i, entry) in ranked.entries.iter().enumerate() {
        lines.push(format!(
            "{:>3}. {} <-> {}: {}, avg SNR {}, {} samples ({}), last seen {}",
            i + 1,
            directory.display_name(entry.node_a),
            directory.display_name(entry.node_b),
            km(entry.distance_km),
            db(entry.avg_snr),
            entry.sample_count,
            entry.classification,
            format_timestamp(entry.last_seen)
        ));
    }
    lines.push(String::new());
    footer(&mut lines);
    lines
}

/// Longest multi-hop paths
pub fn render_indirect_paths(
    ranked: &RankedLinks<IndirectPathEntry>,
    directory: &NodeDirectory,
) -> Vec<String> {
    let mut lines = Vec::new();
    header(&mut lines, "LONGEST INDIRECT PATHS");
    truncation_note(&mut lines, ranked.considered, ranked.truncated);

    for (i, entry) in ranked.entries.iter().enumerate() {
        let route: Vec<String> = entry.route.iter().map(|n| n.to_string()).collect();
        lines.push(format!(
            "{:>3}. {} -> {}: {} over {} hops, avg SNR {}{}",
            i + 1,
            directory.display_name(entry.from_node),
            directory.display_name(entry.to_node),
            km(entry.total_distance_km),
            entry.hop_count,
            db(entry.avg_snr),
            if entry.is_complete { "" } else { " (incomplete)" }
        ));
        lines.push(format!("     {}", route.join(" -> ")));
    }
    lines.push(String::new());
    footer(&mut lines);
    lines
}

/// Relay hint candidates
pub fn render_relay(candidates: &[RelayCandidate]) -> Vec<String> {
    let mut lines = Vec::new();
    header(&mut lines, "RELAY CANDIDATES");

    for candidate in candidates {
        let status = if candidate.is_unresolved() {
            "no directly-heard match"
        } else if candidate.is_ambiguous() {
            "ambiguous"
        } else {
            "unique"
        };
        lines.push(format!(
            "Relay {} at {}: {} ({} matches)",
            candidate.relay_hex,
            candidate.gateway_id,
            status,
            candidate.matches.len()
        ));
        for m in &candidate.matches {
            lines.push(format!(
                "    {} {} heard {}x, last {}",
                m.node_id,
                m.name.as_deref().unwrap_or(""),
                m.heard_count,
                format_timestamp(m.last_heard)
            ));
        }
    }
    lines.push(String::new());
    footer(&mut lines);
    lines
}

/// Two-gateway signal comparison
pub fn render_comparison(comparison: &GatewayComparison) -> Vec<String> {
    let mut lines = Vec::new();
    let s = &comparison.summary;
    header(
        &mut lines,
        &format!("GATEWAY COMPARISON: {} vs {}", s.gateway1.gateway_id, s.gateway2.gateway_id),
    );

    lines.push(format!("Common packets: {}", s.common_packets));
    lines.push(format!(
        "Excluded (hop_limit mismatch): {}",
        s.excluded_hop_mismatch
    ));
    lines.push(format!(
        "{}: avg RSSI {}, avg SNR {}",
        s.gateway1.gateway_id,
        s.gateway1.avg_rssi.map_or_else(|| "-".to_string(), |v| format!("{:.1} dBm", v)),
        db(s.gateway1.avg_snr)
    ));
    lines.push(format!(
        "{}: avg RSSI {}, avg SNR {}",
        s.gateway2.gateway_id,
        s.gateway2.avg_rssi.map_or_else(|| "-".to_string(), |v| format!("{:.1} dBm", v)),
        db(s.gateway2.avg_snr)
    ));
    lines.push(format!(
        "Delta (gw2 - gw1): RSSI {}, SNR {} (median {}, p90 {})",
        s.avg_rssi_delta.map_or_else(|| "-".to_string(), |v| format!("{:+.1} dBm", v)),
        db(s.avg_snr_delta),
        db(s.median_snr_delta),
        db(s.p90_snr_delta)
    ));
    if comparison.truncated {
        lines.push("NOTE: time budget exhausted, results are partial".to_string());
    }
    lines.push(String::new());

    if !comparison.bins.is_empty() {
        lines.push("Binned deltas:".to_string());
        for bin in &comparison.bins {
            lines.push(format!(
                "  {}  n={:<5} RSSI {:>10}  SNR {:>10}",
                bin.label,
                bin.count,
                bin.avg_rssi_delta.map_or_else(|| "-".to_string(), |v| format!("{:+.1}", v)),
                db(bin.avg_snr_delta)
            ));
        }
        lines.push(String::new());
    }

    lines.push("Most recent common packets:".to_string());
    for p in &comparison.packets {
        lines.push(format!(
            "  [{}] {} hop_limit={} RSSI {} / {} SNR {} / {}",
            format_timestamp(p.timestamp),
            p.from_node,
            p.hop_limit,
            dbm(p.rssi1),
            dbm(p.rssi2),
            db(p.snr1),
            db(p.snr2)
        ));
    }
    lines.push(String::new());
    footer(&mut lines);
    lines
}

/// Capture set metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub analysis_timestamp: String,
    pub source: String,
    pub total_captures: usize,
    pub gateways: usize,
    pub known_nodes: usize,
    pub known_positions: usize,
    pub first_capture: Option<Timestamp>,
    pub last_capture: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryReport {
    pub metadata: ReportMetadata,
    pub packets: usize,
    pub by_logical_id: usize,
    pub by_time_fallback: usize,
    pub ambiguous: usize,
    pub multi_gateway: usize,
    pub late_arrivals: usize,
    pub traceroutes: usize,
    pub incomplete_traceroutes: usize,
    pub hop_anomalies: usize,
    pub decode_failures: usize,
    pub links: usize,
    pub bidirectional_links: usize,
}

impl SummaryReport {
    pub fn build(
        metadata: ReportMetadata,
        packets: &[CanonicalPacket],
        correlator: CorrelatorStats,
        traceroutes: &DecodedBatch,
        links: &[LinkAggregate],
    ) -> Self {
        let count = |method: CorrelationMethod| packets.iter().filter(|p| p.method == method).count();
        Self {
            metadata,
            packets: packets.len(),
            by_logical_id: count(CorrelationMethod::ByLogicalId),
            by_time_fallback: count(CorrelationMethod::ByTimeFallback),
            ambiguous: packets.iter().filter(|p| p.ambiguous).count(),
            multi_gateway: packets.iter().filter(|p| p.gateway_count() > 1).count(),
            late_arrivals: correlator.late_arrivals,
            traceroutes: traceroutes.records.len(),
            incomplete_traceroutes: traceroutes.incomplete(),
            hop_anomalies: traceroutes.anomalies(),
            decode_failures: traceroutes.failures.len(),
            links: links.len(),
            bidirectional_links: links
                .iter()
                .filter(|l| l.classification == LinkClassification::Bidirectional)
                .count(),
        }
    }
}

pub fn render_summary(report: &SummaryReport) -> Vec<String> {
    let mut lines = Vec::new();
    header(&mut lines, "MESHLENS CAPTURE ANALYSIS");

    let m = &report.metadata;
    lines.push(format!("Analysis Date: {}", m.analysis_timestamp));
    lines.push(format!("Source: {}", m.source));
    lines.push(format!("Captures: {}", m.total_captures));
    lines.push(format!("Gateways: {}", m.gateways));
    lines.push(format!("Named nodes: {}", m.known_nodes));
    lines.push(format!("Position fixes: {}", m.known_positions));
    if let (Some(first), Some(last)) = (m.first_capture, m.last_capture) {
        lines.push(format!(
            "Time span: {} to {}",
            format_timestamp(first),
            format_timestamp(last)
        ));
    }
    lines.push(String::new());

    lines.push(format!("Canonical packets: {}", report.packets));
    lines.push(format!("  by logical id:   {}", report.by_logical_id));
    lines.push(format!("  by time window:  {}", report.by_time_fallback));
    lines.push(format!("  ambiguous:       {}", report.ambiguous));
    lines.push(format!("  multi-gateway:   {}", report.multi_gateway));
    lines.push(format!("  late arrivals:   {}", report.late_arrivals));
    lines.push(String::new());

    lines.push(format!("Traceroutes: {}", report.traceroutes));
    lines.push(format!("  incomplete:      {}", report.incomplete_traceroutes));
    lines.push(format!("  hop anomalies:   {}", report.hop_anomalies));
    lines.push(format!("  decode failures: {}", report.decode_failures));
    lines.push(String::new());

    lines.push(format!(
        "Links: {} ({} bidirectional)",
        report.links, report.bidirectional_links
    ));
    lines.push(String::new());
    footer(&mut lines);
    lines
}

/// Print a summary to stdout
pub fn print_summary(report: &SummaryReport) {
    println!("\n=== MESH CAPTURE SUMMARY ===\n");
    println!("Captures: {}", report.metadata.total_captures);
    println!("Gateways: {}", report.metadata.gateways);
    println!(
        "Packets: {} ({} by id, {} by time window)",
        report.packets, report.by_logical_id, report.by_time_fallback
    );
    println!("Traceroutes: {} ({} failed to decode)", report.traceroutes, report.decode_failures);
    println!("Links: {}", report.links);
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn metadata() -> ReportMetadata {
        ReportMetadata {
            analysis_timestamp: "2024-01-01 00:00:00".to_string(),
            source: "test.json".to_string(),
            total_captures: 0,
            gateways: 0,
            known_nodes: 0,
            known_positions: 0,
            first_capture: None,
            last_capture: None,
        }
    }

    #[test]
    fn test_summary_counts() {
        let link = LinkAggregate {
            node_a: NodeId(1),
            node_b: NodeId(2),
            sample_count: 2,
            snr_sample_count: 2,
            avg_snr: Some(1.0),
            min_snr: Some(0.0),
            max_snr: Some(2.0),
            directions: DirectionHistogram::default(),
            a_to_b: 1,
            b_to_a: 1,
            first_seen: 0.0,
            last_seen: 1.0,
            classification: LinkClassification::Bidirectional,
        };
        let report = SummaryReport::build(
            metadata(),
            &[],
            CorrelatorStats::default(),
            &DecodedBatch::default(),
            &[link],
        );
        assert_eq!(report.links, 1);
        assert_eq!(report.bidirectional_links, 1);
        assert_eq!(report.packets, 0);

        let lines = render_summary(&report);
        assert_eq!(lines[0], "=".repeat(80));
        assert!(lines.iter().any(|l| l == "Links: 1 (1 bidirectional)"));
    }

    #[test]
    fn test_reports_written() {
        let dir = TempDir::new().unwrap();
        let report = SummaryReport::build(
            metadata(),
            &[],
            CorrelatorStats::default(),
            &DecodedBatch::default(),
            &[],
        );

        let json_path = dir.path().join("summary.json");
        generate_json_report(&report, &json_path).unwrap();
        let parsed: SummaryReport =
            serde_json::from_str(&fs::read_to_string(&json_path).unwrap()).unwrap();
        assert_eq!(parsed, report);

        let text_path = dir.path().join("summary.txt");
        generate_text_report(&render_summary(&report), &text_path).unwrap();
        assert!(fs::read_to_string(&text_path).unwrap().contains("MESHLENS CAPTURE ANALYSIS"));
    }

    #[test]
    fn test_relay_rendering_marks_status() {
        let candidate = RelayCandidate {
            relay_byte: 0x3f,
            relay_hex: "0x3f".to_string(),
            gateway_id: GatewayId::new("gw1"),
            matches: Vec::new(),
        };
        let lines = render_relay(&[candidate]);
        assert!(lines.iter().any(|l| l.contains("no directly-heard match")));
    }

    #[test]
    fn test_comparison_rendering_shows_spread() {
        use crate::analysis::gateway_compare::{ComparisonSummary, GatewaySignalSummary};

        let side = |id: &str| GatewaySignalSummary {
            gateway_id: GatewayId::new(id),
            avg_rssi: Some(-70.0),
            avg_snr: Some(3.0),
        };
        let comparison = GatewayComparison {
            summary: ComparisonSummary {
                common_packets: 4,
                excluded_hop_mismatch: 0,
                avg_rssi_delta: Some(-4.0),
                avg_snr_delta: Some(-1.0),
                median_snr_delta: Some(-0.5),
                p90_snr_delta: Some(2.25),
                gateway1: side("gw1"),
                gateway2: side("gw2"),
            },
            series: Vec::new(),
            bins: Vec::new(),
            packets: Vec::new(),
            truncated: false,
        };
        let lines = render_comparison(&comparison);
        assert!(lines.iter().any(|l| l.contains("(median -0.50 dB, p90 2.25 dB)")));
    }
}
