//! Mesh capture analysis CLI.
//!
//! Loads a capture snapshot and runs one analysis view over it: packet
//! correlation, traceroutes, link statistics, longest links, relay
//! resolution or a two-gateway comparison.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Context, Result};
use serde::Serialize;

use meshlens::analysis::{
    self, capture_loader, report, AnalysisQuery, CanonicalPacket, CaptureSnapshot, Correlator,
    CorrelatorStats, DecodedBatch, GatewayId, LinkAggregate, LocationTable, NodeId, PacketCapture,
    QueryBudget, TimeRange, Timestamp,
};
use meshlens::cache::{CachedLocations, LinkStatsCache};
use meshlens::config::EngineConfig;
use meshlens::config_loader;
use meshlens::utils::{format_timestamp, parse_node_id, parse_time_arg};

#[derive(Parser)]
#[command(name = "meshlens")]
#[command(about = "Analysis engine for LoRa mesh gateway captures")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Capture snapshot: a .json or .zst file, or a directory of them
    #[arg(short, long, default_value = "captures.json")]
    snapshot: PathBuf,

    /// Engine configuration (YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the report here instead of stdout (.json for JSON, text otherwise)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Number of parallel workers (0 = auto-detect)
    #[arg(short = 'j', long, default_value = "0")]
    threads: usize,
}

/// Filters shared by every view
#[derive(Args, Debug, Clone, Default)]
struct QueryArgs {
    /// Only captures at or after this time (RFC 3339 or epoch seconds)
    #[arg(long, value_parser = parse_time_arg)]
    since: Option<Timestamp>,

    /// Only captures before this time (RFC 3339 or epoch seconds)
    #[arg(long, value_parser = parse_time_arg)]
    until: Option<Timestamp>,

    /// Source node (!hex, 0xhex or decimal)
    #[arg(long, value_parser = parse_node_id)]
    from: Option<NodeId>,

    /// Destination node (!hex, 0xhex or decimal)
    #[arg(long, value_parser = parse_node_id)]
    to: Option<NodeId>,

    /// Only captures reported by this gateway
    #[arg(long)]
    gateway: Option<String>,

    /// Minimum distance in km
    #[arg(long)]
    min_distance: Option<f64>,

    /// Minimum average SNR in dB
    #[arg(long, allow_hyphen_values = true)]
    min_snr: Option<f64>,

    /// Result cap (defaults to query.max_results)
    #[arg(long)]
    max_results: Option<usize>,
}

impl QueryArgs {
    fn to_query(&self) -> AnalysisQuery {
        let time_range = match (self.since, self.until) {
            (None, None) => None,
            (start, end) => Some(TimeRange { start, end }),
        };
        AnalysisQuery {
            time_range,
            from_node: self.from,
            to_node: self.to,
            gateway: self.gateway.clone().map(GatewayId::new),
            min_distance_km: self.min_distance,
            min_snr: self.min_snr,
            max_results: self.max_results,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Correlate receptions into canonical packets
    Correlate {
        #[command(flatten)]
        query: QueryArgs,
    },

    /// Decode traceroutes with per-hop SNR
    Traceroutes {
        #[command(flatten)]
        query: QueryArgs,

        /// Only list captures that failed to decode
        #[arg(long)]
        failures_only: bool,
    },

    /// Per-link signal statistics from traceroutes
    Links {
        #[command(flatten)]
        query: QueryArgs,
    },

    /// Longest links by distance between known positions
    LongestLinks {
        #[command(flatten)]
        query: QueryArgs,

        /// Rank multi-hop traceroute paths instead of direct links
        #[arg(long)]
        indirect: bool,
    },

    /// Resolve relay hints to candidate nodes
    Relay {
        #[command(flatten)]
        query: QueryArgs,
    },

    /// Compare signal reported by two gateways for the same packets
    Compare {
        /// Reference gateway
        gateway1: String,

        /// Gateway compared against the reference
        gateway2: String,

        #[command(flatten)]
        query: QueryArgs,
    },

    /// Show summary statistics
    Summary,

    /// Write the loaded snapshot as a packed .zst file
    Pack {
        /// Destination file
        destination: PathBuf,
    },
}

/// Loaded snapshot plus the caches derived views share
struct Session {
    config: EngineConfig,
    snapshot: CaptureSnapshot,
    source: PathBuf,
    locations: CachedLocations<LocationTable>,
    link_cache: LinkStatsCache,
}

impl Session {
    fn load(config: EngineConfig, source: &Path) -> Result<Self> {
        let snapshot = capture_loader::load_snapshot_path(source)?;
        let locations = CachedLocations::new(snapshot.location_table(), config.cache.location_ttl);
        let link_cache = LinkStatsCache::new(config.cache.link_stats_ttl);
        Ok(Self {
            config,
            snapshot,
            source: source.to_path_buf(),
            locations,
            link_cache,
        })
    }

    fn budget(&self) -> QueryBudget {
        QueryBudget::new(self.config.query.time_budget)
    }

    fn default_cap(&self) -> usize {
        self.config.query.max_results
    }

    /// Feed captures through the correlator in time order, sealing as we go
    fn packets(&self) -> (Vec<CanonicalPacket>, CorrelatorStats) {
        let mut correlator = Correlator::new(self.config.correlation.clone());
        let mut packets = Vec::new();
        for capture in &self.snapshot.captures {
            let now = capture.timestamp;
            correlator.push(capture.clone());
            packets.extend(correlator.seal_expired(now));
        }
        let stats = correlator.stats();
        packets.extend(correlator.finish());
        packets.sort_by(|a, b| {
            a.primary
                .timestamp
                .partial_cmp(&b.primary.timestamp)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        (packets, stats)
    }

    fn traceroutes(&self, packets: &[CanonicalPacket]) -> DecodedBatch {
        analysis::decode_packets(packets)
    }

    /// Links over every traceroute, cached per snapshot generation
    fn all_links(&self, batch: &DecodedBatch) -> Arc<Vec<LinkAggregate>> {
        self.link_cache
            .get_or_compute(self.snapshot.generation(), || analysis::aggregate_links(&batch.records))
    }
}

fn emit<T: Serialize + ?Sized>(value: &T, lines: &[String], output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) if path.extension().map_or(false, |ext| ext == "json") => {
            report::generate_json_report(value, path)
        }
        Some(path) => report::generate_text_report(lines, path),
        None => {
            for line in lines {
                println!("{}", line);
            }
            Ok(())
        }
    }
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level))
        .init();

    // Set thread pool size
    if cli.threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(cli.threads)
            .build_global()
            .context("Failed to configure thread pool")?;
    }

    let config = config_loader::load_or_default(cli.config.as_deref())?;
    let session = Session::load(config, &cli.snapshot)?;
    let output = cli.output.as_deref();

    match cli.command {
        Commands::Correlate { query } => run_correlate(&session, &query.to_query(), output),
        Commands::Traceroutes { query, failures_only } => {
            run_traceroutes(&session, &query.to_query(), failures_only, output)
        }
        Commands::Links { query } => run_links(&session, &query.to_query(), output),
        Commands::LongestLinks { query, indirect } => {
            run_longest_links(&session, &query.to_query(), indirect, output)
        }
        Commands::Relay { query } => run_relay(&session, &query.to_query(), output),
        Commands::Compare {
            gateway1,
            gateway2,
            query,
        } => run_compare(&session, &gateway1, &gateway2, &query.to_query(), output),
        Commands::Summary => run_summary(&session, output),
        Commands::Pack { destination } => {
            capture_loader::write_binary_snapshot(&session.snapshot, &destination)
        }
    }
}

fn run_correlate(session: &Session, query: &AnalysisQuery, output: Option<&Path>) -> Result<()> {
    let (packets, stats) = session.packets();
    let selected: Vec<CanonicalPacket> = packets
        .into_iter()
        .rev()
        .filter(|p| query.matches_capture(&p.primary))
        .take(query.limit_or(session.default_cap()))
        .collect();

    log::info!(
        "{} captures correlated ({} late arrivals), showing {} packets",
        stats.captures,
        stats.late_arrivals,
        selected.len()
    );
    let lines = report::render_packets(&selected, &session.snapshot.directory());
    emit(&selected, &lines, output)
}

fn run_traceroutes(
    session: &Session,
    query: &AnalysisQuery,
    failures_only: bool,
    output: Option<&Path>,
) -> Result<()> {
    let (packets, _) = session.packets();
    let mut batch = session.traceroutes(&packets);

    let cap = query.limit_or(session.default_cap());
    batch.records.retain(|r| query.matches_route(r));
    batch.records.reverse();
    batch.records.truncate(if failures_only { 0 } else { cap });
    batch
        .failures
        .retain(|f| query.matches_time(f.timestamp) && query.from_node.map_or(true, |n| f.from_node == n));
    batch.failures.truncate(cap);

    let lines = report::render_traceroutes(&batch);
    emit(&batch, &lines, output)
}

fn run_links(session: &Session, query: &AnalysisQuery, output: Option<&Path>) -> Result<()> {
    let (packets, _) = session.packets();
    let batch = session.traceroutes(&packets);
    let links = analysis::link_view(&batch.records, query, session.default_cap());
    let lines = report::render_links(&links, &session.snapshot.directory());
    emit(&links, &lines, output)
}

fn run_longest_links(
    session: &Session,
    query: &AnalysisQuery,
    indirect: bool,
    output: Option<&Path>,
) -> Result<()> {
    let (packets, _) = session.packets();
    let batch = session.traceroutes(&packets);
    let directory = session.snapshot.directory();
    let budget = session.budget();
    let cap = session.default_cap();

    if indirect {
        let ranked =
            analysis::rank_indirect_paths(&batch.records, &session.locations, query, cap, &budget);
        let lines = report::render_indirect_paths(&ranked, &directory);
        return emit(&ranked, &lines, output);
    }

    // Record-level filters change the aggregates, so only the unfiltered set is cached
    let ranked = if query.time_range.is_none() && query.gateway.is_none() {
        let links = session.all_links(&batch);
        analysis::rank_direct_links(&links, &session.locations, query, cap, &budget)
    } else {
        analysis::longest_direct_links(&batch.records, &session.locations, query, cap, &budget)
    };
    let stats = session.locations.stats();
    log::debug!("Location cache: {} hits, {} misses", stats.hits, stats.misses);

    let lines = report::render_direct_links(&ranked, &directory);
    emit(&ranked, &lines, output)
}

fn run_relay(session: &Session, query: &AnalysisQuery, output: Option<&Path>) -> Result<()> {
    let directory = session.snapshot.directory();
    let (packets, _) = session.packets();

    let mut hinted: Vec<&PacketCapture> = packets
        .iter()
        .flat_map(|p| p.receptions())
        .filter(|c| c.relay_node.is_some() && query.matches_capture(c))
        .collect();
    hinted.sort_by(|a, b| {
        b.timestamp
            .partial_cmp(&a.timestamp)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    hinted.truncate(query.limit_or(session.default_cap()));

    let candidates: Vec<_> = hinted
        .into_iter()
        .filter_map(|c| {
            analysis::resolve_for_capture(c, &packets, &directory, session.config.relay.recency_window)
        })
        .collect();

    log::info!(
        "Resolved {} relay hints ({} ambiguous, {} unresolved)",
        candidates.len(),
        candidates.iter().filter(|c| c.is_ambiguous()).count(),
        candidates.iter().filter(|c| c.is_unresolved()).count()
    );
    let lines = report::render_relay(&candidates);
    emit(&candidates, &lines, output)
}

fn run_compare(
    session: &Session,
    gateway1: &str,
    gateway2: &str,
    query: &AnalysisQuery,
    output: Option<&Path>,
) -> Result<()> {
    let (packets, _) = session.packets();
    let comparison = analysis::compare_gateways(
        &packets,
        &GatewayId::new(gateway1),
        &GatewayId::new(gateway2),
        query,
        session.config.comparison.bin_width,
        session.default_cap(),
        &session.budget(),
    )?;
    let lines = report::render_comparison(&comparison);
    emit(&comparison, &lines, output)
}

fn run_summary(session: &Session, output: Option<&Path>) -> Result<()> {
    let (packets, stats) = session.packets();
    let batch = session.traceroutes(&packets);
    let links = session.all_links(&batch);

    let snapshot = &session.snapshot;
    let span = snapshot.time_span();
    let metadata = report::ReportMetadata {
        analysis_timestamp: format_timestamp(chrono::Utc::now().timestamp() as f64),
        source: session.source.display().to_string(),
        total_captures: snapshot.captures.len(),
        gateways: snapshot.gateways().len(),
        known_nodes: snapshot.nodes.len(),
        known_positions: snapshot.locations.len(),
        first_capture: span.map(|(first, _)| first),
        last_capture: span.map(|(_, last)| last),
    };
    let summary = report::SummaryReport::build(metadata, &packets, stats, &batch, &links);

    if output.is_none() {
        report::print_summary(&summary);
        return Ok(());
    }
    let lines = report::render_summary(&summary);
    emit(&summary, &lines, output)
}
