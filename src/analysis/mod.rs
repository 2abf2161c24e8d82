//! Mesh capture analysis.
//!
//! Correlates gateway captures into logical packets, decodes traceroutes,
//! aggregates per-link signal statistics and answers the distance, relay
//! and gateway comparison queries built on top of them.

pub mod types;
pub mod error;
pub mod query;
pub mod correlator;
pub mod traceroute;
pub mod link_stats;
pub mod locations;
pub mod distance;
pub mod relay;
pub mod gateway_compare;
pub mod capture_loader;
pub mod report;

pub use types::*;
pub use error::{AnalysisError, DecodeError};
pub use query::{AnalysisQuery, QueryBudget, TimeRange};
pub use correlator::{correlate_batch, Correlator, CorrelatorStats, Placement};
pub use traceroute::{decode_batch, decode_packets, decode_traceroute, DecodeFailure, DecodedBatch};
pub use link_stats::{aggregate_links, link_view, LinkStatsAggregator};
pub use locations::{LocationSource, LocationTable};
pub use distance::{haversine_km, longest_direct_links, rank_direct_links, rank_indirect_paths};
pub use relay::{resolve_for_capture, resolve_relay, DirectlyHeardSet};
pub use gateway_compare::{compare_gateways, GatewayComparison};
pub use capture_loader::{load_snapshot_path, CaptureSnapshot};
pub use report::{generate_json_report, generate_text_report};
