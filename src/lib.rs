//! # MeshLens - Analysis engine for LoRa mesh gateway captures
//!
//! This library turns the packet captures reported by a fleet of
//! Meshtastic-style gateways into network insight: which receptions are the
//! same transmission, which routes traceroutes took, how good each radio
//! link is, how far the longest links reach, which neighbour relayed a
//! packet, and how two gateways compare when they hear the same traffic.
//!
//! ## Overview
//!
//! Every transmission in the mesh may be heard by several gateways, each
//! reporting its own RSSI, SNR and remaining hop count. Nothing in the
//! analysis trusts a single gateway's view: receptions are correlated into
//! canonical packets first and every view is derived from those.
//!
//! ## Key Features
//!
//! - **Correlation**: Group receptions by logical packet id, with a
//!   time-window fallback when the id is missing
//! - **Traceroute decoding**: Per-hop SNR for forward and return legs, with
//!   incomplete routes kept and flagged
//! - **Link statistics**: Order-independent per-pair SNR aggregates
//! - **Distance ranking**: Longest direct links and multi-hop paths from
//!   known node positions
//! - **Relay resolution**: Candidate relays for the one-byte relay hint
//! - **Gateway comparison**: Signal deltas over packets both gateways heard
//!
//! ## Architecture
//!
//! - `analysis`: Core types, correlator, decoders and query views
//! - `cache`: Read-through caches for positions and link aggregates
//! - `config`: Engine settings and validation
//! - `config_loader`: YAML configuration loading
//! - `utils`: Node id parsing, summary statistics, time formatting
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use meshlens::analysis::{capture_loader, correlate_batch, decode_packets, aggregate_links};
//! use meshlens::config_loader;
//! use std::path::Path;
//!
//! let config = config_loader::load_or_default(Some(Path::new("meshlens.yaml")))?;
//! let snapshot = capture_loader::load_snapshot_path(Path::new("captures.json"))?;
//!
//! let packets = correlate_batch(&snapshot.captures, &config.correlation);
//! let traceroutes = decode_packets(&packets);
//! let links = aggregate_links(&traceroutes.records);
//! println!("{} packets, {} links", packets.len(), links.len());
//! # Ok::<(), color_eyre::eyre::Error>(())
//! ```
//!
//! ## Configuration Format
//!
//! ```yaml
//! correlation:
//!   time_window: 2s
//!   id_retention: 24h
//!   primary: first_recorded   # or earliest
//! relay:
//!   recency_window: 3h
//! cache:
//!   location_ttl: 5m
//!   link_stats_ttl: 1m
//! query:
//!   max_results: 100
//!   time_budget: 10s
//! comparison:
//!   bin_width: 1h
//! ```
//!
//! ## Error Handling
//!
//! Domain failures are typed with `thiserror` (`DecodeError`,
//! `AnalysisError`, `ValidationError`). File and configuration loading
//! return `color_eyre` results with context.

pub mod analysis;
pub mod cache;
pub mod config;
pub mod config_loader;
pub mod utils;
