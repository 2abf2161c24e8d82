//! Capture snapshot loading.
//!
//! A snapshot is the capture history handed over by ingestion together with
//! the node positions and names known at export time. Two encodings exist:
//!
//! - JSON (`*.json`): what the collectors export. Parsing is tolerant; an
//!   entry that does not decode is logged and skipped so one bad row does
//!   not lose a day of captures. Node ids may be numbers or `!hex` strings.
//! - Packed (`*.zst`): bincode compressed with zstd, written by
//!   `meshlens pack` for fast reloads.

use std::collections::hash_map::DefaultHasher;
use std::fs::{self, File};
use std::hash::{Hash, Hasher};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use color_eyre::eyre::{Context, Result};
use rayon::prelude::*;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::locations::LocationTable;
use super::types::*;
use crate::utils::node_id::parse_node_id;

/// zstd level for packed snapshots
const PACK_LEVEL: i32 = 3;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaptureSnapshot {
    pub captures: Vec<PacketCapture>,
    pub locations: Vec<NodeLocation>,
    pub nodes: Vec<NodeInfo>,
}

impl CaptureSnapshot {
    /// Fingerprint of the capture set, used to key derived caches
    pub fn generation(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.captures.len().hash(&mut hasher);
        for capture in &self.captures {
            capture.timestamp.to_bits().hash(&mut hasher);
            capture.gateway_id.hash(&mut hasher);
            capture.packet_id.hash(&mut hasher);
        }
        hasher.finish()
    }

    /// Order captures by timestamp, as the correlator expects
    pub fn sort_by_time(&mut self) {
        self.captures.sort_by(|a, b| {
            a.timestamp
                .partial_cmp(&b.timestamp)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    }

    pub fn merge(&mut self, other: CaptureSnapshot) {
        self.captures.extend(other.captures);
        self.locations.extend(other.locations);
        self.nodes.extend(other.nodes);
    }

    pub fn location_table(&self) -> LocationTable {
        LocationTable::new(self.locations.iter().copied())
    }

    pub fn directory(&self) -> NodeDirectory {
        NodeDirectory::new(self.nodes.iter().cloned())
    }

    pub fn gateways(&self) -> Vec<GatewayId> {
        let mut gateways: Vec<GatewayId> = self.captures.iter().map(|c| c.gateway_id.clone()).collect();
        gateways.sort();
        gateways.dedup();
        gateways
    }

    pub fn time_span(&self) -> Option<(Timestamp, Timestamp)> {
        let first = self.captures.iter().map(|c| c.timestamp).reduce(f64::min)?;
        let last = self.captures.iter().map(|c| c.timestamp).reduce(f64::max)?;
        Some((first, last))
    }
}

/// Rewrite `"!1a2b3c4d"` node ids into numbers before typed decoding
fn normalize_node_ids(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, field) in map.iter_mut() {
                match key.as_str() {
                    "from_node" | "to_node" | "node_id" => normalize_node_id(field),
                    "route" | "route_back" => {
                        if let Value::Array(items) = field {
                            items.iter_mut().for_each(normalize_node_id);
                        }
                    }
                    _ => normalize_node_ids(field),
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(normalize_node_ids),
        _ => {}
    }
}

fn normalize_node_id(field: &mut Value) {
    if let Value::String(text) = field {
        if let Ok(node) = parse_node_id(text) {
            *field = Value::from(node.0);
        }
    }
}

/// Decode each element of `section`, skipping the ones that fail
fn decode_entries<T: DeserializeOwned>(root: &mut Value, section: &str, source: &Path) -> Vec<T> {
    let Some(Value::Array(items)) = root.get_mut(section).map(Value::take) else {
        log::debug!("{}: no '{}' section", source.display(), section);
        return Vec::new();
    };

    let total = items.len();
    let mut decoded = Vec::with_capacity(total);
    for (index, mut item) in items.into_iter().enumerate() {
        normalize_node_ids(&mut item);
        match serde_json::from_value::<T>(item) {
            Ok(entry) => decoded.push(entry),
            Err(e) => log::warn!("{}: skipping {}[{}]: {}", source.display(), section, index, e),
        }
    }
    if decoded.len() < total {
        log::warn!(
            "{}: kept {} of {} {} entries",
            source.display(),
            decoded.len(),
            total,
            section
        );
    }
    decoded
}

/// Parse a JSON snapshot, tolerating malformed entries
pub fn parse_json_snapshot(text: &str, source: &Path) -> Result<CaptureSnapshot> {
    let mut root: Value = serde_json::from_str(text)
        .with_context(|| format!("Failed to parse snapshot JSON: {}", source.display()))?;

    // A bare array is a capture list without positions or names
    if root.is_array() {
        root = serde_json::json!({ "captures": root });
    }

    Ok(CaptureSnapshot {
        captures: decode_entries(&mut root, "captures", source),
        locations: decode_entries(&mut root, "locations", source),
        nodes: decode_entries(&mut root, "nodes", source),
    })
}

fn is_packed(path: &Path) -> bool {
    path.extension().map_or(false, |ext| ext == "zst")
}

/// Load one snapshot file, JSON or packed by extension
pub fn load_snapshot(path: &Path) -> Result<CaptureSnapshot> {
    let mut snapshot = if is_packed(path) {
        read_binary_snapshot(path)?
    } else {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read snapshot: {}", path.display()))?;
        parse_json_snapshot(&text, path)?
    };
    snapshot.sort_by_time();

    log::info!(
        "Loaded {} captures, {} positions, {} nodes from {}",
        snapshot.captures.len(),
        snapshot.locations.len(),
        snapshot.nodes.len(),
        path.display()
    );
    Ok(snapshot)
}

/// Load and merge every snapshot file in a directory in parallel.
///
/// Files that fail to load are logged and skipped.
pub fn load_snapshot_dir(dir: &Path) -> Result<CaptureSnapshot> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("Failed to read snapshot directory: {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .filter(|p| is_packed(p) || p.extension().map_or(false, |ext| ext == "json"))
        .collect();
    paths.sort();

    log::info!("Loading {} snapshot files in parallel...", paths.len());

    let parts: Vec<CaptureSnapshot> = paths
        .par_iter()
        .filter_map(|path| match load_snapshot(path) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                log::warn!("Failed to load {}: {}", path.display(), e);
                None
            }
        })
        .collect();

    let mut merged = CaptureSnapshot::default();
    for part in parts {
        merged.merge(part);
    }
    merged.sort_by_time();
    Ok(merged)
}

/// Load a file or a directory of files
pub fn load_snapshot_path(path: &Path) -> Result<CaptureSnapshot> {
    if path.is_dir() {
        load_snapshot_dir(path)
    } else {
        load_snapshot(path)
    }
}

/// Write a packed snapshot (bincode + zstd)
pub fn write_binary_snapshot(snapshot: &CaptureSnapshot, path: &Path) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create packed snapshot: {}", path.display()))?;
    let encoder = zstd::stream::Encoder::new(BufWriter::new(file), PACK_LEVEL)
        .context("Failed to start zstd stream")?
        .auto_finish();
    bincode::serialize_into(encoder, snapshot)
        .with_context(|| format!("Failed to encode packed snapshot: {}", path.display()))?;

    log::info!(
        "Packed {} captures into {}",
        snapshot.captures.len(),
        path.display()
    );
    Ok(())
}

/// Read a packed snapshot written by [`write_binary_snapshot`]
pub fn read_binary_snapshot(path: &Path) -> Result<CaptureSnapshot> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open packed snapshot: {}", path.display()))?;
    let decoder = zstd::stream::Decoder::new(BufReader::new(file))
        .context("Failed to start zstd stream")?;
    let snapshot = bincode::deserialize_from(decoder)
        .with_context(|| format!("Failed to decode packed snapshot: {}", path.display()))?;
    Ok(snapshot)
}
