//! Relay hint resolution.
//!
//! Newer firmware stamps each forwarded packet with the low byte of the
//! relaying node's id. A gateway can only have received the packet from a
//! node in radio range, so the candidates are the nodes it heard directly
//! (zero hops taken) within a recency window whose low byte matches.
//! With 256 possible values collisions are common: the result is always a
//! list, possibly empty.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::types::*;

/// A node a gateway heard without any relay in between
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DirectlyHeard {
    pub node_id: NodeId,
    pub last_heard: Timestamp,
    pub heard_count: usize,
}

/// Nodes heard directly by one gateway within `[window_start, window_end]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectlyHeardSet {
    pub gateway_id: GatewayId,
    pub window_start: Timestamp,
    pub window_end: Timestamp,
    nodes: BTreeMap<NodeId, DirectlyHeard>,
}

impl DirectlyHeardSet {
    /// Collect the zero-hop senders `gateway` heard in the `recency` window ending at `as_of`
    pub fn collect<'a, I>(captures: I, gateway: &GatewayId, as_of: Timestamp, recency: Duration) -> Self
    where
        I: IntoIterator<Item = &'a PacketCapture>,
    {
        let window_start = as_of - recency.as_secs_f64();
        let own_node = gateway.node_id();
        let mut nodes: BTreeMap<NodeId, DirectlyHeard> = BTreeMap::new();

        for capture in captures {
            if &capture.gateway_id != gateway
                || !capture.is_direct()
                || capture.timestamp < window_start
                || capture.timestamp > as_of
                || Some(capture.from_node) == own_node
            {
                continue;
            }
            nodes
                .entry(capture.from_node)
                .and_modify(|h| {
                    h.heard_count += 1;
                    h.last_heard = h.last_heard.max(capture.timestamp);
                })
                .or_insert(DirectlyHeard {
                    node_id: capture.from_node,
                    last_heard: capture.timestamp,
                    heard_count: 1,
                });
        }

        Self {
            gateway_id: gateway.clone(),
            window_start,
            window_end: as_of,
            nodes,
        }
    }

    /// Same as [`collect`](Self::collect), over every reception of correlated packets
    pub fn from_packets(
        packets: &[CanonicalPacket],
        gateway: &GatewayId,
        as_of: Timestamp,
        recency: Duration,
    ) -> Self {
        Self::collect(packets.iter().flat_map(|p| p.receptions()), gateway, as_of, recency)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains_key(&node)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DirectlyHeard> {
        self.nodes.values()
    }
}

/// Match a relay byte against a directly-heard set.
///
/// Matches are ordered most recently heard first.
pub fn resolve_relay(
    relay_byte: u8,
    heard: &DirectlyHeardSet,
    directory: &NodeDirectory,
) -> RelayCandidate {
    let mut matches: Vec<RelayMatch> = heard
        .iter()
        .filter(|h| h.node_id.low_byte() == relay_byte)
        .map(|h| RelayMatch {
            node_id: h.node_id,
            name: directory.name_of(h.node_id),
            last_heard: h.last_heard,
            heard_count: h.heard_count,
        })
        .collect();

    matches.sort_by(|a, b| {
        b.last_heard
            .partial_cmp(&a.last_heard)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.node_id.cmp(&b.node_id))
    });

    if matches.len() > 1 {
        log::debug!(
            "Relay byte {:#04x} at {} matches {} directly-heard nodes",
            relay_byte,
            heard.gateway_id,
            matches.len()
        );
    }

    RelayCandidate {
        relay_byte,
        relay_hex: format!("{:#04x}", relay_byte),
        gateway_id: heard.gateway_id.clone(),
        matches,
    }
}

/// Resolve the relay hint of one capture against what its gateway heard
/// directly before it, in any reception of `packets`. `None` when the
/// capture carries no hint.
pub fn resolve_for_capture(
    capture: &PacketCapture,
    packets: &[CanonicalPacket],
    directory: &NodeDirectory,
    recency: Duration,
) -> Option<RelayCandidate> {
    let relay_byte = capture.relay_node?;
    let heard = DirectlyHeardSet::from_packets(packets, &capture.gateway_id, capture.timestamp, recency);
    Some(resolve_relay(relay_byte, &heard, directory))
}
