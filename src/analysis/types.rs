//! Core data types for mesh telemetry correlation.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Capture timestamp in seconds since the Unix epoch
pub type Timestamp = f64;

/// 32-bit mesh node identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl NodeId {
    /// All-ones destination meaning "every node"
    pub const BROADCAST: NodeId = NodeId(u32::MAX);

    pub fn is_broadcast(self) -> bool {
        self == Self::BROADCAST
    }

    /// Low-order byte, as carried in the relay_node header field
    pub fn low_byte(self) -> u8 {
        (self.0 & 0xff) as u8
    }
}

impl From<u32> for NodeId {
    fn from(value: u32) -> Self {
        NodeId(value)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "!{:08x}", self.0)
    }
}

/// Identifier of a gateway reporting captures.
///
/// Usually derived from the gateway's node id (`!a1b2c3d4`), but MQTT
/// bridges may report an opaque client identifier instead.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GatewayId(pub String);

impl GatewayId {
    pub fn new(id: impl Into<String>) -> Self {
        GatewayId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Node id behind a node-derived gateway id, if it is one
    pub fn node_id(&self) -> Option<NodeId> {
        if self.0.starts_with('!') {
            crate::utils::node_id::parse_node_id(&self.0).ok()
        } else {
            None
        }
    }
}

impl fmt::Display for GatewayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Application port a packet was addressed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortType {
    TextMessage,
    Position,
    NodeInfo,
    Routing,
    Telemetry,
    Traceroute,
    NeighborInfo,
    Other(u32),
}

impl fmt::Display for PortType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortType::TextMessage => write!(f, "TEXT_MESSAGE_APP"),
            PortType::Position => write!(f, "POSITION_APP"),
            PortType::NodeInfo => write!(f, "NODEINFO_APP"),
            PortType::Routing => write!(f, "ROUTING_APP"),
            PortType::Telemetry => write!(f, "TELEMETRY_APP"),
            PortType::Traceroute => write!(f, "TRACEROUTE_APP"),
            PortType::NeighborInfo => write!(f, "NEIGHBORINFO_APP"),
            PortType::Other(n) => write!(f, "PORT_{}", n),
        }
    }
}

/// Raw route arrays carried by a traceroute packet, as decoded by ingestion.
///
/// `route` is the full forward node sequence (origin first, destination
/// last) and `snr_towards` holds one measurement per hop, in dB.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceroutePayload {
    pub route: Vec<NodeId>,
    #[serde(default)]
    pub snr_towards: Vec<f64>,
    #[serde(default)]
    pub route_back: Option<Vec<NodeId>>,
    #[serde(default)]
    pub snr_back: Vec<f64>,
}

/// One gateway's report of one transmission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketCapture {
    #[serde(default)]
    pub packet_id: Option<u32>,
    pub from_node: NodeId,
    pub to_node: NodeId,
    pub gateway_id: GatewayId,
    #[serde(default)]
    pub rssi: Option<i32>,
    #[serde(default)]
    pub snr: Option<f64>,
    pub hop_limit: u8,
    pub hop_start: u8,
    pub timestamp: Timestamp,
    pub port: PortType,
    /// Low byte of the node that last forwarded this packet
    #[serde(default)]
    pub relay_node: Option<u8>,
    #[serde(default)]
    pub traceroute: Option<TraceroutePayload>,
}

impl PacketCapture {
    /// Hops consumed before this gateway heard the packet, clamped at 0
    pub fn hops_taken(&self) -> u8 {
        self.hop_start.saturating_sub(self.hop_limit)
    }

    /// True when the gateway heard the sender itself rather than a relay.
    ///
    /// Packets without a hop_start (older firmware) cannot be classified
    /// and are never considered direct.
    pub fn is_direct(&self) -> bool {
        self.hop_start > 0 && self.hop_start == self.hop_limit
    }
}

/// How the receptions of a canonical packet were grouped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CorrelationMethod {
    /// All captures share the logical packet id
    ByLogicalId,
    /// No id available; grouped by sender, destination and port within the time window
    ByTimeFallback,
}

impl fmt::Display for CorrelationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorrelationMethod::ByLogicalId => write!(f, "by-id"),
            CorrelationMethod::ByTimeFallback => write!(f, "by-time"),
        }
    }
}

/// A non-primary reception of a canonical packet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OtherReception {
    pub capture: PacketCapture,
    /// Seconds relative to the primary reception (negative = heard earlier)
    pub offset_secs: f64,
}

/// One logical transmission with all of its gateway receptions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalPacket {
    pub primary: PacketCapture,
    pub other_receptions: Vec<OtherReception>,
    pub method: CorrelationMethod,
    /// Set when the time-fallback grouping looks like it merged distinct transmissions
    pub ambiguous: bool,
}

impl CanonicalPacket {
    pub fn gateway_count(&self) -> usize {
        1 + self.other_receptions.len()
    }

    /// Primary first, then the other receptions in order
    pub fn receptions(&self) -> impl Iterator<Item = &PacketCapture> {
        std::iter::once(&self.primary).chain(self.other_receptions.iter().map(|r| &r.capture))
    }

    pub fn reception_for(&self, gateway: &GatewayId) -> Option<&PacketCapture> {
        self.receptions().find(|c| &c.gateway_id == gateway)
    }

    pub fn gateways(&self) -> Vec<&GatewayId> {
        self.receptions().map(|c| &c.gateway_id).collect()
    }
}

/// Direction of a traceroute leg
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Towards the traceroute target
    Forward,
    /// Back towards the originator
    Return,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Forward => write!(f, "forward"),
            Direction::Return => write!(f, "return"),
        }
    }
}

/// One directional RF hop observed in a traceroute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HopObservation {
    pub from_node: NodeId,
    pub to_node: NodeId,
    pub snr: Option<f64>,
    pub hop_index: usize,
    pub direction: Direction,
    /// Final hop of the leg, arriving at its ultimate destination
    pub is_target_hop: bool,
}

/// A decoded traceroute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TracerouteRecord {
    pub packet_id: Option<u32>,
    pub origin: NodeId,
    pub destination: NodeId,
    pub gateway_id: GatewayId,
    pub timestamp: Timestamp,
    pub hops_taken: u8,
    /// hop_limit exceeded hop_start on the carrying packet
    pub hop_anomaly: bool,
    pub forward: Vec<HopObservation>,
    pub return_path: Option<Vec<HopObservation>>,
    /// False when the final forward hop has no SNR (no confirmed round trip)
    pub is_complete: bool,
    pub return_complete: Option<bool>,
}

impl TracerouteRecord {
    /// Number of forward hops
    pub fn hop_count(&self) -> usize {
        self.forward.len()
    }

    /// Forward hops followed by return hops
    pub fn all_hops(&self) -> impl Iterator<Item = &HopObservation> {
        self.forward
            .iter()
            .chain(self.return_path.iter().flat_map(|hops| hops.iter()))
    }

    /// Node sequence of the forward leg
    pub fn forward_route(&self) -> Vec<NodeId> {
        route_nodes(&self.forward)
    }

    /// Render the forward leg as `!a → !b (6.25dB) → !c (?)`
    pub fn route_summary(&self) -> String {
        render_route(&self.forward)
    }

    pub fn return_summary(&self) -> Option<String> {
        self.return_path.as_ref().map(|hops| render_route(hops))
    }
}

fn route_nodes(hops: &[HopObservation]) -> Vec<NodeId> {
    let mut nodes: Vec<NodeId> = hops.iter().map(|h| h.from_node).collect();
    if let Some(last) = hops.last() {
        nodes.push(last.to_node);
    }
    nodes
}

fn render_route(hops: &[HopObservation]) -> String {
    let Some(first) = hops.first() else {
        return String::new();
    };
    let mut out = first.from_node.to_string();
    for hop in hops {
        let snr = hop
            .snr
            .map(|s| format!("{:.2}dB", s))
            .unwrap_or_else(|| "?".to_string());
        out.push_str(&format!(" → {} ({})", hop.to_node, snr));
    }
    out
}

/// Latest known position of a node
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeLocation {
    pub node_id: NodeId,
    pub latitude: f64,
    pub longitude: f64,
    pub as_of: Timestamp,
}

/// User-facing names announced by a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_id: NodeId,
    #[serde(default)]
    pub long_name: Option<String>,
    #[serde(default)]
    pub short_name: Option<String>,
}

/// Node id to name lookup
#[derive(Debug, Clone, Default)]
pub struct NodeDirectory {
    nodes: HashMap<NodeId, NodeInfo>,
}

impl NodeDirectory {
    pub fn new(nodes: impl IntoIterator<Item = NodeInfo>) -> Self {
        Self {
            nodes: nodes.into_iter().map(|n| (n.node_id, n)).collect(),
        }
    }

    pub fn get(&self, node_id: NodeId) -> Option<&NodeInfo> {
        self.nodes.get(&node_id)
    }

    /// Long name, falling back to short name
    pub fn name_of(&self, node_id: NodeId) -> Option<String> {
        let info = self.nodes.get(&node_id)?;
        info.long_name.clone().or_else(|| info.short_name.clone())
    }

    /// Name for display, falling back to the `!xxxxxxxx` form
    pub fn display_name(&self, node_id: NodeId) -> String {
        self.name_of(node_id).unwrap_or_else(|| node_id.to_string())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Per-leg sample counts of a link
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectionHistogram {
    pub forward: usize,
    pub return_leg: usize,
}

impl DirectionHistogram {
    pub fn record(&mut self, direction: Direction) {
        match direction {
            Direction::Forward => self.forward += 1,
            Direction::Return => self.return_leg += 1,
        }
    }

    pub fn get(&self, direction: Direction) -> usize {
        match direction {
            Direction::Forward => self.forward,
            Direction::Return => self.return_leg,
        }
    }
}

/// Whether RF was observed both ways across a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkClassification {
    Bidirectional,
    Unidirectional,
}

impl fmt::Display for LinkClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkClassification::Bidirectional => write!(f, "bidirectional"),
            LinkClassification::Unidirectional => write!(f, "unidirectional"),
        }
    }
}

/// Statistics for an unordered node pair; `node_a < node_b` always holds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkAggregate {
    pub node_a: NodeId,
    pub node_b: NodeId,
    pub sample_count: usize,
    pub snr_sample_count: usize,
    pub avg_snr: Option<f64>,
    pub min_snr: Option<f64>,
    pub max_snr: Option<f64>,
    pub directions: DirectionHistogram,
    /// Samples transmitted by `node_a` and heard by `node_b`
    pub a_to_b: usize,
    /// Samples transmitted by `node_b` and heard by `node_a`
    pub b_to_a: usize,
    pub first_seen: Timestamp,
    pub last_seen: Timestamp,
    pub classification: LinkClassification,
}

impl LinkAggregate {
    pub fn involves(&self, node: NodeId) -> bool {
        self.node_a == node || self.node_b == node
    }
}

/// One directly-heard node whose low byte matches a relay hint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayMatch {
    pub node_id: NodeId,
    pub name: Option<String>,
    pub last_heard: Timestamp,
    pub heard_count: usize,
}

/// All plausible relays for a relay_node byte.
///
/// A single byte has 256 possible values, so several nodes can match and
/// the list is never collapsed to one answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayCandidate {
    pub relay_byte: u8,
    /// Matching low byte rendered as `0x3f`
    pub relay_hex: String,
    pub gateway_id: GatewayId,
    pub matches: Vec<RelayMatch>,
}

impl RelayCandidate {
    pub fn is_unresolved(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn is_ambiguous(&self) -> bool {
        self.matches.len() > 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_display_and_low_byte() {
        let id = NodeId(0xa1b2c3d4);
        assert_eq!(id.to_string(), "!a1b2c3d4");
        assert_eq!(id.low_byte(), 0xd4);
        assert!(NodeId(0xffff_ffff).is_broadcast());
    }

    #[test]
    fn test_gateway_node_id() {
        assert_eq!(GatewayId::new("!0000002a").node_id(), Some(NodeId(42)));
        assert_eq!(GatewayId::new("mqtt-bridge-7").node_id(), None);
    }

    #[test]
    fn test_is_direct() {
        let capture = PacketCapture {
            packet_id: None,
            from_node: NodeId(1),
            to_node: NodeId::BROADCAST,
            gateway_id: GatewayId::new("gw"),
            rssi: None,
            snr: None,
            hop_limit: 3,
            hop_start: 3,
            timestamp: 0.0,
            port: PortType::TextMessage,
            relay_node: None,
            traceroute: None,
        };
        assert!(capture.is_direct());
        assert_eq!(capture.hops_taken(), 0);

        let relayed = PacketCapture { hop_limit: 2, ..capture.clone() };
        assert!(!relayed.is_direct());
        assert_eq!(relayed.hops_taken(), 1);

        let legacy = PacketCapture { hop_start: 0, hop_limit: 0, ..capture };
        assert!(!legacy.is_direct());
    }

    #[test]
    fn test_node_directory_names() {
        let dir = NodeDirectory::new(vec![
            NodeInfo {
                node_id: NodeId(1),
                long_name: Some("Hilltop".to_string()),
                short_name: Some("HT".to_string()),
            },
            NodeInfo {
                node_id: NodeId(2),
                long_name: None,
                short_name: Some("RV".to_string()),
            },
        ]);
        assert_eq!(dir.display_name(NodeId(1)), "Hilltop");
        assert_eq!(dir.display_name(NodeId(2)), "RV");
        assert_eq!(dir.display_name(NodeId(3)), "!00000003");
    }
}
