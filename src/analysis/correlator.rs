//! Reception correlation.
//!
//! Groups the captures that several gateways report for one transmission
//! into a single [`CanonicalPacket`]. Captures carrying a logical packet id
//! are grouped by that id regardless of how far apart they arrive. Captures
//! without one fall back to sender, destination and port within a short
//! window around the first capture of the group.
//!
//! The [`Correlator`] is incremental: groups stay open while their window
//! lasts and are frozen by [`Correlator::seal_expired`]. Once an id-keyed
//! group is sealed, further captures for that id within `id_retention` of
//! the seal are counted as late arrivals and dropped instead of rewriting
//! the emitted packet. After that the id is forgotten and may be reused.

use std::collections::{HashMap, HashSet};

use crate::config::{CorrelationSettings, PrimarySelection};

use super::types::*;

/// Grouping key of an open correlation group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum GroupKey {
    Logical(u32),
    Fallback {
        from: NodeId,
        to: NodeId,
        port: PortType,
    },
}

/// What happened to a capture pushed into the correlator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Opened a new group
    NewPacket,
    /// Joined an open group
    Joined,
    /// Its logical id was already sealed; the capture was dropped
    LateArrival,
}

#[derive(Debug, Clone)]
struct Group {
    key: GroupKey,
    /// (recording sequence, capture), in recording order
    members: Vec<(u64, PacketCapture)>,
    reference_ts: Timestamp,
    latest_ts: Timestamp,
    repeated_gateway: bool,
}

impl Group {
    fn new(key: GroupKey, seq: u64, capture: PacketCapture) -> Self {
        Self {
            key,
            reference_ts: capture.timestamp,
            latest_ts: capture.timestamp,
            members: vec![(seq, capture)],
            repeated_gateway: false,
        }
    }

    fn add(&mut self, seq: u64, capture: PacketCapture) {
        if self.members.iter().any(|(_, c)| c.gateway_id == capture.gateway_id) {
            self.repeated_gateway = true;
        }
        self.latest_ts = self.latest_ts.max(capture.timestamp);
        self.members.push((seq, capture));
    }

    fn first_seq(&self) -> u64 {
        self.members.first().map(|(s, _)| *s).unwrap_or(0)
    }
}

/// Correlation counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CorrelatorStats {
    pub captures: usize,
    pub packets_emitted: usize,
    pub late_arrivals: usize,
}

/// Incremental reception correlator
#[derive(Debug)]
pub struct Correlator {
    settings: CorrelationSettings,
    by_id: HashMap<u32, Group>,
    fallback: HashMap<GroupKey, Vec<Group>>,
    /// Sealed logical ids and when they were sealed
    sealed_ids: HashMap<u32, Timestamp>,
    next_seq: u64,
    stats: CorrelatorStats,
}

impl Correlator {
    pub fn new(settings: CorrelationSettings) -> Self {
        Self {
            settings,
            by_id: HashMap::new(),
            fallback: HashMap::new(),
            sealed_ids: HashMap::new(),
            next_seq: 0,
            stats: CorrelatorStats::default(),
        }
    }

    pub fn stats(&self) -> CorrelatorStats {
        self.stats
    }

    /// Number of groups still accepting receptions
    pub fn open_groups(&self) -> usize {
        self.by_id.len() + self.fallback.values().map(Vec::len).sum::<usize>()
    }

    /// Add one capture, in recording order
    pub fn push(&mut self, capture: PacketCapture) -> Placement {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.stats.captures += 1;

        match capture.packet_id {
            Some(id) => {
                let retention = self.settings.id_retention.as_secs_f64();
                match self.sealed_ids.get(&id) {
                    Some(&sealed_at) if capture.timestamp - sealed_at <= retention => {
                        self.stats.late_arrivals += 1;
                        log::debug!(
                            "Dropping late reception of packet {} from gateway {}",
                            id,
                            capture.gateway_id
                        );
                        return Placement::LateArrival;
                    }
                    Some(_) => {
                        self.sealed_ids.remove(&id);
                    }
                    None => {}
                }
                match self.by_id.get_mut(&id) {
                    Some(group) => {
                        group.add(seq, capture);
                        Placement::Joined
                    }
                    None => {
                        self.by_id
                            .insert(id, Group::new(GroupKey::Logical(id), seq, capture));
                        Placement::NewPacket
                    }
                }
            }
            None => {
                let key = GroupKey::Fallback {
                    from: capture.from_node,
                    to: capture.to_node,
                    port: capture.port,
                };
                let window = self.settings.time_window.as_secs_f64();
                let groups = self.fallback.entry(key).or_default();

                match groups
                    .iter_mut()
                    .find(|g| (capture.timestamp - g.reference_ts).abs() <= window)
                {
                    Some(group) => {
                        group.add(seq, capture);
                        Placement::Joined
                    }
                    None => {
                        groups.push(Group::new(key, seq, capture));
                        Placement::NewPacket
                    }
                }
            }
        }
    }

    /// Freeze and emit every group whose correlation window has closed at `now`
    pub fn seal_expired(&mut self, now: Timestamp) -> Vec<CanonicalPacket> {
        let retention = self.settings.id_retention.as_secs_f64();
        let window = self.settings.time_window.as_secs_f64();
        let mut sealed: Vec<Group> = Vec::new();

        let expired_ids: Vec<u32> = self
            .by_id
            .iter()
            .filter(|(_, g)| now - g.latest_ts > retention)
            .map(|(id, _)| *id)
            .collect();
        for id in expired_ids {
            if let Some(group) = self.by_id.remove(&id) {
                self.sealed_ids.insert(id, now);
                sealed.push(group);
            }
        }

        // Ids sealed longer than the retention accept new transmissions again
        self.sealed_ids.retain(|_, sealed_at| now - *sealed_at <= retention);

        for groups in self.fallback.values_mut() {
            let (expired, open): (Vec<Group>, Vec<Group>) = groups
                .drain(..)
                .partition(|g| now - g.reference_ts > window);
            *groups = open;
            sealed.extend(expired);
        }
        self.fallback.retain(|_, groups| !groups.is_empty());

        self.emit(sealed)
    }

    /// Emit every remaining group
    pub fn finish(mut self) -> Vec<CanonicalPacket> {
        let mut remaining: Vec<Group> = self.by_id.drain().map(|(_, g)| g).collect();
        for (_, groups) in self.fallback.drain() {
            remaining.extend(groups);
        }
        let packets = self.emit(remaining);
        log::debug!(
            "Correlated {} captures into {} packets ({} late arrivals dropped)",
            self.stats.captures,
            self.stats.packets_emitted,
            self.stats.late_arrivals
        );
        packets
    }

    fn emit(&mut self, mut groups: Vec<Group>) -> Vec<CanonicalPacket> {
        groups.sort_by_key(Group::first_seq);
        self.stats.packets_emitted += groups.len();
        groups
            .into_iter()
            .filter_map(|g| build_canonical(g, self.settings.primary))
            .collect()
    }
}

/// Build the canonical packet for a closed group
fn build_canonical(group: Group, policy: PrimarySelection) -> Option<CanonicalPacket> {
    let primary_pos = match policy {
        PrimarySelection::FirstRecorded => 0,
        PrimarySelection::Earliest => group
            .members
            .iter()
            .enumerate()
            .min_by(|(_, (sa, a)), (_, (sb, b))| {
                a.timestamp
                    .partial_cmp(&b.timestamp)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(sa.cmp(sb))
            })
            .map(|(pos, _)| pos)?,
    };

    let method = match group.key {
        GroupKey::Logical(_) => CorrelationMethod::ByLogicalId,
        GroupKey::Fallback { .. } => CorrelationMethod::ByTimeFallback,
    };
    let ambiguous = method == CorrelationMethod::ByTimeFallback && group.repeated_gateway;

    let mut members = group.members;
    if primary_pos >= members.len() {
        return None;
    }
    let (_, primary) = members.remove(primary_pos);

    let mut seen: HashSet<GatewayId> = HashSet::new();
    seen.insert(primary.gateway_id.clone());

    let other_receptions = members
        .into_iter()
        .filter(|(_, c)| seen.insert(c.gateway_id.clone()))
        .map(|(_, capture)| OtherReception {
            offset_secs: capture.timestamp - primary.timestamp,
            capture,
        })
        .collect();

    Some(CanonicalPacket {
        primary,
        other_receptions,
        method,
        ambiguous,
    })
}

/// Correlate a bounded batch of captures, given in recording order
pub fn correlate_batch(
    captures: &[PacketCapture],
    settings: &CorrelationSettings,
) -> Vec<CanonicalPacket> {
    let mut correlator = Correlator::new(settings.clone());
    for capture in captures {
        correlator.push(capture.clone());
    }
    let packets = correlator.finish();
    log::info!(
        "Correlated {} captures into {} canonical packets",
        captures.len(),
        packets.len()
    );
    packets
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn capture(id: Option<u32>, gateway: &str, rssi: i32, ts: f64) -> PacketCapture {
        PacketCapture {
            packet_id: id,
            from_node: NodeId(0x10),
            to_node: NodeId::BROADCAST,
            gateway_id: GatewayId::new(gateway),
            rssi: Some(rssi),
            snr: Some(5.0),
            hop_limit: 3,
            hop_start: 3,
            timestamp: ts,
            port: PortType::TextMessage,
            relay_node: None,
            traceroute: None,
        }
    }

    #[test]
    fn test_empty_batch() {
        assert!(correlate_batch(&[], &CorrelationSettings::default()).is_empty());
    }

    #[test]
    fn test_groups_by_logical_id_regardless_of_gap() {
        let captures = vec![
            capture(Some(7), "gw1", -60, 100.0),
            capture(Some(7), "gw2", -70, 5000.0),
            capture(Some(8), "gw1", -60, 100.2),
        ];
        let packets = correlate_batch(&captures, &CorrelationSettings::default());
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].primary.packet_id, Some(7));
        assert_eq!(packets[0].gateway_count(), 2);
        assert_eq!(packets[0].method, CorrelationMethod::ByLogicalId);
        assert_eq!(packets[1].gateway_count(), 1);
    }

    #[test]
    fn test_duplicate_gateway_first_occurrence_wins() {
        let captures = vec![
            capture(Some(9), "gw1", -60, 10.0),
            capture(Some(9), "gw2", -61, 10.1),
            capture(Some(9), "gw2", -99, 10.2),
            capture(Some(9), "gw1", -98, 10.3),
        ];
        let packets = correlate_batch(&captures, &CorrelationSettings::default());
        assert_eq!(packets.len(), 1);
        let packet = &packets[0];
        assert_eq!(packet.other_receptions.len(), 1);
        assert_eq!(packet.other_receptions[0].capture.rssi, Some(-61));
        assert!(!packet.ambiguous);
    }

    #[test]
    fn test_time_fallback_window() {
        let captures = vec![
            capture(None, "gw1", -60, 100.0),
            capture(None, "gw2", -62, 101.5),
            capture(None, "gw3", -64, 102.5),
        ];
        let packets = correlate_batch(&captures, &CorrelationSettings::default());
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].method, CorrelationMethod::ByTimeFallback);
        assert_eq!(packets[0].gateway_count(), 2);
        assert_eq!(packets[1].primary.gateway_id.as_str(), "gw3");
    }

    #[test]
    fn test_time_fallback_separates_ports_and_senders() {
        let mut other_port = capture(None, "gw2", -62, 100.5);
        other_port.port = PortType::Position;
        let mut other_sender = capture(None, "gw3", -62, 100.5);
        other_sender.from_node = NodeId(0x11);
        let captures = vec![capture(None, "gw1", -60, 100.0), other_port, other_sender];
        let packets = correlate_batch(&captures, &CorrelationSettings::default());
        assert_eq!(packets.len(), 3);
    }

    #[test]
    fn test_time_fallback_flags_repeated_gateway() {
        let captures = vec![
            capture(None, "gw1", -60, 100.0),
            capture(None, "gw1", -61, 101.0),
        ];
        let packets = correlate_batch(&captures, &CorrelationSettings::default());
        assert_eq!(packets.len(), 1);
        assert!(packets[0].ambiguous);
        assert!(packets[0].other_receptions.is_empty());
    }

    #[test]
    fn test_earliest_primary_policy() {
        let settings = CorrelationSettings {
            primary: PrimarySelection::Earliest,
            ..CorrelationSettings::default()
        };
        let captures = vec![
            capture(Some(42), "G1", -60, 100.0),
            capture(Some(42), "G2", -65, 100.5),
            capture(Some(42), "G3", -70, 99.8),
        ];
        let packets = correlate_batch(&captures, &settings);
        let packet = &packets[0];
        assert_eq!(packet.primary.gateway_id.as_str(), "G3");
        let offsets: Vec<f64> = packet.other_receptions.iter().map(|r| r.offset_secs).collect();
        assert!((offsets[0] - 0.2).abs() < 1e-9);
        assert!((offsets[1] - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_earliest_policy_ties_use_recording_order() {
        let settings = CorrelationSettings {
            primary: PrimarySelection::Earliest,
            ..CorrelationSettings::default()
        };
        let captures = vec![
            capture(Some(1), "A", -60, 50.0),
            capture(Some(1), "B", -60, 50.0),
        ];
        let packets = correlate_batch(&captures, &settings);
        assert_eq!(packets[0].primary.gateway_id.as_str(), "A");
    }

    #[test]
    fn test_seal_expired_freezes_id_groups() {
        let settings = CorrelationSettings {
            id_retention: Duration::from_secs(60),
            ..CorrelationSettings::default()
        };
        let mut correlator = Correlator::new(settings);
        assert_eq!(correlator.push(capture(Some(5), "gw1", -60, 0.0)), Placement::NewPacket);
        assert_eq!(correlator.push(capture(Some(5), "gw2", -60, 30.0)), Placement::Joined);

        assert!(correlator.seal_expired(60.0).is_empty());
        let sealed = correlator.seal_expired(91.0);
        assert_eq!(sealed.len(), 1);
        assert_eq!(sealed[0].gateway_count(), 2);

        assert_eq!(correlator.push(capture(Some(5), "gw3", -60, 95.0)), Placement::LateArrival);
        assert_eq!(correlator.stats().late_arrivals, 1);
        assert!(correlator.finish().is_empty());
    }

    #[test]
    fn test_sealed_id_reusable_after_retention() {
        let settings = CorrelationSettings {
            id_retention: Duration::from_secs(60),
            ..CorrelationSettings::default()
        };
        let mut correlator = Correlator::new(settings);
        correlator.push(capture(Some(5), "gw1", -60, 0.0));
        assert_eq!(correlator.seal_expired(100.0).len(), 1);

        // Reused long after the seal: a new transmission, not a late copy
        assert_eq!(correlator.push(capture(Some(5), "gw1", -60, 250.0)), Placement::NewPacket);
        assert_eq!(correlator.stats().late_arrivals, 0);
        assert_eq!(correlator.finish().len(), 1);
    }

    #[test]
    fn test_sealed_ids_forgotten_after_retention() {
        let settings = CorrelationSettings {
            id_retention: Duration::from_secs(60),
            ..CorrelationSettings::default()
        };
        let mut correlator = Correlator::new(settings);
        for id in 0..1000u32 {
            correlator.push(capture(Some(id), "gw1", -60, f64::from(id) * 0.01));
        }
        assert_eq!(correlator.seal_expired(100.0).len(), 1000);
        assert_eq!(correlator.sealed_ids.len(), 1000);

        assert!(correlator.seal_expired(100.0 + 121.0).is_empty());
        assert!(correlator.sealed_ids.is_empty());
        assert_eq!(correlator.push(capture(Some(5), "gw2", -60, 30.0 * 86_400.0)), Placement::NewPacket);
    }

    #[test]
    fn test_seal_expired_fallback_groups() {
        let mut correlator = Correlator::new(CorrelationSettings::default());
        correlator.push(capture(None, "gw1", -60, 10.0));
        correlator.push(capture(None, "gw2", -60, 30.0));
        let sealed = correlator.seal_expired(13.0);
        assert_eq!(sealed.len(), 1);
        assert_eq!(sealed[0].primary.gateway_id.as_str(), "gw1");
        assert_eq!(correlator.open_groups(), 1);
    }
}
