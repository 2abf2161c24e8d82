//! Traceroute decoding.
//!
//! A traceroute carries the node sequence of each leg and one SNR sample
//! per hop, so the SNR array is one element shorter than the node array.
//! When the final sample is missing the target never confirmed the round
//! trip and the record is marked incomplete.
//!
//! Decoding failures stay attached to the capture they came from; a batch
//! always decodes every other record.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::error::{AnalysisError, DecodeError};
use super::types::*;

/// Hops consumed by a packet, clamped at 0, and whether hop_limit exceeded hop_start
pub fn hops_taken(hop_start: u8, hop_limit: u8) -> (u8, bool) {
    (hop_start.saturating_sub(hop_limit), hop_limit > hop_start)
}

/// Decode one leg of a traceroute into directional hops.
///
/// Returns the hops and whether the final hop carries an SNR sample.
pub fn decode_leg(
    nodes: &[NodeId],
    snr: &[f64],
    direction: Direction,
) -> Result<(Vec<HopObservation>, bool), DecodeError> {
    match nodes.len() {
        0 => return Err(DecodeError::EmptyRoute { direction }),
        1 => return Err(DecodeError::SingleNodeRoute { direction }),
        _ => {}
    }

    let hop_total = nodes.len() - 1;
    if snr.len() > hop_total {
        return Err(DecodeError::ExcessSnr {
            direction,
            nodes: nodes.len(),
            snr: snr.len(),
            max: hop_total,
        });
    }

    let hops: Vec<HopObservation> = nodes
        .windows(2)
        .enumerate()
        .map(|(i, pair)| HopObservation {
            from_node: pair[0],
            to_node: pair[1],
            snr: snr.get(i).copied().filter(|s| s.is_finite()),
            hop_index: i,
            direction,
            is_target_hop: i + 1 == hop_total,
        })
        .collect();

    let complete = hops.last().map_or(false, |h| h.snr.is_some());
    Ok((hops, complete))
}

/// Decode the traceroute carried by one capture
pub fn decode_traceroute(capture: &PacketCapture) -> Result<TracerouteRecord, DecodeError> {
    if capture.port != PortType::Traceroute {
        return Err(DecodeError::NotTraceroute);
    }
    let payload = capture
        .traceroute
        .as_ref()
        .ok_or(DecodeError::MissingPayload)?;

    let (forward, is_complete) =
        decode_leg(&payload.route, &payload.snr_towards, Direction::Forward)?;

    let (return_path, return_complete) = match payload.route_back.as_deref() {
        Some(nodes) if !nodes.is_empty() => {
            let (hops, complete) = decode_leg(nodes, &payload.snr_back, Direction::Return)?;
            (Some(hops), Some(complete))
        }
        _ => (None, None),
    };

    let (taken, hop_anomaly) = hops_taken(capture.hop_start, capture.hop_limit);
    if hop_anomaly {
        log::debug!(
            "Traceroute {:?} from {} has hop_limit {} above hop_start {}",
            capture.packet_id,
            capture.from_node,
            capture.hop_limit,
            capture.hop_start
        );
    }

    // decode_leg guarantees at least one hop
    let origin = forward[0].from_node;
    let destination = forward[forward.len() - 1].to_node;

    Ok(TracerouteRecord {
        packet_id: capture.packet_id,
        origin,
        destination,
        gateway_id: capture.gateway_id.clone(),
        timestamp: capture.timestamp,
        hops_taken: taken,
        hop_anomaly,
        forward,
        return_path,
        is_complete,
        return_complete,
    })
}

/// A traceroute capture that failed to decode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodeFailure {
    pub packet_id: Option<u32>,
    pub from_node: NodeId,
    pub gateway_id: GatewayId,
    pub timestamp: Timestamp,
    pub error: DecodeError,
    /// Payload as received, kept for inspection
    pub raw: Option<TraceroutePayload>,
}

impl From<DecodeFailure> for AnalysisError {
    fn from(failure: DecodeFailure) -> Self {
        let packet = match failure.packet_id {
            Some(id) => format!("{:#010x} from {}", id, failure.from_node),
            None => format!("from {} at {}", failure.from_node, failure.timestamp),
        };
        AnalysisError::Decode {
            packet,
            source: failure.error,
        }
    }
}

/// Decoded records plus the per-record failures
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecodedBatch {
    pub records: Vec<TracerouteRecord>,
    pub failures: Vec<DecodeFailure>,
}

impl DecodedBatch {
    pub fn anomalies(&self) -> usize {
        self.records.iter().filter(|r| r.hop_anomaly).count()
    }

    pub fn incomplete(&self) -> usize {
        self.records.iter().filter(|r| !r.is_complete).count()
    }
}

/// Decode every traceroute capture in a batch, in parallel.
///
/// Non-traceroute captures are skipped. Output keeps input order.
pub fn decode_batch<'a, I>(captures: I) -> DecodedBatch
where
    I: IntoIterator<Item = &'a PacketCapture>,
{
    let traceroutes: Vec<&PacketCapture> = captures
        .into_iter()
        .filter(|c| c.port == PortType::Traceroute)
        .collect();

    let results: Vec<(&PacketCapture, Result<TracerouteRecord, DecodeError>)> = traceroutes
        .par_iter()
        .map(|c| (*c, decode_traceroute(c)))
        .collect();

    let mut batch = DecodedBatch::default();
    for (capture, result) in results {
        match result {
            Ok(record) => batch.records.push(record),
            Err(error) => batch.failures.push(DecodeFailure {
                packet_id: capture.packet_id,
                from_node: capture.from_node,
                gateway_id: capture.gateway_id.clone(),
                timestamp: capture.timestamp,
                error,
                raw: capture.traceroute.clone(),
            }),
        }
    }

    if !batch.failures.is_empty() {
        log::warn!(
            "{} of {} traceroutes failed to decode",
            batch.failures.len(),
            traceroutes.len()
        );
    }
    log::debug!(
        "Decoded {} traceroutes ({} incomplete, {} hop anomalies)",
        batch.records.len(),
        batch.incomplete(),
        batch.anomalies()
    );

    batch
}

/// Decode traceroutes from canonical packets, one per logical transmission.
///
/// Only the primary reception is decoded so that a traceroute reported by
/// several gateways contributes its hops once.
pub fn decode_packets(packets: &[CanonicalPacket]) -> DecodedBatch {
    decode_batch(packets.iter().map(|p| &p.primary))
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: NodeId = NodeId(0xa);
    const B: NodeId = NodeId(0xb);
    const C: NodeId = NodeId(0xc);

    fn traceroute_capture(payload: Option<TraceroutePayload>) -> PacketCapture {
        PacketCapture {
            packet_id: Some(77),
            from_node: C,
            to_node: A,
            gateway_id: GatewayId::new("!0000000a"),
            rssi: Some(-80),
            snr: Some(4.0),
            hop_limit: 1,
            hop_start: 3,
            timestamp: 1000.0,
            port: PortType::Traceroute,
            relay_node: None,
            traceroute: payload,
        }
    }

    #[test]
    fn test_complete_leg() {
        let (hops, complete) = decode_leg(&[A, B, C], &[6.25, -3.5], Direction::Forward).unwrap();
        assert!(complete);
        assert_eq!(hops.len(), 2);
        assert_eq!((hops[0].from_node, hops[0].to_node), (A, B));
        assert_eq!(hops[0].snr, Some(6.25));
        assert!(!hops[0].is_target_hop);
        assert_eq!((hops[1].from_node, hops[1].to_node), (B, C));
        assert_eq!(hops[1].snr, Some(-3.5));
        assert!(hops[1].is_target_hop);
        assert_eq!(hops[1].hop_index, 1);
    }

    #[test]
    fn test_missing_final_snr() {
        let (hops, complete) = decode_leg(&[A, B, C], &[6.25], Direction::Forward).unwrap();
        assert!(!complete);
        assert_eq!(hops[1].snr, None);
        assert!(hops[1].is_target_hop);
    }

    #[test]
    fn test_non_finite_snr_is_null() {
        let (hops, complete) = decode_leg(&[A, B], &[f64::NAN], Direction::Return).unwrap();
        assert!(!complete);
        assert_eq!(hops[0].snr, None);
        assert_eq!(hops[0].direction, Direction::Return);
    }

    #[test]
    fn test_malformed_legs() {
        assert_eq!(
            decode_leg(&[], &[], Direction::Forward),
            Err(DecodeError::EmptyRoute { direction: Direction::Forward })
        );
        assert_eq!(
            decode_leg(&[A], &[], Direction::Forward),
            Err(DecodeError::SingleNodeRoute { direction: Direction::Forward })
        );
        assert!(matches!(
            decode_leg(&[A, B], &[1.0, 2.0], Direction::Forward),
            Err(DecodeError::ExcessSnr { max: 1, snr: 2, .. })
        ));
    }

    #[test]
    fn test_hops_taken_clamps() {
        assert_eq!(hops_taken(3, 1), (2, false));
        assert_eq!(hops_taken(2, 2), (0, false));
        assert_eq!(hops_taken(1, 3), (0, true));
    }

    #[test]
    fn test_decode_with_return_path() {
        let capture = traceroute_capture(Some(TraceroutePayload {
            route: vec![A, B, C],
            snr_towards: vec![5.0, 2.0],
            route_back: Some(vec![C, B, A]),
            snr_back: vec![1.5],
        }));
        let record = decode_traceroute(&capture).unwrap();
        assert_eq!(record.origin, A);
        assert_eq!(record.destination, C);
        assert_eq!(record.hops_taken, 2);
        assert!(record.is_complete);
        assert_eq!(record.return_complete, Some(false));
        let back = record.return_path.as_ref().unwrap();
        assert_eq!(back.len(), 2);
        assert!(back.iter().all(|h| h.direction == Direction::Return));
        assert!(back[1].is_target_hop);
        assert_eq!(record.all_hops().count(), 4);
        assert_eq!(record.forward_route(), vec![A, B, C]);
    }

    #[test]
    fn test_route_summary() {
        let capture = traceroute_capture(Some(TraceroutePayload {
            route: vec![A, B],
            snr_towards: vec![],
            route_back: None,
            snr_back: vec![],
        }));
        let record = decode_traceroute(&capture).unwrap();
        assert_eq!(record.route_summary(), "!0000000a → !0000000b (?)");
    }

    #[test]
    fn test_batch_isolates_failures() {
        let good = traceroute_capture(Some(TraceroutePayload {
            route: vec![A, B],
            snr_towards: vec![3.0],
            route_back: None,
            snr_back: vec![],
        }));
        let empty = traceroute_capture(Some(TraceroutePayload::default()));
        let missing = traceroute_capture(None);
        let mut text = good.clone();
        text.port = PortType::TextMessage;

        let batch = decode_batch(&[good, empty, missing, text]);
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.failures.len(), 2);
        assert_eq!(batch.failures[1].error, DecodeError::MissingPayload);
        assert_eq!(batch.failures[0].raw, Some(TraceroutePayload::default()));
        assert!(batch.failures[1].raw.is_none());

        let err: AnalysisError = batch.failures[0].clone().into();
        assert!(err.to_string().contains("route is empty"));
    }
}
