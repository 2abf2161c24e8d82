#[cfg(test)]
mod engine_scenarios {
    use std::time::Duration;

    use meshlens::analysis::distance::EARTH_RADIUS_KM;
    use meshlens::analysis::{
        aggregate_links, compare_gateways, correlate_batch, decode_batch, decode_traceroute,
        longest_direct_links, AnalysisError, AnalysisQuery, CorrelationMethod, Direction,
        GatewayId, LocationTable, NodeId, NodeLocation, PacketCapture, PortType, QueryBudget,
        TraceroutePayload,
    };
    use meshlens::config::CorrelationSettings;

    fn capture(id: Option<u32>, gateway: &str, rssi: i32, ts: f64) -> PacketCapture {
        PacketCapture {
            packet_id: id,
            from_node: NodeId(0x0a),
            to_node: NodeId::BROADCAST,
            gateway_id: GatewayId::new(gateway),
            rssi: Some(rssi),
            snr: Some(4.0),
            hop_limit: 3,
            hop_start: 3,
            timestamp: ts,
            port: PortType::TextMessage,
            relay_node: None,
            traceroute: None,
        }
    }

    fn traceroute(route: &[u32], snr: &[f64], ts: f64) -> PacketCapture {
        PacketCapture {
            packet_id: Some(ts as u32),
            from_node: NodeId(route[0]),
            to_node: NodeId(route[route.len() - 1]),
            gateway_id: GatewayId::new("gw1"),
            rssi: Some(-100),
            snr: Some(1.0),
            hop_limit: 5,
            hop_start: 7,
            timestamp: ts,
            port: PortType::Traceroute,
            relay_node: None,
            traceroute: Some(TraceroutePayload {
                route: route.iter().copied().map(NodeId).collect(),
                snr_towards: snr.to_vec(),
                route_back: None,
                snr_back: Vec::new(),
            }),
        }
    }

    #[test]
    fn test_packet_42_correlation() {
        let captures = vec![
            capture(Some(42), "G1", -60, 100.0),
            capture(Some(42), "G2", -65, 100.5),
            capture(Some(42), "G3", -70, 99.8),
        ];
        let packets = correlate_batch(&captures, &CorrelationSettings::default());
        assert_eq!(packets.len(), 1);

        let packet = &packets[0];
        assert_eq!(packet.primary.gateway_id.as_str(), "G1");
        assert_eq!(packet.method, CorrelationMethod::ByLogicalId);
        assert_eq!(packet.gateway_count(), 3);

        let others: Vec<(&str, f64)> = packet
            .other_receptions
            .iter()
            .map(|o| (o.capture.gateway_id.as_str(), o.offset_secs))
            .collect();
        assert_eq!(others.len(), 2);
        assert_eq!(others[0].0, "G2");
        assert!((others[0].1 - 0.5).abs() < 1e-9);
        assert_eq!(others[1].0, "G3");
        assert!((others[1].1 + 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_one_packet_per_logical_id_with_unique_gateways() {
        let captures = vec![
            capture(Some(7), "G1", -60, 10.0),
            capture(Some(8), "G1", -61, 10.1),
            capture(Some(7), "G2", -62, 10.2),
            capture(Some(7), "G1", -63, 10.3), // duplicate report
            capture(Some(8), "G3", -64, 10.4),
        ];
        let packets = correlate_batch(&captures, &CorrelationSettings::default());
        assert_eq!(packets.len(), 2);
        for packet in &packets {
            let mut gateways = packet.gateways();
            let total = gateways.len();
            gateways.sort();
            gateways.dedup();
            assert_eq!(gateways.len(), total);
        }
        let seven = packets.iter().find(|p| p.primary.packet_id == Some(7)).unwrap();
        assert_eq!(seven.gateway_count(), 2);
    }

    #[test]
    fn test_traceroute_complete_and_incomplete() {
        let complete = decode_traceroute(&traceroute(&[1, 2, 3], &[6.25, -1.5], 1.0)).unwrap();
        assert!(complete.is_complete);
        assert_eq!(complete.hops_taken, 2);
        assert_eq!(complete.forward.len(), 2);
        assert_eq!(
            (complete.forward[0].from_node, complete.forward[0].to_node),
            (NodeId(1), NodeId(2))
        );
        assert_eq!(complete.forward[0].snr, Some(6.25));
        assert!(!complete.forward[0].is_target_hop);
        assert_eq!(complete.forward[1].snr, Some(-1.5));
        assert!(complete.forward[1].is_target_hop);
        assert_eq!(complete.forward[1].direction, Direction::Forward);

        let partial = decode_traceroute(&traceroute(&[1, 2, 3], &[6.25], 2.0)).unwrap();
        assert!(!partial.is_complete);
        assert_eq!(
            (partial.forward[1].from_node, partial.forward[1].to_node),
            (NodeId(2), NodeId(3))
        );
        assert_eq!(partial.forward[1].snr, None);
    }

    #[test]
    fn test_hop_anomaly_is_clamped_and_flagged() {
        let mut odd = traceroute(&[1, 2], &[1.0], 3.0);
        odd.hop_start = 2;
        odd.hop_limit = 4;
        let record = decode_traceroute(&odd).unwrap();
        assert_eq!(record.hops_taken, 0);
        assert!(record.hop_anomaly);
    }

    #[test]
    fn test_link_aggregate_ignores_storage_order() {
        let captures = vec![
            traceroute(&[1, 2, 3], &[6.25, -1.5], 10.0),
            traceroute(&[3, 2], &[0.5], 20.0),
            traceroute(&[2, 1], &[2.75], 30.0),
        ];
        let forward = decode_batch(&captures).records;
        let mut reversed = forward.clone();
        reversed.reverse();

        let a = aggregate_links(&forward);
        let b = aggregate_links(&reversed);
        assert_eq!(a, b);

        let link = a
            .iter()
            .find(|l| (l.node_a, l.node_b) == (NodeId(2), NodeId(3)))
            .unwrap();
        assert_eq!(link.sample_count, 2);
        assert_eq!(link.directions.get(Direction::Forward), 2);
        assert_eq!(link.directions.get(Direction::Return), 0);
    }

    fn equator(node: u32, km: f64) -> NodeLocation {
        NodeLocation {
            node_id: NodeId(node),
            latitude: 0.0,
            longitude: (km / EARTH_RADIUS_KM).to_degrees(),
            as_of: 0.0,
        }
    }

    #[test]
    fn test_eleven_km_link() {
        let table = LocationTable::new(vec![
            NodeLocation {
                node_id: NodeId(1),
                latitude: 0.0,
                longitude: 0.0,
                as_of: 0.0,
            },
            NodeLocation {
                node_id: NodeId(2),
                latitude: 0.0,
                longitude: 0.1,
                as_of: 0.0,
            },
        ]);
        let records = decode_batch(&[traceroute(&[1, 2], &[3.0], 1.0)]).records;
        let ranked = longest_direct_links(
            &records,
            &table,
            &AnalysisQuery::new(),
            100,
            &QueryBudget::unlimited(),
        );
        let km = ranked.entries[0].distance_km.unwrap();
        assert!((km - 11.1).abs() / 11.1 < 0.01, "got {}", km);
    }

    #[test]
    fn test_longest_links_filter_and_cap() {
        let distances = [50.0, 40.0, 30.0, 20.0, 15.0, 8.0, 5.0];
        let mut fixes = vec![equator(100, 0.0)];
        let mut captures = Vec::new();
        // Store in shuffled order so the ranking does the sorting
        for (i, &d) in distances.iter().enumerate().rev() {
            let node = i as u32 + 1;
            fixes.push(equator(node, d));
            captures.push(traceroute(&[100, node], &[2.0], 10.0 + i as f64));
        }
        let table = LocationTable::new(fixes);
        let records = decode_batch(&captures).records;

        let query = AnalysisQuery::new().min_distance_km(10.0).max_results(5);
        let ranked = longest_direct_links(&records, &table, &query, 100, &QueryBudget::unlimited());

        let got: Vec<f64> = ranked.entries.iter().map(|e| e.distance_km.unwrap()).collect();
        let expected = [50.0, 40.0, 30.0, 20.0, 15.0];
        assert_eq!(got.len(), expected.len());
        for (g, e) in got.iter().zip(expected) {
            assert!((g - e).abs() < 1e-6, "got {:?}", got);
        }
        assert!(!ranked.truncated);
    }

    #[test]
    fn test_comparator_rejects_same_gateway() {
        let result = compare_gateways(
            &[],
            &GatewayId::new("!0000000b"),
            &GatewayId::new("!0000000b"),
            &AnalysisQuery::new(),
            Duration::from_secs(3600),
            100,
            &QueryBudget::unlimited(),
        );
        assert!(matches!(result, Err(AnalysisError::InvalidComparison { .. })));
    }

    #[test]
    fn test_comparator_excludes_hop_limit_mismatch() {
        let mut heard_direct = capture(Some(9), "gw1", -60, 50.0);
        heard_direct.hop_limit = 3;
        let mut heard_relayed = capture(Some(9), "gw2", -80, 50.4);
        heard_relayed.hop_limit = 2;
        let packets = correlate_batch(&[heard_direct, heard_relayed], &CorrelationSettings::default());

        let comparison = compare_gateways(
            &packets,
            &GatewayId::new("gw1"),
            &GatewayId::new("gw2"),
            &AnalysisQuery::new(),
            Duration::from_secs(3600),
            100,
            &QueryBudget::unlimited(),
        )
        .unwrap();
        assert_eq!(comparison.summary.common_packets, 0);
        assert_eq!(comparison.summary.excluded_hop_mismatch, 1);
        assert!(comparison.packets.is_empty());
    }
}
