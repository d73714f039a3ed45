//! 플로우 메트릭 레코더 — 수신 경로의 메트릭 기록
//!
//! 디코딩을 통과한 모든 플로우에 대해 계약된 메트릭 패밀리를 갱신합니다.
//! 메트릭 기록은 스토어 추가와 브로드캐스트보다 먼저 수행됩니다.

use std::collections::HashSet;

use metrics::counter;

use flowguard_core::flow::{service_name_from_pod, Flow, Layer4, Verdict};
use flowguard_core::metrics::*;

use crate::portscan::PortScanTracker;

/// 기본 의심 포트 집합 — 22(SSH)는 기본적으로 제외됩니다.
pub const DEFAULT_SUSPICIOUS_PORTS: [u16; 6] = [23, 135, 445, 1433, 3306, 5432];

/// 플로우당 메트릭을 기록하는 레코더
pub struct FlowRecorder {
    portscan: PortScanTracker,
    suspicious_ports: HashSet<u16>,
}

impl FlowRecorder {
    pub fn new() -> Self {
        Self {
            portscan: PortScanTracker::new(),
            suspicious_ports: DEFAULT_SUSPICIOUS_PORTS.into_iter().collect(),
        }
    }

    /// 설정에서 의심 포트 집합을 교체합니다.
    pub fn with_suspicious_ports(ports: impl IntoIterator<Item = u16>) -> Self {
        Self {
            portscan: PortScanTracker::new(),
            suspicious_ports: ports.into_iter().collect(),
        }
    }

    /// 포트스캔 추적기 — 데몬의 주기 cleanup 태스크가 사용합니다.
    pub fn portscan(&self) -> &PortScanTracker {
        &self.portscan
    }

    pub fn is_suspicious_port(&self, port: u16) -> bool {
        self.suspicious_ports.contains(&port)
    }

    /// 플로우 한 건의 메트릭을 기록합니다.
    pub fn record(&self, flow: &Flow) {
        let namespace = flow.effective_namespace().to_owned();

        counter!(FLOWS_TOTAL, LABEL_NAMESPACE => namespace.clone()).increment(1);
        counter!(
            FLOWS_BY_VERDICT_TOTAL,
            LABEL_VERDICT => flow.verdict.as_str(),
            LABEL_NAMESPACE => namespace.clone()
        )
        .increment(1);

        if let Some(l4) = &flow.l4 {
            counter!(
                FLOWS_BY_PROTOCOL_TOTAL,
                LABEL_PROTOCOL => l4.protocol_label(),
                LABEL_NAMESPACE => namespace.clone()
            )
            .increment(1);
        }

        if let Some(ip) = &flow.ip {
            self.record_ip_indexed(flow, ip, &namespace);
        }

        if let Some(l7) = flow.l7 {
            counter!(
                L7_REQUESTS_TOTAL,
                LABEL_TYPE => l7.as_str(),
                LABEL_NAMESPACE => namespace.clone()
            )
            .increment(1);
        }

        if flow.verdict == Verdict::Error {
            counter!(
                FLOW_ERRORS_TOTAL,
                LABEL_ERROR_TYPE => "verdict_error",
                LABEL_NAMESPACE => namespace.clone()
            )
            .increment(1);
        }

        self.record_namespace_access(flow);
        self.record_suspicious_outbound(flow, &namespace);
        self.record_source_dest_traffic(flow, &namespace);
    }

    /// IP가 있는 플로우에만 적용되는 메트릭 — IP가 없으면 전부 건너뜁니다.
    fn record_ip_indexed(&self, flow: &Flow, ip: &flowguard_core::flow::IpPair, namespace: &str) {
        counter!(
            NEW_DESTINATIONS_TOTAL,
            LABEL_SOURCE_IP => ip.source.clone(),
            LABEL_DESTINATION_IP => ip.destination.clone(),
            LABEL_NAMESPACE => namespace.to_owned()
        )
        .increment(1);

        if flow.verdict == Verdict::Dropped {
            counter!(
                TCP_DROPS_TOTAL,
                LABEL_NAMESPACE => namespace.to_owned(),
                LABEL_SOURCE_IP => ip.source.clone(),
                LABEL_DESTINATION_IP => ip.destination.clone()
            )
            .increment(1);
        }

        let Some(l4) = &flow.l4 else {
            return;
        };

        counter!(
            FLOWS_BY_SOURCE_TOTAL,
            LABEL_SOURCE_IP => ip.source.clone(),
            LABEL_SOURCE_PORT => l4.source_port().to_string(),
            LABEL_NAMESPACE => namespace.to_owned()
        )
        .increment(1);
        counter!(
            FLOWS_BY_DESTINATION_TOTAL,
            LABEL_DESTINATION_IP => ip.destination.clone(),
            LABEL_DESTINATION_PORT => l4.destination_port().to_string(),
            LABEL_NAMESPACE => namespace.to_owned()
        )
        .increment(1);

        if let Layer4::Tcp { flags, .. } = l4 {
            counter!(
                TCP_CONNECTIONS_TOTAL,
                LABEL_NAMESPACE => namespace.to_owned(),
                LABEL_SOURCE_IP => ip.source.clone(),
                LABEL_DESTINATION_IP => ip.destination.clone()
            )
            .increment(1);

            if let Some(flags) = flags {
                for flag in flags.set_flags() {
                    counter!(
                        TCP_FLAGS_TOTAL,
                        LABEL_FLAG => flag,
                        LABEL_NAMESPACE => namespace.to_owned()
                    )
                    .increment(1);
                }
            }
        }

        let dst_port = l4.destination_port();
        if dst_port > 0 {
            self.portscan
                .observe(&ip.source, &ip.destination, dst_port, namespace);
        }
    }

    /// source/destination 네임스페이스가 모두 비어있지 않고 서로 다르면 기록합니다.
    fn record_namespace_access(&self, flow: &Flow) {
        let (Some(src), Some(dst)) = (&flow.source, &flow.destination) else {
            return;
        };
        if src.namespace.is_empty() || dst.namespace.is_empty() || src.namespace == dst.namespace {
            return;
        }

        let dest_service = if dst.service_name.is_empty() {
            "unknown".to_owned()
        } else {
            dst.service_name.clone()
        };
        let dest_pod = if dst.pod_name.is_empty() {
            "unknown".to_owned()
        } else {
            dst.pod_name.clone()
        };

        counter!(
            NAMESPACE_ACCESS_TOTAL,
            LABEL_SOURCE_NAMESPACE => src.namespace.clone(),
            LABEL_DEST_NAMESPACE => dst.namespace.clone(),
            LABEL_DEST_SERVICE => dest_service,
            LABEL_DEST_POD => dest_pod
        )
        .increment(1);
    }

    fn record_suspicious_outbound(&self, flow: &Flow, namespace: &str) {
        let Some(port) = flow.destination_port() else {
            return;
        };
        if self.suspicious_ports.contains(&port) {
            counter!(
                SUSPICIOUS_OUTBOUND_TOTAL,
                LABEL_NAMESPACE => namespace.to_owned(),
                LABEL_DESTINATION_PORT => port.to_string()
            )
            .increment(1);
        }
    }

    /// 양쪽 pod 이름이 모두 있어야 기록합니다. 목적지 서비스는 pod 이름에서 유도합니다.
    fn record_source_dest_traffic(&self, flow: &Flow, namespace: &str) {
        let (Some(src), Some(dst)) = (&flow.source, &flow.destination) else {
            return;
        };
        if src.pod_name.is_empty() || dst.pod_name.is_empty() {
            return;
        }

        let dest_service = service_name_from_pod(&dst.pod_name);
        counter!(
            SOURCE_DEST_TRAFFIC_TOTAL,
            LABEL_NAMESPACE => namespace.to_owned(),
            LABEL_SOURCE_POD => src.pod_name.clone(),
            LABEL_DEST_POD => dst.pod_name.clone(),
            LABEL_DEST_SERVICE => dest_service
        )
        .increment(1);
    }
}

impl Default for FlowRecorder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowguard_core::flow::{Endpoint, IpPair, TcpFlags};
    use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};

    fn endpoint(ns: &str, pod: &str) -> Endpoint {
        Endpoint {
            namespace: ns.to_owned(),
            pod_name: pod.to_owned(),
            ..Default::default()
        }
    }

    fn tcp_flow(ns: &str, dst_port: u16) -> Flow {
        Flow {
            verdict: Verdict::Forwarded,
            ip: Some(IpPair {
                source: "10.0.0.1".to_owned(),
                destination: "10.0.0.2".to_owned(),
            }),
            l4: Some(Layer4::Tcp {
                src_port: 40000,
                dst_port,
                flags: Some(TcpFlags {
                    syn: true,
                    ..Default::default()
                }),
            }),
            source: Some(endpoint(ns, "web-1")),
            ..Default::default()
        }
    }

    fn counter_value(snapshotter: &Snapshotter, name: &str, labels: &[(&str, &str)]) -> u64 {
        let snapshot = snapshotter.snapshot().into_vec();
        snapshot
            .iter()
            .filter(|(key, _, _, _)| {
                let key = key.key();
                key.name() == name
                    && labels.iter().all(|(lk, lv)| {
                        key.labels().any(|l| l.key() == *lk && l.value() == *lv)
                    })
            })
            .map(|(_, _, _, value)| match value {
                DebugValue::Counter(v) => *v,
                _ => 0,
            })
            .sum()
    }

    #[test]
    fn every_flow_increments_flows_total_once() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let flow_recorder = FlowRecorder::new();

        metrics::with_local_recorder(&recorder, || {
            flow_recorder.record(&tcp_flow("default", 80));
            flow_recorder.record(&tcp_flow("default", 443));
            flow_recorder.record(&tcp_flow("shop", 80));
        });

        assert_eq!(
            counter_value(&snapshotter, FLOWS_TOTAL, &[("namespace", "default")]),
            2
        );
        assert_eq!(
            counter_value(&snapshotter, FLOWS_TOTAL, &[("namespace", "shop")]),
            1
        );
    }

    #[test]
    fn verdict_counters_partition_flows_total() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let flow_recorder = FlowRecorder::new();

        metrics::with_local_recorder(&recorder, || {
            flow_recorder.record(&tcp_flow("default", 80));
            let mut dropped = tcp_flow("default", 80);
            dropped.verdict = Verdict::Dropped;
            flow_recorder.record(&dropped);
        });

        let total = counter_value(&snapshotter, FLOWS_TOTAL, &[("namespace", "default")]);
        let by_verdict = counter_value(
            &snapshotter,
            FLOWS_BY_VERDICT_TOTAL,
            &[("namespace", "default")],
        );
        assert_eq!(total, by_verdict);
        assert_eq!(
            counter_value(
                &snapshotter,
                FLOWS_BY_VERDICT_TOTAL,
                &[("verdict", "DROPPED")]
            ),
            1
        );
    }

    #[test]
    fn flows_without_ip_skip_ip_indexed_metrics() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let flow_recorder = FlowRecorder::new();

        metrics::with_local_recorder(&recorder, || {
            let mut flow = tcp_flow("default", 80);
            flow.ip = None;
            flow_recorder.record(&flow);
        });

        assert_eq!(counter_value(&snapshotter, FLOWS_TOTAL, &[]), 1);
        assert_eq!(counter_value(&snapshotter, TCP_CONNECTIONS_TOTAL, &[]), 0);
        assert_eq!(counter_value(&snapshotter, NEW_DESTINATIONS_TOTAL, &[]), 0);
        assert_eq!(flow_recorder.portscan().pair_count(), 0);
    }

    #[test]
    fn dropped_flow_with_ip_counts_tcp_drop() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let flow_recorder = FlowRecorder::new();

        metrics::with_local_recorder(&recorder, || {
            let mut flow = tcp_flow("default", 80);
            flow.verdict = Verdict::Dropped;
            flow_recorder.record(&flow);
        });

        assert_eq!(
            counter_value(&snapshotter, TCP_DROPS_TOTAL, &[("source_ip", "10.0.0.1")]),
            1
        );
    }

    #[test]
    fn set_tcp_flags_are_counted_individually() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let flow_recorder = FlowRecorder::new();

        metrics::with_local_recorder(&recorder, || {
            let mut flow = tcp_flow("default", 80);
            flow.l4 = Some(Layer4::Tcp {
                src_port: 1,
                dst_port: 80,
                flags: Some(TcpFlags {
                    syn: true,
                    ack: true,
                    ..Default::default()
                }),
            });
            flow_recorder.record(&flow);
        });

        assert_eq!(
            counter_value(&snapshotter, TCP_FLAGS_TOTAL, &[("flag", "SYN")]),
            1
        );
        assert_eq!(
            counter_value(&snapshotter, TCP_FLAGS_TOTAL, &[("flag", "ACK")]),
            1
        );
        assert_eq!(
            counter_value(&snapshotter, TCP_FLAGS_TOTAL, &[("flag", "FIN")]),
            0
        );
    }

    #[test]
    fn cross_namespace_flow_records_namespace_access() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let flow_recorder = FlowRecorder::new();

        metrics::with_local_recorder(&recorder, || {
            let mut flow = tcp_flow("app", 80);
            flow.destination = Some(Endpoint {
                namespace: "kube-system".to_owned(),
                pod_name: "kube-dns-abc12".to_owned(),
                service_name: "kube-dns".to_owned(),
                ..Default::default()
            });
            flow_recorder.record(&flow);

            // 같은 네임스페이스는 기록하지 않음
            let mut same_ns = tcp_flow("app", 80);
            same_ns.destination = Some(endpoint("app", "api-1"));
            flow_recorder.record(&same_ns);
        });

        assert_eq!(
            counter_value(
                &snapshotter,
                NAMESPACE_ACCESS_TOTAL,
                &[("source_namespace", "app"), ("dest_namespace", "kube-system")]
            ),
            1
        );
    }

    #[test]
    fn namespace_access_defaults_missing_service_and_pod() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let flow_recorder = FlowRecorder::new();

        metrics::with_local_recorder(&recorder, || {
            let mut flow = tcp_flow("app", 80);
            flow.destination = Some(endpoint("backend", ""));
            flow_recorder.record(&flow);
        });

        assert_eq!(
            counter_value(
                &snapshotter,
                NAMESPACE_ACCESS_TOTAL,
                &[("dest_service", "unknown"), ("dest_pod", "unknown")]
            ),
            1
        );
    }

    #[test]
    fn suspicious_port_set_matches_contract() {
        let flow_recorder = FlowRecorder::new();
        for port in DEFAULT_SUSPICIOUS_PORTS {
            assert!(flow_recorder.is_suspicious_port(port));
        }
        assert!(!flow_recorder.is_suspicious_port(22));
        assert!(!flow_recorder.is_suspicious_port(443));
    }

    #[test]
    fn suspicious_outbound_counts_only_listed_ports() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let flow_recorder = FlowRecorder::new();

        metrics::with_local_recorder(&recorder, || {
            flow_recorder.record(&tcp_flow("default", 3306));
            flow_recorder.record(&tcp_flow("default", 443));
            flow_recorder.record(&tcp_flow("default", 22));
        });

        assert_eq!(
            counter_value(&snapshotter, SUSPICIOUS_OUTBOUND_TOTAL, &[]),
            1
        );
        assert_eq!(
            counter_value(
                &snapshotter,
                SUSPICIOUS_OUTBOUND_TOTAL,
                &[("destination_port", "3306")]
            ),
            1
        );
    }

    #[test]
    fn source_dest_traffic_requires_both_pod_names() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let flow_recorder = FlowRecorder::new();

        metrics::with_local_recorder(&recorder, || {
            let mut flow = tcp_flow("default", 80);
            flow.source = Some(endpoint("default", "demo-frontend-7d9f8b6c5d-xk2p9"));
            flow.destination = Some(endpoint("default", "demo-api-5f7b8c9d4f-abc12"));
            flow_recorder.record(&flow);

            let mut missing_pod = tcp_flow("default", 80);
            missing_pod.destination = Some(endpoint("default", ""));
            flow_recorder.record(&missing_pod);
        });

        assert_eq!(
            counter_value(
                &snapshotter,
                SOURCE_DEST_TRAFFIC_TOTAL,
                &[("dest_service", "demo-api")]
            ),
            1
        );
        assert_eq!(counter_value(&snapshotter, SOURCE_DEST_TRAFFIC_TOTAL, &[]), 1);
    }

    #[test]
    fn portscan_tracker_observes_destination_ports() {
        let flow_recorder = FlowRecorder::new();
        let recorder = DebuggingRecorder::new();
        metrics::with_local_recorder(&recorder, || {
            for port in 80..=90 {
                flow_recorder.record(&tcp_flow("default", port));
            }
        });
        assert_eq!(
            flow_recorder.portscan().distinct_count("10.0.0.1", "10.0.0.2"),
            11
        );
    }
}
