//! 이벤트 정규화 — 릴레이 원시 이벤트를 [`Flow`]로 변환
//!
//! # 폴백 규칙
//! - pod 이름이 비어있으면 `k8s:io.kubernetes.pod.name` 레이블에서 읽습니다.
//! - workload는 `k8s:app`, 그 다음 `app` 레이블 순서로 읽습니다.
//! - 서비스 이름은 `k8s:io.cilium.k8s.policy.serviceaccount`, 그 다음 workload
//!   순서로 읽습니다.
//! - TCP/UDP가 둘 다 실려 오면 TCP가 우선합니다.

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};

use flowguard_core::flow::{Endpoint, Flow, FlowType, IpPair, L7Kind, Layer4, TcpFlags, Verdict};

use crate::proto::{self, PbEndpoint, PbFlow};

const LABEL_POD_NAME: &str = "k8s:io.kubernetes.pod.name";
const LABEL_APP_K8S: &str = "k8s:app";
const LABEL_APP: &str = "app";
const LABEL_SERVICE_ACCOUNT: &str = "k8s:io.cilium.k8s.policy.serviceaccount";

/// 릴레이 이벤트를 정규화된 플로우로 변환합니다.
///
/// 이벤트에 플로우가 없으면 `None` — 호출자가 디코딩 실패로 집계합니다.
pub fn flow_from_proto(pb: Option<PbFlow>) -> Option<Flow> {
    let pb = pb?;

    Some(Flow {
        time: Some(convert_time(pb.time)),
        verdict: convert_verdict(pb.verdict),
        flow_type: convert_flow_type(pb.r#type),
        ip: pb.ip.map(|ip| IpPair {
            source: ip.source,
            destination: ip.destination,
        }),
        l4: convert_l4(pb.l4),
        l7: pb.l7.map(|l7| convert_l7(l7.r#type)),
        source: pb.source.map(convert_endpoint),
        destination: pb.destination.map(convert_endpoint),
    })
}

/// 이벤트 시각이 없으면 수신 시각을 사용합니다.
fn convert_time(ts: Option<prost_types::Timestamp>) -> DateTime<Utc> {
    ts.and_then(|t| Utc.timestamp_opt(t.seconds, t.nanos.max(0) as u32).single())
        .unwrap_or_else(Utc::now)
}

fn convert_verdict(code: i32) -> Verdict {
    use proto::verdict_code as c;
    match code {
        c::FORWARDED => Verdict::Forwarded,
        c::DROPPED => Verdict::Dropped,
        c::ERROR => Verdict::Error,
        c::AUDIT => Verdict::Audit,
        c::REDIRECTED => Verdict::Redirected,
        c::TRACED => Verdict::Traced,
        c::TRANSLATED => Verdict::Translated,
        _ => Verdict::Unknown,
    }
}

fn convert_flow_type(code: i32) -> FlowType {
    use proto::flow_type_code as c;
    match code {
        c::L3_L4 => FlowType::L3L4,
        c::L7 => FlowType::L7,
        _ => FlowType::Unknown,
    }
}

fn convert_l7(code: i32) -> L7Kind {
    use proto::l7_code as c;
    match code {
        c::HTTP => L7Kind::Http,
        c::KAFKA => L7Kind::Kafka,
        c::DNS => L7Kind::Dns,
        _ => L7Kind::Unknown,
    }
}

/// TCP가 있으면 TCP, 없으면 UDP. 둘 다 없으면 None.
fn convert_l4(l4: Option<proto::PbLayer4>) -> Option<Layer4> {
    let l4 = l4?;
    if let Some(tcp) = l4.tcp {
        return Some(Layer4::Tcp {
            src_port: tcp.source_port as u16,
            dst_port: tcp.destination_port as u16,
            flags: tcp.flags.map(|f| TcpFlags {
                syn: f.syn,
                ack: f.ack,
                fin: f.fin,
                rst: f.rst,
                psh: f.psh,
                urg: f.urg,
            }),
        });
    }
    l4.udp.map(|udp| Layer4::Udp {
        src_port: udp.source_port as u16,
        dst_port: udp.destination_port as u16,
    })
}

fn convert_endpoint(pb: PbEndpoint) -> Endpoint {
    let labels: HashMap<String, String> = pb
        .labels
        .iter()
        .filter_map(|label| {
            label
                .split_once('=')
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
        })
        .collect();

    let pod_name = if pb.pod_name.is_empty() {
        labels.get(LABEL_POD_NAME).cloned().unwrap_or_default()
    } else {
        pb.pod_name
    };

    let workload = labels
        .get(LABEL_APP_K8S)
        .or_else(|| labels.get(LABEL_APP))
        .cloned()
        .unwrap_or_default();

    let service_name = labels
        .get(LABEL_SERVICE_ACCOUNT)
        .cloned()
        .unwrap_or_else(|| workload.clone());

    Endpoint {
        namespace: pb.namespace,
        pod_name,
        service_name,
        workload,
        labels,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::{PbIp, PbLayer4, PbLayer7, PbTcp, PbTcpFlags, PbUdp};

    fn pb_endpoint(ns: &str, pod: &str, labels: &[&str]) -> PbEndpoint {
        PbEndpoint {
            namespace: ns.to_owned(),
            pod_name: pod.to_owned(),
            labels: labels.iter().map(|s| (*s).to_owned()).collect(),
        }
    }

    #[test]
    fn missing_flow_is_decode_failure() {
        assert!(flow_from_proto(None).is_none());
    }

    #[test]
    fn verdict_codes_map_to_enum() {
        assert_eq!(convert_verdict(1), Verdict::Forwarded);
        assert_eq!(convert_verdict(2), Verdict::Dropped);
        assert_eq!(convert_verdict(7), Verdict::Translated);
        assert_eq!(convert_verdict(99), Verdict::Unknown);
        assert_eq!(convert_verdict(-1), Verdict::Unknown);
    }

    #[test]
    fn missing_time_uses_receive_time() {
        let before = Utc::now();
        let flow = flow_from_proto(Some(PbFlow::default())).unwrap();
        let after = Utc::now();
        let time = flow.time.unwrap();
        assert!(time >= before && time <= after);
    }

    #[test]
    fn tcp_takes_precedence_over_udp() {
        let pb = PbFlow {
            l4: Some(PbLayer4 {
                tcp: Some(PbTcp {
                    source_port: 1000,
                    destination_port: 80,
                    flags: None,
                }),
                udp: Some(PbUdp {
                    source_port: 2000,
                    destination_port: 53,
                }),
            }),
            ..Default::default()
        };
        let flow = flow_from_proto(Some(pb)).unwrap();
        match flow.l4.unwrap() {
            Layer4::Tcp { dst_port, .. } => assert_eq!(dst_port, 80),
            Layer4::Udp { .. } => panic!("expected tcp precedence"),
        }
    }

    #[test]
    fn udp_used_when_tcp_absent() {
        let pb = PbFlow {
            l4: Some(PbLayer4 {
                tcp: None,
                udp: Some(PbUdp {
                    source_port: 2000,
                    destination_port: 53,
                }),
            }),
            ..Default::default()
        };
        let flow = flow_from_proto(Some(pb)).unwrap();
        assert_eq!(flow.l4.unwrap().destination_port(), 53);
    }

    #[test]
    fn tcp_flags_carry_over() {
        let pb = PbFlow {
            l4: Some(PbLayer4 {
                tcp: Some(PbTcp {
                    source_port: 1,
                    destination_port: 2,
                    flags: Some(PbTcpFlags {
                        syn: true,
                        rst: true,
                        ..Default::default()
                    }),
                }),
                udp: None,
            }),
            ..Default::default()
        };
        let flow = flow_from_proto(Some(pb)).unwrap();
        let flags = flow.tcp_flags().copied().unwrap();
        assert!(flags.syn && flags.rst);
        assert!(!flags.ack);
    }

    #[test]
    fn empty_ip_strings_are_preserved() {
        let pb = PbFlow {
            ip: Some(PbIp {
                source: String::new(),
                destination: "10.0.0.2".to_owned(),
            }),
            ..Default::default()
        };
        let flow = flow_from_proto(Some(pb)).unwrap();
        let ip = flow.ip.unwrap();
        assert_eq!(ip.source, "");
        assert_eq!(ip.destination, "10.0.0.2");
    }

    #[test]
    fn pod_name_falls_back_to_label() {
        let endpoint = convert_endpoint(pb_endpoint(
            "default",
            "",
            &["k8s:io.kubernetes.pod.name=web-abc12"],
        ));
        assert_eq!(endpoint.pod_name, "web-abc12");
    }

    #[test]
    fn workload_fallback_order() {
        let endpoint = convert_endpoint(pb_endpoint("default", "web-1", &["app=legacy-web"]));
        assert_eq!(endpoint.workload, "legacy-web");

        let endpoint = convert_endpoint(pb_endpoint(
            "default",
            "web-1",
            &["app=legacy-web", "k8s:app=web"],
        ));
        assert_eq!(endpoint.workload, "web");
    }

    #[test]
    fn service_name_fallback_order() {
        let endpoint = convert_endpoint(pb_endpoint(
            "default",
            "web-1",
            &["k8s:app=web", "k8s:io.cilium.k8s.policy.serviceaccount=web-sa"],
        ));
        assert_eq!(endpoint.service_name, "web-sa");

        let endpoint = convert_endpoint(pb_endpoint("default", "web-1", &["k8s:app=web"]));
        assert_eq!(endpoint.service_name, "web");
    }

    #[test]
    fn malformed_labels_are_skipped() {
        let endpoint = convert_endpoint(pb_endpoint("default", "web-1", &["noequals", "k=v"]));
        assert_eq!(endpoint.labels.len(), 1);
        assert_eq!(endpoint.labels.get("k").map(String::as_str), Some("v"));
    }

    #[test]
    fn l7_type_mapping() {
        let pb = PbFlow {
            l7: Some(PbLayer7 { r#type: 3 }),
            ..Default::default()
        };
        let flow = flow_from_proto(Some(pb)).unwrap();
        assert_eq!(flow.l7, Some(L7Kind::Dns));
    }
}
