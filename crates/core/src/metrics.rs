//! 메트릭 상수 및 설명 등록
//!
//! 모든 메트릭의 이름과 설명을 중앙에서 정의합니다. 규칙 엔진이 이름으로
//! 질의하므로 메트릭 패밀리 이름은 공개 계약의 일부입니다.
//! 각 모듈은 이 상수를 사용하여 `metrics::counter!()`, `metrics::gauge!()`,
//! `metrics::histogram!()` 매크로를 호출합니다.

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 네임스페이스 레이블 키
pub const LABEL_NAMESPACE: &str = "namespace";

/// 판정 레이블 키 (FORWARDED, DROPPED, ...)
pub const LABEL_VERDICT: &str = "verdict";

/// 프로토콜 레이블 키 (tcp, udp)
pub const LABEL_PROTOCOL: &str = "protocol";

/// TCP 플래그 레이블 키 (SYN, ACK, ...)
pub const LABEL_FLAG: &str = "flag";

/// 심각도 레이블 키 (info, low, medium, high, critical)
pub const LABEL_SEVERITY: &str = "severity";

/// 알림 타입(규칙 이름) 레이블 키
pub const LABEL_TYPE: &str = "type";

/// 에러 종류 레이블 키
pub const LABEL_ERROR_TYPE: &str = "error_type";

/// 출발지 IP 레이블 키
pub const LABEL_SOURCE_IP: &str = "source_ip";

/// 목적지 IP 레이블 키
pub const LABEL_DESTINATION_IP: &str = "destination_ip";

/// 포트스캔 게이지의 목적지 IP 레이블 키 (질의 계약상 축약형)
pub const LABEL_DEST_IP: &str = "dest_ip";

/// 출발지 포트 레이블 키
pub const LABEL_SOURCE_PORT: &str = "source_port";

/// 목적지 포트 레이블 키
pub const LABEL_DESTINATION_PORT: &str = "destination_port";

/// 출발지 네임스페이스 레이블 키
pub const LABEL_SOURCE_NAMESPACE: &str = "source_namespace";

/// 목적지 네임스페이스 레이블 키
pub const LABEL_DEST_NAMESPACE: &str = "dest_namespace";

/// 목적지 서비스 레이블 키
pub const LABEL_DEST_SERVICE: &str = "dest_service";

/// 목적지 pod 레이블 키
pub const LABEL_DEST_POD: &str = "dest_pod";

/// 출발지 pod 레이블 키
pub const LABEL_SOURCE_POD: &str = "source_pod";

// ─── 플로우 메트릭 ──────────────────────────────────────────────────

/// 처리된 전체 플로우 수 (counter, label: namespace)
pub const FLOWS_TOTAL: &str = "flows_total";

/// 판정별 플로우 수 (counter, labels: verdict, namespace)
pub const FLOWS_BY_VERDICT_TOTAL: &str = "flows_by_verdict_total";

/// 프로토콜별 플로우 수 (counter, labels: protocol, namespace)
pub const FLOWS_BY_PROTOCOL_TOTAL: &str = "flows_by_protocol_total";

/// 출발지별 플로우 수 (counter, labels: source_ip, source_port, namespace)
pub const FLOWS_BY_SOURCE_TOTAL: &str = "flows_by_source_total";

/// 목적지별 플로우 수 (counter, labels: destination_ip, destination_port, namespace)
pub const FLOWS_BY_DESTINATION_TOTAL: &str = "flows_by_destination_total";

/// L7 요청 수 (counter, labels: type, namespace)
pub const L7_REQUESTS_TOTAL: &str = "l7_requests_total";

/// 판정이 ERROR인 플로우 수 (counter, labels: error_type, namespace)
pub const FLOW_ERRORS_TOTAL: &str = "flow_errors_total";

/// 플로우 단건 처리 시간 (histogram, label: namespace)
pub const FLOW_PROCESSING_DURATION_SECONDS: &str = "flow_processing_duration_seconds";

// ─── TCP 메트릭 ─────────────────────────────────────────────────────

/// TCP 연결 수 (counter, labels: namespace, source_ip, destination_ip)
pub const TCP_CONNECTIONS_TOTAL: &str = "tcp_connections_total";

/// 설정된 TCP 플래그 수 (counter, labels: flag, namespace)
pub const TCP_FLAGS_TOTAL: &str = "tcp_flags_total";

/// 드롭된 TCP 플로우 수 (counter, labels: namespace, source_ip, destination_ip)
pub const TCP_DROPS_TOTAL: &str = "tcp_drops_total";

// ─── 이상 탐지 메트릭 ───────────────────────────────────────────────

/// 목적지 연결 수 (counter, labels: source_ip, destination_ip, namespace)
pub const NEW_DESTINATIONS_TOTAL: &str = "new_destinations_total";

/// 네임스페이스 간 접근 수 (counter, labels: source_namespace, dest_namespace, dest_service, dest_pod)
pub const NAMESPACE_ACCESS_TOTAL: &str = "namespace_access_total";

/// 의심 포트로의 연결 수 (counter, labels: namespace, destination_port)
pub const SUSPICIOUS_OUTBOUND_TOTAL: &str = "suspicious_outbound_total";

/// pod 간 트래픽 수 (counter, labels: namespace, source_pod, dest_pod, dest_service)
pub const SOURCE_DEST_TRAFFIC_TOTAL: &str = "source_dest_traffic_total";

/// 최근 10초간 IP 쌍별 고유 목적지 포트 수 (gauge, labels: source_ip, dest_ip, namespace)
pub const PORTSCAN_DISTINCT_PORTS_10S: &str = "portscan_distinct_ports_10s";

// ─── 운영 메트릭 ────────────────────────────────────────────────────

/// 발생한 알림 수 (counter, labels: namespace, severity, type)
pub const GUARD_ALERTS_TOTAL: &str = "guard_alerts_total";

/// 업스트림 연결 실패 수 (counter, label: error_type)
pub const CONNECTION_ERRORS_TOTAL: &str = "connection_errors_total";

/// 디코딩 실패로 폐기된 이벤트 수 (counter)
pub const DECODE_ERRORS_TOTAL: &str = "decode_errors_total";

/// 채널 포화로 폐기된 알림 수 (counter)
pub const ALERTS_DROPPED_TOTAL: &str = "alerts_dropped_total";

/// 구독자 outbox 포화로 폐기된 메시지 수 (counter)
pub const SUBSCRIBER_DROPS_TOTAL: &str = "subscriber_drops_total";

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 메트릭의 설명(HELP 텍스트)을 등록합니다.
///
/// 전역 레코더 설치 후 프로세스당 한 번만 호출해야 합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge, describe_histogram};

    describe_counter!(FLOWS_TOTAL, "Total number of flows processed");
    describe_counter!(FLOWS_BY_VERDICT_TOTAL, "Total number of flows by verdict");
    describe_counter!(FLOWS_BY_PROTOCOL_TOTAL, "Total number of flows by protocol");
    describe_counter!(FLOWS_BY_SOURCE_TOTAL, "Total number of flows by source");
    describe_counter!(
        FLOWS_BY_DESTINATION_TOTAL,
        "Total number of flows by destination"
    );
    describe_counter!(L7_REQUESTS_TOTAL, "Total number of L7 requests by type");
    describe_counter!(FLOW_ERRORS_TOTAL, "Total number of flows with error verdict");
    describe_histogram!(
        FLOW_PROCESSING_DURATION_SECONDS,
        "Time spent processing a single flow in seconds"
    );

    describe_counter!(TCP_CONNECTIONS_TOTAL, "Total number of TCP connections");
    describe_counter!(TCP_FLAGS_TOTAL, "Total number of set TCP flags");
    describe_counter!(TCP_DROPS_TOTAL, "Total number of dropped TCP flows");

    describe_counter!(
        NEW_DESTINATIONS_TOTAL,
        "Total number of destination connections per source/destination pair"
    );
    describe_counter!(
        NAMESPACE_ACCESS_TOTAL,
        "Total number of cross-namespace access attempts"
    );
    describe_counter!(
        SUSPICIOUS_OUTBOUND_TOTAL,
        "Total number of connections to suspicious destination ports"
    );
    describe_counter!(
        SOURCE_DEST_TRAFFIC_TOTAL,
        "Total traffic between source and destination pods"
    );
    describe_gauge!(
        PORTSCAN_DISTINCT_PORTS_10S,
        "Number of distinct destination ports in the last 10 seconds per source-dest pair"
    );

    describe_counter!(GUARD_ALERTS_TOTAL, "Total alerts emitted by the rule engine");
    describe_counter!(
        CONNECTION_ERRORS_TOTAL,
        "Total number of upstream connection errors"
    );
    describe_counter!(
        DECODE_ERRORS_TOTAL,
        "Total number of upstream events dropped due to decode failure"
    );
    describe_counter!(
        ALERTS_DROPPED_TOTAL,
        "Total number of alerts dropped because the alert channel was full"
    );
    describe_counter!(
        SUBSCRIBER_DROPS_TOTAL,
        "Total number of messages dropped because a subscriber outbox was full"
    );
}
