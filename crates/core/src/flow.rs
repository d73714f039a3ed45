//! 플로우 모델 — 정규화된 L3/L4/L7 네트워크 이벤트
//!
//! 릴레이 스트림에서 수신한 이벤트를 정규화한 [`Flow`]와 하위 타입을 정의합니다.
//! 플로우는 정규화 이후 불변이며, 메트릭 기록/스토어/브로드캐스트가
//! 동일한 값을 공유합니다.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 업스트림 정책 판정
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verdict {
    #[serde(rename = "FORWARDED")]
    Forwarded,
    #[serde(rename = "DROPPED")]
    Dropped,
    #[serde(rename = "ERROR")]
    Error,
    #[serde(rename = "AUDIT")]
    Audit,
    #[serde(rename = "REDIRECTED")]
    Redirected,
    #[serde(rename = "TRACED")]
    Traced,
    #[serde(rename = "TRANSLATED")]
    Translated,
    #[default]
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

impl Verdict {
    /// 와이어/메트릭 레이블에 쓰이는 대문자 이름을 반환합니다.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Forwarded => "FORWARDED",
            Self::Dropped => "DROPPED",
            Self::Error => "ERROR",
            Self::Audit => "AUDIT",
            Self::Redirected => "REDIRECTED",
            Self::Traced => "TRACED",
            Self::Translated => "TRANSLATED",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 플로우 계층 구분
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowType {
    #[serde(rename = "L3_L4")]
    L3L4,
    #[serde(rename = "L7")]
    L7,
    #[default]
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

impl fmt::Display for FlowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::L3L4 => f.write_str("L3_L4"),
            Self::L7 => f.write_str("L7"),
            Self::Unknown => f.write_str("UNKNOWN"),
        }
    }
}

/// L7 프로토콜 타입 (타입 태그만 유지)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum L7Kind {
    #[serde(rename = "HTTP")]
    Http,
    #[serde(rename = "KAFKA")]
    Kafka,
    #[serde(rename = "DNS")]
    Dns,
    #[default]
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

impl L7Kind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "HTTP",
            Self::Kafka => "KAFKA",
            Self::Dns => "DNS",
            Self::Unknown => "UNKNOWN",
        }
    }
}

/// IP 계층 정보 — 빈 문자열도 그대로 보존합니다.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpPair {
    pub source: String,
    pub destination: String,
}

/// TCP 플래그 집합
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpFlags {
    pub syn: bool,
    pub ack: bool,
    pub fin: bool,
    pub rst: bool,
    pub psh: bool,
    pub urg: bool,
}

impl TcpFlags {
    /// 설정된 플래그를 (레이블명, 값) 쌍으로 순회합니다.
    pub fn set_flags(&self) -> impl Iterator<Item = &'static str> + '_ {
        [
            ("SYN", self.syn),
            ("ACK", self.ack),
            ("FIN", self.fin),
            ("RST", self.rst),
            ("PSH", self.psh),
            ("URG", self.urg),
        ]
        .into_iter()
        .filter_map(|(name, set)| set.then_some(name))
    }
}

impl fmt::Display for TcpFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for flag in self.set_flags() {
            if !first {
                f.write_str(",")?;
            }
            f.write_str(flag)?;
            first = false;
        }
        if first {
            f.write_str("NONE")?;
        }
        Ok(())
    }
}

/// L4 정보 — TCP 또는 UDP 중 정확히 하나
///
/// 업스트림 이벤트에 둘 다 실려 오는 경우 디코딩 단계에서 TCP가 우선합니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layer4 {
    Tcp {
        src_port: u16,
        dst_port: u16,
        #[serde(skip_serializing_if = "Option::is_none")]
        flags: Option<TcpFlags>,
    },
    Udp {
        src_port: u16,
        dst_port: u16,
    },
}

impl Layer4 {
    /// 메트릭 레이블용 프로토콜 이름
    pub fn protocol_label(&self) -> &'static str {
        match self {
            Self::Tcp { .. } => "tcp",
            Self::Udp { .. } => "udp",
        }
    }

    pub fn source_port(&self) -> u16 {
        match self {
            Self::Tcp { src_port, .. } | Self::Udp { src_port, .. } => *src_port,
        }
    }

    pub fn destination_port(&self) -> u16 {
        match self {
            Self::Tcp { dst_port, .. } | Self::Udp { dst_port, .. } => *dst_port,
        }
    }
}

/// 네임스페이스 정보를 포함한 클러스터 엔드포인트
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub namespace: String,
    pub pod_name: String,
    pub service_name: String,
    pub workload: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

/// 정규화된 네트워크 플로우
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    /// 이벤트 시각 — 업스트림에 없으면 수신 시각으로 채워집니다.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,
    pub verdict: Verdict,
    #[serde(rename = "type")]
    pub flow_type: FlowType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<IpPair>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub l4: Option<Layer4>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub l7: Option<L7Kind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Endpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<Endpoint>,
}

impl Flow {
    /// 유효 네임스페이스 — source가 비어있으면 destination, 둘 다 없으면 "unknown"
    pub fn effective_namespace(&self) -> &str {
        if let Some(src) = &self.source {
            if !src.namespace.is_empty() {
                return &src.namespace;
            }
        }
        if let Some(dst) = &self.destination {
            if !dst.namespace.is_empty() {
                return &dst.namespace;
            }
        }
        "unknown"
    }

    pub fn destination_port(&self) -> Option<u16> {
        self.l4.as_ref().map(Layer4::destination_port)
    }

    pub fn tcp_flags(&self) -> Option<&TcpFlags> {
        match &self.l4 {
            Some(Layer4::Tcp { flags, .. }) => flags.as_ref(),
            _ => None,
        }
    }
}

/// Pod 이름에서 서비스 이름을 유도합니다.
///
/// 디플로이먼트 pod 이름 꼬리의 해시 두 단(각 5자 이상)을 제거합니다.
/// 예: `demo-api-5f7b8c9d4f-abc12` → `demo-api`
pub fn service_name_from_pod(pod_name: &str) -> String {
    if pod_name.is_empty() {
        return String::new();
    }
    let parts: Vec<&str> = pod_name.split('-').collect();
    if parts.len() >= 3 {
        let last = parts[parts.len() - 1];
        let second_last = parts[parts.len() - 2];
        if last.len() >= 5 && second_last.len() >= 5 {
            return parts[..parts.len() - 2].join("-");
        }
    }
    pod_name.to_owned()
}
