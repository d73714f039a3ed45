//! 도메인 타입 — 심각도와 알림
//!
//! 규칙 평가 결과로 생성되는 [`Alert`]와 심각도 레벨을 정의합니다.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::flow::Flow;

/// 심각도 레벨
///
/// `Ord` 구현으로 심각도 비교가 가능합니다 (`Info < Low < Medium < High < Critical`).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Severity {
    /// 정보성 이벤트
    #[default]
    Info,
    /// 낮은 심각도
    Low,
    /// 중간 심각도
    Medium,
    /// 높은 심각도
    High,
    /// 치명적 — 즉시 대응 필요
    Critical,
}

impl Severity {
    /// 문자열에서 심각도를 파싱합니다. 대소문자를 구분하지 않습니다.
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "info" | "informational" => Some(Self::Info),
            "low" => Some(Self::Low),
            "medium" | "med" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" | "crit" => Some(Self::Critical),
            _ => None,
        }
    }

    /// 메트릭 레이블용 소문자 이름
    pub fn as_label(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "Info"),
            Self::Low => write!(f, "Low"),
            Self::Medium => write!(f, "Medium"),
            Self::High => write!(f, "High"),
            Self::Critical => write!(f, "Critical"),
        }
    }
}

/// 이상 탐지 알림
///
/// `id`는 스토어 삽입 시점에 부여되며, 이후 재사용되지 않는 불투명 값입니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// 알림을 생성한 규칙 이름 (예: "traffic_spike")
    #[serde(rename = "type")]
    pub alert_type: String,
    pub severity: Severity,
    pub namespace: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_data: Option<Flow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Alert {
    /// 현재 시각으로 알림을 생성합니다.
    pub fn new(
        alert_type: impl Into<String>,
        severity: Severity,
        namespace: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            alert_type: alert_type.into(),
            severity,
            namespace: namespace.into(),
            message: message.into(),
            timestamp: Utc::now(),
            flow_data: None,
            metadata: None,
        }
    }

    /// 관련 플로우를 첨부합니다.
    pub fn with_flow(mut self, flow: Flow) -> Self {
        self.flow_data = Some(flow);
        self
    }

    /// 구조화된 부가 정보를 첨부합니다.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} ({}): {}",
            self.severity, self.alert_type, self.namespace, self.message,
        )
    }
}
