//! 설정 관리 — flowguard.toml 파싱 및 런타임 설정
//!
//! 모든 섹션은 `#[serde(default)]`로 부분 설정 파일을 허용하며,
//! [`GuardConfig::validate`]가 치명적 오설정을 시작 시점에 거부합니다.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::Severity;

/// flowguard 통합 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// 애플리케이션 설정
    pub application: ApplicationConfig,
    /// 메트릭 질의 백엔드 설정
    pub prometheus: PrometheusConfig,
    /// 감시 대상 네임스페이스 목록 (비어있으면 default_namespace로 대체)
    pub namespaces: Vec<String>,
    /// 탐지 공통 설정
    pub detection: DetectionConfig,
    /// 규칙별 설정
    pub rules: HashMap<String, RuleConfig>,
    /// 알림 채널 설정
    pub alerting: AlertingConfig,
    /// 인메모리 스토어 설정
    pub storage: StorageConfig,
    /// 로깅 설정
    pub logging: LoggingConfig,
}

/// 애플리케이션 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// 옵저버빌리티 릴레이 주소
    pub relay_server: String,
    /// REST/websocket API 바인드 주소
    pub api_listen: String,
    /// 메트릭 노출 바인드 주소
    pub metrics_listen: String,
    /// namespaces가 비어있을 때 사용하는 기본 네임스페이스
    pub default_namespace: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            relay_server: "localhost:4245".to_owned(),
            api_listen: "0.0.0.0:5001".to_owned(),
            metrics_listen: "0.0.0.0:8080".to_owned(),
            default_namespace: "default".to_owned(),
        }
    }
}

/// 메트릭 질의 백엔드 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrometheusConfig {
    /// 질의 API base URL
    pub url: String,
    /// 질의 타임아웃 (초)
    pub timeout_seconds: u64,
    /// 스트림 재시도 대기 (초)
    pub retry_delay_seconds: u64,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:9090".to_owned(),
            timeout_seconds: 10,
            retry_delay_seconds: 2,
        }
    }
}

impl PrometheusConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_seconds)
    }
}

/// 탐지 공통 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// 기본 스파이크 배수 임계값
    pub baseline_multiplier: f64,
    /// 베이스라인 학습 윈도우 (초)
    pub baseline_window_secs: u64,
    /// 규칙 평가 주기 (초)
    pub check_interval_seconds: u64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            baseline_multiplier: 3.0,
            baseline_window_secs: 60,
            check_interval_seconds: 10,
        }
    }
}

impl DetectionConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_seconds)
    }

    pub fn baseline_window(&self) -> Duration {
        Duration::from_secs(self.baseline_window_secs)
    }
}

/// 규칙별 설정
///
/// `thresholds`는 느슨한 값으로 읽히며 (정수/실수 혼용),
/// [`RuleConfig::threshold_f64`]가 숫자로 강제 변환합니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleConfig {
    pub enabled: bool,
    pub severity: String,
    pub description: String,
    pub thresholds: HashMap<String, toml::Value>,
    /// 알림 중복 제거 간격 (초, 0이면 기본 60초)
    pub cooldown_seconds: u64,
    /// namespace_access 규칙: 접근 금지 네임스페이스 목록
    pub forbidden_namespaces: Vec<String>,
    /// unusual_traffic 규칙: 목적지 서비스별 허용 소스 prefix 목록 ("*" = 전체 허용)
    pub allowed_sources: HashMap<String, Vec<String>>,
    /// suspicious_outbound 규칙: true면 임계값 초과 시에만 알림 (기본은 non-zero 전부)
    pub threshold_mode: bool,
}

impl RuleConfig {
    /// 심각도 문자열을 파싱합니다. 해석 불가 시 Medium.
    pub fn severity_level(&self) -> Severity {
        Severity::from_str_loose(&self.severity).unwrap_or(Severity::Medium)
    }

    /// 임계값을 f64로 강제 변환합니다 (정수/실수 모두 허용).
    pub fn threshold_f64(&self, key: &str) -> Option<f64> {
        match self.thresholds.get(key)? {
            toml::Value::Float(v) => Some(*v),
            toml::Value::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// 쿨다운 간격 — 미설정 시 60초
    pub fn cooldown(&self) -> Duration {
        if self.cooldown_seconds == 0 {
            Duration::from_secs(60)
        } else {
            Duration::from_secs(self.cooldown_seconds)
        }
    }
}

/// 알림 채널 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertingConfig {
    pub enabled: bool,
    pub channels: ChannelsConfig,
    pub telegram: TelegramConfig,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            channels: ChannelsConfig::default(),
            telegram: TelegramConfig::default(),
        }
    }
}

/// 활성화할 알림 채널
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelsConfig {
    pub log: bool,
    pub telegram: bool,
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            log: true,
            telegram: false,
        }
    }
}

/// Telegram 봇 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
    pub parse_mode: String,
    pub enabled: bool,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            chat_id: String::new(),
            parse_mode: "Markdown".to_owned(),
            enabled: false,
        }
    }
}

/// 인메모리 스토어 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// 플로우 링 최대 보존 수
    pub max_flows: usize,
    /// 알림 링 최대 보존 수
    pub max_alerts: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_flows: 50_000,
            max_alerts: 10_000,
        }
    }
}

/// 로깅 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub level: String,
    /// 로그 형식 (json, pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: "json".to_owned(),
        }
    }
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            application: ApplicationConfig::default(),
            prometheus: PrometheusConfig::default(),
            namespaces: Vec::new(),
            detection: DetectionConfig::default(),
            rules: default_rules(),
            alerting: AlertingConfig::default(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl GuardConfig {
    /// 설정 파일을 읽고 검증합니다.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|_| ConfigError::FileNotFound {
                path: path.display().to_string(),
            })?;
        let config: Self = toml::from_str(&raw).map_err(|e| ConfigError::ParseFailed {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// 치명적 오설정을 거부합니다.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.prometheus.url.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "prometheus.url".to_owned(),
                reason: "must not be empty".to_owned(),
            });
        }
        if self.detection.check_interval_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "detection.check_interval_seconds".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }
        if self.storage.max_flows == 0 || self.storage.max_alerts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "storage".to_owned(),
                reason: "ring capacities must be greater than 0".to_owned(),
            });
        }
        match self.logging.format.as_str() {
            "json" | "pretty" => {}
            other => {
                return Err(ConfigError::InvalidValue {
                    field: "logging.format".to_owned(),
                    reason: format!("unknown format '{other}', expected 'json' or 'pretty'"),
                });
            }
        }
        for (name, rule) in &self.rules {
            if !rule.severity.is_empty() && Severity::from_str_loose(&rule.severity).is_none() {
                return Err(ConfigError::InvalidValue {
                    field: format!("rules.{name}.severity"),
                    reason: format!("unknown severity '{}'", rule.severity),
                });
            }
        }
        Ok(())
    }

    /// 감시 대상 네임스페이스 — 비어있으면 default_namespace 단일 목록
    pub fn watch_namespaces(&self) -> Vec<String> {
        if self.namespaces.is_empty() {
            vec![self.application.default_namespace.clone()]
        } else {
            self.namespaces.clone()
        }
    }

    /// 규칙 설정을 조회합니다.
    pub fn rule(&self, name: &str) -> Option<&RuleConfig> {
        self.rules.get(name)
    }
}

fn default_rules() -> HashMap<String, RuleConfig> {
    let mut rules = HashMap::new();
    rules.insert(
        "traffic_spike".to_owned(),
        RuleConfig {
            enabled: true,
            severity: "critical".to_owned(),
            description: "Traffic rate exceeds a multiple of the learned baseline".to_owned(),
            thresholds: HashMap::from([("multiplier".to_owned(), toml::Value::Float(3.0))]),
            ..Default::default()
        },
    );
    rules.insert(
        "traffic_death".to_owned(),
        RuleConfig {
            enabled: true,
            severity: "high".to_owned(),
            description: "Traffic disappears in a namespace with an established baseline"
                .to_owned(),
            ..Default::default()
        },
    );
    rules.insert(
        "block_connection".to_owned(),
        RuleConfig {
            enabled: true,
            severity: "high".to_owned(),
            description: "Dropped flows exceed a per-minute threshold".to_owned(),
            thresholds: HashMap::from([("count".to_owned(), toml::Value::Integer(10))]),
            ..Default::default()
        },
    );
    rules.insert(
        "port_scan".to_owned(),
        RuleConfig {
            enabled: true,
            severity: "high".to_owned(),
            description: "Distinct destination ports within 10s exceed a threshold".to_owned(),
            thresholds: HashMap::from([("distinct_ports".to_owned(), toml::Value::Integer(10))]),
            ..Default::default()
        },
    );
    rules.insert(
        "suspicious_outbound".to_owned(),
        RuleConfig {
            enabled: true,
            severity: "high".to_owned(),
            description: "Connections to dangerous destination ports".to_owned(),
            ..Default::default()
        },
    );
    rules.insert(
        "namespace_access".to_owned(),
        RuleConfig {
            enabled: false,
            severity: "high".to_owned(),
            description: "Cross-namespace access into a forbidden namespace".to_owned(),
            forbidden_namespaces: vec!["kube-system".to_owned()],
            ..Default::default()
        },
    );
    rules.insert(
        "unusual_traffic".to_owned(),
        RuleConfig {
            enabled: false,
            severity: "medium".to_owned(),
            description: "Traffic to a protected service from an unlisted source".to_owned(),
            ..Default::default()
        },
    );
    rules.insert(
        "ddos_flow".to_owned(),
        RuleConfig {
            enabled: false,
            severity: "critical".to_owned(),
            description: "Per-flow DDoS heuristic over in-process counters".to_owned(),
            thresholds: HashMap::from([("multiplier".to_owned(), toml::Value::Float(3.0))]),
            ..Default::default()
        },
    );
    rules
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = GuardConfig::default();
        config.validate().unwrap();
        assert_eq!(config.application.relay_server, "localhost:4245");
        assert!(config.rules.contains_key("traffic_spike"));
    }

    #[test]
    fn empty_query_url_is_fatal() {
        let config = GuardConfig {
            prometheus: PrometheusConfig {
                url: String::new(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_log_format_is_fatal() {
        let config = GuardConfig {
            logging: LoggingConfig {
                format: "xml".to_owned(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_severity_is_fatal() {
        let mut config = GuardConfig::default();
        config.rules.insert(
            "traffic_spike".to_owned(),
            RuleConfig {
                enabled: true,
                severity: "catastrophic".to_owned(),
                ..Default::default()
            },
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn watch_namespaces_falls_back_to_default() {
        let config = GuardConfig::default();
        assert_eq!(config.watch_namespaces(), vec!["default".to_owned()]);

        let config = GuardConfig {
            namespaces: vec!["shop".to_owned(), "payments".to_owned()],
            ..Default::default()
        };
        assert_eq!(config.watch_namespaces().len(), 2);
    }

    #[test]
    fn threshold_coerces_integer_and_float() {
        let rule = RuleConfig {
            thresholds: HashMap::from([
                ("count".to_owned(), toml::Value::Integer(10)),
                ("multiplier".to_owned(), toml::Value::Float(2.5)),
            ]),
            ..Default::default()
        };
        assert_eq!(rule.threshold_f64("count"), Some(10.0));
        assert_eq!(rule.threshold_f64("multiplier"), Some(2.5));
        assert_eq!(rule.threshold_f64("missing"), None);
    }

    #[test]
    fn cooldown_defaults_to_sixty_seconds() {
        let rule = RuleConfig::default();
        assert_eq!(rule.cooldown(), Duration::from_secs(60));
        let rule = RuleConfig {
            cooldown_seconds: 120,
            ..Default::default()
        };
        assert_eq!(rule.cooldown(), Duration::from_secs(120));
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let raw = r#"
            namespaces = ["shop"]

            [prometheus]
            url = "http://prometheus.monitoring:9090"

            [rules.port_scan]
            enabled = true
            severity = "high"
            thresholds = { distinct_ports = 15 }
        "#;
        let config: GuardConfig = toml::from_str(raw).unwrap();
        config.validate().unwrap();
        assert_eq!(config.namespaces, vec!["shop".to_owned()]);
        assert_eq!(config.prometheus.timeout_seconds, 10);
        assert_eq!(
            config.rule("port_scan").unwrap().threshold_f64("distinct_ports"),
            Some(15.0)
        );
    }

    #[test]
    fn severity_level_falls_back_to_medium() {
        let rule = RuleConfig {
            severity: String::new(),
            ..Default::default()
        };
        assert_eq!(rule.severity_level(), Severity::Medium);
    }
}
