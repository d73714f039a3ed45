//! 규칙 레지스트리 — 설정에서 내장 규칙 인스턴스 구성
//!
//! 설정의 `[rules.*]` 섹션을 내장 규칙 카탈로그에 매핑합니다.
//! 임계값은 느슨한 숫자(정수/실수)로 읽혀 f64로 강제 변환됩니다.

use std::sync::Arc;

use flowguard_core::config::GuardConfig;
use flowguard_core::rule::Rule;

use crate::builtin::{
    BlockConnectionRule, DdosFlowRule, NamespaceAccessRule, PortScanRule, QueryClient,
    SuspiciousOutboundRule, TrafficDeathRule, TrafficSpikeRule, UnusualTrafficRule,
};
use crate::engine::AlertEmitter;

/// 설정에서 활성화된 내장 규칙들을 생성합니다.
///
/// 알 수 없는 규칙 이름은 경고 후 건너뜁니다. 등록 순서는 이름순으로
/// 결정적입니다.
pub fn build_rules(
    config: &GuardConfig,
    query: Arc<dyn QueryClient>,
    emitter: AlertEmitter,
) -> Vec<Arc<dyn Rule>> {
    let namespaces = config.watch_namespaces();
    let interval = config.detection.check_interval();
    let baseline_window = config.detection.baseline_window();
    let mut rules: Vec<Arc<dyn Rule>> = Vec::new();

    let mut names: Vec<&String> = config.rules.keys().collect();
    names.sort();

    for name in names {
        let rule_config = &config.rules[name];
        if !rule_config.enabled {
            tracing::debug!(rule = %name, "rule disabled, skipping");
            continue;
        }
        let severity = rule_config.severity_level();

        match name.as_str() {
            "traffic_spike" => {
                let threshold = rule_config
                    .threshold_f64("multiplier")
                    .unwrap_or(config.detection.baseline_multiplier);
                rules.push(Arc::new(
                    TrafficSpikeRule::new(
                        true,
                        severity,
                        threshold,
                        namespaces.clone(),
                        query.clone(),
                        emitter.clone(),
                    )
                    .with_timings(interval, baseline_window),
                ));
            }
            "traffic_death" => {
                rules.push(Arc::new(
                    TrafficDeathRule::new(
                        true,
                        severity,
                        namespaces.clone(),
                        query.clone(),
                        emitter.clone(),
                    )
                    .with_timings(interval, baseline_window),
                ));
            }
            "block_connection" => {
                let threshold = rule_config.threshold_f64("count").unwrap_or(10.0);
                rules.push(Arc::new(BlockConnectionRule::new(
                    true,
                    severity,
                    threshold,
                    namespaces.clone(),
                    query.clone(),
                    emitter.clone(),
                )));
            }
            "port_scan" => {
                let threshold = rule_config.threshold_f64("distinct_ports").unwrap_or(10.0);
                rules.push(Arc::new(PortScanRule::new(
                    true,
                    severity,
                    threshold,
                    query.clone(),
                    emitter.clone(),
                )));
            }
            "suspicious_outbound" => {
                let threshold = rule_config.threshold_f64("count").unwrap_or(10.0);
                rules.push(Arc::new(SuspiciousOutboundRule::new(
                    true,
                    severity,
                    threshold,
                    rule_config.threshold_mode,
                    rule_config.cooldown(),
                    namespaces.clone(),
                    query.clone(),
                    emitter.clone(),
                )));
            }
            "namespace_access" => {
                if rule_config.forbidden_namespaces.is_empty() {
                    tracing::warn!(
                        rule = %name,
                        "no forbidden namespaces configured, rule will be idle"
                    );
                }
                rules.push(Arc::new(NamespaceAccessRule::new(
                    true,
                    severity,
                    rule_config.forbidden_namespaces.clone(),
                    rule_config.cooldown(),
                    query.clone(),
                    emitter.clone(),
                )));
            }
            "unusual_traffic" => {
                rules.push(Arc::new(UnusualTrafficRule::new(
                    true,
                    severity,
                    namespaces.clone(),
                    rule_config.allowed_sources.clone(),
                    rule_config.cooldown(),
                    query.clone(),
                    emitter.clone(),
                )));
            }
            "ddos_flow" => {
                let threshold = rule_config
                    .threshold_f64("multiplier")
                    .unwrap_or(config.detection.baseline_multiplier);
                rules.push(Arc::new(DdosFlowRule::new(true, severity, threshold)));
            }
            other => {
                tracing::warn!(rule = %other, "unknown rule type in config, skipping");
            }
        }
    }

    rules
}
