//! port_scan — 포트 스캔 탐지
//!
//! 10초 틱마다 `portscan_distinct_ports_10s > 0`을 질의하고, 반환된
//! 각 (source_ip, dest_ip) 시계열의 값이 임계값(기본 10)을 넘으면
//! 해당 IP 쌍과 관측 수를 담은 알림을 냅니다.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

use flowguard_core::rule::{BoxFuture, Rule};
use flowguard_core::types::{Alert, Severity};

use crate::builtin::{QueryClient, CHECK_INTERVAL, QUERY_TIMEOUT};
use crate::engine::AlertEmitter;

const RULE_NAME: &str = "port_scan";
const QUERY: &str = "portscan_distinct_ports_10s > 0";

pub struct PortScanRule {
    enabled: bool,
    severity: Severity,
    threshold: f64,
    interval: Duration,
    query_timeout: Duration,
    query: Arc<dyn QueryClient>,
    emitter: AlertEmitter,
}

impl PortScanRule {
    pub fn new(
        enabled: bool,
        severity: Severity,
        threshold: f64,
        query: Arc<dyn QueryClient>,
        emitter: AlertEmitter,
    ) -> Self {
        let threshold = if threshold <= 0.0 { 10.0 } else { threshold };
        Self {
            enabled,
            severity,
            threshold,
            interval: CHECK_INTERVAL,
            query_timeout: QUERY_TIMEOUT,
            query,
            emitter,
        }
    }

    async fn check(&self) {
        let result = match self.query.query(QUERY, self.query_timeout).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(rule = RULE_NAME, error = %e, "query failed, skipping tick");
                return;
            }
        };

        for sample in result.samples() {
            let source_ip = sample.label("source_ip");
            let dest_ip = sample.label("dest_ip");
            let distinct_ports = sample.value;

            tracing::debug!(
                rule = RULE_NAME,
                source_ip,
                dest_ip,
                distinct_ports,
                threshold = self.threshold,
                "evaluated pair"
            );

            if distinct_ports > self.threshold {
                let namespace = {
                    let ns = sample.label("namespace");
                    if ns.is_empty() { "unknown" } else { ns }
                };
                let alert = Alert::new(
                    RULE_NAME,
                    self.severity,
                    namespace,
                    format!(
                        "Port scanning detected: {distinct_ports:.0} distinct ports in \
                         10 seconds from {source_ip} to {dest_ip} (threshold: {:.0})",
                        self.threshold
                    ),
                )
                .with_metadata(serde_json::json!({
                    "source_ip": source_ip,
                    "dest_ip": dest_ip,
                    "distinct_ports": distinct_ports,
                }));
                tracing::warn!(
                    rule = RULE_NAME,
                    source_ip,
                    dest_ip,
                    distinct_ports,
                    "port scan alert"
                );
                (self.emitter)(alert);
            }
        }
    }
}

impl Rule for PortScanRule {
    fn name(&self) -> &str {
        RULE_NAME
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn start(&self, mut shutdown: broadcast::Receiver<()>) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if !self.enabled {
                return;
            }
            tracing::info!(
                rule = RULE_NAME,
                interval_secs = self.interval.as_secs(),
                threshold = self.threshold,
                "starting periodic checks"
            );
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => self.check().await,
                    _ = shutdown.recv() => {
                        tracing::info!(rule = RULE_NAME, "stopping periodic checks");
                        return;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::testing::{collecting_emitter, labeled_sample, ScriptedQueryClient};
    use flowguard_telemetry::QueryValue;

    fn scan_vector(count: f64) -> QueryValue {
        QueryValue::Vector(vec![labeled_sample(
            &[
                ("source_ip", "10.0.0.1"),
                ("dest_ip", "10.0.0.2"),
                ("namespace", "default"),
            ],
            count,
        )])
    }

    #[tokio::test]
    async fn fires_above_threshold_with_pair_details() {
        let (emitter, alerts) = collecting_emitter();
        let rule = PortScanRule::new(
            true,
            Severity::High,
            10.0,
            ScriptedQueryClient::new(vec![Ok(scan_vector(11.0))]),
            emitter,
        );
        rule.check().await;

        let alerts = alerts.lock().unwrap();
        assert_eq!(alerts.len(), 1);
        let alert = &alerts[0];
        assert!(alert.message.contains("11 distinct ports"));
        assert!(alert.message.contains("10.0.0.1"));
        assert!(alert.message.contains("10.0.0.2"));
        assert_eq!(alert.namespace, "default");
        let metadata = alert.metadata.as_ref().unwrap();
        assert_eq!(metadata["distinct_ports"], 11.0);
    }

    #[tokio::test]
    async fn below_threshold_stays_silent() {
        let (emitter, alerts) = collecting_emitter();
        let rule = PortScanRule::new(
            true,
            Severity::High,
            10.0,
            ScriptedQueryClient::new(vec![Ok(scan_vector(10.0))]),
            emitter,
        );
        rule.check().await;
        assert!(alerts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn each_offending_pair_gets_its_own_alert() {
        let (emitter, alerts) = collecting_emitter();
        let result = QueryValue::Vector(vec![
            labeled_sample(&[("source_ip", "10.0.0.1"), ("dest_ip", "10.0.0.2")], 15.0),
            labeled_sample(&[("source_ip", "10.0.0.3"), ("dest_ip", "10.0.0.4")], 20.0),
            labeled_sample(&[("source_ip", "10.0.0.5"), ("dest_ip", "10.0.0.6")], 3.0),
        ]);
        let rule = PortScanRule::new(
            true,
            Severity::High,
            10.0,
            ScriptedQueryClient::new(vec![Ok(result)]),
            emitter,
        );
        rule.check().await;
        assert_eq!(alerts.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn missing_namespace_label_defaults_to_unknown() {
        let (emitter, alerts) = collecting_emitter();
        let result = QueryValue::Vector(vec![labeled_sample(
            &[("source_ip", "10.0.0.1"), ("dest_ip", "10.0.0.2")],
            12.0,
        )]);
        let rule = PortScanRule::new(
            true,
            Severity::High,
            10.0,
            ScriptedQueryClient::new(vec![Ok(result)]),
            emitter,
        );
        rule.check().await;
        assert_eq!(alerts.lock().unwrap()[0].namespace, "unknown");
    }
}
