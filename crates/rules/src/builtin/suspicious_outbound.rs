//! suspicious_outbound — 위험 포트로의 아웃바운드 연결 탐지
//!
//! 10초 틱마다 네임스페이스별 최근 1분간 의심 포트 연결 수를 포트별로
//! 질의합니다. 기본 정책은 0이 아닌 값 전부에 대해 알림이며,
//! `threshold_mode`가 켜지면 임계값 초과 시에만 알림을 냅니다.
//! (네임스페이스, 포트) 키당 60초 쿨다운이 적용됩니다.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

use flowguard_core::rule::{BoxFuture, Rule};
use flowguard_core::types::{Alert, Severity};

use crate::builtin::{QueryClient, CHECK_INTERVAL, QUERY_TIMEOUT};
use crate::cooldown::CooldownMap;
use crate::engine::AlertEmitter;

const RULE_NAME: &str = "suspicious_outbound";

pub struct SuspiciousOutboundRule {
    enabled: bool,
    severity: Severity,
    /// threshold_mode일 때만 사용되는 분당 임계값
    threshold: f64,
    threshold_mode: bool,
    interval: Duration,
    query_timeout: Duration,
    query: Arc<dyn QueryClient>,
    emitter: AlertEmitter,
    namespaces: Vec<String>,
    cooldowns: CooldownMap,
}

impl SuspiciousOutboundRule {
    pub fn new(
        enabled: bool,
        severity: Severity,
        threshold: f64,
        threshold_mode: bool,
        cooldown: Duration,
        namespaces: Vec<String>,
        query: Arc<dyn QueryClient>,
        emitter: AlertEmitter,
    ) -> Self {
        let threshold = if threshold <= 0.0 { 10.0 } else { threshold };
        Self {
            enabled,
            severity,
            threshold,
            threshold_mode,
            interval: CHECK_INTERVAL,
            query_timeout: QUERY_TIMEOUT,
            query,
            emitter,
            namespaces,
            cooldowns: CooldownMap::new(cooldown),
        }
    }

    async fn check(&self) {
        for namespace in &self.namespaces {
            self.check_namespace(namespace).await;
        }
    }

    async fn check_namespace(&self, namespace: &str) {
        let expr = format!(
            r#"sum by (destination_port) (increase(suspicious_outbound_total{{namespace="{namespace}"}}[1m]))"#
        );
        let result = match self.query.query(&expr, self.query_timeout).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(
                    rule = RULE_NAME,
                    namespace,
                    error = %e,
                    "query failed, skipping tick"
                );
                return;
            }
        };

        for sample in result.samples() {
            let count = sample.value;
            if count <= 0.0 {
                continue;
            }
            if self.threshold_mode && count <= self.threshold {
                continue;
            }

            let port = sample.label("destination_port");
            let key = format!("{namespace}:{port}");
            if !self.cooldowns.try_fire(&key) {
                tracing::debug!(rule = RULE_NAME, namespace, port, "suppressed by cooldown");
                continue;
            }

            let alert = Alert::new(
                RULE_NAME,
                self.severity,
                namespace,
                format!(
                    "Suspicious outbound connection detected in namespace {namespace}: \
                     {count:.0} connections to port {port} in the last minute"
                ),
            );
            tracing::warn!(rule = RULE_NAME, namespace, port, count, "suspicious outbound alert");
            (self.emitter)(alert);
        }
    }
}

impl Rule for SuspiciousOutboundRule {
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
                threshold_mode = self.threshold_mode,
                "starting periodic checks"
            );
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.check().await;
                        self.cooldowns.purge_expired();
                    }
                    _ = shutdown.recv() => {
                        tracing::info!(rule = RULE_NAME, "stopping periodic checks");
                        return;
                    }
                }
            }
        })
    }
}
