//! unusual_traffic — 보호 서비스로의 비정상 소스 트래픽 탐지
//!
//! 10초 틱마다 최근 30초간 pod 간 트래픽을 질의합니다. 목적지 서비스가
//! 허용 목록에 등록돼 있고, 소스 pod가 허용 prefix 어느 것과도 일치하지
//! 않으면 알림을 냅니다. `"*"`는 전체 허용 와일드카드입니다.
//! (네임스페이스, 소스 pod, 목적지 서비스) 키당 60초 쿨다운이 적용됩니다.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

use flowguard_core::rule::{BoxFuture, Rule};
use flowguard_core::types::{Alert, Severity};

use crate::builtin::{QueryClient, CHECK_INTERVAL, QUERY_TIMEOUT};
use crate::cooldown::CooldownMap;
use crate::engine::AlertEmitter;

const RULE_NAME: &str = "unusual_traffic";

pub struct UnusualTrafficRule {
    enabled: bool,
    severity: Severity,
    interval: Duration,
    query_timeout: Duration,
    query: Arc<dyn QueryClient>,
    emitter: AlertEmitter,
    namespaces: Vec<String>,
    /// 목적지 서비스 → 허용 소스 pod prefix 목록
    allowed_sources: HashMap<String, Vec<String>>,
    cooldowns: CooldownMap,
}

impl UnusualTrafficRule {
    pub fn new(
        enabled: bool,
        severity: Severity,
        namespaces: Vec<String>,
        allowed_sources: HashMap<String, Vec<String>>,
        cooldown: Duration,
        query: Arc<dyn QueryClient>,
        emitter: AlertEmitter,
    ) -> Self {
        Self {
            enabled,
            severity,
            interval: CHECK_INTERVAL,
            query_timeout: QUERY_TIMEOUT,
            query,
            emitter,
            namespaces,
            allowed_sources,
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
            r#"sum by (source_pod, dest_pod, dest_service) (increase(source_dest_traffic_total{{namespace="{namespace}"}}[30s]))"#
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

            let source_pod = sample.label("source_pod");
            let dest_pod = sample.label("dest_pod");
            let dest_service = sample.label("dest_service");

            if !self.is_unusual_source(source_pod, dest_service) {
                continue;
            }

            let key = format!("{namespace}:{source_pod}:{dest_service}");
            if !self.cooldowns.try_fire(&key) {
                tracing::debug!(
                    rule = RULE_NAME,
                    namespace,
                    source_pod,
                    dest_service,
                    "suppressed by cooldown"
                );
                continue;
            }

            let allowed = self
                .allowed_sources
                .get(dest_service)
                .map(Vec::as_slice)
                .unwrap_or_default();
            let alert = Alert::new(
                RULE_NAME,
                self.severity,
                namespace,
                format!(
                    "Unusual traffic detected: '{source_pod}' is accessing '{dest_service}' \
                     (allowed sources: {allowed:?}). Traffic count: {count:.0}"
                ),
            );
            tracing::warn!(
                rule = RULE_NAME,
                namespace,
                source_pod,
                dest_pod,
                dest_service,
                "unusual traffic alert"
            );
            (self.emitter)(alert);
        }
    }

    /// 소스 pod가 목적지 서비스의 허용 목록에 없으면 true
    fn is_unusual_source(&self, source_pod: &str, dest_service: &str) -> bool {
        if source_pod.is_empty() || dest_service.is_empty() {
            return false;
        }
        let Some(allowed) = self.allowed_sources.get(dest_service) else {
            // 보호 목록에 없는 서비스는 모든 소스를 허용
            return false;
        };
        !allowed
            .iter()
            .any(|entry| entry == "*" || source_pod.starts_with(entry.as_str()))
    }
}

impl Rule for UnusualTrafficRule {
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
                protected_services = self.allowed_sources.len(),
                interval_secs = self.interval.as_secs(),
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
