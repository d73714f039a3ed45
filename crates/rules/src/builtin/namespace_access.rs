//! namespace_access — 금지 네임스페이스 접근 탐지
//!
//! 설정된 금지 네임스페이스마다 최근 1분간 유입을 소스별로 질의합니다.
//! 소스와 목적지가 다른 모든 시계열에 대해 알림을 내며,
//! (source→dest) 키당 60초 쿨다운이 적용됩니다.
//!
//! DNS 휴리스틱: 목적지 서비스/pod가 kube-dns 또는 coredns이고 소스가
//! kube-system이 아니면 "Unauthorized DNS access"로 문구를 바꿉니다.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

use flowguard_core::rule::{BoxFuture, Rule};
use flowguard_core::types::{Alert, Severity};

use crate::builtin::{QueryClient, CHECK_INTERVAL, QUERY_TIMEOUT};
use crate::cooldown::CooldownMap;
use crate::engine::AlertEmitter;

const RULE_NAME: &str = "namespace_access";
const DNS_TARGETS: [&str; 2] = ["kube-dns", "coredns"];

pub struct NamespaceAccessRule {
    enabled: bool,
    severity: Severity,
    interval: Duration,
    query_timeout: Duration,
    query: Arc<dyn QueryClient>,
    emitter: AlertEmitter,
    forbidden_namespaces: Vec<String>,
    cooldowns: CooldownMap,
}

impl NamespaceAccessRule {
    pub fn new(
        enabled: bool,
        severity: Severity,
        forbidden_namespaces: Vec<String>,
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
            forbidden_namespaces,
            cooldowns: CooldownMap::new(cooldown),
        }
    }

    async fn check(&self) {
        for forbidden in &self.forbidden_namespaces {
            self.check_forbidden(forbidden).await;
        }
    }

    async fn check_forbidden(&self, forbidden: &str) {
        let expr = format!(
            r#"sum by (source_namespace, dest_namespace, dest_service, dest_pod) (increase(namespace_access_total{{dest_namespace="{forbidden}"}}[1m]))"#
        );
        let result = match self.query.query(&expr, self.query_timeout).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(
                    rule = RULE_NAME,
                    forbidden,
                    error = %e,
                    "query failed, skipping tick"
                );
                return;
            }
        };

        for sample in result.samples() {
            if sample.value <= 0.0 {
                continue;
            }
            let source_ns = sample.label("source_namespace");
            let dest_ns = sample.label("dest_namespace");
            if source_ns.is_empty() || source_ns == dest_ns {
                continue;
            }

            let key = format!("{source_ns}->{dest_ns}");
            if !self.cooldowns.try_fire(&key) {
                tracing::debug!(rule = RULE_NAME, source_ns, dest_ns, "suppressed by cooldown");
                continue;
            }

            let dest_service = sample.label("dest_service");
            let dest_pod = sample.label("dest_pod");
            let message = if is_dns_target(dest_service, dest_pod) && source_ns != "kube-system" {
                format!(
                    "Unauthorized DNS access detected: namespace {source_ns} is querying \
                     {dest_service} in {dest_ns}"
                )
            } else {
                format!(
                    "Unauthorized cross-namespace access detected: {source_ns} -> {dest_ns} \
                     (service: {dest_service}, pod: {dest_pod})"
                )
            };

            let alert = Alert::new(RULE_NAME, self.severity, source_ns, message);
            tracing::warn!(rule = RULE_NAME, source_ns, dest_ns, "namespace access alert");
            (self.emitter)(alert);
        }
    }
}

fn is_dns_target(service: &str, pod: &str) -> bool {
    DNS_TARGETS.contains(&service) || DNS_TARGETS.contains(&pod)
}

impl Rule for NamespaceAccessRule {
    fn name(&self) -> &str {
        RULE_NAME
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn start(&self, mut shutdown: broadcast::Receiver<()>) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if !self.enabled || self.forbidden_namespaces.is_empty() {
                return;
            }
            tracing::info!(
                rule = RULE_NAME,
                forbidden = ?self.forbidden_namespaces,
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
