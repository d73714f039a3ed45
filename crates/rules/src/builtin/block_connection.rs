//! block_connection — 차단된 연결 급증 탐지
//!
//! 10초 틱마다 네임스페이스별 최근 1분간 DROPPED 플로우 수를 질의하고,
//! 임계값(기본 10)을 넘으면 알림을 냅니다.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

use flowguard_core::rule::{BoxFuture, Rule};
use flowguard_core::types::{Alert, Severity};

use crate::builtin::{QueryClient, CHECK_INTERVAL, QUERY_TIMEOUT};
use crate::engine::AlertEmitter;

const RULE_NAME: &str = "block_connection";

pub struct BlockConnectionRule {
    enabled: bool,
    severity: Severity,
    threshold: f64,
    interval: Duration,
    query_timeout: Duration,
    query: Arc<dyn QueryClient>,
    emitter: AlertEmitter,
    namespaces: Vec<String>,
}

impl BlockConnectionRule {
    pub fn new(
        enabled: bool,
        severity: Severity,
        threshold: f64,
        namespaces: Vec<String>,
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
            namespaces,
        }
    }

    async fn check(&self) {
        for namespace in &self.namespaces {
            self.check_namespace(namespace).await;
        }
    }

    async fn check_namespace(&self, namespace: &str) {
        let expr = format!(
            r#"sum(increase(flows_by_verdict_total{{verdict="DROPPED",namespace="{namespace}"}}[1m]))"#
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

        let Some(drop_count) = result.first_value() else {
            tracing::debug!(rule = RULE_NAME, namespace, "no dropped flows");
            return;
        };

        tracing::debug!(
            rule = RULE_NAME,
            namespace,
            drop_count,
            threshold = self.threshold,
            "evaluated namespace"
        );

        if drop_count > self.threshold {
            let alert = Alert::new(
                RULE_NAME,
                self.severity,
                namespace,
                format!(
                    "Blocked connections detected in namespace {namespace}: {drop_count:.0} \
                     DROPPED flows in 1 minute (threshold: {:.0})",
                    self.threshold
                ),
            );
            tracing::warn!(rule = RULE_NAME, namespace, drop_count, "block connection alert");
            (self.emitter)(alert);
        }
    }
}

impl Rule for BlockConnectionRule {
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
