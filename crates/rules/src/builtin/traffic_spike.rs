//! traffic_spike — 네임스페이스별 트래픽 스파이크 탐지
//!
//! 10초 틱마다 `rate(flows_total{namespace="ns"}[1m])`를 질의합니다.
//! 베이스라인 학습(기본 60초)이 끝나기 전에는 절대 알림을 내지 않으며,
//! 이후 현재 레이트가 베이스라인의 임계 배수를 넘으면 알림을 냅니다.
//! 데이터가 없는 틱은 샘플로 취급하지 않습니다.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

use flowguard_core::rule::{BoxFuture, Rule};
use flowguard_core::types::{Alert, Severity};

use crate::baseline::BaselineCollector;
use crate::builtin::{QueryClient, CHECK_INTERVAL, QUERY_TIMEOUT};
use crate::engine::AlertEmitter;

const RULE_NAME: &str = "traffic_spike";

pub struct TrafficSpikeRule {
    enabled: bool,
    severity: Severity,
    threshold: f64,
    interval: Duration,
    baseline_window: Duration,
    query_timeout: Duration,
    query: Arc<dyn QueryClient>,
    emitter: AlertEmitter,
    namespaces: Vec<String>,
    baselines: Mutex<HashMap<String, BaselineCollector>>,
}

impl TrafficSpikeRule {
    pub fn new(
        enabled: bool,
        severity: Severity,
        threshold: f64,
        namespaces: Vec<String>,
        query: Arc<dyn QueryClient>,
        emitter: AlertEmitter,
    ) -> Self {
        let threshold = if threshold <= 0.0 { 3.0 } else { threshold };
        Self {
            enabled,
            severity,
            threshold,
            interval: CHECK_INTERVAL,
            baseline_window: Duration::from_secs(60),
            query_timeout: QUERY_TIMEOUT,
            query,
            emitter,
            namespaces,
            baselines: Mutex::new(HashMap::new()),
        }
    }

    /// 평가 주기와 학습 윈도우를 조정합니다.
    pub fn with_timings(mut self, interval: Duration, baseline_window: Duration) -> Self {
        self.interval = interval;
        self.baseline_window = baseline_window;
        self
    }

    async fn check(&self) {
        for namespace in &self.namespaces {
            self.check_namespace(namespace).await;
        }
    }

    async fn check_namespace(&self, namespace: &str) {
        let expr = format!(r#"rate(flows_total{{namespace="{namespace}"}}[1m])"#);
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

        // 데이터 없음은 샘플이 아님 — 이 틱은 건너뜀
        let Some(current) = result.first_value() else {
            tracing::debug!(rule = RULE_NAME, namespace, "no data for namespace");
            return;
        };

        let fired = {
            let mut baselines = self.baselines.lock().expect("baseline map poisoned");
            let collector = baselines
                .entry(namespace.to_owned())
                .or_insert_with(|| BaselineCollector::new(self.baseline_window));

            match collector.observe(current) {
                None => {
                    match collector.value() {
                        Some(baseline) => tracing::info!(
                            rule = RULE_NAME,
                            namespace,
                            baseline,
                            "baseline calculated"
                        ),
                        None => tracing::debug!(
                            rule = RULE_NAME,
                            namespace,
                            rate = current,
                            remaining_secs = collector.remaining().map(|d| d.as_secs()),
                            "collecting baseline"
                        ),
                    }
                    None
                }
                Some(baseline) if baseline <= 0.0 => {
                    if current > 0.0 {
                        collector.reset_value(current);
                        tracing::info!(
                            rule = RULE_NAME,
                            namespace,
                            baseline = current,
                            "replacing zero baseline with current rate"
                        );
                    }
                    None
                }
                Some(baseline) => {
                    let multiplier = current / baseline;
                    tracing::debug!(
                        rule = RULE_NAME,
                        namespace,
                        rate = current,
                        baseline,
                        multiplier,
                        "evaluated namespace"
                    );
                    (multiplier > self.threshold).then_some((multiplier, baseline))
                }
            }
        };

        if let Some((multiplier, baseline)) = fired {
            let alert = Alert::new(
                RULE_NAME,
                self.severity,
                namespace,
                format!(
                    "Traffic spike detected in namespace {namespace}: {multiplier:.2}x baseline \
                     ({current:.2} flows/sec vs {baseline:.2} baseline)"
                ),
            );
            tracing::warn!(rule = RULE_NAME, namespace, multiplier, "traffic spike alert");
            (self.emitter)(alert);
        }
    }
}

impl Rule for TrafficSpikeRule {
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
