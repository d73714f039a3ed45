//! traffic_death — 트래픽 소멸 탐지
//!
//! traffic_spike와 같은 베이스라인 기계를 쓰지만, 데이터 없음은 0으로
//! 취급합니다. 베이스라인이 양수인데 현재 레이트가 0이면 알림을 냅니다 —
//! 트래픽이 한 번도 없던 네임스페이스는 절대 알림을 내지 않습니다.

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

const RULE_NAME: &str = "traffic_death";

pub struct TrafficDeathRule {
    enabled: bool,
    severity: Severity,
    interval: Duration,
    baseline_window: Duration,
    query_timeout: Duration,
    query: Arc<dyn QueryClient>,
    emitter: AlertEmitter,
    namespaces: Vec<String>,
    baselines: Mutex<HashMap<String, BaselineCollector>>,
}

impl TrafficDeathRule {
    pub fn new(
        enabled: bool,
        severity: Severity,
        namespaces: Vec<String>,
        query: Arc<dyn QueryClient>,
        emitter: AlertEmitter,
    ) -> Self {
        Self {
            enabled,
            severity,
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

        // 데이터 없음 = 트래픽 0
        let current = result.first_value().unwrap_or(0.0);

        let fired = {
            let mut baselines = self.baselines.lock().expect("baseline map poisoned");
            let collector = baselines
                .entry(namespace.to_owned())
                .or_insert_with(|| BaselineCollector::new(self.baseline_window));

            match collector.observe(current) {
                None => None,
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
                Some(baseline) => (current == 0.0).then_some(baseline),
            }
        };

        if let Some(baseline) = fired {
            let alert = Alert::new(
                RULE_NAME,
                self.severity,
                namespace,
                format!(
                    "Traffic death detected in namespace {namespace}: No traffic \
                     (0.00 flows/sec) but baseline was {baseline:.2} flows/sec. \
                     Service may be down!"
                ),
            );
            tracing::warn!(rule = RULE_NAME, namespace, baseline, "traffic death alert");
            (self.emitter)(alert);
        }
    }
}

impl Rule for TrafficDeathRule {
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
