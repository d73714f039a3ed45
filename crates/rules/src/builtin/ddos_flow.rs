//! ddos_flow — 플로우 훅 기반 DDoS 휴리스틱
//!
//! 주기 질의 없이 수신 경로의 `evaluate`에서 직접 동작하는 유일한 내장
//! 규칙입니다. 네임스페이스별로 인프로세스 카운터를 유지하며,
//! 5분 학습 후 1분 윈도우의 플로우 레이트가 베이스라인의 임계 배수를
//! 넘으면 알림을 냅니다.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use flowguard_core::flow::Flow;
use flowguard_core::rule::Rule;
use flowguard_core::types::{Alert, Severity};

const RULE_NAME: &str = "ddos_flow";

#[derive(Debug)]
struct NamespaceState {
    baseline_start: Instant,
    /// flows/min — 학습이 끝나면 설정됨
    baseline: Option<f64>,
    window_start: Instant,
    window_count: u64,
}

impl NamespaceState {
    fn new(now: Instant) -> Self {
        Self {
            baseline_start: now,
            baseline: None,
            window_start: now,
            window_count: 1,
        }
    }
}

pub struct DdosFlowRule {
    enabled: bool,
    severity: Severity,
    threshold: f64,
    window: Duration,
    baseline_window: Duration,
    states: Mutex<HashMap<String, NamespaceState>>,
}

impl DdosFlowRule {
    pub fn new(enabled: bool, severity: Severity, threshold: f64) -> Self {
        let threshold = if threshold <= 0.0 { 3.0 } else { threshold };
        Self {
            enabled,
            severity,
            threshold,
            window: Duration::from_secs(60),
            baseline_window: Duration::from_secs(300),
            states: Mutex::new(HashMap::new()),
        }
    }

    /// 테스트용 — 윈도우를 줄입니다.
    pub fn with_windows(mut self, window: Duration, baseline_window: Duration) -> Self {
        self.window = window;
        self.baseline_window = baseline_window;
        self
    }

    fn minutes(duration: Duration) -> f64 {
        duration.as_secs_f64() / 60.0
    }
}

impl Rule for DdosFlowRule {
    fn name(&self) -> &str {
        RULE_NAME
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn evaluate(&self, flow: &Flow) -> Option<Alert> {
        if !self.enabled {
            return None;
        }

        let namespace = flow.effective_namespace().to_owned();
        let now = Instant::now();
        let mut states = self.states.lock().expect("ddos state poisoned");

        let state = match states.get_mut(&namespace) {
            Some(state) => state,
            None => {
                states.insert(namespace.clone(), NamespaceState::new(now));
                tracing::debug!(rule = RULE_NAME, namespace, "starting baseline collection");
                return None;
            }
        };

        state.window_count += 1;

        // 학습 단계 — 윈도우가 차면 베이스라인 확정
        if state.baseline.is_none() {
            let elapsed = now.duration_since(state.baseline_start);
            if elapsed >= self.baseline_window {
                let rate = state.window_count as f64 / Self::minutes(elapsed);
                state.baseline = Some(rate);
                state.window_count = 0;
                state.window_start = now;
                tracing::info!(
                    rule = RULE_NAME,
                    namespace,
                    baseline = rate,
                    "baseline calculated"
                );
            }
            return None;
        }

        // 평가 단계 — 윈도우가 차면 레이트 비교
        let elapsed = now.duration_since(state.window_start);
        if elapsed < self.window {
            return None;
        }

        let baseline = state.baseline.unwrap_or(0.0);
        let current_rate = state.window_count as f64 / Self::minutes(elapsed);
        state.window_count = 0;
        state.window_start = now;

        if baseline <= 0.0 {
            if current_rate > 0.0 {
                state.baseline = Some(current_rate);
                tracing::debug!(
                    rule = RULE_NAME,
                    namespace,
                    baseline = current_rate,
                    "replacing zero baseline"
                );
            }
            return None;
        }

        let multiplier = current_rate / baseline;
        tracing::debug!(
            rule = RULE_NAME,
            namespace,
            current_rate,
            baseline,
            multiplier,
            "window evaluated"
        );

        if multiplier > self.threshold {
            let alert = Alert::new(
                RULE_NAME,
                self.severity,
                namespace.as_str(),
                format!(
                    "DDoS attack detected in namespace {namespace}: {multiplier:.2}x baseline \
                     ({current_rate:.2} flows/min vs {baseline:.2} baseline/min)"
                ),
            );
            tracing::warn!(rule = RULE_NAME, namespace, multiplier, "ddos flow alert");
            return Some(alert);
        }

        None
    }
}
