//! 규칙 엔진 — 규칙 레지스트리와 알림 디스패처
//!
//! 규칙 등록과 플로우 단위 평가, 알림 방출을 담당합니다. 알림은 용량이
//! 제한된 채널에 비차단으로 들어가며, 채널이 가득 차면 기록 후 폐기됩니다 —
//! 수신 경로는 다운스트림 문제로 절대 실패하지 않습니다.
//!
//! 같은 이름의 규칙을 두 번 등록하면 독립적으로 스케줄되는 인스턴스가
//! 두 개 생깁니다. 엔진은 이름 중복을 제거하지 않습니다.

use std::sync::{Arc, Mutex, RwLock};

use metrics::counter;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use flowguard_core::flow::Flow;
use flowguard_core::metrics::{
    ALERTS_DROPPED_TOTAL, GUARD_ALERTS_TOTAL, LABEL_NAMESPACE, LABEL_SEVERITY, LABEL_TYPE,
};
use flowguard_core::rule::{Notifier, Rule};
use flowguard_core::types::Alert;

/// 알림 채널 기본 용량
pub const ALERT_CHANNEL_CAPACITY: usize = 100;

/// 규칙이 알림을 방출할 때 쓰는 핸들
///
/// 엔진에 대한 약한 참조를 캡처하므로 규칙-엔진 간 순환 참조가 생기지 않습니다.
pub type AlertEmitter = Arc<dyn Fn(Alert) + Send + Sync>;

/// 규칙 레지스트리 + 알림 디스패처
pub struct Engine {
    rules: RwLock<Vec<Arc<dyn Rule>>>,
    notifiers: RwLock<Vec<Arc<dyn Notifier>>>,
    alert_tx: mpsc::Sender<Alert>,
    alert_rx: Mutex<Option<mpsc::Receiver<Alert>>>,
}

impl Engine {
    pub fn new() -> Self {
        Self::with_capacity(ALERT_CHANNEL_CAPACITY)
    }

    /// 테스트용 — 임의 채널 용량으로 생성합니다.
    pub fn with_capacity(capacity: usize) -> Self {
        let (alert_tx, alert_rx) = mpsc::channel(capacity);
        Self {
            rules: RwLock::new(Vec::new()),
            notifiers: RwLock::new(Vec::new()),
            alert_tx,
            alert_rx: Mutex::new(Some(alert_rx)),
        }
    }

    /// 규칙을 등록합니다. 이름 중복 제거는 호출자 책임입니다.
    pub fn register_rule(&self, rule: Arc<dyn Rule>) {
        tracing::info!(rule = rule.name(), enabled = rule.is_enabled(), "registered rule");
        self.rules.write().expect("rule registry poisoned").push(rule);
    }

    pub fn register_notifier(&self, notifier: Arc<dyn Notifier>) {
        tracing::info!(notifier = notifier.name(), "registered notifier");
        self.notifiers
            .write()
            .expect("notifier registry poisoned")
            .push(notifier);
    }

    pub fn rule_count(&self) -> usize {
        self.rules.read().expect("rule registry poisoned").len()
    }

    pub fn notifier_count(&self) -> usize {
        self.notifiers.read().expect("notifier registry poisoned").len()
    }

    /// 활성화된 모든 규칙의 플로우 훅을 호출하고, 반환된 알림을 방출합니다.
    pub fn evaluate_all(&self, flow: &Flow) {
        let rules: Vec<Arc<dyn Rule>> = {
            let guard = self.rules.read().expect("rule registry poisoned");
            guard.clone()
        };

        for rule in rules {
            if !rule.is_enabled() {
                continue;
            }
            if let Some(alert) = rule.evaluate(flow) {
                self.emit_alert(alert);
            }
        }
    }

    /// 알림을 비차단으로 방출합니다.
    ///
    /// 채널이 가득 차면 알림은 기록 후 폐기됩니다. 생산자는 절대 블록되지
    /// 않습니다.
    pub fn emit_alert(&self, alert: Alert) {
        counter!(
            GUARD_ALERTS_TOTAL,
            LABEL_NAMESPACE => alert.namespace.clone(),
            LABEL_SEVERITY => alert.severity.as_label(),
            LABEL_TYPE => alert.alert_type.clone()
        )
        .increment(1);

        match self.alert_tx.try_send(alert) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(alert)) => {
                counter!(ALERTS_DROPPED_TOTAL).increment(1);
                tracing::warn!(
                    alert_type = %alert.alert_type,
                    namespace = %alert.namespace,
                    "alert channel is full, dropping alert"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("alert channel closed, dispatcher is gone");
            }
        }
    }

    /// 방출용 핸들을 만듭니다. 약한 참조라 엔진이 먼저 사라져도 안전합니다.
    pub fn emitter(self: &Arc<Self>) -> AlertEmitter {
        let weak = Arc::downgrade(self);
        Arc::new(move |alert| {
            if let Some(engine) = weak.upgrade() {
                engine.emit_alert(alert);
            }
        })
    }

    /// 활성화된 규칙마다 주기 태스크를 하나씩 띄웁니다.
    pub fn spawn_rules(&self, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        let rules: Vec<Arc<dyn Rule>> = {
            let guard = self.rules.read().expect("rule registry poisoned");
            guard.clone()
        };

        rules
            .into_iter()
            .filter(|rule| rule.is_enabled())
            .map(|rule| {
                let shutdown_rx = shutdown.subscribe();
                tokio::spawn(async move {
                    rule.start(shutdown_rx).await;
                })
            })
            .collect()
    }

    /// 알림 채널을 소비하며 스토어 브리지와 노티파이어로 전달합니다.
    ///
    /// 버퍼에 들어간 알림만 전달됩니다. 노티파이어 하나의 실패는 기록만
    /// 하고 다음 노티파이어로 계속 진행합니다. `shutdown` 수신 시 반환합니다.
    pub async fn run_dispatcher<F>(&self, mut shutdown: broadcast::Receiver<()>, mut on_alert: F)
    where
        F: FnMut(Alert) + Send,
    {
        let mut alert_rx = match self.alert_rx.lock().expect("alert receiver poisoned").take() {
            Some(rx) => rx,
            None => {
                tracing::error!("alert dispatcher already running, refusing second instance");
                return;
            }
        };

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("alert dispatcher shutting down");
                    return;
                }
                received = alert_rx.recv() => {
                    let Some(alert) = received else {
                        tracing::debug!("alert channel closed, dispatcher exiting");
                        return;
                    };

                    on_alert(alert.clone());

                    let notifiers: Vec<Arc<dyn Notifier>> = {
                        let guard = self.notifiers.read().expect("notifier registry poisoned");
                        guard.clone()
                    };
                    for notifier in notifiers {
                        if let Err(e) = notifier.send_alert(&alert).await {
                            tracing::error!(
                                notifier = notifier.name(),
                                error = %e,
                                "failed to send alert"
                            );
                        }
                    }
                }
            }
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    use flowguard_core::error::NotifyError;
    use flowguard_core::flow::Verdict;
    use flowguard_core::rule::BoxFuture;
    use flowguard_core::types::Severity;

    struct DropFlowRule;

    impl Rule for DropFlowRule {
        fn name(&self) -> &str {
            "drop_flow"
        }

        fn is_enabled(&self) -> bool {
            true
        }

        fn evaluate(&self, flow: &Flow) -> Option<Alert> {
            (flow.verdict == Verdict::Dropped).then(|| {
                Alert::new(
                    self.name(),
                    Severity::Medium,
                    flow.effective_namespace(),
                    "dropped flow",
                )
            })
        }
    }

    struct DisabledRule;

    impl Rule for DisabledRule {
        fn name(&self) -> &str {
            "disabled"
        }

        fn is_enabled(&self) -> bool {
            false
        }

        fn evaluate(&self, _flow: &Flow) -> Option<Alert> {
            panic!("disabled rule must not be evaluated");
        }
    }

    struct CountingNotifier {
        sent: AtomicUsize,
        fail: bool,
    }

    impl CountingNotifier {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                sent: AtomicUsize::new(0),
                fail,
            })
        }
    }

    impl Notifier for CountingNotifier {
        fn name(&self) -> &str {
            "counting"
        }

        fn send_alert<'a>(&'a self, _alert: &'a Alert) -> BoxFuture<'a, Result<(), NotifyError>> {
            Box::pin(async {
                self.sent.fetch_add(1, Ordering::SeqCst);
                if self.fail {
                    Err(NotifyError::Api("simulated failure".to_owned()))
                } else {
                    Ok(())
                }
            })
        }
    }

    fn dropped_flow() -> Flow {
        Flow {
            verdict: Verdict::Dropped,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn evaluate_all_emits_alert_from_matching_rule() {
        let engine = Arc::new(Engine::new());
        engine.register_rule(Arc::new(DropFlowRule));
        engine.register_rule(Arc::new(DisabledRule));

        engine.evaluate_all(&dropped_flow());
        engine.evaluate_all(&Flow::default());

        let mut rx = engine.alert_rx.lock().unwrap().take().unwrap();
        let alert = rx.try_recv().unwrap();
        assert_eq!(alert.alert_type, "drop_flow");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn emit_never_blocks_and_drops_on_full_channel() {
        let engine = Engine::with_capacity(100);

        let start = Instant::now();
        for i in 0..200 {
            engine.emit_alert(Alert::new(
                "burst",
                Severity::Info,
                "default",
                format!("alert {i}"),
            ));
        }
        // 생산자는 채널 포화에도 블록되지 않음
        assert!(start.elapsed() < Duration::from_millis(100));

        let mut rx = engine.alert_rx.lock().unwrap().take().unwrap();
        let mut buffered = 0;
        while rx.try_recv().is_ok() {
            buffered += 1;
        }
        assert_eq!(buffered, 100);
    }

    #[tokio::test]
    async fn dispatcher_delivers_buffered_alerts_to_all_notifiers() {
        let engine = Arc::new(Engine::with_capacity(10));
        let failing = CountingNotifier::new(true);
        let healthy = CountingNotifier::new(false);
        engine.register_notifier(failing.clone());
        engine.register_notifier(healthy.clone());

        for _ in 0..3 {
            engine.emit_alert(Alert::new("t", Severity::Info, "default", "m"));
        }

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let stored = Arc::new(AtomicUsize::new(0));
        let stored_clone = stored.clone();
        let dispatcher = {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .run_dispatcher(shutdown_rx, move |_alert| {
                        stored_clone.fetch_add(1, Ordering::SeqCst);
                    })
                    .await;
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = shutdown_tx.send(());
        dispatcher.await.unwrap();

        assert_eq!(stored.load(Ordering::SeqCst), 3);
        // 실패하는 노티파이어가 있어도 다른 노티파이어는 전부 수신
        assert_eq!(failing.sent.load(Ordering::SeqCst), 3);
        assert_eq!(healthy.sent.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn second_dispatcher_refuses_to_run() {
        let engine = Arc::new(Engine::new());
        let (_shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
        {
            let taken = engine.alert_rx.lock().unwrap().take();
            assert!(taken.is_some());
        }
        // 수신측이 이미 사라졌으므로 즉시 반환해야 함
        engine.run_dispatcher(shutdown_rx, |_alert| {}).await;
    }

    #[tokio::test]
    async fn registering_same_rule_twice_creates_two_instances() {
        let engine = Engine::new();
        engine.register_rule(Arc::new(DropFlowRule));
        engine.register_rule(Arc::new(DropFlowRule));
        assert_eq!(engine.rule_count(), 2);

        engine.evaluate_all(&dropped_flow());
        let mut rx = engine.alert_rx.lock().unwrap().take().unwrap();
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn spawn_rules_skips_disabled_rules() {
        let engine = Engine::new();
        engine.register_rule(Arc::new(DropFlowRule));
        engine.register_rule(Arc::new(DisabledRule));

        let (shutdown_tx, _) = broadcast::channel(1);
        let handles = engine.spawn_rules(&shutdown_tx);
        assert_eq!(handles.len(), 1);
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn emitter_survives_engine_drop() {
        let engine = Arc::new(Engine::new());
        let emitter = engine.emitter();
        drop(engine);
        // upgrade 실패 시 조용히 무시
        emitter(Alert::new("t", Severity::Info, "default", "m"));
    }
}
