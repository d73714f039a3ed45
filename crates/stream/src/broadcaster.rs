//! 플로우 브로드캐스터 — 단일 업스트림 스트림의 팬아웃
//!
//! 프로세스당 정확히 하나의 업스트림 스트림을 소유합니다. 시작 시점에
//! 한 번 만들어져 `Arc`로 공유되며, 두 번째 `start` 호출은 무시됩니다.
//!
//! 플로우 한 건의 처리 순서는 (1) 수신 훅(메트릭 기록/규칙 플로우 훅),
//! (2) 스토어 추가, (3) 구독자 브로드캐스트입니다 — 외부 관측자가 보기
//! 전에 메트릭이 먼저 기록됩니다.
//!
//! 느린 구독자는 업스트림을 절대 막지 못합니다. outbox가 가득 찬 구독자는
//! 그 메시지만 잃고, 전송 데드라인(websocket 계층의 10초)을 넘긴 구독자는
//! 연결이 닫히며 제거됩니다.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use metrics::counter;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use flowguard_core::flow::Flow;
use flowguard_core::metrics::SUBSCRIBER_DROPS_TOTAL;
use flowguard_relay::RelayClient;

use crate::store::{GuardStore, StoredFlow, OUTBOX_CAPACITY};

/// 스트림 에러 후 재연결 대기
const RETRY_DELAY: Duration = Duration::from_secs(2);

/// 수신 경로 훅 — 메트릭 기록과 규칙 플로우 훅을 연결합니다.
pub type IngestHook = Box<dyn Fn(&Flow) + Send + Sync>;

/// 플로우 구독 핸들
pub struct FlowSubscription {
    pub id: Uuid,
    pub rx: mpsc::Receiver<StoredFlow>,
}

pub struct FlowBroadcaster {
    client: RelayClient,
    store: Arc<GuardStore>,
    namespaces: Vec<String>,
    on_flow: IngestHook,
    running: Mutex<bool>,
    subscribers: RwLock<HashMap<Uuid, mpsc::Sender<StoredFlow>>>,
}

impl FlowBroadcaster {
    pub fn new(
        client: RelayClient,
        store: Arc<GuardStore>,
        namespaces: Vec<String>,
        on_flow: IngestHook,
    ) -> Self {
        Self {
            client,
            store,
            namespaces,
            on_flow,
            running: Mutex::new(false),
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    /// 스트림 소유 태스크를 시작합니다. 멱등 — 두 번째 호출은 None.
    pub fn start(self: &Arc<Self>, shutdown: &broadcast::Sender<()>) -> Option<JoinHandle<()>> {
        {
            let mut running = self.running.lock().expect("broadcaster state poisoned");
            if *running {
                tracing::debug!("broadcaster already running, ignoring start");
                return None;
            }
            *running = true;
        }

        tracing::info!(namespaces = ?self.namespaces, "starting flow broadcaster");

        let this = Arc::clone(self);
        let shutdown = shutdown.clone();
        Some(tokio::spawn(async move {
            this.run(shutdown).await;
        }))
    }

    /// 스트림 루프 — 에러 시 2초 대기 후 재연결, 종료 신호 시 반환.
    async fn run(self: Arc<Self>, shutdown: broadcast::Sender<()>) {
        loop {
            let stream_shutdown = shutdown.subscribe();
            let this = Arc::clone(&self);
            let result = self
                .client
                .stream_flows(stream_shutdown, &self.namespaces, move |flow| {
                    this.ingest(flow);
                })
                .await;

            match result {
                Ok(()) => {
                    tracing::info!("flow broadcaster stream closed, exiting");
                    return;
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        retry_secs = RETRY_DELAY.as_secs(),
                        "relay stream failed, reopening"
                    );
                    let mut retry_shutdown = shutdown.subscribe();
                    tokio::select! {
                        _ = tokio::time::sleep(RETRY_DELAY) => {}
                        _ = retry_shutdown.recv() => {
                            tracing::info!("flow broadcaster stopped during retry backoff");
                            return;
                        }
                    }
                }
            }
        }
    }

    /// 플로우 한 건의 수신 처리 — 훅, 스토어, 브로드캐스트 순서.
    fn ingest(&self, flow: Flow) {
        (self.on_flow)(&flow);
        let stored = self.store.add_flow(StoredFlow::from_flow(&flow));
        self.broadcast(&stored);
    }

    /// 구독을 등록합니다. outbox 용량은 100입니다.
    pub fn add_subscriber(&self) -> FlowSubscription {
        let (tx, rx) = mpsc::channel(OUTBOX_CAPACITY);
        let id = Uuid::new_v4();
        let count = {
            let mut subscribers = self.subscribers.write().expect("subscriber set poisoned");
            subscribers.insert(id, tx);
            subscribers.len()
        };
        tracing::info!(subscriber = %id, total = count, "flow subscriber added");
        FlowSubscription { id, rx }
    }

    /// 구독을 제거하고 outbox를 닫습니다.
    pub fn remove_subscriber(&self, id: Uuid) {
        let count = {
            let mut subscribers = self.subscribers.write().expect("subscriber set poisoned");
            subscribers.remove(&id);
            subscribers.len()
        };
        tracing::info!(subscriber = %id, total = count, "flow subscriber removed");
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().expect("subscriber set poisoned").len()
    }

    /// 구독자 스냅샷에 비차단 팬아웃합니다.
    ///
    /// outbox가 가득 찬 구독자는 이 메시지만 잃습니다. 닫힌 outbox의
    /// 구독자는 제거 대상으로 기록됩니다.
    fn broadcast(&self, flow: &StoredFlow) {
        let snapshot: Vec<(Uuid, mpsc::Sender<StoredFlow>)> = {
            let subscribers = self.subscribers.read().expect("subscriber set poisoned");
            subscribers
                .iter()
                .map(|(id, tx)| (*id, tx.clone()))
                .collect()
        };

        let mut closed = Vec::new();
        for (id, tx) in snapshot {
            match tx.try_send(flow.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    counter!(SUBSCRIBER_DROPS_TOTAL).increment(1);
                    tracing::debug!(subscriber = %id, "flow outbox full, dropping message");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    closed.push(id);
                }
            }
        }

        for id in closed {
            self.remove_subscriber(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    use flowguard_core::flow::{Endpoint, Verdict};

    fn test_broadcaster(on_flow: IngestHook) -> Arc<FlowBroadcaster> {
        let client = RelayClient::connect("localhost:4245").unwrap();
        let store = Arc::new(GuardStore::new());
        Arc::new(FlowBroadcaster::new(
            client,
            store,
            vec!["default".to_owned()],
            on_flow,
        ))
    }

    fn flow(ns: &str) -> Flow {
        Flow {
            verdict: Verdict::Forwarded,
            source: Some(Endpoint {
                namespace: ns.to_owned(),
                pod_name: "web-1".to_owned(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn ingest_runs_hook_then_store_then_broadcast() {
        let hook_calls = Arc::new(AtomicUsize::new(0));
        let hook_clone = hook_calls.clone();
        let broadcaster = test_broadcaster(Box::new(move |_flow| {
            hook_clone.fetch_add(1, Ordering::SeqCst);
        }));
        let mut subscription = broadcaster.add_subscriber();

        broadcaster.ingest(flow("default"));

        assert_eq!(hook_calls.load(Ordering::SeqCst), 1);
        assert_eq!(broadcaster.store.flow_count(), 1);
        let received = subscription.rx.try_recv().unwrap();
        assert!(!received.id.is_empty());
        assert_eq!(received.namespace, "default");
    }

    #[tokio::test]
    async fn broadcast_reaches_all_subscribers_in_order() {
        let broadcaster = test_broadcaster(Box::new(|_| {}));
        let mut first = broadcaster.add_subscriber();
        let mut second = broadcaster.add_subscriber();
        assert_eq!(broadcaster.subscriber_count(), 2);

        for i in 0..10 {
            broadcaster.ingest(flow(&format!("ns-{i}")));
        }

        for subscription in [&mut first, &mut second] {
            for i in 0..10 {
                let received = subscription.rx.try_recv().unwrap();
                assert_eq!(received.namespace, format!("ns-{i}"));
            }
        }
    }

    #[tokio::test]
    async fn slow_subscriber_does_not_stall_ingest_or_peers() {
        let broadcaster = test_broadcaster(Box::new(|_| {}));
        let mut healthy = broadcaster.add_subscriber();
        let _stalled = broadcaster.add_subscriber(); // outbox를 읽지 않음

        let start = Instant::now();
        let total = OUTBOX_CAPACITY + 50;
        for i in 0..total {
            broadcaster.ingest(flow(&format!("ns-{i}")));
        }
        // 수신 경로는 outbox 포화에도 블록되지 않음
        assert!(start.elapsed() < Duration::from_secs(1));

        // 건강한 구독자도 outbox 용량까지만 버퍼링됨 (드레인 없이)
        let mut received = 0;
        while healthy.rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, OUTBOX_CAPACITY);

        // 정지한 구독자는 단순 드롭으로는 퇴출되지 않음
        assert_eq!(broadcaster.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn draining_subscriber_receives_everything_in_order() {
        let broadcaster = test_broadcaster(Box::new(|_| {}));
        let mut subscription = broadcaster.add_subscriber();
        let _stalled = broadcaster.add_subscriber();

        let total = 500;
        let received = Arc::new(AtomicUsize::new(0));
        let received_clone = received.clone();
        let reader = tokio::spawn(async move {
            let mut last = None::<String>;
            while let Some(stored) = subscription.rx.recv().await {
                // FIFO 검증: namespace에 실은 순번이 단조 증가
                let n: usize = stored.namespace.trim_start_matches("ns-").parse().unwrap();
                if let Some(prev) = &last {
                    let prev_n: usize = prev.trim_start_matches("ns-").parse().unwrap();
                    assert!(n > prev_n);
                }
                last = Some(stored.namespace);
                if received_clone.fetch_add(1, Ordering::SeqCst) + 1 == total {
                    return;
                }
            }
        });

        for i in 0..total {
            broadcaster.ingest(flow(&format!("ns-{i}")));
            // 구독자가 따라올 시간을 줌 (실제 배포에선 websocket writer가 드레인)
            if i % 50 == 0 {
                tokio::task::yield_now().await;
            }
            tokio::time::sleep(Duration::from_micros(50)).await;
        }

        tokio::time::timeout(Duration::from_secs(5), reader)
            .await
            .expect("reader should finish")
            .unwrap();
        assert_eq!(received.load(Ordering::SeqCst), total);
    }

    #[tokio::test]
    async fn closed_subscriber_is_removed_on_next_broadcast() {
        let broadcaster = test_broadcaster(Box::new(|_| {}));
        let subscription = broadcaster.add_subscriber();
        drop(subscription.rx);

        broadcaster.ingest(flow("default"));
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn remove_subscriber_logs_and_shrinks_set() {
        let broadcaster = test_broadcaster(Box::new(|_| {}));
        let subscription = broadcaster.add_subscriber();
        broadcaster.remove_subscriber(subscription.id);
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let broadcaster = test_broadcaster(Box::new(|_| {}));
        let (shutdown_tx, _) = broadcast::channel(1);

        let first = broadcaster.start(&shutdown_tx);
        assert!(first.is_some());
        let second = broadcaster.start(&shutdown_tx);
        assert!(second.is_none());

        let _ = shutdown_tx.send(());
        if let Some(handle) = first {
            let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
        }
    }
}
