//! 내장 규칙 카탈로그
//!
//! 규칙 하나당 파일 하나. 주기 규칙은 10초 틱마다 메트릭 스토어에 질의하고,
//! 플로우 훅 규칙(ddos_flow)은 수신 경로에서 직접 평가됩니다.

use std::time::Duration;

use flowguard_core::error::QueryError;
use flowguard_core::rule::BoxFuture;
use flowguard_telemetry::{MetricsQueryClient, QueryValue};

pub mod block_connection;
pub mod ddos_flow;
pub mod namespace_access;
pub mod port_scan;
pub mod suspicious_outbound;
pub mod traffic_death;
pub mod traffic_spike;
pub mod unusual_traffic;

pub use block_connection::BlockConnectionRule;
pub use ddos_flow::DdosFlowRule;
pub use namespace_access::NamespaceAccessRule;
pub use port_scan::PortScanRule;
pub use suspicious_outbound::SuspiciousOutboundRule;
pub use traffic_death::TrafficDeathRule;
pub use traffic_spike::TrafficSpikeRule;
pub use unusual_traffic::UnusualTrafficRule;

/// 규칙 질의 타임아웃 기본값
pub(crate) const QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// 규칙 평가 주기 기본값
pub(crate) const CHECK_INTERVAL: Duration = Duration::from_secs(10);

/// 규칙이 사용하는 instant 질의 추상화
///
/// 실제 구현은 [`MetricsQueryClient`]이며, 테스트는 스크립트된 값을
/// 돌려주는 스텁으로 대체합니다.
pub trait QueryClient: Send + Sync {
    fn query<'a>(
        &'a self,
        expr: &'a str,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<QueryValue, QueryError>>;
}

impl QueryClient for MetricsQueryClient {
    fn query<'a>(
        &'a self,
        expr: &'a str,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<QueryValue, QueryError>> {
        Box::pin(self.query(expr, timeout))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! 규칙 테스트 공용 스텁

    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use flowguard_core::error::QueryError;
    use flowguard_core::rule::BoxFuture;
    use flowguard_core::types::Alert;
    use flowguard_telemetry::QueryValue;

    use super::QueryClient;
    use crate::engine::AlertEmitter;

    /// 호출 순서대로 스크립트된 결과를 돌려주는 질의 스텁
    pub struct ScriptedQueryClient {
        responses: Mutex<VecDeque<Result<QueryValue, QueryError>>>,
        /// 스크립트 소진 후 반환할 기본값
        fallback: QueryValue,
    }

    impl ScriptedQueryClient {
        pub fn new(responses: Vec<Result<QueryValue, QueryError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                fallback: QueryValue::Vector(Vec::new()),
            })
        }
    }

    impl QueryClient for ScriptedQueryClient {
        fn query<'a>(
            &'a self,
            _expr: &'a str,
            _timeout: Duration,
        ) -> BoxFuture<'a, Result<QueryValue, QueryError>> {
            Box::pin(async {
                self.responses
                    .lock()
                    .unwrap()
                    .pop_front()
                    .unwrap_or(Ok(self.fallback.clone()))
            })
        }
    }

    /// 방출된 알림을 수집하는 emitter
    pub fn collecting_emitter() -> (AlertEmitter, Arc<Mutex<Vec<Alert>>>) {
        let collected: Arc<Mutex<Vec<Alert>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = collected.clone();
        let emitter: AlertEmitter = Arc::new(move |alert| {
            sink.lock().unwrap().push(alert);
        });
        (emitter, collected)
    }

    /// 단일 값 Vector 결과
    pub fn vector_of(value: f64) -> QueryValue {
        QueryValue::Vector(vec![flowguard_telemetry::VectorSample {
            labels: Default::default(),
            timestamp: 0.0,
            value,
        }])
    }

    /// 레이블이 있는 Vector 샘플
    pub fn labeled_sample(labels: &[(&str, &str)], value: f64) -> flowguard_telemetry::VectorSample {
        flowguard_telemetry::VectorSample {
            labels: labels
                .iter()
                .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                .collect(),
            timestamp: 0.0,
            value,
        }
    }

    /// 빈 Vector (no data)
    pub fn empty_vector() -> QueryValue {
        QueryValue::Vector(Vec::new())
    }
}
