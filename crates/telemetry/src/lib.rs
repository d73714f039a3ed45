//! flowguard-telemetry — 플로우 메트릭 기록과 질의
//!
//! 수신 경로에서 플로우당 메트릭을 기록하는 [`FlowRecorder`],
//! 10초 슬라이딩 윈도우 포트스캔 추적기 [`PortScanTracker`],
//! 규칙이 사용하는 instant/range 질의 클라이언트 [`MetricsQueryClient`]를
//! 제공합니다.

pub mod portscan;
pub mod query;
pub mod recorder;

pub use portscan::PortScanTracker;
pub use query::{MetricsQueryClient, QueryRange, QueryValue, VectorSample};
pub use recorder::FlowRecorder;
