//! 규칙/노티파이어 trait — 탐지 확장 포인트 정의
//!
//! [`Rule`]은 모든 탐지 규칙이 구현하는 계약입니다. 규칙은 플로우 단위 훅
//! (`evaluate`)과 자체 스케줄링 주기 태스크(`start`) 중 하나 또는 둘 다를
//! 구현할 수 있으며, 두 경로는 서로 독립적입니다.
//!
//! RPITIT 기반 trait은 `dyn` 호환이 되지 않으므로, 비동기 메서드는
//! [`BoxFuture`]를 반환하여 `Vec<Arc<dyn Rule>>`로 동적 관리를 가능하게 합니다.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::broadcast;

use crate::error::NotifyError;
use crate::flow::Flow;
use crate::types::Alert;

/// dyn-compatible Future 타입 별칭
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// 탐지 규칙 계약
///
/// # 구현 예시
/// ```ignore
/// struct DropBurstRule { enabled: bool }
///
/// impl Rule for DropBurstRule {
///     fn name(&self) -> &str { "drop_burst" }
///     fn is_enabled(&self) -> bool { self.enabled }
///     fn evaluate(&self, flow: &Flow) -> Option<Alert> {
///         (flow.verdict == Verdict::Dropped).then(|| ...)
///     }
/// }
/// ```
pub trait Rule: Send + Sync {
    /// 규칙 고유 이름 — 알림의 `type` 필드로 쓰입니다.
    fn name(&self) -> &str;

    /// 규칙 활성화 여부
    fn is_enabled(&self) -> bool;

    /// 플로우 단위 동기 훅
    ///
    /// 주기 질의만 수행하는 규칙은 기본 구현(no-op)을 그대로 사용합니다.
    fn evaluate(&self, _flow: &Flow) -> Option<Alert> {
        None
    }

    /// 규칙 소유의 주기 태스크를 시작합니다.
    ///
    /// `shutdown` 신호를 수신하면 반환해야 합니다. 플로우 훅만 구현하는
    /// 규칙은 기본 구현(즉시 반환)을 그대로 사용합니다.
    fn start(&self, _shutdown: broadcast::Receiver<()>) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }
}

/// 알림 외부 전송 계약
///
/// 전송 실패는 호출 내부에서 재시도하고, 최종 실패는 에러로 반환합니다.
/// 엔진은 개별 노티파이어의 실패를 로깅만 하고 다른 노티파이어로 계속 진행합니다.
pub trait Notifier: Send + Sync {
    /// 노티파이어 이름 (로깅용)
    fn name(&self) -> &str;

    /// 알림을 전송합니다.
    fn send_alert<'a>(&'a self, alert: &'a Alert) -> BoxFuture<'a, Result<(), NotifyError>>;
}
