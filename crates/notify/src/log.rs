//! 로그 노티파이어 — 로컬 로그로의 알림 전달

use flowguard_core::error::NotifyError;
use flowguard_core::rule::{BoxFuture, Notifier};
use flowguard_core::types::Alert;

/// 알림을 warn 레벨 로그 한 줄로 내보냅니다.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    fn send_alert<'a>(&'a self, alert: &'a Alert) -> BoxFuture<'a, Result<(), NotifyError>> {
        Box::pin(async move {
            tracing::warn!(
                severity = %alert.severity,
                alert_type = %alert.alert_type,
                namespace = %alert.namespace,
                "ALERT: {}",
                alert.message,
            );
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowguard_core::types::Severity;

    #[tokio::test]
    async fn send_always_succeeds() {
        let notifier = LogNotifier::new();
        let alert = Alert::new("port_scan", Severity::High, "default", "scan detected");
        assert!(notifier.send_alert(&alert).await.is_ok());
        assert_eq!(notifier.name(), "log");
    }
}
