//! 에러 타입 — 도메인별 에러 정의

/// flowguard 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 릴레이 스트림 에러
    #[error("relay error: {0}")]
    Relay(#[from] RelayError),

    /// 메트릭 질의 에러
    #[error("query error: {0}")]
    Query(#[from] QueryError),

    /// 알림 전송 에러
    #[error("notify error: {0}")]
    Notify(#[from] NotifyError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 릴레이 스트림 에러
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// 연결 수립 실패
    #[error("failed to connect to relay: {0}")]
    Connect(String),

    /// 연결 준비 상태 도달 실패
    #[error("connection test failed: {0}")]
    NotReady(String),

    /// 스트림 수신 실패
    #[error("stream receive failed: {0}")]
    Stream(String),
}

/// 메트릭 질의 에러
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// 질의 URL 미설정 — 시작 시점 치명 에러
    #[error("metrics query url is not configured")]
    MissingUrl,

    /// HTTP 전송 실패
    #[error("query request failed: {0}")]
    Http(String),

    /// API가 에러 상태를 반환함
    #[error("query api returned {status}: {reason}")]
    Api { status: String, reason: String },

    /// 응답 본문 해석 실패
    #[error("failed to parse query response: {0}")]
    Parse(String),
}

/// 알림 전송 에러
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// 전송 요청 실패
    #[error("notify request failed: {0}")]
    Http(String),

    /// 외부 API가 실패를 반환함
    #[error("notify api error: {0}")]
    Api(String),

    /// 재시도 한도 초과
    #[error("failed to send alert after {attempts} attempts")]
    Exhausted { attempts: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_rolls_up() {
        let err: GuardError = ConfigError::InvalidValue {
            field: "prometheus.url".to_owned(),
            reason: "must not be empty".to_owned(),
        }
        .into();
        assert!(err.to_string().contains("prometheus.url"));
    }

    #[test]
    fn relay_error_messages() {
        let err = RelayError::Stream("connection reset".to_owned());
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn notify_exhausted_reports_attempts() {
        let err = NotifyError::Exhausted { attempts: 3 };
        assert!(err.to_string().contains('3'));
    }
}
