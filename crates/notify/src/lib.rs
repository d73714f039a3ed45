//! flowguard-notify — 알림 외부 전송
//!
//! 엔진이 디스패치하는 알림을 외부 싱크로 전달하는 [`Notifier`] 구현들.
//! 전송 실패는 디스패치 호출 안에서 유계 재시도 후 로깅되고 삼켜집니다 —
//! 규칙이나 수신 경로로 전파되지 않습니다.
//!
//! [`Notifier`]: flowguard_core::rule::Notifier

pub mod log;
pub mod telegram;

pub use log::LogNotifier;
pub use telegram::TelegramNotifier;
