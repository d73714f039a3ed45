//! flowguard-rules — 규칙 엔진과 내장 탐지 규칙
//!
//! [`Engine`]은 규칙 레지스트리이자 알림 디스패처입니다. 각 규칙은
//! 자기 태스크를 소유하는 주기 질의자이거나 플로우 단위 훅이며,
//! 두 경로는 서로 독립적입니다.
//!
//! # 내부 아키텍처
//! ```text
//! rule tick -> query -> threshold check -> Engine::emit_alert
//!                                             ├─ bounded channel -> dispatcher -> store/notifiers
//!                                             └─ guard_alerts_total
//! ```

pub mod baseline;
pub mod builtin;
pub mod cooldown;
pub mod engine;
pub mod registry;

pub use baseline::BaselineCollector;
pub use cooldown::CooldownMap;
pub use engine::{AlertEmitter, Engine};
pub use registry::build_rules;
