//! flowguard-stream — 플로우 브로드캐스터와 인메모리 스토어
//!
//! [`FlowBroadcaster`]는 프로세스당 하나의 업스트림 스트림을 소유하고
//! N개의 websocket 구독자에게 팬아웃합니다. [`GuardStore`]는 최근
//! 플로우/알림의 유계 링과 알림 pub/sub을 제공합니다.

pub mod broadcaster;
pub mod store;

pub use broadcaster::{FlowBroadcaster, FlowSubscription};
pub use store::{
    AlertFilter, AlertSubscription, FlowFilter, FlowStats, GuardStore, RuleInfo, RuleUpdate,
    RulesStats, StoredEndpoint, StoredFlow,
};
