//! 인메모리 스토어 — 최근 플로우/알림의 유계 링과 알림 pub/sub
//!
//! 용량 초과 시 가장 오래된 항목부터 제거합니다. 재시작하면 이력은
//! 사라집니다 — 이 스토어는 운영 UI의 최근 창일 뿐 영속 저장소가 아닙니다.
//!
//! 읽기는 항상 최신순이며, 페이지 1이 가장 최신 `limit`건을 반환합니다.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use flowguard_core::flow::Flow;
use flowguard_core::metrics::SUBSCRIBER_DROPS_TOTAL;
use flowguard_core::types::{Alert, Severity};

/// 플로우 링 기본 용량
pub const DEFAULT_MAX_FLOWS: usize = 50_000;
/// 알림 링 기본 용량
pub const DEFAULT_MAX_ALERTS: usize = 10_000;
/// 구독자 outbox 용량
pub const OUTBOX_CAPACITY: usize = 100;

/// REST/websocket으로 나가는 플로우 표현
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredFlow {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<StoredEndpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<StoredEndpoint>,
    pub verdict: String,
    pub namespace: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub source_ip: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub destination_ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_port: Option<u16>,
    /// "egress"/"ingress" — 휴리스틱이며 어떤 불변식에도 쓰이지 않습니다.
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub traffic_direction: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub tcp_flags: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEndpoint {
    pub name: String,
    pub namespace: String,
    /// "namespace/pod" 형식
    pub identity: String,
}

impl StoredFlow {
    /// 정규화된 플로우에서 스토어 표현을 만듭니다. id는 삽입 시 부여됩니다.
    pub fn from_flow(flow: &Flow) -> Self {
        let (source_ip, destination_ip) = flow
            .ip
            .as_ref()
            .map(|ip| (ip.source.clone(), ip.destination.clone()))
            .unwrap_or_default();

        let direction = match (&flow.source, &flow.destination) {
            (Some(src), _) if !src.namespace.is_empty() => "egress",
            (_, Some(dst)) if !dst.namespace.is_empty() => "ingress",
            _ => "",
        };

        let tcp_flags = flow
            .tcp_flags()
            .map(|flags| flags.to_string())
            .unwrap_or_default();

        Self {
            id: String::new(),
            timestamp: flow.time.unwrap_or_else(Utc::now),
            source: flow.source.as_ref().map(stored_endpoint),
            destination: flow.destination.as_ref().map(stored_endpoint),
            verdict: flow.verdict.as_str().to_owned(),
            namespace: flow.effective_namespace().to_owned(),
            source_ip,
            destination_ip,
            destination_port: flow.destination_port(),
            traffic_direction: direction.to_owned(),
            tcp_flags,
        }
    }
}

fn stored_endpoint(endpoint: &flowguard_core::flow::Endpoint) -> StoredEndpoint {
    StoredEndpoint {
        name: endpoint.pod_name.clone(),
        namespace: endpoint.namespace.clone(),
        identity: format!("{}/{}", endpoint.namespace, endpoint.pod_name),
    }
}

/// 플로우 목록 필터 — 빈 필드는 와일드카드
#[derive(Debug, Clone, Default)]
pub struct FlowFilter {
    pub namespace: Option<String>,
    pub verdict: Option<String>,
    /// pod 이름 부분 문자열 검색
    pub search: Option<String>,
}

impl FlowFilter {
    fn matches(&self, flow: &StoredFlow) -> bool {
        if let Some(ns) = &self.namespace {
            if &flow.namespace != ns {
                return false;
            }
        }
        if let Some(verdict) = &self.verdict {
            if &flow.verdict != verdict {
                return false;
            }
        }
        if let Some(search) = &self.search {
            let matched = flow
                .source
                .as_ref()
                .is_some_and(|e| e.name.contains(search.as_str()))
                || flow
                    .destination
                    .as_ref()
                    .is_some_and(|e| e.name.contains(search.as_str()));
            if !matched {
                return false;
            }
        }
        true
    }
}

/// 알림 필터 — 빈 필드는 와일드카드
#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub severity: Option<Severity>,
    pub namespace: Option<String>,
    pub alert_type: Option<String>,
    /// 메시지 부분 문자열 검색
    pub search: Option<String>,
}

impl AlertFilter {
    fn matches(&self, alert: &Alert) -> bool {
        if let Some(severity) = self.severity {
            if alert.severity != severity {
                return false;
            }
        }
        if let Some(ns) = &self.namespace {
            if &alert.namespace != ns {
                return false;
            }
        }
        if let Some(alert_type) = &self.alert_type {
            if &alert.alert_type != alert_type {
                return false;
            }
        }
        if let Some(search) = &self.search {
            if !alert.message.contains(search.as_str()) {
                return false;
            }
        }
        true
    }
}

/// 운영 UI에 보여지는 규칙 뷰
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleInfo {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub severity: String,
    pub description: String,
    #[serde(rename = "type")]
    pub rule_type: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub thresholds: HashMap<String, serde_json::Value>,
}

/// 규칙 뷰 부분 갱신
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuleUpdate {
    pub enabled: Option<bool>,
    pub severity: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FlowStats {
    pub total_flows: usize,
    pub verdict_counts: HashMap<String, u64>,
    pub namespace_counts: HashMap<String, u64>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct RulesStats {
    pub total: usize,
    pub enabled: usize,
    pub disabled: usize,
}

/// 알림 구독 핸들 — 드롭하면 구독이 해제된 것과 같습니다.
pub struct AlertSubscription {
    pub id: Uuid,
    pub rx: mpsc::Receiver<Alert>,
}

struct AlertSubscriber {
    filter: AlertFilter,
    outbox: mpsc::Sender<Alert>,
}

struct StoreInner {
    flows: VecDeque<StoredFlow>,
    alerts: VecDeque<Alert>,
    rules: Vec<RuleInfo>,
}

/// 유계 인메모리 스토어
pub struct GuardStore {
    inner: RwLock<StoreInner>,
    subscribers: RwLock<HashMap<Uuid, AlertSubscriber>>,
    max_flows: usize,
    max_alerts: usize,
}

impl GuardStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_FLOWS, DEFAULT_MAX_ALERTS)
    }

    pub fn with_capacity(max_flows: usize, max_alerts: usize) -> Self {
        Self {
            inner: RwLock::new(StoreInner {
                flows: VecDeque::new(),
                alerts: VecDeque::new(),
                rules: Vec::new(),
            }),
            subscribers: RwLock::new(HashMap::new()),
            max_flows: max_flows.max(1),
            max_alerts: max_alerts.max(1),
        }
    }

    // --- 플로우 ---

    /// 플로우를 추가하고 id가 부여된 사본을 반환합니다.
    pub fn add_flow(&self, mut flow: StoredFlow) -> StoredFlow {
        flow.id = Uuid::new_v4().to_string();
        let mut inner = self.inner.write().expect("store lock poisoned");
        if inner.flows.len() >= self.max_flows {
            inner.flows.pop_front();
        }
        inner.flows.push_back(flow.clone());
        flow
    }

    /// 최신순 페이지를 반환합니다. `(items, 필터 일치 총계)`.
    ///
    /// limit은 [1, 100]으로 클램프되고, 페이지 1이 최신 `limit`건입니다.
    pub fn flows(&self, page: usize, limit: usize, filter: &FlowFilter) -> (Vec<StoredFlow>, usize) {
        let page = page.max(1);
        let limit = limit.clamp(1, 100);
        let skip = (page - 1) * limit;

        let inner = self.inner.read().expect("store lock poisoned");
        let mut total = 0usize;
        let mut items = Vec::new();
        for flow in inner.flows.iter().rev() {
            if !filter.matches(flow) {
                continue;
            }
            if total >= skip && items.len() < limit {
                items.push(flow.clone());
            }
            total += 1;
        }
        (items, total)
    }

    pub fn flow(&self, id: &str) -> Option<StoredFlow> {
        let inner = self.inner.read().expect("store lock poisoned");
        inner.flows.iter().find(|f| f.id == id).cloned()
    }

    pub fn flow_count(&self) -> usize {
        self.inner.read().expect("store lock poisoned").flows.len()
    }

    pub fn flow_stats(&self) -> FlowStats {
        let inner = self.inner.read().expect("store lock poisoned");
        let mut verdict_counts: HashMap<String, u64> = HashMap::new();
        let mut namespace_counts: HashMap<String, u64> = HashMap::new();
        for flow in &inner.flows {
            *verdict_counts.entry(flow.verdict.clone()).or_default() += 1;
            *namespace_counts.entry(flow.namespace.clone()).or_default() += 1;
        }
        FlowStats {
            total_flows: inner.flows.len(),
            verdict_counts,
            namespace_counts,
        }
    }

    // --- 알림 ---

    /// 알림을 저장하고 구독자에게 발행합니다. id가 부여된 사본을 반환합니다.
    pub fn add_alert(&self, mut alert: Alert) -> Alert {
        alert.id = Some(Uuid::new_v4().to_string());
        {
            let mut inner = self.inner.write().expect("store lock poisoned");
            if inner.alerts.len() >= self.max_alerts {
                inner.alerts.pop_front();
            }
            inner.alerts.push_back(alert.clone());
        }
        self.publish_alert(&alert);
        alert
    }

    /// 최신순 알림 목록. limit은 [1, 1000]으로 클램프됩니다.
    pub fn alerts(&self, limit: usize, filter: &AlertFilter) -> Vec<Alert> {
        let limit = limit.clamp(1, 1000);
        let inner = self.inner.read().expect("store lock poisoned");
        inner
            .alerts
            .iter()
            .rev()
            .filter(|alert| filter.matches(alert))
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn alert(&self, id: &str) -> Option<Alert> {
        let inner = self.inner.read().expect("store lock poisoned");
        inner
            .alerts
            .iter()
            .find(|a| a.id.as_deref() == Some(id))
            .cloned()
    }

    /// 시간 구간 내 알림 (오래된 것부터). 경계는 포함입니다.
    pub fn alerts_timeline(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Vec<Alert> {
        let inner = self.inner.read().expect("store lock poisoned");
        inner
            .alerts
            .iter()
            .filter(|alert| {
                start.is_none_or(|s| alert.timestamp >= s)
                    && end.is_none_or(|e| alert.timestamp <= e)
            })
            .cloned()
            .collect()
    }

    pub fn alert_count(&self) -> usize {
        self.inner.read().expect("store lock poisoned").alerts.len()
    }

    // --- 알림 pub/sub ---

    /// 필터와 함께 구독을 등록합니다. outbox 용량은 100입니다.
    pub fn subscribe_alerts(&self, filter: AlertFilter) -> AlertSubscription {
        let (tx, rx) = mpsc::channel(OUTBOX_CAPACITY);
        let id = Uuid::new_v4();
        self.subscribers
            .write()
            .expect("subscriber lock poisoned")
            .insert(id, AlertSubscriber { filter, outbox: tx });
        AlertSubscription { id, rx }
    }

    /// 구독을 제거하고 outbox를 닫습니다.
    pub fn unsubscribe_alerts(&self, id: Uuid) {
        self.subscribers
            .write()
            .expect("subscriber lock poisoned")
            .remove(&id);
    }

    pub fn alert_subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .expect("subscriber lock poisoned")
            .len()
    }

    /// 필터를 통과한 구독자 outbox에 비차단 전송합니다.
    ///
    /// outbox가 가득 차면 해당 구독자에 대해서만 메시지를 버립니다 —
    /// 드롭 한 번으로 구독자가 퇴출되지는 않습니다.
    fn publish_alert(&self, alert: &Alert) {
        let subscribers = self.subscribers.read().expect("subscriber lock poisoned");
        for (id, subscriber) in subscribers.iter() {
            if !subscriber.filter.matches(alert) {
                continue;
            }
            match subscriber.outbox.try_send(alert.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    counter!(SUBSCRIBER_DROPS_TOTAL).increment(1);
                    tracing::debug!(subscriber = %id, "alert outbox full, dropping message");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    tracing::debug!(subscriber = %id, "alert outbox closed");
                }
            }
        }
    }

    // --- 규칙 뷰 ---

    /// 규칙 목록 전체를 교체합니다. 동일 목록으로의 교체는 관측 가능한
    /// 상태 변화를 만들지 않습니다.
    pub fn set_rules(&self, rules: Vec<RuleInfo>) {
        self.inner.write().expect("store lock poisoned").rules = rules;
    }

    pub fn rules(&self) -> Vec<RuleInfo> {
        self.inner.read().expect("store lock poisoned").rules.clone()
    }

    /// id 또는 이름으로 규칙을 찾습니다.
    pub fn rule(&self, id: &str) -> Option<RuleInfo> {
        let inner = self.inner.read().expect("store lock poisoned");
        inner
            .rules
            .iter()
            .find(|r| r.id == id || r.name == id)
            .cloned()
    }

    pub fn update_rule(&self, id: &str, update: &RuleUpdate) -> bool {
        let mut inner = self.inner.write().expect("store lock poisoned");
        let Some(rule) = inner.rules.iter_mut().find(|r| r.id == id || r.name == id) else {
            return false;
        };
        if let Some(enabled) = update.enabled {
            rule.enabled = enabled;
        }
        if let Some(severity) = &update.severity {
            if !severity.is_empty() {
                rule.severity = severity.clone();
            }
        }
        if let Some(description) = &update.description {
            if !description.is_empty() {
                rule.description = description.clone();
            }
        }
        true
    }

    pub fn rules_stats(&self) -> RulesStats {
        let inner = self.inner.read().expect("store lock poisoned");
        let enabled = inner.rules.iter().filter(|r| r.enabled).count();
        RulesStats {
            total: inner.rules.len(),
            enabled,
            disabled: inner.rules.len() - enabled,
        }
    }
}

impl Default for GuardStore {
    fn default() -> Self {
        Self::new()
    }
}
