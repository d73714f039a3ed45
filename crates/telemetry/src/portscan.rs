//! 포트스캔 추적기 — IP 쌍별 10초 슬라이딩 윈도우
//!
//! `(source_ip, dest_ip)` 쌍마다 최근에 관측된 목적지 포트와 마지막 관측
//! 시각을 유지합니다. 게이지 `portscan_distinct_ports_10s`는 관측 시마다
//! 갱신되며, 주기적 [`cleanup`](PortScanTracker::cleanup)이 오래된 포트를
//! 제거하고 비어버린 레이블 집합을 0으로 리셋한 뒤 잊습니다.
//!
//! 쌍 맵과 메트릭 레이블 레지스트리는 단일 뮤텍스가 보호하며,
//! `observe`와 `cleanup` 모두 락을 중첩하지 않습니다.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use metrics::gauge;

use flowguard_core::metrics::{
    LABEL_DEST_IP, LABEL_NAMESPACE, LABEL_SOURCE_IP, PORTSCAN_DISTINCT_PORTS_10S,
};

/// 기본 관측 윈도우
const DEFAULT_WINDOW: Duration = Duration::from_secs(10);

type PairKey = (String, String);

#[derive(Default)]
struct TrackerInner {
    /// 쌍별 포트 → 마지막 관측 시각
    entries: HashMap<PairKey, HashMap<u16, Instant>>,
    /// 쌍 → 게이지 레이블에 쓰인 네임스페이스
    metric_keys: HashMap<PairKey, String>,
}

/// IP 쌍별 고유 목적지 포트 추적기
pub struct PortScanTracker {
    inner: Mutex<TrackerInner>,
    window: Duration,
}

impl PortScanTracker {
    pub fn new() -> Self {
        Self::with_window(DEFAULT_WINDOW)
    }

    /// 테스트용 — 임의 윈도우로 생성합니다.
    pub fn with_window(window: Duration) -> Self {
        Self {
            inner: Mutex::new(TrackerInner::default()),
            window,
        }
    }

    /// 포트 관측을 기록하고 게이지를 현재 고유 포트 수로 갱신합니다.
    ///
    /// 같은 포트의 재관측은 타임스탬프만 갱신하여 윈도우 안에 머물게 합니다.
    pub fn observe(&self, source_ip: &str, dest_ip: &str, port: u16, namespace: &str) {
        let key = (source_ip.to_owned(), dest_ip.to_owned());
        let now = Instant::now();

        let count = {
            let mut inner = self.inner.lock().expect("portscan tracker lock poisoned");
            inner
                .entries
                .entry(key.clone())
                .or_default()
                .insert(port, now);
            inner.metric_keys.insert(key.clone(), namespace.to_owned());
            live_count(&mut inner, &key, now, self.window)
        };

        gauge!(
            PORTSCAN_DISTINCT_PORTS_10S,
            LABEL_SOURCE_IP => source_ip.to_owned(),
            LABEL_DEST_IP => dest_ip.to_owned(),
            LABEL_NAMESPACE => namespace.to_owned()
        )
        .set(count as f64);
    }

    /// 윈도우 내 고유 포트 수를 반환합니다.
    ///
    /// 오래된 포트는 지연 제거되며, 포트가 모두 사라진 쌍은 맵에서 삭제됩니다.
    pub fn distinct_count(&self, source_ip: &str, dest_ip: &str) -> usize {
        let key = (source_ip.to_owned(), dest_ip.to_owned());
        let now = Instant::now();
        let mut inner = self.inner.lock().expect("portscan tracker lock poisoned");
        live_count(&mut inner, &key, now, self.window)
    }

    /// 전체 엔트리를 순회하며 오래된 포트를 제거합니다.
    ///
    /// 살아있는 쌍은 게이지를 현재 수로 갱신하고, 비어버린 쌍은 게이지를 0으로
    /// 리셋한 뒤 레이블 레지스트리에서 제거합니다. 호출 이후 어떤 쌍에도
    /// 윈도우보다 오래된 포트가 남지 않습니다.
    pub fn cleanup(&self) {
        let now = Instant::now();
        let mut updates = Vec::new();

        {
            let mut inner = self.inner.lock().expect("portscan tracker lock poisoned");

            let mut empty_pairs = Vec::new();
            for (key, ports) in inner.entries.iter_mut() {
                ports.retain(|_, seen| now.duration_since(*seen) <= self.window);
                if ports.is_empty() {
                    empty_pairs.push(key.clone());
                }
            }

            for (key, namespace) in inner.metric_keys.iter() {
                let count = inner.entries.get(key).map_or(0, HashMap::len);
                updates.push((key.clone(), namespace.clone(), count));
            }

            for key in &empty_pairs {
                inner.entries.remove(key);
                inner.metric_keys.remove(key);
            }
        }

        for ((source_ip, dest_ip), namespace, count) in updates {
            gauge!(
                PORTSCAN_DISTINCT_PORTS_10S,
                LABEL_SOURCE_IP => source_ip,
                LABEL_DEST_IP => dest_ip,
                LABEL_NAMESPACE => namespace
            )
            .set(count as f64);
        }
    }

    /// 추적 중인 쌍 수 (통계/테스트용)
    pub fn pair_count(&self) -> usize {
        self.inner
            .lock()
            .expect("portscan tracker lock poisoned")
            .entries
            .len()
    }
}

impl Default for PortScanTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// 윈도우 밖 포트를 제거하고 남은 수를 반환합니다. 비면 쌍을 삭제합니다.
fn live_count(inner: &mut TrackerInner, key: &PairKey, now: Instant, window: Duration) -> usize {
    let Some(ports) = inner.entries.get_mut(key) else {
        return 0;
    };
    ports.retain(|_, seen| now.duration_since(*seen) <= window);
    let count = ports.len();
    if count == 0 {
        inner.entries.remove(key);
        inner.metric_keys.remove(key);
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn distinct_ports_are_counted_once() {
        let tracker = PortScanTracker::new();
        for port in [80, 81, 82, 80, 81] {
            tracker.observe("10.0.0.1", "10.0.0.2", port, "default");
        }
        assert_eq!(tracker.distinct_count("10.0.0.1", "10.0.0.2"), 3);
    }

    #[test]
    fn pairs_are_tracked_independently() {
        let tracker = PortScanTracker::new();
        tracker.observe("10.0.0.1", "10.0.0.2", 80, "default");
        tracker.observe("10.0.0.1", "10.0.0.3", 80, "default");
        tracker.observe("10.0.0.1", "10.0.0.3", 81, "default");
        assert_eq!(tracker.distinct_count("10.0.0.1", "10.0.0.2"), 1);
        assert_eq!(tracker.distinct_count("10.0.0.1", "10.0.0.3"), 2);
        assert_eq!(tracker.pair_count(), 2);
    }

    #[test]
    fn unknown_pair_counts_zero() {
        let tracker = PortScanTracker::new();
        assert_eq!(tracker.distinct_count("1.1.1.1", "2.2.2.2"), 0);
    }

    #[test]
    fn stale_ports_are_lazily_purged() {
        let tracker = PortScanTracker::with_window(Duration::from_millis(10));
        tracker.observe("10.0.0.1", "10.0.0.2", 80, "default");
        tracker.observe("10.0.0.1", "10.0.0.2", 81, "default");
        sleep(Duration::from_millis(20));
        tracker.observe("10.0.0.1", "10.0.0.2", 82, "default");
        assert_eq!(tracker.distinct_count("10.0.0.1", "10.0.0.2"), 1);
    }

    #[test]
    fn reobservation_keeps_port_in_window() {
        let tracker = PortScanTracker::with_window(Duration::from_millis(40));
        tracker.observe("10.0.0.1", "10.0.0.2", 80, "default");
        sleep(Duration::from_millis(25));
        tracker.observe("10.0.0.1", "10.0.0.2", 80, "default");
        sleep(Duration::from_millis(25));
        // 첫 관측 기준으로는 만료지만 재관측이 타임스탬프를 갱신함
        assert_eq!(tracker.distinct_count("10.0.0.1", "10.0.0.2"), 1);
    }

    #[test]
    fn empty_pair_is_removed() {
        let tracker = PortScanTracker::with_window(Duration::from_millis(10));
        tracker.observe("10.0.0.1", "10.0.0.2", 80, "default");
        assert_eq!(tracker.pair_count(), 1);
        sleep(Duration::from_millis(20));
        assert_eq!(tracker.distinct_count("10.0.0.1", "10.0.0.2"), 0);
        assert_eq!(tracker.pair_count(), 0);
    }

    #[test]
    fn cleanup_purges_all_stale_entries() {
        let tracker = PortScanTracker::with_window(Duration::from_millis(10));
        tracker.observe("10.0.0.1", "10.0.0.2", 80, "default");
        tracker.observe("10.0.0.3", "10.0.0.4", 81, "shop");
        sleep(Duration::from_millis(20));
        tracker.observe("10.0.0.5", "10.0.0.6", 82, "default");

        tracker.cleanup();

        assert_eq!(tracker.pair_count(), 1);
        assert_eq!(tracker.distinct_count("10.0.0.5", "10.0.0.6"), 1);
        assert_eq!(tracker.distinct_count("10.0.0.1", "10.0.0.2"), 0);
    }

    #[test]
    fn cleanup_on_empty_tracker_does_not_panic() {
        PortScanTracker::new().cleanup();
    }

    #[test]
    fn scan_burst_counts_all_ports_in_window() {
        // 1초 내 11개 고유 포트 관측 — 포트스캔 시나리오
        let tracker = PortScanTracker::new();
        for port in 80..91 {
            tracker.observe("10.0.0.1", "10.0.0.2", port, "default");
        }
        assert_eq!(tracker.distinct_count("10.0.0.1", "10.0.0.2"), 11);
    }
}
