//! 베이스라인 수집기 — 고정 학습 윈도우의 평균 레이트
//!
//! 레이트 기반 규칙(traffic_spike, traffic_death)이 네임스페이스별로
//! 하나씩 소유합니다. 윈도우가 끝나기 전에는 절대 베이스라인을 내놓지
//! 않으므로, 규칙은 학습이 끝나기 전에 알림을 낼 수 없습니다.

use std::time::{Duration, Instant};

/// 단일 네임스페이스의 베이스라인 상태
#[derive(Debug)]
pub struct BaselineCollector {
    window: Duration,
    start: Option<Instant>,
    samples: Vec<f64>,
    value: Option<f64>,
}

impl BaselineCollector {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            start: None,
            samples: Vec::new(),
            value: None,
        }
    }

    /// 확정된 베이스라인 값
    pub fn value(&self) -> Option<f64> {
        self.value
    }

    /// 수집된 샘플 수 (학습 중에만 의미 있음)
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// 샘플을 관측하고, **이 호출 이전에** 확정돼 있던 베이스라인을 반환합니다.
    ///
    /// 윈도우를 닫는 호출은 베이스라인을 확정하지만 `None`을 반환합니다 —
    /// 방금 학습을 끝낸 틱은 평가하지 않습니다.
    pub fn observe(&mut self, rate: f64) -> Option<f64> {
        if let Some(value) = self.value {
            return Some(value);
        }

        match self.start {
            None => {
                self.start = Some(Instant::now());
                self.samples.clear();
                self.samples.push(rate);
                None
            }
            Some(start) if start.elapsed() < self.window => {
                self.samples.push(rate);
                None
            }
            Some(_) => {
                let mean = self.samples.iter().sum::<f64>() / self.samples.len() as f64;
                self.value = Some(mean);
                self.start = None;
                self.samples = Vec::new();
                None
            }
        }
    }

    /// 베이스라인을 강제로 교체합니다 (≤0 베이스라인의 부트스트랩 폴백).
    pub fn reset_value(&mut self, value: f64) {
        self.value = Some(value);
    }

    /// 학습 윈도우의 남은 시간 — 학습 중이 아니면 None
    pub fn remaining(&self) -> Option<Duration> {
        let start = self.start?;
        Some(self.window.saturating_sub(start.elapsed()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn never_yields_before_window_elapses() {
        let mut collector = BaselineCollector::new(Duration::from_millis(50));
        assert!(collector.observe(10.0).is_none());
        assert!(collector.observe(10.0).is_none());
        assert!(collector.value().is_none());
        assert_eq!(collector.sample_count(), 2);
    }

    #[test]
    fn closing_tick_sets_value_but_returns_none() {
        let mut collector = BaselineCollector::new(Duration::from_millis(10));
        assert!(collector.observe(10.0).is_none());
        assert!(collector.observe(20.0).is_none());
        sleep(Duration::from_millis(15));
        // 윈도우를 닫는 틱 — 값은 확정되지만 이 틱은 평가되지 않음
        assert!(collector.observe(100.0).is_none());
        assert_eq!(collector.value(), Some(15.0));
    }

    #[test]
    fn established_baseline_is_returned_thereafter() {
        let mut collector = BaselineCollector::new(Duration::from_millis(10));
        collector.observe(10.0);
        sleep(Duration::from_millis(15));
        collector.observe(0.0); // closes window: mean([10.0]) = 10.0
        assert_eq!(collector.observe(40.0), Some(10.0));
        assert_eq!(collector.observe(40.0), Some(10.0));
    }

    #[test]
    fn closing_sample_is_not_included_in_mean() {
        let mut collector = BaselineCollector::new(Duration::from_millis(10));
        collector.observe(10.0);
        collector.observe(20.0);
        sleep(Duration::from_millis(15));
        collector.observe(999.0);
        assert_eq!(collector.value(), Some(15.0));
    }

    #[test]
    fn reset_value_replaces_baseline() {
        let mut collector = BaselineCollector::new(Duration::from_millis(10));
        collector.observe(0.0);
        sleep(Duration::from_millis(15));
        collector.observe(0.0); // baseline = 0.0
        assert_eq!(collector.observe(5.0), Some(0.0));
        collector.reset_value(5.0);
        assert_eq!(collector.observe(5.0), Some(5.0));
    }

    #[test]
    fn remaining_reports_learning_progress() {
        let mut collector = BaselineCollector::new(Duration::from_secs(60));
        assert!(collector.remaining().is_none());
        collector.observe(1.0);
        let remaining = collector.remaining().unwrap();
        assert!(remaining <= Duration::from_secs(60));
        assert!(remaining > Duration::from_secs(55));
    }
}
