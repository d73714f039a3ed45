//! Pipeline processor — the per-flow ingestion adapter.
//!
//! Receives each normalized flow from the broadcaster's ingest hook,
//! records its metrics, and runs the per-flow rule hooks. Most rules are
//! periodic and ignore this path; the processor exists so the two styles
//! stay composable.

use std::sync::Arc;
use std::time::Instant;

use metrics::histogram;

use flowguard_core::flow::Flow;
use flowguard_core::metrics::{FLOW_PROCESSING_DURATION_SECONDS, LABEL_NAMESPACE};
use flowguard_rules::Engine;
use flowguard_telemetry::FlowRecorder;

pub struct Processor {
    recorder: Arc<FlowRecorder>,
    engine: Arc<Engine>,
}

impl Processor {
    pub fn new(recorder: Arc<FlowRecorder>, engine: Arc<Engine>) -> Self {
        Self { recorder, engine }
    }

    /// Record metrics for the flow, then run per-flow rule hooks.
    ///
    /// Metrics are durable before any downstream consumer observes the flow.
    pub fn process(&self, flow: &Flow) {
        let started = Instant::now();

        self.recorder.record(flow);
        self.engine.evaluate_all(flow);

        histogram!(
            FLOW_PROCESSING_DURATION_SECONDS,
            LABEL_NAMESPACE => flow.effective_namespace().to_owned()
        )
        .record(started.elapsed().as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use flowguard_core::flow::Verdict;
    use flowguard_core::rule::Rule;
    use flowguard_core::types::{Alert, Severity};

    struct RecordingRule {
        seen: Mutex<usize>,
    }

    impl Rule for RecordingRule {
        fn name(&self) -> &str {
            "recording"
        }

        fn is_enabled(&self) -> bool {
            true
        }

        fn evaluate(&self, flow: &Flow) -> Option<Alert> {
            *self.seen.lock().unwrap() += 1;
            (flow.verdict == Verdict::Dropped).then(|| {
                Alert::new("recording", Severity::Low, flow.effective_namespace(), "drop")
            })
        }
    }

    #[tokio::test]
    async fn processor_records_and_evaluates() {
        let recorder = Arc::new(FlowRecorder::new());
        let engine = Arc::new(Engine::new());
        let rule = Arc::new(RecordingRule {
            seen: Mutex::new(0),
        });
        engine.register_rule(rule.clone());

        let processor = Processor::new(recorder, engine);
        processor.process(&Flow::default());
        processor.process(&Flow {
            verdict: Verdict::Dropped,
            ..Default::default()
        });

        assert_eq!(*rule.seen.lock().unwrap(), 2);
    }
}
