//! Prometheus metrics exposition.
//!
//! Uses the built-in HTTP listener from `metrics-exporter-prometheus`
//! to expose the scrape endpoint. A gauge idle-timeout ages out label
//! sets the port-scan cleanup has reset, keeping exposition cardinality
//! bounded.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;
use metrics_util::MetricKindMask;

/// Idle gauges are dropped from exposition after this long without updates.
const GAUGE_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Install the global metrics recorder and start the HTTP listener.
///
/// This function should be called once per process. After calling this,
/// all `metrics::counter!()`, `metrics::gauge!()`, `metrics::histogram!()`
/// macros record to the Prometheus exposition format.
///
/// # Errors
///
/// - Listen address cannot be parsed or bound
/// - Global recorder is already installed
pub fn install_metrics_recorder(listen: &str) -> Result<()> {
    let addr: SocketAddr = listen
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid metrics listen address '{}': {}", listen, e))?;

    if addr.ip().is_unspecified() {
        tracing::warn!(
            listen_addr = %addr,
            "metrics endpoint is exposed on all interfaces; restrict listen address in untrusted networks"
        );
    }

    tracing::info!(listen_addr = %addr, "installing Prometheus metrics recorder");

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .idle_timeout(MetricKindMask::GAUGE, Some(GAUGE_IDLE_TIMEOUT))
        .install()
        .map_err(|e| anyhow::anyhow!("failed to install metrics recorder: {}", e))?;

    // Register metric descriptions
    flowguard_core::metrics::describe_all();

    tracing::info!(listen_addr = %addr, "Prometheus metrics endpoint active");

    Ok(())
}
