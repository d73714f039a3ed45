//! flowguard-daemon — assembly, channel wiring, and lifecycle management.
//!
//! Startup order (producers before consumers): metrics recorder →
//! store/query client → engine + rules + notifiers → rule tasks and
//! alert dispatcher → flow broadcaster (the single upstream stream) →
//! operator API. Shutdown is a single broadcast observed by every task.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use flowguard_core::config::GuardConfig;
use flowguard_core::error::ConfigError;
use flowguard_notify::{LogNotifier, TelegramNotifier};
use flowguard_relay::RelayClient;
use flowguard_rules::builtin::QueryClient;
use flowguard_rules::{build_rules, Engine};
use flowguard_stream::broadcaster::IngestHook;
use flowguard_stream::{FlowBroadcaster, GuardStore, RuleInfo};
use flowguard_telemetry::{FlowRecorder, MetricsQueryClient};

use flowguard_daemon::cli::DaemonCli;
use flowguard_daemon::processor::Processor;
use flowguard_daemon::{api, logging, metrics_server};

/// How long to wait for background tasks after the shutdown signal.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(10);
/// Relay readiness probe deadline at startup.
const CONNECT_PROBE_DEADLINE: Duration = Duration::from_secs(5);
/// Port-scan tracker cleanup cadence.
const PORTSCAN_CLEANUP_INTERVAL: Duration = Duration::from_secs(10);
/// Config → store rules view sync cadence.
const RULE_SYNC_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = DaemonCli::parse();

    let mut config = match GuardConfig::load(&cli.config).await {
        Ok(config) => config,
        Err(ConfigError::FileNotFound { path }) => {
            eprintln!("config file {path} not found, using default configuration");
            GuardConfig::default()
        }
        Err(e) => return Err(anyhow::anyhow!("failed to load config: {e}")),
    };

    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("config validation failed: {e}"))?;

    if cli.validate {
        println!("configuration OK");
        return Ok(());
    }

    logging::init_tracing(&config.logging)?;
    run(Arc::new(config)).await
}

async fn run(config: Arc<GuardConfig>) -> Result<()> {
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        relay = %config.application.relay_server,
        query_url = %config.prometheus.url,
        namespaces = ?config.watch_namespaces(),
        "flowguard-daemon starting"
    );

    metrics_server::install_metrics_recorder(&config.application.metrics_listen)?;

    // Core components
    let store = Arc::new(GuardStore::with_capacity(
        config.storage.max_flows,
        config.storage.max_alerts,
    ));
    let recorder = Arc::new(FlowRecorder::new());
    let query: Arc<dyn QueryClient> = Arc::new(MetricsQueryClient::new(&config.prometheus.url)?);

    // Rule engine: rules from config, notifiers from the alerting section
    let engine = Arc::new(Engine::new());
    for rule in build_rules(&config, query, engine.emitter()) {
        engine.register_rule(rule);
    }
    register_notifiers(&engine, &config);
    tracing::info!(
        rules = engine.rule_count(),
        notifiers = engine.notifier_count(),
        "rule engine initialized"
    );

    // Upstream relay client; a failed probe only delays the first stream
    let relay = RelayClient::connect(&config.application.relay_server)?;
    if let Err(e) = relay.test_connection(CONNECT_PROBE_DEADLINE).await {
        tracing::warn!(error = %e, "relay connection test failed, stream will keep retrying");
    }

    let (shutdown_tx, _) = broadcast::channel::<()>(16);
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    // One task per enabled rule
    tasks.extend(engine.spawn_rules(&shutdown_tx));

    // Alert dispatcher: channel → store (+ subscribers) → notifiers
    {
        let engine = Arc::clone(&engine);
        let store = Arc::clone(&store);
        let shutdown_rx = shutdown_tx.subscribe();
        tasks.push(tokio::spawn(async move {
            engine
                .run_dispatcher(shutdown_rx, move |alert| {
                    store.add_alert(alert);
                })
                .await;
        }));
    }

    // Periodic port-scan tracker cleanup
    {
        let recorder = Arc::clone(&recorder);
        let mut shutdown_rx = shutdown_tx.subscribe();
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PORTSCAN_CLEANUP_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => recorder.portscan().cleanup(),
                    _ = shutdown_rx.recv() => {
                        tracing::debug!("port-scan cleanup task shutting down");
                        return;
                    }
                }
            }
        }));
    }

    // Config → store rules view, synced periodically for the operator UI
    store.set_rules(rules_view(&config));
    {
        let store = Arc::clone(&store);
        let config = Arc::clone(&config);
        let mut shutdown_rx = shutdown_tx.subscribe();
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(RULE_SYNC_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => store.set_rules(rules_view(&config)),
                    _ = shutdown_rx.recv() => {
                        tracing::debug!("rule sync task shutting down");
                        return;
                    }
                }
            }
        }));
    }

    // The single upstream stream: ingest hook → store → subscriber fan-out
    let processor = Arc::new(Processor::new(Arc::clone(&recorder), Arc::clone(&engine)));
    let on_flow: IngestHook = {
        let processor = Arc::clone(&processor);
        Box::new(move |flow| processor.process(flow))
    };
    let broadcaster = Arc::new(FlowBroadcaster::new(
        relay,
        Arc::clone(&store),
        config.watch_namespaces(),
        on_flow,
    ));
    if let Some(handle) = broadcaster.start(&shutdown_tx) {
        tasks.push(handle);
    }

    // Operator API
    let state = api::ApiState {
        store: Arc::clone(&store),
        broadcaster: Arc::clone(&broadcaster),
    };
    let listener = tokio::net::TcpListener::bind(&config.application.api_listen).await?;
    tracing::info!(listen = %config.application.api_listen, "operator API listening");
    {
        let mut shutdown_rx = shutdown_tx.subscribe();
        let app = api::router(state);
        tasks.push(tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.recv().await;
                })
                .await;
            if let Err(e) = result {
                tracing::error!(error = %e, "operator API server failed");
            }
        }));
    }

    // Main event loop: block until a shutdown signal arrives
    let signal = wait_for_shutdown_signal().await?;
    tracing::info!(signal, "shutdown signal received");
    let _ = shutdown_tx.send(());

    for task in tasks {
        if tokio::time::timeout(SHUTDOWN_DEADLINE, task).await.is_err() {
            tracing::warn!("background task did not stop within the shutdown deadline");
        }
    }

    tracing::info!("flowguard-daemon shut down");
    Ok(())
}

/// Register notifiers from the `[alerting]` section.
fn register_notifiers(engine: &Engine, config: &GuardConfig) {
    if !config.alerting.enabled {
        tracing::info!("alerting disabled, no notifiers registered");
        return;
    }
    if config.alerting.channels.log {
        engine.register_notifier(Arc::new(LogNotifier::new()));
    }
    if config.alerting.channels.telegram && config.alerting.telegram.enabled {
        engine.register_notifier(Arc::new(TelegramNotifier::new(&config.alerting.telegram)));
    }
}

/// Project the config's rule table into the store's operator view.
fn rules_view(config: &GuardConfig) -> Vec<RuleInfo> {
    let mut rules: Vec<RuleInfo> = config
        .rules
        .iter()
        .map(|(name, rule)| RuleInfo {
            id: name.clone(),
            name: name.clone(),
            enabled: rule.enabled,
            severity: rule.severity_level().as_label().to_owned(),
            description: rule.description.clone(),
            rule_type: if name == "ddos_flow" { "flow" } else { "prometheus" }.to_owned(),
            thresholds: rule
                .thresholds
                .iter()
                .map(|(key, value)| (key.clone(), toml_to_json(value)))
                .collect(),
        })
        .collect();
    rules.sort_by(|a, b| a.name.cmp(&b.name));
    rules
}

fn toml_to_json(value: &toml::Value) -> serde_json::Value {
    match value {
        toml::Value::String(v) => serde_json::Value::String(v.clone()),
        toml::Value::Integer(v) => serde_json::Value::from(*v),
        toml::Value::Float(v) => serde_json::Value::from(*v),
        toml::Value::Boolean(v) => serde_json::Value::Bool(*v),
        toml::Value::Datetime(v) => serde_json::Value::String(v.to_string()),
        toml::Value::Array(values) => {
            serde_json::Value::Array(values.iter().map(toml_to_json).collect())
        }
        toml::Value::Table(table) => serde_json::Value::Object(
            table
                .iter()
                .map(|(k, v)| (k.clone(), toml_to_json(v)))
                .collect(),
        ),
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
///
/// Returns the name of the signal that triggered the shutdown.
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}
