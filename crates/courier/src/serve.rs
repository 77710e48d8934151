// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `courier serve` command implementation.
//!
//! Opens the store, provisions every configured chip with a bridge client,
//! and runs the worker pool, the registry's client-event loop, the health
//! monitor, and an event logger until SIGINT/SIGTERM.

use std::sync::Arc;
use std::time::Duration;

use courier_bridge::HttpBridgeClient;
use courier_config::CourierConfig;
use courier_core::{ClientEvent, CourierError, StorageAdapter};
use courier_dispatch::{DispatchEvent, Dispatcher, install_signal_handler};
use courier_storage::SqliteStore;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Buffer between bridge clients and the registry's event loop.
const CLIENT_EVENT_BUFFER: usize = 64;

/// Runs the `courier serve` command.
pub async fn run_serve(config: CourierConfig) -> Result<(), CourierError> {
    init_tracing(&config.node.log_level);
    info!(node = %config.node.name, "starting courier serve");

    let cancel = install_signal_handler();

    #[cfg(feature = "prometheus")]
    let _prometheus = init_prometheus(&config.telemetry);

    let store = Arc::new(SqliteStore::open(config.storage.clone()).await?);
    let dispatcher = Dispatcher::from_config(store.clone(), &config);

    let (event_tx, event_rx) = mpsc::channel(CLIENT_EVENT_BUFFER);
    let event_loop =
        Arc::clone(dispatcher.registry()).spawn_event_loop(event_rx, cancel.clone());
    provision_chips(&dispatcher, &config, &event_tx).await?;
    drop(event_tx);

    let logger = tokio::spawn(log_events(dispatcher.events().subscribe(), cancel.clone()));

    let health = dispatcher
        .health_monitor(Duration::from_secs(config.health.interval_secs))
        .spawn(cancel.clone());

    let mem_cancel = cancel.clone();
    let memory = tokio::spawn(async move { memory_monitor(mem_cancel).await });

    let mut pool = dispatcher.worker_pool();
    pool.spawn(config.node.workers, &cancel);

    cancel.cancelled().await;
    info!("shutdown requested, draining workers");

    pool.join().await;
    for (name, task) in [
        ("health monitor", health),
        ("client event loop", event_loop),
        ("event logger", logger),
        ("memory monitor", memory),
    ] {
        if let Err(e) = task.await {
            warn!(task = name, error = %e, "background task ended abnormally");
        }
    }

    release_clients(&dispatcher).await;
    store.close().await?;
    info!("courier stopped");
    Ok(())
}

/// Register a bridge client for every `[[chips]]` entry.
async fn provision_chips(
    dispatcher: &Dispatcher,
    config: &CourierConfig,
    events: &mpsc::Sender<ClientEvent>,
) -> Result<(), CourierError> {
    let timeout = Duration::from_secs(config.dispatch.send_timeout_secs);
    for chip in &config.chips {
        let client = HttpBridgeClient::new(chip, timeout)?.with_events(events.clone());
        dispatcher
            .registry()
            .provision(&chip.id, &chip.identity, Arc::new(client))
            .await?;
    }
    if config.chips.is_empty() {
        warn!("no chips configured, jobs will wait until one is provisioned");
    } else {
        info!(chips = config.chips.len(), "chips provisioned");
    }
    Ok(())
}

async fn release_clients(dispatcher: &Dispatcher) {
    let handles = dispatcher.registry().handles();
    for channel_id in handles.ids() {
        if let Some(client) = handles.remove(&channel_id) {
            if let Err(e) = client.shutdown().await {
                warn!(channel_id = %channel_id, error = %e, "client shutdown failed");
            }
        }
    }
}

/// Log every dispatch event as one structured line.
async fn log_events(mut rx: broadcast::Receiver<DispatchEvent>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = rx.recv() => match received {
                Ok(event) => {
                    let detail = serde_json::to_string(&event).unwrap_or_default();
                    match &event {
                        DispatchEvent::QrChallenge { channel_id, .. } => {
                            warn!(channel_id = %channel_id, %detail, "chip needs pairing");
                        }
                        _ => info!(event = event.kind(), %detail, "dispatch event"),
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event logger fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
    debug!("event logger stopped");
}

#[cfg(feature = "prometheus")]
fn init_prometheus(
    config: &courier_config::model::TelemetryConfig,
) -> Option<courier_prometheus::PrometheusAdapter> {
    if !config.prometheus_enabled {
        return None;
    }
    let adapter = match config.prometheus_listen.as_deref() {
        Some(addr) => addr
            .parse::<std::net::SocketAddr>()
            .map_err(|e| CourierError::Config(format!("invalid prometheus_listen `{addr}`: {e}")))
            .and_then(courier_prometheus::PrometheusAdapter::with_http_listener),
        None => courier_prometheus::PrometheusAdapter::new(),
    };
    match adapter {
        Ok(adapter) => {
            info!("prometheus metrics enabled");
            Some(adapter)
        }
        Err(e) => {
            warn!(error = %e, "prometheus initialization failed, continuing without metrics");
            None
        }
    }
}

/// Export jemalloc heap statistics every 15 seconds.
#[cfg(not(target_env = "msvc"))]
async fn memory_monitor(cancel: CancellationToken) {
    let mut interval = tokio::time::interval(Duration::from_secs(15));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                // Stats are cached until the epoch advances.
                let _ = tikv_jemalloc_ctl::epoch::advance();
                let allocated = tikv_jemalloc_ctl::stats::allocated::read().unwrap_or(0);
                let resident = tikv_jemalloc_ctl::stats::resident::read().unwrap_or(0);
                debug!(allocated, resident, "memory");

                #[cfg(feature = "prometheus")]
                {
                    courier_prometheus::set_memory_heap(allocated as f64);
                    courier_prometheus::set_memory_resident(resident as f64);
                }
            }
            _ = cancel.cancelled() => break,
        }
    }
}

#[cfg(target_env = "msvc")]
async fn memory_monitor(cancel: CancellationToken) {
    cancel.cancelled().await;
}

fn log_filter(log_level: &str) -> String {
    format!(
        "courier={log_level},courier_dispatch={log_level},courier_storage={log_level},\
         courier_bridge={log_level},courier_prometheus={log_level},warn"
    )
}

fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_filter(log_level)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_filter_covers_workspace_crates() {
        let filter = log_filter("debug");
        assert!(filter.starts_with("courier=debug,courier_dispatch=debug"));
        assert!(filter.contains("courier_bridge=debug"));
        assert!(filter.ends_with(",warn"));
        assert!(tracing_subscriber::EnvFilter::try_new(filter).is_ok());
    }

    #[tokio::test]
    async fn provisioned_chips_get_live_handles() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = CourierConfig::default();
        config.storage.database_path = dir.path().join("courier.db").display().to_string();
        config.chips = vec![courier_config::ChipConfig {
            id: "chip-a".into(),
            identity: "5511900000001".into(),
            bridge_url: "http://127.0.0.1:9/chip-a".into(),
            api_token: None,
        }];

        let store = Arc::new(SqliteStore::open(config.storage.clone()).await.unwrap());
        let dispatcher = Dispatcher::from_config(store.clone(), &config);
        let (tx, _rx) = mpsc::channel(4);
        provision_chips(&dispatcher, &config, &tx).await.unwrap();

        assert_eq!(dispatcher.registry().handles().ids(), vec!["chip-a".to_string()]);
        let chip = dispatcher.registry().get("chip-a").await.unwrap().unwrap();
        assert_eq!(chip.destination_identity, "5511900000001");

        release_clients(&dispatcher).await;
        assert!(dispatcher.registry().handles().is_empty());
        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn event_logger_stops_on_cancel() {
        let (tx, rx) = broadcast::channel(4);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(log_events(rx, cancel.clone()));
        tx.send(DispatchEvent::DeadLettered {
            job_id: "job-1".into(),
            tenant_id: "acme".into(),
            dead_letter_id: "dl-1".into(),
        })
        .unwrap();
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
