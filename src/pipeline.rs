//! The pipeline driver: a single select loop multiplexing the supervised
//! journal watcher, the periodic monitors, the watchdog tick, and shutdown.
//!
//! Events flow classify -> enrich -> cooldown check -> insert -> notify,
//! strictly sequentially. The cooldown decision runs before the insert so
//! the aggregation thresholds apply to pre-insert counts.

use std::future::pending;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::classifier::Classifier;
use crate::config::{self, Config};
use crate::enricher::Enricher;
use crate::event::Event;
use crate::monitor::{procsnap, GpuMonitor, PsiMonitor, SmartMonitor};
use crate::notify_socket;
use crate::reporter::NtfyReporter;
use crate::store::Store;
use crate::watcher::{JournalSource, PipeSource, SupervisedSource};

const RESTART_WAIT: Duration = Duration::from_secs(5);
const PURGE_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Runs the daemon until a shutdown signal arrives.
pub async fn run(config: Config) -> Result<()> {
    let data_dir = config::data_dir()?;
    let db_path = config.db.resolved_path()?;
    // A store that cannot open is fatal; everything downstream needs it.
    let store = Store::open(&db_path)
        .with_context(|| format!("opening event store {}", db_path.display()))?;

    let classifier = Classifier::new(&config.instance.id);
    let enricher = Enricher::new();
    let reporter = NtfyReporter::new(config.clone());

    let token = CancellationToken::new();
    let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("installing SIGINT handler")?;

    let cursor_file = data_dir.join("journal-cursor");
    let supervised = SupervisedSource::new(
        Box::new(move || {
            Box::new(PipeSource::new(Some(cursor_file.clone()))) as Box<dyn JournalSource>
        }),
        RESTART_WAIT,
        0,
    );
    let mut records = supervised.entries(token.clone());

    let mut psi_events = config.psi.enabled.then(|| {
        PsiMonitor::new(
            config.psi.poll_interval,
            config.psi.warn_some_avg10,
            config.psi.warn_full_avg10,
        )
        .spawn(token.clone())
    });
    let mut smart_events = config
        .smart
        .enabled
        .then(|| SmartMonitor::new(config.smart.poll_interval).spawn(token.clone()));
    let mut gpu_events = config.gpu.enabled.then(|| {
        GpuMonitor::new(
            config.gpu.poll_interval,
            config.gpu.temp_warn,
            config.gpu.vram_warn_pct,
        )
        .spawn(token.clone())
    });

    notify_socket::notify("READY=1");
    let watchdog = notify_socket::watchdog_interval();
    let mut watchdog_tick = tokio::time::interval(watchdog.unwrap_or(Duration::from_secs(3600)));
    let mut purge_tick = tokio::time::interval(PURGE_INTERVAL);

    info!(
        instance = %config.instance.id,
        db = %db_path.display(),
        "pipeline started, watching for events"
    );

    loop {
        tokio::select! {
            _ = sigterm.recv() => {
                info!(signal = "SIGTERM", "received signal, shutting down");
                break;
            }
            _ = sigint.recv() => {
                info!(signal = "SIGINT", "received signal, shutting down");
                break;
            }
            record = records.recv() => match record {
                Some(record) => {
                    if let Some(event) = classifier.classify(&record) {
                        process_event(&store, &enricher, &reporter, &config, event).await;
                    }
                }
                None => {
                    warn!("journal record channel closed");
                    break;
                }
            },
            psi = recv_or_pending(&mut psi_events) => {
                let detail = format!(
                    "PSI some avg10={:.1}% full avg10={:.1}%\n\nTop memory consumers:\n{}",
                    psi.stats.some_avg10,
                    psi.stats.full_avg10,
                    procsnap::format_top_consumers(&psi.top_consumers),
                );
                let event = classifier.classify_psi_event(
                    psi.stats.some_avg10,
                    psi.stats.full_avg10,
                    &detail,
                );
                process_event(&store, &enricher, &reporter, &config, event).await;
            }
            smart = recv_or_pending(&mut smart_events) => {
                let event = classifier.classify_smart_event(
                    &smart.status.device,
                    &smart.summary(),
                    &smart.detail(),
                );
                process_event(&store, &enricher, &reporter, &config, event).await;
            }
            gpu = recv_or_pending(&mut gpu_events) => {
                let mut event = classifier.classify_gpu_event(
                    &gpu.status.card_name(),
                    gpu.status.vendor.as_str(),
                    &gpu.summary(),
                    &crate::monitor::gpu::format_gpu_status(&gpu.status),
                );
                event.raw_fields.insert(
                    "_gpu_reason".to_string(),
                    gpu.reason.as_str().to_string(),
                );
                process_event(&store, &enricher, &reporter, &config, event).await;
            }
            _ = watchdog_tick.tick(), if watchdog.is_some() => {
                notify_socket::notify("WATCHDOG=1");
            }
            _ = purge_tick.tick() => {
                match store.purge(config.db.retention) {
                    Ok(0) => {}
                    Ok(removed) => info!(removed, "purged expired events"),
                    Err(err) => error!(error = %err, "retention purge failed"),
                }
            }
        }
    }

    notify_socket::notify("STOPPING=1");
    token.cancel();
    Ok(())
}

/// Runs one event through enrich -> cooldown -> insert -> notify. Failures
/// are contained: a dedup error suppresses the alert but not the insert, a
/// notify error leaves the notified flag unset for the next occurrence.
async fn process_event(
    store: &Store,
    enricher: &Enricher,
    reporter: &NtfyReporter,
    config: &Config,
    mut event: Event,
) {
    info!(
        tier = %event.tier,
        severity = %event.severity,
        summary = %event.summary,
        "event classified"
    );

    enricher.enrich(&mut event).await;

    let decision = match store.check_cooldown(
        &event,
        config.cooldown.window,
        config.cooldown.aggregate_threshold,
    ) {
        Ok(decision) => Some(decision),
        Err(err) => {
            error!(error = %err, "cooldown check failed");
            None
        }
    };

    if let Err(err) = store.insert(&event) {
        error!(error = %err, id = %event.id, "failed to store event");
    }

    let Some(decision) = decision else { return };
    if !decision.should_alert {
        debug!(
            recent_count = decision.recent_count,
            "alert suppressed within cooldown window"
        );
        return;
    }

    if decision.aggregated {
        event.summary = format!(
            "{} ({} occurrences in cooldown window)",
            event.summary,
            decision.recent_count + 1
        );
    }

    match reporter.report(&event).await {
        Ok(()) => {
            if let Err(err) = store.mark_notified(&event.id) {
                warn!(error = %err, id = %event.id, "failed to mark event notified");
            }
        }
        Err(err) => error!(error = %err, "failed to send notification"),
    }
}

/// Receives from an optional monitor channel; a disabled or closed channel
/// parks the branch instead of completing the select.
async fn recv_or_pending<T>(rx: &mut Option<mpsc::Receiver<T>>) -> T {
    match rx {
        Some(receiver) => match receiver.recv().await {
            Some(value) => value,
            None => pending().await,
        },
        None => pending().await,
    }
}
