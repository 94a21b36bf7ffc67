//! Background flush worker.

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use cairn_core::{CacheResult, StateError};
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::{FlushOutcome, Inner};

/// Run one flush pass on the blocking pool. Writers are synchronous and may
/// block on I/O, so they never run on a runtime worker thread.
pub(crate) async fn run_pass<K, V>(inner: Arc<Inner<K, V>>) -> CacheResult<FlushOutcome>
where
    K: Hash + Eq + Clone + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    let cache = inner.name().to_string();
    tokio::task::spawn_blocking(move || inner.flush_pass())
        .await
        .map_err(|e| StateError::WorkerFailed {
            cache,
            reason: e.to_string(),
        })?
}

/// Flush on every `flush_interval` tick and whenever a threshold trigger
/// fires, until the shutdown signal is received.
///
/// The first tick is one full interval after start. A pass that fails is
/// logged and counted; its entries are already back in the buffer, so the
/// next tick retries them.
pub(crate) async fn flush_worker<K, V>(
    inner: Arc<Inner<K, V>>,
    mut shutdown_rx: watch::Receiver<bool>,
) where
    K: Hash + Eq + Clone + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    let period = inner.config.flush_interval;
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!(
        cache = %inner.name(),
        flush_interval_ms = period.as_millis() as u64,
        batch_size = inner.config.batch_size,
        "Write-behind worker started"
    );

    loop {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    tracing::info!(cache = %inner.name(), "Write-behind worker shutting down");
                    break;
                }
            }

            _ = ticker.tick() => {
                background_pass(&inner, "interval").await;
            }

            _ = inner.flush_requested.notified() => {
                background_pass(&inner, "threshold").await;
            }
        }
    }

    let snapshot = inner.metrics.snapshot();
    tracing::info!(
        cache = %inner.name(),
        flush_passes = snapshot.flush_passes,
        entries_written = snapshot.entries_written,
        entries_deleted = snapshot.entries_deleted,
        failed_flushes = snapshot.failed_flushes,
        "Write-behind worker stopped"
    );
}

async fn background_pass<K, V>(inner: &Arc<Inner<K, V>>, trigger: &'static str)
where
    K: Hash + Eq + Clone + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    match run_pass(Arc::clone(inner)).await {
        Ok(outcome) => {
            if outcome.flushed > 0 {
                tracing::debug!(
                    cache = %inner.name(),
                    trigger,
                    flushed = outcome.flushed,
                    remaining = outcome.remaining,
                    "Flush pass completed"
                );
            }
            inner.schedule_follow_up(&outcome);
        }
        Err(e) => {
            tracing::error!(
                cache = %inner.name(),
                trigger,
                error = %e,
                pending = inner.pending.len(),
                "Background flush failed"
            );
        }
    }
}
