//! Supervises the background tasks every instance runs for the lifetime
//! of the process: the upload worker (C5), the GC coordinator (C11), and
//! vacation-ledger cleanup (C12). Each is a loop that sleeps between
//! passes and stops as soon as the shared `CancellationToken` fires.

use std::sync::Arc;

use chrono::Duration;
use sqlx::PgPool;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use mailgram_engine::fetch::{Cache, ObjectStore, Spool};
use mailgram_engine::{gc, upload};

use crate::config::Config;

/// `_cache` is wired in here because this is the process's one
/// construction point for it — the body fetch path itself runs inside
/// the (out-of-scope) protocol front-ends, not a background task.
pub fn spawn_background_tasks(
    pool: PgPool,
    object_store: Arc<dyn ObjectStore>,
    _cache: Arc<dyn Cache>,
    spool: Arc<dyn Spool>,
    config: &Config,
    shutdown: CancellationToken,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();

    handles.push(spawn_upload_worker(pool.clone(), object_store.clone(), spool, config, shutdown.clone()));
    handles.push(spawn_gc_coordinator(pool.clone(), object_store, config, shutdown.clone()));
    handles.push(spawn_vacation_cleanup(pool, config, shutdown));

    handles
}

fn spawn_upload_worker(
    pool: PgPool,
    object_store: Arc<dyn ObjectStore>,
    spool: Arc<dyn Spool>,
    config: &Config,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let instance_id = config.instance_id.clone();
    let max_attempts = config.upload_worker.max_attempts;
    let retry_interval = Duration::seconds(config.upload_worker.retry_interval_secs);
    let batch_size = config.upload_worker.batch_size;
    let poll_interval = std::time::Duration::from_secs(config.upload_worker.poll_interval_secs);

    tokio::spawn(async move {
        loop {
            match upload::run_once(&pool, object_store.as_ref(), spool.as_ref(), &instance_id, max_attempts, retry_interval, batch_size).await {
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "upload worker pass failed"),
            }
            if sleep_or_shutdown(poll_interval, &shutdown).await {
                break;
            }
        }
        tracing::info!("upload worker stopped");
    })
}

fn spawn_gc_coordinator(
    pool: PgPool,
    object_store: Arc<dyn ObjectStore>,
    config: &Config,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let grace_period = Duration::seconds(config.gc.grace_period_secs);
    let batch_size = config.gc.batch_size;
    let interval = std::time::Duration::from_secs(config.gc.interval_secs);

    tokio::spawn(async move {
        loop {
            match gc::run_once(&pool, object_store.as_ref(), grace_period, batch_size).await {
                Ok(report) => {
                    if !report.skipped_lock_held {
                        tracing::info!(candidates = report.candidates, reaped = report.reaped, "GC pass complete");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "GC pass failed"),
            }
            if sleep_or_shutdown(interval, &shutdown).await {
                break;
            }
        }
        tracing::info!("GC coordinator stopped");
    })
}

fn spawn_vacation_cleanup(pool: PgPool, config: &Config, shutdown: CancellationToken) -> JoinHandle<()> {
    let ledger_ttl = Duration::seconds(config.vacation.ledger_ttl_secs);
    let interval = std::time::Duration::from_secs(config.vacation.cleanup_interval_secs);

    tokio::spawn(async move {
        loop {
            match mailgram_user::vacation::cleanup(&pool, ledger_ttl).await {
                Ok(deleted) => tracing::info!(deleted, "vacation ledger cleanup pass complete"),
                Err(e) => tracing::warn!(error = %e, "vacation ledger cleanup failed"),
            }
            if sleep_or_shutdown(interval, &shutdown).await {
                break;
            }
        }
        tracing::info!("vacation ledger cleanup stopped");
    })
}

/// Sleeps for `interval` unless `shutdown` fires first. Returns `true` if
/// the caller should stop its loop.
async fn sleep_or_shutdown(interval: std::time::Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(interval) => false,
        _ = shutdown.cancelled() => true,
    }
}
