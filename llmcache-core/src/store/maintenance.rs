//! Background maintenance for the persistent store.
//!
//! Two long-lived tasks per store:
//! - sweep: periodic purge of expired rows (and deferred hit flushes)
//! - size check: drains a bounded queue fed by `set`; a burst of writes
//!   coalesces into a single pending check
//!
//! Failures are logged and never reach request-path callers.

use super::PersistentStore;
use crate::core::error::{CacheError, Result};
use crate::core::types::HitCountPolicy;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Owns the maintenance tasks of one store
pub struct MaintenanceHandle {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    store: PersistentStore,
    /// Identifies this handle's slot in the store's size-check queue
    size_check: mpsc::Sender<()>,
}

impl PersistentStore {
    /// Start the sweep and size-check tasks.
    ///
    /// Must be called from within a tokio runtime. Only one set of
    /// maintenance tasks may run per store.
    pub fn start_maintenance(&self) -> Result<MaintenanceHandle> {
        let (tx, rx) = {
            let mut slot = self.size_check.lock();
            if slot.is_some() {
                return Err(CacheError::MaintenanceRunning);
            }
            let (tx, rx) = mpsc::channel(1);
            *slot = Some(tx.clone());
            (tx, rx)
        };

        let cancel = CancellationToken::new();
        let tasks = vec![
            tokio::spawn(sweep_loop(self.clone(), cancel.clone())),
            tokio::spawn(size_check_loop(self.clone(), rx, cancel.clone())),
        ];

        info!(
            "Started cache maintenance (sweep every {:?}, size bound {:?})",
            self.config.sweep_interval(),
            self.config.max_size_bytes
        );

        Ok(MaintenanceHandle {
            cancel,
            tasks,
            store: self.clone(),
            size_check: tx,
        })
    }
}

impl MaintenanceHandle {
    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && self.tasks.iter().any(|task| !task.is_finished())
    }

    /// Stop both tasks, wait for them, then flush deferred hit counts
    pub async fn shutdown(mut self) {
        self.stop();
        for task in std::mem::take(&mut self.tasks) {
            if let Err(e) = task.await {
                warn!("Maintenance task ended abnormally: {}", e);
            }
        }
        if let Err(e) = self.store.flush_hits().await {
            warn!("Final hit-count flush failed: {}", e);
        }
        info!("Stopped cache maintenance");
    }

    /// Idempotent; leaves a slot installed by a later start untouched
    fn stop(&self) {
        self.cancel.cancel();
        let mut slot = self.store.size_check.lock();
        if slot
            .as_ref()
            .is_some_and(|tx| tx.same_channel(&self.size_check))
        {
            slot.take();
        }
    }
}

impl Drop for MaintenanceHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn sweep_loop(store: PersistentStore, cancel: CancellationToken) {
    let mut sweep = tokio::time::interval(store.config.sweep_interval());
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut flush = tokio::time::interval(store.config.hit_flush_interval());
    flush.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let deferred = store.config.hit_count_policy == HitCountPolicy::Deferred;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sweep.tick() => {
                if let Err(e) = store.purge_expired().await {
                    warn!("Expired-entry sweep failed: {}", e);
                }
            }
            _ = flush.tick(), if deferred => {
                if let Err(e) = store.flush_hits().await {
                    warn!("Deferred hit-count flush failed: {}", e);
                }
            }
        }
    }

    debug!("Sweep task stopped");
}

async fn size_check_loop(
    store: PersistentStore,
    mut rx: mpsc::Receiver<()>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            request = rx.recv() => {
                if request.is_none() {
                    break;
                }
                if let Err(e) = store.enforce_size_limit().await {
                    warn!("Size-check eviction failed: {}", e);
                }
            }
        }
    }

    debug!("Size-check task stopped");
}
