//! Debounced batch commits.
//!
//! Each trigger restarts the batch's quiet-period timer. Only the last timer
//! to run out commits; a superseded timer exits without committing and without
//! reporting anything.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::batch::{BatchId, Coordinator};
use crate::config::DebounceConfig;
use crate::error::{DocError, DocResult};
use crate::task::WriteTask;

fn lock_err(context: &'static str) -> DocError {
    DocError::internal(format!("poisoned lock: {context}"))
}

struct Timer {
    generation: u64,
    cancel: oneshot::Sender<()>,
}

type Timers = Arc<Mutex<HashMap<BatchId, Timer>>>;

/// Coalesces bursts of writes into one batch commit.
pub struct Debouncer {
    coordinator: Arc<Coordinator>,
    config: DebounceConfig,
    timers: Timers,
    generation: AtomicU64,
}

impl Debouncer {
    /// Debouncer with the default quiet period.
    #[must_use]
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self::with_config(coordinator, DebounceConfig::default())
    }

    /// Debouncer with an explicit quiet period.
    #[must_use]
    pub fn with_config(coordinator: Arc<Coordinator>, config: DebounceConfig) -> Self {
        Self {
            coordinator,
            config,
            timers: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }

    /// Coordinator that performs the commits.
    #[must_use]
    pub const fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// Registers `task` into `batch` and restarts the batch's timer.
    ///
    /// `quiet_period` defaults to the configured one. Must be called from
    /// within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `DocError::Internal` if a registry lock is poisoned.
    pub fn debounce(&self, task: WriteTask, batch: BatchId, quiet_period: Option<Duration>) -> DocResult<()> {
        self.coordinator.register(task, Some(batch), None)?;
        self.trigger(batch, quiet_period)
    }

    /// Restarts the batch's timer without adding a task.
    ///
    /// # Errors
    ///
    /// Returns `DocError::Internal` if the timer table lock is poisoned or there
    /// is no tokio runtime.
    pub fn trigger(&self, batch: BatchId, quiet_period: Option<Duration>) -> DocResult<()> {
        let handle = tokio::runtime::Handle::try_current().map_err(|e| DocError::internal(e.to_string()))?;
        let quiet_period = quiet_period.unwrap_or_else(|| self.config.quiet_period());
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let (cancel, cancelled) = oneshot::channel();

        {
            let mut timers = self.timers.lock().map_err(|_| lock_err("debounce.trigger"))?;
            if let Some(previous) = timers.insert(batch, Timer { generation, cancel }) {
                let _ = previous.cancel.send(());
            }
        }
        tracing::debug!(
            target: "docbatch::debounce",
            batch_id = %batch,
            quiet_ms = u64::try_from(quiet_period.as_millis()).unwrap_or(u64::MAX),
            "debounce timer restarted"
        );

        let coordinator = Arc::clone(&self.coordinator);
        let timers = Arc::clone(&self.timers);
        handle.spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(quiet_period) => {}
                _ = cancelled => {
                    tracing::trace!(target: "docbatch::debounce", batch_id = %batch, "debounce timer superseded");
                    return;
                }
            }

            let outcome = coordinator.commit_batch(batch, None).await;
            match outcome {
                Ok(()) => clear_timer(&timers, batch, generation),
                Err(err) => {
                    tracing::warn!(target: "docbatch::debounce", batch_id = %batch, error = %err, "debounced commit failed");
                }
            }
        });
        Ok(())
    }

    /// Number of batches with a live timer entry.
    #[must_use]
    pub fn active_timers(&self) -> usize {
        self.timers.lock().map(|t| t.len()).unwrap_or_default()
    }
}

fn clear_timer(timers: &Mutex<HashMap<BatchId, Timer>>, batch: BatchId, generation: u64) {
    if let Ok(mut timers) = timers.lock() {
        if timers.get(&batch).is_some_and(|t| t.generation == generation) {
            timers.remove(&batch);
        }
    }
}

impl fmt::Debug for Debouncer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Debouncer")
            .field("config", &self.config)
            .field("active_timers", &self.active_timers())
            .finish_non_exhaustive()
    }
}
