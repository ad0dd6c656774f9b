//! Batch coordinator.
//!
//! The [`Coordinator`] owns the pending-task set and the batch table. Tasks are
//! registered into batches by id; committing a batch validates its tasks, turns
//! them into one atomic operation list and writes it with a fixed retry policy.
//!
//! Commits of the same batch id are single-flight: a per-batch async gate
//! serializes them. Different batches commit concurrently.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Mutex as AsyncMutex;

use crate::collection::FetchGates;
use crate::config::BatchConfig;
use crate::error::{DocError, DocResult, ExecutionError, Outcome};
use crate::location::{CollectionRef, DocumentRef, LocationResolver};
use crate::storage::{DocumentStore, StoreError, WriteOperation};
use crate::task::{notify, Completion, PendingTasks, WriteTask};
use crate::value::WireMap;

fn lock_err(context: &'static str) -> DocError {
    DocError::internal(format!("poisoned lock: {context}"))
}

/// Identifier of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchId(u64);

impl BatchId {
    /// Wraps a raw batch id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw id.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for BatchId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

#[derive(Debug, Default)]
struct Batch {
    tasks: Vec<WriteTask>,
    info: Vec<String>,
}

/// Registers write tasks into batches and commits them.
pub struct Coordinator {
    store: Arc<dyn DocumentStore>,
    resolver: Arc<LocationResolver>,
    config: BatchConfig,
    pending: PendingTasks,
    batches: Mutex<HashMap<BatchId, Batch>>,
    gates: Mutex<HashMap<BatchId, Arc<AsyncMutex<()>>>>,
    fetch_gates: FetchGates,
    next_batch: AtomicU64,
}

impl Coordinator {
    /// Coordinator with an empty resolver and the default retry policy.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self::with_config(store, Arc::new(LocationResolver::new()), BatchConfig::default())
    }

    /// Coordinator with an explicit resolver and retry policy.
    #[must_use]
    pub fn with_config(store: Arc<dyn DocumentStore>, resolver: Arc<LocationResolver>, config: BatchConfig) -> Self {
        Self {
            store,
            resolver,
            config,
            pending: PendingTasks::new(),
            batches: Mutex::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
            fetch_gates: FetchGates::new(),
            next_batch: AtomicU64::new(1),
        }
    }

    /// Backing store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Location factories used by task builders.
    #[must_use]
    pub fn resolver(&self) -> &LocationResolver {
        &self.resolver
    }

    /// Retry policy.
    #[must_use]
    pub const fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Gates for [`KeyedCollection::create`](crate::KeyedCollection::create)
    /// reads against this coordinator's store.
    #[must_use]
    pub const fn fetch_gates(&self) -> &FetchGates {
        &self.fetch_gates
    }

    /// Tasks created through this coordinator and not yet committed or discarded.
    #[must_use]
    pub const fn pending(&self) -> &PendingTasks {
        &self.pending
    }

    /// New field task on `document`.
    pub fn field_task(&self, document: impl Into<Option<DocumentRef>>) -> WriteTask {
        self.pending.track(WriteTask::field(document.into()))
    }

    /// New document task; the payload is compacted.
    pub fn document_task(&self, document: impl Into<Option<DocumentRef>>, data: Option<WireMap>) -> WriteTask {
        self.pending.track(WriteTask::document(document.into(), data))
    }

    /// New collection task; the payload maps child id to child fields.
    pub fn collection_task(&self, collection: impl Into<Option<CollectionRef>>, data: Option<WireMap>) -> WriteTask {
        self.pending.track(WriteTask::collection(collection.into(), data))
    }

    /// Drops a task that will never run.
    pub fn discard(&self, task: WriteTask) {
        self.pending.release(task.id());
    }

    /// Adds `task` to a batch and returns the batch id.
    ///
    /// `None` allocates a fresh id. A callback given here replaces the task's own.
    ///
    /// # Errors
    ///
    /// Returns `DocError::Internal` if the batch table lock is poisoned.
    pub fn register(&self, mut task: WriteTask, batch: Option<BatchId>, callback: Option<Completion>) -> DocResult<BatchId> {
        if callback.is_some() {
            task.set_on_complete(callback);
        }
        let mut batches = self.batches.lock().map_err(|_| lock_err("batch.register"))?;
        let id = match batch {
            Some(id) => id,
            None => loop {
                let candidate = BatchId(self.next_batch.fetch_add(1, Ordering::Relaxed));
                if !batches.contains_key(&candidate) {
                    break candidate;
                }
            },
        };
        tracing::info!(
            target: "docbatch::batch",
            batch_id = %id,
            task = %task.id(),
            kind = task.kind(),
            path = %task.path(),
            "task added to batch"
        );
        batches.entry(id).or_default().tasks.push(task);
        Ok(id)
    }

    /// Ids of every registered batch, ascending.
    ///
    /// # Errors
    ///
    /// Returns `DocError::Internal` if the batch table lock is poisoned.
    pub fn batch_ids(&self) -> DocResult<Vec<BatchId>> {
        let batches = self.batches.lock().map_err(|_| lock_err("batch.ids"))?;
        let mut ids: Vec<_> = batches.keys().copied().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    /// Number of tasks waiting in a batch; `None` if the batch is not registered.
    #[must_use]
    pub fn batch_len(&self, id: BatchId) -> Option<usize> {
        self.batches.lock().ok()?.get(&id).map(|b| b.tasks.len())
    }

    /// Paths touched by the batch's in-flight commit.
    #[must_use]
    pub fn batch_info(&self, id: BatchId) -> Option<Vec<String>> {
        self.batches.lock().ok()?.get(&id).map(|b| b.info.clone())
    }

    /// Commits one batch.
    ///
    /// Invalid tasks are pruned (their callbacks see the validation error), the
    /// rest are written as one atomic commit, retried per [`BatchConfig`]. Every
    /// committed task's callback receives the batch outcome, then `on_complete`
    /// does. On success the batch is removed; on failure it stays registered.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError::BatchNotFound`/`BatchEmpty` without touching the
    /// store, `ExecutionError::Conversion` for unrecoverable store failures and
    /// `ExecutionError::Transient` once the attempts are exhausted.
    pub async fn commit_batch(&self, id: BatchId, on_complete: Option<Completion>) -> Outcome {
        let gate = match self.gate(id) {
            Ok(gate) => gate,
            Err(err) => return finish_batch(on_complete.as_ref(), Err(err)),
        };
        let outcome = {
            let _single_flight = gate.lock().await;
            self.commit_locked(id, on_complete.as_ref()).await
        };
        self.release_gate(id, &gate);
        outcome
    }

    /// Fire-and-forget [`commit_batch`](Self::commit_batch).
    ///
    /// Must be called from within a tokio runtime; the outcome is observable
    /// only through the callbacks.
    pub fn commit_batch_detached(self: &Arc<Self>, id: BatchId, on_complete: Option<Completion>) {
        let coordinator = Arc::clone(self);
        spawn_detached("commit_batch", async move {
            let _ = coordinator.commit_batch(id, on_complete).await;
        });
    }

    /// Commits every registered batch, one after another and independently.
    ///
    /// `on_complete` runs once per batch.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError::NoBatches` if nothing is registered.
    pub async fn commit_all(&self, on_complete: Option<Completion>) -> DocResult<Vec<(BatchId, Outcome)>> {
        let ids = self.batch_ids()?;
        if ids.is_empty() {
            tracing::warn!(target: "docbatch::batch", "there is no batch task");
            return Err(ExecutionError::NoBatches.into());
        }
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            let outcome = self.commit_batch(id, on_complete.clone()).await;
            results.push((id, outcome));
        }
        Ok(results)
    }

    /// Fire-and-forget [`commit_all`](Self::commit_all).
    pub fn commit_all_detached(self: &Arc<Self>, on_complete: Option<Completion>) {
        let coordinator = Arc::clone(self);
        spawn_detached("commit_all", async move {
            let _ = coordinator.commit_all(on_complete).await;
        });
    }

    /// Runs one task on its own, outside any batch.
    ///
    /// Operations are applied one by one; a retry resumes at the operation that
    /// failed. The task's callback (or `callback`, if given) fires once.
    ///
    /// # Errors
    ///
    /// Returns the validation error, or the same execution errors as
    /// [`commit_batch`](Self::commit_batch).
    pub async fn execute(&self, mut task: WriteTask, callback: Option<Completion>) -> Outcome {
        if callback.is_some() {
            task.set_on_complete(callback);
        }
        if let Err(err) = task.validate() {
            self.pending.release(task.id());
            return Err(err);
        }
        let operations = task.begin();
        let outcome = self.apply_with_retry(&task, &operations).await;
        task.finish(&outcome);
        self.pending.release(task.id());
        outcome
    }

    /// Fire-and-forget [`execute`](Self::execute).
    pub fn execute_detached(self: &Arc<Self>, task: WriteTask, callback: Option<Completion>) {
        let coordinator = Arc::clone(self);
        spawn_detached("execute", async move {
            let _ = coordinator.execute(task, callback).await;
        });
    }

    async fn commit_locked(&self, id: BatchId, on_complete: Option<&Completion>) -> Outcome {
        let tasks = match self.take_tasks(id) {
            Ok(tasks) => tasks,
            Err(err) => {
                tracing::warn!(target: "docbatch::batch", batch_id = %id, error = %err, "batch commit skipped");
                return finish_batch(on_complete, Err(err));
            }
        };

        let mut valid = Vec::with_capacity(tasks.len());
        for mut task in tasks {
            if task.validate().is_ok() {
                valid.push(task);
            } else {
                self.pending.release(task.id());
            }
        }
        if valid.is_empty() {
            self.drop_if_empty(id);
            return finish_batch(on_complete, Err(ExecutionError::BatchEmpty { id }.into()));
        }

        let operations: Vec<WriteOperation> = valid.iter_mut().flat_map(WriteTask::begin).collect();
        self.set_info(id, affected_paths(&valid));
        tracing::info!(
            target: "docbatch::batch",
            batch_id = %id,
            tasks = valid.len(),
            operations = operations.len(),
            "committing batch"
        );

        let outcome = self.commit_with_retry(id, operations).await;

        for task in &mut valid {
            task.finish(&outcome);
        }
        let outcome = finish_batch(on_complete, outcome);
        self.settle(id, valid, &outcome);
        outcome
    }

    async fn commit_with_retry(&self, id: BatchId, operations: Vec<WriteOperation>) -> Outcome {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.store.commit(operations.clone()).await {
                Ok(()) => {
                    tracing::info!(target: "docbatch::batch", batch_id = %id, attempt, "batch committed");
                    return Ok(());
                }
                Err(err) => {
                    if let Some(failure) = self.give_up(&err, attempt) {
                        tracing::error!(target: "docbatch::batch", batch_id = %id, attempt, error = %err, "batch commit failed");
                        return Err(failure);
                    }
                    tracing::warn!(target: "docbatch::batch", batch_id = %id, attempt, error = %err, "batch commit failed; retrying");
                    tokio::time::sleep(self.config.retry_delay()).await;
                }
            }
        }
    }

    async fn apply_with_retry(&self, task: &WriteTask, operations: &[WriteOperation]) -> Outcome {
        let mut next = 0;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut failure = None;
            while let Some(operation) = operations.get(next) {
                if let Err(err) = self.store.apply(operation.clone()).await {
                    failure = Some(err);
                    break;
                }
                next += 1;
            }
            let Some(err) = failure else {
                tracing::info!(target: "docbatch::task", task = %task.id(), path = %task.path(), attempt, "task executed");
                return Ok(());
            };
            if let Some(failure) = self.give_up(&err, attempt) {
                tracing::error!(target: "docbatch::task", task = %task.id(), path = %task.path(), attempt, error = %err, "task failed");
                return Err(failure);
            }
            tracing::warn!(target: "docbatch::task", task = %task.id(), attempt, error = %err, "task failed; retrying");
            tokio::time::sleep(self.config.retry_delay()).await;
        }
    }

    /// Final error for a failed attempt, or `None` if another attempt is allowed.
    fn give_up(&self, err: &StoreError, attempt: u32) -> Option<DocError> {
        if err.is_unrecoverable() {
            return Some(
                ExecutionError::Conversion {
                    message: err.to_string(),
                }
                .into(),
            );
        }
        if attempt >= self.config.attempts() {
            return Some(
                ExecutionError::Transient {
                    attempts: attempt,
                    message: err.to_string(),
                }
                .into(),
            );
        }
        None
    }

    fn take_tasks(&self, id: BatchId) -> DocResult<Vec<WriteTask>> {
        let mut batches = self.batches.lock().map_err(|_| lock_err("batch.take"))?;
        let batch = batches.get_mut(&id).ok_or(ExecutionError::BatchNotFound { id })?;
        if batch.tasks.is_empty() {
            return Err(ExecutionError::BatchEmpty { id }.into());
        }
        Ok(std::mem::take(&mut batch.tasks))
    }

    fn set_info(&self, id: BatchId, paths: Vec<String>) {
        if let Ok(mut batches) = self.batches.lock() {
            batches.entry(id).or_default().info = paths;
        }
    }

    fn drop_if_empty(&self, id: BatchId) {
        if let Ok(mut batches) = self.batches.lock() {
            if batches.get(&id).is_some_and(|b| b.tasks.is_empty()) {
                batches.remove(&id);
            }
        }
    }

    /// Bookkeeping after the callbacks ran: committed tasks leave, failed ones
    /// go back to the front of the batch.
    fn settle(&self, id: BatchId, mut committed: Vec<WriteTask>, outcome: &Outcome) {
        let Ok(mut batches) = self.batches.lock() else {
            tracing::error!(target: "docbatch::batch", batch_id = %id, "batch table lock poisoned");
            return;
        };
        if outcome.is_ok() {
            for task in &committed {
                self.pending.release(task.id());
            }
            match batches.get_mut(&id) {
                Some(batch) if batch.tasks.is_empty() => {
                    batches.remove(&id);
                }
                Some(batch) => batch.info.clear(),
                None => {}
            }
            return;
        }

        let batch = batches.entry(id).or_default();
        tracing::error!(
            target: "docbatch::batch",
            batch_id = %id,
            paths = ?batch.info,
            "batch left registered after failure"
        );
        batch.info.clear();
        committed.append(&mut batch.tasks);
        batch.tasks = committed;
    }

    fn gate(&self, id: BatchId) -> DocResult<Arc<AsyncMutex<()>>> {
        let mut gates = self.gates.lock().map_err(|_| lock_err("batch.gate"))?;
        Ok(Arc::clone(gates.entry(id).or_default()))
    }

    fn release_gate(&self, id: BatchId, gate: &Arc<AsyncMutex<()>>) {
        let registered = self.batches.lock().map_or(true, |b| b.contains_key(&id));
        if registered {
            return;
        }
        if let Ok(mut gates) = self.gates.lock() {
            // The map and the caller hold the only references: nobody is waiting.
            if Arc::strong_count(gate) <= 2 {
                gates.remove(&id);
            }
        }
    }
}

impl fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let batches = self.batches.lock().map(|b| b.len()).unwrap_or_default();
        f.debug_struct("Coordinator")
            .field("config", &self.config)
            .field("pending", &self.pending.len())
            .field("batches", &batches)
            .finish_non_exhaustive()
    }
}

/// Distinct task paths, sorted.
fn affected_paths(tasks: &[WriteTask]) -> Vec<String> {
    tasks.iter().map(WriteTask::path).collect::<BTreeSet<_>>().into_iter().collect()
}

fn finish_batch(on_complete: Option<&Completion>, outcome: Outcome) -> Outcome {
    if let Some(callback) = on_complete {
        notify(callback, &outcome, "batch");
    }
    outcome
}

fn spawn_detached<F>(operation: &'static str, future: F)
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(future);
        }
        Err(err) => {
            tracing::error!(target: "docbatch::batch", operation, error = %err, "no async runtime; operation dropped");
        }
    }
}
