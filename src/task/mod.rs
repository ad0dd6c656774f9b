//! Write tasks.
//!
//! A [`WriteTask`] is one pending write: a target (field, document or
//! collection), a payload, an action and an optional completion callback. Tasks
//! run standalone through [`Coordinator::execute`](crate::Coordinator::execute)
//! or are registered into a batch.

mod action;
mod builders;
mod target;

use std::collections::HashSet;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

pub use action::{TaskAction, TaskState};
pub use builders::{Intent, InField, TaskSource};
pub use target::TaskTarget;

use crate::convert::WireConvert;
use crate::entity::{MappedEntity, WireConvertible};
use crate::error::{DocError, Outcome};
use crate::location::{CollectionRef, DocumentRef};
use crate::storage::WriteOperation;
use crate::value::{compact_map, Value, WireMap};

/// Callback receiving the final outcome of a task or batch.
pub type Completion = Arc<dyn Fn(&Outcome) + Send + Sync>;

/// Wraps a closure as a [`Completion`].
pub fn completion<F>(f: F) -> Completion
where
    F: Fn(&Outcome) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Invokes a callback; a panic inside it is logged and swallowed.
pub(crate) fn notify(callback: &Completion, outcome: &Outcome, context: &str) {
    if catch_unwind(AssertUnwindSafe(|| callback(outcome))).is_err() {
        tracing::error!(target: "docbatch::task", context, "completion callback panicked");
    }
}

/// Process-local task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw id.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// One pending write.
pub struct WriteTask {
    id: TaskId,
    target: TaskTarget,
    action: TaskAction,
    on_complete: Option<Completion>,
    state: TaskState,
}

#[allow(missing_docs)]
impl WriteTask {
    pub(crate) fn new(target: TaskTarget) -> Self {
        Self {
            id: TaskId::next(),
            target,
            action: TaskAction::default(),
            on_complete: None,
            state: TaskState::Created,
        }
    }

    pub(crate) fn field(document: Option<DocumentRef>) -> Self {
        Self::new(TaskTarget::Field {
            document,
            field: None,
            value: None,
        })
    }

    pub(crate) fn document(document: Option<DocumentRef>, data: Option<WireMap>) -> Self {
        Self::new(TaskTarget::Document {
            document,
            data: data.and_then(compact_map),
        })
    }

    pub(crate) fn collection(collection: Option<CollectionRef>, data: Option<WireMap>) -> Self {
        Self::new(TaskTarget::Collection {
            collection,
            data: data.and_then(compact_map),
        })
    }

    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }

    #[must_use]
    pub const fn state(&self) -> TaskState {
        self.state
    }

    #[must_use]
    pub const fn action(&self) -> TaskAction {
        self.action
    }

    #[must_use]
    pub const fn target(&self) -> &TaskTarget {
        &self.target
    }

    /// Shape label: `"field"`, `"document"` or `"collection"`.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        self.target.kind()
    }

    /// Path of the target.
    #[must_use]
    pub fn path(&self) -> String {
        self.target.path()
    }

    #[must_use]
    pub fn with_action(mut self, action: TaskAction) -> Self {
        self.action = action;
        self
    }

    pub fn set_action(&mut self, action: TaskAction) -> &mut Self {
        self.action = action;
        self
    }

    #[must_use]
    pub fn on_complete(mut self, callback: Completion) -> Self {
        self.on_complete = Some(callback);
        self
    }

    pub fn set_on_complete(&mut self, callback: Option<Completion>) -> &mut Self {
        self.on_complete = callback;
        self
    }

    #[must_use]
    pub fn has_callback(&self) -> bool {
        self.on_complete.is_some()
    }

    /// Sets one payload entry.
    ///
    /// For a field task `key` becomes the field name and `value` its value. For
    /// document and collection tasks the entry is added to the payload map.
    /// Null values and empty maps are dropped.
    pub fn set_data(&mut self, key: &str, value: impl Into<Value>) -> &mut Self {
        let value = value.into().compact();
        match &mut self.target {
            TaskTarget::Field { field, value: slot, .. } => {
                *field = Some(key.to_string());
                *slot = value;
            }
            TaskTarget::Document { data, .. } | TaskTarget::Collection { data, .. } => {
                if let Some(value) = value {
                    data.get_or_insert_with(WireMap::new).insert(key.to_string(), value);
                }
            }
        }
        self
    }

    /// Marks a field for removal.
    ///
    /// A field task switches to [`TaskAction::Delete`] on `field`; document and
    /// collection tasks drop `field` from their payload.
    pub fn delete_data(&mut self, field: &str) -> &mut Self {
        match &mut self.target {
            TaskTarget::Field { field: slot, value, .. } => {
                *slot = Some(field.to_string());
                *value = None;
                self.action = TaskAction::Delete;
            }
            TaskTarget::Document { data, .. } | TaskTarget::Collection { data, .. } => {
                if let Some(map) = data.as_mut() {
                    map.remove(field);
                }
                if data.as_ref().is_some_and(WireMap::is_empty) {
                    *data = None;
                }
            }
        }
        self
    }

    /// Uses an entity as the payload.
    ///
    /// A field task takes the entity's identity as its field name and the
    /// entity's nested map as its value; other shapes take the entity's wire map.
    pub fn set_entity<E: MappedEntity>(&mut self, entity: &E) -> &mut Self {
        match &mut self.target {
            TaskTarget::Field { field, value, .. } => {
                *field = entity.identity();
                *value = entity.to_wire().and_then(Value::compact);
            }
            TaskTarget::Document { data, .. } | TaskTarget::Collection { data, .. } => {
                *data = entity.to_wire_format().ok().and_then(compact_map);
            }
        }
        self
    }

    /// Checks the task can run.
    ///
    /// On failure the completion callback is invoked with the error before it
    /// is returned, and the task moves to [`TaskState::Failed`].
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` describing the first problem found.
    pub fn validate(&mut self) -> Outcome {
        match self.target.validate(self.action) {
            Ok(()) => {
                self.state = TaskState::Validated;
                Ok(())
            }
            Err(err) => {
                let outcome: Outcome = Err(DocError::from(err));
                tracing::error!(
                    target: "docbatch::task",
                    task = %self.id,
                    kind = self.kind(),
                    action = %self.action,
                    path = %self.path(),
                    error = ?outcome,
                    "task validation failed"
                );
                self.state = TaskState::Failed;
                if let Some(callback) = &self.on_complete {
                    notify(callback, &outcome, "validation");
                }
                outcome
            }
        }
    }

    /// Normalizes the payload and returns the store operations of the task.
    pub(crate) fn begin(&mut self) -> Vec<WriteOperation> {
        self.target.prepare();
        self.state = TaskState::Executing;
        self.target.operations(self.action)
    }

    /// Records the outcome and invokes the completion callback.
    pub(crate) fn finish(&mut self, outcome: &Outcome) {
        self.state = if outcome.is_ok() {
            TaskState::Succeeded
        } else {
            TaskState::Failed
        };
        if let Some(callback) = &self.on_complete {
            notify(callback, outcome, "task");
        }
    }
}

impl fmt::Debug for WriteTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteTask")
            .field("id", &self.id)
            .field("target", &self.target)
            .field("action", &self.action)
            .field("state", &self.state)
            .field("has_callback", &self.on_complete.is_some())
            .finish()
    }
}

/// Ids of tasks created but not yet committed or discarded.
#[derive(Debug, Default)]
pub struct PendingTasks {
    ids: Mutex<HashSet<TaskId>>,
}

#[allow(missing_docs)]
impl PendingTasks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn track(&self, task: WriteTask) -> WriteTask {
        self.ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(task.id);
        task
    }

    pub(crate) fn release(&self, id: TaskId) {
        self.ids.lock().unwrap_or_else(PoisonError::into_inner).remove(&id);
    }

    #[must_use]
    pub fn contains(&self, id: TaskId) -> bool {
        self.ids.lock().unwrap_or_else(PoisonError::into_inner).contains(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
