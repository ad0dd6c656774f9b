//! Synced field values.
//!
//! A [`SyncedField`] holds one value that mirrors a field of a document.
//! Setting a new value writes it through to the store with a standalone,
//! fire-and-forget merge.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use crate::batch::Coordinator;
use crate::convert::WireConvert;
use crate::location::DocumentRef;
use crate::task::TaskAction;

struct Binding {
    coordinator: Arc<Coordinator>,
    document: DocumentRef,
    field: String,
}

/// A value bound to `(document, field)`.
pub struct SyncedField<T> {
    binding: Option<Binding>,
    value: Mutex<T>,
}

impl<T> SyncedField<T>
where
    T: WireConvert + Clone + PartialEq,
{
    /// A value that is not bound to any document; `set` only updates it locally.
    pub fn unbound(value: T) -> Self {
        Self {
            binding: None,
            value: Mutex::new(value),
        }
    }

    /// A value mirroring `field` of `document`.
    pub fn bound(coordinator: Arc<Coordinator>, document: DocumentRef, field: impl Into<String>, value: T) -> Self {
        Self {
            binding: Some(Binding {
                coordinator,
                document,
                field: field.into(),
            }),
            value: Mutex::new(value),
        }
    }

    /// Current value.
    pub fn get(&self) -> T {
        self.value.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Sets the value; returns true if a write was dispatched.
    ///
    /// Setting an equal value does nothing. A bound field dispatches a detached
    /// merge of the new value, so this must run inside a tokio runtime for the
    /// write to happen.
    pub fn set(&self, value: T) -> bool {
        {
            let mut current = self.value.lock().unwrap_or_else(PoisonError::into_inner);
            if *current == value {
                return false;
            }
            *current = value.clone();
        }

        let Some(binding) = &self.binding else {
            return false;
        };
        let Some(wire) = value.to_wire() else {
            tracing::debug!(target: "docbatch::task", field = %binding.field, "synced value is absent; nothing written");
            return false;
        };
        let mut task = binding.coordinator.field_task(binding.document.clone());
        task.set_data(&binding.field, wire).set_action(TaskAction::MergeAll);
        binding.coordinator.execute_detached(task, None);
        true
    }

    /// True when writes go through to a document.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        self.binding.is_some()
    }
}

impl<T: fmt::Debug> fmt::Debug for SyncedField<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = self.value.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("SyncedField")
            .field("document", &self.binding.as_ref().map(|b| b.document.path()))
            .field("field", &self.binding.as_ref().map(|b| b.field.as_str()))
            .field("value", &*value)
            .finish()
    }
}
