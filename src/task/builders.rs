//! Task builders: turn entities and collections into write tasks.
//!
//! The shape of the task follows the value: a located entity becomes a
//! document task, an entity stored inside another document's field becomes a
//! field task ([`InField`]), and a keyed collection becomes a document or
//! collection task depending on where it was loaded from.

use crate::batch::{BatchId, Coordinator};
use crate::entity::{Located, MappedEntity, WireConvertible};
use crate::error::DocResult;
use crate::location::DocumentRef;
use crate::task::{Completion, TaskAction, WriteTask};

/// Whether a built task writes the value or removes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intent {
    /// Write the current value.
    Merge,
    /// Delete it.
    Remove,
}

/// A value that knows how to become a write task.
pub trait TaskSource {
    /// Builds the task for `intent`.
    ///
    /// `args` feed the location resolver when the value has no cached location.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigurationError` when the location cannot be resolved or
    /// the value cannot be converted.
    fn build_task(&self, coordinator: &Coordinator, intent: Intent, args: &[&str]) -> DocResult<WriteTask>;
}

impl<E: MappedEntity + Located> TaskSource for E {
    fn build_task(&self, coordinator: &Coordinator, intent: Intent, args: &[&str]) -> DocResult<WriteTask> {
        let document = self.location(coordinator.resolver(), args)?;
        Ok(match intent {
            Intent::Merge => {
                let data = self.to_wire_format()?;
                coordinator.document_task(document, Some(data))
            }
            Intent::Remove => coordinator
                .document_task(document, None)
                .with_action(TaskAction::Delete),
        })
    }
}

/// An entity stored as one field of another document, under its identity.
#[derive(Debug)]
pub struct InField<'a, E> {
    entity: &'a E,
    document: DocumentRef,
}

impl<'a, E: MappedEntity> InField<'a, E> {
    /// Field task source writing `entity` into `document`.
    #[must_use]
    pub const fn new(entity: &'a E, document: DocumentRef) -> Self {
        Self { entity, document }
    }
}

impl<E: MappedEntity> TaskSource for InField<'_, E> {
    fn build_task(&self, coordinator: &Coordinator, intent: Intent, _args: &[&str]) -> DocResult<WriteTask> {
        let mut task = coordinator.field_task(self.document.clone());
        match intent {
            Intent::Merge => {
                task.set_entity(self.entity);
            }
            Intent::Remove => {
                let field = self.entity.identity().unwrap_or_default();
                task.delete_data(&field);
            }
        }
        Ok(task)
    }
}

impl Coordinator {
    /// Task that merges `source` into its location.
    ///
    /// # Errors
    ///
    /// See [`TaskSource::build_task`].
    pub fn merge_task<S: TaskSource + ?Sized>(&self, source: &S, args: &[&str]) -> DocResult<WriteTask> {
        source.build_task(self, Intent::Merge, args)
    }

    /// Task that removes `source` from its location.
    ///
    /// # Errors
    ///
    /// See [`TaskSource::build_task`].
    pub fn remove_task<S: TaskSource + ?Sized>(&self, source: &S, args: &[&str]) -> DocResult<WriteTask> {
        source.build_task(self, Intent::Remove, args)
    }

    /// Builds a merge task and registers it into `batch`.
    ///
    /// # Errors
    ///
    /// See [`TaskSource::build_task`] and [`Coordinator::register`].
    pub fn merge_batch<S: TaskSource + ?Sized>(
        &self,
        source: &S,
        batch: Option<BatchId>,
        callback: Option<Completion>,
        args: &[&str],
    ) -> DocResult<BatchId> {
        let task = self.merge_task(source, args)?;
        self.register(task, batch, callback)
    }

    /// Builds a removal task and registers it into `batch`.
    ///
    /// # Errors
    ///
    /// See [`TaskSource::build_task`] and [`Coordinator::register`].
    pub fn delete_batch<S: TaskSource + ?Sized>(
        &self,
        source: &S,
        batch: Option<BatchId>,
        callback: Option<Completion>,
        args: &[&str],
    ) -> DocResult<BatchId> {
        let task = self.remove_task(source, args)?;
        self.register(task, batch, callback)
    }
}
