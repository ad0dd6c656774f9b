//! Write actions and task lifecycle states.

use std::fmt;

use serde::{Deserialize, Serialize};

/// What a write task does to its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskAction {
    /// Merge the payload into the target, creating it if missing.
    #[default]
    MergeAll,
    /// Replace the target with the payload.
    Overwrite,
    /// Update fields of an existing target.
    Update,
    /// Remove the target.
    Delete,
    /// Write every payload entry as a child document (collection tasks only).
    AddDocuments,
}

impl TaskAction {
    /// Lowercase name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MergeAll => "merge_all",
            Self::Overwrite => "overwrite",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::AddDocuments => "add_documents",
        }
    }

    /// True if the action writes a payload.
    #[must_use]
    pub const fn needs_payload(self) -> bool {
        !matches!(self, Self::Delete)
    }
}

impl fmt::Display for TaskAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a write task.
///
/// `Created → Validated → Executing → Succeeded | Failed`; a task that fails
/// validation goes straight to `Failed`.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TaskState {
    #[default]
    Created,
    Validated,
    Executing,
    Succeeded,
    Failed,
}

impl TaskState {
    /// True once the task has finished, either way.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}
