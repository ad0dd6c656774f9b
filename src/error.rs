//! Error types for docbatch.
//!
//! All errors are strongly typed using thiserror. Every error is `Clone` so a
//! single batch outcome can be handed to each task callback in the batch.

use thiserror::Error;

use crate::batch::BatchId;

/// Validation errors raised by a write task before it touches the store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The task has no document or collection to write to.
    #[error("{task} task has no target location")]
    MissingTarget {
        /// Task shape.
        task: &'static str,
    },

    /// The action writes data but the payload is absent.
    #[error("Data to be stored at '{path}' is missing")]
    MissingPayload {
        /// Target path.
        path: String,
    },

    /// A field task without a usable field name.
    #[error("Field name for a task on '{path}' is blank")]
    BlankFieldName {
        /// Target path.
        path: String,
    },

    /// The action cannot be applied to this task shape.
    #[error("Action {action} is not supported by {task} tasks")]
    UnsupportedAction {
        /// Action name.
        action: &'static str,
        /// Task shape.
        task: &'static str,
    },

    /// A collection payload entry that cannot become a child document.
    #[error("Child '{id}' of '{path}' cannot be written: {reason}")]
    InvalidChild {
        /// Collection path.
        path: String,
        /// Payload key of the child.
        id: String,
        /// What is wrong with it.
        reason: String,
    },
}

/// Execution errors raised while committing batches or running tasks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    /// No batch is registered under the id.
    #[error("There is no batch task with id: {id}")]
    BatchNotFound {
        /// Requested batch.
        id: BatchId,
    },

    /// The batch holds no task that can run.
    #[error("Batch {id} is empty")]
    BatchEmpty {
        /// Requested batch.
        id: BatchId,
    },

    /// `commit_all` found nothing to commit.
    #[error("There is no batch task")]
    NoBatches,

    /// The store kept failing until the attempts ran out.
    #[error("Remote write failed after {attempts} attempt(s): {message}")]
    Transient {
        /// Attempts made.
        attempts: u32,
        /// Last store error.
        message: String,
    },

    /// The store could not convert a value; retrying cannot help.
    #[error("Conversion failed: {message}")]
    Conversion {
        /// Store error.
        message: String,
    },

    /// A read against the store failed.
    #[error("Store error: {message}")]
    Store {
        /// Store error.
        message: String,
    },
}

/// Configuration errors: a type or location the engine was never told about.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    /// No location factory for the type.
    #[error("{type_name} is not registered for {kind} locations")]
    NotRegistered {
        /// Requested type.
        type_name: &'static str,
        /// `"document"` or `"collection"`.
        kind: &'static str,
    },

    /// The type's field table was never built.
    #[error("No field cache for: {type_name}")]
    MetadataMissing {
        /// Requested type.
        type_name: &'static str,
    },

    /// The type's field table has no fields.
    #[error("No field contents for: {type_name}")]
    MetadataEmpty {
        /// Requested type.
        type_name: &'static str,
    },

    /// A placeholder has no matching argument.
    #[error("Path template '{template}' needs argument {{{index}}} but only {provided} were given")]
    TemplateArguments {
        /// The template.
        template: String,
        /// Placeholder index.
        index: usize,
        /// Arguments supplied.
        provided: usize,
    },

    /// A malformed document or collection path.
    #[error("Invalid path '{path}': {reason}")]
    InvalidPath {
        /// Offending path.
        path: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The value type cannot be read from a whole document.
    #[error("{type_name} is not a document type")]
    NotADocument {
        /// Value type.
        type_name: &'static str,
    },

    /// Configuration that failed to parse.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Parser message.
        reason: String,
    },

    /// The value has no shape a task can be built from.
    #[error("{type_name} values cannot produce a {task} task")]
    UnsupportedShape {
        /// Value type.
        type_name: &'static str,
        /// Why no task applies.
        task: &'static str,
    },
}

/// Top-level error type for docbatch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DocError {
    /// See [`ValidationError`].
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// See [`ExecutionError`].
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// See [`ConfigurationError`].
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// Broken internal state, such as a poisoned lock.
    #[error("Internal error: {message}")]
    Internal {
        /// Description.
        message: String,
    },
}

impl DocError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is an execution error.
    #[must_use]
    pub const fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    /// Returns true if this is a configuration error.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// Returns true if the same request could succeed when committed again.
    ///
    /// A failed batch stays registered, so a caller may commit the same id
    /// again; this tells it whether that is worth doing.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) | Self::Configuration(_) | Self::Internal { .. } => false,
            Self::Execution(e) => matches!(e, ExecutionError::Transient { .. }),
        }
    }
}

/// Result type alias for docbatch operations.
pub type DocResult<T> = Result<T, DocError>;

/// The explicit success/failure object handed to completion callbacks.
pub type Outcome = DocResult<()>;
