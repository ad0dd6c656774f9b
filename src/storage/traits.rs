//! Abstract remote document store contract.
//!
//! The engine never talks to a concrete store client; it talks to a
//! [`DocumentStore`]. A real backend adapts its SDK to this trait, tests and
//! embedded use go through the in-memory backend.

use async_trait::async_trait;
use thiserror::Error;

use crate::location::{CollectionRef, DocumentRef};
use crate::value::{Value, WireMap};

/// Message prefix store clients use when a value has no wire converter.
///
/// Failures carrying it are never retried.
pub const CONVERTER_SIGNATURE: &str = "Unable to create converter";

/// Errors a document store reports.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Document not found (update of a missing document).
    #[error("Document not found: {0}")]
    NotFound(String),

    /// The store could not be reached or refused the request for now.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A value could not be converted to the store's format.
    #[error("Conversion error: {0}")]
    Conversion(String),

    /// Backend error.
    #[error("Store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// True for failures a retry cannot fix.
    #[must_use]
    pub fn is_unrecoverable(&self) -> bool {
        match self {
            Self::Conversion(_) => true,
            Self::NotFound(message) | Self::Unavailable(message) | Self::Backend(message) => {
                message.contains(CONVERTER_SIGNATURE)
            }
        }
    }
}

/// A fetched document.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSnapshot {
    /// Where the document lives.
    pub reference: DocumentRef,
    /// Its fields.
    pub data: WireMap,
}

impl DocumentSnapshot {
    /// Document id (last path segment).
    #[must_use]
    pub fn id(&self) -> &str {
        self.reference.id()
    }
}

/// One write against the store.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOperation {
    /// Writes `data`; merged into the existing document when `merge` is set,
    /// replacing it otherwise. Creates the document if missing.
    Set {
        /// Target document.
        document: DocumentRef,
        /// Fields to write.
        data: WireMap,
        /// Merge instead of replace.
        merge: bool,
    },
    /// Updates fields of an existing document.
    Update {
        /// Target document.
        document: DocumentRef,
        /// Fields to update.
        data: WireMap,
    },
    /// Removes one field of an existing document.
    DeleteField {
        /// Target document.
        document: DocumentRef,
        /// Wire name of the field.
        field: String,
    },
    /// Removes the document.
    Delete {
        /// Target document.
        document: DocumentRef,
    },
}

impl WriteOperation {
    /// Target document.
    #[must_use]
    pub const fn document(&self) -> &DocumentRef {
        match self {
            Self::Set { document, .. }
            | Self::Update { document, .. }
            | Self::DeleteField { document, .. }
            | Self::Delete { document } => document,
        }
    }

    /// Short label of the operation.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Set { merge: true, .. } => "merge",
            Self::Set { merge: false, .. } => "set",
            Self::Update { .. } => "update",
            Self::DeleteField { .. } => "delete_field",
            Self::Delete { .. } => "delete",
        }
    }
}

/// Remote document store client.
///
/// # Safety Considerations
/// - `commit` must be atomic: all operations apply, or none do
/// - Implementations must be safe to call from many tasks at once
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Reads one document; `None` if it does not exist.
    async fn get_document(&self, document: &DocumentRef) -> Result<Option<DocumentSnapshot>, StoreError>;

    /// Reads every direct child document of a collection.
    async fn list_documents(&self, collection: &CollectionRef) -> Result<Vec<DocumentSnapshot>, StoreError>;

    /// Child documents whose `field` equals `value`.
    async fn query_equal(
        &self,
        collection: &CollectionRef,
        field: &str,
        value: &Value,
    ) -> Result<Vec<DocumentSnapshot>, StoreError>;

    /// Applies every operation atomically.
    async fn commit(&self, operations: Vec<WriteOperation>) -> Result<(), StoreError>;

    /// Applies a single operation.
    async fn apply(&self, operation: WriteOperation) -> Result<(), StoreError> {
        self.commit(vec![operation]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unrecoverable_detection() {
        assert!(StoreError::Conversion("bad".to_string()).is_unrecoverable());
        assert!(StoreError::Backend("Unable to create converter for type Color".to_string()).is_unrecoverable());
        assert!(!StoreError::Unavailable("deadline exceeded".to_string()).is_unrecoverable());
        assert!(!StoreError::NotFound("users/alice".to_string()).is_unrecoverable());
    }

    #[test]
    fn test_operation_kind_and_target() {
        let document = DocumentRef::new("users/alice").unwrap();
        let op = WriteOperation::Set {
            document: document.clone(),
            data: WireMap::new(),
            merge: true,
        };
        assert_eq!(op.kind(), "merge");
        assert_eq!(op.document(), &document);
        assert_eq!(WriteOperation::Delete { document }.kind(), "delete");
    }
}
