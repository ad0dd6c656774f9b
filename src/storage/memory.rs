//! In-memory document store.
//!
//! Thread-safe reference implementation of [`DocumentStore`], intended for
//! embedded usage and tests. Failures can be injected ahead of commits and
//! every applied commit is recorded.

use std::collections::{BTreeMap, VecDeque};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::location::{CollectionRef, DocumentRef};
use crate::storage::traits::{DocumentSnapshot, DocumentStore, StoreError, WriteOperation};
use crate::value::{Value, WireMap};

fn lock_err(context: &'static str) -> StoreError {
    StoreError::Backend(format!("poisoned lock: {context}"))
}

#[derive(Debug, Default)]
struct StoreState {
    documents: BTreeMap<DocumentRef, WireMap>,
    commits: Vec<Vec<WriteOperation>>,
    attempts: usize,
    failures: VecDeque<StoreError>,
}

fn apply_operation(
    documents: &mut BTreeMap<DocumentRef, WireMap>,
    operation: WriteOperation,
) -> Result<(), StoreError> {
    match operation {
        WriteOperation::Set {
            document,
            data,
            merge: true,
        } => {
            documents.entry(document).or_default().extend(data);
        }
        WriteOperation::Set {
            document,
            data,
            merge: false,
        } => {
            documents.insert(document, data);
        }
        WriteOperation::Update { document, data } => {
            let existing = documents
                .get_mut(&document)
                .ok_or_else(|| StoreError::NotFound(document.path().to_string()))?;
            existing.extend(data);
        }
        WriteOperation::DeleteField { document, field } => {
            let existing = documents
                .get_mut(&document)
                .ok_or_else(|| StoreError::NotFound(document.path().to_string()))?;
            existing.remove(&field);
        }
        WriteOperation::Delete { document } => {
            documents.remove(&document);
        }
    }
    Ok(())
}

fn snapshot(reference: &DocumentRef, data: &WireMap) -> DocumentSnapshot {
    DocumentSnapshot {
        reference: reference.clone(),
        data: data.clone(),
    }
}

/// Thread-safe in-memory document store.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    state: RwLock<StoreState>,
}

impl InMemoryDocumentStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes a document directly, bypassing the commit log.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Backend` if the state lock is poisoned.
    pub fn insert_document(&self, document: DocumentRef, data: WireMap) -> Result<(), StoreError> {
        let mut state = self.state.write().map_err(|_| lock_err("insert_document"))?;
        state.documents.insert(document, data);
        Ok(())
    }

    /// Current fields of a document, if it exists.
    #[must_use]
    pub fn document(&self, document: &DocumentRef) -> Option<WireMap> {
        self.state.read().ok()?.documents.get(document).cloned()
    }

    /// Makes the next commit (or single apply) fail with `error`.
    ///
    /// Queued failures are consumed one per attempt, in order.
    pub fn fail_next(&self, error: StoreError) {
        if let Ok(mut state) = self.state.write() {
            state.failures.push_back(error);
        }
    }

    /// Successfully applied commits, oldest first.
    #[must_use]
    pub fn commit_log(&self) -> Vec<Vec<WriteOperation>> {
        self.state.read().map(|s| s.commits.clone()).unwrap_or_default()
    }

    /// Number of successfully applied commits.
    #[must_use]
    pub fn commit_count(&self) -> usize {
        self.state.read().map(|s| s.commits.len()).unwrap_or_default()
    }

    /// Number of commit attempts, failed ones included.
    #[must_use]
    pub fn attempt_count(&self) -> usize {
        self.state.read().map(|s| s.attempts).unwrap_or_default()
    }

    /// Number of stored documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.documents.len()).unwrap_or_default()
    }

    /// True when no document is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get_document(&self, document: &DocumentRef) -> Result<Option<DocumentSnapshot>, StoreError> {
        let state = self.state.read().map_err(|_| lock_err("get_document"))?;
        Ok(state.documents.get(document).map(|data| snapshot(document, data)))
    }

    async fn list_documents(&self, collection: &CollectionRef) -> Result<Vec<DocumentSnapshot>, StoreError> {
        let state = self.state.read().map_err(|_| lock_err("list_documents"))?;
        Ok(state
            .documents
            .iter()
            .filter(|(reference, _)| collection.contains(reference))
            .map(|(reference, data)| snapshot(reference, data))
            .collect())
    }

    async fn query_equal(
        &self,
        collection: &CollectionRef,
        field: &str,
        value: &Value,
    ) -> Result<Vec<DocumentSnapshot>, StoreError> {
        let state = self.state.read().map_err(|_| lock_err("query_equal"))?;
        Ok(state
            .documents
            .iter()
            .filter(|(reference, data)| collection.contains(reference) && data.get(field) == Some(value))
            .map(|(reference, data)| snapshot(reference, data))
            .collect())
    }

    async fn commit(&self, operations: Vec<WriteOperation>) -> Result<(), StoreError> {
        let mut state = self.state.write().map_err(|_| lock_err("commit"))?;
        state.attempts += 1;
        if let Some(err) = state.failures.pop_front() {
            return Err(err);
        }

        // Apply to a copy so a failing operation leaves nothing behind.
        let mut documents = state.documents.clone();
        for operation in operations.iter().cloned() {
            apply_operation(&mut documents, operation)?;
        }
        state.documents = documents;
        state.commits.push(operations);
        Ok(())
    }
}
