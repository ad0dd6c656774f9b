//! Keyed collection wrapper.
//!
//! A [`KeyedCollection`] is a string-keyed map of values loaded from one of two
//! places: the fields of a single document, or the child documents of a
//! collection. Which one is recorded once, by the retrieval path, and decides
//! how the wrapper converts back to the wire.

use std::collections::btree_map::{self, BTreeMap};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::Mutex as AsyncMutex;

use crate::batch::Coordinator;
use crate::convert::WireConvert;
use crate::entity::{MappedEntity, SnapshotAbsorbing, WireConvertible};
use crate::error::{ConfigurationError, DocResult, Outcome};
use crate::location::{CollectionRef, DocumentRef, Location};
use crate::storage::{DocumentSnapshot, DocumentStore};
use crate::task::{Intent, TaskAction, TaskSource, WriteTask};
use crate::value::WireMap;

/// Document field reserved for the store's edit timestamp; never a map entry.
pub const EDITED_AT_FIELD: &str = "edited_at";

/// Where a keyed collection's entries come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CollectionKind {
    /// Not loaded from anywhere.
    #[default]
    Unset,
    /// The fields of one document.
    Document,
    /// The child documents of a collection.
    Collection,
    /// The entries of one map-valued field.
    Field,
}

/// Per-location gates serializing concurrent fetch-and-tag runs.
///
/// A gate lives only while a fetch of its location is running or waiting.
#[derive(Default)]
pub struct FetchGates {
    gates: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl FetchGates {
    /// Empty gate table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn acquire(&self, path: &str) -> Arc<AsyncMutex<()>> {
        let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(gates.entry(path.to_string()).or_default())
    }

    fn release(&self, path: &str, gate: Arc<AsyncMutex<()>>) {
        let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
        drop(gate);
        // Only the table still holds it: nobody is fetching or waiting.
        if gates.get(path).is_some_and(|g| Arc::strong_count(g) == 1) {
            gates.remove(path);
        }
    }

    /// Number of locations with a fetch in flight.
    #[must_use]
    pub fn len(&self) -> usize {
        self.gates.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// True when no fetch is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for FetchGates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchGates").field("in_flight", &self.len()).finish()
    }
}

/// String-keyed map of values with a recorded origin.
#[derive(Debug, Clone)]
pub struct KeyedCollection<V> {
    kind: CollectionKind,
    source: Option<Location>,
    entries: BTreeMap<String, V>,
}

impl<V> Default for KeyedCollection<V> {
    fn default() -> Self {
        Self {
            kind: CollectionKind::Unset,
            source: None,
            entries: BTreeMap::new(),
        }
    }
}

#[allow(missing_docs)]
impl<V: WireConvert> KeyedCollection<V> {
    /// Empty, untagged collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty collection tagged with `location`, without fetching anything.
    #[must_use]
    pub fn at(location: impl Into<Location>) -> Self {
        let location = location.into();
        let kind = match location {
            Location::Document(_) => CollectionKind::Document,
            Location::Collection(_) => CollectionKind::Collection,
        };
        Self {
            kind,
            source: Some(location),
            entries: BTreeMap::new(),
        }
    }

    /// Fetches `location` and builds a collection from it.
    ///
    /// A document location yields one entry per field, a collection location
    /// one entry per child document. Fetches of the same location through the
    /// same `gates` are serialized. A read failure gives an empty, untagged
    /// collection; a missing document gives an empty, tagged one. Either way
    /// `on_outcome` receives `false`.
    pub async fn create(
        store: &dyn DocumentStore,
        gates: &FetchGates,
        location: impl Into<Location>,
        on_outcome: Option<&(dyn Fn(bool) + Send + Sync)>,
    ) -> Self {
        let location = location.into();
        let gate = gates.acquire(location.path());
        let (collection, found) = {
            let _serialized = gate.lock().await;
            match &location {
                Location::Document(document) => Self::fetch_document(store, document).await,
                Location::Collection(collection) => Self::fetch_collection(store, collection).await,
            }
        };
        gates.release(location.path(), gate);

        if let Some(report) = on_outcome {
            report(found);
        }
        collection
    }

    async fn fetch_document(store: &dyn DocumentStore, document: &DocumentRef) -> (Self, bool) {
        match store.get_document(document).await {
            Ok(Some(snapshot)) => {
                let mut collection = Self::at(document.clone());
                collection.apply_wire_format(&snapshot.data);
                (collection, true)
            }
            Ok(None) => {
                tracing::info!(target: "docbatch::collection", path = %document, "document does not exist");
                (Self::at(document.clone()), false)
            }
            Err(err) => {
                tracing::error!(target: "docbatch::collection", path = %document, error = %err, "document fetch failed");
                (Self::new(), false)
            }
        }
    }

    async fn fetch_collection(store: &dyn DocumentStore, collection: &CollectionRef) -> (Self, bool) {
        match store.list_documents(collection).await {
            Ok(snapshots) => {
                let mut keyed = Self::at(collection.clone());
                keyed.apply_snapshots(&snapshots);
                (keyed, true)
            }
            Err(err) => {
                tracing::error!(target: "docbatch::collection", path = %collection, error = %err, "collection fetch failed");
                (Self::new(), false)
            }
        }
    }

    #[must_use]
    pub const fn kind(&self) -> CollectionKind {
        self.kind
    }

    #[must_use]
    pub const fn source(&self) -> Option<&Location> {
        self.source.as_ref()
    }

    /// Upserts one entry per document field.
    ///
    /// The reserved [`EDITED_AT_FIELD`] is skipped, as is any value that does
    /// not convert to `V`.
    pub fn apply_wire_format(&mut self, data: &WireMap) {
        for (key, value) in data {
            if key == EDITED_AT_FIELD {
                continue;
            }
            match V::from_wire(key, value) {
                Some(converted) => {
                    self.entries.insert(key.clone(), converted);
                }
                None => {
                    tracing::warn!(
                        target: "docbatch::collection",
                        key = %key,
                        wire_type = value.type_name(),
                        local_type = V::type_label(),
                        "entry did not convert; skipped"
                    );
                }
            }
        }
    }

    /// Upserts one entry per child document, keyed by document id.
    pub fn apply_snapshots(&mut self, snapshots: &[DocumentSnapshot]) {
        for snapshot in snapshots {
            match V::from_document(snapshot.id(), &snapshot.data) {
                Ok(value) => {
                    self.entries.insert(snapshot.id().to_string(), value);
                }
                Err(err) => {
                    tracing::error!(
                        target: "docbatch::collection",
                        path = %snapshot.reference,
                        error = %err,
                        "child document not absorbed; skipped"
                    );
                }
            }
        }
    }

    /// Wire form of the entries.
    ///
    /// Loaded from a collection: child id → child wire map, using each value's
    /// own identity as the id; values without one are skipped. Loaded from a
    /// document: entry key → entry wire value. Untagged collections convert to
    /// an empty map.
    #[must_use]
    pub fn to_wire_format(&self) -> WireMap {
        match self.kind {
            CollectionKind::Collection => self.children_to_wire(),
            CollectionKind::Document | CollectionKind::Field => self
                .entries
                .iter()
                .filter_map(|(key, value)| value.to_wire().map(|v| (key.clone(), v)))
                .collect(),
            CollectionKind::Unset => {
                tracing::warn!(target: "docbatch::collection", "untagged collection has no wire format");
                WireMap::new()
            }
        }
    }

    fn children_to_wire(&self) -> WireMap {
        let mut wire = WireMap::new();
        for (key, value) in &self.entries {
            let Some(form) = value.to_document() else {
                tracing::warn!(target: "docbatch::collection", key = %key, local_type = V::type_label(), "value is not a document; skipped");
                continue;
            };
            let Some(name) = form.name.filter(|n| !n.trim().is_empty()) else {
                tracing::warn!(target: "docbatch::collection", key = %key, "child has no identity; skipped");
                continue;
            };
            match form.data {
                Ok(data) => {
                    wire.insert(name, data.into());
                }
                Err(err) => {
                    tracing::warn!(target: "docbatch::collection", key = %key, error = %err, "child did not convert; skipped");
                }
            }
        }
        wire
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut V> {
        self.entries.get_mut(key)
    }

    /// Entry for `key`, created with `create` if absent.
    pub fn get_or_insert_with(&mut self, key: &str, create: impl FnOnce(&str) -> V) -> &mut V {
        self.entries.entry(key.to_string()).or_insert_with(|| create(key))
    }

    pub fn insert(&mut self, key: impl Into<String>, value: V) -> Option<V> {
        self.entries.insert(key.into(), value)
    }

    pub fn remove(&mut self, key: &str) -> Option<V> {
        self.entries.remove(key)
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, V> {
        self.entries.iter()
    }
}

impl<V: MappedEntity> KeyedCollection<V> {
    /// Entry for `key`, created keyed by `key` if absent.
    pub fn get_or_create(&mut self, key: &str) -> &mut V {
        self.get_or_insert_with(key, V::with_identity)
    }
}

impl<'a, V> IntoIterator for &'a KeyedCollection<V> {
    type Item = (&'a String, &'a V);
    type IntoIter = btree_map::Iter<'a, String, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl<V: WireConvert> WireConvertible for KeyedCollection<V> {
    fn to_wire_format(&self) -> DocResult<WireMap> {
        Ok(Self::to_wire_format(self))
    }

    fn apply_wire_format(&mut self, data: &WireMap) -> Outcome {
        Self::apply_wire_format(self, data);
        Ok(())
    }
}

impl<V: WireConvert> SnapshotAbsorbing for KeyedCollection<V> {
    fn absorb_snapshot(&mut self, snapshot: &DocumentSnapshot) -> Outcome {
        Self::apply_wire_format(self, &snapshot.data);
        Ok(())
    }
}

impl<V: WireConvert> TaskSource for KeyedCollection<V> {
    fn build_task(&self, coordinator: &Coordinator, intent: Intent, _args: &[&str]) -> DocResult<WriteTask> {
        match (&self.source, intent) {
            (Some(Location::Document(document)), Intent::Merge) => {
                Ok(coordinator.document_task(document.clone(), Some(self.to_wire_format())))
            }
            (Some(Location::Document(document)), Intent::Remove) => Ok(coordinator
                .document_task(document.clone(), None)
                .with_action(TaskAction::Delete)),
            (Some(Location::Collection(collection)), Intent::Merge) => Ok(coordinator
                .collection_task(collection.clone(), Some(self.to_wire_format()))
                .with_action(TaskAction::AddDocuments)),
            (Some(Location::Collection(collection)), Intent::Remove) => Ok(coordinator
                .collection_task(collection.clone(), Some(self.to_wire_format()))
                .with_action(TaskAction::Delete)),
            (None, _) => Err(ConfigurationError::UnsupportedShape {
                type_name: std::any::type_name::<Self>(),
                task: "untagged collection",
            }
            .into()),
        }
    }
}
