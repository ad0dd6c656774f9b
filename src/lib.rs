//! # docbatch - Typed document mapping and batched writes
//!
//! docbatch sits between an application's typed model and a remote,
//! schema-less document store. It converts entities to and from a sparse
//! key/value wire format, and it schedules, batches, retries and commits the
//! resulting writes.
//!
//! ## Core Concepts
//!
//! - **Mapped entity**: a type that describes its fields once ([`MappedEntity`])
//! - **Write task**: one pending write against a field, document or collection
//! - **Batch**: tasks committed together, atomically, under one [`BatchId`]
//! - **Debouncer**: coalesces bursts of writes into a single batch commit
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use docbatch::{Coordinator, InMemoryDocumentStore, DocumentRef};
//!
//! let store = Arc::new(InMemoryDocumentStore::new());
//! let coordinator = Arc::new(Coordinator::new(store));
//!
//! // One field write, committed as part of a batch
//! let mut task = coordinator.field_task(DocumentRef::new("users/alice")?);
//! task.set_data("displayName", "Nova");
//! let batch = coordinator.register(task, None, None)?;
//!
//! coordinator.commit_batch(batch, None).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Wire format
pub mod convert;
pub mod error;
pub mod time;
pub mod value;

// Mapping
pub mod collection;
pub mod entity;
pub mod location;
pub mod metadata;

// Writes
pub mod batch;
pub mod config;
pub mod debounce;
pub mod loader;
pub mod storage;
pub mod sync;
pub mod task;

// Re-export primary types at crate root for convenience
pub use batch::{BatchId, Coordinator};
pub use collection::{CollectionKind, FetchGates, KeyedCollection};
pub use config::{BatchConfig, DebounceConfig, EngineConfig};
pub use convert::WireConvert;
pub use debounce::Debouncer;
pub use entity::{initialize, Located, LocationSlot, MappedEntity, SnapshotAbsorbing, WireConvertible};
pub use error::{ConfigurationError, DocError, DocResult, ExecutionError, Outcome, ValidationError};
pub use loader::{find_by_field, load_document, load_located};
pub use location::{CollectionRef, DocumentRef, Location, LocationResolver};
pub use metadata::{EntityMetadata, MetadataBuilder, MetadataCache};
pub use storage::{DocumentSnapshot, DocumentStore, InMemoryDocumentStore, StoreError, WriteOperation};
pub use sync::SyncedField;
pub use task::{completion, Completion, InField, TaskAction, TaskSource, TaskState, WriteTask};
pub use time::UnixTime;
pub use value::{Value, WireMap};
