//! Document store contract and the in-memory backend.

mod memory;
mod traits;

pub use memory::InMemoryDocumentStore;
pub use traits::{DocumentSnapshot, DocumentStore, StoreError, WriteOperation, CONVERTER_SIGNATURE};
