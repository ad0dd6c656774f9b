//! Reading documents into entities.

use crate::entity::{Located, MappedEntity, SnapshotAbsorbing};
use crate::error::{DocResult, ExecutionError};
use crate::location::{CollectionRef, DocumentRef, LocationResolver};
use crate::storage::{DocumentSnapshot, DocumentStore, StoreError};
use crate::value::Value;

fn store_err(err: &StoreError) -> ExecutionError {
    ExecutionError::Store {
        message: err.to_string(),
    }
}

fn absorb<T: MappedEntity + Located>(snapshot: &DocumentSnapshot) -> DocResult<T> {
    let mut entity = T::with_identity(snapshot.id());
    entity.absorb_snapshot(snapshot)?;
    entity.location_slot().record(snapshot.reference.clone());
    Ok(entity)
}

/// Reads one document into a fresh `T` keyed by the document id.
///
/// The entity's location is set to `document`. A missing document is `Ok(None)`.
///
/// # Errors
///
/// Returns `ExecutionError::Store` if the read fails, or the conversion error.
pub async fn load_document<T>(store: &dyn DocumentStore, document: &DocumentRef) -> DocResult<Option<T>>
where
    T: MappedEntity + Located,
{
    let snapshot = store.get_document(document).await.map_err(|e| {
        tracing::error!(target: "docbatch::loader", path = %document, error = %e, "document read failed");
        store_err(&e)
    })?;
    let Some(snapshot) = snapshot else {
        tracing::debug!(target: "docbatch::loader", path = %document, "document does not exist");
        return Ok(None);
    };
    absorb(&snapshot).map(Some)
}

/// [`load_document`] at the location the resolver gives `T` for `args`.
///
/// # Errors
///
/// Returns `ConfigurationError::NotRegistered` if `T` has no document location,
/// plus everything [`load_document`] returns.
pub async fn load_located<T>(store: &dyn DocumentStore, resolver: &LocationResolver, args: &[&str]) -> DocResult<Option<T>>
where
    T: MappedEntity + Located,
{
    let document = resolver.resolve_document::<T>(args)?;
    load_document(store, &document).await
}

/// First child of `collection` whose `field` equals `value`.
///
/// # Errors
///
/// Returns `ExecutionError::Store` if the query fails, or the conversion error.
pub async fn find_by_field<T>(
    store: &dyn DocumentStore,
    collection: &CollectionRef,
    field: &str,
    value: &Value,
) -> DocResult<Option<T>>
where
    T: MappedEntity + Located,
{
    let snapshots = store.query_equal(collection, field, value).await.map_err(|e| {
        tracing::error!(target: "docbatch::loader", path = %collection, field, error = %e, "query failed");
        store_err(&e)
    })?;
    snapshots.first().map(absorb).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::entity::{initialize, LocationSlot};
    use crate::metadata::MetadataBuilder;
    use crate::storage::InMemoryDocumentStore;
    use crate::value::WireMap;

    #[derive(Default)]
    struct Account {
        id: String,
        email: String,
        credits: i64,
        slot: LocationSlot,
    }

    impl MappedEntity for Account {
        fn describe(fields: &mut MetadataBuilder<Self>) {
            fields
                .field("email", |a| &a.email, |a| &mut a.email)
                .field("credits", |a| &a.credits, |a| &mut a.credits);
        }

        fn with_identity(key: &str) -> Self {
            Self {
                id: key.to_string(),
                ..Self::default()
            }
        }
    }

    impl Located for Account {
        fn location_slot(&self) -> &LocationSlot {
            &self.slot
        }
    }

    fn seeded() -> InMemoryDocumentStore {
        initialize::<Account>().unwrap();
        let store = InMemoryDocumentStore::new();
        store
            .insert_document(
                DocumentRef::new("accounts/alice").unwrap(),
                WireMap::from([
                    ("email".to_string(), Value::from("alice@example.com")),
                    ("credits".to_string(), Value::Int(40)),
                ]),
            )
            .unwrap();
        store
    }

    #[tokio::test]
    async fn load_existing_document() {
        let store = seeded();
        let doc = DocumentRef::new("accounts/alice").unwrap();
        let account: Account = load_document(&store, &doc).await.unwrap().unwrap();

        assert_eq!(account.id, "alice");
        assert_eq!(account.credits, 40);
        assert_eq!(account.location_slot().get(), Some(&doc));
    }

    #[tokio::test]
    async fn load_missing_document_is_none() {
        let store = seeded();
        let doc = DocumentRef::new("accounts/bob").unwrap();
        assert!(load_document::<Account>(&store, &doc).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn load_through_resolver() {
        let store = seeded();
        let resolver = LocationResolver::new();
        resolver.register_document::<Account>("accounts/{0}").unwrap();

        let account: Option<Account> = load_located(&store, &resolver, &["alice"]).await.unwrap();
        assert_eq!(account.map(|a| a.email), Some("alice@example.com".to_string()));
    }

    #[tokio::test]
    async fn find_by_field_returns_first_match() {
        let store = seeded();
        let accounts = CollectionRef::new("accounts").unwrap();

        let found: Option<Account> = find_by_field(&store, &accounts, "email", &Value::from("alice@example.com"))
            .await
            .unwrap();
        assert_eq!(found.map(|a| a.id), Some("alice".to_string()));

        let none: Option<Account> = find_by_field(&store, &accounts, "email", &Value::from("x")).await.unwrap();
        assert!(none.is_none());
    }
}
