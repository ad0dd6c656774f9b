use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use docbatch::{
    initialize, CollectionKind, CollectionRef, Coordinator, DocumentRef, FetchGates, InMemoryDocumentStore,
    KeyedCollection, MappedEntity, MetadataBuilder, Value, WireMap,
};

#[derive(Default, Debug, Clone, PartialEq)]
struct Relic {
    id: String,
    power: i64,
    cursed: bool,
}

impl MappedEntity for Relic {
    fn describe(fields: &mut MetadataBuilder<Self>) {
        fields
            .field("power", |r| &r.power, |r| &mut r.power)
            .field("cursed", |r| &r.cursed, |r| &mut r.cursed);
    }

    fn identity(&self) -> Option<String> {
        Some(self.id.clone())
    }

    fn with_identity(key: &str) -> Self {
        Self {
            id: key.to_string(),
            ..Self::default()
        }
    }
}

fn relic(id: &str, power: i64) -> Relic {
    Relic {
        id: id.to_string(),
        power,
        cursed: false,
    }
}

fn vault() -> CollectionRef {
    CollectionRef::new("guilds/ember/relics").unwrap()
}

#[test]
fn children_convert_to_identity_keyed_maps() {
    initialize::<Relic>().unwrap();
    let mut relics = KeyedCollection::at(vault());
    relics.insert("p1", relic("p1", 3));
    relics.insert("p2", relic("p2", 5));
    relics.insert("orphan", relic("  ", 9));

    let wire = relics.to_wire_format();

    assert_eq!(wire.len(), 2);
    let p1 = wire.get("p1").and_then(Value::as_map).unwrap();
    assert_eq!(p1.get("power"), Some(&Value::Int(3)));
    assert_eq!(p1.get("cursed"), Some(&Value::Bool(false)));
    assert!(wire.contains_key("p2"));
}

#[tokio::test]
async fn added_children_load_back_by_id() {
    initialize::<Relic>().unwrap();
    let store = Arc::new(InMemoryDocumentStore::new());
    let coordinator = Coordinator::new(store.clone());

    let mut relics = KeyedCollection::at(vault());
    relics.insert("p1", relic("p1", 3));
    relics.insert("p2", relic("p2", 5));
    let batch = coordinator.merge_batch(&relics, None, None, &[]).unwrap();
    coordinator.commit_batch(batch, None).await.unwrap();

    assert_eq!(store.commit_log()[0].len(), 2);

    let found = Arc::new(AtomicBool::new(false));
    let report = Arc::clone(&found);
    let callback = move |ok: bool| report.store(ok, Ordering::SeqCst);
    let loaded: KeyedCollection<Relic> =
        KeyedCollection::create(store.as_ref(), coordinator.fetch_gates(), vault(), Some(&callback)).await;

    assert!(found.load(Ordering::SeqCst));
    assert_eq!(loaded.kind(), CollectionKind::Collection);
    assert_eq!(loaded.keys().cloned().collect::<Vec<_>>(), vec!["p1", "p2"]);
    assert_eq!(loaded.get("p2"), Some(&relic("p2", 5)));
}

#[tokio::test]
async fn document_entries_skip_the_edit_stamp() {
    let store = Arc::new(InMemoryDocumentStore::new());
    let settings = DocumentRef::new("users/alice/private/settings").unwrap();
    let mut data = WireMap::new();
    data.insert("volume".to_string(), Value::Int(7));
    data.insert("brightness".to_string(), Value::Int(4));
    data.insert("theme".to_string(), Value::from("dark"));
    data.insert("edited_at".to_string(), Value::Int(1_706_054_400));
    store.insert_document(settings.clone(), data).unwrap();

    let coordinator = Coordinator::new(store.clone());
    let mut loaded: KeyedCollection<i64> =
        KeyedCollection::create(store.as_ref(), coordinator.fetch_gates(), settings.clone(), None).await;

    assert_eq!(loaded.kind(), CollectionKind::Document);
    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded.get("volume"), Some(&7));
    assert!(!loaded.contains_key("edited_at"));

    *loaded.get_mut("volume").unwrap() = 9;
    let task = coordinator.merge_task(&loaded, &[]).unwrap();
    coordinator.execute(task, None).await.unwrap();

    let stored = store.document(&settings).unwrap();
    assert_eq!(stored.get("volume"), Some(&Value::Int(9)));
    assert_eq!(stored.get("theme"), Some(&Value::from("dark")));
}

#[tokio::test]
async fn missing_document_gives_empty_tagged_collection() {
    let store = InMemoryDocumentStore::new();
    let found = Arc::new(AtomicBool::new(true));
    let report = Arc::clone(&found);
    let callback = move |ok: bool| report.store(ok, Ordering::SeqCst);

    let loaded: KeyedCollection<i64> =
        KeyedCollection::create(&store, &FetchGates::new(), DocumentRef::new("users/ghost").unwrap(), Some(&callback))
            .await;

    assert!(!found.load(Ordering::SeqCst));
    assert!(loaded.is_empty());
    assert_eq!(loaded.kind(), CollectionKind::Document);
}

#[test]
fn untagged_collection_cannot_build_a_task() {
    let store = Arc::new(InMemoryDocumentStore::new());
    let coordinator = Coordinator::new(store);
    let loose: KeyedCollection<i64> = KeyedCollection::new();

    assert!(coordinator.merge_task(&loose, &[]).is_err());
}
