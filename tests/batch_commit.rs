use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use docbatch::{
    completion, BatchId, CollectionRef, Completion, Coordinator, DocError, DocumentRef, ExecutionError,
    InMemoryDocumentStore, Outcome, StoreError, TaskAction, ValidationError, Value, WireMap, WriteOperation,
};

#[derive(Default)]
struct Outcomes {
    ok: AtomicUsize,
    failed: AtomicUsize,
}

impl Outcomes {
    fn callback(self: &Arc<Self>) -> Completion {
        let outcomes = Arc::clone(self);
        completion(move |outcome: &Outcome| {
            if outcome.is_ok() {
                outcomes.ok.fetch_add(1, Ordering::SeqCst);
            } else {
                outcomes.failed.fetch_add(1, Ordering::SeqCst);
            }
        })
    }

    fn ok(&self) -> usize {
        self.ok.load(Ordering::SeqCst)
    }

    fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }
}

fn setup() -> (Arc<InMemoryDocumentStore>, Arc<Coordinator>) {
    let store = Arc::new(InMemoryDocumentStore::new());
    let coordinator = Arc::new(Coordinator::new(store.clone()));
    (store, coordinator)
}

fn doc(path: &str) -> DocumentRef {
    DocumentRef::new(path).unwrap()
}

fn merge_task(coordinator: &Coordinator, path: &str, field: &str, value: &str) -> docbatch::WriteTask {
    let mut task = coordinator.field_task(doc(path));
    task.set_data(field, value);
    task
}

#[tokio::test]
async fn invalid_task_is_pruned_but_still_notified() {
    let (store, coordinator) = setup();
    let outcomes = Arc::new(Outcomes::default());
    let batch = BatchId::new(1);

    let tasks = vec![
        merge_task(&coordinator, "users/alice", "displayName", "Nova"),
        coordinator.field_task(None),
        merge_task(&coordinator, "users/bob", "displayName", "Rex"),
    ];
    for task in tasks {
        coordinator
            .register(task, Some(batch), Some(outcomes.callback()))
            .unwrap();
    }

    assert_eq!(coordinator.commit_batch(batch, None).await, Ok(()));

    let log = store.commit_log();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].len(), 2);
    assert_eq!(outcomes.ok(), 2);
    assert_eq!(outcomes.failed(), 1);
    assert!(coordinator.batch_ids().unwrap().is_empty());
    assert!(coordinator.pending().is_empty());
}

#[tokio::test(start_paused = true)]
async fn fail_fail_succeed_commits_once() {
    let (store, coordinator) = setup();
    store.fail_next(StoreError::Unavailable("deadline exceeded".to_string()));
    store.fail_next(StoreError::Unavailable("deadline exceeded".to_string()));

    let outcomes = Arc::new(Outcomes::default());
    let batch_outcome = Arc::new(Mutex::new(None));
    let seen = Arc::clone(&batch_outcome);

    let first = coordinator
        .register(merge_task(&coordinator, "users/alice", "level", "3"), None, Some(outcomes.callback()))
        .unwrap();
    coordinator
        .register(merge_task(&coordinator, "users/bob", "level", "4"), Some(first), Some(outcomes.callback()))
        .unwrap();

    let started = tokio::time::Instant::now();
    let outcome = coordinator
        .commit_batch(
            first,
            Some(completion(move |o| {
                *seen.lock().unwrap() = Some(o.clone());
            })),
        )
        .await;

    assert_eq!(outcome, Ok(()));
    assert_eq!(*batch_outcome.lock().unwrap(), Some(Ok(())));
    assert_eq!(outcomes.ok(), 2);
    assert_eq!(outcomes.failed(), 0);
    assert_eq!(store.attempt_count(), 3);
    assert_eq!(store.commit_count(), 1);
    assert_eq!(coordinator.batch_len(first), None);
    assert!(started.elapsed() >= Duration::from_secs(6));
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_report_transient_failure() {
    let (store, coordinator) = setup();
    for _ in 0..3 {
        store.fail_next(StoreError::Unavailable("offline".to_string()));
    }
    let outcomes = Arc::new(Outcomes::default());
    let batch = coordinator
        .register(merge_task(&coordinator, "users/alice", "level", "3"), None, Some(outcomes.callback()))
        .unwrap();

    let outcome = coordinator.commit_batch(batch, None).await;
    assert!(matches!(
        outcome,
        Err(DocError::Execution(ExecutionError::Transient { attempts: 3, .. }))
    ));
    assert_eq!(outcomes.failed(), 1);
    assert_eq!(store.commit_count(), 0);
    assert_eq!(coordinator.batch_len(batch), Some(1));
    assert_eq!(coordinator.batch_info(batch), Some(Vec::new()));
}

#[tokio::test]
async fn concurrent_commits_of_one_batch_are_single_flight() {
    let (store, coordinator) = setup();
    let batch = coordinator
        .register(merge_task(&coordinator, "users/alice", "level", "3"), None, None)
        .unwrap();

    let (a, b) = tokio::join!(coordinator.commit_batch(batch, None), coordinator.commit_batch(batch, None));

    let outcomes = [a, b];
    assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 1);
    assert!(outcomes
        .iter()
        .any(|o| *o == Err(DocError::Execution(ExecutionError::BatchNotFound { id: batch }))));
    assert_eq!(store.commit_count(), 1);
}

#[tokio::test]
async fn standalone_field_merge_writes_only_its_key() {
    let (store, coordinator) = setup();
    let task = merge_task(&coordinator, "users/alice", "display_name", "Nova").with_action(TaskAction::MergeAll);

    assert_eq!(coordinator.execute(task, None).await, Ok(()));

    let mut expected = WireMap::new();
    expected.insert("display_name".to_string(), Value::from("Nova"));
    assert_eq!(
        store.commit_log(),
        vec![vec![WriteOperation::Set {
            document: doc("users/alice"),
            data: expected,
            merge: true,
        }]]
    );
    assert!(coordinator.pending().is_empty());
}

#[tokio::test]
async fn panicking_callback_does_not_block_the_rest() {
    let (store, coordinator) = setup();
    let outcomes = Arc::new(Outcomes::default());
    let batch = coordinator
        .register(
            merge_task(&coordinator, "users/alice", "level", "1"),
            None,
            Some(completion(|_| panic!("callback failure"))),
        )
        .unwrap();
    coordinator
        .register(merge_task(&coordinator, "users/bob", "level", "2"), Some(batch), Some(outcomes.callback()))
        .unwrap();

    assert_eq!(coordinator.commit_batch(batch, None).await, Ok(()));
    assert_eq!(outcomes.ok(), 1);
    assert_eq!(store.commit_count(), 1);
}

#[tokio::test]
async fn commit_all_settles_batches_independently() {
    let (store, coordinator) = setup();
    let good = coordinator
        .register(merge_task(&coordinator, "users/alice", "level", "1"), None, None)
        .unwrap();
    let bad = coordinator
        .register(merge_task(&coordinator, "users/bob", "level", "2"), None, None)
        .unwrap();
    assert!(good < bad);

    store.fail_next(StoreError::Conversion("Unable to create converter for type Color".to_string()));
    let results = coordinator.commit_all(None).await.unwrap();

    assert_eq!(results.len(), 2);
    assert!(matches!(
        results[0],
        (id, Err(DocError::Execution(ExecutionError::Conversion { .. }))) if id == good
    ));
    assert_eq!(results[1], (bad, Ok(())));
    assert_eq!(coordinator.batch_ids().unwrap(), vec![good]);
    assert_eq!(store.commit_count(), 1);
}

#[tokio::test]
async fn detached_commit_reports_through_callback() {
    let (store, coordinator) = setup();
    let batch = coordinator
        .register(merge_task(&coordinator, "users/alice", "level", "1"), None, None)
        .unwrap();

    let (tx, rx) = tokio::sync::oneshot::channel();
    let tx = Mutex::new(Some(tx));
    coordinator.commit_batch_detached(
        batch,
        Some(completion(move |outcome| {
            if let Some(tx) = tx.lock().unwrap().take() {
                let _ = tx.send(outcome.clone());
            }
        })),
    );

    assert_eq!(rx.await.unwrap(), Ok(()));
    assert_eq!(store.commit_count(), 1);
}

fn scalar_children(coordinator: &Coordinator) -> docbatch::WriteTask {
    let mut data = WireMap::new();
    data.insert("c".to_string(), Value::Int(3));
    coordinator
        .collection_task(CollectionRef::new("guilds/ember/relics").unwrap(), Some(data))
        .with_action(TaskAction::AddDocuments)
}

#[tokio::test]
async fn added_children_that_are_not_maps_fail_validation() {
    let (store, coordinator) = setup();

    let outcome = coordinator.execute(scalar_children(&coordinator), None).await;
    assert!(matches!(
        outcome,
        Err(DocError::Validation(ValidationError::InvalidChild { ref id, .. })) if id == "c"
    ));
    assert_eq!(store.attempt_count(), 0);

    let outcomes = Arc::new(Outcomes::default());
    let batch = coordinator
        .register(scalar_children(&coordinator), None, Some(outcomes.callback()))
        .unwrap();
    coordinator
        .register(merge_task(&coordinator, "users/alice", "level", "1"), Some(batch), Some(outcomes.callback()))
        .unwrap();

    assert_eq!(coordinator.commit_batch(batch, None).await, Ok(()));
    assert_eq!(outcomes.failed(), 1);
    assert_eq!(outcomes.ok(), 1);
    assert_eq!(store.commit_log(), vec![vec![WriteOperation::Set {
        document: doc("users/alice"),
        data: WireMap::from([("level".to_string(), Value::from("1"))]),
        merge: true,
    }]]);
    assert!(coordinator.pending().is_empty());
}
