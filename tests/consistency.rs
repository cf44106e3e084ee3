//! Consistency tests: the visible set of every subscription converges to
//! exactly the set of stored documents matching its filter.

use docfeed::{
    Delta, Document, DocumentId, DocumentStore, Filter, Mutation, SubscriptionConfig,
    SubscriptionHandle, SubscriptionId, SubscriptionManager,
};
use proptest::prelude::*;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn obj(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(m) => m,
        _ => panic!("expected object"),
    }
}

/// One randomly generated store mutation over a small id/group space.
#[derive(Clone, Debug)]
enum Op {
    Insert { id: u8, group: u8 },
    Update { id: u8, group: u8 },
    Remove { id: u8 },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..16, 0u8..3).prop_map(|(id, group)| Op::Insert { id, group }),
        (0u8..16, 0u8..3).prop_map(|(id, group)| Op::Update { id, group }),
        (0u8..16).prop_map(|id| Op::Remove { id }),
    ]
}

fn apply_op(store: &DocumentStore, op: &Op) {
    match op {
        Op::Insert { id, group } => {
            store.insert_if_absent(
                Document::from_json(i64::from(*id), json!({"group": group})).unwrap(),
            );
        }
        Op::Update { id, group } => {
            store
                .update_by_id(
                    &DocumentId::from(i64::from(*id)),
                    Mutation::Set(obj(json!({"group": group}))),
                )
                .unwrap();
        }
        Op::Remove { id } => {
            store.remove(&DocumentId::from(i64::from(*id)));
        }
    }
}

/// Drain every pending delta, checking stream coherence as we go:
/// Added only for unseen ids, Changed/Removed only for seen ones.
fn drain_coherently(handle: &SubscriptionHandle, mirror: &mut HashSet<DocumentId>) {
    while let Ok(delta) = handle.recv_timeout(Duration::from_millis(50)) {
        match delta {
            Delta::Added { document } => {
                assert!(
                    mirror.insert(document.id.clone()),
                    "Added for already-visible {:?}",
                    document.id
                );
            }
            Delta::Changed { id, .. } => {
                assert!(mirror.contains(&id), "Changed for invisible {:?}", id);
            }
            Delta::Removed { id } => {
                assert!(mirror.remove(&id), "Removed for invisible {:?}", id);
            }
        }
    }
}

fn expected_ids(store: &DocumentStore, filter: &Filter) -> Vec<DocumentId> {
    store.find(filter).into_iter().map(|d| d.id).collect()
}

fn wait_converged(
    manager: &Arc<SubscriptionManager>,
    id: SubscriptionId,
    store: &DocumentStore,
    filter: &Filter,
) {
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        let visible = manager.visible_ids(id).unwrap_or_default();
        if visible == expected_ids(store, filter) {
            return;
        }
        if Instant::now() > deadline {
            panic!(
                "visible set {:?} never converged to {:?}",
                visible,
                expected_ids(store, filter)
            );
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// For any interleaving of mutations and one subscription, the
    /// subscription's visible set converges to the store's matching set,
    /// and the delta stream itself is coherent.
    #[test]
    fn prop_visible_set_converges(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let store = Arc::new(DocumentStore::new());
        let manager = SubscriptionManager::new(Arc::clone(&store));
        let filter = Filter::where_eq("group", json!(1));
        let handle = manager.subscribe_channel(SubscriptionConfig::filtered(filter.clone()));

        for op in &ops {
            apply_op(&store, op);
        }

        wait_converged(&manager, handle.id, &store, &filter);

        let mut mirror = HashSet::new();
        drain_coherently(&handle, &mut mirror);

        let expected: HashSet<DocumentId> = expected_ids(&store, &filter).into_iter().collect();
        prop_assert_eq!(mirror, expected);
    }
}

/// Concurrent writers against one subscription: the visible set still
/// converges once the writers are done.
#[test]
fn test_concurrent_writers_converge() {
    let store = Arc::new(DocumentStore::new());
    let manager = SubscriptionManager::new(Arc::clone(&store));
    let filter = Filter::where_eq("group", json!(0));
    let handle = manager.subscribe_channel(SubscriptionConfig::filtered(filter.clone()));

    let writers: Vec<_> = (0..4)
        .map(|w| {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for i in 0..100i64 {
                    let id = (w * 7 + i) % 32;
                    match i % 3 {
                        0 => {
                            store.insert_if_absent(
                                Document::from_json(id, json!({"group": id % 2})).unwrap(),
                            );
                        }
                        1 => {
                            store
                                .update_by_id(
                                    &DocumentId::from(id),
                                    Mutation::Set(obj(json!({"group": (id + i) % 2}))),
                                )
                                .unwrap();
                        }
                        _ => {
                            store.remove(&DocumentId::from(id));
                        }
                    }
                }
            })
        })
        .collect();

    for writer in writers {
        writer.join().unwrap();
    }

    wait_converged(&manager, handle.id, &store, &filter);

    let mut mirror = HashSet::new();
    drain_coherently(&handle, &mut mirror);
    let expected: HashSet<DocumentId> = expected_ids(&store, &filter).into_iter().collect();
    assert_eq!(mirror, expected);
}

/// A fresh subscription at a quiescent point delivers Added deltas for
/// exactly the documents `find` returns at that instant.
#[test]
fn test_snapshot_equals_find_at_quiescence() {
    let store = Arc::new(DocumentStore::new());
    let manager = SubscriptionManager::new(Arc::clone(&store));

    for i in 0..20i64 {
        store
            .insert(Document::from_json(i, json!({"group": i % 3})).unwrap())
            .unwrap();
    }

    let filter = Filter::where_eq("group", json!(2));
    let expected: HashSet<DocumentId> = expected_ids(&store, &filter).into_iter().collect();
    let handle = manager.subscribe_channel(SubscriptionConfig::filtered(filter));

    let mut snapshot = HashSet::new();
    for _ in 0..expected.len() {
        match handle.recv_timeout(Duration::from_secs(2)).unwrap() {
            Delta::Added { document } => {
                assert!(snapshot.insert(document.id));
            }
            other => panic!("expected Added, got {:?}", other),
        }
    }
    assert_eq!(snapshot, expected);
    assert!(handle.recv_timeout(Duration::from_millis(100)).is_err());
}
