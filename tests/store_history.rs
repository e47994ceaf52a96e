//! Store scenarios: history rings, time travel, anchors, encryption.

use nine_scrolls::patch::verify;
use nine_scrolls::store::derive_app_key;
use nine_scrolls::{
    FileNamespace, MemoryNamespace, Namespace, NineError, Store, StoreConfig,
};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tempfile::TempDir;

fn data(key: &str, value: Value) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert(key.into(), value);
    map
}

fn history_store(max_patches: usize) -> Store {
    Store::new(
        Arc::new(MemoryNamespace::new()),
        StoreConfig { history: true, max_patches, ..Default::default() },
    )
    .unwrap()
}

#[tokio::test]
async fn ring_buffer_keeps_most_recent_patches() {
    let store = history_store(3);
    for i in 1..=5 {
        store.write("/k", data("v", json!(i))).await.unwrap();
    }

    let history = store.history("/k").await.unwrap();
    assert_eq!(history.len(), 3);
    let seqs: Vec<u64> = history.iter().map(|p| p.seq).collect();
    assert_eq!(seqs, vec![3, 4, 5]);
}

#[tokio::test]
async fn state_at_recovers_each_version() {
    let store = history_store(100);
    for i in 1..=3 {
        store.write("/k", data("v", json!(i))).await.unwrap();
    }

    for i in 1..=3u64 {
        let state = store.state_at("/k", i).await.unwrap();
        assert_eq!(state.data, data("v", json!(i)));
        assert_eq!(state.metadata.version, i);
    }
}

#[tokio::test]
async fn state_at_works_across_trimmed_history() {
    let store = history_store(3);
    for i in 1..=5 {
        store.write("/k", data("v", json!(i))).await.unwrap();
    }

    // Patches 1 and 2 are gone; replay still lands on the recorded states.
    assert_eq!(store.state_at("/k", 3).await.unwrap().data, data("v", json!(3)));
    assert_eq!(store.state_at("/k", 5).await.unwrap().data, data("v", json!(5)));
}

#[tokio::test]
async fn state_at_range_errors() {
    let store = history_store(10);
    assert!(matches!(
        store.state_at("/empty", 1).await,
        Err(NineError::NotFound(_))
    ));
    store.write("/k", data("v", json!(1))).await.unwrap();
    assert!(matches!(store.state_at("/k", 0).await, Err(NineError::Internal(_))));
    assert!(matches!(store.state_at("/k", 2).await, Err(NineError::Internal(_))));
}

#[tokio::test]
async fn patch_parent_chain_holds() {
    let store = history_store(100);
    store.write("/k", data("v", json!("a"))).await.unwrap();
    let v1 = store.read("/k").await.unwrap();
    store.write("/k", data("v", json!("b"))).await.unwrap();
    let v2 = store.read("/k").await.unwrap();
    store.write("/k", data("v", json!("c"))).await.unwrap();

    let history = store.history("/k").await.unwrap();
    assert!(verify(None, &history[0]));
    assert!(verify(v1.as_ref(), &history[1]));
    assert!(verify(v2.as_ref(), &history[2]));
    // A patch does not verify against the wrong parent state.
    assert!(!verify(v1.as_ref(), &history[2]));
}

#[tokio::test]
async fn anchor_and_restore_scenario() {
    let store = history_store(100);
    store.write("/p", data("state", json!("orig"))).await.unwrap();
    let anchor = store.anchor("/p", Some("v0")).await.unwrap();
    assert!(anchor.verify());
    assert_eq!(anchor.label.as_deref(), Some("v0"));

    store.write("/p", data("state", json!("mod"))).await.unwrap();
    let restored = store.restore("/p", &anchor.id).await.unwrap();
    assert_eq!(restored.data, data("state", json!("orig")));
    assert_eq!(restored.metadata.version, 3);

    let current = store.read("/p").await.unwrap().unwrap();
    assert_eq!(current.data, data("state", json!("orig")));
}

#[tokio::test]
async fn anchoring_nothing_is_not_found() {
    let store = history_store(10);
    assert!(matches!(
        store.anchor("/void", None).await,
        Err(NineError::NotFound(_))
    ));
}

#[tokio::test]
async fn encrypted_store_over_files() {
    let tmp = TempDir::new().unwrap();
    let key = derive_app_key(b"master secret", "files-app").unwrap();
    let backend = Arc::new(FileNamespace::new(tmp.path()));
    let store = Store::new(
        backend,
        StoreConfig { encrypted: true, key: Some(key), history: true, ..Default::default() },
    )
    .unwrap();

    let payload = data("note", json!("the vault combination is 1234"));
    store.write("/secrets/combo", payload.clone()).await.unwrap();

    // Round trip through the store yields plaintext.
    let read = store.read("/secrets/combo").await.unwrap().unwrap();
    assert_eq!(read.data, payload);

    // The on-disk JSON contains neither the key names nor the values.
    let raw = std::fs::read_to_string(
        tmp.path().join("_scrolls/secrets/combo.json"),
    )
    .unwrap();
    assert!(!raw.contains("combination"));
    assert!(!raw.contains("1234"));
    assert!(!raw.contains("note"));
    assert!(raw.contains("_encrypted"));
}

#[tokio::test]
async fn wrong_key_never_leaks_plaintext() {
    let backend = Arc::new(MemoryNamespace::new());
    let store = Store::new(
        backend.clone(),
        StoreConfig { encrypted: true, key: Some([9u8; 32]), ..Default::default() },
    )
    .unwrap();
    store.write("/s", data("secret", json!("x"))).await.unwrap();

    let wrong = Store::new(
        backend,
        StoreConfig { encrypted: true, key: Some([10u8; 32]), ..Default::default() },
    )
    .unwrap();
    match wrong.read("/s").await {
        Err(NineError::Internal(msg)) => assert!(!msg.contains('x')),
        other => panic!("expected Internal, got {other:?}"),
    }
}

#[tokio::test]
async fn history_works_with_encryption() {
    let key = derive_app_key(b"m", "history-app").unwrap();
    let store = Store::new(
        Arc::new(MemoryNamespace::new()),
        StoreConfig { encrypted: true, key: Some(key), history: true, ..Default::default() },
    )
    .unwrap();

    for i in 1..=3 {
        store.write("/k", data("v", json!(i))).await.unwrap();
    }
    // Patches record plaintext diffs, so replay yields plaintext states.
    let state = store.state_at("/k", 2).await.unwrap();
    assert_eq!(state.data, data("v", json!(2)));
}

#[tokio::test]
async fn prune_all_history_trims_every_key() {
    let store = history_store(100);
    for key in ["/a", "/b"] {
        for i in 0..5 {
            store.write(key, data("v", json!(i))).await.unwrap();
        }
        store.anchor(key, None).await.unwrap();
    }

    store.prune_all_history(Some(1), Some(0)).await.unwrap();
    for key in ["/a", "/b"] {
        assert_eq!(store.history(key).await.unwrap().len(), 1);
        assert!(store.anchors(key).await.unwrap().is_empty());
    }
}
