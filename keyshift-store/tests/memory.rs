#![allow(clippy::needless_return)]
mod engine;

use keyshift_store::{Memory, Store, StoreError, Ttl};

fn get_store() -> Store {
    Store::new(Memory::new())
}

#[tokio_shared_rt::test]
async fn dump_restore() {
    engine::test_dump_restore(&get_store()).await.unwrap();
}

#[tokio_shared_rt::test]
async fn restore_busy_key() {
    engine::test_restore_busy_key(&get_store()).await.unwrap();
}

#[tokio_shared_rt::test]
async fn restore_corrupt() {
    engine::test_restore_corrupt(&get_store()).await.unwrap();
}

#[tokio_shared_rt::test]
async fn restore_with_ttl() {
    engine::test_restore_with_ttl(&get_store()).await.unwrap();
}

#[tokio_shared_rt::test]
async fn sorted_sets() {
    engine::test_sorted_sets(&get_store()).await.unwrap();
}

#[tokio_shared_rt::test]
async fn sets_and_counters() {
    engine::test_sets_and_counters(&get_store()).await.unwrap();
}

#[tokio_shared_rt::test]
async fn scan_and_delete() {
    engine::test_scan_and_delete(&get_store()).await.unwrap();
}

#[tokio_shared_rt::test]
async fn select() {
    engine::test_select(&get_store()).await.unwrap();
}

#[tokio_shared_rt::test]
async fn restore_rejects_out_of_range_ttl() {
    let store = get_store();
    store.incrby("ttl:source", 1).await.unwrap();
    let payload = store.dump("ttl:source").await.unwrap().unwrap();

    for ms in [u64::MAX, i64::MAX as u64] {
        let res = store.restore("ttl:huge", Ttl::Millis(ms), &payload, true).await;

        assert!(matches!(res, Err(StoreError::CorruptPayload(_))));
        assert!(!store.exists("ttl:huge").await.unwrap());
    }
}

#[test]
fn shared_keyspace_between_clones() {
    let memory = Memory::new();
    let store = Store::new(memory.clone());

    tokio::runtime::Runtime::new().unwrap().block_on(async {
        store.incrby("n", 1).await.unwrap();
    });

    assert_eq!(memory.len(), 1);
}
