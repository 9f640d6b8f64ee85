// tests/guard_concurrency.rs
//
// The duplicate guard hands out exactly one licence per key, whether the
// callers are sequential, concurrent tasks on one pool, or separate pools
// (standing in for separate processes) on the same SQLite file.

use billwatch::bill::{BillKey, ChamberType};
use billwatch::store::SeenStore;

fn key(n: u32) -> BillKey {
    BillKey::new(119, ChamberType::HR, n).unwrap()
}

#[tokio::test]
async fn sequential_calls_yield_true_then_false() {
    let store = SeenStore::in_memory().await.unwrap();
    let k = key(42);
    assert!(store.check_and_mark_seen(&k).await.unwrap());
    assert!(!store.check_and_mark_seen(&k).await.unwrap());
    assert_eq!(store.count_seen().await.unwrap(), 1);
}

#[tokio::test]
async fn two_pools_on_one_file_never_both_win() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("seen.sqlite");
    let a = SeenStore::open(&path).await.unwrap();
    let b = SeenStore::open(&path).await.unwrap();

    for n in 1..=25 {
        let k = key(n);
        let (ra, rb) = tokio::join!(a.check_and_mark_seen(&k), b.check_and_mark_seen(&k));
        let (ra, rb) = (ra.unwrap(), rb.unwrap());
        assert!(ra ^ rb, "exactly one caller must win for {k}: ({ra}, {rb})");
    }
    assert_eq!(a.count_seen().await.unwrap(), 25);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn many_tasks_single_licence() {
    let dir = tempfile::tempdir().unwrap();
    let store = SeenStore::open(dir.path().join("seen.sqlite")).await.unwrap();
    let k = key(7);

    let mut handles = Vec::new();
    for _ in 0..16 {
        let s = store.clone();
        let k = k.clone();
        handles.push(tokio::spawn(async move { s.check_and_mark_seen(&k).await.unwrap() }));
    }
    let mut wins = 0;
    for h in handles {
        if h.await.unwrap() {
            wins += 1;
        }
    }
    assert_eq!(wins, 1);
    assert!(store.seen_record(&k).await.unwrap().is_some());
}

#[tokio::test]
async fn identity_includes_congress() {
    let store = SeenStore::in_memory().await.unwrap();
    let old = BillKey::new(118, ChamberType::HR, 42).unwrap();
    let new = BillKey::new(119, ChamberType::HR, 42).unwrap();
    assert!(store.check_and_mark_seen(&old).await.unwrap());
    assert!(store.check_and_mark_seen(&new).await.unwrap());
    assert_eq!(
        store.high_water_mark(119, &ChamberType::HR).await.unwrap(),
        Some(42)
    );
    assert_eq!(store.high_water_mark(119, &ChamberType::S).await.unwrap(), None);
}

#[tokio::test]
async fn guard_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("seen.sqlite");
    {
        let s = SeenStore::open(&path).await.unwrap();
        assert!(s.check_and_mark_seen(&key(1)).await.unwrap());
        s.close().await;
    }
    let s = SeenStore::open(&path).await.unwrap();
    assert!(s.exists(&key(1)).await.unwrap());
    assert!(!s.check_and_mark_seen(&key(1)).await.unwrap());
}
