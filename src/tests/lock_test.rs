use std::sync::Arc;
use std::time::Duration;

use test_env_log::test;
use tokio::time::timeout;

use crate::mirrordb::ErrorKind;
use crate::mirrordb::lock::{LockManager, GLOBAL_LOCK};


#[test(tokio::test)]
async fn test_read_locks_are_shared() {
    let locks = LockManager::new(Duration::from_secs(1));
    let _a = locks.read_lock("t").await.unwrap();
    let _b = locks.read_lock("t").await.unwrap();
    let _c = locks.read_lock(GLOBAL_LOCK).await.unwrap();
}

#[test(tokio::test)]
async fn test_named_write_lock_excludes_readers() {
    let locks = LockManager::new(Duration::from_millis(50));
    let guard = locks.write_lock("t").await.unwrap();

    let err = locks.read_lock("t").await.err().unwrap();
    assert_eq!(err.kind(), &ErrorKind::LockTimeout("t".to_string()));
    // other names are unaffected
    let _other = locks.write_lock("u").await.unwrap();

    drop(guard);
    let _reader = locks.read_lock("t").await.unwrap();
}

#[test(tokio::test)]
async fn test_global_write_lock_excludes_named_locks() {
    let locks = LockManager::new(Duration::from_millis(50));
    let global = locks.write_lock(GLOBAL_LOCK).await.unwrap();

    assert!(locks.read_lock("t").await.is_err());
    assert!(locks.write_lock("u").await.is_err());
    assert!(locks.read_lock(GLOBAL_LOCK).await.is_err());

    drop(global);
    let _named = locks.write_lock("t").await.unwrap();
    // a named lock holds the global read lock
    assert!(locks.write_lock(GLOBAL_LOCK).await.is_err());
}

#[test(tokio::test)]
async fn test_zero_timeout_waits() {
    let locks = Arc::new(LockManager::new(Duration::from_secs(0)));
    let guard = locks.write_lock(GLOBAL_LOCK).await.unwrap();

    let waiter = {
        let locks = locks.clone();
        tokio::spawn(async move {
            locks.read_lock("t").await.map(|_| ())
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiter.is_finished());

    drop(guard);
    timeout(Duration::from_secs(1), waiter).await
        .expect("reader should acquire the lock once the writer is done")
        .unwrap()
        .unwrap();
}
