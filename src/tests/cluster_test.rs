use std::collections::BTreeSet;
use std::time::Duration;

use test_env_log::test;

use crate::tests::common::{self, person, TestCluster, TABLE};
use crate::mirrordb::{Cluster, Connectors, Error, ErrorKind};
use crate::mirrordb::cluster::StateStore;
use crate::mirrordb::db::TableMetaData;


fn assert_partitioned(tc: &TestCluster) {
    let active: BTreeSet<_> = tc.active_ids().into_iter().collect();
    let inactive: BTreeSet<_> = tc.inactive_ids().into_iter().collect();
    assert!(active.is_disjoint(&inactive), "active {:?} and inactive {:?} overlap", active, inactive);
    let all: BTreeSet<_> = tc.cluster.backends().iter().map(|b| b.id().to_string()).collect();
    assert_eq!(active.union(&inactive).cloned().collect::<BTreeSet<_>>(), all);
}

#[test(tokio::test)]
async fn test_start_probes_backends() {
    let tc = TestCluster::new(common::settings("start_probes", &[("a", 1), ("b", 1), ("c", 1)])).await;
    tc.db("b").set_online(false);
    tc.cluster.start().await.unwrap();

    assert_eq!(tc.active_ids(), vec!["a", "c"]);
    assert_eq!(tc.inactive_ids(), vec!["b"]);
}

#[test(tokio::test)]
async fn test_active_and_inactive_partition_backends() {
    let tc = TestCluster::started("partition", &[("a", 1), ("b", 1), ("c", 1)]).await;
    assert_partitioned(&tc);

    let steps: &[(&str, bool)] = &[
        ("b", false), ("a", false), ("b", true), ("c", false),
        ("c", false), ("a", true), ("c", true), ("b", true),
    ];
    for (id, activate) in steps {
        if *activate {
            tc.cluster.activate(id, Some("passive")).await.unwrap();
        } else {
            tc.cluster.deactivate(id).await.unwrap();
        }
        assert_partitioned(&tc);
        assert_eq!(tc.cluster.is_active(&tc.backend(id)), *activate);
    }
}

#[test(tokio::test)]
async fn test_deactivate_is_idempotent() {
    let tc = TestCluster::started("deactivate_twice", &[("a", 1), ("b", 1)]).await;
    assert!(tc.cluster.deactivate("b").await.unwrap());
    assert!(!tc.cluster.deactivate("b").await.unwrap());
    assert_eq!(tc.active_ids(), vec!["a"]);
}

#[test(tokio::test)]
async fn test_activate_active_backend_is_noop() {
    let tc = TestCluster::started("activate_twice", &[("a", 1), ("b", 1)]).await;
    assert!(!tc.cluster.activate("b", None).await.unwrap());
    assert_eq!(tc.db("a").count_statements("SELECT * FROM people FOR UPDATE"), 0);
}

#[test(tokio::test)]
async fn test_unknown_ids() {
    let tc = TestCluster::started("unknown_ids", &[("a", 1), ("b", 1)]).await;
    tc.cluster.deactivate("b").await.unwrap();

    let err = tc.cluster.activate("x", None).await.unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::UnknownBackend("x".to_string()));
    let err = tc.cluster.deactivate("x").await.unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::UnknownBackend("x".to_string()));
    let err = tc.cluster.activate("b", Some("nope")).await.unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::UnknownStrategy("nope".to_string()));
    assert_eq!(tc.inactive_ids(), vec!["b"]);
}

#[test(tokio::test)]
async fn test_activate_synchronizes_from_primary() {
    let tc = TestCluster::started("activate_sync", &[("a", 1), ("b", 1)]).await;
    tc.cluster.deactivate("b").await.unwrap();

    tc.db("a").put_rows(TABLE, vec![person(1, "ann"), person(2, "bob")]).unwrap();
    tc.db("b").put_rows(TABLE, vec![person(2, "robert"), person(3, "cat")]).unwrap();

    assert!(tc.cluster.activate("b", None).await.unwrap());
    assert_eq!(tc.active_ids(), vec!["a", "b"]);
    assert_eq!(tc.db("b").rows(TABLE).unwrap(), tc.db("a").rows(TABLE).unwrap());
    // the source was locked, and only read
    assert_eq!(tc.db("a").count_statements("SELECT * FROM people FOR UPDATE"), 1);
    assert_eq!(tc.db("a").count_statements("ROLLBACK"), 1);
    assert_eq!(tc.db("a").count_statements("COMMIT"), 0);
}

#[test(tokio::test)]
async fn test_activate_without_active_backends() {
    let tc = TestCluster::started("activate_empty", &[("a", 1), ("b", 1)]).await;
    tc.cluster.deactivate("a").await.unwrap();
    tc.cluster.deactivate("b").await.unwrap();
    assert!(tc.active_ids().is_empty());

    tc.db("b").put_rows(TABLE, vec![person(1, "ann")]).unwrap();
    assert!(tc.cluster.activate("b", Some("full")).await.unwrap());
    assert_eq!(tc.active_ids(), vec!["b"]);
    // nothing to synchronize from
    assert_eq!(tc.db("b").rows(TABLE).unwrap(), vec![person(1, "ann")]);
    assert_eq!(tc.db("b").count_statements("DELETE FROM people"), 0);
}

#[test(tokio::test)]
async fn test_failed_activation_leaves_backend_inactive() {
    let tc = TestCluster::started("activate_fails", &[("a", 1), ("b", 1)]).await;
    tc.cluster.deactivate("b").await.unwrap();
    tc.db("a").put_rows(TABLE, vec![person(1, "ann")]).unwrap();
    tc.db("b").reject_statements(Some("INSERT INTO")).unwrap();

    let err = tc.cluster.activate("b", Some("full")).await.unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::Synchronization { backend: String::new(), cause: Error::new("") });
    assert_eq!(err.backend_id(), Some("b"));
    assert!(err.cause().is_some());
    assert_eq!(tc.inactive_ids(), vec!["b"]);

    tc.db("b").reject_statements(None).unwrap();
    assert!(tc.cluster.activate("b", Some("full")).await.unwrap());
    assert_eq!(tc.db("b").rows(TABLE).unwrap(), vec![person(1, "ann")]);
}

#[test(tokio::test)]
async fn test_activate_unreachable_backend_fails() {
    let tc = TestCluster::started("activate_unreachable", &[("a", 1), ("b", 1)]).await;
    tc.cluster.deactivate("b").await.unwrap();
    tc.db("b").set_online(false);

    let err = tc.cluster.activate("b", Some("passive")).await.unwrap_err();
    assert_eq!(err.backend_id(), Some("b"));
    assert_eq!(tc.inactive_ids(), vec!["b"]);
}

#[test(tokio::test)]
async fn test_handle_failure() {
    let tc = TestCluster::started("handle_failure", &[("a", 1), ("b", 1)]).await;
    let b = tc.backend("b");

    // b is alive, so the failure was a rejection
    let err = tc.cluster.handle_failure(&b, Error::new("constraint violated")).await.unwrap_err();
    assert_eq!(err.backend_id(), Some("b"));
    assert!(tc.cluster.is_active(&b));

    tc.db("b").set_online(false);
    tc.cluster.handle_failure(&b, Error::new("connection reset")).await.unwrap();
    assert!(!tc.cluster.is_active(&b));
}

#[test(tokio::test)]
#[serial_test::serial]
async fn test_membership_survives_restart() {
    let settings = common::settings("restart", &[("a", 1), ("b", 1), ("c", 1)]);
    {
        let tc = TestCluster::new(settings.clone()).await;
        tc.cluster.start().await.unwrap();
        tc.cluster.deactivate("b").await.unwrap();

        let persisted = tc.cluster.state_store().load().await.unwrap().unwrap();
        assert_eq!(persisted.into_iter().collect::<Vec<_>>(), vec!["a", "c"]);

        // a second cluster reading the same state file, b is online but stays inactive
        let restarted = Cluster::new(&settings, &Connectors::new()).unwrap();
        restarted.start().await.unwrap();
        let active: Vec<_> = restarted.active_backends().iter().map(|b| b.id().to_string()).collect();
        assert_eq!(active, vec!["a", "c"]);
        restarted.stop();
    }
    assert!(!common::state_file("restart").exists());
}

#[test(tokio::test)]
#[serial_test::serial]
async fn test_state_store_replaces_file() {
    let dir = std::env::temp_dir().join(format!("mirrordb-state-{}", std::process::id()));
    let store = StateStore::new(dir.join("nested").join("c.state.yaml"));
    assert_eq!(store.load().await.unwrap(), None);

    store.save("c", || ["a", "b"].iter().map(|s| s.to_string()).collect()).await.unwrap();
    store.save("c", || ["b"].iter().map(|s| s.to_string()).collect()).await.unwrap();
    let active = store.load().await.unwrap().unwrap();
    assert_eq!(active.into_iter().collect::<Vec<_>>(), vec!["b"]);
    assert!(!store.tmp_path().exists());

    store.clear().await.unwrap();
    assert_eq!(store.load().await.unwrap(), None);
    let _ = std::fs::remove_dir_all(&dir);
}

#[test(tokio::test)]
async fn test_failure_detection_schedule() {
    let mut settings = common::settings("failure_detection", &[("a", 1), ("b", 1)]);
    settings.failure_detect_interval_seconds = 1;
    let tc = TestCluster::new(settings).await;
    tc.cluster.start().await.unwrap();

    tc.db("b").set_online(false);
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(tc.active_ids(), vec!["a"]);
}

#[test(tokio::test)]
async fn test_auto_activation_schedule() {
    let mut settings = common::settings("auto_activation", &[("a", 1), ("b", 1)]);
    settings.auto_activate_interval_seconds = 1;
    let tc = TestCluster::new(settings).await;
    tc.cluster.start().await.unwrap();
    tc.db("a").put_rows(TABLE, vec![person(1, "ann")]).unwrap();

    tc.db("b").set_online(false);
    tc.cluster.deactivate("b").await.unwrap();
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(tc.inactive_ids(), vec!["b"]);

    tc.db("b").set_online(true);
    tokio::time::sleep(Duration::from_millis(2000)).await;
    assert_eq!(tc.active_ids(), vec!["a", "b"]);
    assert_eq!(tc.db("b").rows(TABLE).unwrap(), vec![person(1, "ann")]);
}

#[test(tokio::test)]
async fn test_stop_ends_schedules() {
    let mut settings = common::settings("stop_schedules", &[("a", 1), ("b", 1)]);
    settings.failure_detect_interval_seconds = 1;
    let tc = TestCluster::new(settings).await;
    tc.cluster.start().await.unwrap();
    tc.cluster.stop();
    assert!(tc.cluster.is_stopped());

    tc.db("b").set_online(false);
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(tc.active_ids(), vec!["a", "b"]);
}

#[test(tokio::test)]
async fn test_metadata_cache() {
    let tc = TestCluster::started("metadata_cache", &[("a", 1)]).await;
    let a = tc.backend("a");
    let conn = a.connect().await.unwrap();

    assert_eq!(tc.cluster.metadata(&a, &*conn).await.unwrap().tables.len(), 1);
    tc.db("a").create_table(TableMetaData::new("pets", &[("id", "int")], &[0]));
    assert_eq!(tc.cluster.metadata(&a, &*conn).await.unwrap().tables.len(), 1);

    tc.cluster.flush_metadata_cache();
    assert_eq!(tc.cluster.metadata(&a, &*conn).await.unwrap().tables.len(), 2);
}
