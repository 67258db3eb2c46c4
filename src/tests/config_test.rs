use std::path::PathBuf;

use test_env_log::test;

use crate::mirrordb::{ClusterRegistry, Connectors, ErrorKind};
use crate::mirrordb::balancer::BalancerType;
use crate::mirrordb::config::load_config_str;
use crate::mirrordb::sync::StrategyConfig;


const CONFIG: &str = r#"
num_workers: 2
state_dir: ${MIRRORDB_TEST_STATE_DIR:/tmp/mirrordb}
clusters:
  - id: orders
    balancer: load
    probe_query: SELECT 42
    probe_retries: 3
    lock_timeout_seconds: 5
    failure_detect_interval_seconds: 10
    backends:
      - id: primary
        weight: 2
        params:
          database: orders1
      - id: replica
        weight: 0
        params:
          database: ${MIRRORDB_TEST_REPLICA_DB}
    sync_strategies:
      - id: full
        type: full-refresh
        batch_size: 500
      - id: diff
        type: differential
      - id: passive
        type: passive
    default_sync: full
  - id: users
    backends:
      - id: only
"#;

fn load(yaml: &str) -> crate::mirrordb::Result<crate::mirrordb::config::Settings> {
    load_config_str(yaml, PathBuf::from("test.yaml"))
}

#[test]
#[serial_test::serial]
fn test_load_config() {
    std::env::set_var("MIRRORDB_TEST_REPLICA_DB", "orders2");
    let settings = load(CONFIG).unwrap();
    std::env::remove_var("MIRRORDB_TEST_REPLICA_DB");

    assert_eq!(settings.config_path, PathBuf::from("test.yaml"));
    assert_eq!(settings.num_workers, 2);
    assert_eq!(settings.state_dir, PathBuf::from("/tmp/mirrordb"));
    assert_eq!(settings.clusters.len(), 2);

    let orders = settings.cluster("orders").unwrap();
    assert_eq!(orders.balancer, BalancerType::Load);
    assert_eq!(orders.probe_query, "SELECT 42");
    assert_eq!(orders.probe_retries, 3);
    assert_eq!(orders.lock_timeout().as_secs(), 5);
    assert_eq!(orders.failure_detect_interval_seconds, 10);
    assert_eq!(orders.auto_activate_interval_seconds, 0);
    assert_eq!(orders.default_sync, "full");
    assert_eq!(orders.state_file, Some(PathBuf::from("/tmp/mirrordb/orders.state.yaml")));
    assert_eq!(orders.backends[1].params["database"], "orders2");
    assert_eq!(orders.backends[1].weight, 0);
    assert_eq!(orders.backends[1].connector, "memory");
    match &orders.sync_strategies[0].strategy {
        StrategyConfig::FullRefresh(c) => assert_eq!(c.batch_size, 500),
        other => panic!("unexpected strategy {}", other),
    }
    match &orders.sync_strategies[1].strategy {
        StrategyConfig::Differential(c) => assert_eq!(c.batch_size, 1000),
        other => panic!("unexpected strategy {}", other),
    }

    let users = settings.cluster("users").unwrap();
    assert_eq!(users.balancer, BalancerType::RoundRobin);
    assert_eq!(users.probe_query, "SELECT 1");
    assert_eq!(users.probe_retries, 1);
    assert_eq!(users.default_sync, "diff");
    let ids: Vec<_> = users.sync_strategies.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["passive", "full", "diff"]);
    assert_eq!(users.backends[0].weight, 1);
}

#[test]
#[serial_test::serial]
fn test_missing_env_var() {
    std::env::remove_var("MIRRORDB_TEST_REPLICA_DB");
    let err = load(CONFIG).err().unwrap();
    assert!(err.to_string().contains("MIRRORDB_TEST_REPLICA_DB"), "{}", err);
}

#[test]
fn test_unknown_default_strategy() {
    let yaml = r#"
clusters:
  - id: c
    default_sync: fastest
    backends:
      - id: a
"#;
    let err = load(yaml).err().unwrap();
    assert_eq!(err.kind(), &ErrorKind::UnknownStrategy("fastest".to_string()));
}

#[test]
fn test_unknown_strategy_type() {
    let yaml = r#"
clusters:
  - id: c
    backends:
      - id: a
    sync_strategies:
      - id: magic
        type: telepathy
"#;
    assert!(load(yaml).is_err());
}

#[test]
fn test_unknown_balancer() {
    let yaml = r#"
clusters:
  - id: c
    balancer: fastest
    backends:
      - id: a
"#;
    assert!(load(yaml).is_err());
}

#[test]
fn test_invalid_clusters() {
    let cases = [
        // no clusters
        "clusters: []\n",
        // no backends
        "clusters:\n  - id: c\n    backends: []\n",
        // duplicate backend
        "clusters:\n  - id: c\n    backends:\n      - id: a\n      - id: a\n",
        // duplicate cluster
        "clusters:\n  - id: c\n    backends:\n      - id: a\n  - id: c\n    backends:\n      - id: b\n",
        // zero batch size
        "clusters:\n  - id: c\n    backends:\n      - id: a\n    default_sync: f\n    sync_strategies:\n      - id: f\n        type: full-refresh\n        batch_size: 0\n",
    ];
    for yaml in cases {
        assert!(load(yaml).is_err(), "expected error for {}", yaml);
    }
}

#[test(tokio::test)]
async fn test_registry() {
    let yaml = r#"
state_dir: /tmp
clusters:
  - id: c1
    backends:
      - id: a
        params:
          database: a
  - id: c2
    backends:
      - id: b
        connector: postgres
"#;
    let settings = load(yaml).unwrap();
    // c2 names a connector that isn't registered
    assert!(ClusterRegistry::new(&settings, &Connectors::new()).is_err());

    let yaml = yaml.replace("connector: postgres", "connector: memory");
    let settings = load(&yaml).unwrap();
    let registry = ClusterRegistry::new(&settings, &Connectors::new()).unwrap();
    assert_eq!(registry.clusters().count(), 2);
    assert_eq!(registry.get("c1").unwrap().backends().len(), 1);
    assert_eq!(registry.get("nope").err().unwrap().kind(), &ErrorKind::UnknownCluster("nope".to_string()));
}
