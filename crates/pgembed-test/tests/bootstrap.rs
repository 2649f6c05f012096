//! Cluster creation tests.

use std::fs;

use pgembed::{BootstrapOutcome, EmbedError, ErrorCode};
use pgembed_common::CLUSTER_SUBDIRS;
use pgembed_engine::{Engine, InputChannel};
use pgembed_test::{TestCluster, BOOTSTRAP_TEMPLATE, TEST_USER};

#[test]
fn test_bootstrap_creates_layout() {
    let tc = TestCluster::new();
    let mut db = tc.handle();

    let outcome = db
        .initialize_cluster(tc.data_dir(), TEST_USER, None, None)
        .unwrap();
    assert_eq!(outcome, BootstrapOutcome::Created);

    let data = tc.data_dir();
    for sub in CLUSTER_SUBDIRS {
        assert!(data.join(sub).is_dir(), "missing {}", sub);
    }
    assert_eq!(fs::read_to_string(data.join("PG_VERSION")).unwrap(), "17\n");
    assert_eq!(fs::read(data.join("postgresql.conf")).unwrap().len(), 0);
    assert!(data.join("global/pg_control").is_file());
}

#[test]
fn test_bootstrap_substitutes_cluster_values() {
    let tc = TestCluster::new();
    let mut db = tc.handle();
    db.initialize_cluster(tc.data_dir(), "admin", Some("LATIN1"), Some("en_US"))
        .unwrap();

    let cluster = tc.cluster();
    assert!(cluster.has_role("admin"));
    assert!(!cluster.has_role("POSTGRES"));

    let postgres = cluster.database("postgres").unwrap();
    assert_eq!(postgres.encoding, 8);
    assert_eq!(postgres.collate, "en_US");
    assert_eq!(postgres.ctype, "en_US");

    let script = cluster.bootstrap_script();
    assert!(script.iter().any(|l| l == "insert ( 10 admin t t )"));
    assert!(script
        .iter()
        .any(|l| l == "insert ( 5 postgres 10 8 c en_US en_US _null_ _null_ )"));
    assert!(!script.iter().any(|l| l.contains("ENCODING")));
}

#[test]
fn test_bootstrap_defaults() {
    let tc = TestCluster::new();
    let mut db = tc.handle();
    db.initialize_cluster(tc.data_dir(), TEST_USER, None, None)
        .unwrap();

    let template1 = tc.cluster().database("template1").unwrap();
    assert_eq!(template1.encoding, 6);
    assert_eq!(template1.collate, "C");
}

#[test]
fn test_bootstrap_is_idempotent() {
    let tc = TestCluster::new();
    let mut db = tc.handle();
    db.initialize_cluster(tc.data_dir(), TEST_USER, None, None)
        .unwrap();
    let before = tc.snapshot();

    let outcome = db
        .initialize_cluster(tc.data_dir(), "other", Some("SQL_ASCII"), None)
        .unwrap();
    assert_eq!(outcome, BootstrapOutcome::AlreadyInitialized);
    assert_eq!(tc.snapshot(), before);
    assert_eq!(tc.cluster().bootstrap_runs(), 1);
}

#[test]
fn test_initialized_cluster_ignores_other_arguments() {
    let tc = TestCluster::new();
    let mut db = tc.handle();
    db.initialize_cluster(tc.data_dir(), TEST_USER, None, None)
        .unwrap();
    let before = tc.snapshot();

    let outcome = db
        .initialize_cluster(tc.data_dir(), TEST_USER, Some("KLINGON"), None)
        .unwrap();
    assert_eq!(outcome, BootstrapOutcome::AlreadyInitialized);

    let long_name = "u".repeat(80);
    let outcome = db
        .initialize_cluster(tc.data_dir(), &long_name, Some("LATIN1"), Some("xx_YY"))
        .unwrap();
    assert_eq!(outcome, BootstrapOutcome::AlreadyInitialized);

    assert_eq!(tc.snapshot(), before);
    assert_eq!(tc.cluster().bootstrap_runs(), 1);
    assert!(db.last_error_message().is_empty());
}

#[test]
fn test_bootstrap_into_existing_empty_directory() {
    let tc = TestCluster::new();
    fs::create_dir(tc.data_dir()).unwrap();

    let mut db = tc.handle();
    let outcome = db
        .initialize_cluster(tc.data_dir(), TEST_USER, None, None)
        .unwrap();
    assert_eq!(outcome, BootstrapOutcome::Created);
    assert!(tc.data_dir().join("PG_VERSION").is_file());
}

#[test]
fn test_bootstrap_failure_leaves_no_cluster() {
    // An unknown placeholder survives substitution and breaks an integer column.
    let template = BOOTSTRAP_TEMPLATE.replace(
        "insert ( 5 postgres 10 ENCODING",
        "insert ( 5 postgres 10 SERVER_ENCODING",
    );
    let tc = TestCluster::with_template(&template);
    let mut db = tc.handle();

    let err = db
        .initialize_cluster(tc.data_dir(), TEST_USER, None, None)
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InitFailed);
    assert!(db.last_error_message().contains("SERVER_ENCODING"));
    assert!(!tc.data_dir().exists());

    assert!(db.engine_mut().replace_input(InputChannel::Stdin).is_stdin());
}

#[test]
fn test_bootstrap_failure_keeps_preexisting_directory() {
    let tc = TestCluster::new();
    fs::create_dir(tc.data_dir()).unwrap();
    fs::write(tc.data_dir().join("keep.txt"), "mine").unwrap();

    let mut db = tc.handle();
    db.engine_mut().fail_bootstrap();
    db.initialize_cluster(tc.data_dir(), TEST_USER, None, None)
        .unwrap_err();

    assert!(tc.data_dir().join("keep.txt").is_file());
    assert!(!tc.data_dir().join("PG_VERSION").exists());

    // Not mistaken for a cluster: a retry bootstraps for real.
    let outcome = db
        .initialize_cluster(tc.data_dir(), TEST_USER, None, None)
        .unwrap();
    assert_eq!(outcome, BootstrapOutcome::Created);
}

#[test]
fn test_bootstrap_rejects_bad_arguments() {
    let tc = TestCluster::new();
    let mut db = tc.handle();

    let err = db
        .initialize_cluster(tc.data_dir(), "", None, None)
        .unwrap_err();
    assert!(matches!(err, EmbedError::InvalidArgument(_)));
    assert!(!db.last_error_message().is_empty());

    let err = db
        .initialize_cluster(tc.data_dir(), TEST_USER, Some("NOPE"), None)
        .unwrap_err();
    assert!(matches!(err, EmbedError::Init { .. }));
    assert!(db.last_error_message().contains("NOPE"));
    assert!(!tc.data_dir().exists());
}

#[test]
fn test_bootstrap_refused_while_running() {
    let tc = TestCluster::new();
    let mut db = tc.started();
    let err = db
        .initialize_cluster(tc.path().join("other"), TEST_USER, None, None)
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InitFailed);
    assert!(!tc.path().join("other").exists());
}
