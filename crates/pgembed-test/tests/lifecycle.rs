//! Startup and shutdown tests.

use pgembed::{
    DurabilityConfig, EmbedConfig, EmbedError, Embedded, EngineState, ErrorCode, TransactionState,
};
use pgembed_engine::{Engine, StartupPhase, StartupStep};
use pgembed_test::{TestCluster, TEST_DATABASE, TEST_USER};

/// The bring-up order, without option overrides.
const BRING_UP: &[StartupPhase] = &[
    StartupPhase::RecordProcessStart,
    StartupPhase::InitMemoryContexts,
    StartupPhase::SetExecPath,
    StartupPhase::SetDataDir,
    StartupPhase::InitStandaloneProcess,
    StartupPhase::InitializeOptions,
    StartupPhase::SelectConfigFiles,
    StartupPhase::CheckDataDir,
    StartupPhase::ChangeToDataDir,
    StartupPhase::CreateLockFile,
    StartupPhase::ReadControlFile,
    StartupPhase::ProcessPreloadLibraries,
    StartupPhase::InitializeMaxBackends,
    StartupPhase::InitChildSlots,
    StartupPhase::InitializeFastPathLocks,
    StartupPhase::ProcessShmemRequests,
    StartupPhase::InitializeShmemOptions,
    StartupPhase::InitializeWalConsistencyChecking,
    StartupPhase::CreateSharedMemory,
    StartupPhase::SetMaxSafeFds,
    StartupPhase::RecordSessionStart,
    StartupPhase::InitProcess,
    StartupPhase::BaseInit,
    StartupPhase::ConnectDatabase,
    StartupPhase::ReleaseStartupContext,
    StartupPhase::SetNormalProcessing,
    StartupPhase::DisableOutput,
    StartupPhase::CreateMessageContext,
];

#[test]
fn test_start_runs_steps_in_order() {
    let tc = TestCluster::new();
    let db = tc.started();

    assert_eq!(db.state(), EngineState::Initialized);
    assert_eq!(db.engine().phases(), BRING_UP);
    assert_eq!(db.engine().database(), Some(TEST_DATABASE));
    assert!(db.engine().holds_lock());

    // Smoke test: one empty committed transaction, SPI released.
    assert_eq!(db.engine().commit_count(), 1);
    assert!(!db.engine().is_spi_connected());
    assert!(!db.engine().is_transaction_state());
}

#[test]
fn test_start_is_idempotent() {
    let tc = TestCluster::new();
    let mut db = tc.started();
    let steps = db.engine().journal().len();

    db.start(tc.data_dir(), TEST_DATABASE, TEST_USER, false)
        .unwrap();
    assert_eq!(db.engine().journal().len(), steps);
    assert_eq!(db.state(), EngineState::Initialized);
}

#[test]
fn test_exec_path_failure_falls_back() {
    let tc = TestCluster::new();
    let mut db = tc.handle();
    db.initialize_cluster(tc.data_dir(), TEST_USER, None, None)
        .unwrap();
    db.engine_mut().fail_exec_path();
    db.set_progname("my_app");

    db.start(tc.data_dir(), TEST_DATABASE, TEST_USER, false)
        .unwrap();
    assert_eq!(
        db.engine().exec_path(),
        Some(std::path::Path::new("my_app"))
    );
}

#[test]
fn test_overrides_applied_before_config_files() {
    let tc = TestCluster::new();
    let mut db = tc.handle();
    db.initialize_cluster(tc.data_dir(), TEST_USER, None, None)
        .unwrap();
    db.set_durability_config(DurabilityConfig {
        fsync: false,
        synchronous_commit: true,
        full_page_writes: false,
    });

    db.start(tc.data_dir(), TEST_DATABASE, TEST_USER, true)
        .unwrap();

    let engine = db.engine();
    assert_eq!(engine.option("allow_system_table_mods"), Some("on"));
    assert_eq!(engine.option("fsync"), Some("off"));
    assert_eq!(engine.option("synchronous_commit"), None);
    assert_eq!(engine.option("full_page_writes"), Some("off"));

    let phases = engine.phases();
    let last_option = phases
        .iter()
        .rposition(|p| *p == StartupPhase::SetOption)
        .unwrap();
    let defaults = phases
        .iter()
        .position(|p| *p == StartupPhase::InitializeOptions)
        .unwrap();
    let files = phases
        .iter()
        .position(|p| *p == StartupPhase::SelectConfigFiles)
        .unwrap();
    assert!(defaults < last_option && last_option < files);
}

#[test]
fn test_durability_defaults_add_no_overrides() {
    let tc = TestCluster::new();
    let db = tc.started();
    assert!(!db
        .engine()
        .journal()
        .iter()
        .any(|s| matches!(s, StartupStep::SetOption { .. })));
}

#[test]
fn test_lock_conflict() {
    let tc = TestCluster::new();
    let mut first = tc.started();

    let mut second = tc.handle();
    let err = second
        .start(tc.data_dir(), TEST_DATABASE, TEST_USER, false)
        .unwrap_err();
    assert!(err.is_lock_conflict());
    assert_eq!(err.code(), ErrorCode::ClusterInUse);
    assert!(second.last_error_message().starts_with("Cluster in use"));
    assert_eq!(second.state(), EngineState::Uninitialized);
    assert!(!second
        .engine()
        .phases()
        .contains(&StartupPhase::ConnectDatabase));

    // The owner is unaffected.
    first.execute("SELECT 1").unwrap();
    assert!(first.engine().holds_lock());
}

#[test]
fn test_connect_failure_reports_engine_text() {
    let tc = TestCluster::new();
    let mut db = tc.handle();
    db.initialize_cluster(tc.data_dir(), TEST_USER, None, None)
        .unwrap();

    let err = db
        .start(tc.data_dir(), "nosuchdb", TEST_USER, false)
        .unwrap_err();
    assert!(matches!(err, EmbedError::Init { .. }));
    assert_eq!(
        db.last_error_message(),
        "Initialization failed: database \"nosuchdb\" does not exist"
    );
    assert_eq!(db.state(), EngineState::Uninitialized);

    // Resources were released, so a corrected start succeeds.
    assert!(!db.engine().holds_lock());
    db.start(tc.data_dir(), TEST_DATABASE, TEST_USER, false)
        .unwrap();
}

#[test]
fn test_start_stops_at_first_failure() {
    let tc = TestCluster::new();
    let mut db = tc.handle();
    db.initialize_cluster(tc.data_dir(), TEST_USER, None, None)
        .unwrap();
    db.engine_mut().fail_at(StartupPhase::CreateSharedMemory);

    let err = db
        .start(tc.data_dir(), TEST_DATABASE, TEST_USER, false)
        .unwrap_err();
    assert!(err.to_string().starts_with("Initialization failed:"));
    assert_eq!(
        db.engine().phases().last(),
        Some(&StartupPhase::CreateSharedMemory)
    );
}

#[test]
fn test_start_requires_arguments() {
    let tc = TestCluster::new();
    let mut db = tc.handle();
    let err = db.start(tc.data_dir(), TEST_DATABASE, "", false).unwrap_err();
    assert!(matches!(err, EmbedError::InvalidArgument(_)));
    assert!(db.engine().journal().is_empty());
}

#[test]
fn test_shutdown_and_restart() {
    let tc = TestCluster::new();
    let mut db = tc.started();
    db.execute("CREATE TABLE t (id int)").unwrap();

    db.shutdown();
    assert_eq!(db.state(), EngineState::ShutDown);
    assert!(db.engine().has_exited());
    assert!(!db.engine().holds_lock());

    // Operations after shutdown are rejected.
    let err = db.execute("SELECT count(*) FROM t").unwrap_err();
    assert!(matches!(err, EmbedError::NotInitialized));
    assert_eq!(db.last_error_message(), "Not initialized");
    for err in [
        db.begin().unwrap_err(),
        db.commit().unwrap_err(),
        db.rollback().unwrap_err(),
    ] {
        assert!(err.is_state_error(), "{}", err);
        assert!(matches!(err, EmbedError::NotInitialized));
    }
    assert_eq!(db.transaction_state(), TransactionState::NoTransaction);

    // Shutdown twice is harmless.
    db.shutdown();

    db.start(tc.data_dir(), TEST_DATABASE, TEST_USER, false)
        .unwrap();
    let result = db.execute("SELECT count(*) FROM t").unwrap();
    assert_eq!(result.scalar(), Some("0"));
}

#[test]
fn test_shutdown_aborts_open_transaction() {
    let tc = TestCluster::new();
    let mut db = tc.started();
    db.execute("CREATE TABLE t (id int)").unwrap();
    db.begin().unwrap();
    db.execute("INSERT INTO t VALUES (1)").unwrap();

    db.shutdown();
    assert_eq!(db.transaction_state(), pgembed::TransactionState::NoTransaction);

    db.start(tc.data_dir(), TEST_DATABASE, TEST_USER, false)
        .unwrap();
    let result = db.execute("SELECT count(*) FROM t").unwrap();
    assert_eq!(result.scalar(), Some("0"));
}

#[test]
fn test_shutdown_swallows_exit_errors() {
    let tc = TestCluster::new();
    let mut db = tc.started();
    db.engine_mut().fail_exit();
    db.shutdown();
    assert_eq!(db.state(), EngineState::ShutDown);
}

#[test]
fn test_drop_releases_lock() {
    let tc = TestCluster::new();
    {
        let _db = tc.started();
        assert!(tc.data_dir().join("postmaster.pid").exists());
    }
    assert!(!tc.data_dir().join("postmaster.pid").exists());
    tc.started();
}

#[test]
fn test_open_from_config() {
    let tc = TestCluster::new();
    let config = EmbedConfig::builder()
        .data_dir(tc.data_dir())
        .bootstrap_template(tc.bootstrap_config().template)
        .scratch_dir(tc.path())
        .durability(DurabilityConfig::unsafe_fast())
        .build();

    let mut db = Embedded::open(tc.engine(), &config).unwrap();
    assert!(db.is_initialized());
    assert_eq!(db.data_dir(), Some(tc.data_dir().as_path()));
    assert_eq!(db.engine().option("fsync"), Some("off"));
    db.execute("SELECT 1").unwrap();
}

#[test]
fn test_open_rejects_invalid_config() {
    let tc = TestCluster::new();
    let config = EmbedConfig::builder()
        .data_dir(tc.data_dir())
        .database("")
        .build();
    let err = Embedded::open(tc.engine(), &config).unwrap_err();
    assert_eq!(err.code(), ErrorCode::Configuration);
}
