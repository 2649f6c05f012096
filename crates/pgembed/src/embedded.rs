//! The embedded engine handle.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use pgembed_common::{BootstrapConfig, DurabilityConfig, EmbedConfig, DEFAULT_PROGNAME};
use pgembed_engine::Engine;
use tracing::{debug, info};

use crate::bootstrap::{BootstrapOutcome, Bootstrapper};
use crate::error::{EmbedError, EmbedResult};
use crate::lifecycle::{self, StartOptions};
use crate::query;
use crate::result::ResultSet;
use crate::txn::{TransactionCoordinator, TransactionState};

/// Lifecycle state of an [`Embedded`] handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Never started.
    Uninitialized,
    /// Started and accepting statements.
    Initialized,
    /// Shut down. May be started again.
    ShutDown,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::Uninitialized => write!(f, "uninitialized"),
            EngineState::Initialized => write!(f, "initialized"),
            EngineState::ShutDown => write!(f, "shut down"),
        }
    }
}

/// Counters for one handle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmbeddedStats {
    /// Statements that completed.
    pub statements_executed: u64,
    /// Statements that failed.
    pub statements_failed: u64,
    /// Explicit transactions committed.
    pub transactions_committed: u64,
    /// Explicit transactions rolled back, including failed commits.
    pub transactions_rolled_back: u64,
    /// Time since the last successful start.
    pub uptime: Option<Duration>,
}

/// An engine running inside this process.
///
/// The handle owns the engine and every piece of state the embedding layer
/// keeps about it. All operations are synchronous; wrap the handle in a
/// [`SharedEmbedded`](crate::SharedEmbedded) to call it from several
/// threads.
///
/// Every failing operation stores its message, which stays available from
/// [`last_error_message`](Self::last_error_message) until the next failure.
///
/// # Example
///
/// ```rust,no_run
/// use pgembed::{EmbedResult, Embedded};
/// use pgembed_engine::Engine;
///
/// fn run<E: Engine>(engine: E) -> EmbedResult<()> {
///     let mut db = Embedded::new(engine);
///     db.initialize_cluster("/var/lib/myapp/pgdata", "postgres", None, None)?;
///     db.start("/var/lib/myapp/pgdata", "postgres", "postgres", false)?;
///
///     db.execute("CREATE TABLE users (id int, name text)")?;
///     db.execute("INSERT INTO users VALUES (1, 'Alice')")?;
///     let result = db.execute("SELECT * FROM users")?;
///     println!("{}", result.display());
///
///     db.shutdown();
///     Ok(())
/// }
/// ```
pub struct Embedded<E: Engine> {
    engine: E,
    state: EngineState,
    coordinator: TransactionCoordinator,
    last_error: String,
    bootstrap: BootstrapConfig,
    durability: DurabilityConfig,
    progname: String,
    data_dir: Option<PathBuf>,
    started_at: Option<Instant>,
    statements_executed: u64,
    statements_failed: u64,
}

impl<E: Engine> Embedded<E> {
    /// Wraps an engine that has not been started.
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            state: EngineState::Uninitialized,
            coordinator: TransactionCoordinator::new(),
            last_error: String::new(),
            bootstrap: BootstrapConfig::default(),
            durability: DurabilityConfig::default(),
            progname: DEFAULT_PROGNAME.to_string(),
            data_dir: None,
            started_at: None,
            statements_executed: 0,
            statements_failed: 0,
        }
    }

    /// Creates the cluster described by `config` if needed and starts the
    /// engine on it.
    pub fn open(engine: E, config: &EmbedConfig) -> EmbedResult<Self> {
        config.validate()?;

        let mut db = Self::new(engine);
        db.set_bootstrap_config(config.bootstrap.clone());
        db.set_durability_config(config.durability);
        db.set_progname(config.progname.clone());

        db.initialize_cluster(
            &config.data_dir,
            &config.username,
            config.encoding.as_deref(),
            config.locale.as_deref(),
        )?;
        db.start(
            &config.data_dir,
            &config.database,
            &config.username,
            config.allow_system_catalog_mods,
        )?;
        Ok(db)
    }

    // =========================================================================
    // Settings
    // =========================================================================

    /// Sets the template and scratch settings used by
    /// [`initialize_cluster`](Self::initialize_cluster).
    pub fn set_bootstrap_config(&mut self, config: BootstrapConfig) {
        self.bootstrap = config;
    }

    /// Returns the bootstrap settings.
    pub fn bootstrap_config(&self) -> &BootstrapConfig {
        &self.bootstrap
    }

    /// Sets the durability switches. They take effect at the next start.
    pub fn set_durability_config(&mut self, config: DurabilityConfig) {
        if self.state == EngineState::Initialized {
            debug!("Durability settings change applies at the next start");
        }
        self.durability = config;
    }

    /// Returns the durability switches for the next start.
    pub fn durability_config(&self) -> DurabilityConfig {
        self.durability
    }

    /// Sets the program name used to locate the executable.
    pub fn set_progname(&mut self, progname: impl Into<String>) {
        self.progname = progname.into();
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Creates a cluster at `path` with `username` as superuser.
    ///
    /// Does nothing if the directory already holds a cluster. `encoding`
    /// defaults to UTF8 and `locale` to C.
    pub fn initialize_cluster(
        &mut self,
        path: impl AsRef<Path>,
        username: &str,
        encoding: Option<&str>,
        locale: Option<&str>,
    ) -> EmbedResult<BootstrapOutcome> {
        let result = if self.state == EngineState::Initialized {
            Err(EmbedError::init(
                "cannot bootstrap a cluster while the engine is running",
            ))
        } else {
            Bootstrapper::new(&self.bootstrap).initialize(
                &mut self.engine,
                path.as_ref(),
                username,
                encoding,
                locale,
            )
        };
        self.record(result)
    }

    /// Starts the engine on the cluster at `path`, connected to `database`
    /// as `username`.
    ///
    /// Does nothing if already started.
    pub fn start(
        &mut self,
        path: impl AsRef<Path>,
        database: &str,
        username: &str,
        allow_system_catalog_mods: bool,
    ) -> EmbedResult<()> {
        if self.state == EngineState::Initialized {
            info!("Already initialized");
            return Ok(());
        }

        let path = path.as_ref();
        let opts = StartOptions {
            data_dir: path,
            database,
            username,
            allow_system_catalog_mods,
            progname: &self.progname,
            durability: &self.durability,
        };
        let result = lifecycle::start(&mut self.engine, &opts);
        if result.is_ok() {
            self.state = EngineState::Initialized;
            self.data_dir = Some(path.to_path_buf());
            self.started_at = Some(Instant::now());
        }
        self.record(result)
    }

    /// Shuts the engine down. Does nothing unless started; never fails.
    pub fn shutdown(&mut self) {
        if self.state != EngineState::Initialized {
            return;
        }
        self.coordinator.reset(&mut self.engine);
        lifecycle::shutdown(&mut self.engine);
        self.state = EngineState::ShutDown;
        self.started_at = None;
    }

    // =========================================================================
    // Statements and transactions
    // =========================================================================

    /// Executes one statement.
    ///
    /// Outside an explicit transaction the statement is committed on success
    /// and rolled back on failure. A failed statement's partial result is
    /// available from [`EmbedError::partial_result`].
    pub fn execute(&mut self, query: &str) -> EmbedResult<ResultSet> {
        let result = match self.require_initialized() {
            Ok(()) => query::execute(&mut self.engine, &self.coordinator, query),
            Err(e) => Err(e),
        };
        match &result {
            Ok(_) => self.statements_executed += 1,
            Err(EmbedError::Exec(_)) | Err(EmbedError::Allocation) => self.statements_failed += 1,
            Err(_) => {}
        }
        self.record(result)
    }

    /// Opens an explicit transaction.
    pub fn begin(&mut self) -> EmbedResult<()> {
        let result = match self.require_initialized() {
            Ok(()) => self.coordinator.begin(&mut self.engine),
            Err(e) => Err(e),
        };
        self.record(result)
    }

    /// Commits the explicit transaction.
    pub fn commit(&mut self) -> EmbedResult<()> {
        let result = match self.require_initialized() {
            Ok(()) => self.coordinator.commit(&mut self.engine),
            Err(e) => Err(e),
        };
        self.record(result)
    }

    /// Rolls back the explicit transaction.
    pub fn rollback(&mut self) -> EmbedResult<()> {
        let result = match self.require_initialized() {
            Ok(()) => self.coordinator.rollback(&mut self.engine),
            Err(e) => Err(e),
        };
        self.record(result)
    }

    /// Runs `f` inside an explicit transaction.
    ///
    /// If the closure returns an error, the transaction is rolled back.
    /// Otherwise, it is committed.
    pub fn transaction<F, T>(&mut self, f: F) -> EmbedResult<T>
    where
        F: FnOnce(&mut Self) -> EmbedResult<T>,
    {
        self.begin()?;
        match f(self) {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(e) => {
                if self.coordinator.in_transaction() {
                    let _ = self.rollback();
                }
                self.last_error = e.to_string();
                Err(e)
            }
        }
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Returns the message of the most recent failure, or "" if none.
    pub fn last_error_message(&self) -> &str {
        &self.last_error
    }

    /// Returns the lifecycle state.
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Returns true while started.
    pub fn is_initialized(&self) -> bool {
        self.state == EngineState::Initialized
    }

    /// Returns the explicit transaction state.
    pub fn transaction_state(&self) -> TransactionState {
        self.coordinator.state()
    }

    /// Returns the cluster directory of the last successful start.
    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    /// Returns counters for this handle.
    pub fn stats(&self) -> EmbeddedStats {
        EmbeddedStats {
            statements_executed: self.statements_executed,
            statements_failed: self.statements_failed,
            transactions_committed: self.coordinator.committed(),
            transactions_rolled_back: self.coordinator.rolled_back(),
            uptime: self.started_at.map(|t| t.elapsed()),
        }
    }

    /// Returns the engine.
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Returns the engine mutably.
    ///
    /// Calls made directly on the engine bypass state tracking.
    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    fn require_initialized(&self) -> EmbedResult<()> {
        if self.state == EngineState::Initialized {
            Ok(())
        } else {
            Err(EmbedError::NotInitialized)
        }
    }

    /// Stores the message of a failed result.
    fn record<T>(&mut self, result: EmbedResult<T>) -> EmbedResult<T> {
        if let Err(e) = &result {
            debug!(error = %e, code = %e.code(), "Operation failed");
            self.last_error = e.to_string();
        }
        result
    }
}

impl<E: Engine> Drop for Embedded<E> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<E: Engine> fmt::Debug for Embedded<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Embedded")
            .field("state", &self.state)
            .field("transaction", &self.coordinator.state())
            .field("data_dir", &self.data_dir)
            .field("last_error", &self.last_error)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgembed_engine::MemoryCluster;

    fn handle() -> Embedded<pgembed_engine::MemoryEngine> {
        Embedded::new(MemoryCluster::shared().engine())
    }

    #[test]
    fn test_operations_require_start() {
        let mut db = handle();
        assert_eq!(db.state(), EngineState::Uninitialized);

        let err = db.execute("SELECT 1").unwrap_err();
        assert!(matches!(err, EmbedError::NotInitialized));
        assert_eq!(db.last_error_message(), "Not initialized");

        assert!(db.begin().unwrap_err().is_state_error());
        assert!(db.commit().unwrap_err().is_state_error());
        assert!(db.rollback().unwrap_err().is_state_error());
        assert_eq!(db.stats().statements_failed, 0);
    }

    #[test]
    fn test_shutdown_before_start_is_noop() {
        let mut db = handle();
        db.shutdown();
        assert_eq!(db.state(), EngineState::Uninitialized);
        assert!(!db.engine().has_exited());
        assert_eq!(db.last_error_message(), "");
    }

    #[test]
    fn test_start_failure_records_message() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut db = handle();
        let err = db.start(dir.path(), "postgres", "postgres", false).unwrap_err();
        assert!(matches!(err, EmbedError::Init { .. }));
        assert!(db
            .last_error_message()
            .starts_with("Initialization failed:"));
        assert_eq!(db.state(), EngineState::Uninitialized);
    }

    #[test]
    fn test_durability_is_stored_for_next_start() {
        let mut db = handle();
        db.set_durability_config(DurabilityConfig::unsafe_fast());
        assert!(!db.durability_config().is_durable());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(EngineState::ShutDown.to_string(), "shut down");
    }
}
