//! In-memory engine for testing.
//!
//! [`MemoryEngine`] implements [`Engine`] without the real database engine.
//! It keeps catalog and table data in a [`MemoryCluster`] that several
//! engines can share, so a test can shut one engine down and start another
//! against the same cluster. On disk it behaves like the real engine where
//! the embedding layer can observe it: bootstrap requires the version
//! marker and writes the control file, startup checks both, and the lock
//! step creates a real `postmaster.pid`.
//!
//! Every startup step is recorded in a journal, and failures can be
//! injected at any step, at bootstrap, at executable lookup, at transaction
//! start or commit, and at exit.

mod catalog;
mod sql;

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use pgembed_common::{ENGINE_MAJOR_VERSION, VERSION_FILE};
use tracing::{debug, trace, warn};

use crate::engine::{BootstrapArgs, Engine};
use crate::error::{EngineError, EngineErrorKind, EngineResult};
use crate::input::InputChannel;
use crate::lockfile::ClusterLock;
use crate::spi::{SpiOutcome, SpiStatus, TupleTable};
use crate::startup::{StartupPhase, StartupStep};

pub use catalog::DatabaseInfo;

use catalog::{BootstrapInterpreter, Catalog};
use sql::{Rows, Tables};

/// Control file written at the end of bootstrap, relative to the data directory.
const CONTROL_FILE: &str = "global/pg_control";

// =============================================================================
// Shared cluster state
// =============================================================================

/// Catalog and table data shared by all engines created from it.
#[derive(Debug, Default)]
pub struct MemoryCluster {
    state: Mutex<ClusterState>,
}

#[derive(Debug, Default)]
struct ClusterState {
    catalog: Option<Catalog>,
    bootstrap_script: Vec<String>,
    bootstrap_runs: usize,
}

impl MemoryCluster {
    /// Creates an empty cluster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty cluster wrapped in Arc.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Creates an engine backed by this cluster.
    pub fn engine(self: &Arc<Self>) -> MemoryEngine {
        MemoryEngine::new(Arc::clone(self))
    }

    /// Returns true once a bootstrap run has completed.
    pub fn is_bootstrapped(&self) -> bool {
        self.state.lock().catalog.is_some()
    }

    /// Returns how many bootstrap runs have completed.
    pub fn bootstrap_runs(&self) -> usize {
        self.state.lock().bootstrap_runs
    }

    /// Returns the lines of the last bootstrap script, as read.
    pub fn bootstrap_script(&self) -> Vec<String> {
        self.state.lock().bootstrap_script.clone()
    }

    /// Returns a registered database.
    pub fn database(&self, name: &str) -> Option<DatabaseInfo> {
        let state = self.state.lock();
        state
            .catalog
            .as_ref()
            .and_then(|c| c.databases.get(name))
            .map(|entry| entry.info.clone())
    }

    /// Returns true if a role is registered.
    pub fn has_role(&self, name: &str) -> bool {
        let state = self.state.lock();
        state
            .catalog
            .as_ref()
            .map(|c| c.roles.contains(name))
            .unwrap_or(false)
    }

    /// Returns the committed row count of a table.
    pub fn table_rows(&self, database: &str, table: &str) -> Option<usize> {
        let state = self.state.lock();
        state
            .catalog
            .as_ref()
            .and_then(|c| c.databases.get(database))
            .and_then(|entry| entry.tables.get(table))
            .map(|t| t.rows.len())
    }

    fn tables(&self, database: &str) -> Option<Tables> {
        let state = self.state.lock();
        state
            .catalog
            .as_ref()
            .and_then(|c| c.databases.get(database))
            .map(|entry| entry.tables.clone())
    }

    fn store_tables(&self, database: &str, tables: Tables) {
        let mut state = self.state.lock();
        if let Some(entry) = state
            .catalog
            .as_mut()
            .and_then(|c| c.databases.get_mut(database))
        {
            entry.tables = tables;
        }
    }
}

// =============================================================================
// Failure injection
// =============================================================================

#[derive(Debug, Default)]
struct Failures {
    startup: BTreeSet<StartupPhase>,
    exec_path: bool,
    bootstrap: bool,
    begin: bool,
    commit: bool,
    exit: bool,
}

fn injected(what: impl std::fmt::Display) -> EngineError {
    EngineError::fatal(EngineErrorKind::General, format!("injected failure at {}", what))
}

// =============================================================================
// Engine
// =============================================================================

struct MemoryTupleTable {
    rows: Rows,
}

impl TupleTable for MemoryTupleTable {
    fn column_count(&self) -> usize {
        self.rows.columns.len()
    }

    fn column_name(&self, column: usize) -> Option<&str> {
        self.rows.columns.get(column).map(String::as_str)
    }

    fn row_count(&self) -> usize {
        self.rows.rows.len()
    }

    fn value(&self, row: usize, column: usize) -> Option<Cow<'_, str>> {
        self.rows
            .rows
            .get(row)
            .and_then(|r| r.get(column))
            .and_then(|v| v.as_deref())
            .map(Cow::Borrowed)
    }
}

struct OpenTransaction {
    tables: Tables,
    failed: Option<String>,
}

/// An engine that keeps its data in a [`MemoryCluster`].
pub struct MemoryEngine {
    cluster: Arc<MemoryCluster>,
    input: InputChannel,
    failures: Failures,
    journal: Vec<StartupStep>,
    options: BTreeMap<String, String>,
    data_dir: Option<PathBuf>,
    exec_path: Option<PathBuf>,
    lock: Option<ClusterLock>,
    database: Option<String>,
    transaction: Option<OpenTransaction>,
    snapshots: usize,
    spi_connected: bool,
    tuptable: Option<MemoryTupleTable>,
    commits: usize,
    aborts: usize,
    context_resets: usize,
    exited: bool,
}

impl MemoryEngine {
    /// Creates an engine backed by `cluster`.
    pub fn new(cluster: Arc<MemoryCluster>) -> Self {
        Self {
            cluster,
            input: InputChannel::Stdin,
            failures: Failures::default(),
            journal: Vec::new(),
            options: BTreeMap::new(),
            data_dir: None,
            exec_path: None,
            lock: None,
            database: None,
            transaction: None,
            snapshots: 0,
            spi_connected: false,
            tuptable: None,
            commits: 0,
            aborts: 0,
            context_resets: 0,
            exited: false,
        }
    }

    /// Returns the backing cluster.
    pub fn cluster(&self) -> &Arc<MemoryCluster> {
        &self.cluster
    }

    // -------------------------------------------------------------------------
    // Failure injection
    // -------------------------------------------------------------------------

    /// Makes the given startup phase fail.
    pub fn fail_at(&mut self, phase: StartupPhase) {
        self.failures.startup.insert(phase);
    }

    /// Makes executable path resolution fail.
    pub fn fail_exec_path(&mut self) {
        self.failures.exec_path = true;
    }

    /// Makes the next bootstrap run fail after reading its input.
    pub fn fail_bootstrap(&mut self) {
        self.failures.bootstrap = true;
    }

    /// Makes the next transaction start fail.
    pub fn fail_next_begin(&mut self) {
        self.failures.begin = true;
    }

    /// Makes the next commit fail.
    pub fn fail_next_commit(&mut self) {
        self.failures.commit = true;
    }

    /// Makes exit processing report an error after releasing resources.
    pub fn fail_exit(&mut self) {
        self.failures.exit = true;
    }

    // -------------------------------------------------------------------------
    // Inspection
    // -------------------------------------------------------------------------

    /// Returns every startup step performed, in order.
    pub fn journal(&self) -> &[StartupStep] {
        &self.journal
    }

    /// Returns the phases of every startup step performed, in order.
    pub fn phases(&self) -> Vec<StartupPhase> {
        self.journal.iter().map(StartupStep::phase).collect()
    }

    /// Returns a configuration option set during startup.
    pub fn option(&self, name: &str) -> Option<&str> {
        self.options.get(name).map(String::as_str)
    }

    /// Returns the resolved executable path.
    pub fn exec_path(&self) -> Option<&Path> {
        self.exec_path.as_deref()
    }

    /// Returns the connected database.
    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    /// Returns true while the cluster lock is held.
    pub fn holds_lock(&self) -> bool {
        self.lock.is_some()
    }

    /// Returns true while the SPI is connected.
    pub fn is_spi_connected(&self) -> bool {
        self.spi_connected
    }

    /// Returns the number of pushed snapshots.
    pub fn snapshot_depth(&self) -> usize {
        self.snapshots
    }

    /// Returns how many transactions committed.
    pub fn commit_count(&self) -> usize {
        self.commits
    }

    /// Returns how many transactions aborted.
    pub fn abort_count(&self) -> usize {
        self.aborts
    }

    /// Returns how many times the message context was reset.
    pub fn context_reset_count(&self) -> usize {
        self.context_resets
    }

    /// Returns true once exit processing ran.
    pub fn has_exited(&self) -> bool {
        self.exited
    }

    // -------------------------------------------------------------------------
    // Startup steps
    // -------------------------------------------------------------------------

    fn require_data_dir(&self) -> EngineResult<&Path> {
        self.data_dir.as_deref().ok_or_else(|| {
            EngineError::fatal(EngineErrorKind::DataDirectory, "data directory not set")
        })
    }

    fn check_data_dir(&self) -> EngineResult<()> {
        let data_dir = self.require_data_dir()?;
        if !data_dir.is_dir() {
            return Err(EngineError::fatal(
                EngineErrorKind::DataDirectory,
                format!("data directory \"{}\" does not exist", data_dir.display()),
            ));
        }

        let version_path = data_dir.join(VERSION_FILE);
        let version = fs::read_to_string(&version_path).map_err(|_| {
            EngineError::fatal(
                EngineErrorKind::DataDirectory,
                format!("\"{}\" is not a valid data directory", data_dir.display()),
            )
            .with_detail(format!("File \"{}\" is missing.", version_path.display()))
        })?;
        if version.trim() != ENGINE_MAJOR_VERSION {
            return Err(EngineError::fatal(
                EngineErrorKind::DataDirectory,
                "database files are incompatible with server",
            )
            .with_detail(format!(
                "The data directory was initialized by PostgreSQL version {}, which is not \
                 compatible with this version {}.",
                version.trim(),
                ENGINE_MAJOR_VERSION
            )));
        }
        Ok(())
    }

    fn read_control_file(&self) -> EngineResult<()> {
        let path = self.require_data_dir()?.join(CONTROL_FILE);
        if !path.is_file() {
            return Err(EngineError::fatal(
                EngineErrorKind::DataDirectory,
                format!("could not open file \"{}\": No such file or directory", CONTROL_FILE),
            ));
        }
        if !self.cluster.is_bootstrapped() {
            return Err(EngineError::fatal(
                EngineErrorKind::DataDirectory,
                "control file belongs to a different cluster",
            ));
        }
        Ok(())
    }

    fn connect_database(&mut self, database: &str, username: &str) -> EngineResult<()> {
        if !self.cluster.has_role(username) {
            return Err(EngineError::fatal(
                EngineErrorKind::UndefinedObject,
                format!("role \"{}\" does not exist", username),
            )
            .with_sqlstate("28000"));
        }
        if self.cluster.database(database).is_none() {
            return Err(EngineError::fatal(
                EngineErrorKind::UndefinedObject,
                format!("database \"{}\" does not exist", database),
            )
            .with_sqlstate("3D000"));
        }
        self.database = Some(database.to_string());
        Ok(())
    }

    fn transaction_mut(&mut self) -> EngineResult<&mut OpenTransaction> {
        self.transaction.as_mut().ok_or_else(|| {
            EngineError::error(
                EngineErrorKind::InvalidTransactionState,
                "no transaction in progress",
            )
            .with_sqlstate("25P01")
        })
    }

    fn discard_transaction(&mut self) {
        self.transaction = None;
        self.snapshots = 0;
        self.spi_connected = false;
        self.tuptable = None;
    }
}

impl Engine for MemoryEngine {
    fn replace_input(&mut self, input: InputChannel) -> InputChannel {
        std::mem::replace(&mut self.input, input)
    }

    fn bootstrap_main(&mut self, args: &BootstrapArgs) -> EngineResult<()> {
        debug!(argv = ?args.to_argv(), "Running bootstrap interpreter");

        if self.input.is_stdin() {
            return Err(EngineError::fatal(
                EngineErrorKind::General,
                "bootstrap input was not redirected",
            ));
        }
        if !args.data_dir().join(VERSION_FILE).is_file() {
            return Err(EngineError::fatal(
                EngineErrorKind::DataDirectory,
                format!("\"{}\" is not a valid data directory", args.data_dir().display()),
            ));
        }

        let mut interp = BootstrapInterpreter::new();
        let mut script = Vec::new();
        loop {
            let mut line = String::new();
            let read = self.input.read_line(&mut line).map_err(|e| {
                EngineError::io("read bootstrap input", "standard input", &e)
            })?;
            if read == 0 {
                break;
            }
            let line = line.trim_end_matches(&['\n', '\r'][..]).to_string();
            interp.line(&line)?;
            script.push(line);
        }
        let catalog = interp.finish()?;

        if std::mem::take(&mut self.failures.bootstrap) {
            return Err(injected("bootstrap"));
        }

        let control = args.data_dir().join(CONTROL_FILE);
        fs::write(&control, format!("pg_control version {}00\n", ENGINE_MAJOR_VERSION))
            .map_err(|e| EngineError::io("write control file", control.display(), &e))?;

        let mut state = self.cluster.state.lock();
        state.catalog = Some(catalog);
        state.bootstrap_script = script;
        state.bootstrap_runs += 1;
        debug!(lines = state.bootstrap_script.len(), "Bootstrap complete");
        Ok(())
    }

    fn find_exec_path(&mut self, progname: &str) -> EngineResult<PathBuf> {
        if self.failures.exec_path {
            return Err(EngineError::error(
                EngineErrorKind::Io,
                format!("could not find a \"{}\" to execute", progname),
            ));
        }
        let path = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join(progname)))
            .unwrap_or_else(|| PathBuf::from(progname));
        Ok(path)
    }

    fn startup(&mut self, step: StartupStep) -> EngineResult<()> {
        let phase = step.phase();
        trace!(step = %step, "Memory engine startup step");
        self.journal.push(step.clone());

        if self.failures.startup.contains(&phase) {
            return Err(injected(phase));
        }

        match step {
            StartupStep::RecordProcessStart { .. } => {
                self.exited = false;
            }
            StartupStep::SetExecPath { exec_path } => self.exec_path = Some(exec_path),
            StartupStep::SetDataDir { data_dir } => self.data_dir = Some(data_dir),
            StartupStep::SetOption { name, value } => {
                self.options.insert(name, value);
            }
            StartupStep::CheckDataDir => self.check_data_dir()?,
            StartupStep::CreateLockFile => {
                let lock = ClusterLock::acquire(self.require_data_dir()?)?;
                self.lock = Some(lock);
            }
            StartupStep::ReadControlFile => self.read_control_file()?,
            StartupStep::ConnectDatabase { database, username } => {
                self.connect_database(&database, &username)?
            }
            _ => {}
        }
        Ok(())
    }

    fn proc_exit_prepare(&mut self, code: i32) -> EngineResult<()> {
        debug!(code, "Running exit callbacks");
        if self.transaction.is_some() {
            warn!("Exit with a transaction still open; discarding it");
            self.aborts += 1;
        }
        self.discard_transaction();
        self.lock = None;
        self.database = None;
        self.exited = true;

        if std::mem::take(&mut self.failures.exit) {
            return Err(injected("exit"));
        }
        Ok(())
    }

    fn is_transaction_state(&self) -> bool {
        self.transaction.is_some()
    }

    fn start_transaction_command(&mut self) -> EngineResult<()> {
        let database = self.database.clone().ok_or_else(|| {
            EngineError::error(EngineErrorKind::General, "not connected to a database")
        })?;
        if self.transaction.is_some() {
            return Err(EngineError::error(
                EngineErrorKind::InvalidTransactionState,
                "there is already a transaction in progress",
            )
            .with_sqlstate("25001"));
        }
        if std::mem::take(&mut self.failures.begin) {
            return Err(injected("transaction start"));
        }

        let tables = self.cluster.tables(&database).unwrap_or_default();
        self.transaction = Some(OpenTransaction {
            tables,
            failed: None,
        });
        Ok(())
    }

    fn commit_transaction_command(&mut self) -> EngineResult<()> {
        let txn = self.transaction_mut()?;
        if txn.failed.is_some() {
            return Err(EngineError::error(
                EngineErrorKind::InvalidTransactionState,
                "current transaction is aborted, commands ignored until end of transaction block",
            )
            .with_sqlstate("25P02"));
        }
        if std::mem::take(&mut self.failures.commit) {
            return Err(injected("commit"));
        }

        if let Some(txn) = self.transaction.take() {
            if let Some(database) = &self.database {
                self.cluster.store_tables(database, txn.tables);
            }
        }
        self.discard_transaction();
        self.commits += 1;
        Ok(())
    }

    fn abort_current_transaction(&mut self) -> EngineResult<()> {
        if self.transaction.is_some() {
            self.aborts += 1;
        }
        self.discard_transaction();
        Ok(())
    }

    fn push_active_snapshot(&mut self) -> EngineResult<()> {
        self.transaction_mut()?;
        self.snapshots += 1;
        Ok(())
    }

    fn pop_active_snapshot(&mut self) {
        self.snapshots = self.snapshots.saturating_sub(1);
    }

    fn spi_connect(&mut self) -> EngineResult<()> {
        self.transaction_mut()?;
        if self.spi_connected {
            return Err(EngineError::error(
                EngineErrorKind::InvalidTransactionState,
                "SPI_connect failed: already connected",
            ));
        }
        self.spi_connected = true;
        Ok(())
    }

    fn spi_execute(
        &mut self,
        query: &str,
        read_only: bool,
        count: u64,
    ) -> EngineResult<SpiOutcome> {
        if !self.spi_connected {
            return Ok(SpiOutcome::new(SpiStatus::ErrorUnconnected, 0));
        }
        if self.snapshots == 0 {
            return Err(EngineError::error(
                EngineErrorKind::InvalidTransactionState,
                "cannot execute SQL without an outer snapshot or portal",
            ));
        }
        self.tuptable = None;

        let txn = self.transaction_mut()?;
        if txn.failed.is_some() {
            return Err(EngineError::error(
                EngineErrorKind::InvalidTransactionState,
                "current transaction is aborted, commands ignored until end of transaction block",
            )
            .with_sqlstate("25P02"));
        }

        trace!(query, "Memory engine executing statement");
        let result = sql::parse(query)
            .and_then(|statement| sql::execute(&mut txn.tables, statement, read_only, count));
        match result {
            Ok((outcome, rows)) => {
                self.tuptable = rows.map(|rows| MemoryTupleTable { rows });
                Ok(outcome)
            }
            Err(e) => {
                txn.failed = Some(e.message.clone());
                Err(e)
            }
        }
    }

    fn spi_tuptable(&self) -> Option<&dyn TupleTable> {
        self.tuptable.as_ref().map(|t| t as &dyn TupleTable)
    }

    fn spi_finish(&mut self) -> EngineResult<()> {
        if !self.spi_connected {
            return Err(EngineError::error(
                EngineErrorKind::InvalidTransactionState,
                "SPI_finish called while not connected",
            ));
        }
        self.spi_connected = false;
        Ok(())
    }

    fn reset_message_context(&mut self) {
        self.tuptable = None;
        self.context_resets += 1;
    }
}

impl std::fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEngine")
            .field("data_dir", &self.data_dir)
            .field("database", &self.database)
            .field("in_transaction", &self.transaction.is_some())
            .field("steps", &self.journal.len())
            .finish()
    }
}
