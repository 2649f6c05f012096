//! Single-user bring-up and shutdown.
//!
//! Startup is a fixed sequence of [`StartupStep`]s. The first two steps run
//! before the executable path is resolved; [`startup_plan`] builds the rest.
//! Any step failing stops the sequence.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::SystemTime;

use pgembed_common::DurabilityConfig;
use pgembed_engine::{Engine, EngineResult, StartupStep};
use tracing::{debug, info, trace, warn};

use crate::error::{EmbedError, EmbedResult};
use crate::txn::abort_quietly;

/// Engines started and not yet shut down in this process.
static LIVE_ENGINES: AtomicUsize = AtomicUsize::new(0);

/// Returns how many engines are live in this process.
pub fn live_engines() -> usize {
    LIVE_ENGINES.load(Ordering::SeqCst)
}

/// Parameters for one bring-up.
#[derive(Debug, Clone)]
pub struct StartOptions<'a> {
    /// Cluster directory.
    pub data_dir: &'a Path,
    /// Database to connect to.
    pub database: &'a str,
    /// User to connect as.
    pub username: &'a str,
    /// Allow modifying system catalogs for this session.
    pub allow_system_catalog_mods: bool,
    /// Program name used to locate the executable.
    pub progname: &'a str,
    /// Durability switches applied as option overrides.
    pub durability: &'a DurabilityConfig,
}

impl StartOptions<'_> {
    fn validate(&self) -> EmbedResult<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(EmbedError::invalid_argument("data directory is required"));
        }
        if self.database.is_empty() {
            return Err(EmbedError::invalid_argument("database name is required"));
        }
        if self.username.is_empty() {
            return Err(EmbedError::invalid_argument("user name is required"));
        }
        Ok(())
    }
}

/// Builds the startup steps that follow executable path resolution.
pub fn startup_plan(opts: &StartOptions<'_>, exec_path: PathBuf) -> Vec<StartupStep> {
    let mut plan = vec![
        StartupStep::SetExecPath { exec_path },
        StartupStep::SetDataDir {
            data_dir: opts.data_dir.to_path_buf(),
        },
        StartupStep::InitStandaloneProcess {
            progname: opts.progname.to_string(),
        },
        StartupStep::InitializeOptions,
    ];

    // Overrides must precede the configuration files.
    if opts.allow_system_catalog_mods {
        plan.push(set_option("allow_system_table_mods", "on"));
    }
    for (name, value) in opts.durability.overrides() {
        plan.push(set_option(name, value));
    }

    plan.extend([
        StartupStep::SelectConfigFiles {
            username: opts.username.to_string(),
        },
        StartupStep::CheckDataDir,
        StartupStep::ChangeToDataDir,
        StartupStep::CreateLockFile,
        StartupStep::ReadControlFile,
        StartupStep::ProcessPreloadLibraries,
        StartupStep::InitializeMaxBackends,
        StartupStep::InitChildSlots,
        StartupStep::InitializeFastPathLocks,
        StartupStep::ProcessShmemRequests,
        StartupStep::InitializeShmemOptions,
        StartupStep::InitializeWalConsistencyChecking,
        StartupStep::CreateSharedMemory,
        StartupStep::SetMaxSafeFds,
        StartupStep::RecordSessionStart {
            at: SystemTime::now(),
        },
        StartupStep::InitProcess,
        StartupStep::BaseInit,
        StartupStep::ConnectDatabase {
            database: opts.database.to_string(),
            username: opts.username.to_string(),
        },
        StartupStep::ReleaseStartupContext,
        StartupStep::SetNormalProcessing,
        StartupStep::DisableOutput,
        StartupStep::CreateMessageContext,
    ]);
    plan
}

fn set_option(name: &str, value: &str) -> StartupStep {
    StartupStep::SetOption {
        name: name.to_string(),
        value: value.to_string(),
    }
}

/// Brings the engine up in single-user mode.
///
/// On failure the engine's exit callbacks run so the lock file and other
/// resources are released; the engine can be started again.
pub(crate) fn start<E: Engine>(engine: &mut E, opts: &StartOptions<'_>) -> EmbedResult<()> {
    opts.validate()?;
    if !opts.durability.is_durable() {
        warn!(overrides = ?opts.durability.overrides(), "Durability disabled; a crash may lose data");
    }

    if let Err(e) = bring_up(engine, opts) {
        if let Err(exit_err) = engine.proc_exit_prepare(1) {
            debug!(error = %exit_err, "Exit callbacks failed after startup failure");
        }
        return Err(e);
    }

    let previous = LIVE_ENGINES.fetch_add(1, Ordering::SeqCst);
    if previous > 0 {
        warn!(
            live = previous + 1,
            "More than one embedded engine is live in this process; engine state is process-global"
        );
    }
    info!(
        path = %opts.data_dir.display(),
        database = opts.database,
        user = opts.username,
        "Embedded engine started"
    );
    Ok(())
}

fn bring_up<E: Engine>(engine: &mut E, opts: &StartOptions<'_>) -> EmbedResult<()> {
    run_step(
        engine,
        StartupStep::RecordProcessStart {
            pid: std::process::id(),
            started_at: SystemTime::now(),
        },
        opts.data_dir,
    )?;
    run_step(engine, StartupStep::InitMemoryContexts, opts.data_dir)?;

    let exec_path = match engine.find_exec_path(opts.progname) {
        Ok(path) => path,
        Err(e) => {
            warn!(error = %e, progname = opts.progname, "Could not resolve executable path; using program name");
            PathBuf::from(opts.progname)
        }
    };

    for step in startup_plan(opts, exec_path) {
        run_step(engine, step, opts.data_dir)?;
    }

    smoke_test(engine)
}

fn run_step<E: Engine>(engine: &mut E, step: StartupStep, data_dir: &Path) -> EmbedResult<()> {
    trace!(step = %step, "Startup step");
    engine
        .startup(step)
        .map_err(|e| EmbedError::from_startup(e, data_dir.to_path_buf()))
}

/// Opens and closes an SPI connection inside an empty transaction.
fn smoke_test<E: Engine>(engine: &mut E) -> EmbedResult<()> {
    engage_spi(engine).map_err(|e| {
        abort_quietly(engine);
        EmbedError::init(format!("Initialization failed: {}", e.full_message()))
    })
}

fn engage_spi<E: Engine>(engine: &mut E) -> EngineResult<()> {
    engine.start_transaction_command()?;
    engine.spi_connect()?;
    engine.spi_finish()?;
    engine.commit_transaction_command()
}

/// Aborts any open transaction and runs the exit callbacks.
///
/// Never fails; errors are logged.
pub(crate) fn shutdown<E: Engine>(engine: &mut E) {
    if engine.is_transaction_state() {
        warn!("Shutting down with an open transaction; aborting it");
        abort_quietly(engine);
    }
    if let Err(e) = engine.proc_exit_prepare(0) {
        warn!(error = %e, "Exit callbacks failed during shutdown");
    }
    let _ = LIVE_ENGINES.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    info!("Embedded engine shut down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgembed_engine::StartupPhase;

    fn phases(plan: &[StartupStep]) -> Vec<StartupPhase> {
        plan.iter().map(StartupStep::phase).collect()
    }

    #[test]
    fn test_plan_without_overrides() {
        let durability = DurabilityConfig::default();
        let opts = StartOptions {
            data_dir: Path::new("/data"),
            database: "postgres",
            username: "admin",
            allow_system_catalog_mods: false,
            progname: "postgres_embedded",
            durability: &durability,
        };
        let plan = startup_plan(&opts, PathBuf::from("/usr/bin/postgres_embedded"));

        assert_eq!(plan.len(), 26);
        assert!(!phases(&plan).contains(&StartupPhase::SetOption));
        assert_eq!(
            plan[0],
            StartupStep::SetExecPath {
                exec_path: PathBuf::from("/usr/bin/postgres_embedded")
            }
        );
        assert_eq!(plan.last(), Some(&StartupStep::CreateMessageContext));
    }

    #[test]
    fn test_overrides_precede_config_files() {
        let durability = DurabilityConfig::unsafe_fast();
        let opts = StartOptions {
            data_dir: Path::new("/data"),
            database: "postgres",
            username: "admin",
            allow_system_catalog_mods: true,
            progname: "postgres_embedded",
            durability: &durability,
        };
        let plan = startup_plan(&opts, PathBuf::from("postgres_embedded"));
        let phases = phases(&plan);

        let defaults = phases
            .iter()
            .position(|p| *p == StartupPhase::InitializeOptions)
            .unwrap();
        let files = phases
            .iter()
            .position(|p| *p == StartupPhase::SelectConfigFiles)
            .unwrap();
        let options: Vec<String> = plan[defaults + 1..files]
            .iter()
            .map(|step| step.to_string())
            .collect();
        assert_eq!(
            options,
            vec![
                "set_option(allow_system_table_mods=on)",
                "set_option(fsync=off)",
                "set_option(synchronous_commit=off)",
                "set_option(full_page_writes=off)",
            ]
        );
    }

    #[test]
    fn test_connect_follows_base_init() {
        let durability = DurabilityConfig::default();
        let opts = StartOptions {
            data_dir: Path::new("/data"),
            database: "app",
            username: "admin",
            allow_system_catalog_mods: false,
            progname: "postgres_embedded",
            durability: &durability,
        };
        let phases = phases(&startup_plan(&opts, PathBuf::from("x")));
        let lock = phases.iter().position(|p| *p == StartupPhase::CreateLockFile).unwrap();
        let control = phases.iter().position(|p| *p == StartupPhase::ReadControlFile).unwrap();
        let base = phases.iter().position(|p| *p == StartupPhase::BaseInit).unwrap();
        let connect = phases.iter().position(|p| *p == StartupPhase::ConnectDatabase).unwrap();
        assert_eq!(control, lock + 1);
        assert_eq!(connect, base + 1);
    }

    #[test]
    fn test_start_rejects_empty_arguments() {
        let durability = DurabilityConfig::default();
        let mut engine = pgembed_engine::MemoryCluster::shared().engine();
        let opts = StartOptions {
            data_dir: Path::new("/data"),
            database: "",
            username: "admin",
            allow_system_catalog_mods: false,
            progname: "postgres_embedded",
            durability: &durability,
        };
        let err = start(&mut engine, &opts).unwrap_err();
        assert!(matches!(err, EmbedError::InvalidArgument(_)));
        assert!(engine.journal().is_empty());
    }
}
