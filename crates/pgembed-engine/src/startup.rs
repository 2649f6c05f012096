//! Single-user startup steps.
//!
//! Starting a standalone backend is a fixed sequence of engine calls. The
//! embedding layer builds the sequence as a list of [`StartupStep`]s and
//! feeds them to [`Engine::startup`](crate::Engine::startup) one at a time,
//! so the order lives in one place and can be inspected in tests.

use std::fmt;
use std::path::PathBuf;
use std::time::SystemTime;

/// One step of single-user startup, with the arguments it needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupStep {
    /// Record process identity and start time.
    RecordProcessStart {
        /// Process id.
        pid: u32,
        /// Wall-clock start time.
        started_at: SystemTime,
    },
    /// Create the top-level memory contexts.
    InitMemoryContexts,
    /// Record the resolved executable path.
    SetExecPath {
        /// Path of the running executable, or the program name as fallback.
        exec_path: PathBuf,
    },
    /// Record the cluster directory.
    SetDataDir {
        /// Cluster directory.
        data_dir: PathBuf,
    },
    /// Initialize standalone-process state.
    InitStandaloneProcess {
        /// Program name.
        progname: String,
    },
    /// Load built-in defaults for every configuration option.
    InitializeOptions,
    /// Override a configuration option for this session.
    ///
    /// Overrides are applied before configuration files are read and take
    /// precedence over them.
    SetOption {
        /// Option name.
        name: String,
        /// Option value.
        value: String,
    },
    /// Locate and read the configuration files.
    SelectConfigFiles {
        /// User the configuration is read for.
        username: String,
    },
    /// Verify the cluster directory is usable.
    CheckDataDir,
    /// Change the working directory to the cluster directory.
    ChangeToDataDir,
    /// Create the exclusive cluster lock file.
    CreateLockFile,
    /// Read the cluster control file.
    ReadControlFile,
    /// Load libraries requested for preloading.
    ProcessPreloadLibraries,
    /// Compute the maximum backend count.
    InitializeMaxBackends,
    /// Set up child process slots.
    InitChildSlots,
    /// Size fast-path lock slots.
    InitializeFastPathLocks,
    /// Collect shared memory requests from loaded modules.
    ProcessShmemRequests,
    /// Derive options that depend on shared memory size.
    InitializeShmemOptions,
    /// Set up WAL consistency checking.
    InitializeWalConsistencyChecking,
    /// Create shared memory and semaphores.
    CreateSharedMemory,
    /// Compute the safe file descriptor limit.
    SetMaxSafeFds,
    /// Record the standalone session start time.
    RecordSessionStart {
        /// Wall-clock session start time.
        at: SystemTime,
    },
    /// Initialize the per-process state.
    InitProcess,
    /// Base backend initialization.
    BaseInit,
    /// Connect to a database as a user.
    ConnectDatabase {
        /// Database name.
        database: String,
        /// User name.
        username: String,
    },
    /// Drop the startup-only memory context.
    ReleaseStartupContext,
    /// Switch to normal processing mode.
    SetNormalProcessing,
    /// Disable client output; there is no client.
    DisableOutput,
    /// Create the per-statement message context.
    CreateMessageContext,
}

impl StartupStep {
    /// Returns the phase this step belongs to, without its arguments.
    pub fn phase(&self) -> StartupPhase {
        match self {
            StartupStep::RecordProcessStart { .. } => StartupPhase::RecordProcessStart,
            StartupStep::InitMemoryContexts => StartupPhase::InitMemoryContexts,
            StartupStep::SetExecPath { .. } => StartupPhase::SetExecPath,
            StartupStep::SetDataDir { .. } => StartupPhase::SetDataDir,
            StartupStep::InitStandaloneProcess { .. } => StartupPhase::InitStandaloneProcess,
            StartupStep::InitializeOptions => StartupPhase::InitializeOptions,
            StartupStep::SetOption { .. } => StartupPhase::SetOption,
            StartupStep::SelectConfigFiles { .. } => StartupPhase::SelectConfigFiles,
            StartupStep::CheckDataDir => StartupPhase::CheckDataDir,
            StartupStep::ChangeToDataDir => StartupPhase::ChangeToDataDir,
            StartupStep::CreateLockFile => StartupPhase::CreateLockFile,
            StartupStep::ReadControlFile => StartupPhase::ReadControlFile,
            StartupStep::ProcessPreloadLibraries => StartupPhase::ProcessPreloadLibraries,
            StartupStep::InitializeMaxBackends => StartupPhase::InitializeMaxBackends,
            StartupStep::InitChildSlots => StartupPhase::InitChildSlots,
            StartupStep::InitializeFastPathLocks => StartupPhase::InitializeFastPathLocks,
            StartupStep::ProcessShmemRequests => StartupPhase::ProcessShmemRequests,
            StartupStep::InitializeShmemOptions => StartupPhase::InitializeShmemOptions,
            StartupStep::InitializeWalConsistencyChecking => {
                StartupPhase::InitializeWalConsistencyChecking
            }
            StartupStep::CreateSharedMemory => StartupPhase::CreateSharedMemory,
            StartupStep::SetMaxSafeFds => StartupPhase::SetMaxSafeFds,
            StartupStep::RecordSessionStart { .. } => StartupPhase::RecordSessionStart,
            StartupStep::InitProcess => StartupPhase::InitProcess,
            StartupStep::BaseInit => StartupPhase::BaseInit,
            StartupStep::ConnectDatabase { .. } => StartupPhase::ConnectDatabase,
            StartupStep::ReleaseStartupContext => StartupPhase::ReleaseStartupContext,
            StartupStep::SetNormalProcessing => StartupPhase::SetNormalProcessing,
            StartupStep::DisableOutput => StartupPhase::DisableOutput,
            StartupStep::CreateMessageContext => StartupPhase::CreateMessageContext,
        }
    }
}

impl fmt::Display for StartupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartupStep::SetOption { name, value } => write!(f, "set_option({}={})", name, value),
            StartupStep::ConnectDatabase { database, username } => {
                write!(f, "connect_database({}@{})", username, database)
            }
            other => write!(f, "{}", other.phase()),
        }
    }
}

/// Argument-free name of a startup step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[allow(missing_docs)]
pub enum StartupPhase {
    RecordProcessStart,
    InitMemoryContexts,
    SetExecPath,
    SetDataDir,
    InitStandaloneProcess,
    InitializeOptions,
    SetOption,
    SelectConfigFiles,
    CheckDataDir,
    ChangeToDataDir,
    CreateLockFile,
    ReadControlFile,
    ProcessPreloadLibraries,
    InitializeMaxBackends,
    InitChildSlots,
    InitializeFastPathLocks,
    ProcessShmemRequests,
    InitializeShmemOptions,
    InitializeWalConsistencyChecking,
    CreateSharedMemory,
    SetMaxSafeFds,
    RecordSessionStart,
    InitProcess,
    BaseInit,
    ConnectDatabase,
    ReleaseStartupContext,
    SetNormalProcessing,
    DisableOutput,
    CreateMessageContext,
}

impl StartupPhase {
    /// Returns the phase name in snake case.
    pub fn as_str(&self) -> &'static str {
        match self {
            StartupPhase::RecordProcessStart => "record_process_start",
            StartupPhase::InitMemoryContexts => "init_memory_contexts",
            StartupPhase::SetExecPath => "set_exec_path",
            StartupPhase::SetDataDir => "set_data_dir",
            StartupPhase::InitStandaloneProcess => "init_standalone_process",
            StartupPhase::InitializeOptions => "initialize_options",
            StartupPhase::SetOption => "set_option",
            StartupPhase::SelectConfigFiles => "select_config_files",
            StartupPhase::CheckDataDir => "check_data_dir",
            StartupPhase::ChangeToDataDir => "change_to_data_dir",
            StartupPhase::CreateLockFile => "create_lock_file",
            StartupPhase::ReadControlFile => "read_control_file",
            StartupPhase::ProcessPreloadLibraries => "process_preload_libraries",
            StartupPhase::InitializeMaxBackends => "initialize_max_backends",
            StartupPhase::InitChildSlots => "init_child_slots",
            StartupPhase::InitializeFastPathLocks => "initialize_fast_path_locks",
            StartupPhase::ProcessShmemRequests => "process_shmem_requests",
            StartupPhase::InitializeShmemOptions => "initialize_shmem_options",
            StartupPhase::InitializeWalConsistencyChecking => "initialize_wal_consistency_checking",
            StartupPhase::CreateSharedMemory => "create_shared_memory",
            StartupPhase::SetMaxSafeFds => "set_max_safe_fds",
            StartupPhase::RecordSessionStart => "record_session_start",
            StartupPhase::InitProcess => "init_process",
            StartupPhase::BaseInit => "base_init",
            StartupPhase::ConnectDatabase => "connect_database",
            StartupPhase::ReleaseStartupContext => "release_startup_context",
            StartupPhase::SetNormalProcessing => "set_normal_processing",
            StartupPhase::DisableOutput => "disable_output",
            StartupPhase::CreateMessageContext => "create_message_context",
        }
    }
}

impl fmt::Display for StartupPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_of_step() {
        let step = StartupStep::SetOption {
            name: "fsync".to_string(),
            value: "off".to_string(),
        };
        assert_eq!(step.phase(), StartupPhase::SetOption);
        assert_eq!(step.to_string(), "set_option(fsync=off)");

        assert_eq!(StartupStep::CheckDataDir.to_string(), "check_data_dir");
    }

    #[test]
    fn test_connect_display() {
        let step = StartupStep::ConnectDatabase {
            database: "template1".to_string(),
            username: "postgres".to_string(),
        };
        assert_eq!(step.to_string(), "connect_database(postgres@template1)");
    }
}
