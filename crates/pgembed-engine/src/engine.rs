//! The engine collaborator interface.
//!
//! Everything the embedding layer needs from the database engine goes
//! through [`Engine`]. Calls that can raise an engine error return
//! [`EngineResult`]; the embedding layer converts those into its own error
//! kinds and records the message.

use std::path::{Path, PathBuf};

use crate::error::EngineResult;
use crate::input::InputChannel;
use crate::spi::{SpiOutcome, TupleTable};
use crate::startup::StartupStep;

/// Arguments for one bootstrap-mode run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapArgs {
    /// Cluster directory.
    pub data_dir: PathBuf,
    /// Debug verbosity.
    pub debug_level: u8,
    /// WAL segment size in bytes.
    pub wal_segment_size: u32,
}

impl BootstrapArgs {
    /// Creates bootstrap arguments.
    pub fn new(data_dir: impl Into<PathBuf>, debug_level: u8, wal_segment_size: u32) -> Self {
        Self {
            data_dir: data_dir.into(),
            debug_level,
            wal_segment_size,
        }
    }

    /// Returns the argument vector in the engine's command-line form.
    pub fn to_argv(&self) -> Vec<String> {
        vec![
            "postgres".to_string(),
            "--boot".to_string(),
            "-D".to_string(),
            self.data_dir.display().to_string(),
            "-d".to_string(),
            self.debug_level.to_string(),
            "-X".to_string(),
            self.wal_segment_size.to_string(),
        ]
    }

    /// Returns the cluster directory.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

/// Operations the embedding layer invokes on the database engine.
///
/// An implementation is single-threaded and owns all engine-global state
/// for the process; at most one should be live at a time.
pub trait Engine {
    // =========================================================================
    // Bootstrap
    // =========================================================================

    /// Replaces the input channel, returning the previous one.
    fn replace_input(&mut self, input: InputChannel) -> InputChannel;

    /// Runs the bootstrap interpreter over the current input channel.
    fn bootstrap_main(&mut self, args: &BootstrapArgs) -> EngineResult<()>;

    // =========================================================================
    // Startup and shutdown
    // =========================================================================

    /// Resolves the absolute path of the running executable.
    fn find_exec_path(&mut self, progname: &str) -> EngineResult<PathBuf>;

    /// Performs one startup step.
    fn startup(&mut self, step: StartupStep) -> EngineResult<()>;

    /// Runs exit callbacks and releases engine resources.
    ///
    /// Does not terminate the process.
    fn proc_exit_prepare(&mut self, code: i32) -> EngineResult<()>;

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Returns true if a transaction is open.
    fn is_transaction_state(&self) -> bool;

    /// Starts a transaction.
    fn start_transaction_command(&mut self) -> EngineResult<()>;

    /// Commits the open transaction.
    fn commit_transaction_command(&mut self) -> EngineResult<()>;

    /// Aborts the open transaction and cleans up its resources.
    fn abort_current_transaction(&mut self) -> EngineResult<()>;

    /// Pushes a fresh snapshot for statement execution.
    fn push_active_snapshot(&mut self) -> EngineResult<()>;

    /// Pops the active snapshot.
    fn pop_active_snapshot(&mut self);

    // =========================================================================
    // Statement execution
    // =========================================================================

    /// Connects to the server programming interface.
    fn spi_connect(&mut self) -> EngineResult<()>;

    /// Executes one statement.
    ///
    /// `count` limits the rows returned; 0 means no limit.
    fn spi_execute(&mut self, query: &str, read_only: bool, count: u64)
        -> EngineResult<SpiOutcome>;

    /// Returns the rows left by the last execution, if it produced any.
    fn spi_tuptable(&self) -> Option<&dyn TupleTable>;

    /// Disconnects from the server programming interface.
    fn spi_finish(&mut self) -> EngineResult<()>;

    /// Reclaims memory used by the last statement.
    ///
    /// Invalidates any tuple table previously returned.
    fn reset_message_context(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootstrap_argv() {
        let args = BootstrapArgs::new("/data/cluster", 3, 1024 * 1024);
        assert_eq!(
            args.to_argv(),
            vec!["postgres", "--boot", "-D", "/data/cluster", "-d", "3", "-X", "1048576"]
        );
        assert_eq!(args.data_dir(), Path::new("/data/cluster"));
    }
}
