//! # pgembed-engine
//!
//! The boundary between pgembed and the database engine it embeds.
//!
//! - **Interface**: [`Engine`], the operations the embedding layer drives
//! - **Startup**: [`StartupStep`], the ordered single-user bring-up steps
//! - **SPI**: [`SpiStatus`], [`SpiOutcome`] and the transient [`TupleTable`]
//! - **Input**: [`InputChannel`], the bootstrap interpreter's input
//! - **Lock file**: [`ClusterLock`], the exclusive `postmaster.pid`
//! - **Testing**: [`MemoryEngine`], a stand-in that runs entirely in memory.
//!   It exists for tests of the embedding layer and is not a database engine.
//!
//! ## Example
//!
//! ```rust
//! use pgembed_engine::{Engine, MemoryCluster};
//!
//! let cluster = MemoryCluster::shared();
//! let engine = cluster.engine();
//! assert!(!engine.is_transaction_state());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod engine;
pub mod error;
pub mod input;
pub mod lockfile;
pub mod memory;
pub mod spi;
pub mod startup;

pub use engine::{BootstrapArgs, Engine};
pub use error::{EngineError, EngineErrorKind, EngineResult, Severity};
pub use input::InputChannel;
pub use lockfile::ClusterLock;
pub use memory::{DatabaseInfo, MemoryCluster, MemoryEngine};
pub use spi::{SpiOutcome, SpiStatus, TupleTable};
pub use startup::{StartupPhase, StartupStep};
