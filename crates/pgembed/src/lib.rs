//! # pgembed
//!
//! Runs a PostgreSQL-compatible engine inside the calling process, with no
//! server and no network.
//!
//! This crate provides:
//!
//! - **Bootstrap**: [`Bootstrapper`] creates a cluster directory and
//!   populates its system catalogs from a template script.
//!
//! - **Lifecycle**: [`Embedded::start`] brings the engine up in single-user
//!   mode; [`Embedded::shutdown`] runs its exit callbacks without ending
//!   the process.
//!
//! - **Transactions and queries**: explicit `begin`/`commit`/`rollback`,
//!   and [`Embedded::execute`], which wraps a lone statement in its own
//!   transaction.
//!
//! - **Errors**: every failure is an [`EmbedError`]; the handle also keeps
//!   the last message for callers that only want text.
//!
//! Engine state is process-global. Keep one started handle per process and
//! serialize calls to it, for example with [`SharedEmbedded`].
//!
//! # Quick Start
//!
//! The handle drives any [`Engine`](pgembed_engine::Engine) implementation.
//! `pgembed_engine::MemoryEngine` is an in-memory stand-in for tests; it is
//! not a database engine, and data kept in it never reaches the disk.
//!
//! ```rust,no_run
//! use pgembed::{EmbedConfig, EmbedResult, Embedded};
//! use pgembed_engine::Engine;
//!
//! fn run<E: Engine>(engine: E) -> EmbedResult<()> {
//!     let config = EmbedConfig::builder()
//!         .data_dir("/var/lib/myapp/pgdata")
//!         .bootstrap_template("/usr/share/postgresql/postgres.bki")
//!         .build();
//!     let mut db = Embedded::open(engine, &config)?;
//!
//!     db.execute("CREATE TABLE users (id int, name text)")?;
//!     db.transaction(|db| {
//!         db.execute("INSERT INTO users VALUES (1, 'Alice')")?;
//!         db.execute("INSERT INTO users VALUES (2, NULL)")
//!     })?;
//!
//!     let result = db.execute("SELECT * FROM users")?;
//!     println!("{}", result.display());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bootstrap;
pub mod embedded;
pub mod error;
pub mod lifecycle;
mod query;
pub mod result;
pub mod shared;
pub mod txn;

pub use bootstrap::{BootstrapOutcome, Bootstrapper, ClusterLayout, SubstitutionTable, TemplateValues};
pub use embedded::{Embedded, EmbeddedStats, EngineState};
pub use error::{EmbedError, EmbedResult, ErrorCode, ExecError};
pub use result::{ResultKind, ResultSet};
pub use shared::SharedEmbedded;
pub use txn::{TransactionCoordinator, TransactionState};

pub use pgembed_common::{BootstrapConfig, DurabilityConfig, EmbedConfig};
