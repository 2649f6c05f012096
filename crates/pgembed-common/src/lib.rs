//! # pgembed-common
//!
//! Common constants, configuration and identity types for pgembed.
//!
//! This crate provides the pieces shared by the engine boundary
//! (`pgembed-engine`) and the embedding layer (`pgembed`):
//!
//! - **Constants**: cluster layout, version marker, bootstrap defaults
//! - **Config**: [`EmbedConfig`] with durability and bootstrap settings
//! - **Types**: [`Encoding`] resolution and [`SessionIdentity`]
//!
//! ## Example
//!
//! ```rust
//! use pgembed_common::{EmbedConfig, SessionIdentity};
//!
//! let config = EmbedConfig::new("/tmp/pgdata");
//! let identity: SessionIdentity = config.identity();
//! assert_eq!(identity.locale(), "C");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod constants;
pub mod types;

pub use config::{BootstrapConfig, ConfigError, ConfigResult, DurabilityConfig, EmbedConfig};
pub use constants::*;
pub use types::{Encoding, SessionIdentity};
