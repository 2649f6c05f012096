//! Type definitions shared across pgembed crates.

mod encoding;
mod identity;

pub use encoding::Encoding;
pub use identity::SessionIdentity;
