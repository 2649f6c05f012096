//! System-wide constants for pgembed.
//!
//! These values describe the on-disk cluster layout and the fixed
//! parameters handed to the engine during bootstrap and startup. They must
//! match the engine build the host links against.

// =============================================================================
// Cluster Layout
// =============================================================================

/// Major version of the embedded engine.
///
/// Written verbatim into the version marker file of every new cluster.
pub const ENGINE_MAJOR_VERSION: &str = "17";

/// Name of the version marker file at the root of a cluster.
///
/// A directory counts as an initialized cluster iff this file exists.
pub const VERSION_FILE: &str = "PG_VERSION";

/// Name of the primary configuration file at the root of a cluster.
pub const CONFIG_FILE: &str = "postgresql.conf";

/// Name of the exclusive lock file held by a running engine.
pub const LOCK_FILE: &str = "postmaster.pid";

/// Subdirectories created inside every new cluster, in creation order.
///
/// Parents always precede their children so the list can be created with
/// plain single-level directory creation.
pub const CLUSTER_SUBDIRS: &[&str] = &[
    "global",
    "pg_wal",
    "pg_wal/archive_status",
    "pg_commit_ts",
    "pg_dynshmem",
    "pg_notify",
    "pg_serial",
    "pg_snapshots",
    "pg_subtrans",
    "pg_twophase",
    "pg_multixact",
    "pg_multixact/members",
    "pg_multixact/offsets",
    "base",
    "base/1",
    "pg_replslot",
    "pg_tblspc",
    "pg_stat",
    "pg_stat_tmp",
    "pg_xact",
    "pg_logical",
    "pg_logical/snapshots",
    "pg_logical/mappings",
];

// =============================================================================
// Bootstrap Parameters
// =============================================================================

/// Maximum identifier length (including the terminator) compiled into the engine.
pub const NAMEDATALEN: usize = 64;

/// Default encoding name used when the caller does not specify one.
pub const DEFAULT_ENCODING: &str = "UTF8";

/// Default locale used when the caller does not specify one.
pub const DEFAULT_LOCALE: &str = "C";

/// Default superuser name.
pub const DEFAULT_USERNAME: &str = "postgres";

/// Default database to connect to.
pub const DEFAULT_DATABASE: &str = "postgres";

/// Debug verbosity passed to the bootstrap interpreter.
pub const DEFAULT_BOOTSTRAP_DEBUG_LEVEL: u8 = 3;

/// WAL segment size passed to the bootstrap interpreter (1 MB).
pub const DEFAULT_WAL_SEGMENT_SIZE: u32 = 1024 * 1024;

/// Default bootstrap template location, relative to the working directory.
pub const DEFAULT_BOOTSTRAP_TEMPLATE: &str = "share/postgres.bki";

/// Prefix of the scratch file the substituted bootstrap script is written to.
pub const BOOTSTRAP_SCRATCH_PREFIX: &str = "pg_bootstrap";

// =============================================================================
// Process Identity
// =============================================================================

/// Program name reported to the engine and used for executable path lookup.
pub const DEFAULT_PROGNAME: &str = "postgres_embedded";

/// Sentinel written for locale-provider fields that are not set.
pub const NULL_SENTINEL: &str = "_null_";

/// Locale provider code for the libc provider.
pub const LIBC_LOCALE_PROVIDER: &str = "c";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subdirs_parents_first() {
        for (i, dir) in CLUSTER_SUBDIRS.iter().enumerate() {
            if let Some((parent, _)) = dir.rsplit_once('/') {
                let parent_pos = CLUSTER_SUBDIRS.iter().position(|d| *d == parent);
                assert!(
                    matches!(parent_pos, Some(p) if p < i),
                    "parent of {} must be listed before it",
                    dir
                );
            }
        }
    }

    #[test]
    fn test_version_is_numeric() {
        assert!(ENGINE_MAJOR_VERSION.chars().all(|c| c.is_ascii_digit()));
    }
}
