//! # pgembed-test
//!
//! Integration tests for pgembed.
//!
//! This crate contains:
//! - A catalog bootstrap template in the engine's script format
//! - [`TestCluster`], a throw-away cluster directory backed by the
//!   in-memory engine
//! - Logging setup for tests

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};

use pgembed::{BootstrapConfig, Embedded};
use pgembed_engine::{MemoryCluster, MemoryEngine};
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

/// Superuser and database every test cluster is created with.
pub const TEST_USER: &str = "postgres";

/// Database created by the bootstrap template.
pub const TEST_DATABASE: &str = "postgres";

/// A reduced catalog bootstrap template.
///
/// Same format and placeholders as the engine's full template, limited to
/// the two catalogs the in-memory engine reads.
pub const BOOTSTRAP_TEMPLATE: &str = "\
# PostgreSQL 17
create pg_authid 1260 bootstrap shared_relation rowtype_oid 2842
 (
 oid = oid ,
 rolname = name ,
 rolsuper = bool ,
 rolcanlogin = bool
 )
open pg_authid
insert ( 10 POSTGRES t t )
close pg_authid
create pg_database 1262 bootstrap shared_relation rowtype_oid 1248
 (
 oid = oid ,
 datname = name ,
 datdba = oid ,
 encoding = int4 ,
 datlocprovider = char ,
 datcollate = text ,
 datctype = text ,
 datlocale = text ,
 daticurules = text
 )
open pg_database
insert ( 1 template1 10 ENCODING LOCALE_PROVIDER LC_COLLATE LC_CTYPE DATLOCALE ICU_RULES )
insert ( 5 postgres 10 ENCODING LOCALE_PROVIDER LC_COLLATE LC_CTYPE DATLOCALE ICU_RULES )
close pg_database
";

static TRACING: Once = Once::new();

/// Installs a test-writer subscriber filtered by `RUST_LOG`. Safe to call
/// from every test.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// A temporary directory holding a template and a cluster directory.
pub struct TestCluster {
    dir: TempDir,
    cluster: Arc<MemoryCluster>,
}

impl TestCluster {
    /// Creates the directory and writes [`BOOTSTRAP_TEMPLATE`] into it.
    pub fn new() -> Self {
        Self::with_template(BOOTSTRAP_TEMPLATE)
    }

    /// Creates the directory with a custom template.
    pub fn with_template(template: &str) -> Self {
        init_tracing();
        let dir = TempDir::new().expect("create temp dir");
        fs::write(dir.path().join("postgres.bki"), template).expect("write template");
        Self {
            dir,
            cluster: MemoryCluster::shared(),
        }
    }

    /// Returns the temporary directory.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Returns the cluster directory. It does not exist until bootstrapped.
    pub fn data_dir(&self) -> PathBuf {
        self.dir.path().join("data")
    }

    /// Returns bootstrap settings pointing at the template, with scratch
    /// files kept inside the temporary directory.
    pub fn bootstrap_config(&self) -> BootstrapConfig {
        let mut config = BootstrapConfig::with_template(self.dir.path().join("postgres.bki"));
        config.scratch_dir = Some(self.dir.path().to_path_buf());
        config
    }

    /// Returns the engine's shared state.
    pub fn cluster(&self) -> &Arc<MemoryCluster> {
        &self.cluster
    }

    /// Creates a new engine over this cluster.
    pub fn engine(&self) -> MemoryEngine {
        self.cluster.engine()
    }

    /// Creates an unstarted handle.
    pub fn handle(&self) -> Embedded<MemoryEngine> {
        let mut db = Embedded::new(self.engine());
        db.set_bootstrap_config(self.bootstrap_config());
        db
    }

    /// Creates a handle, bootstraps the cluster and starts the engine.
    pub fn started(&self) -> Embedded<MemoryEngine> {
        let mut db = self.handle();
        db.initialize_cluster(self.data_dir(), TEST_USER, None, None)
            .expect("initialize cluster");
        db.start(self.data_dir(), TEST_DATABASE, TEST_USER, false)
            .expect("start engine");
        db
    }

    /// Lists every path under the cluster directory with its size.
    pub fn snapshot(&self) -> Vec<(PathBuf, u64)> {
        let mut entries = Vec::new();
        walk(&self.data_dir(), &mut entries);
        entries.sort();
        entries
    }
}

impl Default for TestCluster {
    fn default() -> Self {
        Self::new()
    }
}

fn walk(dir: &Path, out: &mut Vec<(PathBuf, u64)>) {
    let Ok(read) = fs::read_dir(dir) else {
        return;
    };
    for entry in read.filter_map(Result::ok) {
        let path = entry.path();
        let len = entry.metadata().map(|m| m.len()).unwrap_or(0);
        if path.is_dir() {
            walk(&path, out);
        }
        out.push((path, len));
    }
}
