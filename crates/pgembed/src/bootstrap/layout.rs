//! On-disk layout of a new cluster.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use pgembed_common::{CLUSTER_SUBDIRS, CONFIG_FILE, ENGINE_MAJOR_VERSION, VERSION_FILE};
use tracing::{debug, warn};

use crate::error::{EmbedError, EmbedResult};

/// Paths and creation steps for one cluster directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterLayout {
    root: PathBuf,
}

impl ClusterLayout {
    /// Creates a layout rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the cluster root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the version marker path.
    pub fn version_file(&self) -> PathBuf {
        self.root.join(VERSION_FILE)
    }

    /// Returns the primary configuration file path.
    pub fn config_file(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    /// Returns every subdirectory path, parents first.
    pub fn subdirs(&self) -> impl Iterator<Item = PathBuf> + '_ {
        CLUSTER_SUBDIRS.iter().map(move |dir| self.root.join(dir))
    }

    /// Returns true if the directory holds an initialized cluster.
    pub fn is_initialized(&self) -> bool {
        self.version_file().exists()
    }

    /// Creates the root directory. Returns true if it did not exist before.
    pub fn create_root(&self) -> EmbedResult<bool> {
        if self.root.is_dir() {
            warn!(path = %self.root.display(), "Data directory already exists; populating it");
            return Ok(false);
        }
        fs::create_dir_all(&self.root).map_err(|e| {
            EmbedError::init_io(
                format!("could not create directory \"{}\"", self.root.display()),
                e,
            )
        })?;
        Ok(true)
    }

    /// Creates every subdirectory. Existing directories are kept.
    pub fn create_subdirs(&self) -> EmbedResult<()> {
        for dir in self.subdirs() {
            match fs::create_dir(&dir) {
                Ok(()) => debug!(path = %dir.display(), "Created directory"),
                Err(e) if e.kind() == ErrorKind::AlreadyExists && dir.is_dir() => {}
                Err(e) => {
                    return Err(EmbedError::init_io(
                        format!("could not create directory \"{}\"", dir.display()),
                        e,
                    ))
                }
            }
        }
        Ok(())
    }

    /// Writes the version marker and flushes it to disk.
    pub fn write_version_file(&self) -> EmbedResult<()> {
        let path = self.version_file();
        let write = || -> std::io::Result<()> {
            let mut file = File::create(&path)?;
            writeln!(file, "{}", ENGINE_MAJOR_VERSION)?;
            file.sync_all()
        };
        write().map_err(|e| {
            EmbedError::init_io(format!("could not write file \"{}\"", path.display()), e)
        })
    }

    /// Creates an empty configuration file. An existing file is kept.
    pub fn write_config_file(&self) -> EmbedResult<()> {
        let path = self.config_file();
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!(path = %path.display(), "Keeping existing configuration file");
                Ok(())
            }
            Err(e) => Err(EmbedError::init_io(
                format!("could not create file \"{}\"", path.display()),
                e,
            )),
        }
    }

    /// Removes what a failed bootstrap left behind.
    ///
    /// A root created by this run is removed entirely. Otherwise only the
    /// version marker is removed, so the directory does not look initialized.
    pub fn cleanup_after_failure(&self, created_root: bool) {
        let result = if created_root {
            fs::remove_dir_all(&self.root)
        } else {
            match fs::remove_file(self.version_file()) {
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                other => other,
            }
        };
        if let Err(e) = result {
            warn!(path = %self.root.display(), error = %e, "Could not clean up after failed bootstrap");
        }
    }
}
