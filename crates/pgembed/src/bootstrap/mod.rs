//! Cluster creation.
//!
//! [`Bootstrapper`] turns an empty (or missing) directory into a cluster the
//! engine can start on:
//!
//! 1. Create the directory tree, the version marker and an empty
//!    configuration file ([`ClusterLayout`]).
//! 2. Rewrite the catalog bootstrap template into a scratch file, replacing
//!    the placeholders with values for this cluster ([`SubstitutionTable`]).
//! 3. Point the engine's input at the scratch file and run the bootstrap
//!    interpreter over it. The engine's previous input is restored on every
//!    exit path.
//!
//! A directory that already holds a version marker is left untouched.

mod layout;
mod tokens;

use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

use pgembed_common::{
    BootstrapConfig, Encoding, BOOTSTRAP_SCRATCH_PREFIX, DEFAULT_ENCODING, DEFAULT_LOCALE,
    NAMEDATALEN,
};
use pgembed_engine::{BootstrapArgs, Engine, EngineErrorKind, InputChannel};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::{EmbedError, EmbedResult};

pub use layout::ClusterLayout;
pub use tokens::{SubstitutionTable, TemplateValues};

/// What a bootstrap call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// A new cluster was created.
    Created,
    /// The directory already held a cluster; nothing was changed.
    AlreadyInitialized,
}

/// Creates clusters from a bootstrap template.
#[derive(Debug, Clone)]
pub struct Bootstrapper<'a> {
    config: &'a BootstrapConfig,
}

impl<'a> Bootstrapper<'a> {
    /// Creates a bootstrapper using `config`.
    pub fn new(config: &'a BootstrapConfig) -> Self {
        Self { config }
    }

    /// Creates a cluster at `data_dir` owned by `username`.
    ///
    /// `encoding` and `locale` default to UTF8 and C.
    pub fn initialize<E: Engine>(
        &self,
        engine: &mut E,
        data_dir: &Path,
        username: &str,
        encoding: Option<&str>,
        locale: Option<&str>,
    ) -> EmbedResult<BootstrapOutcome> {
        if data_dir.as_os_str().is_empty() {
            return Err(EmbedError::invalid_argument("data directory is required"));
        }
        if username.is_empty() {
            return Err(EmbedError::invalid_argument("user name is required"));
        }
        // An existing cluster is left untouched whatever the other arguments say.
        let layout = ClusterLayout::new(data_dir);
        if layout.is_initialized() {
            warn!(path = %data_dir.display(), "Data directory already initialized; skipping bootstrap");
            return Ok(BootstrapOutcome::AlreadyInitialized);
        }

        if username.len() >= NAMEDATALEN {
            return Err(EmbedError::invalid_argument(format!(
                "user name must be shorter than {} bytes",
                NAMEDATALEN
            )));
        }
        let encoding = resolve_encoding(encoding.unwrap_or(DEFAULT_ENCODING))?;
        let locale = locale.unwrap_or(DEFAULT_LOCALE);

        let template = fs::read_to_string(&self.config.template).map_err(|e| {
            EmbedError::init_io(
                format!(
                    "could not read bootstrap template \"{}\"",
                    self.config.template.display()
                ),
                e,
            )
        })?;

        info!(
            path = %data_dir.display(),
            user = username,
            encoding = encoding.name(),
            locale,
            "Creating cluster"
        );

        let created_root = layout.create_root()?;
        let values = TemplateValues {
            username,
            encoding,
            locale,
        };
        if let Err(e) = self.populate(engine, &layout, &template, &values) {
            layout.cleanup_after_failure(created_root);
            return Err(e);
        }

        info!(path = %data_dir.display(), "Cluster created");
        Ok(BootstrapOutcome::Created)
    }

    fn populate<E: Engine>(
        &self,
        engine: &mut E,
        layout: &ClusterLayout,
        template: &str,
        values: &TemplateValues<'_>,
    ) -> EmbedResult<()> {
        layout.create_subdirs()?;
        layout.write_version_file()?;
        layout.write_config_file()?;

        let table = SubstitutionTable::for_cluster(values);
        let script = write_script(&self.config.effective_scratch_dir(), template, &table)?;
        debug!(path = %script.path().display(), "Wrote bootstrap script");

        let input = InputChannel::script(script.path()).map_err(|e| {
            EmbedError::init_io(
                format!("could not open bootstrap script \"{}\"", script.path().display()),
                e,
            )
        })?;

        let args = BootstrapArgs::new(
            layout.root(),
            self.config.debug_level,
            self.config.wal_segment_size,
        );
        let mut redirect = InputRedirect::new(engine, input);
        redirect.engine().bootstrap_main(&args).map_err(|e| match e.kind {
            EngineErrorKind::OutOfMemory => EmbedError::Allocation,
            _ => EmbedError::init(format!("Bootstrap failed: {}", e.full_message())),
        })
    }
}

/// Resolves an encoding name to a server encoding.
fn resolve_encoding(name: &str) -> EmbedResult<Encoding> {
    let encoding = Encoding::from_name(name)
        .ok_or_else(|| EmbedError::init(format!("invalid encoding name \"{}\"", name)))?;
    if !encoding.is_server_encoding() {
        return Err(EmbedError::init(format!(
            "encoding \"{}\" is not allowed as a server encoding",
            encoding.name()
        )));
    }
    Ok(encoding)
}

/// Writes the substituted template to a scratch file removed on drop.
fn write_script(
    scratch_dir: &Path,
    template: &str,
    table: &SubstitutionTable,
) -> EmbedResult<NamedTempFile> {
    let scratch_err = |e: std::io::Error| {
        EmbedError::init_io(
            format!(
                "could not write bootstrap script in \"{}\"",
                scratch_dir.display()
            ),
            e,
        )
    };

    let file = tempfile::Builder::new()
        .prefix(BOOTSTRAP_SCRATCH_PREFIX)
        .suffix(".bki")
        .tempfile_in(scratch_dir)
        .map_err(scratch_err)?;

    {
        let mut out = BufWriter::new(file.as_file());
        for line in template.lines() {
            writeln!(out, "{}", table.apply(line)).map_err(scratch_err)?;
        }
        out.flush().map_err(scratch_err)?;
    }
    Ok(file)
}

/// Redirects the engine's input, restoring the previous channel on drop.
struct InputRedirect<'e, E: Engine> {
    engine: &'e mut E,
    saved: Option<InputChannel>,
}

impl<'e, E: Engine> InputRedirect<'e, E> {
    fn new(engine: &'e mut E, input: InputChannel) -> Self {
        let saved = engine.replace_input(input);
        Self {
            engine,
            saved: Some(saved),
        }
    }

    fn engine(&mut self) -> &mut E {
        self.engine
    }
}

impl<E: Engine> Drop for InputRedirect<'_, E> {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            self.engine.replace_input(saved);
        }
    }
}
