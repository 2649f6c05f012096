//! Embedded instance configuration structures.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_BOOTSTRAP_DEBUG_LEVEL, DEFAULT_BOOTSTRAP_TEMPLATE, DEFAULT_DATABASE, DEFAULT_PROGNAME,
    DEFAULT_USERNAME, DEFAULT_WAL_SEGMENT_SIZE,
};
use crate::types::{Encoding, SessionIdentity};

use super::{ConfigError, ConfigResult};

/// Top-level configuration for an embedded instance.
///
/// # Example
///
/// ```rust
/// use pgembed_common::config::EmbedConfig;
///
/// let config = EmbedConfig::builder()
///     .data_dir("/tmp/pgdata")
///     .username("admin")
///     .build();
/// assert_eq!(config.database, "postgres");
/// assert!(config.durability.fsync);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedConfig {
    /// Cluster directory.
    #[serde(default)]
    pub data_dir: PathBuf,

    /// Database to connect to at startup.
    #[serde(default = "default_database")]
    pub database: String,

    /// Session user; also the bootstrap superuser.
    #[serde(default = "default_username")]
    pub username: String,

    /// Encoding for new clusters (defaults to UTF8).
    #[serde(default)]
    pub encoding: Option<String>,

    /// Locale for new clusters (defaults to "C").
    #[serde(default)]
    pub locale: Option<String>,

    /// Allow modification of system catalogs for this session.
    #[serde(default)]
    pub allow_system_catalog_mods: bool,

    /// Program name reported to the engine.
    #[serde(default = "default_progname")]
    pub progname: String,

    /// Durability switches applied at startup.
    #[serde(default)]
    pub durability: DurabilityConfig,

    /// Catalog bootstrap settings.
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
}

fn default_database() -> String {
    DEFAULT_DATABASE.to_string()
}

fn default_username() -> String {
    DEFAULT_USERNAME.to_string()
}

fn default_progname() -> String {
    DEFAULT_PROGNAME.to_string()
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::new(),
            database: default_database(),
            username: default_username(),
            encoding: None,
            locale: None,
            allow_system_catalog_mods: false,
            progname: default_progname(),
            durability: DurabilityConfig::default(),
            bootstrap: BootstrapConfig::default(),
        }
    }
}

impl EmbedConfig {
    /// Creates a configuration for a cluster directory.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Creates a builder for configuration.
    pub fn builder() -> EmbedConfigBuilder {
        EmbedConfigBuilder::new()
    }

    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Saves configuration to a TOML file.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = self.to_toml()?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Converts configuration to a TOML string.
    pub fn to_toml(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Returns the session identity described by this configuration.
    pub fn identity(&self) -> SessionIdentity {
        SessionIdentity {
            database: self.database.clone(),
            username: self.username.clone(),
            encoding: self.encoding.clone(),
            locale: self.locale.clone(),
        }
    }

    /// Checks that every required field is usable.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(ConfigError::invalid("data_dir", "must not be empty"));
        }
        if self.database.is_empty() {
            return Err(ConfigError::invalid("database", "must not be empty"));
        }
        if self.username.is_empty() {
            return Err(ConfigError::invalid("username", "must not be empty"));
        }
        if let Some(name) = &self.encoding {
            match Encoding::from_name(name) {
                Some(enc) if enc.is_server_encoding() => {}
                Some(_) => {
                    return Err(ConfigError::invalid(
                        "encoding",
                        format!("\"{}\" is not a valid server encoding", name),
                    ))
                }
                None => {
                    return Err(ConfigError::invalid(
                        "encoding",
                        format!("\"{}\" is not a valid encoding name", name),
                    ))
                }
            }
        }
        if self.bootstrap.wal_segment_size == 0 || !self.bootstrap.wal_segment_size.is_power_of_two()
        {
            return Err(ConfigError::invalid(
                "bootstrap.wal_segment_size",
                "must be a power of two",
            ));
        }
        Ok(())
    }
}

/// Durability versus speed trade-offs.
///
/// Every switch defaults to the safe setting. Turning any of them off makes
/// commits faster and risks losing committed data if the host crashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurabilityConfig {
    /// Flush data files to disk.
    #[serde(default = "default_true")]
    pub fsync: bool,
    /// Wait for the WAL flush before acknowledging a commit.
    #[serde(default = "default_true")]
    pub synchronous_commit: bool,
    /// Write full pages after a checkpoint to survive torn writes.
    #[serde(default = "default_true")]
    pub full_page_writes: bool,
}

fn default_true() -> bool {
    true
}

impl Default for DurabilityConfig {
    fn default() -> Self {
        Self {
            fsync: true,
            synchronous_commit: true,
            full_page_writes: true,
        }
    }
}

impl DurabilityConfig {
    /// All switches off. Only suitable for throw-away data.
    pub fn unsafe_fast() -> Self {
        Self {
            fsync: false,
            synchronous_commit: false,
            full_page_writes: false,
        }
    }

    /// Returns true if every switch is at its safe setting.
    pub fn is_durable(&self) -> bool {
        self.fsync && self.synchronous_commit && self.full_page_writes
    }

    /// Returns the engine settings needed to apply this configuration.
    ///
    /// Only disabled switches produce an override; safe settings are left to
    /// the cluster's configuration file.
    pub fn overrides(&self) -> Vec<(&'static str, &'static str)> {
        let mut settings = Vec::new();
        if !self.fsync {
            settings.push(("fsync", "off"));
        }
        if !self.synchronous_commit {
            settings.push(("synchronous_commit", "off"));
        }
        if !self.full_page_writes {
            settings.push(("full_page_writes", "off"));
        }
        settings
    }
}

/// Catalog bootstrap settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// Template catalog script.
    #[serde(default = "default_template")]
    pub template: PathBuf,

    /// Directory for the substituted scratch script (system temp dir if unset).
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,

    /// Debug verbosity handed to the bootstrap interpreter.
    #[serde(default = "default_debug_level")]
    pub debug_level: u8,

    /// WAL segment size in bytes.
    #[serde(default = "default_wal_segment_size")]
    pub wal_segment_size: u32,
}

fn default_template() -> PathBuf {
    PathBuf::from(DEFAULT_BOOTSTRAP_TEMPLATE)
}

fn default_debug_level() -> u8 {
    DEFAULT_BOOTSTRAP_DEBUG_LEVEL
}

fn default_wal_segment_size() -> u32 {
    DEFAULT_WAL_SEGMENT_SIZE
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            template: default_template(),
            scratch_dir: None,
            debug_level: default_debug_level(),
            wal_segment_size: default_wal_segment_size(),
        }
    }
}

impl BootstrapConfig {
    /// Creates bootstrap settings for a template script.
    pub fn with_template(template: impl Into<PathBuf>) -> Self {
        Self {
            template: template.into(),
            ..Default::default()
        }
    }

    /// Returns the directory the scratch script is written to.
    pub fn effective_scratch_dir(&self) -> PathBuf {
        self.scratch_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}

/// Builder for embedded configuration.
#[derive(Default)]
pub struct EmbedConfigBuilder {
    config: EmbedConfig,
}

impl EmbedConfigBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the cluster directory.
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.data_dir = dir.into();
        self
    }

    /// Sets the database to connect to.
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.config.database = database.into();
        self
    }

    /// Sets the session user.
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.config.username = username.into();
        self
    }

    /// Sets the encoding for new clusters.
    pub fn encoding(mut self, encoding: impl Into<String>) -> Self {
        self.config.encoding = Some(encoding.into());
        self
    }

    /// Sets the locale for new clusters.
    pub fn locale(mut self, locale: impl Into<String>) -> Self {
        self.config.locale = Some(locale.into());
        self
    }

    /// Allows system catalog modification.
    pub fn allow_system_catalog_mods(mut self, allow: bool) -> Self {
        self.config.allow_system_catalog_mods = allow;
        self
    }

    /// Sets the program name.
    pub fn progname(mut self, progname: impl Into<String>) -> Self {
        self.config.progname = progname.into();
        self
    }

    /// Sets the durability switches.
    pub fn durability(mut self, durability: DurabilityConfig) -> Self {
        self.config.durability = durability;
        self
    }

    /// Sets the bootstrap template script.
    pub fn bootstrap_template(mut self, template: impl Into<PathBuf>) -> Self {
        self.config.bootstrap.template = template.into();
        self
    }

    /// Sets the scratch directory for the substituted bootstrap script.
    pub fn scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.bootstrap.scratch_dir = Some(dir.into());
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> EmbedConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = EmbedConfig::default();
        assert_eq!(config.database, "postgres");
        assert_eq!(config.username, "postgres");
        assert_eq!(config.progname, "postgres_embedded");
        assert!(config.durability.is_durable());
        assert_eq!(config.bootstrap.debug_level, 3);
        assert_eq!(config.bootstrap.wal_segment_size, 1024 * 1024);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: EmbedConfig = toml::from_str(
            r#"
            data_dir = "/var/lib/app"
            username = "app"

            [durability]
            fsync = false
            "#,
        )
        .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/var/lib/app"));
        assert_eq!(config.username, "app");
        assert_eq!(config.database, "postgres");
        assert!(!config.durability.fsync);
        assert!(config.durability.synchronous_commit);
        assert!(config.durability.full_page_writes);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("conf").join("embed.toml");

        let config = EmbedConfig::builder()
            .data_dir("/data/cluster")
            .database("app")
            .encoding("LATIN1")
            .durability(DurabilityConfig::unsafe_fast())
            .build();
        config.save(&path).unwrap();

        let loaded = EmbedConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_file() {
        let err = EmbedConfig::from_file(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_validate() {
        assert!(EmbedConfig::default().validate().is_err());
        assert!(EmbedConfig::new("/data").validate().is_ok());

        let mut config = EmbedConfig::new("/data");
        config.username.clear();
        assert!(config.validate().is_err());

        let config = EmbedConfig::builder().data_dir("/data").encoding("SJIS").build();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("server encoding"));

        let config = EmbedConfig::builder().data_dir("/data").encoding("bogus").build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_durability_overrides() {
        assert!(DurabilityConfig::default().overrides().is_empty());

        let partial = DurabilityConfig {
            synchronous_commit: false,
            ..Default::default()
        };
        assert_eq!(partial.overrides(), vec![("synchronous_commit", "off")]);
        assert_eq!(DurabilityConfig::unsafe_fast().overrides().len(), 3);
    }
}
