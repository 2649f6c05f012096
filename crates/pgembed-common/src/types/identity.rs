//! Session identity.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_ENCODING, DEFAULT_LOCALE};

use super::Encoding;

/// Who the embedded session connects as, and with which cluster settings.
///
/// Encoding and locale only matter when a cluster is created: they are
/// stamped into the catalogs by bootstrap and cannot be changed afterwards
/// without re-bootstrapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionIdentity {
    /// Database to connect to.
    pub database: String,
    /// Role to connect as. Becomes the superuser when bootstrapping.
    pub username: String,
    /// Encoding requested at creation time.
    #[serde(default)]
    pub encoding: Option<String>,
    /// Locale requested at creation time.
    #[serde(default)]
    pub locale: Option<String>,
}

impl SessionIdentity {
    /// Creates an identity with default encoding and locale.
    pub fn new(database: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            username: username.into(),
            encoding: None,
            locale: None,
        }
    }

    /// Sets the creation-time encoding.
    #[must_use]
    pub fn with_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = Some(encoding.into());
        self
    }

    /// Sets the creation-time locale.
    #[must_use]
    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    /// Returns the requested encoding name, or the default.
    pub fn encoding_name(&self) -> &str {
        self.encoding.as_deref().unwrap_or(DEFAULT_ENCODING)
    }

    /// Resolves the requested encoding, `None` if the name is unknown.
    pub fn resolved_encoding(&self) -> Option<Encoding> {
        Encoding::from_name(self.encoding_name())
    }

    /// Returns the requested locale, or the default "C" locale.
    pub fn locale(&self) -> &str {
        self.locale.as_deref().unwrap_or(DEFAULT_LOCALE)
    }
}

impl fmt::Display for SessionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.username, self.database)
    }
}
