//! Placeholder substitution for the catalog bootstrap template.
//!
//! The template contains upper-case placeholders such as `POSTGRES` and
//! `ENCODING` that depend on the platform and on the new cluster's identity.
//! [`SubstitutionTable`] holds one (token, replacement) pair per placeholder
//! and rewrites a template line in a single left-to-right pass.
//!
//! A token only matches as a whole word: the characters on either side must
//! not be identifier characters. Where several tokens could match at the
//! same position the longest one wins, so a token that is a prefix of
//! another never shadows it.

use pgembed_common::{Encoding, LIBC_LOCALE_PROVIDER, NAMEDATALEN, NULL_SENTINEL};

/// Placeholders and their replacements, checked longest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubstitutionTable {
    entries: Vec<(&'static str, String)>,
}

/// Values the platform-independent placeholders are replaced with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateValues<'a> {
    /// Bootstrap superuser.
    pub username: &'a str,
    /// Resolved cluster encoding.
    pub encoding: Encoding,
    /// Locale used for both collation and character classification.
    pub locale: &'a str,
}

impl SubstitutionTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Creates the table for a new cluster on this platform.
    pub fn for_cluster(values: &TemplateValues<'_>) -> Self {
        let pointer_size = std::mem::size_of::<usize>();
        let pointer_align = if pointer_size == 4 { "i" } else { "d" };

        let mut table = Self::new();
        table.insert("NAMEDATALEN", NAMEDATALEN.to_string());
        table.insert("SIZEOF_POINTER", pointer_size.to_string());
        table.insert("ALIGNOF_POINTER", pointer_align);
        table.insert("POSTGRES", values.username);
        table.insert("ENCODING", values.encoding.code().to_string());
        table.insert("LC_COLLATE", values.locale);
        table.insert("LC_CTYPE", values.locale);
        table.insert("DATLOCALE", NULL_SENTINEL);
        table.insert("ICU_RULES", NULL_SENTINEL);
        table.insert("LOCALE_PROVIDER", LIBC_LOCALE_PROVIDER);
        table
    }

    /// Adds or replaces a token.
    pub fn insert(&mut self, token: &'static str, replacement: impl Into<String>) {
        let replacement = replacement.into();
        if let Some(entry) = self.entries.iter_mut().find(|(t, _)| *t == token) {
            entry.1 = replacement;
            return;
        }
        // Keep longest first so the first match at a position is the most specific.
        let pos = self
            .entries
            .iter()
            .position(|(t, _)| t.len() < token.len())
            .unwrap_or(self.entries.len());
        self.entries.insert(pos, (token, replacement));
    }

    /// Returns the replacement for a token.
    pub fn get(&self, token: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(t, _)| *t == token)
            .map(|(_, r)| r.as_str())
    }

    /// Returns the number of tokens.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the table has no tokens.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rewrites one template line.
    pub fn apply(&self, line: &str) -> String {
        let bytes = line.as_bytes();
        let mut out = String::with_capacity(line.len());
        let mut pos = 0;
        let mut copied = 0;

        while pos < bytes.len() {
            let at_boundary = pos == 0 || !is_word_byte(bytes[pos - 1]);
            let matched = if at_boundary {
                self.entries.iter().find(|(token, _)| {
                    let end = pos + token.len();
                    bytes[pos..].starts_with(token.as_bytes())
                        && (end == bytes.len() || !is_word_byte(bytes[end]))
                })
            } else {
                None
            };

            match matched {
                Some((token, replacement)) => {
                    out.push_str(&line[copied..pos]);
                    out.push_str(replacement);
                    pos += token.len();
                    copied = pos;
                }
                None => pos += 1,
            }
        }

        out.push_str(&line[copied..]);
        out
    }
}

impl Default for SubstitutionTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Identifier characters; tokens never match inside a longer identifier.
fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}
