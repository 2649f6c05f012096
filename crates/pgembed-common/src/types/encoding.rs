//! Character set encodings understood by the engine.
//!
//! The engine identifies encodings by a small integer code. Bootstrap needs
//! that code to stamp the template database, so the name supplied by the
//! host is resolved here, before the engine is ever touched.

use std::fmt;

/// A resolved character set encoding.
///
/// # Example
///
/// ```rust
/// use pgembed_common::types::Encoding;
///
/// let enc = Encoding::from_name("utf-8").unwrap();
/// assert_eq!(enc.code(), 6);
/// assert_eq!(enc.name(), "UTF8");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Encoding {
    name: &'static str,
    code: i32,
}

/// Canonical encoding names, indexed by engine code.
const ENCODINGS: &[&str] = &[
    "SQL_ASCII",
    "EUC_JP",
    "EUC_CN",
    "EUC_KR",
    "EUC_TW",
    "EUC_JIS_2004",
    "UTF8",
    "MULE_INTERNAL",
    "LATIN1",
    "LATIN2",
    "LATIN3",
    "LATIN4",
    "LATIN5",
    "LATIN6",
    "LATIN7",
    "LATIN8",
    "LATIN9",
    "LATIN10",
    "WIN1256",
    "WIN1258",
    "WIN866",
    "WIN874",
    "KOI8R",
    "WIN1251",
    "WIN1252",
    "ISO_8859_5",
    "ISO_8859_6",
    "ISO_8859_7",
    "ISO_8859_8",
    "WIN1250",
    "WIN1253",
    "WIN1254",
    "WIN1255",
    "WIN1257",
    "KOI8U",
    "SJIS",
    "BIG5",
    "GBK",
    "UHC",
    "GB18030",
    "JOHAB",
    "SHIFT_JIS_2004",
];

/// Highest code that may be used as a server (database) encoding.
const LAST_SERVER_ENCODING: i32 = 34;

/// Alternate spellings, keyed by cleaned name.
const ALIASES: &[(&str, &str)] = &[
    ("unicode", "UTF8"),
    ("utf8", "UTF8"),
    ("sqlascii", "SQL_ASCII"),
    ("iso88591", "LATIN1"),
    ("iso88592", "LATIN2"),
    ("iso88593", "LATIN3"),
    ("iso88594", "LATIN4"),
    ("iso88599", "LATIN5"),
    ("iso885910", "LATIN6"),
    ("iso885913", "LATIN7"),
    ("iso885914", "LATIN8"),
    ("iso885915", "LATIN9"),
    ("iso885916", "LATIN10"),
    ("koi8", "KOI8R"),
    ("win", "WIN1251"),
    ("alt", "WIN866"),
    ("tcvn", "WIN1258"),
    ("abc", "WIN1258"),
    ("mskanji", "SJIS"),
    ("shiftjis", "SJIS"),
];

/// Lowercases and strips everything but ASCII letters and digits.
fn clean_name(name: &str) -> String {
    name.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

impl Encoding {
    /// The default UTF-8 encoding.
    pub const UTF8: Self = Self {
        name: "UTF8",
        code: 6,
    };

    /// Resolves an encoding by name.
    ///
    /// Matching ignores case and punctuation, so `utf-8`, `UTF8` and
    /// `unicode` all resolve to the same encoding.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        let cleaned = clean_name(name);
        if cleaned.is_empty() {
            return None;
        }

        let canonical = ALIASES
            .iter()
            .find(|(alias, _)| *alias == cleaned)
            .map(|(_, canonical)| *canonical);

        ENCODINGS
            .iter()
            .enumerate()
            .find(|(_, known)| match canonical {
                Some(c) => **known == c,
                None => clean_name(known) == cleaned,
            })
            .map(|(code, known)| Self {
                name: *known,
                code: code as i32,
            })
    }

    /// Returns the encoding for an engine code.
    #[must_use]
    pub fn from_code(code: i32) -> Option<Self> {
        usize::try_from(code)
            .ok()
            .and_then(|idx| ENCODINGS.get(idx))
            .map(|name| Self { name: *name, code })
    }

    /// Returns the canonical name.
    #[inline]
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the engine code.
    #[inline]
    #[must_use]
    pub const fn code(&self) -> i32 {
        self.code
    }

    /// Returns true if a database may be created with this encoding.
    ///
    /// Client-only encodings can be negotiated on a connection but never
    /// stored in a cluster.
    #[inline]
    #[must_use]
    pub const fn is_server_encoding(&self) -> bool {
        self.code <= LAST_SERVER_ENCODING
    }
}

impl Default for Encoding {
    fn default() -> Self {
        Self::UTF8
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_spellings() {
        for name in ["UTF8", "utf8", "utf-8", "UTF_8", "Unicode"] {
            assert_eq!(Encoding::from_name(name), Some(Encoding::UTF8), "{}", name);
        }
        assert_eq!(Encoding::from_name("SQL_ASCII").unwrap().code(), 0);
        assert_eq!(Encoding::from_name("latin1").unwrap().code(), 8);
        assert_eq!(Encoding::from_name("ISO-8859-1").unwrap().name(), "LATIN1");
        assert_eq!(Encoding::from_name("ISO_8859_5").unwrap().code(), 25);
    }

    #[test]
    fn test_unknown_encoding() {
        assert!(Encoding::from_name("").is_none());
        assert!(Encoding::from_name("klingon").is_none());
    }

    #[test]
    fn test_client_only_encodings() {
        let sjis = Encoding::from_name("SJIS").unwrap();
        assert_eq!(sjis.code(), 35);
        assert!(!sjis.is_server_encoding());
        assert!(Encoding::from_name("KOI8U").unwrap().is_server_encoding());
    }

    #[test]
    fn test_from_code() {
        assert_eq!(Encoding::from_code(6), Some(Encoding::UTF8));
        assert!(Encoding::from_code(-1).is_none());
        assert!(Encoding::from_code(1000).is_none());
    }
}
