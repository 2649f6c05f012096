//! Catalog state and bootstrap interpreter of the in-memory engine.
//!
//! The interpreter understands the subset of the catalog bootstrap format
//! the embedding layer relies on:
//!
//! ```text
//! create <relation> <oid> [options] ( <attr> = <type> , ... )
//! open <relation>
//! insert ( <value> ... )
//! close <relation>
//! ```
//!
//! A `create` column list may span several lines. Rows inserted into
//! `pg_database` register databases and rows inserted into `pg_authid`
//! register roles. Every other command is accepted and ignored.

use std::collections::{BTreeMap, BTreeSet};

use tracing::trace;

use crate::error::{EngineError, EngineErrorKind, EngineResult};

use super::sql::Tables;

/// A database registered during bootstrap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseInfo {
    /// Database name.
    pub name: String,
    /// Numeric encoding code.
    pub encoding: i32,
    /// Collation locale.
    pub collate: String,
    /// Character classification locale.
    pub ctype: String,
}

#[derive(Debug, Clone)]
pub(crate) struct DatabaseEntry {
    pub info: DatabaseInfo,
    pub tables: Tables,
}

/// Everything the bootstrap run created.
#[derive(Debug, Clone, Default)]
pub(crate) struct Catalog {
    pub databases: BTreeMap<String, DatabaseEntry>,
    pub roles: BTreeSet<String>,
    relations: BTreeMap<String, Vec<String>>,
}

fn bootstrap_error(line_no: usize, message: impl std::fmt::Display) -> EngineError {
    EngineError::fatal(
        EngineErrorKind::General,
        format!("bootstrap line {}: {}", line_no, message),
    )
}

/// Splits a bootstrap line into words, honouring double quotes.
fn words(line: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut chars = line.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == '"' {
            chars.next();
            let mut word = String::new();
            for c in chars.by_ref() {
                if c == '"' {
                    break;
                }
                word.push(c);
            }
            words.push(word);
        } else {
            let mut word = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                word.push(c);
                chars.next();
            }
            words.push(word);
        }
    }
    words
}

/// Interprets bootstrap scripts one line at a time.
#[derive(Debug, Default)]
pub(crate) struct BootstrapInterpreter {
    catalog: Catalog,
    open: Option<String>,
    pending_create: Option<String>,
    line_no: usize,
}

impl BootstrapInterpreter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn line(&mut self, line: &str) -> EngineResult<()> {
        self.line_no += 1;

        if let Some(mut pending) = self.pending_create.take() {
            pending.push(' ');
            pending.push_str(line);
            if line.contains(')') {
                return self.create(&words(&pending));
            }
            self.pending_create = Some(pending);
            return Ok(());
        }

        let words = words(line);
        let Some(command) = words.first() else {
            return Ok(());
        };

        match command.as_str() {
            "create" if !line.contains(')') => {
                self.pending_create = Some(line.to_string());
                Ok(())
            }
            "create" => self.create(&words),
            "open" => {
                let relation = words
                    .get(1)
                    .ok_or_else(|| bootstrap_error(self.line_no, "open requires a relation"))?;
                if !self.catalog.relations.contains_key(relation) {
                    return Err(bootstrap_error(
                        self.line_no,
                        format!("relation \"{}\" does not exist", relation),
                    ));
                }
                self.open = Some(relation.clone());
                Ok(())
            }
            "close" => {
                match (words.get(1), &self.open) {
                    (Some(name), Some(open)) if name == open => {}
                    (None, Some(_)) => {}
                    (_, open) => {
                        return Err(bootstrap_error(
                            self.line_no,
                            format!(
                                "close of {} when {} was expected",
                                words.get(1).map(String::as_str).unwrap_or("(none)"),
                                open.as_deref().unwrap_or("(none)")
                            ),
                        ))
                    }
                }
                self.open = None;
                Ok(())
            }
            "insert" => self.insert(&words),
            _ => {
                trace!(line = self.line_no, command = %command, "Ignoring bootstrap command");
                Ok(())
            }
        }
    }

    fn create(&mut self, words: &[String]) -> EngineResult<()> {
        let relation = words
            .get(1)
            .ok_or_else(|| bootstrap_error(self.line_no, "create requires a relation"))?;

        let mut attrs = Vec::new();
        if let Some(open) = words.iter().position(|w| w == "(") {
            let mut rest = words[open + 1..].iter();
            while let Some(word) = rest.next() {
                match word.as_str() {
                    ")" => break,
                    "," => {}
                    name => {
                        attrs.push(name.to_string());
                        // Skip "= type" and any trailing modifiers up to the next attribute.
                        for word in rest.by_ref() {
                            if word == "," {
                                break;
                            }
                            if word == ")" {
                                self.catalog.relations.insert(relation.clone(), attrs);
                                return Ok(());
                            }
                        }
                    }
                }
            }
        }
        self.catalog.relations.insert(relation.clone(), attrs);
        Ok(())
    }

    fn insert(&mut self, words: &[String]) -> EngineResult<()> {
        let relation = self
            .open
            .clone()
            .ok_or_else(|| bootstrap_error(self.line_no, "insert with no relation open"))?;

        let start = words
            .iter()
            .position(|w| w == "(")
            .ok_or_else(|| bootstrap_error(self.line_no, "insert requires a value list"))?;
        let end = words
            .iter()
            .rposition(|w| w == ")")
            .filter(|&end| end > start)
            .ok_or_else(|| bootstrap_error(self.line_no, "unterminated value list"))?;
        let values = &words[start + 1..end];

        let attrs = self
            .catalog
            .relations
            .get(&relation)
            .cloned()
            .unwrap_or_default();
        if values.len() != attrs.len() {
            return Err(bootstrap_error(
                self.line_no,
                format!(
                    "incorrect number of columns in row (expected {}, got {})",
                    attrs.len(),
                    values.len()
                ),
            ));
        }
        let field = |name: &str| {
            attrs
                .iter()
                .position(|a| a == name)
                .map(|i| values[i].clone())
                .ok_or_else(|| {
                    bootstrap_error(
                        self.line_no,
                        format!("relation \"{}\" has no attribute \"{}\"", relation, name),
                    )
                })
        };

        match relation.as_str() {
            "pg_database" => {
                let name = field("datname")?;
                let raw = field("encoding")?;
                let encoding = raw.parse::<i32>().map_err(|_| {
                    bootstrap_error(
                        self.line_no,
                        format!("invalid input syntax for type integer: \"{}\"", raw),
                    )
                })?;
                let info = DatabaseInfo {
                    name: name.clone(),
                    encoding,
                    collate: field("datcollate")?,
                    ctype: field("datctype")?,
                };
                trace!(database = %name, encoding, "Bootstrap registered database");
                self.catalog.databases.insert(
                    name,
                    DatabaseEntry {
                        info,
                        tables: Tables::new(),
                    },
                );
            }
            "pg_authid" => {
                let role = field("rolname")?;
                trace!(role = %role, "Bootstrap registered role");
                self.catalog.roles.insert(role);
            }
            _ => {}
        }
        Ok(())
    }

    pub fn finish(self) -> EngineResult<Catalog> {
        if self.pending_create.is_some() {
            return Err(bootstrap_error(self.line_no, "unterminated create column list"));
        }
        if let Some(open) = self.open {
            return Err(bootstrap_error(
                self.line_no,
                format!("relation \"{}\" still open at end of input", open),
            ));
        }
        Ok(self.catalog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCRIPT: &str = "\
create pg_authid 1260 bootstrap shared_relation ( oid = oid , rolname = name , rolsuper = bool )
create pg_database 1262 bootstrap shared_relation ( oid = oid , datname = name , encoding = int4 , datcollate = text , datctype = text )
open pg_authid
insert ( 10 admin t )
close pg_authid
open pg_database
insert ( 1 template1 6 C C )
insert ( 5 \"my db\" 8 en_US en_US )
close pg_database
declare unique index pg_database_oid_index 2672 on pg_database using btree(oid oid_ops)
build indices
";

    fn run(script: &str) -> EngineResult<Catalog> {
        let mut interp = BootstrapInterpreter::new();
        for line in script.lines() {
            interp.line(line)?;
        }
        interp.finish()
    }

    #[test]
    fn test_words_with_quotes() {
        assert_eq!(
            words("insert ( 5 \"my db\" 8 )"),
            vec!["insert", "(", "5", "my db", "8", ")"]
        );
        assert!(words("   ").is_empty());
    }

    #[test]
    fn test_registers_databases_and_roles() {
        let catalog = run(SCRIPT).unwrap();
        assert!(catalog.roles.contains("admin"));

        let template1 = &catalog.databases["template1"].info;
        assert_eq!(template1.encoding, 6);
        assert_eq!(template1.collate, "C");

        let mine = &catalog.databases["my db"].info;
        assert_eq!(mine.encoding, 8);
        assert_eq!(mine.ctype, "en_US");
    }

    #[test]
    fn test_unsubstituted_encoding_is_rejected() {
        let script = SCRIPT.replace("( 1 template1 6 C C )", "( 1 template1 ENCODING C C )");
        let err = run(&script).unwrap_err();
        assert!(err.message.contains("invalid input syntax for type integer: \"ENCODING\""));
    }

    #[test]
    fn test_wrong_column_count() {
        let script = SCRIPT.replace("( 10 admin t )", "( 10 admin )");
        let err = run(&script).unwrap_err();
        assert!(err.message.contains("expected 3, got 2"));
    }

    #[test]
    fn test_multi_line_create() {
        let script = "\
create pg_authid 1260 bootstrap shared_relation
 (
 oid = oid ,
 rolname = name
 )
open pg_authid
insert ( 10 postgres )
close pg_authid
";
        let catalog = run(script).unwrap();
        assert!(catalog.roles.contains("postgres"));
    }

    #[test]
    fn test_insert_without_open() {
        let mut interp = BootstrapInterpreter::new();
        let err = interp.line("insert ( 1 )").unwrap_err();
        assert!(err.message.contains("no relation open"));
    }

    #[test]
    fn test_unclosed_relation() {
        let mut interp = BootstrapInterpreter::new();
        interp.line("create t 1 ( a = int4 )").unwrap();
        interp.line("open t").unwrap();
        assert!(interp.finish().is_err());
    }
}
