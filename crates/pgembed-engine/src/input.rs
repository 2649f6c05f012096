//! Engine input channel.
//!
//! The bootstrap interpreter reads its script from the engine's standard
//! input. Instead of re-pointing the process-wide stdin, the engine owns an
//! [`InputChannel`] that the embedding layer swaps out for the duration of a
//! bootstrap run.

use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Where the engine reads line-oriented input from.
#[derive(Default)]
pub enum InputChannel {
    /// The process's standard input.
    #[default]
    Stdin,
    /// A script file.
    Script {
        /// Path of the script.
        path: PathBuf,
        /// Buffered reader over the script.
        reader: BufReader<File>,
    },
}

impl InputChannel {
    /// Opens a script file as input.
    pub fn script(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        Ok(InputChannel::Script {
            path: path.to_path_buf(),
            reader: BufReader::new(file),
        })
    }

    /// Returns true if this is the process's standard input.
    pub fn is_stdin(&self) -> bool {
        matches!(self, InputChannel::Stdin)
    }

    /// Returns the script path, if this channel reads a script.
    pub fn script_path(&self) -> Option<&Path> {
        match self {
            InputChannel::Stdin => None,
            InputChannel::Script { path, .. } => Some(path),
        }
    }

    /// Reads one line into `buf`, returning the number of bytes read.
    ///
    /// Returns 0 at end of input.
    pub fn read_line(&mut self, buf: &mut String) -> io::Result<usize> {
        match self {
            InputChannel::Stdin => io::stdin().lock().read_line(buf),
            InputChannel::Script { reader, .. } => reader.read_line(buf),
        }
    }
}

impl fmt::Debug for InputChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputChannel::Stdin => write!(f, "InputChannel::Stdin"),
            InputChannel::Script { path, .. } => {
                f.debug_struct("InputChannel::Script").field("path", path).finish()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_script_reads_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "open pg_database").unwrap();
        writeln!(file, "close pg_database").unwrap();
        file.flush().unwrap();

        let mut input = InputChannel::script(file.path()).unwrap();
        assert!(!input.is_stdin());
        assert_eq!(input.script_path(), Some(file.path()));

        let mut lines = Vec::new();
        loop {
            let mut line = String::new();
            if input.read_line(&mut line).unwrap() == 0 {
                break;
            }
            lines.push(line.trim_end().to_string());
        }
        assert_eq!(lines, vec!["open pg_database", "close pg_database"]);
    }

    #[test]
    fn test_missing_script() {
        assert!(InputChannel::script(Path::new("/no/such/script.bki")).is_err());
        assert!(InputChannel::default().is_stdin());
    }
}
