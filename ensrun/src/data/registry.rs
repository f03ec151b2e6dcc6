use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use enscore::run::time::RunInit;
use itertools::Itertools;
use tracing::debug;

use crate::error::{ReadError, SessionError};

/// Append-only list of run initialization times (`YYYYMMDDHH`), one per
/// line. Comma-separated entries written by older tooling are read too.
#[derive(Clone, Debug)]
pub struct RunRegistry {
    path: PathBuf,
}

impl RunRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        RunRegistry { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entries in file order; an absent registry is empty.
    pub fn load(&self) -> Result<Vec<RunInit>, SessionError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(ReadError::Io {
                    path: self.path.clone(),
                    source,
                }
                .into())
            }
        };
        let runs = text
            .split(|c: char| c == '\n' || c == ',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| entry.parse::<RunInit>())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(runs)
    }

    pub fn contains(&self, run: RunInit) -> Result<bool, SessionError> {
        Ok(self.load()?.contains(&run))
    }

    /// Append `run` unless it is already listed. Returns whether a line was
    /// written.
    pub fn append(&self, run: RunInit) -> Result<bool, SessionError> {
        if self.contains(run)? {
            debug!(run = %run, "run already registered");
            return Ok(false);
        }
        let needs_separator = match fs::read(&self.path) {
            Ok(bytes) => !bytes.is_empty() && !matches!(bytes.last(), Some(b'\n') | Some(b',')),
            Err(_) => false,
        };
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        if needs_separator {
            file.write_all(b"\n")?;
        }
        writeln!(file, "{}", run.stamp())?;
        debug!(run = %run, registry = %self.path.display(), "registered run");
        Ok(true)
    }

    /// Up to `count` distinct runs, newest first.
    pub fn recent(&self, count: usize) -> Result<Vec<RunInit>, SessionError> {
        Ok(self
            .load()?
            .into_iter()
            .sorted()
            .rev()
            .dedup()
            .take(count)
            .collect())
    }
}
