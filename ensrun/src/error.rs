use std::io;
use std::path::PathBuf;

use enscore::error::{ConfigError, SelectionError};
use thiserror::Error;

use crate::derive::backend::ArtifactKind;
use crate::session::state::Effect;

/// An external collaborator did not produce its artifact.
#[derive(Debug, Error)]
pub enum DerivationError {
    #[error("{kind} derivation failed: {message}")]
    Failed { kind: ArtifactKind, message: String },

    #[error("{kind} derivation finished but {} does not exist", path.display())]
    ArtifactMissing { kind: ArtifactKind, path: PathBuf },

    #[error("{kind} derivation could not launch `{}`: {source}", program.display())]
    Launch {
        kind: ArtifactKind,
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{kind} derivation failed on {}: {source}", path.display())]
    Io {
        kind: ArtifactKind,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl DerivationError {
    pub fn kind(&self) -> ArtifactKind {
        match self {
            DerivationError::Failed { kind, .. }
            | DerivationError::ArtifactMissing { kind, .. }
            | DerivationError::Launch { kind, .. }
            | DerivationError::Io { kind, .. } => *kind,
        }
    }

    pub fn io(kind: ArtifactKind, path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> DerivationError {
        let path = path.into();
        move |source| DerivationError::Io { kind, path, source }
    }
}

/// Failure reading a gridded artifact or one of the text artifacts.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("variable `{name}` not found in {}", path.display())]
    MissingVariable { path: PathBuf, name: String },

    #[error("variable `{name}` holds {len} values, shape {shape:?} needs {expected}")]
    BadShape {
        name: String,
        shape: Vec<usize>,
        len: usize,
        expected: usize,
    },

    #[error("malformed {what}: {message}")]
    Malformed { what: &'static str, message: String },
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Selection(#[from] SelectionError),

    #[error(transparent)]
    Derivation(#[from] DerivationError),

    #[error(transparent)]
    Read(#[from] ReadError),

    #[error("failed to load configuration {}: {source}", path.display())]
    ConfigFile {
        path: PathBuf,
        #[source]
        source: Box<ReadError>,
    },

    #[error("derivation stalled at {0:?}: artifact disappeared after it was produced")]
    Stalled(Effect),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;
