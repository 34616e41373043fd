//! Error types for topology loading and engine construction.

use canal_core::{ComponentError, PipelineError};
use canal_registry::RegistryError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while loading, validating or building a topology.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a file
    #[error("failed to read file '{path}': {source}")]
    ReadFile {
        /// Path of the file that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to write a file
    #[error("failed to write file '{path}': {source}")]
    WriteFile {
        /// Path of the file that could not be written.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// Failed to serialize TOML
    #[error("failed to serialize TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// Engine section out of range
    #[error("invalid engine setting '{field}': {reason}")]
    InvalidEngine {
        /// Offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// Two entries of the same kind share an id
    #[error("duplicate {kind} id {id}")]
    DuplicateId {
        /// `component`, `buffer`, `pipeline` or `dai group`.
        kind: &'static str,
        /// Repeated id.
        id: u32,
    },

    /// An entry refers to something that is not declared
    #[error("{owner} refers to unknown {kind} {id}")]
    UnknownReference {
        /// Entry holding the reference, e.g. `buffer 3`.
        owner: String,
        /// Kind of the missing entry.
        kind: &'static str,
        /// Missing id.
        id: u32,
    },

    /// Component type name not understood
    #[error("component {comp}: unknown type '{name}'")]
    UnknownType {
        /// Component declaring the type.
        comp: u32,
        /// Type name as written.
        name: String,
    },

    /// Core index beyond `engine.cores`
    #[error("{owner} is pinned to core {core}, but the engine has {cores} core(s)")]
    CoreOutOfRange {
        /// Component or pipeline.
        owner: String,
        /// Requested core.
        core: u32,
        /// Configured core count.
        cores: u32,
    },

    /// Structurally invalid topology
    #[error("invalid topology: {0}")]
    Invalid(String),

    /// Driver lookup or creation failed
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Connecting or building a pipeline failed
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// Starting cores or configuring a component failed
    #[error(transparent)]
    Component(#[from] ComponentError),
}

impl ConfigError {
    /// Create a read file error.
    pub fn read_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConfigError::ReadFile {
            path: path.into(),
            source,
        }
    }

    /// Create a write file error.
    pub fn write_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConfigError::WriteFile {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn unknown(owner: impl Into<String>, kind: &'static str, id: u32) -> Self {
        ConfigError::UnknownReference {
            owner: owner.into(),
            kind,
            id,
        }
    }
}
