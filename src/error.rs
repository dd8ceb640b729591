use std::path::PathBuf;
use thiserror::Error;

/// A handler unit that could not be turned into a registered `Handler`.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("failed to read handler definition {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse handler definition {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid handler '{name}': {reason}")]
    Invalid { name: String, reason: String },

    #[error("handler '{0}' is already registered")]
    Duplicate(String),

    #[error("handler directory {path} is not readable: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no handlers registered; nothing to dispatch to")]
    EmptyRegistry,
}

/// Failure while admitting a freshly observed file.
#[derive(Error, Debug)]
pub enum AdmissionError {
    #[error("cannot inspect {path}: {source}")]
    Inspect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot move {from} to {to}: {source}")]
    Move {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("file name of {0} is not valid UTF-8")]
    InvalidName(PathBuf),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Seen-file store persistence failures.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error on seen-file store {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("seen-file store {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize seen-file store: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Start-up and run-level errors of the watcher process.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Admission(#[from] AdmissionError),

    #[error("filesystem watcher error: {0}")]
    Notify(#[from] notify::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, WatchError>;
