// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FfqueueError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// The engine could not be initialised (binaries missing, probe failed).
    #[error("Engine initialisation failed: {0}")]
    EngineInit(String),

    /// An operation needed a loaded engine and there was none.
    #[error("Engine is not loaded")]
    EngineNotLoaded,

    /// Releasing the engine failed. The instance is unusable afterwards.
    #[error("Engine termination failed: {0}")]
    EngineTerminate(String),

    /// A single engine call (mount, exec, read, ...) failed.
    #[error("Engine {op} failed: {message}")]
    Engine { op: &'static str, message: String },

    #[error("Invalid engine path: {0}")]
    InvalidPath(String),

    /// The processor runtime is gone; the handle outlived it.
    #[error("Processor has shut down")]
    ProcessorClosed,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FfqueueError {
    /// Shorthand for an engine call failure.
    pub fn engine(op: &'static str, message: impl Into<String>) -> Self {
        FfqueueError::Engine {
            op,
            message: message.into(),
        }
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, FfqueueError>;
