//! Plugin host error types

use std::path::PathBuf;

use thiserror::Error;

use super::api::{FourCc, OpCode};
use super::arch::Machine;
use super::instance::LifecycleState;

/// Errors raised while loading a module from disk
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Plugin module not found or not loadable: {}: {reason}", path.display())]
    NotFound { path: PathBuf, reason: String },

    #[error(
        "Architecture mismatch: {} is built for {module}, this host is {host}",
        path.display()
    )]
    ArchitectureMismatch {
        path: PathBuf,
        module: Machine,
        host: Machine,
    },

    #[error("No plugin entry point ({symbols}) exported by {}", path.display())]
    EntryPointMissing { path: PathBuf, symbols: String },

    #[error("Plugin module already unloaded: {}", path.display())]
    Unloaded { path: PathBuf },
}

/// Errors raised while validating the descriptor returned by the entry point
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Entry point returned a null descriptor")]
    NullDescriptor,

    #[error("Not a plugin: magic is {magic:?}")]
    NotAPlugin { magic: String },

    #[error("Incomplete plugin interface: {field} is null")]
    IncompleteInterface { field: &'static str },

    #[error("Invalid descriptor: {field} is {value}")]
    InvalidCount { field: &'static str, value: i32 },
}

/// Host/plugin configuration disagreements
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{direction} channel mismatch: plugin expects {expected}, got {actual}")]
    ChannelMismatch {
        direction: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Parameter index {index} out of range (plugin has {count})")]
    ParameterOutOfRange { index: usize, count: usize },

    #[error("Block of {frames} frames exceeds the configured maximum of {max}")]
    BlockTooLarge { frames: usize, max: usize },

    #[error("Requested {frames} frames but the {direction} block holds {available}")]
    FrameCountMismatch {
        direction: &'static str,
        frames: usize,
        available: usize,
    },

    #[error("Audio block channels have different lengths")]
    RaggedBlock,

    #[error("Invalid host settings: {0}")]
    InvalidSettings(String),
}

/// Top-level error for plugin instances
#[derive(Error, Debug)]
pub enum PluginError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("Invalid plugin {}: {source}", path.display())]
    Invalid {
        path: PathBuf,
        #[source]
        source: ValidationError,
    },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Cannot {operation} while plugin is {state}")]
    InvalidState {
        operation: &'static str,
        state: LifecycleState,
    },

    #[error("Plugin does not support {0}")]
    Unsupported(&'static str),

    #[error("{opcode:?} failed (returned {result})")]
    CallFailed { opcode: OpCode, result: isize },

    #[error("No plugin with ID {0} in the registry")]
    UnknownPlugin(FourCc),
}

/// Errors reading or writing the registry cache
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Registry cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Registry cache is malformed: {0}")]
    Cache(#[from] serde_json::Error),
}

impl PluginError {
    /// Attach the module path to a validation failure
    pub(crate) fn invalid(path: impl Into<PathBuf>, source: ValidationError) -> Self {
        PluginError::Invalid {
            path: path.into(),
            source,
        }
    }
}

/// Result alias for plugin operations
pub type Result<T> = std::result::Result<T, PluginError>;
