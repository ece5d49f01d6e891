//! vstbridge - host native VST 2.x effect plugins from Rust
//!
//! Loads plugin modules, validates their descriptors, and exposes
//! parameters, programs, state chunks and block processing through a safe,
//! lock-guarded instance type.

pub mod config;
pub mod plugin;

pub use config::HostConfig;
pub use plugin::{AudioBlock, EffectChain, EffectInstance, HostSettings, PluginError, PluginRegistry};
