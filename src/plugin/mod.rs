//! VST 2.x plugin hosting
//!
//! Loads native plugin modules, validates the descriptor their entry point
//! returns, and drives them through open, parameter, program and audio
//! calls. [`EffectInstance`] is the entry point for most callers.

pub mod api;
mod arch;
mod buffers;
mod callback;
mod chain;
mod descriptor;
mod dispatcher;
mod error;
mod instance;
mod loader;
mod params;
mod processor;
mod registry;

pub use api::{AEffect, EffectFlags, FourCc, HostCallbackProc, HostOpCode, OpCode, PluginMain};
pub use arch::{host_machine, module_architectures, Machine};
pub use buffers::{AudioBlock, ChannelSink, ChannelSource};
pub use callback::{host_callback, HostContext, ParameterChange};
pub use chain::EffectChain;
pub use descriptor::{EffectDescriptor, EffectInfo, ProcessMode};
pub use dispatcher::{DispatchPtr, Dispatcher, TextBuffer, TEXT_CAPACITY};
pub use error::{ConfigError, LoadError, PluginError, RegistryError, Result, ValidationError};
pub use instance::{EffectInstance, HostSettings, LifecycleState, MAX_BLOCK_SIZE};
pub use loader::{PluginModule, ENTRY_SYMBOLS};
pub use params::{ParameterInfo, Parameters};
pub use registry::{
    candidates, default_search_paths, scan_file, PluginRegistry, RegistryEntry, ScanReport,
};
