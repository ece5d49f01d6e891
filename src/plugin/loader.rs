//! Native module loading
//!
//! Opens a plugin shared library with `libloading` and resolves its entry
//! point. A module is unloaded exactly once; later lookups fail with
//! [`LoadError::Unloaded`] instead of touching a freed library.

use std::ffi::c_void;
use std::path::{Path, PathBuf};

use libloading::{Library, Symbol};
use tracing::{debug, info};

use super::api::PluginMain;
use super::arch;
use super::error::LoadError;

/// Entry symbols tried in order: the 2.4 name, then the legacy names
pub const ENTRY_SYMBOLS: [&str; 3] = ["VSTPluginMain", "main", "main_macho"];

/// A loaded plugin module
pub struct PluginModule {
    library: Option<Library>,
    path: PathBuf,
}

impl PluginModule {
    /// Load a plugin module from path
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let path = resolve_bundle_path(path.as_ref());

        if !path.exists() {
            return Err(LoadError::NotFound {
                reason: "no such file".to_string(),
                path,
            });
        }

        match arch::incompatible_machine(&path) {
            Ok(Some(module)) => {
                return Err(LoadError::ArchitectureMismatch {
                    path,
                    module,
                    host: arch::host_machine(),
                });
            }
            Ok(None) => {}
            Err(e) => {
                return Err(LoadError::NotFound {
                    reason: e.to_string(),
                    path,
                });
            }
        }

        // SAFETY: loading a library runs its initialisers; the module is
        // foreign code we have chosen to trust.
        let library = unsafe { Library::new(&path) }.map_err(|e| {
            let reason = e.to_string();
            if arch::is_architecture_message(&reason) {
                LoadError::ArchitectureMismatch {
                    path: path.clone(),
                    module: arch::Machine::Other(0),
                    host: arch::host_machine(),
                }
            } else {
                LoadError::NotFound {
                    path: path.clone(),
                    reason,
                }
            }
        })?;

        info!("Loaded plugin module: {}", path.display());

        Ok(Self {
            library: Some(library),
            path,
        })
    }

    /// Path the module was loaded from
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_loaded(&self) -> bool {
        self.library.is_some()
    }

    fn library(&self) -> Result<&Library, LoadError> {
        self.library.as_ref().ok_or_else(|| LoadError::Unloaded {
            path: self.path.clone(),
        })
    }

    /// Resolve an exported symbol to its address
    pub fn resolve(&self, symbol: &str) -> Result<*const c_void, LoadError> {
        let library = self.library()?;
        // SAFETY: the symbol is read as an untyped address and never called here.
        let address: Symbol<*const c_void> = unsafe { library.get(symbol.as_bytes()) }
            .map_err(|_| LoadError::EntryPointMissing {
                path: self.path.clone(),
                symbols: symbol.to_string(),
            })?;
        Ok(*address)
    }

    /// Resolve the plugin entry point
    pub fn entry_point(&self) -> Result<PluginMain, LoadError> {
        let library = self.library()?;
        for name in ENTRY_SYMBOLS {
            // SAFETY: every entry symbol has the `PluginMain` signature.
            let symbol: Result<Symbol<PluginMain>, _> = unsafe { library.get(name.as_bytes()) };
            if let Ok(entry) = symbol {
                debug!("Resolved entry point {} in {}", name, self.path.display());
                return Ok(*entry);
            }
        }

        Err(LoadError::EntryPointMissing {
            path: self.path.clone(),
            symbols: ENTRY_SYMBOLS.join(", "),
        })
    }

    /// Unload the module. Calling this again is a no-op.
    pub fn unload(&mut self) {
        if let Some(library) = self.library.take() {
            if let Err(e) = library.close() {
                debug!("Error closing {}: {}", self.path.display(), e);
            }
            info!("Unloaded plugin module: {}", self.path.display());
        }
    }
}

impl Drop for PluginModule {
    fn drop(&mut self) {
        self.unload();
    }
}

impl std::fmt::Debug for PluginModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginModule")
            .field("path", &self.path)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

/// Resolve a macOS `.vst` bundle directory to the binary inside it
pub fn resolve_bundle_path(path: &Path) -> PathBuf {
    if path.is_dir() && path.extension().and_then(|e| e.to_str()) == Some("vst") {
        if let Some(stem) = path.file_stem() {
            let inner = path.join("Contents").join("MacOS").join(stem);
            if inner.exists() {
                return inner;
            }
        }
    }
    path.to_path_buf()
}
