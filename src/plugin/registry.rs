//! Plugin discovery and the identity registry
//!
//! Scans directories for plugin modules, loads each one just long enough to
//! read its identity and metadata, and keeps the results keyed by unique ID
//! so instances can later be created by ID.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::api::FourCc;
use super::error::{PluginError, RegistryError, Result};
use super::instance::{EffectInstance, HostSettings};

/// File extensions that may hold a plugin module
pub const CANDIDATE_EXTENSIONS: [&str; 4] = ["dll", "so", "dylib", "vst"];

/// What a scan learned about one module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    /// Four-character ID as text
    pub unique_id: String,
    /// Raw ID, exact even when the text is not printable
    pub id: u32,
    pub path: PathBuf,
    pub name: String,
    pub vendor: String,
    pub version: i32,
    pub num_params: usize,
    pub num_inputs: usize,
    pub num_outputs: usize,
    pub num_programs: usize,
    /// Parameter names, in index order
    pub parameters: Vec<String>,
}

impl RegistryEntry {
    /// Describe a freshly created instance
    pub fn describe(path: impl Into<PathBuf>, instance: &EffectInstance) -> Result<Self> {
        let info = instance.info();
        let parameters = (0..info.num_params)
            .map(|index| instance.parameter_name(index))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            unique_id: info.unique_id.to_string(),
            id: info.unique_id.0,
            path: path.into(),
            name: instance.effect_name()?,
            vendor: instance.vendor()?,
            version: info.version,
            num_params: info.num_params,
            num_inputs: info.num_inputs,
            num_outputs: info.num_outputs,
            num_programs: info.num_programs,
            parameters,
        })
    }

    pub fn fourcc(&self) -> FourCc {
        FourCc(self.id)
    }
}

/// Outcome of a directory scan
#[derive(Debug, Default)]
pub struct ScanReport {
    /// IDs registered by this scan
    pub added: Vec<FourCc>,
    /// Candidates that could not be registered, with the reason
    pub skipped: Vec<(PathBuf, String)>,
}

/// Unique ID to module map
#[derive(Debug, Default)]
pub struct PluginRegistry {
    entries: BTreeMap<FourCc, RegistryEntry>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan every directory (recursively) or file in `paths`
    ///
    /// Failing candidates are recorded in the report and never abort the
    /// scan. Missing search directories are ignored.
    pub fn scan_paths<P: AsRef<Path>>(&mut self, paths: &[P], settings: &HostSettings) -> ScanReport {
        let mut report = ScanReport::default();
        for root in paths {
            for candidate in candidates(root.as_ref()) {
                match scan_file(&candidate, settings) {
                    Ok(entry) => {
                        report.added.push(entry.fourcc());
                        self.insert(entry);
                    }
                    Err(e) => {
                        warn!("Skipping {}: {}", candidate.display(), e);
                        report.skipped.push((candidate, e.to_string()));
                    }
                }
            }
        }
        info!(
            "Plugin scan: {} registered, {} skipped",
            report.added.len(),
            report.skipped.len()
        );
        report
    }

    /// Add an entry, replacing any earlier entry with the same ID
    pub fn insert(&mut self, entry: RegistryEntry) {
        if let Some(previous) = self.entries.insert(entry.fourcc(), entry) {
            debug!(
                "Plugin {} at {} replaced",
                previous.unique_id,
                previous.path.display()
            );
        }
    }

    pub fn get(&self, id: FourCc) -> Option<&RegistryEntry> {
        self.entries.get(&id)
    }

    pub fn path_for(&self, id: FourCc) -> Option<&Path> {
        self.get(id).map(|entry| entry.path.as_path())
    }

    /// Entries in ID order
    pub fn entries(&self) -> impl Iterator<Item = &RegistryEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Load a fresh instance of a registered plugin
    pub fn instantiate(&self, id: FourCc, settings: &HostSettings) -> Result<EffectInstance> {
        let path = self.path_for(id).ok_or(PluginError::UnknownPlugin(id))?;
        EffectInstance::load(path, settings)
    }

    /// Write the registry as a JSON cache
    pub fn save(&self, path: &Path) -> std::result::Result<(), RegistryError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let entries: Vec<&RegistryEntry> = self.entries().collect();
        let json = serde_json::to_string_pretty(&entries)?;
        fs::write(path, json)?;
        debug!("Saved {} registry entries to {}", entries.len(), path.display());
        Ok(())
    }

    /// Read a registry written by [`save`](Self::save)
    pub fn load(path: &Path) -> std::result::Result<Self, RegistryError> {
        let json = fs::read_to_string(path)?;
        let entries: Vec<RegistryEntry> = serde_json::from_str(&json)?;
        let mut registry = Self::new();
        for entry in entries {
            registry.insert(entry);
        }
        Ok(registry)
    }
}

/// Load one module, describe it, and unload it again
pub fn scan_file(path: &Path, settings: &HostSettings) -> Result<RegistryEntry> {
    let instance = EffectInstance::load(path, settings)?;
    let entry = RegistryEntry::describe(path, &instance);
    instance.unload();
    entry
}

fn is_candidate(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| CANDIDATE_EXTENSIONS.iter().any(|c| e.eq_ignore_ascii_case(c)))
        .unwrap_or(false)
}

/// Candidate modules under `root`, in sorted order
///
/// `.vst` directories are bundles and are returned whole rather than
/// descended into. Each real directory is read at most once, so symlink
/// cycles terminate.
pub fn candidates(root: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut visited = HashSet::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(path) = pending.pop() {
        if path.is_dir() && !is_candidate(&path) {
            let Ok(real) = fs::canonicalize(&path) else {
                continue;
            };
            if !visited.insert(real) {
                debug!("Already scanned {}", path.display());
                continue;
            }
            match fs::read_dir(&path) {
                Ok(entries) => pending.extend(entries.flatten().map(|entry| entry.path())),
                Err(e) => debug!("Cannot read {}: {}", path.display(), e),
            }
        } else if is_candidate(&path) {
            found.push(path);
        }
    }

    found.sort();
    found
}

/// Conventional VST2 install directories for this platform
pub fn default_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Some(list) = std::env::var_os("VST_PATH") {
        paths.extend(std::env::split_paths(&list));
    }

    #[cfg(target_os = "linux")]
    {
        if let Ok(home) = std::env::var("HOME") {
            paths.push(PathBuf::from(format!("{}/.vst", home)));
        }
        paths.push(PathBuf::from("/usr/lib/vst"));
        paths.push(PathBuf::from("/usr/local/lib/vst"));
    }

    #[cfg(target_os = "macos")]
    {
        paths.push(PathBuf::from("/Library/Audio/Plug-Ins/VST"));
        if let Ok(home) = std::env::var("HOME") {
            paths.push(PathBuf::from(format!("{}/Library/Audio/Plug-Ins/VST", home)));
        }
    }

    #[cfg(target_os = "windows")]
    {
        paths.push(PathBuf::from("C:\\Program Files\\VSTPlugins"));
        paths.push(PathBuf::from("C:\\Program Files\\Steinberg\\VSTPlugins"));
        paths.push(PathBuf::from("C:\\Program Files\\Common Files\\VST2"));
    }

    paths
}
