//! JSON hub configuration and module discovery.

use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Extension of module files picked up by [`discover_modules`].
pub const MODULE_EXTENSION: &str = "json";

/// Errors that can occur during config parsing and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse JSON config: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid module file {path}: {source}")]
    InvalidModule {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("module has an empty name")]
    EmptyModuleName,

    #[error("duplicate module name: {0}")]
    DuplicateModule(String),

    #[error("handler '{handler}' in module '{module}' has an empty command")]
    EmptyHandlerCommand { module: String, handler: String },
}

/// A module contributing menu specs and the shell commands behind them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ModuleConfig {
    /// Module name, used as the spec source. Defaults to the file name when
    /// discovered from a directory.
    #[serde(default)]
    pub name: String,
    /// Raw 5-field specs: `key|group|label|handler|flags`.
    #[serde(default)]
    pub menu: Vec<String>,
    /// Handler name to shell command.
    #[serde(default)]
    pub handlers: BTreeMap<String, String>,
}

/// Top-level configuration for a hub.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HubConfig {
    /// Title printed above the menu
    pub title: Option<String>,
    /// Directory of module files, relative to the config file
    pub modules_dir: Option<PathBuf>,
    /// KEY=VALUE file persisting run modes, relative to the config file
    pub state_file: Option<PathBuf>,
    /// Inline modules
    #[serde(default)]
    pub modules: Vec<ModuleConfig>,
}

impl HubConfig {
    /// Parse a JSON string into a HubConfig.
    pub fn from_json(json: &str) -> Result<HubConfig, ConfigError> {
        let config: HubConfig = serde_json::from_str(json)?;
        Ok(config)
    }

    /// Read a config file, resolving relative paths against its directory.
    pub fn from_file(path: &Path) -> Result<HubConfig, ConfigError> {
        let json = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_json(&json)?;

        if let Some(base) = path.parent() {
            config.modules_dir = config.modules_dir.map(|p| base.join(p));
            config.state_file = config.state_file.map(|p| base.join(p));
        }
        Ok(config)
    }

    /// Inline modules followed by those discovered in `modules_dir`.
    pub fn load_modules(&self) -> Result<Vec<ModuleConfig>, ConfigError> {
        let mut modules = self.modules.clone();
        if let Some(ref dir) = self.modules_dir {
            modules.extend(discover_modules(dir)?);
        }
        validate_modules(&modules)?;
        Ok(modules)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_modules(&self.modules)
    }

    /// Get the effective title, using the default if none is set.
    pub fn effective_title(&self) -> &str {
        self.title.as_deref().unwrap_or("Script hub")
    }
}

/// Read every module file in `dir`, in file-name order.
pub fn discover_modules(dir: &Path) -> Result<Vec<ModuleConfig>, ConfigError> {
    let io_err = |source| ConfigError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == MODULE_EXTENSION) {
            paths.push(path);
        }
    }
    paths.sort();

    let mut modules = Vec::with_capacity(paths.len());
    for path in paths {
        let json = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let mut module: ModuleConfig =
            serde_json::from_str(&json).map_err(|source| ConfigError::InvalidModule {
                path: path.clone(),
                source,
            })?;
        if module.name.is_empty() {
            module.name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
        }
        debug!("discovered module '{}' at {}", module.name, path.display());
        modules.push(module);
    }

    info!("discovered {} module(s) in {}", modules.len(), dir.display());
    Ok(modules)
}

fn validate_modules(modules: &[ModuleConfig]) -> Result<(), ConfigError> {
    let mut names = HashSet::new();

    for module in modules {
        if module.name.trim().is_empty() {
            return Err(ConfigError::EmptyModuleName);
        }
        if !names.insert(module.name.as_str()) {
            return Err(ConfigError::DuplicateModule(module.name.clone()));
        }
        for (handler, command) in &module.handlers {
            if command.trim().is_empty() {
                return Err(ConfigError::EmptyHandlerCommand {
                    module: module.name.clone(),
                    handler: handler.clone(),
                });
            }
        }
    }

    Ok(())
}
