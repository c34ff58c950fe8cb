//! KEY=VALUE state files and run-mode layering.
//!
//! State files hold one assignment per line. Blank lines and `#` comments are
//! ignored. Values are written single-quoted so the file stays sourceable by a
//! shell.

use crate::dispatch::RunState;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

/// State key holding the persisted dry-run mode.
pub const DRYRUN_KEY: &str = "DRYRUN";
/// State key holding the persisted verbose mode.
pub const VERBOSE_KEY: &str = "VERBOSE";

/// Errors that can occur while reading or writing a state file.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to access state file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{path}:{line}: expected KEY=VALUE")]
    InvalidLine { path: PathBuf, line: usize },

    #[error("{path}:{line}: unterminated quote")]
    UnterminatedQuote { path: PathBuf, line: usize },

    #[error("invalid state key '{0}': must match [A-Za-z_][A-Za-z0-9_]*")]
    InvalidKey(String),

    #[error("failed to replace state file: {0}")]
    Persist(#[from] tempfile::PersistError),
}

/// An in-memory view of a KEY=VALUE file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateFile {
    path: PathBuf,
    entries: Vec<(String, String)>,
}

impl StateFile {
    /// Load `path`. A missing file yields an empty state.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, StateError> {
        let path = path.into();
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("state file {} does not exist yet", path.display());
                String::new()
            }
            Err(source) => return Err(StateError::Io { path, source }),
        };

        let entries = parse_entries(&content, &path)?;
        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Interpret a value as a boolean (`1/true/yes/on`, `0/false/no/off`).
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key)?.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" | "" => Some(false),
            other => {
                debug!("state key {} has non-boolean value '{}'", key, other);
                None
            }
        }
    }

    /// Insert or replace `key`. New keys are appended.
    pub fn set(&mut self, key: &str, value: impl Into<String>) -> Result<(), StateError> {
        if !is_valid_key(key) {
            return Err(StateError::InvalidKey(key.to_string()));
        }
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some((_, existing)) => *existing = value,
            None => self.entries.push((key.to_string(), value)),
        }
        Ok(())
    }

    /// Remove `key`, returning whether it was present.
    pub fn unset(&mut self, key: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(k, _)| k != key);
        self.entries.len() != before
    }

    /// File content as it would be saved.
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|(k, v)| format!("{}={}\n", k, quote_value(v)))
            .collect()
    }

    /// Atomically write the state back to its path.
    pub fn save(&self) -> Result<(), StateError> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let io_err = |source| StateError::Io {
            path: self.path.clone(),
            source,
        };

        fs::create_dir_all(&dir).map_err(io_err)?;
        let mut file = NamedTempFile::new_in(&dir).map_err(io_err)?;
        file.write_all(self.render().as_bytes()).map_err(io_err)?;
        file.persist(&self.path)?;

        debug!("saved state file {}", self.path.display());
        Ok(())
    }
}

/// Resolve run modes: command-line flag, then state file, then `false`.
pub fn layered_run_state(dry_run: bool, verbose: bool, state: Option<&StateFile>) -> RunState {
    let layer = |cli: bool, key: &str| {
        cli || state.and_then(|s| s.get_bool(key)).unwrap_or(false)
    };
    RunState::new(layer(dry_run, DRYRUN_KEY), layer(verbose, VERBOSE_KEY))
}

fn is_valid_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn parse_entries(content: &str, path: &Path) -> Result<Vec<(String, String)>, StateError> {
    let mut entries: Vec<(String, String)> = Vec::new();

    for (idx, raw) in content.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);

        let invalid = || StateError::InvalidLine {
            path: path.to_path_buf(),
            line: line_no,
        };
        let (key, raw_value) = line.split_once('=').ok_or_else(invalid)?;
        let key = key.trim();
        if !is_valid_key(key) {
            return Err(invalid());
        }

        let value = unquote_value(raw_value.trim()).ok_or_else(|| {
            StateError::UnterminatedQuote {
                path: path.to_path_buf(),
                line: line_no,
            }
        })?;

        match entries.iter_mut().find(|(k, _)| k == key) {
            Some((_, existing)) => *existing = value,
            None => entries.push((key.to_string(), value)),
        }
    }

    Ok(entries)
}

/// Single-quote a value, closing and escaping embedded quotes as `'\''`.
fn quote_value(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Undo shell quoting of a single word: bare, 'single' and "double" runs.
fn unquote_value(raw: &str) -> Option<String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => loop {
                match chars.next()? {
                    '\'' => break,
                    c => out.push(c),
                }
            },
            '"' => loop {
                match chars.next()? {
                    '"' => break,
                    '\\' => match chars.next()? {
                        c @ ('"' | '\\' | '$' | '`') => out.push(c),
                        c => {
                            out.push('\\');
                            out.push(c);
                        }
                    },
                    c => out.push(c),
                }
            },
            '\\' => out.push(chars.next()?),
            c => out.push(c),
        }
    }

    Some(out)
}
