//! Dispatching a menu choice to its handler.

use crate::menu::MenuRegistry;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

/// Process-wide run modes shared with handlers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunState {
    /// Simulate state-changing actions instead of performing them.
    pub dry_run: bool,
    pub verbose: bool,
    exit_requested: bool,
}

impl RunState {
    pub fn new(dry_run: bool, verbose: bool) -> Self {
        Self {
            dry_run,
            verbose,
            exit_requested: false,
        }
    }

    /// Ask the menu loop to stop before its next iteration.
    pub fn request_exit(&mut self) {
        self.exit_requested = true;
    }

    pub fn exit_requested(&self) -> bool {
        self.exit_requested
    }
}

/// A menu action. Receives the run state so builtins can toggle modes.
pub type Handler = Box<dyn FnMut(&mut RunState) -> anyhow::Result<()>>;

/// Handlers by name.
///
/// Handlers registered directly stay for the life of the table. Handlers
/// installed with [`HandlerTable::replace_loaded`] belong to one load cycle
/// and take precedence over the registered ones.
#[derive(Default)]
pub struct HandlerTable {
    handlers: HashMap<String, Handler>,
    loaded: HashMap<String, Handler>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name`, replacing any previous one.
    pub fn register<F>(&mut self, name: impl Into<String>, handler: F)
    where
        F: FnMut(&mut RunState) -> anyhow::Result<()> + 'static,
    {
        let name = name.into();
        if self.handlers.insert(name.clone(), Box::new(handler)).is_some() {
            debug!("handler '{}' replaced", name);
        }
    }

    /// Drop the handlers of the previous load cycle and install every
    /// handler of `table` in their place.
    pub fn replace_loaded(&mut self, table: HandlerTable) {
        let HandlerTable { handlers, loaded } = table;
        self.loaded = loaded;
        self.loaded.extend(handlers);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.loaded.contains_key(name) || self.handlers.contains_key(name)
    }

    /// Number of distinct handler names.
    pub fn len(&self) -> usize {
        self.names().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty() && self.loaded.is_empty()
    }

    fn names(&self) -> Vec<&String> {
        let mut names: Vec<&String> = self.handlers.keys().chain(self.loaded.keys()).collect();
        names.sort();
        names.dedup();
        names
    }

    fn get_mut(&mut self, name: &str) -> Option<&mut Handler> {
        match self.loaded.get_mut(name) {
            Some(handler) => Some(handler),
            None => self.handlers.get_mut(name),
        }
    }
}

impl fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerTable")
            .field("handlers", &self.names())
            .finish()
    }
}

/// Result of a dispatch that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The handler ran to completion.
    Invoked { key: String, wait: Option<Duration> },
    /// The choice was empty.
    NoChoice,
    /// No entry has this key.
    UnknownKey(String),
    /// The entry exists but its flags forbid running it now.
    Disabled { key: String },
}

impl DispatchOutcome {
    /// Pause requested by the invoked entry.
    pub fn wait(&self) -> Option<Duration> {
        match self {
            DispatchOutcome::Invoked { wait, .. } => *wait,
            _ => None,
        }
    }

    pub fn invoked(&self) -> bool {
        matches!(self, DispatchOutcome::Invoked { .. })
    }
}

/// Errors that indicate a registration defect or a failing handler.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("menu item '{key}' references undefined handler '{handler}'")]
    MissingHandler { key: String, handler: String },

    #[error(transparent)]
    Handler(#[from] anyhow::Error),
}

/// Run the handler bound to `choice`.
///
/// Empty or unknown choices and disabled items are soft no-ops. A handler
/// name with no registered handler is an error, as is any error returned by
/// the handler itself.
pub fn dispatch(
    menu: &MenuRegistry,
    handlers: &mut HandlerTable,
    state: &mut RunState,
    choice: &str,
) -> Result<DispatchOutcome, DispatchError> {
    let choice = choice.trim();
    if choice.is_empty() {
        warn!("no menu choice given");
        return Ok(DispatchOutcome::NoChoice);
    }

    let Some(entry) = menu.lookup(choice) else {
        warn!("invalid menu choice: {}", choice);
        return Ok(DispatchOutcome::UnknownKey(choice.to_string()));
    };

    if entry.flags.blocks_dispatch(state.dry_run) {
        warn!("menu item '{}' is disabled", entry.label);
        return Ok(DispatchOutcome::Disabled {
            key: entry.key.clone(),
        });
    }

    let Some(handler) = handlers.get_mut(&entry.handler) else {
        error!(
            "menu item '{}' ({}) has no handler '{}'",
            entry.label, entry.key, entry.handler
        );
        return Err(DispatchError::MissingHandler {
            key: entry.key.clone(),
            handler: entry.handler.clone(),
        });
    };

    debug!("dispatching '{}' to '{}'", entry.key, entry.handler);
    handler(state)?;

    Ok(DispatchOutcome::Invoked {
        key: entry.key.clone(),
        wait: entry.wait,
    })
}
