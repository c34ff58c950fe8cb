//! scripthub - menu-driven hubs and declarative argument parsing for shell scripts.
//!
//! This library compiles menu specs contributed by builtins and modules into
//! a deduplicated, ordered menu, dispatches selections to handlers, and
//! parses script arguments into sourceable shell variables.

pub mod args;
pub mod config;
pub mod dispatch;
pub mod groups;
pub mod help;
pub mod hub;
pub mod menu;
pub mod output;
pub mod registry;
pub mod spec;
pub mod state;

pub use args::{
    framework_arg_specs, parse_args, parse_with_prelude, ArgParser, ArgSpec, ArgSpecError,
    ArgType, ArgValue, Mode, ParseError, ParseResult, PreludeResult,
};
pub use config::{discover_modules, ConfigError, HubConfig, ModuleConfig};
pub use dispatch::{dispatch, DispatchError, DispatchOutcome, Handler, HandlerTable, RunState};
pub use groups::{GroupTracker, RUN_MODES_GROUP};
pub use help::{generate_help, generate_usage};
pub use hub::{shell_handler, Hub, MenuModule};
pub use menu::{BuildReport, KeyWeight, MenuEntry, MenuRegistry};
pub use output::{generate_error_output, generate_help_output, generate_output, generate_output_string};
pub use registry::SpecRegistry;
pub use spec::{ItemFlags, MenuSpec, SpecError};
pub use state::{layered_run_state, StateError, StateFile};
