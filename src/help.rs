//! Help text generation for script argument specs using Clap.

use crate::args::{ArgSpec, ArgType};
use clap::{Arg, ArgAction, Command};
use std::collections::HashSet;
use tracing::debug;

/// Id of the trailing positional argument shown in usage.
const POSITIONAL_ID: &str = "scripthub-positional";

/// Build a Clap Command from arg specs (for help/usage generation).
///
/// Clap's own help and version flags are disabled; scripts declare their own.
fn build_command(name: &str, about: Option<&str>, specs: &[ArgSpec]) -> Command {
    let mut cmd = Command::new(name.to_string())
        .disable_help_subcommand(true)
        .disable_help_flag(true)
        .disable_version_flag(true);

    if let Some(about) = about {
        cmd = cmd.about(about.to_string());
    }

    let mut names = HashSet::new();
    let mut shorts = HashSet::new();
    for spec in specs {
        // Clap rejects duplicate ids and short options; the first spec wins.
        if !names.insert(spec.name.as_str()) {
            debug!("help: skipping duplicate option --{}", spec.name);
            continue;
        }
        let short = spec.short.filter(|c| shorts.insert(*c));
        cmd = cmd.arg(build_arg(spec, short));
    }

    cmd.arg(
        Arg::new(POSITIONAL_ID)
            .value_name("ARGS")
            .num_args(0..)
            .action(ArgAction::Append)
            .help("Arguments passed through to the script"),
    )
}

/// Build a Clap Arg from an ArgSpec.
fn build_arg(spec: &ArgSpec, short: Option<char>) -> Arg {
    let mut arg = Arg::new(spec.name.clone()).long(spec.name.clone());

    if let Some(short) = short {
        arg = arg.short(short);
    }

    match spec.arg_type {
        ArgType::Flag => {
            arg = arg.action(ArgAction::SetTrue);
        }
        ArgType::Value => {
            arg = arg.action(ArgAction::Set).value_name(spec.var_name.clone());
        }
        ArgType::Enum => {
            arg = arg
                .action(ArgAction::Set)
                .value_name(spec.var_name.clone())
                .value_parser(clap::builder::PossibleValuesParser::new(
                    spec.choices.clone(),
                ));
        }
    }

    if let Some(ref help) = spec.help {
        arg = arg.help(help.clone());
    }

    arg
}

/// Generate the full help text for a script.
pub fn generate_help(name: &str, about: Option<&str>, specs: &[ArgSpec]) -> String {
    let mut cmd = build_command(name, about, specs);
    cmd.render_help().to_string()
}

/// Generate the one-line usage for a script.
pub fn generate_usage(name: &str, specs: &[ArgSpec]) -> String {
    let mut cmd = build_command(name, None, specs);
    cmd.render_usage().to_string()
}
