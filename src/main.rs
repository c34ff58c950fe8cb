//! scripthub - menu-driven hubs and argument parsing for shell scripts.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use scripthub::args::validate_specs;
use scripthub::{
    framework_arg_specs, generate_error_output, generate_help, generate_help_output,
    generate_output, layered_run_state, parse_args, parse_with_prelude, ArgSpec, DispatchOutcome,
    Hub, HubConfig, Mode, ParseError, ParseResult, StateFile,
};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter.
const LOG_ENV: &str = "SCRIPTHUB_LOG";

/// Menu-driven hubs and declarative argument parsing for shell scripts.
#[derive(Parser, Debug)]
#[command(name = "scripthub", version, about, disable_help_subcommand = true)]
struct Cli {
    /// Enable verbose mode and debug logging
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the interactive menu of a hub
    Menu {
        /// JSON hub configuration
        #[arg(long, env = "SCRIPTHUB_CONFIG")]
        config: PathBuf,

        /// Start in dry-run mode
        #[arg(long)]
        dry_run: bool,

        /// Print the compiled menu and exit
        #[arg(long)]
        list: bool,
    },

    /// Dispatch a single menu choice
    Dispatch {
        /// JSON hub configuration
        #[arg(long, env = "SCRIPTHUB_CONFIG")]
        config: PathBuf,

        /// Start in dry-run mode
        #[arg(long)]
        dry_run: bool,

        /// Menu key to run
        choice: String,
    },

    /// Parse script arguments and output a sourceable file
    Parse {
        /// Option spec record: name|short|type|var|help|choices
        #[arg(long = "arg", value_name = "RECORD")]
        records: Vec<String>,

        /// Option specs as a JSON array
        #[arg(long)]
        spec_json: Option<String>,

        /// Treatment of unknown options (single-pass parsing only)
        #[arg(long, value_enum, default_value_t = Mode::Strict)]
        mode: Mode,

        /// Parse the reserved --dryrun/--verbose/--help flags first
        #[arg(long)]
        prelude: bool,

        /// Program name shown in help output
        #[arg(long, default_value = "script")]
        name: String,

        /// Arguments to parse for the target script
        #[arg(last = true)]
        args: Vec<String>,
    },

    /// Print help text for a script
    Help {
        /// Program name shown in help output
        #[arg(long)]
        name: String,

        /// Description shown in help output
        #[arg(long)]
        about: Option<String>,

        /// Option spec record: name|short|type|var|help|choices
        #[arg(long = "arg", value_name = "RECORD")]
        records: Vec<String>,

        /// Option specs as a JSON array
        #[arg(long)]
        spec_json: Option<String>,

        /// Include the reserved --dryrun/--verbose/--help flags
        #[arg(long)]
        prelude: bool,
    },
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Menu {
            config,
            dry_run,
            list,
        } => {
            let mut hub = build_hub(&config, dry_run, cli.verbose)?;
            if list {
                print!("{}", hub.render());
                return Ok(());
            }
            let mut input = io::stdin().lock();
            let mut output = io::stdout().lock();
            hub.run(&mut input, &mut output, std::thread::sleep)
                .context("menu loop failed")?;
        }
        Commands::Dispatch {
            config,
            dry_run,
            choice,
        } => {
            let mut hub = build_hub(&config, dry_run, cli.verbose)?;
            match hub.dispatch(&choice)? {
                DispatchOutcome::Invoked { key, .. } => info!("menu item {} done", key),
                other => warn!("nothing dispatched: {:?}", other),
            }
        }
        Commands::Parse {
            records,
            spec_json,
            mode,
            prelude,
            name,
            args,
        } => {
            let specs = load_arg_specs(&records, spec_json.as_deref())?;
            let path = match parse_script_args(&specs, &args, mode, prelude) {
                Ok(ParsedArgs::Help) => {
                    let help = generate_help(&name, None, &with_prelude(&specs, prelude));
                    generate_help_output(&help)
                }
                Ok(ParsedArgs::Bound(result)) => generate_output(&result),
                Err(e) => generate_error_output(&e.to_string()),
            }
            .context("failed to generate output file")?;
            println!("{}", path.display());
        }
        Commands::Help {
            name,
            about,
            records,
            spec_json,
            prelude,
        } => {
            let specs = load_arg_specs(&records, spec_json.as_deref())?;
            print!(
                "{}",
                generate_help(&name, about.as_deref(), &with_prelude(&specs, prelude))
            );
        }
    }

    Ok(())
}

/// Load the hub configuration, modules and persisted run modes.
fn build_hub(config_path: &Path, dry_run: bool, verbose: bool) -> Result<Hub> {
    let config = HubConfig::from_file(config_path)
        .with_context(|| format!("failed to load config {}", config_path.display()))?;
    config.validate().context("invalid config")?;
    let modules = config.load_modules().context("failed to load modules")?;

    let state_file = config
        .state_file
        .as_ref()
        .map(StateFile::load)
        .transpose()
        .context("failed to load state file")?;
    let run_state = layered_run_state(dry_run, verbose, state_file.as_ref());

    let mut hub = Hub::new(config.effective_title()).with_state(run_state);
    if let Some(file) = state_file {
        hub = hub.with_state_file(file);
    }
    hub.load(&modules);
    Ok(hub)
}

/// Collect specs from records and JSON, rejecting duplicates across both.
fn load_arg_specs(records: &[String], json: Option<&str>) -> Result<Vec<ArgSpec>> {
    let mut specs = records
        .iter()
        .map(|r| ArgSpec::parse(r))
        .collect::<Result<Vec<_>, _>>()
        .context("invalid arg spec")?;
    if let Some(json) = json {
        specs.extend(ArgSpec::from_json(json).context("invalid arg spec JSON")?);
    }
    validate_specs(&specs).context("invalid arg specs")?;
    Ok(specs)
}

fn with_prelude(specs: &[ArgSpec], prelude: bool) -> Vec<ArgSpec> {
    let mut all = if prelude {
        framework_arg_specs()
    } else {
        Vec::new()
    };
    all.extend_from_slice(specs);
    all
}

enum ParsedArgs {
    Help,
    Bound(ParseResult),
}

fn parse_script_args(
    specs: &[ArgSpec],
    args: &[String],
    mode: Mode,
    prelude: bool,
) -> Result<ParsedArgs, ParseError> {
    if !prelude {
        return parse_args(specs, args, mode).map(ParsedArgs::Bound);
    }

    let parsed = parse_with_prelude(&framework_arg_specs(), specs, args)?;
    if parsed.framework.flag(scripthub::args::HELP_VAR) {
        return Ok(ParsedArgs::Help);
    }
    let mut result = parsed.framework;
    result.merge(parsed.script);
    Ok(ParsedArgs::Bound(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn records(r: &[&str]) -> Vec<String> {
        r.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_subcommand_parses_records_and_args() {
        let cli = Cli::try_parse_from([
            "scripthub",
            "parse",
            "--arg",
            "name|n|value|NAME",
            "--arg",
            "force|f|flag|FORCE",
            "--",
            "-f",
            "--name",
            "x",
        ])
        .unwrap();

        match cli.command {
            Commands::Parse {
                records,
                mode,
                prelude,
                args,
                ..
            } => {
                assert_eq!(records, ["name|n|value|NAME", "force|f|flag|FORCE"]);
                assert_eq!(mode, Mode::Strict);
                assert!(!prelude);
                assert_eq!(args, ["-f", "--name", "x"]);
            }
            _ => panic!("Expected Parse command"),
        }
    }

    #[test]
    fn test_parse_subcommand_mode() {
        let cli =
            Cli::try_parse_from(["scripthub", "parse", "--mode", "builtins", "--"]).unwrap();
        match cli.command {
            Commands::Parse { mode, .. } => assert_eq!(mode, Mode::Builtins),
            _ => panic!("Expected Parse command"),
        }
    }

    #[test]
    fn test_menu_subcommand() {
        let cli = Cli::try_parse_from([
            "scripthub",
            "menu",
            "--config",
            "hub.json",
            "--dry-run",
            "--verbose",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Menu {
                config,
                dry_run,
                list,
            } => {
                assert_eq!(config, PathBuf::from("hub.json"));
                assert!(dry_run);
                assert!(!list);
            }
            _ => panic!("Expected Menu command"),
        }
    }

    #[test]
    fn test_dispatch_subcommand_requires_choice() {
        let result = Cli::try_parse_from(["scripthub", "dispatch", "--config", "hub.json"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_requires_subcommand() {
        let result = Cli::try_parse_from(["scripthub"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_help() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_load_arg_specs_merges_sources() {
        let specs = load_arg_specs(
            &records(&["force|f|flag|FORCE"]),
            Some(r#"[{"name": "name", "type": "value", "var": "NAME"}]"#),
        )
        .unwrap();
        assert_eq!(specs.len(), 2);

        let result = load_arg_specs(
            &records(&["force|f|flag|FORCE"]),
            Some(r#"[{"name": "force", "type": "flag", "var": "F"}]"#),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_script_args_with_prelude() {
        let specs = load_arg_specs(&records(&["name|N|value|NAME"]), None).unwrap();
        let args = records(&["-n", "-N", "bob", "rest"]);

        match parse_script_args(&specs, &args, Mode::Strict, true).unwrap() {
            ParsedArgs::Bound(result) => {
                assert!(result.flag("DRYRUN"));
                assert_eq!(result.value("NAME"), Some("bob"));
                assert_eq!(result.positional(), ["rest"]);
            }
            ParsedArgs::Help => panic!("Expected bindings"),
        }

        let args = records(&["--help"]);
        assert!(matches!(
            parse_script_args(&specs, &args, Mode::Strict, true),
            Ok(ParsedArgs::Help)
        ));
    }

    #[test]
    fn test_parse_script_args_without_prelude_is_strict() {
        let specs = load_arg_specs(&records(&["name|N|value|NAME"]), None).unwrap();
        let args = records(&["--dryrun"]);
        assert!(matches!(
            parse_script_args(&specs, &args, Mode::Strict, false),
            Err(ParseError::UnknownOption(_))
        ));
    }
}
