//! The hub: builtins, modules, the load cycle and the interactive loop.

use crate::config::ModuleConfig;
use crate::dispatch::{dispatch, DispatchError, DispatchOutcome, HandlerTable, RunState};
use crate::menu::{BuildReport, MenuEntry, MenuRegistry};
use crate::registry::BUILTIN_SOURCE;
use crate::state::{StateFile, DRYRUN_KEY, VERBOSE_KEY};
use anyhow::Context;
use std::io::{self, BufRead, Write};
use std::process::Command;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Builtin handler names.
pub const TOGGLE_VERBOSE: &str = "toggle_verbose";
pub const TOGGLE_DRYRUN: &str = "toggle_dryrun";
pub const EXIT_MENU: &str = "exit_menu";

/// Run-mode items every hub carries.
pub const BUILTIN_SPECS: [&str; 3] = [
    "V|Run modes|Toggle verbose mode|toggle_verbose|",
    "D|Run modes|Toggle dry-run mode|toggle_dryrun|",
    "X|Run modes|Exit|exit_menu|",
];

/// Environment variable exported to shell handlers with the dry-run mode.
pub const DRYRUN_ENV: &str = "SCRIPTHUB_DRYRUN";
/// Environment variable exported to shell handlers with the verbose mode.
pub const VERBOSE_ENV: &str = "SCRIPTHUB_VERBOSE";

/// Something that contributes menu items and their handlers.
pub trait MenuModule {
    /// Name recorded as the source of every spec.
    fn name(&self) -> &str;

    /// Raw 5-field specs: `key|group|label|handler|flags`.
    fn menu_specs(&self) -> Vec<String>;

    fn register_handlers(&self, handlers: &mut HandlerTable);
}

impl MenuModule for ModuleConfig {
    fn name(&self) -> &str {
        &self.name
    }

    fn menu_specs(&self) -> Vec<String> {
        self.menu.clone()
    }

    fn register_handlers(&self, handlers: &mut HandlerTable) {
        for (name, command) in &self.handlers {
            handlers.register(name.clone(), shell_handler(command.clone()));
        }
    }
}

/// A handler that runs `command` through `sh -c`.
///
/// The run modes are exported as `0`/`1`; a non-zero exit status fails.
pub fn shell_handler(command: String) -> impl FnMut(&mut RunState) -> anyhow::Result<()> {
    move |state: &mut RunState| {
        debug!("running '{}'", command);
        let status = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .env(DRYRUN_ENV, bool_env(state.dry_run))
            .env(VERBOSE_ENV, bool_env(state.verbose))
            .status()
            .with_context(|| format!("failed to run '{}'", command))?;

        if !status.success() {
            anyhow::bail!("'{}' exited with {}", command, status);
        }
        Ok(())
    }
}

fn bool_env(value: bool) -> &'static str {
    if value {
        "1"
    } else {
        "0"
    }
}

/// Composition root owning the menu, its handlers and the run modes.
#[derive(Debug)]
pub struct Hub {
    title: String,
    menu: MenuRegistry,
    handlers: HandlerTable,
    state: RunState,
    state_file: Option<StateFile>,
}

impl Hub {
    pub fn new(title: impl Into<String>) -> Self {
        let mut hub = Self {
            title: title.into(),
            menu: MenuRegistry::new(),
            handlers: HandlerTable::new(),
            state: RunState::default(),
            state_file: None,
        };
        hub.register_builtin_handlers();
        hub
    }

    pub fn with_state(mut self, state: RunState) -> Self {
        self.state = state;
        self
    }

    /// Persist run-mode toggles into `file`.
    pub fn with_state_file(mut self, file: StateFile) -> Self {
        self.state_file = Some(file);
        self
    }

    pub fn menu(&self) -> &MenuRegistry {
        &self.menu
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Handlers registered here survive every load cycle.
    pub fn handlers_mut(&mut self) -> &mut HandlerTable {
        &mut self.handlers
    }

    fn register_builtin_handlers(&mut self) {
        self.handlers.register(TOGGLE_VERBOSE, |state: &mut RunState| {
            state.verbose = !state.verbose;
            info!("verbose mode {}", on_off(state.verbose));
            Ok(())
        });
        self.handlers.register(TOGGLE_DRYRUN, |state: &mut RunState| {
            state.dry_run = !state.dry_run;
            info!("dry-run mode {}", on_off(state.dry_run));
            Ok(())
        });
        self.handlers.register(EXIT_MENU, |state: &mut RunState| {
            state.request_exit();
            Ok(())
        });
    }

    /// Rebuild the menu from the builtins and `modules`.
    ///
    /// Specs and module handlers are reset, builtins and then each module
    /// contribute, and the menu is compiled and ordered.
    pub fn load<M: MenuModule>(&mut self, modules: &[M]) -> BuildReport {
        self.menu.reset_specs();
        self.menu
            .specs_mut()
            .register_module(BUILTIN_SOURCE, BUILTIN_SPECS);

        let mut module_handlers = HandlerTable::new();
        for module in modules {
            let specs = module.menu_specs();
            debug!("module '{}' contributes {} spec(s)", module.name(), specs.len());
            self.menu.specs_mut().register_module(module.name(), specs);
            module.register_handlers(&mut module_handlers);
        }
        self.handlers.replace_loaded(module_handlers);

        let report = self.menu.rebuild();
        for entry in self.unresolved_handlers() {
            warn!(
                "menu item '{}' ({}) references undefined handler '{}'",
                entry.label, entry.key, entry.handler
            );
        }
        info!(
            "menu compiled: {} item(s), {} skipped",
            report.compiled,
            report.skipped.len()
        );
        report
    }

    /// Compiled entries whose handler is not registered.
    pub fn unresolved_handlers(&self) -> Vec<&MenuEntry> {
        self.menu
            .entries()
            .iter()
            .filter(|e| !self.handlers.contains(&e.handler))
            .collect()
    }

    /// Dispatch `choice`, persisting run-mode changes to the state file.
    pub fn dispatch(&mut self, choice: &str) -> Result<DispatchOutcome, DispatchError> {
        let before = (self.state.dry_run, self.state.verbose);
        let outcome = dispatch(&self.menu, &mut self.handlers, &mut self.state, choice)?;

        if (self.state.dry_run, self.state.verbose) != before {
            self.persist_run_modes();
        }
        Ok(outcome)
    }

    fn persist_run_modes(&mut self) {
        let Some(file) = self.state_file.as_mut() else {
            return;
        };
        let result = file
            .set(DRYRUN_KEY, bool_env(self.state.dry_run))
            .and_then(|()| file.set(VERBOSE_KEY, bool_env(self.state.verbose)))
            .and_then(|()| file.save());
        if let Err(e) = result {
            warn!(
                "could not persist run modes to {}: {}",
                file.path().display(),
                e
            );
        }
    }

    /// Title, run modes and the compiled menu.
    pub fn render(&self) -> String {
        let mut out = format!("{}\n", self.title);
        out.push_str(&"=".repeat(self.title.chars().count()));
        out.push('\n');
        if self.state.dry_run || self.state.verbose {
            let mut modes = Vec::new();
            if self.state.dry_run {
                modes.push("dry-run");
            }
            if self.state.verbose {
                modes.push("verbose");
            }
            out.push_str(&format!("[{}]\n", modes.join(", ")));
        }
        out.push('\n');
        out.push_str(&self.menu.render(self.state.dry_run));
        out
    }

    /// Render, prompt, dispatch and pause until exit is requested or input
    /// ends. Dispatch errors are logged and the loop carries on.
    pub fn run<R, W, P>(&mut self, input: &mut R, output: &mut W, mut pause: P) -> io::Result<()>
    where
        R: BufRead,
        W: Write,
        P: FnMut(Duration),
    {
        let mut line = String::new();

        while !self.state.exit_requested() {
            write!(output, "{}\nSelect: ", self.render())?;
            output.flush()?;

            line.clear();
            if input.read_line(&mut line)? == 0 {
                debug!("end of input, leaving menu");
                break;
            }

            match self.dispatch(&line) {
                Ok(outcome) => {
                    if let Some(wait) = outcome.wait().filter(|w| !w.is_zero()) {
                        pause(wait);
                    }
                }
                Err(e) => error!("{:#}", e),
            }
        }

        Ok(())
    }
}

fn on_off(value: bool) -> &'static str {
    if value {
        "on"
    } else {
        "off"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::BTreeMap;
    use std::rc::Rc;
    use tempfile::TempDir;

    /// A module whose handlers record their names into a shared log.
    struct RecordingModule {
        name: &'static str,
        specs: Vec<&'static str>,
        log: Rc<RefCell<Vec<String>>>,
    }

    impl MenuModule for RecordingModule {
        fn name(&self) -> &str {
            self.name
        }

        fn menu_specs(&self) -> Vec<String> {
            self.specs.iter().map(|s| s.to_string()).collect()
        }

        fn register_handlers(&self, handlers: &mut HandlerTable) {
            for spec in &self.specs {
                let handler = spec.split('|').nth(3).unwrap_or_default().to_string();
                let log = Rc::clone(&self.log);
                let name = handler.clone();
                handlers.register(handler, move |_state: &mut RunState| {
                    log.borrow_mut().push(name.clone());
                    Ok(())
                });
            }
        }
    }

    fn module(name: &'static str, specs: &[&'static str]) -> (RecordingModule, Rc<RefCell<Vec<String>>>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let module = RecordingModule {
            name,
            specs: specs.to_vec(),
            log: Rc::clone(&log),
        };
        (module, log)
    }

    #[test]
    fn test_builtins_render_last() {
        let (setup, _) = module("setup", &["1|Setup|Init|do_init|"]);
        let mut hub = Hub::new("Test hub");
        let report = hub.load(&[setup]);
        assert_eq!(report.compiled, 4);
        assert!(report.skipped.is_empty());

        let groups = hub.menu().groups();
        assert_eq!(groups, ["Setup", "Run modes"]);
        let keys: Vec<&str> = hub.menu().entries().iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, ["1", "V", "D", "X"]);
        assert_eq!(
            hub.menu().entries()[1].source.as_deref(),
            Some(BUILTIN_SOURCE)
        );
        assert_eq!(hub.menu().entries()[0].source.as_deref(), Some("setup"));
    }

    #[test]
    fn test_module_key_collision_with_builtin() {
        let (ops, _) = module("ops", &["x|Ops|Explode|boom|"]);
        let mut hub = Hub::new("Test hub");
        hub.load(&[ops]);
        let exit = hub.menu().lookup("X").unwrap();
        assert_eq!(exit.handler, EXIT_MENU);
        let boom = hub
            .menu()
            .entries()
            .iter()
            .find(|e| e.handler == "boom")
            .unwrap();
        assert_eq!(boom.key, "1");
    }

    #[test]
    fn test_unresolved_handlers() {
        let modules = vec![ModuleConfig {
            name: "cfg".to_string(),
            menu: vec!["1|Setup|Init|do_init|".to_string(), "2|Setup|Gone|missing|".to_string()],
            handlers: BTreeMap::from([("do_init".to_string(), "true".to_string())]),
        }];
        let mut hub = Hub::new("Test hub");
        hub.load(&modules);
        let unresolved: Vec<&str> = hub
            .unresolved_handlers()
            .iter()
            .map(|e| e.handler.as_str())
            .collect();
        assert_eq!(unresolved, ["missing"]);
        assert!(matches!(
            hub.dispatch("2"),
            Err(DispatchError::MissingHandler { .. })
        ));
    }

    #[test]
    fn test_builtin_toggles_and_exit() {
        let mut hub = Hub::new("Test hub");
        hub.load::<ModuleConfig>(&[]);

        hub.dispatch("d").unwrap();
        assert!(hub.state().dry_run);
        hub.dispatch("v").unwrap();
        assert!(hub.state().verbose);
        assert!(hub.render().contains("[dry-run, verbose]"));
        hub.dispatch("d").unwrap();
        assert!(!hub.state().dry_run);
        hub.dispatch("x").unwrap();
        assert!(hub.state().exit_requested());
    }

    #[test]
    fn test_toggles_persist_to_state_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.cfg");
        let mut hub = Hub::new("Test hub").with_state_file(StateFile::load(&path).unwrap());
        hub.load::<ModuleConfig>(&[]);

        hub.dispatch("D").unwrap();
        let saved = StateFile::load(&path).unwrap();
        assert_eq!(saved.get_bool(DRYRUN_KEY), Some(true));
        assert_eq!(saved.get_bool(VERBOSE_KEY), Some(false));
    }

    #[test]
    fn test_reload_replaces_modules() {
        let (first, _) = module("first", &["1|First|One|one|"]);
        let (second, _) = module("second", &["1|Second|Two|two|"]);
        let mut hub = Hub::new("Test hub");
        hub.load(&[first]);
        hub.load(&[second]);
        assert_eq!(hub.menu().groups(), ["Second", "Run modes"]);
        assert_eq!(hub.menu().entries().len(), 4);
    }

    #[test]
    fn test_reload_drops_handlers_of_removed_modules() {
        let first = ModuleConfig {
            name: "a".to_string(),
            menu: vec!["1|Setup|Init|h|".to_string()],
            handlers: BTreeMap::from([("h".to_string(), "true".to_string())]),
        };
        let second = ModuleConfig {
            name: "b".to_string(),
            menu: vec!["1|Setup|Init|h|".to_string(), "2|Setup|Own|own|".to_string()],
            handlers: BTreeMap::new(),
        };
        let mut hub = Hub::new("Test hub");
        hub.handlers_mut().register("own", |_state: &mut RunState| Ok(()));

        hub.load(&[first]);
        assert!(hub.unresolved_handlers().is_empty());

        hub.load(&[second]);
        let unresolved: Vec<&str> = hub
            .unresolved_handlers()
            .iter()
            .map(|e| e.handler.as_str())
            .collect();
        assert_eq!(unresolved, ["h"]);
        assert!(matches!(
            hub.dispatch("1"),
            Err(DispatchError::MissingHandler { .. })
        ));
        assert!(hub.dispatch("2").unwrap().invoked());
        hub.dispatch("x").unwrap();
        assert!(hub.state().exit_requested());
    }

    #[test]
    fn test_run_loop_until_exit() {
        let (setup, log) = module("setup", &["1|Setup|Init|do_init|", "2|Setup|Build|do_build|"]);
        let mut hub = Hub::new("Test hub");
        hub.load(&[setup]);

        let mut input = io::Cursor::new("1\nbogus\n\n2\nx\n1\n");
        let mut output = Vec::new();
        hub.run(&mut input, &mut output, |_| {}).unwrap();

        assert_eq!(*log.borrow(), ["do_init", "do_build"]);
        let rendered = String::from_utf8(output).unwrap();
        assert_eq!(rendered.matches("Select: ").count(), 5);
        assert!(rendered.contains("Test hub\n========\n"));
        assert!(rendered.contains("  [1] Init\n"));
    }

    #[test]
    fn test_run_loop_pauses_and_survives_errors() {
        let (setup, log) = module("setup", &["1|Setup|Init|do_init|"]);
        let mut hub = Hub::new("Test hub");
        hub.load(&[setup]);
        hub.menu.add_spec("setup|5|Setup|Broken|nowhere||0");
        hub.menu.add_spec("setup|6|Setup|Slow|do_init||2");
        hub.menu.rebuild();

        let mut pauses = Vec::new();
        let mut input = io::Cursor::new("5\n6\n5\n");
        let mut output = Vec::new();
        hub.run(&mut input, &mut output, |d| pauses.push(d)).unwrap();

        assert_eq!(pauses, [Duration::from_secs(2)]);
        assert_eq!(log.borrow().len(), 1);
        assert!(!hub.state().exit_requested());
    }

    #[cfg(unix)]
    #[test]
    fn test_shell_handler_status_and_env() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("marker");
        let mut ok = shell_handler(format!(
            "printf '%s' \"${}\" > '{}'",
            DRYRUN_ENV,
            marker.display()
        ));
        let mut state = RunState::new(true, false);
        ok(&mut state).unwrap();
        assert_eq!(std::fs::read_to_string(&marker).unwrap(), "1");

        let mut failing = shell_handler("exit 3".to_string());
        let err = failing(&mut state).unwrap_err();
        assert!(err.to_string().contains("exit 3"));
    }
}
