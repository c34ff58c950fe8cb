//! Menu compilation: key normalization, group ordering and lookup.
//!
//! The compiled menu is rebuilt from the spec registry on every load cycle:
//! `reset_specs` → `add_spec`... → [`MenuRegistry::build_from_specs`] →
//! [`MenuRegistry::apply_ordering`]. Dispatch never mutates it.

use crate::groups::{GroupTracker, RUN_MODES_GROUP};
use crate::registry::SpecRegistry;
use crate::spec::{ItemFlags, MenuSpec, SpecError};
use std::collections::HashSet;
use std::fmt::Write as _;
use std::time::Duration;
use tracing::{debug, warn};

/// A validated menu item with its final display key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuEntry {
    pub key: String,
    pub group: String,
    pub label: String,
    pub handler: String,
    pub flags: ItemFlags,
    pub wait: Option<Duration>,
    pub source: Option<String>,
}

impl MenuEntry {
    /// Build an entry directly, bypassing the spec pipeline.
    pub fn new(
        key: impl Into<String>,
        group: impl Into<String>,
        label: impl Into<String>,
        handler: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            group: group.into(),
            label: label.into(),
            handler: handler.into(),
            flags: ItemFlags::empty(),
            wait: None,
            source: None,
        }
    }

    fn matches_key(&self, canonical: &str) -> bool {
        canonical_key(&self.key) == canonical
    }
}

/// Sort weight of a display key.
///
/// Numeric keys order by integer value and always precede named keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum KeyWeight {
    Numeric(u64),
    Named,
}

impl KeyWeight {
    pub fn of(key: &str) -> Self {
        if key.is_empty() || !key.bytes().all(|b| b.is_ascii_digit()) {
            return KeyWeight::Named;
        }
        key.parse().map(KeyWeight::Numeric).unwrap_or(KeyWeight::Named)
    }
}

/// Identity of a key for uniqueness and lookup: numeric keys by value
/// (`01` is `1`), named keys case-insensitively.
fn canonical_key(key: &str) -> String {
    match KeyWeight::of(key) {
        KeyWeight::Numeric(n) => n.to_string(),
        KeyWeight::Named => key.to_uppercase(),
    }
}

/// Outcome of [`MenuRegistry::build_from_specs`].
#[derive(Debug, Default)]
pub struct BuildReport {
    /// Number of entries in the compiled menu.
    pub compiled: usize,
    /// Records rejected as malformed.
    pub skipped: Vec<SpecError>,
}

/// Spec registry, group order and compiled menu for one hub.
#[derive(Debug, Clone, Default)]
pub struct MenuRegistry {
    specs: SpecRegistry,
    groups: GroupTracker,
    entries: Vec<MenuEntry>,
}

impl MenuRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn specs(&self) -> &SpecRegistry {
        &self.specs
    }

    pub fn specs_mut(&mut self) -> &mut SpecRegistry {
        &mut self.specs
    }

    pub fn add_spec(&mut self, record: impl Into<String>) {
        self.specs.add_spec(record);
    }

    pub fn reset_specs(&mut self) {
        self.specs.reset_specs();
    }

    /// Groups in their current display order.
    pub fn groups(&self) -> &[String] {
        self.groups.groups()
    }

    /// Compiled entries in their current order.
    pub fn entries(&self) -> &[MenuEntry] {
        &self.entries
    }

    /// Drop the compiled menu and its group order.
    pub fn reset_compiled(&mut self) {
        self.entries.clear();
        self.groups.clear();
    }

    /// Add an entry to the compiled menu.
    ///
    /// An existing entry with the same key (case-insensitive) is overwritten
    /// in place and returned.
    pub fn register_compiled_item(&mut self, entry: MenuEntry) -> Option<MenuEntry> {
        self.groups.see_group(&entry.group);

        let canonical = canonical_key(&entry.key);
        if let Some(existing) = self.entries.iter_mut().find(|e| e.matches_key(&canonical)) {
            debug!(
                "menu key '{}' re-registered: '{}' replaces '{}'",
                entry.key, entry.label, existing.label
            );
            return Some(std::mem::replace(existing, entry));
        }

        self.entries.push(entry);
        None
    }

    /// Compile the registered specs into the menu.
    ///
    /// Malformed specs are skipped. Missing or colliding keys receive the
    /// smallest unused integer key. Entries are emitted grouped by first-seen
    /// group order with [`RUN_MODES_GROUP`] last.
    pub fn build_from_specs(&mut self) -> BuildReport {
        self.reset_compiled();

        let mut report = BuildReport::default();
        let mut used: HashSet<String> = HashSet::new();
        let mut next_auto: u64 = 1;
        let mut staged: Vec<MenuEntry> = Vec::new();

        for record in self.specs.specs() {
            let spec = match MenuSpec::parse(record) {
                Ok(spec) => spec,
                Err(e) => {
                    warn!("skipping menu spec: {}", e);
                    report.skipped.push(e);
                    continue;
                }
            };

            let key = match spec.key {
                Some(key) if !used.contains(&canonical_key(&key)) => key,
                Some(key) => {
                    let assigned = next_free_key(&used, &mut next_auto);
                    debug!(
                        "menu key '{}' for '{}' already used, assigned '{}'",
                        key, spec.label, assigned
                    );
                    assigned
                }
                None => {
                    let assigned = next_free_key(&used, &mut next_auto);
                    debug!("menu item '{}' has no key, assigned '{}'", spec.label, assigned);
                    assigned
                }
            };
            used.insert(canonical_key(&key));

            self.groups.see_group(&spec.group);
            staged.push(MenuEntry {
                key,
                group: spec.group,
                label: spec.label,
                handler: spec.handler,
                flags: spec.flags,
                wait: spec.wait,
                source: spec.source,
            });
        }

        self.groups.force_group_last(RUN_MODES_GROUP);

        let groups = &self.groups;
        staged.sort_by_key(|e| group_index(groups, &e.group));
        for entry in staged {
            self.register_compiled_item(entry);
        }

        report.compiled = self.entries.len();
        report
    }

    /// Stable-sort the compiled menu by group position, then key weight.
    pub fn apply_ordering(&mut self) {
        self.groups.force_group_last(RUN_MODES_GROUP);

        let groups = &self.groups;
        self.entries
            .sort_by_key(|e| (group_index(groups, &e.group), KeyWeight::of(&e.key)));
    }

    /// Build and order in one step.
    pub fn rebuild(&mut self) -> BuildReport {
        let report = self.build_from_specs();
        self.apply_ordering();
        report
    }

    /// Find the entry whose key matches `choice`, ignoring case and
    /// leading zeros.
    pub fn lookup(&self, choice: &str) -> Option<&MenuEntry> {
        let choice = choice.trim();
        if choice.is_empty() {
            return None;
        }
        let canonical = canonical_key(choice);
        self.entries.iter().find(|e| e.matches_key(&canonical))
    }

    /// Plain-text listing of the compiled menu, one block per group.
    pub fn render(&self, dry_run: bool) -> String {
        let mut out = String::new();
        let mut current: Option<&str> = None;

        for entry in &self.entries {
            if current != Some(entry.group.as_str()) {
                if current.is_some() {
                    out.push('\n');
                }
                let _ = writeln!(out, "{}", entry.group);
                current = Some(entry.group.as_str());
            }

            let _ = write!(out, "  [{}] {}", entry.key, entry.label);
            if entry.flags.contains(ItemFlags::DISABLED) {
                out.push_str(" (disabled)");
            } else if dry_run && entry.flags.contains(ItemFlags::DISABLED_IF_DRYRUN) {
                out.push_str(" (dry-run)");
            }
            out.push('\n');
        }

        out
    }
}

fn group_index(groups: &GroupTracker, group: &str) -> usize {
    groups.position(group).unwrap_or(usize::MAX)
}

fn next_free_key(used: &HashSet<String>, counter: &mut u64) -> String {
    while used.contains(&counter.to_string()) {
        *counter += 1;
    }
    let key = counter.to_string();
    *counter += 1;
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(records: &[&str]) -> MenuRegistry {
        let mut menu = MenuRegistry::new();
        for record in records {
            menu.add_spec(*record);
        }
        menu.rebuild();
        menu
    }

    fn keys(menu: &MenuRegistry) -> Vec<&str> {
        menu.entries().iter().map(|e| e.key.as_str()).collect()
    }

    fn labels(menu: &MenuRegistry) -> Vec<&str> {
        menu.entries().iter().map(|e| e.label.as_str()).collect()
    }

    #[test]
    fn test_key_weight() {
        assert_eq!(KeyWeight::of("2"), KeyWeight::Numeric(2));
        assert_eq!(KeyWeight::of("010"), KeyWeight::Numeric(10));
        assert_eq!(KeyWeight::of("A"), KeyWeight::Named);
        assert_eq!(KeyWeight::of("1a"), KeyWeight::Named);
        assert_eq!(KeyWeight::of(""), KeyWeight::Named);
        assert!(KeyWeight::of("2") < KeyWeight::of("10"));
        assert!(KeyWeight::of("999999") < KeyWeight::of("A"));
    }

    #[test]
    fn test_unique_explicit_keys_preserved() {
        let menu = compile(&["m|7|G|Seven|h7|", "m|x|G|Ex|hx|", "m|3|G|Three|h3|"]);
        let mut got = keys(&menu);
        got.sort();
        assert_eq!(got, ["3", "7", "x"]);
    }

    #[test]
    fn test_missing_keys_get_smallest_free_integer() {
        let menu = compile(&["m|2|G|Two|h|", "m||G|First|h|", "m||G|Second|h|"]);
        let by_label = |label: &str| {
            menu.entries()
                .iter()
                .find(|e| e.label == label)
                .map(|e| e.key.clone())
        };
        assert_eq!(by_label("Two").as_deref(), Some("2"));
        assert_eq!(by_label("First").as_deref(), Some("1"));
        assert_eq!(by_label("Second").as_deref(), Some("3"));
    }

    #[test]
    fn test_colliding_key_gets_next_integer_case_insensitive() {
        let menu = compile(&["m|a|G|Lower|h|", "m|A|G|Upper|h|", "m|1|G|One|h|"]);
        let upper = menu.entries().iter().find(|e| e.label == "Upper").unwrap();
        assert_eq!(upper.key, "1");
        // The explicit "1" arrived after "1" was handed out, so it moves too.
        let one = menu.entries().iter().find(|e| e.label == "One").unwrap();
        assert_eq!(one.key, "2");
        let lower = menu.entries().iter().find(|e| e.label == "Lower").unwrap();
        assert_eq!(lower.key, "a");
    }

    #[test]
    fn test_numeric_keys_compare_by_value() {
        let menu = compile(&["m|01|G|Padded|h|", "m||G|Auto|h|", "m|1|G|Plain|h|"]);
        let by_label = |label: &str| {
            menu.entries()
                .iter()
                .find(|e| e.label == label)
                .map(|e| e.key.clone())
        };
        assert_eq!(by_label("Padded").as_deref(), Some("01"));
        assert_eq!(by_label("Auto").as_deref(), Some("2"));
        assert_eq!(by_label("Plain").as_deref(), Some("3"));
        assert_eq!(menu.lookup("1").map(|e| e.label.as_str()), Some("Padded"));
        assert_eq!(menu.lookup("001").map(|e| e.label.as_str()), Some("Padded"));
    }

    #[test]
    fn test_keys_pairwise_distinct() {
        let menu = compile(&[
            "m|1|G|A|h|",
            "m|1|G|B|h|",
            "m||G|C|h|",
            "m|q|H|D|h|",
            "m|Q|H|E|h|",
            "m|3|H|F|h|",
            "m||H|G|h|",
        ]);
        let mut seen = HashSet::new();
        for entry in menu.entries() {
            assert!(seen.insert(entry.key.to_uppercase()), "duplicate key {}", entry.key);
        }
        assert_eq!(menu.entries().len(), 7);
    }

    #[test]
    fn test_malformed_specs_skipped() {
        let mut menu = MenuRegistry::new();
        menu.add_spec("m|1|G|Good|h|");
        menu.add_spec("too|few");
        menu.add_spec("m|2||NoGroup|h|");
        menu.add_spec("m|3|G|Also good|h|");
        let report = menu.build_from_specs();
        assert_eq!(report.compiled, 2);
        assert_eq!(report.skipped.len(), 2);
        assert_eq!(labels(&menu), ["Good", "Also good"]);
    }

    #[test]
    fn test_run_modes_always_last() {
        let menu = compile(&[
            "m|1|A|a1|h|",
            "m|2|B|b1|h|",
            "m|3|Run modes|r1|h|",
            "m|4|C|c1|h|",
        ]);
        assert_eq!(menu.groups(), ["A", "B", "C", "Run modes"]);
        assert_eq!(labels(&menu), ["a1", "b1", "c1", "r1"]);
    }

    #[test]
    fn test_run_modes_group_present_without_items() {
        let menu = compile(&["m|1|A|a1|h|"]);
        assert_eq!(menu.groups(), ["A", RUN_MODES_GROUP]);
    }

    #[test]
    fn test_numeric_keys_sort_numerically_named_last() {
        let menu = compile(&[
            "m|Z|G|zed|h|",
            "m|10|G|ten|h|",
            "m|B|G|bee|h|",
            "m|2|G|two|h|",
        ]);
        assert_eq!(keys(&menu), ["2", "10", "Z", "B"]);
    }

    #[test]
    fn test_build_without_ordering_groups_by_registration() {
        let mut menu = MenuRegistry::new();
        menu.add_spec("m|10|A|ten|h|");
        menu.add_spec("m|1|B|one|h|");
        menu.add_spec("m|2|A|two|h|");
        menu.build_from_specs();
        assert_eq!(labels(&menu), ["ten", "two", "one"]);
        menu.apply_ordering();
        assert_eq!(labels(&menu), ["two", "ten", "one"]);
    }

    #[test]
    fn test_seven_field_example_ordering() {
        let menu = compile(&[
            "|A|Run modes|Exit|doExit||1",
            "2|A|Run modes|Toggle|doToggle||",
            "10|B|Setup|Init|doInit||",
        ]);
        let summary: Vec<(&str, &str, &str)> = menu
            .entries()
            .iter()
            .map(|e| (e.group.as_str(), e.key.as_str(), e.label.as_str()))
            .collect();
        assert_eq!(
            summary,
            [
                ("Setup", "B", "Init"),
                ("Run modes", "1", "Toggle"),
                ("Run modes", "A", "Exit"),
            ]
        );
        assert_eq!(menu.entries()[2].wait, Some(Duration::from_secs(1)));
        assert_eq!(menu.entries()[1].source.as_deref(), Some("2"));
    }

    #[test]
    fn test_rebuild_replaces_previous_model() {
        let mut menu = compile(&["m|1|Old|old|h|"]);
        menu.reset_specs();
        menu.add_spec("m|1|New|new|h|");
        menu.rebuild();
        assert_eq!(labels(&menu), ["new"]);
        assert_eq!(menu.groups(), ["New", RUN_MODES_GROUP]);
    }

    #[test]
    fn test_register_compiled_item_overwrites() {
        let mut menu = MenuRegistry::new();
        assert!(menu
            .register_compiled_item(MenuEntry::new("a", "G", "first", "h1"))
            .is_none());
        let replaced = menu.register_compiled_item(MenuEntry::new("A", "G", "second", "h2"));
        assert_eq!(replaced.map(|e| e.label), Some("first".to_string()));
        assert_eq!(menu.entries().len(), 1);
        assert_eq!(menu.entries()[0].key, "A");
        assert_eq!(menu.entries()[0].handler, "h2");
    }

    #[test]
    fn test_direct_registration_keeps_run_modes_last_after_ordering() {
        let mut menu = compile(&["m|1|A|a1|h|", "m|X|Run modes|Exit|h|"]);
        menu.register_compiled_item(MenuEntry::new("5", "Late", "late", "h"));
        menu.apply_ordering();
        assert_eq!(menu.groups(), ["A", "Late", RUN_MODES_GROUP]);
        assert_eq!(labels(&menu), ["a1", "late", "Exit"]);
    }

    #[test]
    fn test_lookup_case_insensitive() {
        let menu = compile(&["m|v|Run modes|Verbose|h|"]);
        assert_eq!(menu.lookup("V").map(|e| e.label.as_str()), Some("Verbose"));
        assert_eq!(menu.lookup(" v ").map(|e| e.label.as_str()), Some("Verbose"));
        assert!(menu.lookup("").is_none());
        assert!(menu.lookup("w").is_none());
    }

    #[test]
    fn test_render() {
        let menu = compile(&[
            "m|1|Setup|Init|h|",
            "m|2|Setup|Wipe|h|disabled",
            "m|3|Setup|Deploy|h|disabled_if_dryrun",
            "m|X|Run modes|Exit|h|",
        ]);
        assert_eq!(
            menu.render(false),
            "Setup\n  [1] Init\n  [2] Wipe (disabled)\n  [3] Deploy\n\nRun modes\n  [X] Exit\n"
        );
        assert!(menu.render(true).contains("  [3] Deploy (dry-run)\n"));
    }
}
