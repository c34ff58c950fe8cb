//! Menu spec records and item flags.
//!
//! A spec is a pipe-delimited record contributed by a builtin or a module:
//!
//! - `key|group|label|handler|flags` (5 fields)
//! - `source|key|group|label|handler|flags` (6 fields)
//! - `source|key|group|label|handler|flags|wait` (7 fields)
//!
//! Fields are never escaped, so a `|` inside a label or handler name is not
//! supported.

use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Field separator of the spec wire format.
pub const FIELD_SEPARATOR: char = '|';

/// Errors that make a spec record unusable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpecError {
    #[error("invalid spec arity {arity} (expected 5, 6 or 7 fields): {record}")]
    InvalidArity { arity: usize, record: String },

    #[error("spec is missing required field '{field}': {record}")]
    MissingField { field: &'static str, record: String },
}

bitflags::bitflags! {
    /// Modifiers attached to a menu item.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ItemFlags: u8 {
        /// The item is shown but can never be dispatched.
        const DISABLED = 1 << 0;
        /// The item cannot be dispatched while dry-run mode is active.
        const DISABLED_IF_DRYRUN = 1 << 1;
    }
}

impl ItemFlags {
    /// Parse a comma-separated flag list such as `disabled,disabled_if_dryrun`.
    ///
    /// Unknown names are ignored.
    pub fn parse(s: &str) -> Self {
        let mut flags = ItemFlags::empty();
        for name in s.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            match name {
                "disabled" => flags |= ItemFlags::DISABLED,
                "disabled_if_dryrun" => flags |= ItemFlags::DISABLED_IF_DRYRUN,
                other => debug!("ignoring unknown menu flag '{}'", other),
            }
        }
        flags
    }

    /// Whether an item carrying these flags may be dispatched.
    pub fn blocks_dispatch(self, dry_run: bool) -> bool {
        self.contains(ItemFlags::DISABLED)
            || (dry_run && self.contains(ItemFlags::DISABLED_IF_DRYRUN))
    }
}

impl fmt::Display for ItemFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.contains(ItemFlags::DISABLED) {
            names.push("disabled");
        }
        if self.contains(ItemFlags::DISABLED_IF_DRYRUN) {
            names.push("disabled_if_dryrun");
        }
        f.write_str(&names.join(","))
    }
}

/// A parsed but not yet normalized menu item description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuSpec {
    /// Contributing module (`builtin` or a module name).
    pub source: Option<String>,
    /// Display key; `None` means a key is assigned at build time.
    pub key: Option<String>,
    pub group: String,
    pub label: String,
    /// Name of the handler, resolved at dispatch time.
    pub handler: String,
    pub flags: ItemFlags,
    /// Pause after the handler returns.
    pub wait: Option<Duration>,
}

impl MenuSpec {
    /// Parse a pipe-delimited spec record.
    pub fn parse(record: &str) -> Result<MenuSpec, SpecError> {
        let fields: Vec<&str> = record.split(FIELD_SEPARATOR).collect();

        let (source, rest, wait) = match fields.len() {
            5 => (None, &fields[..], None),
            6 => (Some(fields[0]), &fields[1..], None),
            7 => (Some(fields[0]), &fields[1..6], Some(fields[6])),
            arity => {
                return Err(SpecError::InvalidArity {
                    arity,
                    record: record.to_string(),
                })
            }
        };

        let required = |value: &str, field: &'static str| {
            let value = value.trim();
            if value.is_empty() {
                Err(SpecError::MissingField {
                    field,
                    record: record.to_string(),
                })
            } else {
                Ok(value.to_string())
            }
        };

        let group = required(rest[1], "group")?;
        let label = required(rest[2], "label")?;
        let handler = required(rest[3], "handler")?;

        Ok(MenuSpec {
            source: source.and_then(non_empty),
            key: non_empty(rest[0]),
            group,
            label,
            handler,
            flags: ItemFlags::parse(rest[4]),
            wait: wait.and_then(|w| parse_wait(w, record)),
        })
    }

    /// Render this spec back into its 7-field record form.
    pub fn to_record(&self) -> String {
        let wait = self
            .wait
            .map(|w| w.as_secs().to_string())
            .unwrap_or_default();
        let flags = self.flags.to_string();
        let fields: [&str; 7] = [
            self.source.as_deref().unwrap_or(""),
            self.key.as_deref().unwrap_or(""),
            &self.group,
            &self.label,
            &self.handler,
            &flags,
            &wait,
        ];
        fields.join("|")
    }
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

fn parse_wait(value: &str, record: &str) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    match value.parse::<u64>() {
        Ok(secs) => Some(Duration::from_secs(secs)),
        Err(_) => {
            debug!("ignoring invalid wait '{}' in spec: {}", value, record);
            None
        }
    }
}
