//! Spec registry: raw menu specs collected before compilation.

use crate::spec::FIELD_SEPARATOR;

/// Source name used for specs contributed by the hub itself.
pub const BUILTIN_SOURCE: &str = "builtin";

/// Ordered list of raw spec records.
///
/// Records are stored verbatim; validation happens when the menu is compiled.
#[derive(Debug, Clone, Default)]
pub struct SpecRegistry {
    specs: Vec<String>,
}

impl SpecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a raw record.
    pub fn add_spec(&mut self, record: impl Into<String>) {
        self.specs.push(record.into());
    }

    /// Append a module's 5-field records, prefixing each with `source`.
    pub fn register_module<I, S>(&mut self, source: &str, records: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for record in records {
            self.add_spec(format!("{}{}{}", source, FIELD_SEPARATOR, record.as_ref()));
        }
    }

    pub fn reset_specs(&mut self) {
        self.specs.clear();
    }

    pub fn specs(&self) -> &[String] {
        &self.specs
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}
