//! Ordered tracking of menu groups.

/// The group holding run-mode toggles and exit. Always rendered last.
pub const RUN_MODES_GROUP: &str = "Run modes";

/// Records group names in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupTracker {
    groups: Vec<String>,
}

impl GroupTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `name` on first sight; later sightings are no-ops.
    pub fn see_group(&mut self, name: &str) {
        if !self.groups.iter().any(|g| g == name) {
            self.groups.push(name.to_string());
        }
    }

    /// Move `name` to the end, appending it if it was never seen.
    pub fn force_group_last(&mut self, name: &str) {
        self.groups.retain(|g| g != name);
        self.groups.push(name.to_string());
    }

    /// Position of `name` in the current order.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.groups.iter().position(|g| g == name)
    }

    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    pub fn clear(&mut self) {
        self.groups.clear();
    }
}
