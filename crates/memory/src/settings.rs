//! Per-user memory preferences.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Contents of `memory_settings.json`. Memory is on unless a user opted out.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemorySettings {
    #[serde(default)]
    pub disabled_users: BTreeSet<String>,
}

impl MemorySettings {
    pub fn is_enabled(&self, user_id: &str) -> bool {
        !self.disabled_users.contains(user_id)
    }

    /// Returns whether the setting changed.
    pub fn set_enabled(&mut self, user_id: &str, enabled: bool) -> bool {
        if enabled {
            self.disabled_users.remove(user_id)
        } else {
            self.disabled_users.insert(user_id.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enabled_by_default() {
        let settings = MemorySettings::default();
        assert!(settings.is_enabled("anyone"));
    }

    #[test]
    fn toggle_reports_change() {
        let mut settings = MemorySettings::default();
        assert!(settings.set_enabled("u1", false));
        assert!(!settings.set_enabled("u1", false));
        assert!(!settings.is_enabled("u1"));
        assert!(settings.set_enabled("u1", true));
        assert!(settings.is_enabled("u1"));
    }
}
