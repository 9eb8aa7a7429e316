//! Configuration access port.
//!
//! Lookups are by INI section and key. Typed getters fall back to the given
//! default when the key is absent or unparseable; `config_validation`
//! reports bad values before the agent starts.

use crate::domain::error::AgentError;

pub trait ConfigPort {
    fn get_string(&self, section: &str, key: &str) -> Option<String>;
    fn get_int(&self, section: &str, key: &str, default: i64) -> i64;
    fn get_double(&self, section: &str, key: &str, default: f64) -> f64;
    fn get_bool(&self, section: &str, key: &str, default: bool) -> bool;

    /// A non-empty string value, or `ConfigMissing`.
    fn require_string(&self, section: &str, key: &str) -> Result<String, AgentError> {
        self.get_string(section, key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AgentError::ConfigMissing {
                section: section.to_string(),
                key: key.to_string(),
            })
    }

    /// Comma-separated list, trimmed, empty items dropped.
    fn get_list(&self, section: &str, key: &str) -> Option<Vec<String>> {
        self.get_string(section, key).map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
    }
}
