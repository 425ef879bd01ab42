//! Predefined action configuration

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// A shell script the operator can trigger by command name.
///
/// ```toml
/// [[actions]]
/// name = "audit"
/// script = "curl -s https://example.com/audit.sh | sh"
/// start_marker = "Starting audit"
/// completion_marker = "audit done"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionConfig {
    /// Command name that triggers the action
    pub name: String,

    /// Script written into the session
    pub script: String,

    /// Output that must be seen before completion is watched for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_marker: Option<String>,

    /// Output that signals completion
    pub completion_marker: String,
}

impl ActionConfig {
    /// Reject actions that could never run or never complete
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid("action name is empty".to_string()));
        }
        if self.script.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "action '{}' has an empty script",
                self.name
            )));
        }
        if self.completion_marker.chars().count() < 2 {
            return Err(ConfigError::Invalid(format!(
                "action '{}' needs a completion marker of at least two characters",
                self.name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action() -> ActionConfig {
        ActionConfig {
            name: "audit".to_string(),
            script: "sh audit.sh".to_string(),
            start_marker: None,
            completion_marker: "audit done".to_string(),
        }
    }

    #[test]
    fn test_valid_action() {
        assert!(action().validate().is_ok());
    }

    #[test]
    fn test_short_marker_rejected() {
        let mut bad = action();
        bad.completion_marker = "x".to_string();
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_empty_script_rejected() {
        let mut bad = action();
        bad.script = String::new();
        assert!(bad.validate().is_err());
    }
}
