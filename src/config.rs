//! Decompiler settings
//!
//! Each flag toggles exactly one transform. Settings are plain data: they are
//! loaded once (defaults, JSON file, CLI overrides) and shared read-only by
//! every method reconstruction.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Options recognized by the control-flow reconstruction core
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecompilerSettings {
    /// Wrap every embedded statement in braces
    pub always_use_braces: bool,
    /// Recognize switches on string discriminants
    pub switch_statement_on_string: bool,
    /// Recognize switches over non-contiguous integer label sets
    pub sparse_integer_switch: bool,
    /// Rewrite `x = x + 1` and single-use temporaries into `x++` / `x--`
    pub introduce_increment_and_decrement: bool,
    /// Recognize enumerator loops as `foreach`
    pub foreach_statements: bool,
    /// Turn value-producing switch statements into switch expressions
    pub expression_switches: bool,
}

impl Default for DecompilerSettings {
    fn default() -> Self {
        Self {
            always_use_braces: false,
            switch_statement_on_string: true,
            sparse_integer_switch: true,
            introduce_increment_and_decrement: true,
            foreach_statements: true,
            expression_switches: true,
        }
    }
}

impl DecompilerSettings {
    /// Parse settings from a JSON document. Missing keys keep their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Config {
            message: format!("invalid settings document: {}", e),
        })
    }

    /// Load settings from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let settings = Self::from_json(&text)?;
        log::debug!("Loaded settings from {}: {:?}", path.display(), settings);
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_enable_everything_but_braces() {
        let settings = DecompilerSettings::default();
        assert!(!settings.always_use_braces);
        assert!(settings.switch_statement_on_string);
        assert!(settings.sparse_integer_switch);
        assert!(settings.introduce_increment_and_decrement);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let settings =
            DecompilerSettings::from_json(r#"{ "always_use_braces": true }"#).unwrap();
        assert!(settings.always_use_braces);
        assert!(settings.sparse_integer_switch);
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let err = DecompilerSettings::from_json("{ always_use_braces: }").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Config);
    }
}
