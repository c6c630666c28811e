//! opline configuration
//!
//! Translator options, loadable from a RON file. Every field has a default, so
//! a partial file (or an empty `()`) is valid.
//!
//! # Usage
//!
//! ```rust
//! use opline::util::config::CodegenConfig;
//!
//! let config = CodegenConfig::from_ron_str("(permissive_operators: true)").unwrap();
//! assert!(config.permissive_operators);
//! assert_eq!(config.temp_base, 0);
//! ```

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Parse(#[from] ron::error::SpannedError),

    #[error("Cannot serialize configuration: {0}")]
    Serialize(#[from] ron::Error),
}

/// Translator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodegenConfig {
    /// Emit `Nop` for unknown operator tokens instead of failing
    #[serde(default)]
    pub permissive_operators: bool,
    /// First temporary number of every unit
    #[serde(default)]
    pub temp_base: u32,
    /// Recursion limit of the constant-expression evaluator
    #[serde(default = "default_max_const_depth")]
    pub max_const_depth: usize,
    /// Append a `Return null` to units that do not end in one
    #[serde(default = "default_implicit_return")]
    pub implicit_return: bool,
    /// Log the disassembly of every finished unit at DEBUG level
    #[serde(default)]
    pub dump_units: bool,
}

fn default_max_const_depth() -> usize {
    256
}

fn default_implicit_return() -> bool {
    true
}

impl Default for CodegenConfig {
    fn default() -> Self {
        Self {
            permissive_operators: false,
            temp_base: 0,
            max_const_depth: default_max_const_depth(),
            implicit_return: default_implicit_return(),
            dump_units: false,
        }
    }
}

impl CodegenConfig {
    /// Parse a RON document
    pub fn from_ron_str(source: &str) -> Result<Self, ConfigError> {
        Ok(ron::from_str(source)?)
    }

    /// Render as a pretty RON document
    pub fn to_ron_string(&self) -> Result<String, ConfigError> {
        Ok(ron::ser::to_string_pretty(
            self,
            ron::ser::PrettyConfig::default(),
        )?)
    }

    /// Load from a RON file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let source = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_ron_str(&source)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }
}
